//! Well-known property names.
//!
//! Descriptor properties are public and travel with the descriptor.
//! Repository-private properties are stamped by the owning repository and,
//! apart from [`ARTIFACT_REFERENCE`], never take part in descriptor identity.

/// Descriptor property: storage format of the bytes.
pub const FORMAT: &str = "format";

/// Value of [`FORMAT`] for the obsolete packed encoding. Such descriptors are
/// dropped when metadata is read.
pub const FORMAT_PACKED: &str = "packed";

/// Descriptor property: size of the canonical artifact in bytes.
pub const ARTIFACT_SIZE: &str = "artifact.size";

/// Descriptor property: size of the stored bytes in bytes.
pub const DOWNLOAD_SIZE: &str = "download.size";

/// Descriptor property: content type of the stored bytes.
pub const DOWNLOAD_CONTENT_TYPE: &str = "download.contentType";

/// Value of [`DOWNLOAD_CONTENT_TYPE`] that enables zip-structure checking.
pub const CONTENT_TYPE_ZIP: &str = "application/zip";

/// Prefix of descriptor properties holding checksums of the stored bytes.
pub const DOWNLOAD_CHECKSUM_PREFIX: &str = "download.checksum.";

/// Prefix of descriptor properties holding checksums of the canonical bytes.
pub const ARTIFACT_CHECKSUM_PREFIX: &str = "artifact.checksum.";

/// Descriptor property: base64 Ed25519 signature over the SHA-256 digest of
/// the canonical bytes.
pub const SIGNATURE_ED25519: &str = "signature.ed25519";

/// Repository-private property: explicit location of the bytes.
pub const ARTIFACT_REFERENCE: &str = "artifact.reference";

/// Repository-private property: `true` when the artifact is a directory tree.
pub const ARTIFACT_FOLDER: &str = "artifact.folder";

/// Repository-private property: blob id for artifacts without a canonical
/// mapping.
pub const ARTIFACT_UUID: &str = "artifact.uuid";

/// Repository property: location of the mirror list document.
pub const MIRRORS_URL: &str = "mirrorsURL";

/// Repository property: `true` selects the compressed metadata encoding.
pub const COMPRESSED: &str = "artifact.compressed";

/// Repository property: repository-declared cap on download workers.
pub const MAX_THREADS: &str = "download.maxThreads";

/// Repository property: time of the last metadata write, in epoch millis.
pub const TIMESTAMP: &str = "repository.timestamp";
