//! Shared data model for depot artifact repositories.
//!
//! Everything here is pure data: keys, descriptors, mapping rules, checksum
//! vocabulary, the hierarchical [`Status`] tree and the filter language that
//! mapping rules are written in. Side effects live in `depot-core`.

pub mod descriptor;
pub mod filter;
pub mod hash;
pub mod key;
pub mod props;
pub mod rule;
pub mod status;

// Re-exports
pub use descriptor::{ArtifactDescriptor, ProcessingStepDescriptor};
pub use filter::{Filter, FilterError};
pub use hash::{Checksum, ChecksumAlgorithm, ChecksumHasher, Digest};
pub use key::{ArtifactKey, KeyError, Version};
pub use rule::MappingRule;
pub use status::{Severity, Status, StatusCode, artifact_error};

/// Name of the plain metadata file inside a repository directory.
pub const METADATA_XML: &str = "artifacts.xml";

/// Name of the compressed metadata archive inside a repository directory.
pub const METADATA_JAR: &str = "artifacts.jar";
