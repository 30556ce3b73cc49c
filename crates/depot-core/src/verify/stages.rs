use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use depot_schema::{Checksum, ChecksumHasher, Status, StatusCode};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use sha2::{Digest as _, Sha256};

use super::Scope;

/// Observes bytes as they stream past and judges them at the end.
pub trait Verifier: Send {
    /// Observe the next chunk.
    fn update(&mut self, data: &[u8]);

    /// Judge everything observed.
    fn finish(self: Box<Self>) -> Status;
}

/// Compares a streamed digest with a declared checksum.
pub struct ChecksumVerifier {
    checksum: Checksum,
    scope: Scope,
    hasher: ChecksumHasher,
}

impl ChecksumVerifier {
    /// `None` if the checksum's algorithm is not supported.
    pub fn new(checksum: Checksum, scope: Scope) -> Option<Self> {
        let hasher = checksum.algorithm()?.hasher();
        Some(Self {
            checksum,
            scope,
            hasher,
        })
    }
}

impl Verifier for ChecksumVerifier {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(self: Box<Self>) -> Status {
        let actual = self.hasher.finalize();
        if self.checksum.matches(&actual) {
            Status::ok()
        } else {
            Status::error(
                StatusCode::ArtifactProcessing,
                format!(
                    "Invalid {} checksum ({}): expected {}, got {}",
                    self.scope,
                    self.checksum.algorithm_id(),
                    self.checksum.expected(),
                    actual
                ),
            )
        }
    }
}

/// Reports a fixed outcome; bytes pass untouched.
pub struct NoticeVerifier {
    status: Status,
}

impl NoticeVerifier {
    /// Report `status` when finished.
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

impl Verifier for NoticeVerifier {
    fn update(&mut self, _: &[u8]) {}

    fn finish(self: Box<Self>) -> Status {
        self.status
    }
}

const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

/// Checks that the stream starts with a zip signature.
#[derive(Default)]
pub struct ZipStructureVerifier {
    head: Vec<u8>,
}

impl ZipStructureVerifier {
    /// Fresh verifier.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Verifier for ZipStructureVerifier {
    fn update(&mut self, data: &[u8]) {
        let missing = 4usize.saturating_sub(self.head.len());
        self.head.extend_from_slice(&data[..missing.min(data.len())]);
    }

    fn finish(self: Box<Self>) -> Status {
        if self.head.as_slice() == ZIP_LOCAL_HEADER || self.head.as_slice() == ZIP_EMPTY_ARCHIVE {
            Status::ok()
        } else {
            Status::error(
                StatusCode::ArtifactProcessing,
                "Content is declared as zip but has no zip signature",
            )
        }
    }
}

/// Decode base64 Ed25519 public keys, skipping malformed ones with a warning.
pub fn parse_trusted_keys(keys: &[String]) -> Vec<VerifyingKey> {
    keys.iter()
        .filter_map(|text| {
            let parsed = BASE64
                .decode(text.trim())
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
                .and_then(|bytes| VerifyingKey::from_bytes(&bytes).ok());
            if parsed.is_none() {
                tracing::warn!(key = %text, "Ignoring malformed trusted key");
            }
            parsed
        })
        .collect()
}

/// Verifies a detached Ed25519 signature over the SHA-256 digest of the stream.
pub struct SignatureVerifier {
    hasher: Sha256,
    signature: Option<Signature>,
    raw_signature: String,
    keys: Vec<VerifyingKey>,
}

impl SignatureVerifier {
    /// Verifier for a base64 `signature`, trusting `trusted_keys` (base64).
    pub fn new(signature: &str, trusted_keys: &[String]) -> Self {
        let decoded = BASE64
            .decode(signature.trim())
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok());
        Self {
            hasher: Sha256::new(),
            signature: decoded,
            raw_signature: signature.to_string(),
            keys: parse_trusted_keys(trusted_keys),
        }
    }
}

impl Verifier for SignatureVerifier {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(self: Box<Self>) -> Status {
        let Some(signature) = self.signature else {
            return Status::error(
                StatusCode::ArtifactProcessing,
                format!("Malformed signature '{}'", self.raw_signature),
            );
        };
        if self.keys.is_empty() {
            return Status::warning(
                StatusCode::Ok,
                "Artifact is signed but no trusted keys are configured; signature not verified",
            );
        }
        let digest = self.hasher.finalize();
        if self
            .keys
            .iter()
            .any(|key| key.verify(digest.as_slice(), &signature).is_ok())
        {
            Status::ok()
        } else {
            Status::error(
                StatusCode::ArtifactProcessing,
                "Signature does not verify against any trusted key",
            )
        }
    }
}

/// Applies the unsigned-artifact policy.
pub struct TrustPolicyVerifier {
    require_signatures: bool,
    signed: bool,
}

impl TrustPolicyVerifier {
    /// Policy outcome for an artifact that is or is not `signed`.
    pub fn new(require_signatures: bool, signed: bool) -> Self {
        Self {
            require_signatures,
            signed,
        }
    }
}

impl Verifier for TrustPolicyVerifier {
    fn update(&mut self, _: &[u8]) {}

    fn finish(self: Box<Self>) -> Status {
        if self.require_signatures && !self.signed {
            Status::error(
                StatusCode::ArtifactProcessing,
                "Artifact is unsigned and signatures are required",
            )
        } else {
            Status::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use sha2::Digest as _;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn sign(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        BASE64.encode(signing_key().sign(digest.as_slice()).to_bytes())
    }

    fn public_key() -> String {
        BASE64.encode(signing_key().verifying_key().to_bytes())
    }

    fn verify(mut v: Box<dyn Verifier>, chunks: &[&[u8]]) -> Status {
        for chunk in chunks {
            v.update(chunk);
        }
        v.finish()
    }

    #[test]
    fn signature_verifies_across_chunks() {
        let sig = sign(b"hello world");
        let v = SignatureVerifier::new(&sig, &[public_key()]);
        assert!(verify(Box::new(v), &[b"hello ", b"world"]).is_ok());
    }

    #[test]
    fn tampered_content_fails_signature() {
        let sig = sign(b"hello world");
        let v = SignatureVerifier::new(&sig, &[public_key()]);
        let status = verify(Box::new(v), &[b"hello there"]);
        assert!(status.is_error());
        assert_eq!(status.code(), StatusCode::ArtifactProcessing);
    }

    #[test]
    fn signature_without_trusted_keys_warns() {
        let v = SignatureVerifier::new(&sign(b"x"), &[]);
        assert!(verify(Box::new(v), &[b"x"]).is_success());
        let v = SignatureVerifier::new(&sign(b"x"), &[]);
        assert!(!verify(Box::new(v), &[b"x"]).is_ok());
    }

    #[test]
    fn malformed_signature_is_an_error() {
        let v = SignatureVerifier::new("not base64!", &[public_key()]);
        assert!(verify(Box::new(v), &[b"x"]).is_error());
    }

    #[test]
    fn malformed_keys_are_skipped() {
        let keys = parse_trusted_keys(&["short".into(), public_key()]);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn zip_signature_split_across_writes() {
        let v = ZipStructureVerifier::new();
        assert!(verify(Box::new(v), &[b"P", b"K\x03", b"\x04data"]).is_ok());
        let v = ZipStructureVerifier::new();
        assert!(verify(Box::new(v), &[b"PK"]).is_error());
    }
}
