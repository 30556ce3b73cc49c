//! Checksum algorithms, streaming hashers and hex digests.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::Digest as _;

/// Checksum algorithms the engine can verify.
///
/// Algorithm ids are the suffixes of the `download.checksum.*` and
/// `artifact.checksum.*` descriptor properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    /// SHA-256 (`sha-256`).
    #[serde(rename = "sha-256")]
    Sha256,
    /// SHA-512 (`sha-512`).
    #[serde(rename = "sha-512")]
    Sha512,
    /// BLAKE3 (`blake3`), used for fast internal hashing.
    #[serde(rename = "blake3")]
    Blake3,
}

impl ChecksumAlgorithm {
    /// Every supported algorithm, in verification order.
    pub const ALL: [Self; 3] = [Self::Sha256, Self::Sha512, Self::Blake3];

    /// Property-suffix identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha512 => "sha-512",
            Self::Blake3 => "blake3",
        }
    }

    /// Resolve a property-suffix identifier, case-insensitively.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Some(Self::Sha256),
            "sha-512" | "sha512" => Some(Self::Sha512),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }

    /// Length of a hex digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Start an incremental hash.
    pub fn hasher(self) -> ChecksumHasher {
        match self {
            Self::Sha256 => ChecksumHasher::Sha256(sha2::Sha256::new()),
            Self::Sha512 => ChecksumHasher::Sha512(sha2::Sha512::new()),
            Self::Blake3 => ChecksumHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Hash `data` in one shot.
    pub fn compute(self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Incremental hasher for one [`ChecksumAlgorithm`].
#[derive(Debug, Clone)]
pub enum ChecksumHasher {
    /// SHA-256 state.
    Sha256(sha2::Sha256),
    /// SHA-512 state.
    Sha512(sha2::Sha512),
    /// BLAKE3 state (boxed; the state is large).
    Blake3(Box<blake3::Hasher>),
}

impl ChecksumHasher {
    /// Feed bytes.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize(self) -> Digest {
        let hex = match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        };
        Digest(hex)
    }
}

/// A lowercase hex digest.
///
/// Validated on deserialization so malformed hex never propagates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Validate a hex digest string, accepting an optional `<algorithm>:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error string if the hex portion is empty or contains
    /// non-hex characters.
    pub fn parse(s: &str) -> Result<Self, String> {
        let hex = s.rsplit_once(':').map_or(s, |(_, h)| h);
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid digest: expected hex characters, got '{s}'"));
        }
        Ok(Self(hex.to_lowercase()))
    }

    /// Return the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An expected checksum declared on a descriptor.
///
/// The algorithm id is kept verbatim so unknown algorithms can be reported
/// instead of silently ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm_id: String,
    expected: String,
}

impl Checksum {
    /// Create an expectation from a property suffix and value.
    pub fn new(algorithm_id: &str, expected: &str) -> Self {
        Self {
            algorithm_id: algorithm_id.to_ascii_lowercase(),
            expected: expected.trim().to_lowercase(),
        }
    }

    /// Algorithm id as declared.
    pub fn algorithm_id(&self) -> &str {
        &self.algorithm_id
    }

    /// Resolved algorithm, if supported.
    pub fn algorithm(&self) -> Option<ChecksumAlgorithm> {
        ChecksumAlgorithm::from_id(&self.algorithm_id)
    }

    /// Expected lowercase hex value.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Compare against a computed digest.
    pub fn matches(&self, actual: &Digest) -> bool {
        self.expected == actual.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = ChecksumAlgorithm::Sha256.compute(b"hello world");
        assert_eq!(
            digest.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        for algorithm in ChecksumAlgorithm::ALL {
            let mut hasher = algorithm.hasher();
            hasher.update(b"hello ");
            hasher.update(b"world");
            let digest = hasher.finalize();
            assert_eq!(digest, algorithm.compute(b"hello world"));
            assert_eq!(digest.as_str().len(), algorithm.hex_len());
        }
    }

    #[test]
    fn algorithm_ids_round_trip() {
        for algorithm in ChecksumAlgorithm::ALL {
            assert_eq!(ChecksumAlgorithm::from_id(algorithm.id()), Some(algorithm));
        }
        assert_eq!(ChecksumAlgorithm::from_id("SHA256"), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_id("md5"), None);
    }

    #[test]
    fn digest_rejects_non_hex() {
        assert!(Digest::parse("sha-256:ABCDEF").is_ok());
        assert!(Digest::parse("xyz").is_err());
        assert!(serde_json::from_str::<Digest>("\"nothex!\"").is_err());
    }
}
