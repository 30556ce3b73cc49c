//! Artifact identity: classifier, id and version.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing an [`ArtifactKey`] from text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// The text did not have the `classifier,id,version` shape.
    #[error("Invalid artifact key '{0}': expected 'classifier,id,version'")]
    Malformed(String),

    /// One of the components was empty.
    #[error("Invalid artifact key '{key}': empty {component}")]
    EmptyComponent {
        /// The offending key text.
        key: String,
        /// Which component was empty.
        component: &'static str,
    },
}

/// A structured artifact version.
///
/// Stored as written. Ordering follows semantic versioning when both sides
/// parse, and falls back to plain string ordering otherwise, so four-part
/// versions such as `1.0.0.v2024` still sort deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (
            semver::Version::parse(&self.0),
            semver::Version::parse(&other.0),
        ) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Version {
    /// Create a new version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self(v.trim().to_string())
    }

    /// The version used when none is declared.
    pub fn empty() -> Self {
        Self("0.0.0".to_string())
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Immutable identity of an artifact: `classifier`, `id` and `version`.
///
/// Equality, hashing and ordering are by value.
///
/// # Example
///
/// ```
/// use depot_schema::ArtifactKey;
///
/// let key: ArtifactKey = "osgi.bundle,foo,1.0.0".parse().unwrap();
/// assert_eq!(key.id(), "foo");
/// assert_eq!(key.to_string(), "osgi.bundle,foo,1.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    classifier: String,
    id: String,
    version: Version,
}

impl ArtifactKey {
    /// Create a key from its three components.
    pub fn new(classifier: impl Into<String>, id: impl Into<String>, version: Version) -> Self {
        Self {
            classifier: classifier.into(),
            id: id.into(),
            version,
        }
    }

    /// Namespace of the artifact (e.g. `osgi.bundle`, `binary`).
    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    /// Identifier within the classifier namespace.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version of the artifact.
    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.classifier, self.id, self.version)
    }
}

impl std::str::FromStr for ArtifactKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [classifier, id, version] = parts.as_slice() else {
            return Err(KeyError::Malformed(s.to_string()));
        };
        for (value, component) in [(classifier, "classifier"), (id, "id")] {
            if value.is_empty() {
                return Err(KeyError::EmptyComponent {
                    key: s.to_string(),
                    component,
                });
            }
        }
        let version = if version.is_empty() {
            Version::empty()
        } else {
            Version::new(version)
        };
        Ok(Self::new(*classifier, *id, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_key() {
        let key: ArtifactKey = "binary, tool , 2.1.0".parse().unwrap();
        assert_eq!(key.classifier(), "binary");
        assert_eq!(key.id(), "tool");
        assert_eq!(key.version(), &Version::new("2.1.0"));
    }

    #[test]
    fn empty_version_defaults() {
        let key: ArtifactKey = "binary,tool,".parse().unwrap();
        assert_eq!(key.version(), &Version::empty());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            "binary,tool".parse::<ArtifactKey>(),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            ",tool,1.0.0".parse::<ArtifactKey>(),
            Err(KeyError::EmptyComponent {
                component: "classifier",
                ..
            })
        ));
    }

    #[test]
    fn version_ordering_prefers_semver() {
        assert!(Version::new("1.10.0") > Version::new("1.9.0"));
        assert!(Version::new("1.0.0") < Version::new("1.0.0.qualifier"));
        assert!(Version::new("a") < Version::new("b"));
    }
}
