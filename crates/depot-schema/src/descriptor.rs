//! Artifact descriptors and their processing steps.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::hash::{Checksum, ChecksumAlgorithm};
use crate::key::ArtifactKey;
use crate::props;

/// One transform already baked into a descriptor's stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingStepDescriptor {
    /// Identifier of the processor that reverses the transform (e.g. `gzip`).
    pub processor_id: String,
    /// Opaque processor argument.
    pub data: Option<String>,
    /// Whether the artifact is unusable without this step.
    pub required: bool,
}

impl ProcessingStepDescriptor {
    /// Create a step descriptor.
    pub fn new(processor_id: impl Into<String>, data: Option<String>, required: bool) -> Self {
        Self {
            processor_id: processor_id.into(),
            data,
            required,
        }
    }
}

/// One physical representation of an [`ArtifactKey`].
///
/// Identity is the key, the processing steps and the
/// [`props::ARTIFACT_REFERENCE`] repository property. Public properties and the
/// remaining repository-private properties are payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    key: ArtifactKey,
    #[serde(default)]
    processing_steps: Vec<ProcessingStepDescriptor>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    repository_properties: BTreeMap<String, String>,
}

impl ArtifactDescriptor {
    /// A canonical descriptor for `key` with no properties.
    pub fn new(key: ArtifactKey) -> Self {
        Self {
            key,
            processing_steps: Vec::new(),
            properties: BTreeMap::new(),
            repository_properties: BTreeMap::new(),
        }
    }

    /// The artifact this descriptor represents.
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Transforms applied to the stored bytes, in application order.
    pub fn processing_steps(&self) -> &[ProcessingStepDescriptor] {
        &self.processing_steps
    }

    /// Replace the processing steps.
    pub fn set_processing_steps(&mut self, steps: Vec<ProcessingStepDescriptor>) {
        self.processing_steps = steps;
    }

    /// Builder form of [`set_processing_steps`](Self::set_processing_steps).
    pub fn with_processing_steps(mut self, steps: Vec<ProcessingStepDescriptor>) -> Self {
        self.processing_steps = steps;
        self
    }

    /// `true` when the stored bytes are the artifact itself.
    pub fn is_canonical(&self) -> bool {
        self.processing_steps.is_empty()
    }

    /// Public properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Look up a public property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Set a public property.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Builder form of [`set_property`](Self::set_property).
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Remove a public property.
    pub fn remove_property(&mut self, name: &str) -> Option<String> {
        self.properties.remove(name)
    }

    /// Repository-private properties.
    pub fn repository_properties(&self) -> &BTreeMap<String, String> {
        &self.repository_properties
    }

    /// Look up a repository-private property.
    pub fn repository_property(&self, name: &str) -> Option<&str> {
        self.repository_properties.get(name).map(String::as_str)
    }

    /// Set a repository-private property.
    pub fn set_repository_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.repository_properties.insert(name.into(), value.into());
    }

    /// Builder form of [`set_repository_property`](Self::set_repository_property).
    pub fn with_repository_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.set_repository_property(name, value);
        self
    }

    /// Storage format, if declared.
    pub fn format(&self) -> Option<&str> {
        self.property(props::FORMAT)
    }

    /// Explicit location of the bytes, if this descriptor is a reference.
    pub fn reference(&self) -> Option<&str> {
        self.repository_property(props::ARTIFACT_REFERENCE)
    }

    /// `true` when the artifact is a directory tree.
    pub fn is_folder(&self) -> bool {
        self.repository_property(props::ARTIFACT_FOLDER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Blob id stamped by the repository, if any.
    pub fn blob_id(&self) -> Option<&str> {
        self.repository_property(props::ARTIFACT_UUID)
    }

    /// Declared size of the stored bytes.
    pub fn download_size(&self) -> Option<u64> {
        self.property(props::DOWNLOAD_SIZE)
            .and_then(|v| v.parse().ok())
    }

    /// Checksums of the stored bytes, keyed by algorithm id.
    pub fn download_checksums(&self) -> Vec<Checksum> {
        self.checksums_with_prefix(props::DOWNLOAD_CHECKSUM_PREFIX)
    }

    /// Checksums of the canonical bytes, keyed by algorithm id.
    pub fn artifact_checksums(&self) -> Vec<Checksum> {
        self.checksums_with_prefix(props::ARTIFACT_CHECKSUM_PREFIX)
    }

    /// Record a checksum of the stored bytes.
    pub fn set_download_checksum(&mut self, algorithm: ChecksumAlgorithm, value: &str) {
        self.set_property(
            format!("{}{}", props::DOWNLOAD_CHECKSUM_PREFIX, algorithm.id()),
            value.to_lowercase(),
        );
    }

    /// Record a checksum of the canonical bytes.
    pub fn set_artifact_checksum(&mut self, algorithm: ChecksumAlgorithm, value: &str) {
        self.set_property(
            format!("{}{}", props::ARTIFACT_CHECKSUM_PREFIX, algorithm.id()),
            value.to_lowercase(),
        );
    }

    fn checksums_with_prefix(&self, prefix: &str) -> Vec<Checksum> {
        self.properties
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(prefix)
                    .map(|algorithm| Checksum::new(algorithm, value))
            })
            .collect()
    }
}

impl PartialEq for ArtifactDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.processing_steps == other.processing_steps
            && self.reference() == other.reference()
    }
}

impl Eq for ArtifactDescriptor {}

impl Hash for ArtifactDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.processing_steps.hash(state);
        self.reference().hash(state);
    }
}

impl std::fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)?;
        if let Some(format) = self.format() {
            write!(f, " [{format}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Version;
    use std::collections::HashSet;

    fn key() -> ArtifactKey {
        ArtifactKey::new("osgi.bundle", "foo", Version::new("1.0.0"))
    }

    #[test]
    fn private_properties_do_not_affect_identity() {
        let a = ArtifactDescriptor::new(key()).with_repository_property(props::ARTIFACT_UUID, "x");
        let b = ArtifactDescriptor::new(key())
            .with_repository_property(props::ARTIFACT_UUID, "y")
            .with_property(props::DOWNLOAD_SIZE, "12");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn reference_and_steps_are_identity() {
        let plain = ArtifactDescriptor::new(key());
        let referenced = ArtifactDescriptor::new(key())
            .with_repository_property(props::ARTIFACT_REFERENCE, "file:/tmp/foo.jar");
        let processed = ArtifactDescriptor::new(key())
            .with_processing_steps(vec![ProcessingStepDescriptor::new("gzip", None, true)]);

        assert_ne!(plain, referenced);
        assert_ne!(plain, processed);
        assert!(plain.is_canonical());
        assert!(!processed.is_canonical());
    }

    #[test]
    fn checksum_properties_are_grouped_by_scope() {
        let mut d = ArtifactDescriptor::new(key());
        d.set_download_checksum(ChecksumAlgorithm::Sha256, "AB");
        d.set_artifact_checksum(ChecksumAlgorithm::Blake3, "cd");

        let download = d.download_checksums();
        assert_eq!(download.len(), 1);
        assert_eq!(download[0].algorithm_id(), "sha-256");
        assert_eq!(download[0].expected(), "ab");
        assert_eq!(d.artifact_checksums()[0].algorithm_id(), "blake3");
    }
}
