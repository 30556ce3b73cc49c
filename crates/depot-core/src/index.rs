//! In-memory table of contents: artifact key to descriptors.
//!
//! Backed by persistent maps, so [`DescriptorIndex::snapshot`] is O(1) and a
//! snapshot keeps observing the state it was taken from no matter what is
//! mutated afterwards. The key map is the only store of descriptors; the flat
//! descriptor list used for queries is derived lazily and dropped on every
//! mutation.

use std::sync::{Arc, OnceLock};

use depot_schema::{ArtifactDescriptor, ArtifactKey};
use im::{OrdMap, Vector};

type Map = OrdMap<ArtifactKey, Vector<ArtifactDescriptor>>;

/// Mutable descriptor index.
#[derive(Debug, Clone, Default)]
pub struct DescriptorIndex {
    map: Map,
    len: usize,
    flat: OnceLock<Arc<Vec<ArtifactDescriptor>>>,
}

impl DescriptorIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from descriptors, ignoring duplicates.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ArtifactDescriptor>) -> Self {
        let mut index = Self::new();
        for d in descriptors {
            index.add(d);
        }
        index
    }

    /// Insert `descriptor`. Returns `false` if an equal descriptor is already present.
    pub fn add(&mut self, descriptor: ArtifactDescriptor) -> bool {
        let list = self.map.entry(descriptor.key().clone()).or_default();
        if list.iter().any(|d| d == &descriptor) {
            return false;
        }
        list.push_back(descriptor);
        self.len += 1;
        self.invalidate();
        true
    }

    /// Remove the descriptor equal to `descriptor`, returning the stored copy.
    pub fn remove(&mut self, descriptor: &ArtifactDescriptor) -> Option<ArtifactDescriptor> {
        let list = self.map.get_mut(descriptor.key())?;
        let pos = list.iter().position(|d| d == descriptor)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.map.remove(descriptor.key());
        }
        self.len -= 1;
        self.invalidate();
        Some(removed)
    }

    /// Remove every descriptor of `key`.
    pub fn remove_key(&mut self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        let removed: Vec<_> = self
            .map
            .remove(key)
            .map(|list| list.into_iter().collect())
            .unwrap_or_default();
        if !removed.is_empty() {
            self.len -= removed.len();
            self.invalidate();
        }
        removed
    }

    /// Remove everything, returning what was stored.
    pub fn clear(&mut self) -> Vec<ArtifactDescriptor> {
        let all = self.snapshot().descriptors().cloned().collect();
        self.map = Map::new();
        self.len = 0;
        self.invalidate();
        all
    }

    /// Stored copy of the descriptor equal to `descriptor`.
    pub fn get(&self, descriptor: &ArtifactDescriptor) -> Option<&ArtifactDescriptor> {
        self.map
            .get(descriptor.key())?
            .iter()
            .find(|d| *d == descriptor)
    }

    /// `true` if an equal descriptor is stored.
    pub fn contains(&self, descriptor: &ArtifactDescriptor) -> bool {
        self.get(descriptor).is_some()
    }

    /// `true` if any descriptor of `key` is stored.
    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.map.contains_key(key)
    }

    /// Descriptors of `key` in insertion order.
    pub fn descriptors_for(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.map
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when no descriptor is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frozen view of the current state.
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            map: self.map.clone(),
        }
    }

    /// All descriptors as a flat list, built on first use after a mutation.
    pub fn all(&self) -> Arc<Vec<ArtifactDescriptor>> {
        Arc::clone(
            self.flat
                .get_or_init(|| Arc::new(self.snapshot().descriptors().cloned().collect())),
        )
    }

    fn invalidate(&mut self) {
        self.flat = OnceLock::new();
    }
}

/// Immutable view of a [`DescriptorIndex`] at one point in time.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    map: Map,
}

impl IndexSnapshot {
    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.map.keys()
    }

    /// Owning iterator over keys, safe to hold across later mutations.
    pub fn into_keys(self) -> impl Iterator<Item = ArtifactKey> {
        self.map.into_iter().map(|(k, _)| k)
    }

    /// Every descriptor, grouped by key.
    pub fn descriptors(&self) -> impl Iterator<Item = &ArtifactDescriptor> {
        self.map.values().flat_map(|list| list.iter())
    }

    /// Number of keys.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_schema::{ProcessingStepDescriptor, Version, props};

    fn key(id: &str) -> ArtifactKey {
        ArtifactKey::new("osgi.bundle", id, Version::new("1.0.0"))
    }

    #[test]
    fn add_is_idempotent_per_identity() {
        let mut index = DescriptorIndex::new();
        assert!(index.add(ArtifactDescriptor::new(key("a"))));
        assert!(!index.add(
            ArtifactDescriptor::new(key("a")).with_repository_property(props::ARTIFACT_UUID, "x")
        ));
        assert!(index.add(
            ArtifactDescriptor::new(key("a"))
                .with_processing_steps(vec![ProcessingStepDescriptor::new("gzip", None, true)])
        ));
        assert_eq!(index.len(), 2);
        assert_eq!(index.descriptors_for(&key("a")).len(), 2);
    }

    #[test]
    fn removing_last_descriptor_drops_key() {
        let mut index = DescriptorIndex::new();
        let d = ArtifactDescriptor::new(key("a"));
        index.add(d.clone());
        assert!(index.contains_key(&key("a")));
        assert!(index.remove(&d).is_some());
        assert!(!index.contains_key(&key("a")));
        assert!(index.is_empty());
        assert!(index.remove(&d).is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let mut index = DescriptorIndex::new();
        index.add(ArtifactDescriptor::new(key("a")));
        index.add(ArtifactDescriptor::new(key("b")));

        let mut keys = index.snapshot().into_keys();
        assert_eq!(keys.next(), Some(key("a")));

        index.remove_key(&key("b"));
        index.add(ArtifactDescriptor::new(key("c")));

        let rest: Vec<_> = keys.collect();
        assert_eq!(rest, vec![key("b")]);
        assert_eq!(index.snapshot().key_count(), 2);
    }

    #[test]
    fn flat_cache_is_rebuilt_after_mutation() {
        let mut index = DescriptorIndex::new();
        index.add(ArtifactDescriptor::new(key("a")));
        let before = index.all();
        assert_eq!(before.len(), 1);

        index.add(ArtifactDescriptor::new(key("b")));
        assert_eq!(before.len(), 1);
        assert_eq!(index.all().len(), 2);

        assert_eq!(index.clear().len(), 2);
        assert!(index.all().is_empty());
    }
}
