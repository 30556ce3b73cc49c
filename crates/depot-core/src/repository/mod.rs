//! The artifact repository: descriptor table, location resolution, and the
//! fetch and write paths.
//!
//! All in-memory state sits behind one mutex. Transfers run outside it, so
//! parallel downloads never wait on metadata reads. Mutations of a local
//! repository follow one shape: take the writer slot, take the file lock,
//! reload if the metadata on disk is newer, mutate a copy, persist it, and
//! only then swap the copy in. Both waits observe a cancellation token and
//! the state mutex is only held for the reload and the swap, so readers
//! never queue behind another process's lock.

mod fetch;
mod sink;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use depot_schema::{
    ArtifactDescriptor, ArtifactKey, METADATA_JAR, METADATA_XML, MappingRule, StatusCode, props,
};
use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::blob::BlobStore;
use crate::codec::{self, CodecError, RepositoryDocument};
use crate::config::EngineConfig;
use crate::error::{RepositoryError, Result};
use crate::index::DescriptorIndex;
use crate::lock::{POLL_INTERVAL, RepositoryLock};
use crate::mapper::LocationMapper;
use crate::mirror::MirrorSelector;
use crate::paths::{as_directory, local_path};
use crate::reporter::{NullReporter, Reporter};
use crate::transport::{DefaultTransport, Transport};

pub use sink::ArtifactSink;

/// Collaborators a repository is built with.
#[derive(Clone)]
pub struct RepositoryOptions {
    /// Engine switches.
    pub config: EngineConfig,
    /// Moves bytes for remote locations and mirrors.
    pub transport: Arc<dyn Transport>,
    /// Receives progress and per-artifact outcomes.
    pub reporter: Arc<dyn Reporter>,
    /// Stops mutations that are waiting for the repository lock.
    pub cancel: CancellationToken,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        EngineConfig::default().into()
    }
}

impl From<EngineConfig> for RepositoryOptions {
    fn from(config: EngineConfig) -> Self {
        Self {
            config,
            transport: Arc::new(DefaultTransport::default()),
            reporter: Arc::new(NullReporter),
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for RepositoryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryOptions")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl RepositoryOptions {
    /// Replace the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the token that cancels lock waits.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Mutable state guarded by the repository mutex.
#[derive(Clone)]
struct State {
    /// Everything persisted except the descriptors, which live in `index`.
    meta: RepositoryDocument,
    index: DescriptorIndex,
    mapper: Option<Arc<LocationMapper>>,
    mirrors: Option<Arc<MirrorSelector>>,
    /// Modification time of the metadata file this state was loaded from.
    stamp: Option<SystemTime>,
}

impl State {
    fn new(mut meta: RepositoryDocument, stamp: Option<SystemTime>) -> Self {
        let index = DescriptorIndex::from_descriptors(std::mem::take(&mut meta.descriptors));
        Self {
            meta,
            index,
            mapper: None,
            mirrors: None,
            stamp,
        }
    }

    fn document(&self) -> RepositoryDocument {
        let mut doc = self.meta.clone();
        doc.descriptors = self.index.all().to_vec();
        doc
    }
}

struct Inner {
    location: Url,
    root: Option<PathBuf>,
    options: RepositoryOptions,
    lock: RepositoryLock,
    /// Serializes writers of this instance ahead of the file lock.
    writer: Mutex<()>,
    blobs: Option<BlobStore>,
    state: Mutex<State>,
}

/// A simple artifact repository at a local or remote location.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct ArtifactRepository {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ArtifactRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRepository")
            .field("location", &self.inner.location.as_str())
            .finish_non_exhaustive()
    }
}

impl ArtifactRepository {
    /// Create an empty repository at the `file:` location `location`, with
    /// the default mapping rules, and persist it.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::ReadOnly`] for non-file locations,
    /// [`RepositoryError::RepositoryExists`] if metadata is already there, or
    /// a lock or persistence failure.
    pub fn create(
        location: &Url,
        name: &str,
        options: impl Into<RepositoryOptions>,
    ) -> Result<Self> {
        let root = local_path(location).ok_or_else(|| RepositoryError::ReadOnly(location.to_string()))?;
        if let Some(existing) = codec::existing_metadata(&root) {
            return Err(RepositoryError::RepositoryExists(existing.display().to_string()));
        }
        std::fs::create_dir_all(&root)?;

        let repo = Self::from_document(location, RepositoryDocument::new(name), None, options.into());
        repo.write_locked(&repo.inner.options.cancel, |repo| {
            let mut state = repo.state().clone();
            repo.persist(&mut state)?;
            *repo.state() = state;
            Ok(())
        })?;
        tracing::info!(location = %location, name, "Created repository");
        repo.inner
            .options
            .reporter
            .info(&format!("Created repository {name} at {location}"));
        Ok(repo)
    }

    /// Open the repository at `location`.
    ///
    /// Local repositories are read from disk and writable. Remote ones are
    /// fetched through the transport, compressed form first, and read-only.
    ///
    /// # Errors
    ///
    /// A persistence error if no metadata is found or it does not parse, or
    /// a transport error for remote locations.
    pub async fn open(location: &Url, options: impl Into<RepositoryOptions>) -> Result<Self> {
        let options = options.into();
        let (doc, stamp) = match local_path(location) {
            Some(root) => load_local(&root)?,
            None => (load_remote(location, &*options.transport).await?, None),
        };
        tracing::debug!(
            location = %location,
            artifacts = doc.descriptors.len(),
            "Opened repository"
        );
        report_dropped(&*options.reporter, location, &doc);
        Ok(Self::from_document(location, doc, stamp, options))
    }

    fn from_document(
        location: &Url,
        doc: RepositoryDocument,
        stamp: Option<SystemTime>,
        options: RepositoryOptions,
    ) -> Self {
        let location = as_directory(location);
        let root = local_path(&location);
        let lock = match &root {
            Some(dir) if options.config.locking_enabled => RepositoryLock::new(dir),
            _ => RepositoryLock::disabled(),
        };
        Self {
            inner: Arc::new(Inner {
                blobs: BlobStore::new(&location),
                location,
                root,
                options,
                lock,
                writer: Mutex::new(()),
                state: Mutex::new(State::new(doc, stamp)),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Location of the repository, always ending in `/`.
    pub fn location(&self) -> &Url {
        &self.inner.location
    }

    /// `true` for `file:` repositories.
    pub fn is_local(&self) -> bool {
        self.inner.root.is_some()
    }

    /// `true` when mutations are allowed.
    pub fn is_modifiable(&self) -> bool {
        self.is_local()
    }

    /// Display name.
    pub fn name(&self) -> String {
        self.state().meta.name.clone()
    }

    /// Engine switches this repository was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.options.config
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// `true` if an equal descriptor is registered.
    pub fn contains(&self, descriptor: &ArtifactDescriptor) -> bool {
        self.state().index.contains(descriptor)
    }

    /// `true` if any descriptor of `key` is registered.
    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.state().index.contains_key(key)
    }

    /// Registered descriptors of `key`.
    pub fn descriptors_for(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.state().index.descriptors_for(key)
    }

    /// Every registered key. The iterator is a snapshot: later mutations do
    /// not affect it.
    pub fn keys(&self) -> impl Iterator<Item = ArtifactKey> + use<> {
        self.state().index.snapshot().into_keys()
    }

    /// Every registered descriptor.
    pub fn descriptors(&self) -> Arc<Vec<ArtifactDescriptor>> {
        self.state().index.all()
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.state().index.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.state().index.is_empty()
    }

    /// Descriptors matching `predicate`, evaluated outside the state lock.
    pub fn query(&self, predicate: impl Fn(&ArtifactDescriptor) -> bool) -> Vec<ArtifactDescriptor> {
        let all = self.descriptors();
        all.iter().filter(|d| predicate(d)).cloned().collect()
    }

    /// Repository properties.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.state().meta.properties.clone()
    }

    /// One repository property.
    pub fn property(&self, name: &str) -> Option<String> {
        self.state().meta.properties.get(name).cloned()
    }

    /// Mapping rules in evaluation order.
    pub fn rules(&self) -> Vec<MappingRule> {
        self.state().meta.rules.clone()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Register `descriptor`. Returns `false` if an equal one was already
    /// registered.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn add_descriptor(&self, descriptor: ArtifactDescriptor) -> Result<bool> {
        self.add_descriptor_with(descriptor, &self.inner.options.cancel)
    }

    /// As [`add_descriptor`](Self::add_descriptor), with `cancel` stopping
    /// the wait for the repository lock.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Cancelled`] if `cancel` fires while waiting, or as
    /// [`add_descriptor`](Self::add_descriptor).
    pub fn add_descriptor_with(
        &self,
        descriptor: ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.mutate_with(cancel, |state| Ok(state.index.add(descriptor)))
    }

    /// Register several descriptors in one persisted update. Returns how many
    /// were new.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn add_descriptors(
        &self,
        descriptors: impl IntoIterator<Item = ArtifactDescriptor>,
    ) -> Result<usize> {
        self.mutate(|state| Ok(descriptors.into_iter().filter(|d| state.index.add(d.clone())).count()))
    }

    /// Unregister `descriptor` and delete its stored bytes. Returns `false`
    /// if it was not registered.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn remove_descriptor(&self, descriptor: &ArtifactDescriptor) -> Result<bool> {
        self.remove_descriptors(std::slice::from_ref(descriptor))
            .map(|n| n > 0)
    }

    /// Unregister several descriptors and delete their bytes. Returns how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn remove_descriptors(&self, descriptors: &[ArtifactDescriptor]) -> Result<usize> {
        let removed = self.mutate(|state| {
            Ok(descriptors
                .iter()
                .filter_map(|d| state.index.remove(d))
                .collect::<Vec<_>>())
        })?;
        self.delete_stored(&removed);
        Ok(removed.len())
    }

    /// Unregister every descriptor of `key`.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn remove_key(&self, key: &ArtifactKey) -> Result<usize> {
        let removed = self.mutate(|state| Ok(state.index.remove_key(key)))?;
        self.delete_stored(&removed);
        Ok(removed.len())
    }

    /// Unregister everything.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn remove_all(&self) -> Result<usize> {
        let removed = self.mutate(|state| Ok(state.index.clear()))?;
        self.delete_stored(&removed);
        Ok(removed.len())
    }

    /// Set or clear (`None`) a repository property.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn set_property(&self, name: &str, value: Option<&str>) -> Result<Option<String>> {
        self.mutate(|state| {
            if name == props::MIRRORS_URL {
                state.mirrors = None;
            }
            Ok(match value {
                Some(v) => state.meta.properties.insert(name.to_string(), v.to_string()),
                None => state.meta.properties.remove(name),
            })
        })
    }

    /// Replace the mapping rules. Locations computed afterwards use the new
    /// rules.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn set_rules(&self, rules: Vec<MappingRule>) -> Result<()> {
        self.mutate(|state| {
            state.meta.rules = rules;
            state.mapper = None;
            Ok(())
        })
    }

    /// Persist the current state.
    ///
    /// # Errors
    ///
    /// Read-only repository, lock or persistence failure.
    pub fn save(&self) -> Result<()> {
        let root = self.writable_root()?;
        self.write_locked(&self.inner.options.cancel, |repo| {
            tracing::debug!(root = %root.display(), "Saving repository");
            let mut state = repo.state().clone();
            repo.persist(&mut state)?;
            repo.state().stamp = state.stamp;
            Ok(())
        })
    }

    /// Re-read the metadata, discarding unsaved in-memory state.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub async fn reload(&self) -> Result<()> {
        let (doc, stamp) = match &self.inner.root {
            Some(root) => load_local(root)?,
            None => (
                load_remote(&self.inner.location, &*self.inner.options.transport).await?,
                None,
            ),
        };
        report_dropped(&*self.inner.options.reporter, &self.inner.location, &doc);
        *self.state() = State::new(doc, stamp);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    /// Registered copy of `descriptor`, private properties included.
    fn stored(&self, descriptor: &ArtifactDescriptor) -> Option<ArtifactDescriptor> {
        self.state().index.get(descriptor).cloned()
    }

    fn writable_root(&self) -> Result<&Path> {
        self.inner
            .root
            .as_deref()
            .ok_or_else(|| RepositoryError::ReadOnly(self.inner.location.to_string()))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        self.mutate_with(&self.inner.options.cancel, f)
    }

    /// Lock, reload if stale, apply `f` to a copy, persist the copy, swap
    /// it in, unlock. A failure anywhere leaves the in-memory state as it was.
    fn mutate_with<T>(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&mut State) -> Result<T>,
    ) -> Result<T> {
        let root = self.writable_root()?;
        self.write_locked(cancel, |repo| {
            let mut next = repo.reload_if_newer(root)?;
            let out = f(&mut next)?;
            repo.persist(&mut next)?;
            *repo.state() = next;
            Ok(out)
        })
    }

    /// Run `f` holding the writer slot and the file lock, in that order.
    fn write_locked<T>(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        let _writer = loop {
            if let Some(guard) = self.inner.writer.try_lock_for(POLL_INTERVAL) {
                break guard;
            }
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled);
            }
        };
        let _guard = self.inner.lock.acquire(true, cancel)?;
        f(self)
    }

    /// Copy of the state, re-read from disk first if another writer
    /// persisted since it was loaded.
    fn reload_if_newer(&self, root: &Path) -> Result<State> {
        let on_disk = codec::existing_metadata(root).and_then(|p| modified(&p));
        let mut state = self.state();
        if on_disk.is_some() && on_disk > state.stamp {
            tracing::debug!(root = %root.display(), "Metadata changed on disk, reloading");
            let (doc, stamp) = load_local(root)?;
            report_dropped(&*self.inner.options.reporter, &self.inner.location, &doc);
            self.inner
                .options
                .reporter
                .info(&format!("Reloaded {} after a concurrent change", self.inner.location));
            *state = State::new(doc, stamp);
        }
        Ok(state.clone())
    }

    fn persist(&self, state: &mut State) -> Result<()> {
        let root = self.writable_root()?;
        let path = codec::save(root, &state.document())?;
        state.stamp = modified(&path);
        Ok(())
    }

    /// Best-effort removal of the bytes behind removed descriptors.
    /// Referenced bytes belong to someone else and are left alone.
    fn delete_stored(&self, removed: &[ArtifactDescriptor]) {
        for descriptor in removed {
            if descriptor.reference().is_some() {
                continue;
            }
            let Some(path) = self.artifact_location(descriptor).as_ref().and_then(local_path) else {
                continue;
            };
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => tracing::debug!(path = %path.display(), "Deleted artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete artifact"),
            }
        }
    }

    fn mapper(&self) -> Arc<LocationMapper> {
        let mut state = self.state();
        if let Some(mapper) = &state.mapper {
            return Arc::clone(mapper);
        }
        let mapper = Arc::new(LocationMapper::new(&state.meta.rules));
        state.mapper = Some(Arc::clone(&mapper));
        mapper
    }

    /// Mirror selector for this repository, if mirrors apply to it.
    fn mirror_selector(&self) -> Option<Arc<MirrorSelector>> {
        let config = &self.inner.options.config;
        if !config.mirrors_enabled || (self.is_local() && !config.force_threading) {
            return None;
        }
        let mut state = self.state();
        let list_url = state
            .meta
            .properties
            .get(props::MIRRORS_URL)
            .and_then(|u| Url::parse(u).ok())?;
        Some(Arc::clone(state.mirrors.get_or_insert_with(|| {
            Arc::new(
                MirrorSelector::new(&self.inner.location, Some(list_url))
                    .with_reporter(Arc::clone(&self.inner.options.reporter)),
            )
        })))
    }

    fn max_threads_property(&self) -> Option<usize> {
        self.property(props::MAX_THREADS)
            .and_then(|v| v.trim().parse().ok())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Tell the user about artifacts skipped while reading `doc`.
fn report_dropped(reporter: &dyn Reporter, location: &Url, doc: &RepositoryDocument) {
    if doc.dropped.is_empty() {
        return;
    }
    let keys = doc
        .dropped
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    reporter.warning(&format!(
        "Ignored {} artifacts in an obsolete format in {location}: {keys}",
        doc.dropped.len()
    ));
}

fn load_local(root: &Path) -> Result<(RepositoryDocument, Option<SystemTime>)> {
    let doc = codec::load(root)?;
    let stamp = codec::existing_metadata(root).and_then(|p| modified(&p));
    Ok((doc, stamp))
}

/// Fetch remote metadata, compressed form first.
async fn load_remote(location: &Url, transport: &dyn Transport) -> Result<RepositoryDocument> {
    let cancel = CancellationToken::new();
    let jar_url = join(location, METADATA_JAR)?;
    match transport.fetch(&jar_url, &cancel).await {
        Ok(bytes) => return Ok(codec::read_jar(Cursor::new(bytes))?),
        Err(status) if status.code() != StatusCode::ArtifactNotFound => {
            tracing::warn!(url = %jar_url, status = %status, "Compressed metadata unavailable");
        }
        Err(_) => {}
    }

    let xml_url = join(location, METADATA_XML)?;
    match transport.fetch(&xml_url, &cancel).await {
        Ok(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|e| CodecError::Malformed(format!("metadata is not UTF-8: {e}")))?;
            Ok(codec::read_xml(&text)?)
        }
        Err(status) if status.code() == StatusCode::ArtifactNotFound => {
            Err(CodecError::NotFound(location.to_string()).into())
        }
        Err(status) => Err(RepositoryError::Transport {
            url: xml_url.to_string(),
            message: status.to_string(),
        }),
    }
}

fn join(location: &Url, name: &str) -> Result<Url> {
    as_directory(location)
        .join(name)
        .map_err(|_| RepositoryError::InvalidLocation(location.to_string()))
}
