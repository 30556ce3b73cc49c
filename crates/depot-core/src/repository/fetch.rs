//! Location resolution and the read side: single fetches with mirror retry,
//! folder artifacts, and batches.

use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use depot_schema::{ArtifactDescriptor, Severity, Status, StatusCode, artifact_error, props};
use tempfile::SpooledTempFile;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::ArtifactRepository;
use crate::blob::BlobStore;
use crate::error::RepositoryError;
use crate::folder;
use crate::mirror::MirrorSelector;
use crate::paths::local_path;
use crate::scheduler::{
    ArtifactRequest, BatchOutcome, Destination, DownloadScheduler, RequestExecutor,
};
use crate::verify::{Direction, Pipeline, stage_plan};

/// Mirror attempts are spooled in memory up to this size.
const SPOOL_LIMIT: usize = 8 * 1024 * 1024;

impl ArtifactRepository {
    /// Where the bytes of `descriptor` live.
    ///
    /// An explicit reference wins, then a blob id, then the mapping rules
    /// (canonical descriptors only). `None` when nothing applies.
    pub fn artifact_location(&self, descriptor: &ArtifactDescriptor) -> Option<Url> {
        if let Some(reference) = descriptor.reference() {
            return Url::parse(reference)
                .or_else(|_| self.inner.location.join(reference))
                .ok();
        }
        if let Some(id) = descriptor.blob_id() {
            return self.inner.blobs.as_ref()?.path_for_text(id);
        }
        if !descriptor.is_canonical() {
            return None;
        }
        self.mapper().map(self.inner.location.as_str(), descriptor)
    }

    /// Copy of `descriptor` ready to be written here: descriptors that have
    /// neither a reference nor a rule-derived location get a fresh blob id.
    pub fn stamp_descriptor(&self, descriptor: &ArtifactDescriptor) -> ArtifactDescriptor {
        let mut stamped = descriptor.clone();
        if stamped.reference().is_some() || stamped.blob_id().is_some() {
            return stamped;
        }
        let mapped = stamped.is_canonical()
            && self
                .mapper()
                .map(self.inner.location.as_str(), &stamped)
                .is_some();
        if !mapped {
            stamped.set_repository_property(props::ARTIFACT_UUID, BlobStore::new_id().to_string());
        }
        stamped
    }

    /// Stream the canonical bytes of `descriptor` into `sink`: download
    /// checks, processing steps reversed, then artifact checks.
    pub async fn get_artifact(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut (dyn Write + Send),
        cancel: &CancellationToken,
    ) -> Status {
        self.get(descriptor, sink, Direction::Canonical, cancel).await
    }

    /// Stream the stored bytes of `descriptor` into `sink`, checked against
    /// the download checksums only.
    pub async fn get_raw_artifact(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut (dyn Write + Send),
        cancel: &CancellationToken,
    ) -> Status {
        self.get(descriptor, sink, Direction::Raw, cancel).await
    }

    /// Fetch a batch with the scheduler's worker budget.
    pub async fn get_artifacts(
        &self,
        requests: Vec<ArtifactRequest>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let started = Instant::now();
        let outcome = self
            .scheduler()
            .run(Arc::new(self.clone()), requests, cancel)
            .await;
        self.inner.options.reporter.summary(
            outcome.requests.len(),
            "fetched",
            started.elapsed().as_secs_f64(),
        );
        outcome
    }

    /// Worker budget for batches against this repository.
    pub fn scheduler(&self) -> DownloadScheduler {
        let config = &self.inner.options.config;
        DownloadScheduler::new(
            config.max_download_threads,
            self.max_threads_property(),
            config.force_threading,
            self.is_local(),
        )
    }

    async fn get(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut (dyn Write + Send),
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Status {
        // Callers may hold a descriptor without our private properties.
        let Some(stored) = self.stored(descriptor) else {
            return Status::error(
                StatusCode::ArtifactNotFound,
                format!("Artifact not found: {descriptor}"),
            );
        };
        let Some(location) = self.artifact_location(&stored) else {
            return Status::error(
                StatusCode::NoLocation,
                format!("No location for {stored}"),
            );
        };
        if stored.is_folder() {
            return fetch_folder(&location, sink, cancel);
        }

        let Some(mirrors) = self.mirror_selector() else {
            return self
                .attempt(&stored, &location, sink, direction, None, cancel)
                .await;
        };

        // Each mirror attempt lands in a spool so a failed one leaves nothing
        // in the caller's sink.
        let country = self.inner.options.config.country_code.as_deref();
        let attempts = mirrors
            .mirrors(&*self.inner.options.transport, country, cancel)
            .await
            .len()
            + 1;
        let mut last = Status::ok();
        for attempt in 1..=attempts {
            let mut spool = SpooledTempFile::new(SPOOL_LIMIT);
            let status = self
                .attempt(&stored, &location, &mut spool, direction, Some(&*mirrors), cancel)
                .await;
            if status.is_retry() {
                tracing::debug!(key = %stored.key(), attempt, "Retrying on another mirror");
                last = status;
                continue;
            }
            if status.is_success() {
                let copied = spool
                    .seek(SeekFrom::Start(0))
                    .and_then(|_| io::copy(&mut spool, &mut *sink));
                if let Err(e) = copied {
                    return Status::error(StatusCode::Io, format!("Failed to write {stored}: {e}"));
                }
            }
            return status;
        }
        last
    }

    /// One pass through select-mirror, transport, verify and reconcile.
    async fn attempt(
        &self,
        descriptor: &ArtifactDescriptor,
        location: &Url,
        sink: &mut (dyn Write + Send),
        direction: Direction,
        mirrors: Option<&MirrorSelector>,
        cancel: &CancellationToken,
    ) -> Status {
        if cancel.is_cancelled() {
            return Status::cancel();
        }
        let transport = &*self.inner.options.transport;
        let source = match mirrors {
            Some(m) => {
                let country = self.inner.options.config.country_code.as_deref();
                m.mirror_location(location, transport, country, cancel).await
            }
            None => location.clone(),
        };
        tracing::debug!(key = %descriptor.key(), source = %source, "Fetching artifact");

        let plan = stage_plan(descriptor, direction, &self.inner.options.config);
        let mut pipeline = Pipeline::build(plan, sink);
        let key = descriptor.key();
        let reporter = &self.inner.options.reporter;
        let progress = |current, total| reporter.downloading(key, current, total);
        let transported = transport
            .download(&source, &mut pipeline, &progress, cancel)
            .await;

        if transported.is_cancel() {
            return transported;
        }
        // Only a location that was actually redirected has somewhere else to go.
        let mirrored = mirrors.filter(|_| source != *location);
        if let Some(m) = mirrored {
            if transported.is_error() {
                m.report_result(&source, &transported);
                if m.has_alternative(&source) {
                    return retry(descriptor, transported);
                }
            }
        }

        let staged = match pipeline.close() {
            Ok(outcome) => outcome.status,
            Err(e) => {
                return Status::error(StatusCode::Io, format!("Failed to write {descriptor}: {e}"));
            }
        };
        let transport_ok = transported.is_success();
        let result = reconcile(transported, staged);

        // Bad content stays bad on every mirror; anything else may not.
        if transport_ok && result.is_error() && !artifact_error(&result) {
            if let Some(m) = mirrored.filter(|m| m.has_alternative(&source)) {
                m.report_result(&source, &result);
                return retry(descriptor, result);
            }
        }
        result
    }

    async fn execute_request(&self, request: &ArtifactRequest, cancel: &CancellationToken) -> Status {
        match &request.destination {
            Destination::File(path) => self.fetch_to_file(request, path, cancel).await,
            Destination::Repository(target) => self.copy_to(request, target, cancel).await,
        }
    }

    async fn fetch_to_file(
        &self,
        request: &ArtifactRequest,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Status {
        let parent = path.parent().unwrap_or(Path::new("."));
        let mut tmp = match std::fs::create_dir_all(parent)
            .and_then(|()| tempfile::NamedTempFile::new_in(parent))
        {
            Ok(tmp) => tmp,
            Err(e) => {
                return Status::error(
                    StatusCode::Io,
                    format!("Failed to prepare {}: {e}", path.display()),
                );
            }
        };
        let direction = if request.raw { Direction::Raw } else { Direction::Canonical };
        let status = self
            .get(&request.descriptor, tmp.as_file_mut(), direction, cancel)
            .await;
        if status.is_success() {
            if let Err(e) = tmp.persist(path) {
                return Status::error(
                    StatusCode::Io,
                    format!("Failed to write {}: {}", path.display(), e.error),
                );
            }
        }
        status
    }

    /// Copy into another repository, which registers the descriptor only if
    /// the bytes arrive intact.
    async fn copy_to(
        &self,
        request: &ArtifactRequest,
        target: &ArtifactRepository,
        cancel: &CancellationToken,
    ) -> Status {
        let Some(stored) = self.stored(&request.descriptor) else {
            return Status::error(
                StatusCode::ArtifactNotFound,
                format!("Artifact not found: {}", request.descriptor),
            );
        };
        let outgoing = if request.raw {
            transferable(&stored)
        } else {
            canonical_copy(&stored)
        };
        let mut sink = match target.output_stream(&outgoing) {
            Ok(sink) => sink,
            Err(RepositoryError::ArtifactExists(what)) => {
                return Status::info(StatusCode::Ok, format!("Already present: {what}"));
            }
            Err(e) => return Status::error(StatusCode::Io, e.to_string()),
        };
        let direction = if request.raw { Direction::Raw } else { Direction::Canonical };
        let status = self.get(&stored, &mut sink, direction, cancel).await;
        sink.set_status(status.clone());
        // Closing may wait on the target's file lock.
        let cancel = cancel.clone();
        match tokio::task::spawn_blocking(move || sink.close_cancellable(&cancel)).await {
            Ok(Ok(_)) => status,
            Ok(Err(RepositoryError::Cancelled)) => status.with_child(Status::cancel()),
            Ok(Err(e)) => status.with_child(Status::error(StatusCode::Io, e.to_string())),
            Err(e) => status.with_child(Status::error(StatusCode::Io, e.to_string())),
        }
    }
}

#[async_trait]
impl RequestExecutor for ArtifactRepository {
    async fn execute(&self, request: &ArtifactRequest, cancel: &CancellationToken) -> Status {
        let status = self.execute_request(request, cancel).await;
        let reporter = &self.inner.options.reporter;
        let key = request.descriptor.key();
        if status.is_success() {
            reporter.done(key, "fetched", request.descriptor.download_size());
        } else if !status.is_cancel() {
            reporter.failed(key, status.message());
        }
        status
    }
}

fn retry(descriptor: &ArtifactDescriptor, cause: Status) -> Status {
    Status::error(
        StatusCode::Retry,
        format!("Retrying {} from another mirror", descriptor.key()),
    )
    .with_child(cause)
}

/// Merge transport and stage outcomes without reporting one failure twice.
fn reconcile(transported: Status, staged: Status) -> Status {
    let plain = |s: &Status| s.is_ok() && s.code() == StatusCode::Ok && s.children().is_empty();
    if plain(&staged) || transported.contains(&staged) {
        return transported;
    }
    if plain(&transported) || staged.contains(&transported) {
        return staged;
    }
    Status::multi(StatusCode::Ok, "Problems fetching artifact")
        .with_child(transported)
        .with_child(staged)
}

/// Zip a local folder artifact and stream it. Mirrors and verification do
/// not apply to the outer container.
fn fetch_folder(location: &Url, sink: &mut (dyn Write + Send), cancel: &CancellationToken) -> Status {
    if cancel.is_cancelled() {
        return Status::cancel();
    }
    let Some(dir) = local_path(location) else {
        return Status::error(
            StatusCode::Transport,
            format!("Folder artifacts must be local: {location}"),
        );
    };
    if !dir.is_dir() {
        return Status::error(
            StatusCode::ArtifactNotFound,
            format!("Artifact not found: {}", dir.display()),
        );
    }

    let started = Instant::now();
    let result = tempfile::tempfile().and_then(|mut tmp| {
        folder::zip_folder(&dir, &mut tmp)?;
        tmp.seek(SeekFrom::Start(0))?;
        io::copy(&mut tmp, sink)
    });
    match result {
        Ok(bytes) => {
            let elapsed = started.elapsed();
            let rate = bytes as f64 / elapsed.as_secs_f64().max(1e-3);
            Status::new(
                Severity::Ok,
                StatusCode::DownloadSize,
                format!("{bytes} bytes in {:.2}s ({rate:.0} B/s)", elapsed.as_secs_f64()),
            )
        }
        Err(e) => Status::error(
            StatusCode::Io,
            format!("Failed to archive {}: {e}", dir.display()),
        ),
    }
}

/// Stored form, minus the properties that tie it to this repository.
fn transferable(stored: &ArtifactDescriptor) -> ArtifactDescriptor {
    let mut out = ArtifactDescriptor::new(stored.key().clone())
        .with_processing_steps(stored.processing_steps().to_vec());
    for (name, value) in stored.properties() {
        out.set_property(name, value);
    }
    if stored.is_folder() {
        out.set_repository_property(props::ARTIFACT_FOLDER, "true");
    }
    out
}

/// Canonical form: no processing steps, and the stored-byte properties
/// replaced by their artifact-level counterparts.
fn canonical_copy(stored: &ArtifactDescriptor) -> ArtifactDescriptor {
    let mut out = transferable(stored).with_processing_steps(Vec::new());
    let download: Vec<String> = out
        .properties()
        .keys()
        .filter(|k| k.starts_with("download."))
        .cloned()
        .collect();
    for name in download {
        out.remove_property(&name);
    }
    for checksum in stored.artifact_checksums() {
        out.set_property(
            format!("{}{}", props::DOWNLOAD_CHECKSUM_PREFIX, checksum.algorithm_id()),
            checksum.expected(),
        );
    }
    if let Some(size) = stored.property(props::ARTIFACT_SIZE) {
        out.set_property(props::DOWNLOAD_SIZE, size);
    }
    out
}
