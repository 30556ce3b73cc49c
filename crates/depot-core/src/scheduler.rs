//! Bounded-parallelism batch downloads.
//!
//! A batch is a shared queue of [`ArtifactRequest`]s drained by a fixed number
//! of workers. Each worker checks the cancellation token before dequeuing, so
//! an in-flight fetch always finishes on its own. Failures are aggregated
//! under a lock of their own, separate from any repository state.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use depot_schema::{ArtifactDescriptor, Status, StatusCode};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_DOWNLOAD_THREADS;
use crate::repository::ArtifactRepository;

/// Lifecycle of one request within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Queued.
    Pending,
    /// Taken by a worker.
    InFlight,
    /// Fetched and verified.
    Done,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during the fetch.
    Cancelled,
}

/// Where fetched bytes go.
#[derive(Debug, Clone)]
pub enum Destination {
    /// A file on disk, replaced on success and removed on failure.
    File(PathBuf),
    /// Another repository, which registers the descriptor once the bytes
    /// verify.
    Repository(ArtifactRepository),
}

/// One artifact to fetch.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    /// What to fetch.
    pub descriptor: ArtifactDescriptor,
    /// Where the bytes go.
    pub destination: Destination,
    /// Fetch the stored bytes instead of the canonical ones.
    pub raw: bool,
    /// Current lifecycle state.
    pub state: RequestState,
    /// Outcome once finished.
    pub status: Status,
}

impl ArtifactRequest {
    /// Canonical fetch of `descriptor` into `destination`.
    pub fn new(descriptor: ArtifactDescriptor, destination: Destination) -> Self {
        Self {
            descriptor,
            destination,
            raw: false,
            state: RequestState::Pending,
            status: Status::ok(),
        }
    }

    /// Fetch the stored bytes, processing steps left in place.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    fn finish(&mut self, status: Status) {
        self.state = if status.is_cancel() {
            RequestState::Cancelled
        } else if status.is_success() {
            RequestState::Done
        } else {
            RequestState::Failed
        };
        self.status = status;
    }
}

/// Performs a single request. Implemented by [`ArtifactRepository`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Fetch one request and report its outcome.
    async fn execute(&self, request: &ArtifactRequest, cancel: &CancellationToken) -> Status;
}

/// Result of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// OK, or a multi-status holding every non-OK request outcome.
    pub status: Status,
    /// Requests in submission order with their final state.
    pub requests: Vec<ArtifactRequest>,
    /// Worker tasks spawned. Zero when the batch ran inline.
    pub workers: usize,
    /// The batch ran on the caller's task.
    pub synchronous: bool,
}

/// Decides how many workers a batch gets and runs it.
#[derive(Debug, Clone, Copy)]
pub struct DownloadScheduler {
    max_threads: usize,
    force_threading: bool,
    local: bool,
}

impl DownloadScheduler {
    /// Scheduler capped by the smallest of the configured limit, the
    /// repository's declared limit (if any) and the built-in default.
    pub fn new(
        configured: usize,
        repository: Option<usize>,
        force_threading: bool,
        local: bool,
    ) -> Self {
        let max_threads = configured
            .min(repository.unwrap_or(usize::MAX))
            .min(DEFAULT_MAX_DOWNLOAD_THREADS)
            .max(1);
        Self {
            max_threads,
            force_threading,
            local,
        }
    }

    /// Effective per-batch worker cap.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Workers a batch of `requests` would get.
    pub fn worker_count(&self, requests: usize) -> usize {
        requests.min(self.max_threads)
    }

    /// Local repositories skip worker start-up unless threading is forced.
    pub fn runs_synchronously(&self, requests: usize) -> bool {
        self.worker_count(requests) <= 1 || (self.local && !self.force_threading)
    }

    /// Run every request, blocking until all finish or `cancel` fires.
    pub async fn run<E>(
        &self,
        executor: Arc<E>,
        requests: Vec<ArtifactRequest>,
        cancel: &CancellationToken,
    ) -> BatchOutcome
    where
        E: RequestExecutor + 'static,
    {
        let total = requests.len();
        let queue = Arc::new(Mutex::new(
            requests.into_iter().enumerate().collect::<VecDeque<_>>(),
        ));
        let finished = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let aggregate = Arc::new(Mutex::new(Status::multi(
            StatusCode::Ok,
            "Problems downloading artifacts",
        )));

        let synchronous = self.runs_synchronously(total);
        let workers = if synchronous {
            tracing::debug!(requests = total, "Running batch inline");
            drain(&*executor, &queue, &finished, &aggregate, cancel).await;
            0
        } else {
            let count = self.worker_count(total);
            tracing::debug!(requests = total, workers = count, "Starting download workers");
            let handles: Vec<_> = (0..count)
                .map(|_| {
                    let executor = Arc::clone(&executor);
                    let queue = Arc::clone(&queue);
                    let finished = Arc::clone(&finished);
                    let aggregate = Arc::clone(&aggregate);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        drain(&*executor, &queue, &finished, &aggregate, &cancel).await;
                    })
                })
                .collect();
            for handle in handles {
                if let Err(e) = handle.await {
                    aggregate.lock().add(Status::error(
                        StatusCode::Io,
                        format!("Download worker failed: {e}"),
                    ));
                }
            }
            count
        };

        // Whatever is still queued was never started.
        let mut finished = std::mem::take(&mut *finished.lock());
        for (i, mut request) in queue.lock().drain(..) {
            request.finish(Status::cancel());
            finished.push((i, request));
        }
        finished.sort_by_key(|(i, _)| *i);

        let mut status = std::mem::take(&mut *aggregate.lock());
        if cancel.is_cancelled() {
            status.add(Status::cancel());
        }
        let status = if status.children().is_empty() {
            Status::ok()
        } else {
            status
        };

        BatchOutcome {
            status,
            requests: finished.into_iter().map(|(_, r)| r).collect(),
            workers,
            synchronous,
        }
    }
}

type Queue = Mutex<VecDeque<(usize, ArtifactRequest)>>;

async fn drain<E: RequestExecutor + ?Sized>(
    executor: &E,
    queue: &Queue,
    finished: &Mutex<Vec<(usize, ArtifactRequest)>>,
    aggregate: &Mutex<Status>,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let Some((i, mut request)) = queue.lock().pop_front() else {
            return;
        };
        request.state = RequestState::InFlight;
        let status = executor.execute(&request, cancel).await;
        if !status.is_ok() {
            aggregate.lock().add(status.clone());
        }
        request.finish(status);
        finished.lock().push((i, request));
    }
}
