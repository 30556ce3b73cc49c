//! Reporter trait for dependency injection
//!
//! This trait allows the engine to report progress and status without
//! being coupled to a specific terminal or GUI implementation.

use depot_schema::ArtifactKey;

/// Receives progress and outcomes from the engine.
pub trait Reporter: Send + Sync {
    /// Updates the progress of a transfer.
    fn downloading(&self, key: &ArtifactKey, current: u64, total: Option<u64>);

    /// Marks an artifact operation as successfully completed.
    fn done(&self, key: &ArtifactKey, detail: &str, size: Option<u64>);

    /// Marks an artifact operation as failed with a specific reason.
    fn failed(&self, key: &ArtifactKey, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn downloading(&self, key: &ArtifactKey, current: u64, total: Option<u64>) {
        (**self).downloading(key, current, total);
    }
    fn done(&self, key: &ArtifactKey, detail: &str, size: Option<u64>) {
        (**self).done(key, detail, size);
    }
    fn failed(&self, key: &ArtifactKey, reason: &str) {
        (**self).failed(key, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn downloading(&self, _: &ArtifactKey, _: u64, _: Option<u64>) {}
    fn done(&self, _: &ArtifactKey, _: &str, _: Option<u64>) {}
    fn failed(&self, _: &ArtifactKey, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}

/// Keeps info and warning messages for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    pub(crate) infos: parking_lot::Mutex<Vec<String>>,
    pub(crate) warnings: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn downloading(&self, _: &ArtifactKey, _: u64, _: Option<u64>) {}
    fn done(&self, _: &ArtifactKey, _: &str, _: Option<u64>) {}
    fn failed(&self, _: &ArtifactKey, _: &str) {}
    fn info(&self, msg: &str) {
        self.infos.lock().push(msg.to_string());
    }
    fn warning(&self, msg: &str) {
        self.warnings.lock().push(msg.to_string());
    }
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
