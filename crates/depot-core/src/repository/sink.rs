//! The write side: streaming new artifacts into a local repository.

use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

use depot_schema::{ArtifactDescriptor, Status, props};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use super::ArtifactRepository;
use crate::error::{RepositoryError, Result};
use crate::folder;
use crate::paths::local_path;

impl ArtifactRepository {
    /// Open a sink for new bytes of `descriptor`.
    ///
    /// The descriptor is stamped with a blob id if no rule maps it. Nothing is
    /// registered until [`ArtifactSink::close`] succeeds.
    ///
    /// # Errors
    ///
    /// Read-only repository, an already registered descriptor, or no
    /// resolvable local location.
    pub fn output_stream(&self, descriptor: &ArtifactDescriptor) -> Result<ArtifactSink> {
        self.writable_root()?;
        let descriptor = self.stamp_descriptor(descriptor);
        if self.contains(&descriptor) {
            return Err(RepositoryError::ArtifactExists(descriptor.to_string()));
        }
        let target = self
            .artifact_location(&descriptor)
            .as_ref()
            .and_then(local_path)
            .ok_or_else(|| RepositoryError::LocationUnresolvable(descriptor.to_string()))?;
        let parent = target
            .parent()
            .ok_or_else(|| RepositoryError::LocationUnresolvable(descriptor.to_string()))?;
        std::fs::create_dir_all(parent)?;

        Ok(ArtifactSink {
            repo: self.clone(),
            descriptor,
            file: Some(NamedTempFile::new_in(parent)?),
            target,
            written: 0,
            status: Status::ok(),
        })
    }
}

/// Bytes on their way into a repository.
///
/// Writes go to a temporary file beside the final location. Dropping an
/// unclosed sink deletes it.
#[derive(Debug)]
pub struct ArtifactSink {
    repo: ArtifactRepository,
    descriptor: ArtifactDescriptor,
    file: Option<NamedTempFile>,
    target: PathBuf,
    written: u64,
    status: Status,
}

impl ArtifactSink {
    /// The descriptor that will be registered, blob id included.
    pub fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Record the outcome of whatever produced the bytes. An error or cancel
    /// status makes [`close`](Self::close) discard them.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Finish the write. Returns `true` if the descriptor was registered.
    ///
    /// Nothing is registered when the recorded status is an error or a
    /// cancel, or when no bytes were written. Folder artifacts arrive as a
    /// zip and are unpacked into place.
    ///
    /// # Errors
    ///
    /// Failure to move the bytes into place or to persist the descriptor.
    pub fn close(self) -> Result<bool> {
        let cancel = self.repo.inner.options.cancel.clone();
        self.close_cancellable(&cancel)
    }

    /// As [`close`](Self::close), giving up with
    /// [`RepositoryError::Cancelled`] if `cancel` fires while waiting for the
    /// repository lock. The moved bytes are removed again in that case.
    ///
    /// # Errors
    ///
    /// As [`close`](Self::close).
    pub fn close_cancellable(mut self, cancel: &CancellationToken) -> Result<bool> {
        let Some(mut file) = self.file.take() else {
            return Ok(false);
        };
        if !self.status.is_success() {
            tracing::debug!(artifact = %self.descriptor, status = %self.status, "Discarding failed write");
            return Ok(false);
        }
        if self.written == 0 {
            tracing::debug!(artifact = %self.descriptor, "Nothing written, not registering");
            return Ok(false);
        }

        file.flush()?;
        if self.descriptor.is_folder() {
            file.seek(SeekFrom::Start(0))?;
            folder::unzip_into(file.as_file_mut(), &self.target)?;
        } else {
            file.as_file().sync_all()?;
            file.persist(&self.target).map_err(|e| RepositoryError::Io(e.error))?;
        }

        if self.descriptor.download_size().is_none() {
            self.descriptor
                .set_property(props::DOWNLOAD_SIZE, self.written.to_string());
        }
        if let Err(e) = self.repo.add_descriptor_with(self.descriptor.clone(), cancel) {
            let removed = if self.descriptor.is_folder() {
                std::fs::remove_dir_all(&self.target)
            } else {
                std::fs::remove_file(&self.target)
            };
            if let Err(cleanup) = removed {
                tracing::warn!(path = %self.target.display(), error = %cleanup, "Failed to remove unregistered artifact");
            }
            return Err(e);
        }
        tracing::debug!(artifact = %self.descriptor, bytes = self.written, "Registered artifact");
        Ok(true)
    }
}

impl Write for ArtifactSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("artifact sink already closed"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ArtifactSink {
    fn drop(&mut self) {
        if self.file.is_some() && self.written > 0 {
            tracing::debug!(artifact = %self.descriptor, "Dropping unfinished artifact write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use depot_schema::{ArtifactKey, StatusCode, Version};
    use url::Url;

    fn repo() -> (tempfile::TempDir, ArtifactRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let repo = ArtifactRepository::create(&url, "sink", EngineConfig::default()).unwrap();
        (dir, repo)
    }

    fn bundle(id: &str) -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("osgi.bundle", id, Version::new("1.0.0")))
    }

    #[test]
    fn written_artifact_is_registered_at_mapped_path() {
        let (dir, repo) = repo();
        let mut sink = repo.output_stream(&bundle("foo")).unwrap();
        sink.write_all(b"jar bytes").unwrap();
        assert!(sink.close().unwrap());

        assert!(repo.contains(&bundle("foo")));
        assert_eq!(
            std::fs::read(dir.path().join("plugins/foo_1.0.0.jar")).unwrap(),
            b"jar bytes"
        );
        let stored = repo.descriptors_for(bundle("foo").key()).remove(0);
        assert_eq!(stored.download_size(), Some(9));
    }

    #[test]
    fn empty_write_is_not_registered() {
        let (dir, repo) = repo();
        let sink = repo.output_stream(&bundle("empty")).unwrap();
        assert!(!sink.close().unwrap());
        assert!(!repo.contains(&bundle("empty")));
        assert!(!dir.path().join("plugins/empty_1.0.0.jar").exists());
    }

    #[test]
    fn failed_write_is_discarded() {
        let (dir, repo) = repo();
        let mut sink = repo.output_stream(&bundle("bad")).unwrap();
        sink.write_all(b"partial").unwrap();
        sink.set_status(Status::error(StatusCode::Transport, "connection reset"));
        assert!(!sink.close().unwrap());
        assert!(!repo.contains(&bundle("bad")));
        assert!(!dir.path().join("plugins/bad_1.0.0.jar").exists());
    }

    #[test]
    fn dropped_sink_leaves_no_file() {
        let (dir, repo) = repo();
        let mut sink = repo.output_stream(&bundle("dropped")).unwrap();
        sink.write_all(b"partial").unwrap();
        drop(sink);
        let leftovers = std::fs::read_dir(dir.path().join("plugins")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn existing_descriptor_is_refused() {
        let (_dir, repo) = repo();
        repo.add_descriptor(bundle("foo")).unwrap();
        assert!(matches!(
            repo.output_stream(&bundle("foo")),
            Err(RepositoryError::ArtifactExists(_))
        ));
    }

    #[test]
    fn cancelled_close_under_a_held_lock_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let config = EngineConfig {
            locking_enabled: true,
            ..EngineConfig::default()
        };
        let repo = ArtifactRepository::create(&url, "sink", config).unwrap();
        let other = crate::lock::RepositoryLock::new(dir.path());
        let _held = other.acquire(false, &CancellationToken::new()).unwrap();

        let mut sink = repo.output_stream(&bundle("late")).unwrap();
        sink.write_all(b"jar bytes").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            sink.close_cancellable(&cancel),
            Err(RepositoryError::Cancelled)
        ));
        assert!(!repo.contains(&bundle("late")));
        assert!(!dir.path().join("plugins/late_1.0.0.jar").exists());
    }

    #[test]
    fn folder_artifacts_are_unpacked() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("plugin.xml"), "<plugin/>").unwrap();
        let mut zipped = io::Cursor::new(Vec::new());
        folder::zip_folder(src.path(), &mut zipped).unwrap();

        let (dir, repo) = repo();
        let descriptor = bundle("tree")
            .with_repository_property(props::ARTIFACT_REFERENCE, "plugins/tree_1.0.0")
            .with_repository_property(props::ARTIFACT_FOLDER, "true");
        let mut sink = repo.output_stream(&descriptor).unwrap();
        sink.write_all(zipped.get_ref()).unwrap();
        assert!(sink.close().unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("plugins/tree_1.0.0/plugin.xml")).unwrap(),
            "<plugin/>"
        );
    }
}
