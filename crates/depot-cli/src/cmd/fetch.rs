//! Fetch command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use depot_core::{ArtifactRepository, ArtifactRequest, Destination, RequestState, filename_from_url};
use depot_schema::{ArtifactDescriptor, ArtifactKey};
use tokio_util::sync::CancellationToken;

use super::parse_keys;

/// Download each key into `out`. Ctrl-C cancels the batch.
pub async fn fetch(repo: &str, keys: &[String], out: &Path, raw: bool, quiet: bool) -> Result<()> {
    let keys = parse_keys(keys)?;
    let repository = crate::open(repo, quiet).await?;
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let mut requests = Vec::with_capacity(keys.len());
    for key in &keys {
        let Some(descriptor) = pick(&repository, key, raw) else {
            bail!("Not in repository: {key}");
        };
        let target = out.join(file_name(&repository, &descriptor));
        let request = ArtifactRequest::new(descriptor, Destination::File(target));
        requests.push(if raw { request.raw() } else { request });
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let outcome = repository.get_artifacts(requests, &cancel).await;
    interrupt.abort();

    tracing::debug!(workers = outcome.workers, synchronous = outcome.synchronous, "Batch finished");
    let failed = outcome
        .requests
        .iter()
        .filter(|r| r.state != RequestState::Done)
        .count();
    if outcome.status.is_cancel() {
        bail!("Cancelled");
    }
    if failed > 0 {
        bail!("{failed} of {} artifacts failed:\n{}", outcome.requests.len(), outcome.status);
    }
    Ok(())
}

/// Canonical form if there is one, unless raw bytes were asked for.
fn pick(repository: &ArtifactRepository, key: &ArtifactKey, raw: bool) -> Option<ArtifactDescriptor> {
    let mut candidates = repository.descriptors_for(key);
    candidates.sort_by_key(|d| d.processing_steps().len());
    if raw {
        candidates.pop()
    } else {
        candidates.into_iter().next()
    }
}

fn file_name(repository: &ArtifactRepository, descriptor: &ArtifactDescriptor) -> PathBuf {
    let key = descriptor.key();
    let mut name = repository
        .artifact_location(descriptor)
        .filter(|_| descriptor.blob_id().is_none())
        .map(|url| filename_from_url(url.path().trim_end_matches('/')).to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}_{}", key.id(), key.version()));
    if descriptor.is_folder() {
        name.push_str(".zip");
    }
    PathBuf::from(name)
}
