//! Add command

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use depot_schema::{ArtifactDescriptor, ArtifactKey, ChecksumAlgorithm, Digest};

/// Store `file` under `key`, recording its SHA-256 as the download checksum.
pub async fn add(
    repo: &str,
    file: &Path,
    key: &str,
    properties: &[(String, String)],
    quiet: bool,
) -> Result<()> {
    let key: ArtifactKey = key
        .parse()
        .with_context(|| format!("Invalid artifact key '{key}'"))?;
    let repository = crate::open(repo, quiet).await?;

    let mut descriptor = ArtifactDescriptor::new(key);
    for (name, value) in properties {
        descriptor.set_property(name.as_str(), value.as_str());
    }
    let digest = sha256_of(file)?;
    descriptor.set_download_checksum(ChecksumAlgorithm::Sha256, digest.as_str());
    if descriptor.is_canonical() {
        descriptor.set_artifact_checksum(ChecksumAlgorithm::Sha256, digest.as_str());
    }

    let mut sink = repository
        .output_stream(&descriptor)
        .with_context(|| format!("Cannot store {descriptor}"))?;
    let mut input =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let written = io::copy(&mut input, &mut sink)
        .with_context(|| format!("Failed to write {descriptor}"))?;
    let registered = tokio::task::spawn_blocking(move || sink.close())
        .await
        .context("Registration task failed")?
        .context("Failed to register artifact")?;
    if !registered {
        bail!("{} is empty, nothing stored", file.display());
    }

    if !quiet {
        println!(
            "Added {} ({})",
            descriptor.key(),
            crate::reporter::format_size(written)
        );
    }
    Ok(())
}

fn sha256_of(path: &Path) -> Result<Digest> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = ChecksumAlgorithm::Sha256.hasher();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
