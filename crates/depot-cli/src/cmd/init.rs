//! Init command

use anyhow::{Context, Result};
use depot_core::ArtifactRepository;
use depot_schema::props;

/// Create an empty repository with the default mapping rules.
pub fn init(repo: &str, name: &str, compressed: bool, quiet: bool) -> Result<()> {
    let location = crate::location(repo)?;
    let repository = ArtifactRepository::create(&location, name, crate::options(quiet)?)
        .with_context(|| format!("Failed to create repository at {location}"))?;
    if compressed {
        repository.set_property(props::COMPRESSED, Some("true"))?;
    }

    if !quiet {
        println!("Created repository '{name}' at {location}");
    }
    Ok(())
}
