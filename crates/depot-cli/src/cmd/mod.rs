pub mod add;
pub mod completions;
pub mod fetch;
pub mod init;
pub mod list;
pub mod remove;

use anyhow::{Context, Result};
use depot_schema::ArtifactKey;

/// Parse `classifier,id,version` arguments.
pub(crate) fn parse_keys(keys: &[String]) -> Result<Vec<ArtifactKey>> {
    keys.iter()
        .map(|k| k.parse().with_context(|| format!("Invalid artifact key '{k}'")))
        .collect()
}
