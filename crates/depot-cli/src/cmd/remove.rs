//! Remove command

use anyhow::{Result, bail};

use super::parse_keys;

/// Remove every descriptor of each key, or the whole repository content.
pub async fn remove(repo: &str, keys: &[String], all: bool, quiet: bool) -> Result<()> {
    let repository = crate::open(repo, quiet).await?;

    let removed = if all {
        repository.remove_all()?
    } else {
        let keys = parse_keys(keys)?;
        let mut missing = Vec::new();
        let mut removed = 0;
        for key in &keys {
            match repository.remove_key(key)? {
                0 => missing.push(key.to_string()),
                n => removed += n,
            }
        }
        if !missing.is_empty() {
            bail!("Not in repository: {}", missing.join(" "));
        }
        removed
    };

    if !quiet {
        println!("Removed {removed} descriptors");
    }
    Ok(())
}
