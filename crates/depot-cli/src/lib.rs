//! depot - command-line front end for artifact repositories
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Every command opens the repository named on the command line with the
//! engine configuration from `$DEPOT_HOME/config.toml` and `DEPOT_*`
//! variables, does one thing, and exits. Failures exit non-zero.

pub mod cmd;
pub mod reporter;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::{ArtifactRepository, EngineConfig, RepositoryOptions};
use std::sync::Arc;
use url::Url;

use crate::reporter::ConsoleReporter;

#[derive(Debug, Parser)]
#[command(name = "depot")]
#[command(author, version, about = "depot - artifact repository tool")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty repository in a directory
    Init {
        /// Repository directory
        repo: String,
        /// Human-readable repository name
        #[arg(long, default_value = "depot repository")]
        name: String,
        /// Store metadata as artifacts.jar instead of artifacts.xml
        #[arg(long)]
        compressed: bool,
    },
    /// List the artifacts of a repository
    List {
        /// Repository directory or URL
        repo: String,
        /// Only show artifacts with this classifier
        #[arg(long)]
        classifier: Option<String>,
    },
    /// Store a file in a repository as an artifact
    Add {
        /// Repository directory
        repo: String,
        /// File to store
        file: PathBuf,
        /// Artifact key: classifier,id,version
        #[arg(long)]
        key: String,
        /// Extra descriptor property, name=value
        #[arg(long = "property", short = 'p', value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    /// Remove artifacts from a repository
    Remove {
        /// Repository directory
        repo: String,
        /// Artifact keys: classifier,id,version
        #[arg(required_unless_present = "all")]
        keys: Vec<String>,
        /// Remove every artifact
        #[arg(long, short = 'a', conflicts_with = "keys")]
        all: bool,
    },
    /// Download artifacts into a directory
    Fetch {
        /// Repository directory or URL
        repo: String,
        /// Artifact keys: classifier,id,version
        #[arg(required = true)]
        keys: Vec<String>,
        /// Output directory
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,
        /// Write the stored bytes without undoing processing steps
        #[arg(long)]
        raw: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_property(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{text}'"))
}

/// Resolve a repository argument to a location URL.
pub fn location(repo: &str) -> Result<Url> {
    depot_core::parse_location(repo).with_context(|| format!("Invalid repository location '{repo}'"))
}

/// Engine options for this invocation.
pub fn options(quiet: bool) -> Result<RepositoryOptions> {
    let config = EngineConfig::load().context("Failed to load configuration")?;
    Ok(RepositoryOptions::from(config).with_reporter(Arc::new(ConsoleReporter::new(quiet))))
}

/// Open an existing repository.
pub async fn open(repo: &str, quiet: bool) -> Result<ArtifactRepository> {
    let location = location(repo)?;
    ArtifactRepository::open(&location, options(quiet)?)
        .await
        .with_context(|| format!("Failed to open repository at {location}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_arguments_split_on_first_equals() {
        assert_eq!(
            parse_property("download.contentType=a=b").unwrap(),
            ("download.contentType".to_string(), "a=b".to_string())
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn remove_requires_keys_or_all() {
        assert!(Cli::try_parse_from(["depot", "remove", "repo"]).is_err());
        assert!(Cli::try_parse_from(["depot", "remove", "repo", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["depot", "remove", "repo", "a,b,1", "--all"]).is_err());
    }
}
