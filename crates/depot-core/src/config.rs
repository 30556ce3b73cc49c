//! Engine configuration.
//!
//! Resolved once and handed to each repository at construction. Sources in
//! increasing precedence: compiled defaults, `$DEPOT_HOME/config.toml`, then
//! `DEPOT_*` environment variables.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Worker cap used when neither the environment nor the repository says otherwise.
pub const DEFAULT_MAX_DOWNLOAD_THREADS: usize = 4;

/// Failure to load the config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineConfig`].
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// Immutable switches consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Global cap on concurrent download workers.
    pub max_download_threads: usize,
    /// Use workers even for local repositories.
    pub force_threading: bool,
    /// Consult the repository's mirror list.
    pub mirrors_enabled: bool,
    /// Verify declared checksums.
    pub checksums_enabled: bool,
    /// Checksum algorithm ids to skip even when checksums are enabled.
    pub disabled_checksums: Vec<String>,
    /// Take the process-external repository lock around mutations.
    pub locking_enabled: bool,
    /// Fail artifacts that carry no signature.
    pub require_signatures: bool,
    /// Base64 Ed25519 public keys accepted for artifact signatures.
    pub trusted_keys: Vec<String>,
    /// Two-letter country code sent with mirror list requests.
    pub country_code: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_download_threads: DEFAULT_MAX_DOWNLOAD_THREADS,
            force_threading: false,
            mirrors_enabled: true,
            checksums_enabled: true,
            disabled_checksums: Vec::new(),
            locking_enabled: false,
            require_signatures: false,
            trusted_keys: Vec::new(),
            country_code: None,
        }
    }
}

impl EngineConfig {
    /// Load from the config file (if present) and the process environment.
    ///
    /// # Errors
    ///
    /// Fails if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match crate::paths::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        Ok(base.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid TOML for this struct.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `DEPOT_*` overrides resolved through `lookup`.
    ///
    /// Unparseable numbers are ignored with a warning and keep the prior value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("DEPOT_MAX_DOWNLOAD_THREADS") {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_download_threads = n,
                _ => tracing::warn!(value = %v, "Ignoring invalid DEPOT_MAX_DOWNLOAD_THREADS"),
            }
        }
        let flag = |name: &str, current: bool| lookup(name).map_or(current, |v| parse_bool(&v));
        self.force_threading = flag("DEPOT_FORCE_THREADING", self.force_threading);
        self.mirrors_enabled = flag("DEPOT_MIRRORS_ENABLED", self.mirrors_enabled);
        self.checksums_enabled = flag("DEPOT_CHECKSUMS_ENABLED", self.checksums_enabled);
        self.locking_enabled = flag("DEPOT_LOCKING_ENABLED", self.locking_enabled);
        self.require_signatures = flag("DEPOT_REQUIRE_SIGNATURES", self.require_signatures);

        if let Some(v) = lookup("DEPOT_DISABLED_CHECKSUMS") {
            self.disabled_checksums = split_list(&v);
        }
        if let Some(v) = lookup("DEPOT_TRUSTED_KEYS") {
            self.trusted_keys = split_list(&v);
        }
        if self.country_code.is_none() {
            self.country_code = lookup("LANG").and_then(|v| country_from_locale(&v));
        }
        self
    }

    /// `true` when checksums of `algorithm_id` should be verified.
    pub fn checksum_enabled(&self, algorithm_id: &str) -> bool {
        self.checksums_enabled
            && !self
                .disabled_checksums
                .iter()
                .any(|d| d.eq_ignore_ascii_case(algorithm_id))
    }
}

fn parse_bool(v: &str) -> bool {
    let v = v.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `en_US.UTF-8` -> `us`
fn country_from_locale(locale: &str) -> Option<String> {
    let region = locale.split(['.', '@']).next()?.split_once('_')?.1;
    (region.len() == 2).then(|| region.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let cfg = EngineConfig::default().with_overrides(lookup(&[]));
        assert_eq!(cfg.max_download_threads, 4);
        assert!(cfg.mirrors_enabled);
        assert!(cfg.checksums_enabled);
        assert!(!cfg.locking_enabled);
        assert!(!cfg.force_threading);
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = EngineConfig::default().with_overrides(lookup(&[
            ("DEPOT_MAX_DOWNLOAD_THREADS", "8"),
            ("DEPOT_FORCE_THREADING", "yes"),
            ("DEPOT_MIRRORS_ENABLED", "false"),
            ("DEPOT_LOCKING_ENABLED", "1"),
            ("DEPOT_DISABLED_CHECKSUMS", "sha-512, blake3"),
            ("LANG", "de_DE.UTF-8"),
        ]));
        assert_eq!(cfg.max_download_threads, 8);
        assert!(cfg.force_threading);
        assert!(!cfg.mirrors_enabled);
        assert!(cfg.locking_enabled);
        assert!(cfg.checksum_enabled("sha-256"));
        assert!(!cfg.checksum_enabled("SHA-512"));
        assert_eq!(cfg.country_code.as_deref(), Some("de"));
    }

    #[test]
    fn invalid_thread_count_is_ignored() {
        let cfg = EngineConfig::default()
            .with_overrides(lookup(&[("DEPOT_MAX_DOWNLOAD_THREADS", "lots")]));
        assert_eq!(cfg.max_download_threads, DEFAULT_MAX_DOWNLOAD_THREADS);
    }

    #[test]
    fn file_values_are_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_download_threads = 2\nlocking_enabled = true\n").unwrap();

        let from_file = EngineConfig::from_file(&path).unwrap();
        assert_eq!(from_file.max_download_threads, 2);
        assert!(from_file.locking_enabled);
        assert!(from_file.mirrors_enabled);

        let merged =
            from_file.with_overrides(lookup(&[("DEPOT_LOCKING_ENABLED", "false")]));
        assert!(!merged.locking_enabled);
        assert_eq!(merged.max_download_threads, 2);
    }
}
