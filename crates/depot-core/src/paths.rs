//! Well-known locations and URL helpers.

use dirs::home_dir;
use std::path::{Path, PathBuf};

use url::Url;

/// Returns the depot home directory, or None if the user's home cannot be resolved.
pub fn try_depot_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("DEPOT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".depot"))
}

/// Config file path: ~/.depot/config.toml
pub fn config_path() -> Option<PathBuf> {
    try_depot_home().map(|h| h.join("config.toml"))
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// Local filesystem path behind a `file:` URL.
pub fn local_path(url: &Url) -> Option<PathBuf> {
    if url.scheme() == "file" {
        url.to_file_path().ok()
    } else {
        None
    }
}

/// Parse a user-supplied repository location: a URL, or a filesystem path.
///
/// Relative paths are made absolute against the current directory.
pub fn parse_location(text: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(text) {
        // Single letters are Windows drive prefixes, not schemes.
        if url.scheme().len() > 1 {
            return Some(url);
        }
    }
    let path = Path::new(text);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Url::from_directory_path(absolute).ok()
}

/// Copy of `url` whose path ends with `/`, so relative joins land inside it.
pub fn as_directory(url: &Url) -> Url {
    let mut dir = url.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}
