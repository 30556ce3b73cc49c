//! Id-addressed storage layout for artifacts without a canonical mapping.
//!
//! Layout: `.blobstore/<aa>/<bb>/<hex id>` where `aa` and `bb` are the first
//! two bytes of the id, which bounds directory fan-out at 256 per level.

use url::Url;
use uuid::Uuid;

/// Directory under the repository root that holds blobs.
pub const BLOB_DIR: &str = ".blobstore";

/// Maps blob ids to locations under a repository.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: Url,
}

impl BlobStore {
    /// Blob store rooted under `repository`. Returns `None` for URLs that
    /// cannot carry a path (e.g. `mailto:`).
    pub fn new(repository: &Url) -> Option<Self> {
        if repository.cannot_be_a_base() {
            return None;
        }
        let root = crate::paths::as_directory(repository).join(BLOB_DIR).ok()?;
        Some(Self { root })
    }

    /// Root of the blob tree.
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Fresh random blob id.
    pub fn new_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Deterministic location for `id`.
    pub fn path_for(&self, id: &[u8; 16]) -> Url {
        let hex = hex::encode(id);
        let mut url = self.root.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([&hex[0..2], &hex[2..4], hex.as_str()]);
        }
        url
    }

    /// Location for a blob id stored as text. Returns `None` if it is not a UUID.
    pub fn path_for_text(&self, id: &str) -> Option<Url> {
        let id = Uuid::parse_str(id).ok()?;
        Some(self.path_for(id.as_bytes()))
    }
}
