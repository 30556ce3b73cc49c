//! Artifact repository engine: descriptor storage, location mapping,
//! verified fetches with mirror retry, and bounded-parallel batch downloads.

pub mod blob;
pub mod codec;
pub mod config;
pub mod error;
pub mod folder;
pub mod index;
pub mod lock;
pub mod mapper;
pub mod mirror;
pub mod paths;
pub mod reporter;
pub mod repository;
pub mod scheduler;
pub mod transport;
pub mod verify;

pub use config::EngineConfig;
pub use error::{RepositoryError, Result};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};
pub use repository::{ArtifactRepository, ArtifactSink, RepositoryOptions};
pub use scheduler::{ArtifactRequest, BatchOutcome, Destination, RequestState};
pub use transport::{DefaultTransport, Transport, USER_AGENT};
