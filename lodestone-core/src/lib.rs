//! Lodestone Core - magnet link to `.torrent` resolution
//!
//! This crate joins the swarm named by a magnet link, fetches the info
//! dictionary from peers over the metadata exchange extension, verifies it
//! against the infohash and writes it out as a standalone `.torrent` file.

pub mod config;
pub mod resolver;
pub mod session;
pub mod torrent;
pub mod tracing_setup;

use std::path::PathBuf;
use std::time::Duration;

// Re-export main types for convenient access
pub use config::{LodestoneConfig, ProxyEndpoint, SessionConfig, TransportMode};
pub use resolver::{ResolutionPhase, ResolutionState, ResolveReport, Resolver};
pub use session::{Session, SessionEvent, SwarmSession};
pub use torrent::{InfoHash, MagnetDescriptor, TorrentError, TorrentFile, TorrentInfoDict};

/// Terminal failures of a single resolution attempt.
///
/// Every variant ends the invocation. Nothing here is retried internally;
/// a caller that wants another attempt starts a fresh resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid magnet URI: {reason}")]
    InvalidMagnetUri { reason: String },

    #[error("Session error: {reason}")]
    Session { reason: String },

    #[error("Metadata validation failed: {reason}")]
    MetadataValidation { reason: String },

    #[error("No metadata received within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Resolution interrupted")]
    Interrupted,
}

impl ResolveError {
    /// Short failure kind used in one-line diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::InvalidMagnetUri { .. } => "invalid-magnet-uri",
            ResolveError::Session { .. } => "session-error",
            ResolveError::MetadataValidation { .. } => "metadata-validation-failure",
            ResolveError::Timeout { .. } => "timeout",
            ResolveError::Io { .. } => "io-error",
            ResolveError::Interrupted => "interrupted",
        }
    }

    /// Checks if the failure is the swarm never answering, as opposed to
    /// answering badly.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
