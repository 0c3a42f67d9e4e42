//! BitTorrent metadata model and wire protocol for magnet resolution

pub mod bencode;
pub mod creation;
pub mod info;
pub mod magnet;
pub mod metadata;
pub mod protocol;
pub mod tracker;

use std::fmt;

pub use creation::{CreationMetadata, TorrentFile};
pub use info::{FileEntry, TorrentInfoDict};
pub use magnet::MagnetDescriptor;
pub use metadata::{METADATA_PIECE_SIZE, MetadataBuffer};
pub use protocol::{PeerHandshake, PeerId, PeerMessage};
pub use tracker::{AnnounceRequest, AnnounceResponse, TrackerClient};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify torrents across the BitTorrent network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Creates InfoHash from a byte slice that must be exactly 20 bytes long.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidMagnetLink` - If the slice is not 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TorrentError> {
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| TorrentError::InvalidMagnetLink {
                reason: format!("Info hash is {} bytes, expected 20", bytes.len()),
            })?;
        Ok(Self(hash))
    }

    /// Computes the info hash of raw bencoded info dictionary bytes.
    pub fn of_info_bytes(raw: &[u8]) -> Self {
        use sha1::{Digest, Sha1};

        let mut hasher = Sha1::new();
        hasher.update(raw);
        Self(hasher.finalize().into())
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors raised below the resolution controller.
///
/// Covers magnet parsing, bencode decoding, peer wire protocol and tracker
/// failures. Inside a running session these surface only as event detail.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Invalid magnet link: {reason}")]
    InvalidMagnetLink { reason: String },

    #[error("Failed to parse torrent metadata: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Metadata validation failed: {reason}")]
    MetadataValidationFailure { reason: String },

    #[error("Tracker {url} failed: {reason}")]
    TrackerConnectionFailed { url: String, reason: String },

    #[error("Peer connection error: {reason}")]
    PeerConnectionError { reason: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Proxy error: {reason}")]
    ProxyError { reason: String },

    #[error("No usable peer transport: {reason}")]
    NoUsableTransport { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParsing(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
