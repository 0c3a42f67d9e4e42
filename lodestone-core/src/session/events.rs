//! Notifications a swarm session hands to its controller

use std::fmt;
use crate::torrent::TorrentInfoDict;
use crate::torrent::protocol::PeerAddress;

/// Event drained from a session with [`super::Session::poll_events`].
///
/// `MetadataReceived`, `MetadataRejected`, `TorrentError` and
/// `TorrentFinished` decide the outcome of a resolution; everything else is
/// informational and only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Complete info dictionary whose hash matches the requested torrent
    MetadataReceived { info: TorrentInfoDict },
    /// Assembled metadata did not hash to the requested torrent or did not
    /// decode as an info dictionary
    MetadataRejected { reason: String },
    /// Torrent-level failure, the session will not make progress
    TorrentError { detail: String },
    /// Torrent reported done; for a metadata-only torrent this means no
    /// metadata will follow
    TorrentFinished,
    TrackerReply { url: String, peers: usize },
    TrackerError { url: String, reason: String },
    PeerConnected {
        address: PeerAddress,
        client: Option<String>,
    },
    PeerDisconnected {
        address: PeerAddress,
        reason: String,
    },
    MetadataProgress { received: usize, total: usize },
    Notice { message: String },
}

impl SessionEvent {
    /// Short event name for logs.
    pub fn what(&self) -> &'static str {
        match self {
            SessionEvent::MetadataReceived { .. } => "metadata_received",
            SessionEvent::MetadataRejected { .. } => "metadata_rejected",
            SessionEvent::TorrentError { .. } => "torrent_error",
            SessionEvent::TorrentFinished => "torrent_finished",
            SessionEvent::TrackerReply { .. } => "tracker_reply",
            SessionEvent::TrackerError { .. } => "tracker_error",
            SessionEvent::PeerConnected { .. } => "peer_connected",
            SessionEvent::PeerDisconnected { .. } => "peer_disconnected",
            SessionEvent::MetadataProgress { .. } => "metadata_progress",
            SessionEvent::Notice { .. } => "notice",
        }
    }

    /// Checks if the event ends the resolution as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionEvent::MetadataRejected { .. }
                | SessionEvent::TorrentError { .. }
                | SessionEvent::TorrentFinished
        )
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::MetadataReceived { info } => write!(
                f,
                "received metadata for '{}' ({} bytes)",
                info.name,
                info.raw_bytes().len()
            ),
            SessionEvent::MetadataRejected { reason } => {
                write!(f, "metadata rejected: {reason}")
            }
            SessionEvent::TorrentError { detail } => write!(f, "{detail}"),
            SessionEvent::TorrentFinished => write!(f, "torrent finished without metadata"),
            SessionEvent::TrackerReply { url, peers } => {
                write!(f, "{url} returned {peers} peers")
            }
            SessionEvent::TrackerError { url, reason } => write!(f, "{url}: {reason}"),
            SessionEvent::PeerConnected { address, client } => match client {
                Some(client) => write!(f, "{address} ({client}) offers metadata"),
                None => write!(f, "{address} offers metadata"),
            },
            SessionEvent::PeerDisconnected { address, reason } => {
                write!(f, "{address} disconnected: {reason}")
            }
            SessionEvent::MetadataProgress { received, total } => {
                write!(f, "{received}/{total} metadata bytes")
            }
            SessionEvent::Notice { message } => write!(f, "{message}"),
        }
    }
}
