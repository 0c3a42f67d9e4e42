//! Core types for BitTorrent tracker communication

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;

use crate::torrent::protocol::PeerId;
use crate::torrent::{InfoHash, TorrentError};

/// Placeholder `left` value announced before the torrent size is known.
///
/// Some trackers only hand out peers to clients that still need data.
pub const UNKNOWN_LEFT: u64 = 16 * 1024;

/// Tracker announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Unique identifier for the torrent being announced
    pub info_hash: InfoHash,
    /// Client's unique 20-byte identifier
    pub peer_id: PeerId,
    /// Port reported for incoming peer connections
    pub port: u16,
    /// Total bytes uploaded to other peers
    pub uploaded: u64,
    /// Total bytes downloaded from other peers
    pub downloaded: u64,
    /// Bytes remaining to download
    pub left: u64,
    /// Current client state for this torrent
    pub event: AnnounceEvent,
    /// Number of peers requested
    pub num_want: u32,
}

impl AnnounceRequest {
    /// Creates a first announce for a torrent whose size is not yet known.
    pub fn started(info_hash: InfoHash, peer_id: PeerId, port: u16) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left: UNKNOWN_LEFT,
            event: AnnounceEvent::Started,
            num_want: 50,
        }
    }

    /// Same request without an event, for periodic re-announces.
    pub fn regular(&self) -> Self {
        Self {
            event: AnnounceEvent::None,
            ..self.clone()
        }
    }
}

/// BitTorrent announce events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// Regular interval announce
    None,
    /// Client started this torrent
    Started,
}

impl AnnounceEvent {
    /// Event name used by HTTP trackers; `None` for regular announces.
    pub fn as_http_param(self) -> Option<&'static str> {
        match self {
            AnnounceEvent::None => None,
            AnnounceEvent::Started => Some("started"),
        }
    }

    /// Event code used by UDP trackers (BEP 15).
    pub fn as_udp_code(self) -> u32 {
        match self {
            AnnounceEvent::None => 0,
            AnnounceEvent::Started => 2,
        }
    }
}

/// Tracker announce response.
#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    /// Seconds until next announce request should be sent
    pub interval: u32,
    /// Number of seeders in the swarm
    pub complete: u32,
    /// Number of leechers in the swarm
    pub incomplete: u32,
    /// List of peer addresses for connection attempts
    pub peers: Vec<SocketAddr>,
}

/// Abstract tracker communication interface.
///
/// Implementations handle protocol-specific details (HTTP/UDP) while
/// returning the same response shape.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces client presence to tracker and retrieves peer list.
    ///
    /// # Errors
    ///
    /// - `TorrentError::TrackerConnectionFailed` - If network or protocol error
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError>;

    /// Returns tracker URL for logging purposes.
    fn tracker_url(&self) -> &str;
}

/// Parses compact IPv4 peers: 4 address bytes and 2 port bytes each.
///
/// # Errors
/// - `TorrentError::ProtocolError` - Length not a multiple of 6
pub fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    if !peer_bytes.len().is_multiple_of(6) {
        return Err(TorrentError::ProtocolError {
            message: format!("Invalid compact peer data length: {}", peer_bytes.len()),
        });
    }

    Ok(peer_bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::from((ip, port))
        })
        .collect())
}

/// Parses compact IPv6 peers: 16 address bytes and 2 port bytes each.
///
/// # Errors
/// - `TorrentError::ProtocolError` - Length not a multiple of 18
pub fn parse_compact_peers6(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    if !peer_bytes.len().is_multiple_of(18) {
        return Err(TorrentError::ProtocolError {
            message: format!("Invalid compact IPv6 peer data length: {}", peer_bytes.len()),
        });
    }

    Ok(peer_bytes
        .chunks_exact(18)
        .map(|chunk| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&chunk[..16]);
            let port = u16::from_be_bytes([chunk[16], chunk[17]]);
            SocketAddr::from((Ipv6Addr::from(octets), port))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_peers() {
        let bytes = [192, 168, 1, 100, 0x1a, 0xe1, 10, 0, 0, 1, 0x00, 0x50];
        let peers = parse_compact_peers(&bytes).unwrap();
        assert_eq!(
            peers,
            vec![
                "192.168.1.100:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.1:80".parse::<SocketAddr>().unwrap()
            ]
        );
        assert!(parse_compact_peers(&bytes[..5]).is_err());
    }

    #[test]
    fn test_parse_compact_peers6() {
        let mut bytes = Ipv6Addr::LOCALHOST.octets().to_vec();
        bytes.extend_from_slice(&[0x1a, 0xe1]);
        let peers = parse_compact_peers6(&bytes).unwrap();
        assert_eq!(peers, vec!["[::1]:6881".parse::<SocketAddr>().unwrap()]);
        assert!(parse_compact_peers6(&bytes[..17]).is_err());
    }

    #[test]
    fn test_event_encodings() {
        assert_eq!(AnnounceEvent::Started.as_http_param(), Some("started"));
        assert_eq!(AnnounceEvent::None.as_http_param(), None);
        assert_eq!(AnnounceEvent::Started.as_udp_code(), 2);
        assert_eq!(AnnounceEvent::None.as_udp_code(), 0);
    }

    #[test]
    fn test_regular_announce_drops_event() {
        let request =
            AnnounceRequest::started(InfoHash::new([1; 20]), PeerId::new([2; 20]), 6881);
        assert_eq!(request.left, UNKNOWN_LEFT);
        assert_eq!(request.regular().event, AnnounceEvent::None);
    }
}
