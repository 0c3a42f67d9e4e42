//! Core types for the BitTorrent wire protocol

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use bytes::Bytes;

use crate::torrent::{InfoHash, TorrentError};

/// Client identifier prefix carried in non-anonymous peer ids.
pub const CLIENT_PREFIX: &[u8; 8] = b"-LS0100-";

/// Protocol identifier sent in every handshake.
pub const PROTOCOL_NAME: &str = "BitTorrent protocol";

/// Reserved byte and bit announcing extension protocol support.
const EXTENSION_BYTE: usize = 5;
const EXTENSION_BIT: u8 = 0x10;

/// BitTorrent peer identifier.
///
/// 20-byte identifier for peers in the BitTorrent network.
/// Used in handshakes and tracker communication to identify clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generate random peer ID carrying the client prefix.
    pub fn generate() -> Self {
        let mut id: [u8; 20] = rand::random();
        id[..8].copy_from_slice(CLIENT_PREFIX);
        Self(id)
    }

    /// Generate fully random peer ID that does not identify the client.
    pub fn anonymous() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printable client prefixes read better than hex in logs
        for &byte in &self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

/// BitTorrent wire protocol messages relevant to metadata exchange.
///
/// Piece-transfer messages are never sent by this client; when a peer sends
/// them they decode as [`PeerMessage::Unknown`] and are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Keep-alive message to maintain connection
    KeepAlive,
    /// Peer is choking us
    Choke,
    /// Peer is no longer choking us
    Unchoke,
    /// Peer is interested in our pieces
    Interested,
    /// Peer is not interested in our pieces
    NotInterested,
    /// Peer acquired a specific piece
    Have {
        /// Index of the piece the peer now has
        piece_index: u32,
    },
    /// Peer piece availability bitmap
    Bitfield {
        /// Bitmap indicating which pieces the peer has
        bitfield: Bytes,
    },
    /// Extension protocol message (BEP 10)
    Extended {
        /// Extended message id, 0 for the extension handshake
        id: u8,
        /// Message body following the extended id
        payload: Bytes,
    },
    /// Any other message id
    Unknown {
        /// Message id as received
        id: u8,
        /// Message body following the id
        payload: Bytes,
    },
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching for torrent verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake advertising extension protocol support.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_BYTE] |= EXTENSION_BIT;
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            reserved,
            info_hash,
            peer_id,
        }
    }

    /// Checks the extension protocol bit in the reserved bytes.
    pub fn supports_extensions(&self) -> bool {
        self.reserved[EXTENSION_BYTE] & EXTENSION_BIT != 0
    }
}

/// Where a peer can be reached.
///
/// Host names stay unresolved until dialing, so a SOCKS5 proxy can resolve
/// them remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    Socket(SocketAddr),
    Host(String, u16),
}

impl From<SocketAddr> for PeerAddress {
    fn from(address: SocketAddr) -> Self {
        PeerAddress::Socket(address)
    }
}

impl FromStr for PeerAddress {
    type Err = TorrentError;

    /// Parses `ip:port`, `[ipv6]:port` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(address) = s.parse::<SocketAddr>() {
            return Ok(PeerAddress::Socket(address));
        }

        let invalid = || TorrentError::PeerConnectionError {
            reason: format!("Invalid peer address: {s}"),
        };
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() || host.contains([':', '[', ']']) {
            return Err(invalid());
        }
        Ok(PeerAddress::Host(host.to_string(), port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddress::Socket(address) => write!(f, "{address}"),
            PeerAddress::Host(host, port) => write!(f, "{host}:{port}"),
        }
    }
}
