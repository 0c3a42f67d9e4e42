//! BitTorrent handshake serialization and exchange

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{PROTOCOL_NAME, PeerHandshake, PeerId};
use crate::torrent::{InfoHash, TorrentError};

/// Length of a BEP 3 handshake: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;

/// Handshake serialization utilities for BitTorrent wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes handshake message following BEP 3
    pub fn serialize_handshake(handshake: &PeerHandshake) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);
        buf.push(handshake.protocol.len() as u8);
        buf.extend_from_slice(handshake.protocol.as_bytes());
        buf.extend_from_slice(&handshake.reserved);
        buf.extend_from_slice(handshake.info_hash.as_bytes());
        buf.extend_from_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// Deserializes handshake message following BEP 3
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Wrong length or protocol identifier
    pub fn deserialize_handshake(data: &[u8]) -> Result<PeerHandshake, TorrentError> {
        if data.len() != HANDSHAKE_LEN {
            return Err(TorrentError::ProtocolError {
                message: format!("Handshake is {} bytes, expected {HANDSHAKE_LEN}", data.len()),
            });
        }

        let protocol_len = data[0] as usize;
        if protocol_len != PROTOCOL_NAME.len() || &data[1..20] != PROTOCOL_NAME.as_bytes() {
            return Err(TorrentError::ProtocolError {
                message: "Unsupported protocol identifier in handshake".to_string(),
            });
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(PeerHandshake {
            protocol: PROTOCOL_NAME.to_string(),
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        })
    }
}

/// Sends our handshake and validates the peer's reply.
///
/// The reply must name the same info hash and advertise the extension
/// protocol; metadata cannot be fetched from a peer without it.
///
/// # Errors
///
/// - `TorrentError::PeerConnectionError` - If the stream fails mid-exchange
/// - `TorrentError::ProtocolError` - If the reply is malformed, for another torrent, or lacks extension support
pub async fn exchange_handshake<S>(
    stream: &mut S,
    ours: &PeerHandshake,
) -> Result<PeerHandshake, TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&HandshakeCodec::serialize_handshake(ours))
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to send handshake: {e}"),
        })?;

    let mut reply = [0u8; HANDSHAKE_LEN];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to read handshake response: {e}"),
        })?;

    let theirs = HandshakeCodec::deserialize_handshake(&reply)?;
    if theirs.info_hash != ours.info_hash {
        return Err(TorrentError::ProtocolError {
            message: format!(
                "Info hash mismatch in handshake: expected {}, got {}",
                ours.info_hash, theirs.info_hash
            ),
        });
    }
    if !theirs.supports_extensions() {
        return Err(TorrentError::ProtocolError {
            message: "Peer does not support the extension protocol".to_string(),
        });
    }

    Ok(theirs)
}
