//! BitTorrent wire protocol message framing

use bytes::{Buf, BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::PeerMessage;
use crate::torrent::TorrentError;

/// Message id of extension protocol messages (BEP 10).
pub const EXTENDED_MESSAGE_ID: u8 = 20;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Message serialization utilities for BitTorrent wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Serializes peer message with its 4-byte length prefix
    pub fn serialize_message(message: &PeerMessage) -> Vec<u8> {
        let mut buf = Vec::new();

        match message {
            PeerMessage::KeepAlive => buf.put_u32(0),
            PeerMessage::Choke => Self::put_header(&mut buf, 0, 0),
            PeerMessage::Unchoke => Self::put_header(&mut buf, 1, 0),
            PeerMessage::Interested => Self::put_header(&mut buf, 2, 0),
            PeerMessage::NotInterested => Self::put_header(&mut buf, 3, 0),
            PeerMessage::Have { piece_index } => {
                Self::put_header(&mut buf, 4, 4);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                Self::put_header(&mut buf, 5, bitfield.len());
                buf.extend_from_slice(bitfield);
            }
            PeerMessage::Extended { id, payload } => {
                Self::put_header(&mut buf, EXTENDED_MESSAGE_ID, 1 + payload.len());
                buf.put_u8(*id);
                buf.extend_from_slice(payload);
            }
            PeerMessage::Unknown { id, payload } => {
                Self::put_header(&mut buf, *id, payload.len());
                buf.extend_from_slice(payload);
            }
        }

        buf
    }

    fn put_header(buf: &mut Vec<u8>, id: u8, body_len: usize) {
        buf.put_u32(1 + body_len as u32);
        buf.put_u8(id);
    }

    /// Deserializes one message body (the bytes after the length prefix)
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Body too short for its message id
    pub fn deserialize_body(body: &[u8]) -> Result<PeerMessage, TorrentError> {
        let mut buf = body;
        if !buf.has_remaining() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = buf.get_u8();
        let message = match message_id {
            0 => PeerMessage::Choke,
            1 => PeerMessage::Unchoke,
            2 => PeerMessage::Interested,
            3 => PeerMessage::NotInterested,
            4 => {
                if buf.remaining() != 4 {
                    return Err(TorrentError::ProtocolError {
                        message: "Invalid Have message length".to_string(),
                    });
                }
                PeerMessage::Have {
                    piece_index: buf.get_u32(),
                }
            }
            5 => PeerMessage::Bitfield {
                bitfield: Bytes::copy_from_slice(buf),
            },
            EXTENDED_MESSAGE_ID => {
                if !buf.has_remaining() {
                    return Err(TorrentError::ProtocolError {
                        message: "Extended message without extended id".to_string(),
                    });
                }
                let id = buf.get_u8();
                PeerMessage::Extended {
                    id,
                    payload: Bytes::copy_from_slice(buf),
                }
            }
            id => PeerMessage::Unknown {
                id,
                payload: Bytes::copy_from_slice(buf),
            },
        };

        Ok(message)
    }
}

/// Reads one length-prefixed message.
///
/// # Errors
///
/// - `TorrentError::PeerConnectionError` - If the stream closes or fails
/// - `TorrentError::ProtocolError` - If the frame exceeds `max_frame_len` or is malformed
pub async fn read_message<R>(reader: &mut R, max_frame_len: usize) -> Result<PeerMessage, TorrentError>
where
    R: AsyncRead + Unpin,
{
    let length = reader
        .read_u32()
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to read message length: {e}"),
        })? as usize;

    if length > max_frame_len {
        return Err(TorrentError::ProtocolError {
            message: format!("Frame of {length} bytes exceeds limit of {max_frame_len}"),
        });
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to read message payload: {e}"),
        })?;

    MessageCodec::deserialize_body(&body)
}

/// Writes one message and flushes it.
///
/// # Errors
///
/// - `TorrentError::PeerConnectionError` - If the write fails
pub async fn write_message<W>(writer: &mut W, message: &PeerMessage) -> Result<(), TorrentError>
where
    W: AsyncWrite + Unpin,
{
    let frame = MessageCodec::serialize_message(message);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to send message: {e}"),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| TorrentError::PeerConnectionError {
            reason: format!("Failed to flush message: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    fn body(frame: &[u8]) -> &[u8] {
        &frame[4..]
    }

    #[test]
    fn test_message_serialization() {
        let test_cases = vec![
            PeerMessage::Choke,
            PeerMessage::Unchoke,
            PeerMessage::Interested,
            PeerMessage::NotInterested,
            PeerMessage::Have { piece_index: 42 },
            PeerMessage::Bitfield {
                bitfield: Bytes::from_static(&[0xff, 0x80]),
            },
            PeerMessage::Extended {
                id: 3,
                payload: Bytes::from_static(b"d8:msg_typei0e5:piecei0ee"),
            },
        ];

        for original in test_cases {
            let frame = MessageCodec::serialize_message(&original);
            let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
            assert_eq!(length, frame.len() - 4);
            assert_eq!(MessageCodec::deserialize_body(body(&frame)).unwrap(), original);
        }
    }

    #[test]
    fn test_keep_alive_is_empty_frame() {
        assert_eq!(
            MessageCodec::serialize_message(&PeerMessage::KeepAlive),
            vec![0, 0, 0, 0]
        );
        assert_eq!(
            MessageCodec::deserialize_body(&[]).unwrap(),
            PeerMessage::KeepAlive
        );
    }

    #[test]
    fn test_piece_transfer_ids_decode_as_unknown() {
        // request: index 1, begin 0, length 16384
        let request = [6, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0x40, 0];
        let message = MessageCodec::deserialize_body(&request).unwrap();
        assert!(matches!(message, PeerMessage::Unknown { id: 6, .. }));
    }

    #[test]
    fn test_malformed_bodies_rejected() {
        assert!(MessageCodec::deserialize_body(&[4, 0, 0]).is_err());
        assert!(MessageCodec::deserialize_body(&[EXTENDED_MESSAGE_ID]).is_err());
    }

    #[tokio::test]
    async fn test_read_message_from_stream() {
        let frame = MessageCodec::serialize_message(&PeerMessage::Extended {
            id: 0,
            payload: Bytes::from_static(b"de"),
        });
        let mut stream = Builder::new().read(&frame[..3]).read(&frame[3..]).build();

        let message = read_message(&mut stream, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(
            message,
            PeerMessage::Extended {
                id: 0,
                payload: Bytes::from_static(b"de")
            }
        );
    }

    #[tokio::test]
    async fn test_read_message_rejects_oversized_frame() {
        let mut stream = Builder::new().read(&[0x00, 0x20, 0x00, 0x01]).build();
        let result = read_message(&mut stream, MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(TorrentError::ProtocolError { .. })));
    }

    #[tokio::test]
    async fn test_read_message_reports_eof() {
        let mut stream = Builder::new().read(&[0, 0, 0, 5, 4]).build();
        let result = read_message(&mut stream, MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(TorrentError::PeerConnectionError { .. })));
    }

    #[tokio::test]
    async fn test_write_message_to_stream() {
        let message = PeerMessage::Interested;
        let mut stream = Builder::new()
            .write(&MessageCodec::serialize_message(&message))
            .build();
        write_message(&mut stream, &message).await.unwrap();
    }
}
