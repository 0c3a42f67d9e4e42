//! Extension protocol handshake (BEP 10) and metadata exchange (BEP 9)

use bencode_rs::Value;
use bytes::Bytes;

use crate::torrent::TorrentError;
use crate::torrent::bencode::{BencodeWriter, extract_integer, find_dictionary_end, parse_dictionary};

/// Extended message id reserved for the extension handshake.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Extended message id we ask peers to use for `ut_metadata` messages to us.
pub const LOCAL_UT_METADATA_ID: u8 = 3;

const UT_METADATA: &[u8] = b"ut_metadata";

/// Extension handshake payload.
///
/// Only the fields metadata exchange needs are modelled; everything else a
/// peer sends is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHandshake {
    /// Id the sender wants `ut_metadata` messages addressed with
    pub ut_metadata: Option<u8>,
    /// Size of the info dictionary in bytes, when the sender has it
    pub metadata_size: Option<i64>,
    /// Client name and version (`v`)
    pub client: Option<String>,
}

impl ExtensionHandshake {
    /// Handshake we send: `ut_metadata` support and optionally our client name.
    pub fn local(client: Option<String>) -> Self {
        Self {
            ut_metadata: Some(LOCAL_UT_METADATA_ID),
            metadata_size: None,
            client,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = BencodeWriter::new();
        writer.begin_dict().string("m").begin_dict();
        if let Some(id) = self.ut_metadata {
            writer.bytes(UT_METADATA).integer(i64::from(id));
        }
        writer.end();

        if let Some(size) = self.metadata_size {
            writer.string("metadata_size").integer(size);
        }
        if let Some(client) = &self.client {
            writer.string("v").string(client);
        }
        writer.end();

        Bytes::from(writer.finish())
    }

    /// Decodes a peer's extension handshake.
    ///
    /// A `ut_metadata` id of 0 means the peer disabled the extension.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the payload is not a bencoded dictionary
    pub fn decode(payload: &[u8]) -> Result<Self, TorrentError> {
        let dict = parse_dictionary(payload).map_err(|e| TorrentError::ProtocolError {
            message: format!("Invalid extension handshake: {e}"),
        })?;

        let ut_metadata = match dict.get(b"m".as_slice()) {
            Some(Value::Dictionary(m)) => match m.get(UT_METADATA) {
                Some(Value::Integer(id)) => u8::try_from(*id).ok().filter(|&id| id != 0),
                _ => None,
            },
            _ => None,
        };

        let metadata_size = extract_integer(&dict, b"metadata_size").ok();
        let client = match dict.get(b"v".as_slice()) {
            Some(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        };

        Ok(Self {
            ut_metadata,
            metadata_size,
            client,
        })
    }
}

/// `ut_metadata` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    Request { piece: u32 },
    Data { piece: u32, total_size: i64, data: Bytes },
    Reject { piece: u32 },
}

impl MetadataMessage {
    const REQUEST: i64 = 0;
    const DATA: i64 = 1;
    const REJECT: i64 = 2;

    pub fn piece(&self) -> u32 {
        match self {
            MetadataMessage::Request { piece }
            | MetadataMessage::Data { piece, .. }
            | MetadataMessage::Reject { piece } => *piece,
        }
    }

    /// Encodes the message; data messages carry the raw chunk after the dictionary.
    pub fn encode(&self) -> Bytes {
        let mut writer = BencodeWriter::new();
        writer.begin_dict();
        match self {
            MetadataMessage::Request { piece } => {
                writer
                    .string("msg_type")
                    .integer(Self::REQUEST)
                    .string("piece")
                    .integer(i64::from(*piece));
            }
            MetadataMessage::Reject { piece } => {
                writer
                    .string("msg_type")
                    .integer(Self::REJECT)
                    .string("piece")
                    .integer(i64::from(*piece));
            }
            MetadataMessage::Data {
                piece,
                total_size,
                data,
            } => {
                writer
                    .string("msg_type")
                    .integer(Self::DATA)
                    .string("piece")
                    .integer(i64::from(*piece))
                    .string("total_size")
                    .integer(*total_size)
                    .end()
                    .raw(data);
                return Bytes::from(writer.finish());
            }
        }
        writer.end();
        Bytes::from(writer.finish())
    }

    /// Decodes a `ut_metadata` payload.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the dictionary is malformed or the type unknown
    pub fn decode(payload: &[u8]) -> Result<Self, TorrentError> {
        let protocol_error = |message: String| TorrentError::ProtocolError { message };

        let dict_end = find_dictionary_end(payload)
            .map_err(|e| protocol_error(format!("Invalid ut_metadata message: {e}")))?;
        let dict = parse_dictionary(&payload[..dict_end])
            .map_err(|e| protocol_error(format!("Invalid ut_metadata message: {e}")))?;

        let msg_type = extract_integer(&dict, b"msg_type")
            .map_err(|_| protocol_error("ut_metadata message without msg_type".to_string()))?;
        let piece = extract_integer(&dict, b"piece")
            .ok()
            .and_then(|piece| u32::try_from(piece).ok())
            .ok_or_else(|| protocol_error("ut_metadata message without valid piece".to_string()))?;

        match msg_type {
            Self::REQUEST => Ok(MetadataMessage::Request { piece }),
            Self::REJECT => Ok(MetadataMessage::Reject { piece }),
            Self::DATA => {
                let total_size = extract_integer(&dict, b"total_size").unwrap_or(-1);
                Ok(MetadataMessage::Data {
                    piece,
                    total_size,
                    data: Bytes::copy_from_slice(&payload[dict_end..]),
                })
            }
            other => Err(protocol_error(format!("Unknown ut_metadata msg_type {other}"))),
        }
    }
}
