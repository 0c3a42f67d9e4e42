//! Bencode helpers shared by the metadata model, extension messages and trackers
//!
//! Decoding goes through `bencode_rs`; encoding is a small writer since every
//! dictionary this crate emits has a fixed, known key set.

use std::collections::HashMap;

use bencode_rs::Value;

use crate::torrent::TorrentError;

pub type BencodeDict<'a> = HashMap<&'a [u8], Value<'a>>;

/// Parses `data` as exactly one bencoded dictionary.
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - If the data is not a single bencoded dictionary
pub fn parse_dictionary(data: &[u8]) -> Result<BencodeDict<'_>, TorrentError> {
    let parsed = Value::parse(data).map_err(|e| TorrentError::InvalidTorrentFile {
        reason: format!("Bencode parsing failed: {e:?}"),
    })?;

    let mut values = parsed.into_iter();
    match (values.next(), values.next()) {
        (Some(Value::Dictionary(dict)), None) => Ok(dict),
        (Some(Value::Dictionary(_)), Some(_)) => Err(TorrentError::InvalidTorrentFile {
            reason: "Trailing data after dictionary".to_string(),
        }),
        (Some(_), _) => Err(TorrentError::InvalidTorrentFile {
            reason: "Root element must be dictionary".to_string(),
        }),
        (None, _) => Err(TorrentError::InvalidTorrentFile {
            reason: "Empty bencode data".to_string(),
        }),
    }
}

/// Extract bytes from bencode dictionary
pub fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> Result<&'a [u8], TorrentError> {
    match dict.get(key) {
        Some(Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(TorrentError::InvalidTorrentFile {
            reason: format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ),
        }),
    }
}

/// Extract integer from bencode dictionary
pub fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> Result<i64, TorrentError> {
    match dict.get(key) {
        Some(Value::Integer(value)) => Ok(*value),
        _ => Err(TorrentError::InvalidTorrentFile {
            reason: format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ),
        }),
    }
}

/// Extract UTF-8 string from bencode dictionary
pub fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> Result<String, TorrentError> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| TorrentError::InvalidTorrentFile {
        reason: format!("Invalid UTF-8 in field: {:?}", String::from_utf8_lossy(key)),
    })
}

/// Find the end position of a bencode dictionary at the start of `data`.
///
/// Used where a dictionary is followed by raw payload, as in metadata
/// `data` messages.
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - If invalid bencode dictionary format
pub fn find_dictionary_end(data: &[u8]) -> Result<usize, TorrentError> {
    let invalid = |reason: &str| TorrentError::InvalidTorrentFile {
        reason: reason.to_string(),
    };

    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }

    let mut pos = 1; // Skip initial 'd'
    let mut depth = 1;

    while pos < data.len() && depth > 0 {
        match data[pos] {
            b'd' | b'l' => {
                depth += 1;
                pos += 1;
            }
            b'e' => {
                depth -= 1;
                pos += 1;
            }
            b'i' => {
                let end = data[pos..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| invalid("Unterminated integer"))?;
                pos += end + 1;
            }
            b'0'..=b'9' => {
                let colon = data[pos..]
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or_else(|| invalid("Invalid string format"))?;
                let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| invalid("Invalid string length"))?;

                pos += colon + 1;
                if data.len() - pos < length {
                    return Err(invalid("String runs past end of data"));
                }
                pos += length;
            }
            _ => return Err(invalid("Invalid bencode character")),
        }
    }

    if depth != 0 {
        return Err(invalid("Incomplete bencode dictionary"));
    }

    Ok(pos)
}

/// Minimal bencode writer.
///
/// Callers emit dictionary keys in sorted order themselves.
#[derive(Debug, Default)]
pub struct BencodeWriter {
    buffer: Vec<u8>,
}

impl BencodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buffer
            .extend_from_slice(value.len().to_string().as_bytes());
        self.buffer.push(b':');
        self.buffer.extend_from_slice(value);
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub fn integer(&mut self, value: i64) -> &mut Self {
        self.buffer.push(b'i');
        self.buffer.extend_from_slice(value.to_string().as_bytes());
        self.buffer.push(b'e');
        self
    }

    pub fn begin_dict(&mut self) -> &mut Self {
        self.buffer.push(b'd');
        self
    }

    pub fn begin_list(&mut self) -> &mut Self {
        self.buffer.push(b'l');
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.buffer.push(b'e');
        self
    }

    /// Splices already-encoded bencode verbatim.
    pub fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(encoded);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}
