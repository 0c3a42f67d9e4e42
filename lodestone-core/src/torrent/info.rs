//! Info dictionary model: verbatim bytes plus a decoded view

use bencode_rs::Value;

use super::bencode::{BencodeDict, extract_bytes, extract_integer, parse_dictionary};
use super::{InfoHash, TorrentError};

/// One file described by the info dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: i64,
}

/// Info dictionary as received from peers.
///
/// `raw` is kept byte-for-byte; its SHA-1 is the info hash and it is written
/// into the output file unchanged. The decoded fields are a read-only view
/// used for validation and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfoDict {
    raw: Vec<u8>,
    pub name: String,
    pub piece_length: i64,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<FileEntry>,
    pub total_length: i64,
    pub multi_file: bool,
}

impl TorrentInfoDict {
    /// Decodes raw info dictionary bytes.
    ///
    /// Structural problems (not a dictionary, missing keys, wrong types,
    /// `pieces` not a multiple of 20) fail here. Semantic checks live in
    /// [`TorrentInfoDict::is_valid`].
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If the bytes are not a decodable info dictionary
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, TorrentError> {
        let (name, piece_length, piece_hashes, files, multi_file) = {
            let dict = parse_dictionary(&raw)?;

            let name = String::from_utf8_lossy(extract_bytes(&dict, b"name")?).into_owned();
            let piece_length = extract_integer(&dict, b"piece length")?;

            let pieces = extract_bytes(&dict, b"pieces")?;
            if !pieces.len().is_multiple_of(20) {
                return Err(TorrentError::InvalidTorrentFile {
                    reason: format!("Invalid pieces length: {}", pieces.len()),
                });
            }
            let piece_hashes = pieces
                .chunks_exact(20)
                .map(|chunk| {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect::<Vec<_>>();

            let (files, multi_file) = match extract_integer(&dict, b"length") {
                Ok(length) => (
                    vec![FileEntry {
                        path: vec![name.clone()],
                        length,
                    }],
                    false,
                ),
                Err(_) => (extract_files(&dict)?, true),
            };

            (name, piece_length, piece_hashes, files, multi_file)
        };

        let total_length = files
            .iter()
            .try_fold(0i64, |total, file| total.checked_add(file.length))
            .ok_or_else(|| TorrentError::InvalidTorrentFile {
                reason: "Total length overflows".to_string(),
            })?;

        Ok(Self {
            raw,
            name,
            piece_length,
            piece_hashes,
            files,
            total_length,
            multi_file,
        })
    }

    /// Verbatim bencoded bytes.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// SHA-1 of the verbatim bytes.
    pub fn info_hash(&self) -> InfoHash {
        InfoHash::of_info_bytes(&self.raw)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Checks the decoded view for internal consistency.
    ///
    /// Name must be non-empty, piece length positive, the piece count must
    /// match `ceil(total_length / piece_length)`, no file length may be
    /// negative and every multi-file path needs at least one component.
    pub fn is_valid(&self) -> bool {
        self.validation_error().is_none()
    }

    /// Describes the first consistency problem found, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.name.is_empty() {
            return Some("empty name".to_string());
        }
        if self.piece_length <= 0 {
            return Some(format!("piece length {} is not positive", self.piece_length));
        }
        if let Some(file) = self.files.iter().find(|file| file.length < 0) {
            return Some(format!(
                "file {} has negative length {}",
                file.path.join("/"),
                file.length
            ));
        }
        if self.multi_file
            && self
                .files
                .iter()
                .any(|file| file.path.is_empty() || file.path.iter().all(String::is_empty))
        {
            return Some("file entry with empty path".to_string());
        }

        let expected_pieces = (self.total_length as u64).div_ceil(self.piece_length as u64);
        if self.piece_hashes.len() as u64 != expected_pieces {
            return Some(format!(
                "{} piece hashes for {} bytes at piece length {} (expected {})",
                self.piece_hashes.len(),
                self.total_length,
                self.piece_length,
                expected_pieces
            ));
        }

        None
    }
}

/// Extract files information from multi-file info dictionary
fn extract_files(dict: &BencodeDict<'_>) -> Result<Vec<FileEntry>, TorrentError> {
    let Some(Value::List(files_list)) = dict.get(b"files".as_slice()) else {
        return Err(TorrentError::InvalidTorrentFile {
            reason: "Missing 'files' or 'length' field".to_string(),
        });
    };

    let mut files = Vec::with_capacity(files_list.len());
    for file_value in files_list {
        let Value::Dictionary(file_dict) = file_value else {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Invalid file entry type".to_string(),
            });
        };

        let length = extract_integer(file_dict, b"length")?;
        let Some(Value::List(path_list)) = file_dict.get(b"path".as_slice()) else {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Missing or invalid path in file".to_string(),
            });
        };

        let path = path_list
            .iter()
            .map(|component| match component {
                Value::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
                _ => Err(TorrentError::InvalidTorrentFile {
                    reason: "Invalid path component type".to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        files.push(FileEntry { path, length });
    }

    Ok(files)
}
