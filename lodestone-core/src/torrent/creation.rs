//! `.torrent` file assembly and atomic write-out
//!
//! The info dictionary is spliced in verbatim so the written file hashes to
//! the same info hash the magnet link named.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::TorrentInfoDict;
use super::bencode::BencodeWriter;

/// Top-level fields describing who produced the file and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationMetadata {
    pub created_by: String,
    /// Unix seconds; omitted from output when `None`
    pub creation_date: Option<i64>,
}

impl CreationMetadata {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            creation_date: None,
        }
    }

    /// Stamps the current wall-clock time as the creation date.
    pub fn stamped_now(mut self) -> Self {
        self.creation_date = Some(chrono::Utc::now().timestamp());
        self
    }
}

/// Complete torrent ready for serialization.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    pub info: TorrentInfoDict,
    pub trackers: Vec<String>,
    pub creation: CreationMetadata,
}

impl TorrentFile {
    pub fn new(info: TorrentInfoDict, trackers: Vec<String>, creation: CreationMetadata) -> Self {
        Self {
            info,
            trackers,
            creation,
        }
    }

    /// Encodes the file as a bencoded dictionary with sorted keys.
    ///
    /// `announce` is the first tracker and `announce-list` holds one tier
    /// per tracker; both are omitted when there are no trackers.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BencodeWriter::new();
        writer.begin_dict();

        if let Some(first) = self.trackers.first() {
            writer.string("announce").string(first);
            writer.string("announce-list").begin_list();
            for tracker in &self.trackers {
                writer.begin_list().string(tracker).end();
            }
            writer.end();
        }

        writer
            .string("created by")
            .string(&self.creation.created_by);
        if let Some(date) = self.creation.creation_date {
            writer.string("creation date").integer(date);
        }

        writer.string("info").raw(self.info.raw_bytes()).end();
        writer.finish()
    }

    /// Writes the encoded file to `destination`.
    ///
    /// Bytes go to `<destination><temp_suffix>` (created exclusively), are
    /// flushed to disk and then renamed over the destination. A temporary
    /// file left behind by an interrupted run is replaced. The temporary
    /// file is removed if any later step fails. Returns the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the temporary file cannot be created, written or renamed
    pub async fn write_to(&self, destination: &Path, temp_suffix: &str) -> std::io::Result<u64> {
        let encoded = self.encode();
        let temp_path = temp_path_for(destination, temp_suffix);

        let mut file = create_temp(&temp_path).await?;

        let written = async {
            file.write_all(&encoded).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, destination).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                tracing::warn!(
                    "Failed to remove temporary file {}: {}",
                    temp_path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        tracing::debug!(
            "Wrote {} bytes to {}",
            encoded.len(),
            destination.display()
        );
        Ok(encoded.len() as u64)
    }
}

async fn create_temp(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    match options.open(path).await {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::debug!("Replacing stale temporary file {}", path.display());
            fs::remove_file(path).await?;
            options.open(path).await
        }
        result => result,
    }
}

fn temp_path_for(destination: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::torrent::bencode::{extract_string, parse_dictionary};
    use crate::torrent::info::test_support::single_file_info;

    fn sample_info() -> TorrentInfoDict {
        TorrentInfoDict::from_bytes(single_file_info("test.txt", 10, 16384, &[[0x5a; 20]]))
            .unwrap()
    }

    #[test]
    fn test_encode_without_trackers() {
        let file = TorrentFile::new(sample_info(), Vec::new(), CreationMetadata::new("lodestone/0.1.0"));
        let encoded = file.encode();

        let mut expected = b"d10:created by15:lodestone/0.1.04:info".to_vec();
        expected.extend_from_slice(file.info.raw_bytes());
        expected.push(b'e');
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_encode_with_trackers_and_date() {
        let trackers = vec![
            "udp://a.example:80".to_string(),
            "http://b.example/announce".to_string(),
        ];
        let creation = CreationMetadata {
            created_by: "lodestone/0.1.0".to_string(),
            creation_date: Some(1_700_000_000),
        };
        let file = TorrentFile::new(sample_info(), trackers, creation);
        let encoded = file.encode();

        let dict = parse_dictionary(&encoded).unwrap();
        assert_eq!(extract_string(&dict, b"announce").unwrap(), "udp://a.example:80");
        assert!(matches!(
            dict.get(b"announce-list".as_slice()),
            Some(bencode_rs::Value::List(tiers)) if tiers.len() == 2
        ));
        assert!(matches!(
            dict.get(b"creation date".as_slice()),
            Some(bencode_rs::Value::Integer(1_700_000_000))
        ));

        let info_key = encoded
            .windows(6)
            .position(|window| window == b"4:info")
            .unwrap();
        let info_bytes = &encoded[info_key + 6..encoded.len() - 1];
        assert_eq!(info_bytes, file.info.raw_bytes());
    }

    #[tokio::test]
    async fn test_write_is_atomic_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.torrent");
        let file = TorrentFile::new(
            sample_info(),
            vec!["udp://a.example:80".to_string()],
            CreationMetadata::new("lodestone/0.1.0"),
        );

        let first_len = file.write_to(&destination, ".tmp").await.unwrap();
        let first = std::fs::read(&destination).unwrap();
        file.write_to(&destination, ".tmp").await.unwrap();
        let second = std::fs::read(&destination).unwrap();

        assert_eq!(first_len as usize, first.len());
        assert_eq!(first, second);
        assert_eq!(first, file.encode());
        assert!(!dir.path().join("out.torrent.tmp").exists());
    }

    #[tokio::test]
    async fn test_stale_temp_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.torrent");
        std::fs::write(dir.path().join("out.torrent.tmp"), b"partial").unwrap();
        let file = TorrentFile::new(sample_info(), Vec::new(), CreationMetadata::new("x"));

        file.write_to(&destination, ".tmp").await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), file.encode());
        assert!(!dir.path().join("out.torrent.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("missing").join("out.torrent");
        let file = TorrentFile::new(sample_info(), Vec::new(), CreationMetadata::new("x"));

        assert!(file.write_to(&destination, ".tmp").await.is_err());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory at the destination makes the rename fail
        let destination = dir.path().join("taken");
        std::fs::create_dir(&destination).unwrap();
        std::fs::write(destination.join("keep"), b"x").unwrap();

        let file = TorrentFile::new(sample_info(), Vec::new(), CreationMetadata::new("x"));
        assert!(file.write_to(&destination, ".tmp").await.is_err());
        assert!(!dir.path().join("taken.tmp").exists());
    }

    #[test]
    fn test_stamped_now_sets_date() {
        let creation = CreationMetadata::new("x").stamped_now();
        assert!(creation.creation_date.unwrap() > 1_600_000_000);
    }
}
