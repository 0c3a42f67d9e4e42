//! Metadata buffer for assembling the info dictionary from 16 KiB chunks

use super::TorrentError;

/// Size of a metadata chunk; only the last chunk may be shorter.
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Missing,
    InFlight,
    Received,
}

/// Accumulates metadata chunks until the declared size is covered.
///
/// The total size is fixed at creation. Chunks are handed out one at a
/// time through [`MetadataBuffer::reserve_piece`], returned with
/// [`MetadataBuffer::release_piece`] on reject or disconnect, and stored
/// with [`MetadataBuffer::store_piece`]. A complete buffer is consumed by
/// [`MetadataBuffer::into_bytes`].
#[derive(Debug)]
pub struct MetadataBuffer {
    data: Vec<u8>,
    chunks: Vec<ChunkState>,
    received: usize,
}

impl MetadataBuffer {
    /// Creates buffer for `total_size` bytes.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the size is zero, negative, or above `max_size`
    pub fn new(total_size: i64, max_size: usize) -> Result<Self, TorrentError> {
        let size = usize::try_from(total_size)
            .ok()
            .filter(|&size| size > 0 && size <= max_size)
            .ok_or_else(|| TorrentError::ProtocolError {
                message: format!("metadata_size {total_size} outside 1..={max_size}"),
            })?;

        let piece_count = size.div_ceil(METADATA_PIECE_SIZE);
        Ok(Self {
            data: vec![0u8; size],
            chunks: vec![ChunkState::Missing; piece_count],
            received: 0,
        })
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn piece_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn received_pieces(&self) -> usize {
        self.received
    }

    pub fn received_bytes(&self) -> usize {
        (0..self.chunks.len())
            .filter(|&index| self.chunks[index] == ChunkState::Received)
            .filter_map(|index| self.piece_len(index as u32))
            .sum()
    }

    /// Expected length of chunk `index`, `None` when out of range.
    pub fn piece_len(&self, index: u32) -> Option<usize> {
        let index = index as usize;
        if index >= self.chunks.len() {
            return None;
        }
        let start = index * METADATA_PIECE_SIZE;
        Some((self.data.len() - start).min(METADATA_PIECE_SIZE))
    }

    /// Marks the lowest missing chunk as in flight and returns its index.
    pub fn reserve_piece(&mut self) -> Option<u32> {
        let index = self
            .chunks
            .iter()
            .position(|state| *state == ChunkState::Missing)?;
        self.chunks[index] = ChunkState::InFlight;
        Some(index as u32)
    }

    /// Returns an in-flight chunk to the pool.
    pub fn release_piece(&mut self, index: u32) {
        if let Some(state) = self.chunks.get_mut(index as usize)
            && *state == ChunkState::InFlight
        {
            *state = ChunkState::Missing;
        }
    }

    /// Stores chunk `index`. Returns `true` once every chunk has arrived.
    ///
    /// Duplicate chunks are ignored.
    ///
    /// # Errors
    ///
    /// - `TorrentError::ProtocolError` - If the index is out of range or the length is wrong
    pub fn store_piece(&mut self, index: u32, data: &[u8]) -> Result<bool, TorrentError> {
        let expected = self
            .piece_len(index)
            .ok_or_else(|| TorrentError::ProtocolError {
                message: format!(
                    "metadata piece {index} out of range ({} pieces)",
                    self.chunks.len()
                ),
            })?;

        if data.len() != expected {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "metadata piece {index} is {} bytes, expected {expected}",
                    data.len()
                ),
            });
        }

        let slot = index as usize;
        if self.chunks[slot] != ChunkState::Received {
            let start = slot * METADATA_PIECE_SIZE;
            self.data[start..start + expected].copy_from_slice(data);
            self.chunks[slot] = ChunkState::Received;
            self.received += 1;
        }

        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    /// Freezes the buffer and yields the assembled bytes.
    ///
    /// Returns the buffer unchanged when chunks are still missing.
    pub fn into_bytes(self) -> Result<Vec<u8>, Self> {
        if self.is_complete() {
            Ok(self.data)
        } else {
            Err(self)
        }
    }
}
