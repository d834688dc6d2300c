use memmap2::MmapMut;

use crate::config::{QueueConfig, HEADER_BYTES};
use crate::error::QueueError;

/// The 20-byte on-disk header: `file_size | block_size | count | head |
/// tail`, each a big-endian `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub file_size: u32,
    pub block_size: u32,
    pub count: u32,
    pub head: u32,
    pub tail: u32,
}

impl FileHeader {
    /// The header written to a brand-new file: empty, cursors at the
    /// first usable block.
    pub fn fresh(cfg: &QueueConfig) -> Self {
        let fub = cfg.first_usable_block();
        Self {
            file_size: cfg.file_size(),
            block_size: cfg.block_size(),
            count: 0,
            head: fub,
            tail: fub,
        }
    }

    pub fn read(mmap: &MmapMut) -> Result<Self, QueueError> {
        if (mmap.len() as u32) < HEADER_BYTES {
            return Err(QueueError::IllegalState(
                "file too small to contain a header".to_string(),
            ));
        }
        let b = &mmap[0..HEADER_BYTES as usize];
        let file_size = i32::from_be_bytes(b[0..4].try_into().unwrap());
        let block_size = i32::from_be_bytes(b[4..8].try_into().unwrap());
        let count = i32::from_be_bytes(b[8..12].try_into().unwrap());
        let head = i32::from_be_bytes(b[12..16].try_into().unwrap());
        let tail = i32::from_be_bytes(b[16..20].try_into().unwrap());
        if file_size < 0 || block_size < 0 || count < 0 || head < 0 || tail < 0 {
            return Err(QueueError::IllegalState(
                "negative value in on-disk header".to_string(),
            ));
        }
        Ok(Self {
            file_size: file_size as u32,
            block_size: block_size as u32,
            count: count as u32,
            head: head as u32,
            tail: tail as u32,
        })
    }

    pub fn write(&self, mmap: &mut MmapMut) {
        mmap[0..4].copy_from_slice(&(self.file_size as i32).to_be_bytes());
        mmap[4..8].copy_from_slice(&(self.block_size as i32).to_be_bytes());
        mmap[8..12].copy_from_slice(&(self.count as i32).to_be_bytes());
        mmap[12..16].copy_from_slice(&(self.head as i32).to_be_bytes());
        mmap[16..20].copy_from_slice(&(self.tail as i32).to_be_bytes());
    }

    /// Fails fast (`IllegalState`) if a reopened file's header disagrees
    /// with the constructor's parameters.
    pub fn validate_against(&self, cfg: &QueueConfig) -> Result<(), QueueError> {
        if self.file_size != cfg.file_size() || self.block_size != cfg.block_size() {
            return Err(QueueError::IllegalState(format!(
                "existing header (file_size={}, block_size={}) disagrees with constructor \
                 parameters (file_size={}, block_size={})",
                self.file_size,
                self.block_size,
                cfg.file_size(),
                cfg.block_size()
            )));
        }
        Ok(())
    }

    /// Bytes of the ring area currently occupied by live records, derived
    /// from `count`/`head`/`tail` without scanning individual records.
    /// `head == tail` is ambiguous between empty and completely full;
    /// `count` disambiguates.
    pub fn occupied_bytes(&self, cfg: &QueueConfig) -> u32 {
        if self.count == 0 {
            0
        } else if self.head == self.tail {
            cfg.ring_bytes()
        } else {
            ring_distance(self.head, self.tail, cfg)
        }
    }
}

/// Forward distance from `head` to `tail` along the ring, handling
/// wrap-around.
pub fn ring_distance(head: u32, tail: u32, cfg: &QueueConfig) -> u32 {
    if tail >= head {
        tail - head
    } else {
        (cfg.file_size() - head) + (tail - cfg.first_usable_block())
    }
}

/// Rounds `value` up to the next multiple of `block_size`.
pub fn block_align_up(value: u32, block_size: u32) -> u32 {
    let rem = value % block_size;
    if rem == 0 {
        value
    } else {
        value + (block_size - rem)
    }
}

/// Normalizes a block-aligned position that may have landed exactly on
/// (or, defensively, past) `file_size` back into the ring area. This is
/// the proactive-normalization choice for the tail-at-`file_size` open
/// question: cursors never transiently hold a past-the-end value across a
/// write-lock release.
pub fn advance_wrapping(position: u32, cfg: &QueueConfig) -> u32 {
    if position >= cfg.file_size() {
        cfg.first_usable_block() + (position - cfg.file_size())
    } else {
        position
    }
}

/// Where writing (or reading) `len` bytes starting at `pos` ends up,
/// wrapping at `file_size` back to `first_usable_block` at most once.
/// Relies on the caller never asking for more than `usable_blocks` worth
/// of bytes in a single record.
pub fn wrap_position(pos: u32, len: u32, cfg: &QueueConfig) -> u32 {
    let remaining = cfg.file_size() - pos;
    if len <= remaining {
        pos + len
    } else {
        cfg.first_usable_block() + (len - remaining)
    }
}

/// Writes `data` starting at `pos`, splitting across the `file_size`
/// boundary into a prefix ending at `file_size` and a suffix resuming at
/// `first_usable_block` if it doesn't fit contiguously.
pub fn write_bytes_wrapping(mmap: &mut MmapMut, pos: u32, data: &[u8], cfg: &QueueConfig) {
    let remaining = (cfg.file_size() - pos) as usize;
    let p = pos as usize;
    if data.len() <= remaining {
        mmap[p..p + data.len()].copy_from_slice(data);
    } else {
        mmap[p..p + remaining].copy_from_slice(&data[..remaining]);
        let second_start = cfg.first_usable_block() as usize;
        let second_len = data.len() - remaining;
        mmap[second_start..second_start + second_len].copy_from_slice(&data[remaining..]);
    }
}

/// Reads `len` bytes starting at `pos`, reassembling a wrapped record
/// split at the `file_size` boundary.
pub fn read_bytes_wrapping(mmap: &MmapMut, pos: u32, len: u32, cfg: &QueueConfig) -> Vec<u8> {
    let remaining = (cfg.file_size() - pos) as usize;
    let p = pos as usize;
    let len = len as usize;
    let mut out = vec![0u8; len];
    if len <= remaining {
        out.copy_from_slice(&mmap[p..p + len]);
    } else {
        out[..remaining].copy_from_slice(&mmap[p..p + remaining]);
        let second_start = cfg.first_usable_block() as usize;
        out[remaining..].copy_from_slice(&mmap[second_start..second_start + (len - remaining)]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_distance_no_wrap() {
        let cfg = QueueConfig::new(10, 110).unwrap();
        assert_eq!(ring_distance(20, 50, &cfg), 30);
    }

    #[test]
    fn ring_distance_with_wrap() {
        let cfg = QueueConfig::new(10, 110).unwrap();
        // head near the end, tail wrapped back to the start of the ring
        assert_eq!(ring_distance(100, 30, &cfg), 10 + 10);
    }

    #[test]
    fn occupied_bytes_distinguishes_empty_from_full() {
        let cfg = QueueConfig::new(10, 110).unwrap();
        let empty = FileHeader {
            file_size: 110,
            block_size: 10,
            count: 0,
            head: 20,
            tail: 20,
        };
        let full = FileHeader {
            count: 5,
            ..empty
        };
        assert_eq!(empty.occupied_bytes(&cfg), 0);
        assert_eq!(full.occupied_bytes(&cfg), cfg.ring_bytes());
    }

    #[test]
    fn advance_wrapping_normalizes_at_file_size() {
        let cfg = QueueConfig::new(10, 110).unwrap();
        assert_eq!(advance_wrapping(110, &cfg), cfg.first_usable_block());
        assert_eq!(advance_wrapping(100, &cfg), 100);
    }

    #[test]
    fn block_align_up_rounds_correctly() {
        assert_eq!(block_align_up(0, 10), 0);
        assert_eq!(block_align_up(1, 10), 10);
        assert_eq!(block_align_up(10, 10), 10);
        assert_eq!(block_align_up(11, 10), 20);
    }
}
