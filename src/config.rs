use crate::error::QueueError;

/// Validated construction parameters for [`crate::queue::PersistentQueue`].
///
/// Built with [`QueueConfig::new`], which returns a `Result` — bad
/// parameters are a caller mistake surfaced as
/// [`QueueError::IllegalArgument`], not a process abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    block_size: u32,
    file_size: u32,
}

impl QueueConfig {
    /// Validates `block_size`/`file_size` against the queue's construction
    /// rules.
    ///
    /// Fails fast when: `block_size < 4`; `file_size < block_size`;
    /// `file_size % block_size != 0`; or the header would consume every
    /// block, leaving no room for the ring area.
    pub fn new(block_size: u32, file_size: u32) -> Result<Self, QueueError> {
        if block_size < 4 {
            return Err(QueueError::IllegalArgument(format!(
                "block_size must be >= 4, got {block_size}"
            )));
        }
        if file_size < block_size {
            return Err(QueueError::IllegalArgument(format!(
                "file_size {file_size} must be >= block_size {block_size}"
            )));
        }
        if file_size % block_size != 0 {
            return Err(QueueError::IllegalArgument(format!(
                "file_size {file_size} must be a multiple of block_size {block_size}"
            )));
        }
        let cfg = Self {
            block_size,
            file_size,
        };
        if cfg.usable_blocks() == 0 {
            return Err(QueueError::IllegalArgument(
                "file_size leaves no usable blocks after the header".to_string(),
            ));
        }
        Ok(cfg)
    }

    #[inline]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub const fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Blocks occupied by the 20-byte header, `ceil(20 / block_size)`.
    #[inline]
    pub const fn header_blocks(&self) -> u32 {
        ceil_div(HEADER_BYTES, self.block_size)
    }

    /// Byte offset of the first block in the ring area.
    #[inline]
    pub const fn first_usable_block(&self) -> u32 {
        self.header_blocks() * self.block_size
    }

    /// Number of bytes in the ring area.
    #[inline]
    pub const fn ring_bytes(&self) -> u32 {
        self.file_size - self.first_usable_block()
    }

    /// Number of whole blocks in the ring area; the producer semaphore's
    /// initial permit count.
    #[inline]
    pub const fn usable_blocks(&self) -> u32 {
        self.ring_bytes() / self.block_size
    }

    /// Blocks required to hold a record whose payload is `payload_len` bytes.
    #[inline]
    pub const fn blocks_for_payload(&self, payload_len: u32) -> u32 {
        ceil_div(RECORD_LEN_PREFIX_BYTES + payload_len, self.block_size)
    }
}

/// Size in bytes of the on-disk file header.
pub const HEADER_BYTES: u32 = 20;

/// Size in bytes of a record's length prefix.
pub const RECORD_LEN_PREFIX_BYTES: u32 = 4;

#[inline]
const fn ceil_div(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_block_size_below_four() {
        assert!(QueueConfig::new(3, 100).is_err());
    }

    #[test]
    fn rejects_non_multiple_file_size() {
        assert!(QueueConfig::new(8, 17).is_err());
    }

    #[test]
    fn rejects_file_smaller_than_block() {
        assert!(QueueConfig::new(64, 32).is_err());
    }

    #[test]
    fn boundary_block_size_four() {
        // smallest legal block size, with just one usable block in the ring
        let cfg = QueueConfig::new(4, 24).unwrap();
        assert_eq!(cfg.header_blocks(), 5); // ceil(20/4)
        assert_eq!(cfg.first_usable_block(), 20);
        assert_eq!(cfg.ring_bytes(), 4);
        assert_eq!(cfg.usable_blocks(), 1);
    }

    #[test]
    fn rejects_no_usable_blocks() {
        // file_size == first_usable_block leaves zero ring bytes
        assert!(QueueConfig::new(4, 20).is_err());
    }

    #[test]
    fn blocks_for_payload_rounds_up() {
        let cfg = QueueConfig::new(10, 110).unwrap();
        assert_eq!(cfg.blocks_for_payload(0), 1); // ceil(4/10)
        assert_eq!(cfg.blocks_for_payload(6), 1); // ceil(10/10)
        assert_eq!(cfg.blocks_for_payload(7), 2); // ceil(11/10)
    }
}
