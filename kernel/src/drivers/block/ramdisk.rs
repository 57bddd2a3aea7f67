//! Memory-backed block device
//!
//! Serves blocks for any device number out of a map of written blocks;
//! unwritten blocks read back as zeros. Used for early bring-up before
//! a real disk driver is probed, and by the test suite, which also
//! relies on the transfer counters to observe cache behavior.

use crate::config::BLOCK_SIZE;
use crate::fs::block_dev::{BlockDevice, BlockError, BlockNo, DevId};
use spin::Mutex;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

/// RAM-backed block device
pub struct RamDisk {
    blocks: Mutex<BTreeMap<(DevId, BlockNo), Box<[u8]>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    /// Create an empty RAM disk
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of block reads served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of block writes absorbed
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Pre-load a block with a repeated byte
    pub fn fill_block(&self, dev: DevId, num: BlockNo, byte: u8) {
        let mut blocks = self.blocks.lock();
        blocks.insert((dev, num), alloc::vec![byte; BLOCK_SIZE].into_boxed_slice());
    }

    /// Peek at a stored block, if it was ever written
    pub fn peek_block(&self, dev: DevId, num: BlockNo) -> Option<Box<[u8]>> {
        self.blocks.lock().get(&(dev, num)).cloned()
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, dev: DevId, num: BlockNo, data: &mut [u8]) -> Result<(), BlockError> {
        if data.len() != BLOCK_SIZE {
            return Err(BlockError::BadBufferSize);
        }

        self.reads.fetch_add(1, Ordering::Relaxed);

        let blocks = self.blocks.lock();
        match blocks.get(&(dev, num)) {
            Some(block) => data.copy_from_slice(block),
            None => data.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, dev: DevId, num: BlockNo, data: &[u8]) -> Result<(), BlockError> {
        if data.len() != BLOCK_SIZE {
            return Err(BlockError::BadBufferSize);
        }

        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut blocks = self.blocks.lock();
        blocks.insert((dev, num), data.into());
        Ok(())
    }

    fn name(&self) -> &str {
        "ram0"
    }
}
