//! Buffer metadata and caller-held block references

use crate::fs::block_dev::{BlockNo, DevId};
use bitflags::bitflags;

bitflags! {
    /// Buffer state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u8 {
        /// Data reflects the on-disk content as of the last read
        const VALID  = 0x01;
        /// Data has been modified since the last write-back
        const DIRTY  = 0x02;
        /// Sleep lock held; only the holder may touch data
        const LOCKED = 0x04;
        /// A device transfer is in flight for this buffer
        const BUSY   = 0x08;
    }
}

/// One slot of the buffer arena
///
/// Free-list and hash-bucket membership are index links into the same
/// arena, so unlinking a buffer is O(1) and the hot path never
/// allocates. A buffer is on the free list iff `count == 0`, and in
/// exactly one hash bucket once it has been assigned an identity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Buffer {
    /// Device identity, (0, 0) before first assignment
    pub dev: DevId,
    pub num: BlockNo,

    /// Reference count; non-zero keeps the buffer off the free list
    pub count: u32,

    /// State flags
    pub flags: BufFlags,

    /// Free list links, None when not on the free list
    pub free_prev: Option<usize>,
    pub free_next: Option<usize>,

    /// Hash bucket links, None when unhashed or at a chain end
    pub hash_prev: Option<usize>,
    pub hash_next: Option<usize>,

    /// Whether the buffer is linked into a hash bucket
    pub hashed: bool,
}

impl Buffer {
    pub(crate) const EMPTY: Buffer = Buffer {
        dev: 0,
        num: 0,
        count: 0,
        flags: BufFlags::empty(),
        free_prev: None,
        free_next: None,
        hash_prev: None,
        hash_next: None,
        hashed: false,
    };
}

/// Caller-held reference to a buffer in the cache
///
/// Returned locked and counted by `read_block`; must be given back with
/// `release_block`. Dropping one without releasing pins the buffer for
/// good. Not clonable: each reference accounts for exactly one unit of
/// the buffer's count.
#[must_use]
#[derive(Debug)]
pub struct BlockRef {
    pub(crate) idx: usize,
    pub(crate) dev: DevId,
    pub(crate) num: BlockNo,
}

impl BlockRef {
    pub(crate) fn new(idx: usize, dev: DevId, num: BlockNo) -> Self {
        Self { idx, dev, num }
    }

    /// Arena slot this reference points at
    pub fn slot(&self) -> usize {
        self.idx
    }

    /// Device the cached block belongs to
    pub fn dev(&self) -> DevId {
        self.dev
    }

    /// Block number on the device
    pub fn num(&self) -> BlockNo {
        self.num
    }
}
