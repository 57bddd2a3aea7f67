//! The block buffer cache pool
//!
//! A fixed arena of buffers indexed two ways: a hash table keyed by
//! (device, block number) for lookups, and a doubly-linked free list of
//! unreferenced buffers ordered so the head is the preferred eviction
//! victim. Buffers released clean go back to the head for quick reuse;
//! valid-and-dirty buffers go to the tail so they survive long enough
//! to be flushed in a batch.
//!
//! All list manipulation and flag inspection happens under one lock,
//! the uniprocessor equivalent of the interrupt-disable window. The
//! lock is never held across device I/O or a sleep: the per-buffer
//! LOCKED flag is a sleep lock that serialises block access for as long
//! as a transfer takes, while contenders wait on the buffer's queue.

use super::buffer::{BlockRef, BufFlags, Buffer};
use crate::config::{BLOCK_SIZE, BUFFERS_HASHTAB_SIZE, NR_BUFFERS, PRIO_BUFFER};
use crate::fs::block_dev::{BlockDevice, BlockNo, DevId};
use crate::metrics::METRICS;
use crate::sched::Scheduler;
use crate::sync::WaitQueue;
use spin::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// Hash slot for a device/block identity
fn hash_of(dev: DevId, num: BlockNo) -> usize {
    ((dev ^ num) as usize) % BUFFERS_HASHTAB_SIZE
}

/// Arena, lists and hash index, guarded by the cache lock
struct CacheState {
    bufs: Box<[Buffer]>,

    /// Buffer data area, one BLOCK_SIZE region per slot
    data: Box<[u8]>,

    /// Free list ends; head is the preferred victim
    free_head: Option<usize>,
    free_tail: Option<usize>,

    /// Hash bucket heads
    hash_heads: [Option<usize>; BUFFERS_HASHTAB_SIZE],
}

impl CacheState {
    fn data(&self, idx: usize) -> &[u8] {
        &self.data[idx * BLOCK_SIZE..(idx + 1) * BLOCK_SIZE]
    }

    fn data_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.data[idx * BLOCK_SIZE..(idx + 1) * BLOCK_SIZE]
    }

    /// Find the buffer currently holding (dev, num), if any
    fn lookup(&self, dev: DevId, num: BlockNo) -> Option<usize> {
        let mut cursor = self.hash_heads[hash_of(dev, num)];
        while let Some(i) = cursor {
            if self.bufs[i].dev == dev && self.bufs[i].num == num {
                return Some(i);
            }
            cursor = self.bufs[i].hash_next;
        }
        None
    }

    /// Unlink a buffer from the free list
    fn free_unlink(&mut self, idx: usize) {
        let (prev, next) = (self.bufs[idx].free_prev, self.bufs[idx].free_next);
        match prev {
            Some(p) => self.bufs[p].free_next = next,
            None => self.free_head = next,
        }
        match next {
            Some(n) => self.bufs[n].free_prev = prev,
            None => self.free_tail = prev,
        }
        self.bufs[idx].free_prev = None;
        self.bufs[idx].free_next = None;
    }

    /// Insert a buffer at the free list head (next victim)
    fn free_push_head(&mut self, idx: usize) {
        self.bufs[idx].free_prev = None;
        self.bufs[idx].free_next = self.free_head;
        match self.free_head {
            Some(h) => self.bufs[h].free_prev = Some(idx),
            None => self.free_tail = Some(idx),
        }
        self.free_head = Some(idx);
    }

    /// Insert a buffer at the free list tail (preserved longest)
    fn free_push_tail(&mut self, idx: usize) {
        self.bufs[idx].free_next = None;
        self.bufs[idx].free_prev = self.free_tail;
        match self.free_tail {
            Some(t) => self.bufs[t].free_next = Some(idx),
            None => self.free_head = Some(idx),
        }
        self.free_tail = Some(idx);
    }

    /// Link a buffer into the bucket for its current identity
    fn hash_push(&mut self, idx: usize) {
        let bucket = hash_of(self.bufs[idx].dev, self.bufs[idx].num);
        self.bufs[idx].hash_prev = None;
        self.bufs[idx].hash_next = self.hash_heads[bucket];
        if let Some(h) = self.hash_heads[bucket] {
            self.bufs[h].hash_prev = Some(idx);
        }
        self.hash_heads[bucket] = Some(idx);
        self.bufs[idx].hashed = true;
    }

    /// Unlink a buffer from the bucket for its current identity
    fn hash_unlink(&mut self, idx: usize) {
        let bucket = hash_of(self.bufs[idx].dev, self.bufs[idx].num);
        let (prev, next) = (self.bufs[idx].hash_prev, self.bufs[idx].hash_next);
        match prev {
            Some(p) => self.bufs[p].hash_next = next,
            None => self.hash_heads[bucket] = next,
        }
        if let Some(n) = next {
            self.bufs[n].hash_prev = prev;
        }
        self.bufs[idx].hash_prev = None;
        self.bufs[idx].hash_next = None;
        self.bufs[idx].hashed = false;
    }
}

/// The block buffer cache
pub struct BufferCache {
    sched: Arc<Scheduler>,
    driver: Arc<dyn BlockDevice>,
    state: Mutex<CacheState>,

    /// Per-buffer wait queues for lock contenders
    chains: Box<[WaitQueue]>,

    /// Processes waiting for any buffer to become free
    any_free: WaitQueue,
}

impl BufferCache {
    /// Create a cache with the full configured pool
    pub fn new(sched: Arc<Scheduler>, driver: Arc<dyn BlockDevice>) -> Self {
        Self::with_capacity(sched, driver, NR_BUFFERS)
    }

    /// Create a cache with a reduced pool size
    ///
    /// The pool is fixed for the cache's lifetime. Sizes outside
    /// 1..=NR_BUFFERS are a configuration error.
    pub fn with_capacity(
        sched: Arc<Scheduler>,
        driver: Arc<dyn BlockDevice>,
        nbufs: usize,
    ) -> Self {
        assert!(nbufs >= 1 && nbufs <= NR_BUFFERS, "bad buffer pool size");

        let mut bufs = vec![Buffer::EMPTY; nbufs].into_boxed_slice();

        // Chain every buffer into the free list in index order.
        for i in 0..nbufs {
            bufs[i].free_prev = if i == 0 { None } else { Some(i - 1) };
            bufs[i].free_next = if i + 1 == nbufs { None } else { Some(i + 1) };
        }

        let chains: Vec<WaitQueue> = (0..nbufs).map(|_| WaitQueue::new()).collect();

        log_info!("fs", "block buffer cache: {} slots", nbufs);

        Self {
            sched,
            driver,
            state: Mutex::new(CacheState {
                bufs,
                data: vec![0u8; nbufs * BLOCK_SIZE].into_boxed_slice(),
                free_head: Some(0),
                free_tail: Some(nbufs - 1),
                hash_heads: [None; BUFFERS_HASHTAB_SIZE],
            }),
            chains: chains.into_boxed_slice(),
            any_free: WaitQueue::new(),
        }
    }

    /// Number of buffers in the pool
    pub fn capacity(&self) -> usize {
        self.state.lock().bufs.len()
    }

    /// Get a locked, counted buffer holding (dev, num)
    ///
    /// The buffer may or may not be VALID. The caller sleeps while the
    /// matching buffer is locked by someone else, or while no free
    /// buffer is available; after every wakeup the lookup restarts from
    /// scratch, since anything may have changed in between.
    fn get_block(&self, dev: DevId, num: BlockNo) -> BlockRef {
        // Should not happen.
        assert!(!(dev == 0 && num == 0), "get_block(0, 0)");

        loop {
            let mut st = self.state.lock();

            if let Some(i) = st.lookup(dev, num) {
                // Buffer is locked, wait for it to come free.
                if st.bufs[i].flags.contains(BufFlags::LOCKED) {
                    METRICS.inc_buffer_sleeps();
                    self.sched.sleep_on(&self.chains[i], PRIO_BUFFER, st);
                    continue;
                }

                st.bufs[i].count += 1;
                if st.bufs[i].count == 1 {
                    st.free_unlink(i);
                }
                st.bufs[i].flags.insert(BufFlags::LOCKED);
                METRICS.inc_cache_hits();
                return BlockRef::new(i, dev, num);
            }

            // No free buffers, wait for one and retry.
            let Some(victim) = st.free_head else {
                log_warn!("fs", "no free buffers");
                METRICS.inc_free_list_sleeps();
                self.sched.sleep_on(&self.any_free, PRIO_BUFFER, st);
                continue;
            };

            METRICS.inc_cache_misses();
            st.free_unlink(victim);
            st.bufs[victim].count = 1;
            st.bufs[victim].flags.insert(BufFlags::LOCKED);

            let was_dirty = st.bufs[victim].flags.contains(BufFlags::DIRTY);
            let (old_dev, old_num) = (st.bufs[victim].dev, st.bufs[victim].num);
            let mut scratch = [0u8; BLOCK_SIZE];
            if was_dirty {
                scratch.copy_from_slice(st.data(victim));
            }

            // Reassign the identity and rehash before any I/O: a
            // concurrent request for (dev, num) must find this LOCKED
            // buffer and sleep on its chain, not claim a second buffer
            // for the same identity.
            if st.bufs[victim].hashed {
                st.hash_unlink(victim);
                METRICS.inc_evictions();
            }
            st.bufs[victim].dev = dev;
            st.bufs[victim].num = num;
            st.bufs[victim].flags.remove(BufFlags::VALID);
            st.hash_push(victim);

            // The head victim can be dirty once every clean buffer is in
            // use; complete its write-back before handing it out.
            if was_dirty {
                st.bufs[victim].flags.insert(BufFlags::BUSY);
                drop(st);

                log_debug!("fs", "write-back of dirty victim ({}, {})", old_dev, old_num);
                self.driver
                    .write_block(old_dev, old_num, &scratch)
                    .expect("fs: block write failed");
                METRICS.inc_dev_writes();
                METRICS.inc_victim_writebacks();

                let mut st = self.state.lock();
                st.bufs[victim].flags.remove(BufFlags::BUSY | BufFlags::DIRTY);
            }

            return BlockRef::new(victim, dev, num);
        }
    }

    /// Read a block from a device through the cache
    ///
    /// Returns a locked buffer whose data is valid. The device is only
    /// touched when the block is not already cached.
    pub fn read_block(&self, dev: DevId, num: BlockNo) -> BlockRef {
        let buf = self.get_block(dev, num);

        let mut st = self.state.lock();
        if !st.bufs[buf.idx].flags.contains(BufFlags::VALID) {
            st.bufs[buf.idx].flags.insert(BufFlags::BUSY);
            drop(st);

            let mut scratch = [0u8; BLOCK_SIZE];
            self.driver
                .read_block(dev, num, &mut scratch)
                .expect("fs: block read failed");
            METRICS.inc_dev_reads();

            let mut st = self.state.lock();
            st.data_mut(buf.idx).copy_from_slice(&scratch);
            st.bufs[buf.idx]
                .flags
                .remove(BufFlags::BUSY);
            st.bufs[buf.idx].flags.insert(BufFlags::VALID);
        }

        buf
    }

    /// Write a buffer synchronously to its device
    ///
    /// The caller keeps the buffer; the dirty flag is cleared once the
    /// device write has completed.
    pub fn write_block(&self, buf: &BlockRef) {
        let mut st = self.state.lock();
        assert!(
            st.bufs[buf.idx].flags.contains(BufFlags::LOCKED),
            "fs: write of unlocked buffer"
        );

        let mut scratch = [0u8; BLOCK_SIZE];
        scratch.copy_from_slice(st.data(buf.idx));
        st.bufs[buf.idx].flags.insert(BufFlags::BUSY);
        drop(st);

        self.driver
            .write_block(buf.dev, buf.num, &scratch)
            .expect("fs: block write failed");
        METRICS.inc_dev_writes();

        let mut st = self.state.lock();
        st.bufs[buf.idx]
            .flags
            .remove(BufFlags::BUSY | BufFlags::DIRTY);
    }

    /// Put a buffer back into the cache
    ///
    /// Drops one reference. At zero the buffer rejoins the free list
    /// (dirty-valid buffers at the tail, everything else at the head)
    /// and anyone waiting for a free buffer is woken. The buffer is
    /// unlocked either way.
    pub fn release_block(&self, buf: BlockRef) {
        self.release_slot(buf.idx);
    }

    fn release_slot(&self, idx: usize) {
        let freed = {
            let mut st = self.state.lock();

            // Should not happen.
            if st.bufs[idx].count == 0 {
                panic!("fs: freeing buffer twice");
            }
            st.bufs[idx].count -= 1;

            let freed = st.bufs[idx].count == 0;
            if freed {
                let flags = st.bufs[idx].flags;
                if flags.contains(BufFlags::VALID) && flags.contains(BufFlags::DIRTY) {
                    st.free_push_tail(idx);
                } else {
                    st.free_push_head(idx);
                }
            }
            st.bufs[idx].flags.remove(BufFlags::LOCKED);
            freed
        };

        if freed {
            self.sched.wake_all(&self.any_free);
        }
        self.sched.wake_all(&self.chains[idx]);
    }

    /// Acquire the sleep lock of a buffer the caller already references
    pub fn lock_block(&self, buf: &BlockRef) {
        self.lock_slot(buf.idx);
    }

    fn lock_slot(&self, idx: usize) {
        loop {
            let mut st = self.state.lock();
            if !st.bufs[idx].flags.contains(BufFlags::LOCKED) {
                st.bufs[idx].flags.insert(BufFlags::LOCKED);
                return;
            }
            METRICS.inc_buffer_sleeps();
            self.sched.sleep_on(&self.chains[idx], PRIO_BUFFER, st);
        }
    }

    /// Release the sleep lock of a buffer, waking all contenders
    pub fn unlock_block(&self, buf: &BlockRef) {
        self.unlock_slot(buf.idx);
    }

    fn unlock_slot(&self, idx: usize) {
        {
            let mut st = self.state.lock();
            st.bufs[idx].flags.remove(BufFlags::LOCKED);
        }
        self.sched.wake_all(&self.chains[idx]);
    }

    /// Flush every valid buffer to its device
    ///
    /// Each buffer is locked and pinned for the duration of its write,
    /// then released back into the free list clean. Quiescent callers
    /// are left with no dirty buffer in the pool.
    pub fn sync_cache(&self) {
        let nbufs = self.capacity();

        for idx in 0..nbufs {
            self.lock_slot(idx);

            let mut st = self.state.lock();
            if !st.bufs[idx].flags.contains(BufFlags::VALID) {
                st.bufs[idx].flags.remove(BufFlags::LOCKED);
                drop(st);
                self.sched.wake_all(&self.chains[idx]);
                continue;
            }

            // Pin across the write so the release below is balanced.
            st.bufs[idx].count += 1;
            if st.bufs[idx].count == 1 {
                st.free_unlink(idx);
            }

            let (dev, num) = (st.bufs[idx].dev, st.bufs[idx].num);
            let mut scratch = [0u8; BLOCK_SIZE];
            scratch.copy_from_slice(st.data(idx));
            st.bufs[idx].flags.insert(BufFlags::BUSY);
            drop(st);

            self.driver
                .write_block(dev, num, &scratch)
                .expect("fs: block write failed");
            METRICS.inc_dev_writes();

            let mut st = self.state.lock();
            st.bufs[idx]
                .flags
                .remove(BufFlags::BUSY | BufFlags::DIRTY);
            drop(st);

            self.release_slot(idx);
        }
    }

    /// Read access to a locked buffer's data
    ///
    /// The closure runs inside the cache critical section; keep it
    /// short and do not call back into the cache from it.
    pub fn with_block<R>(&self, buf: &BlockRef, f: impl FnOnce(&[u8]) -> R) -> R {
        let st = self.state.lock();
        debug_assert_eq!((st.bufs[buf.idx].dev, st.bufs[buf.idx].num), (buf.dev, buf.num));
        assert!(
            st.bufs[buf.idx].flags.contains(BufFlags::LOCKED),
            "fs: access to unlocked buffer"
        );
        f(st.data(buf.idx))
    }

    /// Write access to a locked buffer's data; marks the buffer dirty
    pub fn with_block_mut<R>(&self, buf: &BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut st = self.state.lock();
        debug_assert_eq!((st.bufs[buf.idx].dev, st.bufs[buf.idx].num), (buf.dev, buf.num));
        assert!(
            st.bufs[buf.idx].flags.contains(BufFlags::LOCKED),
            "fs: access to unlocked buffer"
        );
        st.bufs[buf.idx].flags.insert(BufFlags::DIRTY);
        let idx = buf.idx;
        f(st.data_mut(idx))
    }

    /// Mark a locked buffer as modified
    pub fn mark_dirty(&self, buf: &BlockRef) {
        let mut st = self.state.lock();
        assert!(
            st.bufs[buf.idx].flags.contains(BufFlags::LOCKED),
            "fs: access to unlocked buffer"
        );
        st.bufs[buf.idx].flags.insert(BufFlags::DIRTY);
    }

    /// Whether a referenced buffer is dirty
    pub fn is_dirty(&self, buf: &BlockRef) -> bool {
        self.state.lock().bufs[buf.idx].flags.contains(BufFlags::DIRTY)
    }

    /// Flags of a referenced buffer
    pub fn flags(&self, buf: &BlockRef) -> BufFlags {
        self.state.lock().bufs[buf.idx].flags
    }

    /// Which slot currently holds (dev, num), if any
    pub fn lookup_slot(&self, dev: DevId, num: BlockNo) -> Option<usize> {
        self.state.lock().lookup(dev, num)
    }

    /// Number of buffers on the free list
    pub fn free_count(&self) -> usize {
        let st = self.state.lock();
        let mut n = 0;
        let mut cursor = st.free_head;
        while let Some(i) = cursor {
            n += 1;
            cursor = st.bufs[i].free_next;
        }
        n
    }

    /// Whether any buffer in the pool is dirty
    pub fn any_dirty(&self) -> bool {
        let st = self.state.lock();
        st.bufs.iter().any(|b| b.flags.contains(BufFlags::DIRTY))
    }

    /// Audit the structural invariants of the pool
    ///
    /// Checks, at one instant under the cache lock:
    /// - a buffer is on the free list iff its count is zero
    /// - free list links are mutually consistent
    /// - every identity-bearing buffer sits in exactly the bucket its
    ///   hash selects, and no identity appears twice
    /// - BUSY is only ever set together with LOCKED
    pub fn assert_invariants(&self) {
        let st = self.state.lock();
        let nbufs = st.bufs.len();

        // Walk the free list forward, checking link symmetry.
        let mut on_free = vec![false; nbufs];
        let mut prev: Option<usize> = None;
        let mut cursor = st.free_head;
        while let Some(i) = cursor {
            assert!(!on_free[i], "free list cycle");
            on_free[i] = true;
            assert_eq!(st.bufs[i].free_prev, prev, "free list link mismatch");
            prev = Some(i);
            cursor = st.bufs[i].free_next;
        }
        assert_eq!(st.free_tail, prev, "free tail mismatch");

        for i in 0..nbufs {
            let b = &st.bufs[i];
            assert_eq!(b.count == 0, on_free[i], "count/free-list disagreement");
            if b.flags.contains(BufFlags::BUSY) {
                assert!(b.flags.contains(BufFlags::LOCKED), "busy but unlocked");
            }
            if b.hashed {
                let bucket = hash_of(b.dev, b.num);
                let mut seen = 0;
                let mut cursor = st.hash_heads[bucket];
                while let Some(j) = cursor {
                    if j == i {
                        seen += 1;
                    }
                    assert!(
                        !(j != i && st.bufs[j].dev == b.dev && st.bufs[j].num == b.num),
                        "duplicate identity in cache"
                    );
                    cursor = st.bufs[j].hash_next;
                }
                assert_eq!(seen, 1, "buffer not in its hash bucket exactly once");
            }
        }
    }
}
