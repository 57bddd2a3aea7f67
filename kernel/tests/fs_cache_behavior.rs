//! Buffer cache behavior tests
//!
//! Drives the cache through its contract: hit/miss accounting against
//! the device, eviction and free-list ordering, dirty write-back,
//! global sync, and blocking under contention. "Processes" here are
//! host threads registered in the process table; the RAM disk's
//! transfer counters make device traffic observable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vela_kernel::drivers::block::RamDisk;
use vela_kernel::fs::block_dev::{BlockDevice, BlockError, BlockNo, DevId};
use vela_kernel::fs::cache::{BufFlags, BufferCache};
use vela_kernel::sched::{ProcState, Scheduler};

/// Cache over a fresh RAM disk, with one process dispatched so the
/// calling thread has a scheduling identity.
fn setup(nbufs: usize) -> (Arc<Scheduler>, Arc<RamDisk>, BufferCache) {
    let sched = Arc::new(Scheduler::new());
    let pid = sched.spawn("tester", 0).unwrap();
    sched.dispatch(pid);

    let disk = Arc::new(RamDisk::new());
    let cache = BufferCache::with_capacity(Arc::clone(&sched), disk.clone(), nbufs);
    (sched, disk, cache)
}

#[test]
fn test_hit_path_reads_device_once() {
    let (_sched, disk, cache) = setup(8);

    let b1 = cache.read_block(1, 10);
    assert_eq!(disk.reads(), 1);
    assert!(cache.flags(&b1).contains(BufFlags::VALID));
    let slot1 = b1.slot();
    cache.release_block(b1);

    let b2 = cache.read_block(1, 10);
    assert_eq!(disk.reads(), 1, "hit must not touch the device");
    assert_eq!(b2.slot(), slot1, "hit must land on the same slot");
    cache.release_block(b2);

    cache.assert_invariants();
}

#[test]
fn test_release_restores_cache_state() {
    let (_sched, _disk, cache) = setup(8);

    let free_before = cache.free_count();
    let buf = cache.read_block(2, 5);
    assert_eq!(cache.free_count(), free_before - 1);
    cache.release_block(buf);

    assert_eq!(cache.free_count(), free_before);
    assert!(cache.lookup_slot(2, 5).is_some(), "block stays cached");
    cache.assert_invariants();
}

#[test]
fn test_sequential_misses_recycle_the_released_buffer() {
    // Clean buffers are released to the free list head, so a sequential
    // uncached scan keeps recycling one slot and leaves the rest of the
    // pool intact.
    let (_sched, disk, cache) = setup(4);

    let first = cache.read_block(1, 1);
    let recycled = first.slot();
    cache.release_block(first);

    for num in 2..=5 {
        let buf = cache.read_block(1, num);
        assert_eq!(buf.slot(), recycled);
        cache.release_block(buf);
    }

    assert_eq!(disk.reads(), 5);
    assert!(cache.lookup_slot(1, 1).is_none(), "old identity evicted");
    assert!(cache.lookup_slot(1, 4).is_none());
    assert_eq!(cache.lookup_slot(1, 5), Some(recycled));
    cache.assert_invariants();
}

#[test]
fn test_dirty_buffers_are_preserved_longer() {
    let (_sched, _disk, cache) = setup(2);

    let b7 = cache.read_block(1, 7);
    let slot7 = b7.slot();
    cache.mark_dirty(&b7);
    cache.release_block(b7); // valid + dirty: tail

    let b8 = cache.read_block(1, 8);
    let slot8 = b8.slot();
    assert_ne!(slot7, slot8);
    cache.release_block(b8); // clean: head

    // The clean buffer is the next victim; the dirty one survives.
    let b9 = cache.read_block(1, 9);
    assert_eq!(b9.slot(), slot8);
    assert!(cache.lookup_slot(1, 8).is_none());
    assert_eq!(cache.lookup_slot(1, 7), Some(slot7));
    cache.release_block(b9);

    cache.assert_invariants();
}

#[test]
fn test_dirty_victim_written_back_before_reuse() {
    let (_sched, disk, cache) = setup(1);

    let buf = cache.read_block(1, 1);
    cache.with_block_mut(&buf, |data| data.fill(0x5a));
    cache.release_block(buf);
    assert_eq!(disk.writes(), 0);

    // The only buffer is dirty; claiming it for a new block must flush
    // it first.
    let other = cache.read_block(1, 2);
    assert_eq!(disk.writes(), 1);
    let stored = disk.peek_block(1, 1).expect("write-back reached the disk");
    assert!(stored.iter().all(|&b| b == 0x5a));
    cache.release_block(other);

    // And the flushed content survives a re-read.
    let again = cache.read_block(1, 1);
    cache.with_block(&again, |data| assert!(data.iter().all(|&b| b == 0x5a)));
    cache.release_block(again);

    cache.assert_invariants();
}

#[test]
fn test_write_block_clears_dirty_and_keeps_reference() {
    let (_sched, disk, cache) = setup(4);

    let buf = cache.read_block(3, 1);
    cache.with_block_mut(&buf, |data| data[0] = 0xcc);
    assert!(cache.is_dirty(&buf));

    cache.write_block(&buf);
    assert!(!cache.is_dirty(&buf));
    assert_eq!(disk.writes(), 1);
    assert!(cache.flags(&buf).contains(BufFlags::LOCKED));
    assert_eq!(disk.peek_block(3, 1).unwrap()[0], 0xcc);

    cache.release_block(buf);
    cache.assert_invariants();
}

#[test]
fn test_sync_cache_flushes_every_valid_buffer() {
    let (_sched, disk, cache) = setup(4);

    let dirty = cache.read_block(1, 1);
    cache.with_block_mut(&dirty, |data| data.fill(0x11));
    cache.release_block(dirty);

    let clean = cache.read_block(1, 2);
    cache.release_block(clean);

    cache.sync_cache();

    assert!(!cache.any_dirty());
    assert_eq!(disk.writes(), 2, "both valid buffers are written");
    assert!(disk
        .peek_block(1, 1)
        .unwrap()
        .iter()
        .all(|&b| b == 0x11));
    assert_eq!(cache.free_count(), 4, "sync leaves all counts restored");
    cache.assert_invariants();
}

#[test]
fn test_colliding_identities_coexist() {
    let (_sched, _disk, cache) = setup(4);

    // 2^9 = 11 and 2^66 = 64 are both 11 mod the 53-slot table, so the
    // two identities share a bucket.
    let a = cache.read_block(2, 9);
    let b = cache.read_block(2, 66);
    assert_ne!(a.slot(), b.slot());

    cache.release_block(a);
    cache.release_block(b);

    let slot_a = cache.lookup_slot(2, 9);
    let slot_b = cache.lookup_slot(2, 66);
    assert!(slot_a.is_some() && slot_b.is_some());
    assert_ne!(slot_a, slot_b);
    cache.assert_invariants();
}

#[test]
fn test_exhausted_pool_blocks_until_release() {
    let (sched, _disk, cache) = setup(2);
    let cache = Arc::new(cache);

    let h1 = cache.read_block(1, 1);
    let h2 = cache.read_block(1, 2);
    let pinned_slot = h1.slot();

    let waiter = sched.spawn("waiter", 0).unwrap();
    let sched2 = Arc::clone(&sched);
    let cache2 = Arc::clone(&cache);
    let thread = std::thread::spawn(move || {
        sched2.dispatch(waiter);
        let buf = cache2.read_block(1, 3);
        let slot = buf.slot();
        cache2.release_block(buf);
        slot
    });

    // The miss with no free buffers parks the process.
    while sched.proc_info(waiter).unwrap().state != ProcState::Waiting {
        std::thread::yield_now();
    }
    assert!(vela_kernel::log::log_snapshot().contains("no free buffers"));

    // Releasing any pinned buffer wakes it and satisfies the miss.
    cache.release_block(h1);
    let got = thread.join().unwrap();
    assert_eq!(got, pinned_slot);

    cache.release_block(h2);
    cache.assert_invariants();
}

/// RAM disk whose transfers stall until the test opens the matching
/// gate, to hold a buffer in the driver for as long as the test needs.
struct GatedDisk {
    inner: RamDisk,
    read_gate_open: AtomicBool,
    write_gate_open: AtomicBool,
    in_read: AtomicBool,
    in_write: AtomicBool,
}

impl GatedDisk {
    fn new() -> Self {
        Self {
            inner: RamDisk::new(),
            read_gate_open: AtomicBool::new(false),
            write_gate_open: AtomicBool::new(false),
            in_read: AtomicBool::new(false),
            in_write: AtomicBool::new(false),
        }
    }
}

impl BlockDevice for GatedDisk {
    fn read_block(&self, dev: DevId, num: BlockNo, data: &mut [u8]) -> Result<(), BlockError> {
        self.in_read.store(true, Ordering::SeqCst);
        while !self.read_gate_open.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        self.inner.read_block(dev, num, data)
    }

    fn write_block(&self, dev: DevId, num: BlockNo, data: &[u8]) -> Result<(), BlockError> {
        self.in_write.store(true, Ordering::SeqCst);
        while !self.write_gate_open.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        self.inner.write_block(dev, num, data)
    }

    fn name(&self) -> &str {
        "gated0"
    }
}

#[test]
fn test_contenders_share_one_device_read() {
    let sched = Arc::new(Scheduler::new());
    let disk = Arc::new(GatedDisk::new());
    let cache = Arc::new(BufferCache::with_capacity(
        Arc::clone(&sched),
        disk.clone(),
        4,
    ));

    let pid_a = sched.spawn("reader-a", 0).unwrap();
    let pid_b = sched.spawn("reader-b", 0).unwrap();

    // A claims (1, 3) and stalls inside the device read, holding the
    // buffer locked.
    let sched_a = Arc::clone(&sched);
    let cache_a = Arc::clone(&cache);
    let thread_a = std::thread::spawn(move || {
        sched_a.dispatch(pid_a);
        let buf = cache_a.read_block(1, 3);
        let slot = buf.slot();
        cache_a.release_block(buf);
        slot
    });
    while !disk.in_read.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }

    // B asks for the same block and goes to sleep on the buffer queue.
    let sched_b = Arc::clone(&sched);
    let cache_b = Arc::clone(&cache);
    let thread_b = std::thread::spawn(move || {
        sched_b.dispatch(pid_b);
        let buf = cache_b.read_block(1, 3);
        let slot = buf.slot();
        cache_b.release_block(buf);
        slot
    });
    while sched.proc_info(pid_b).unwrap().state != ProcState::Waiting {
        std::thread::yield_now();
    }

    // A's read completes and the release hands the buffer over; B finds
    // it valid and must not touch the device again.
    disk.read_gate_open.store(true, Ordering::SeqCst);
    let slot_a = thread_a.join().unwrap();
    let slot_b = thread_b.join().unwrap();

    assert_eq!(slot_a, slot_b);
    assert_eq!(disk.inner.reads(), 1, "second reader rides the first read");
    cache.assert_invariants();
}

#[test]
fn test_no_duplicate_identity_during_victim_writeback() {
    let sched = Arc::new(Scheduler::new());
    let disk = Arc::new(GatedDisk::new());
    disk.read_gate_open.store(true, Ordering::SeqCst);
    let cache = Arc::new(BufferCache::with_capacity(
        Arc::clone(&sched),
        disk.clone(),
        2,
    ));

    let dirtier = sched.spawn("dirtier", 0).unwrap();
    sched.dispatch(dirtier);

    // Dirty the whole pool so the free list is dirty from head to tail.
    for num in 1..=2 {
        let buf = cache.read_block(1, num);
        cache.with_block_mut(&buf, |data| data.fill(num as u8));
        cache.release_block(buf);
    }
    let reads_before = disk.inner.reads();

    // A claims (2, 5); the dirty victim's write-back stalls in the
    // driver with the new identity already hashed and locked.
    let pid_a = sched.spawn("claimer-a", 0).unwrap();
    let sched_a = Arc::clone(&sched);
    let cache_a = Arc::clone(&cache);
    let thread_a = std::thread::spawn(move || {
        sched_a.dispatch(pid_a);
        let buf = cache_a.read_block(2, 5);
        let slot = buf.slot();
        cache_a.release_block(buf);
        slot
    });
    while !disk.in_write.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }

    // B asks for the same block mid-write-back. It must find A's buffer
    // and sleep on its chain, not claim the second dirty victim for the
    // same identity.
    let pid_b = sched.spawn("claimer-b", 0).unwrap();
    let sched_b = Arc::clone(&sched);
    let cache_b = Arc::clone(&cache);
    let thread_b = std::thread::spawn(move || {
        sched_b.dispatch(pid_b);
        let buf = cache_b.read_block(2, 5);
        let slot = buf.slot();
        cache_b.release_block(buf);
        slot
    });
    while sched.proc_info(pid_b).unwrap().state != ProcState::Waiting {
        std::thread::yield_now();
    }

    disk.write_gate_open.store(true, Ordering::SeqCst);
    let slot_a = thread_a.join().unwrap();
    let slot_b = thread_b.join().unwrap();

    assert_eq!(slot_a, slot_b, "one buffer serves both requests");
    assert_eq!(
        disk.inner.reads(),
        reads_before + 1,
        "one device read for (2, 5)"
    );
    assert!(cache.lookup_slot(1, 1).is_none(), "victim identity evicted");
    cache.assert_invariants();
}
