//! Wait queues for the sleep/wakeup protocol
//!
//! A wait queue records which processes are sleeping on a condition.
//! Membership is a reference relation, not ownership: the scheduler owns
//! the processes, the queue only remembers their pids, and every wakeup
//! severs the recorded references.
//!
//! Wakeups are broadcast. A woken process must re-check the condition it
//! slept on, so spurious wakeups are harmless by construction.

use crate::config::NR_PROCS;
use crate::sched::Pid;
use spin::Mutex;

/// Set of sleeping processes, one bit per pid
pub struct WaitQueue {
    sleepers: Mutex<u64>,
}

impl WaitQueue {
    /// Creates an empty wait queue
    pub const fn new() -> Self {
        Self {
            sleepers: Mutex::new(0),
        }
    }

    /// Record `pid` as sleeping on this queue
    pub fn add(&self, pid: Pid) {
        assert!(pid < NR_PROCS, "wait queue: bad pid");
        *self.sleepers.lock() |= 1u64 << pid;
    }

    /// Remove and return every recorded sleeper
    pub fn drain(&self) -> SleeperIter {
        let mut set = self.sleepers.lock();
        let bits = *set;
        *set = 0;
        SleeperIter { bits }
    }

    /// Whether any process is recorded on this queue
    pub fn is_empty(&self) -> bool {
        *self.sleepers.lock() == 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the pids drained from a wait queue
pub struct SleeperIter {
    bits: u64,
}

impl Iterator for SleeperIter {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        if self.bits == 0 {
            return None;
        }
        let pid = self.bits.trailing_zeros() as Pid;
        self.bits &= self.bits - 1;
        Some(pid)
    }
}
