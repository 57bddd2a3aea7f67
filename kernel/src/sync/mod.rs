/// Synchronization primitives for the kernel core
/// Short critical sections are guarded by spin::Mutex, the uniprocessor
/// stand-in for the interrupt-disable window; this module provides the
/// wait queue that backs the sleep/wakeup protocol on top of it.
mod wait;

pub use wait::{SleeperIter, WaitQueue};
