/// Configuration constants for the VelaOS kernel core

/// Number of buffers in the block buffer cache pool
pub const NR_BUFFERS: usize = 256;

/// Number of slots in the buffer hash table
pub const BUFFERS_HASHTAB_SIZE: usize = 53;

/// Size of a disk block in bytes
pub const BLOCK_SIZE: usize = 1024;

/// Number of blocks reserved for the on-disk inode map
pub const IMAP_SIZE: usize = 8;

/// Number of blocks reserved for the on-disk zone map
pub const ZMAP_SIZE: usize = 8;

/// Maximum number of processes in the process table
pub const NR_PROCS: usize = 64;

/// Quantum length in clock ticks
pub const PROC_QUANTUM: u32 = 100;

/// Priority of a process sleeping on a buffer wait queue
pub const PRIO_BUFFER: i32 = -40;

/// Baseline priority of a user process
pub const PRIO_USER: i32 = 40;

/// Offset that keeps lottery ticket counts positive across the
/// priority/nice range: tickets = -priority + NORMALIZATION_VALUE - nice
pub const NORMALIZATION_VALUE: i32 = 100;

// The buffer data area is carved from a fixed reservation.
const _: () = assert!(NR_BUFFERS <= 512, "too many buffers");

// The superblock, inode map and zone map must not waste more than
// 1/16 of the buffer pool.
const _: () = assert!(IMAP_SIZE + ZMAP_SIZE <= NR_BUFFERS / 16, "hard disk too small");

// Wait queues track sleepers in a fixed-width pid bitmask.
const _: () = assert!(NR_PROCS <= 64, "too many processes");
