//! Block buffer cache
//!
//! The buffer cache owns a fixed pool of block-sized buffers that
//! mirror disk blocks. It amortises device I/O, serialises access to
//! any given block behind a per-buffer sleep lock, and is the sole I/O
//! path used by file-system code.

mod buffer;
mod buffer_cache;

pub use buffer::{BlockRef, BufFlags};
pub use buffer_cache::BufferCache;
