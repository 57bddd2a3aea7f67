//! File system support layers
//!
//! Only the layers below the file system proper live in the core:
//! the block device interface and the block buffer cache that all
//! file-system I/O goes through.

pub mod block_dev;
pub mod cache;
