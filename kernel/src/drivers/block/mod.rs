//! Block device drivers

mod ramdisk;

pub use ramdisk::RamDisk;
