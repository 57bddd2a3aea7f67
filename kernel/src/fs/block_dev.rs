//! Block Device Interface
//!
//! This module defines the driver seam the buffer cache sits on and a
//! small registry that names the block devices present in the system.
//! Transfers are whole blocks, synchronous, and blocking from the
//! caller's perspective; the cache holds the per-buffer sleep lock for
//! the duration of a transfer.

use spin::Mutex;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Once;

/// Device identifier type
pub type DevId = u32;

/// Block number type
pub type BlockNo = u32;

/// Block device errors
///
/// The buffer cache treats any driver failure as fatal; these exist for
/// drivers and device setup code, which may recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// I/O error
    IoError,
    /// Block number out of range for the device
    InvalidBlock,
    /// Transfer buffer is not exactly one block
    BadBufferSize,
    /// Device not ready
    NotReady,
}

/// Block device interface used by the buffer cache
pub trait BlockDevice: Send + Sync {
    /// Read one block synchronously into `data`
    fn read_block(&self, dev: DevId, num: BlockNo, data: &mut [u8]) -> Result<(), BlockError>;

    /// Write one block synchronously from `data`
    fn write_block(&self, dev: DevId, num: BlockNo, data: &[u8]) -> Result<(), BlockError>;

    /// Get device name/identifier
    fn name(&self) -> &str;
}

/// Registry of the block devices present in the system
pub struct BlockDeviceManager {
    devices: Mutex<Vec<Arc<dyn BlockDevice>>>,
}

impl BlockDeviceManager {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Register a block device, returning its index
    pub fn register_device(&self, device: Arc<dyn BlockDevice>) -> usize {
        let mut devices = self.devices.lock();
        devices.push(device);
        let index = devices.len() - 1;
        drop(devices);

        log_info!("block", "registered device #{}", index);
        index
    }

    /// Get a block device by index
    pub fn get_device(&self, index: usize) -> Option<Arc<dyn BlockDevice>> {
        let devices = self.devices.lock();
        devices.get(index).cloned()
    }

    /// Get a device by name
    pub fn get_device_by_name(&self, name: &str) -> Option<Arc<dyn BlockDevice>> {
        let devices = self.devices.lock();
        devices.iter().find(|dev| dev.name() == name).cloned()
    }

    /// Get device count
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }
}

/// Global block device registry
static BLOCK_DEVICES: Once<BlockDeviceManager> = Once::new();

/// Get the global block device registry
pub fn block_device_manager() -> &'static BlockDeviceManager {
    BLOCK_DEVICES.call_once(BlockDeviceManager::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::block::RamDisk;

    #[test]
    fn test_global_registry() {
        let manager = block_device_manager();
        let idx = manager.register_device(Arc::new(RamDisk::new()));
        assert!(manager.get_device(idx).is_some());
        assert!(core::ptr::eq(manager, block_device_manager()));
    }

    #[test]
    fn test_registry_lookup() {
        let manager = BlockDeviceManager::new();
        assert_eq!(manager.device_count(), 0);

        let idx = manager.register_device(Arc::new(RamDisk::new()));
        assert_eq!(manager.device_count(), 1);

        let by_index = manager.get_device(idx).unwrap();
        assert_eq!(by_index.name(), "ram0");
        assert!(manager.get_device_by_name("ram0").is_some());
        assert!(manager.get_device_by_name("hd0").is_none());
        assert!(manager.get_device(idx + 1).is_none());
    }
}
