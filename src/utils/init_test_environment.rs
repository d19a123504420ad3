use std::sync::Arc;

use crate::{
    device::MemoryDevice,
    fs::{DirNode, Ext2Fs},
    mkfs,
    mount::MountOptions,
};

/// a freshly formatted in-memory device of `size` bytes
pub fn formatted_device(block_size: u32, size: usize, inodes: u32) -> Arc<MemoryDevice> {
    let device = MemoryDevice::new(size);
    mkfs::format(&device, block_size, inodes).expect("Failed to format test device");
    Arc::new(device)
}

pub fn read_write() -> MountOptions {
    MountOptions {
        read_write: true,
        verbose: false,
    }
}

/// a writable filesystem on a fresh in-memory device
pub fn mounted_fs(block_size: u32, size: usize, inodes: u32) -> Arc<Ext2Fs> {
    Ext2Fs::mount(formatted_device(block_size, size, inodes), read_write())
        .expect("Failed to mount test device")
}

/// like [mounted_fs], plus its root directory
pub fn mounted_root(block_size: u32, size: usize, inodes: u32) -> (Arc<Ext2Fs>, DirNode) {
    let fs = mounted_fs(block_size, size, inodes);
    let root = fs.root().expect("Failed to open the root directory");
    (fs, root)
}
