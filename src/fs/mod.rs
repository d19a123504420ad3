//! an ext2 filesystem engine

/// log at debug level, but only when the filesystem was mounted `verbose`
macro_rules! verbose {
    ($fs:expr, $($arg:tt)+) => {
        if $fs.verbose() {
            log::debug!($($arg)+);
        }
    };
}

pub mod block_group;
mod block_map;
mod dir_ops;
pub mod directory;
pub mod error;
mod file_io;
pub mod filekind;
mod fs_api_impl;
pub mod fs_layout;
pub mod inode;
pub mod node;
pub mod superblock;

pub use error::{Error, Result};
pub use filekind::FileKind;
pub use fs_api_impl::FuseAdapter;
pub use fs_layout::Ext2Fs;
pub use inode::Inode;
pub use node::{
    DeviceNode, DirNode, Dirent, FileNode, Node, NodeHandle, NodeInfo, PipeNode, SymlinkNode,
};
pub use superblock::SuperBlock;

pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;
/// the superblock always sits 1024 bytes into the device
pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const SUPERBLOCK_REGION_SIZE: usize = 1024;
/// largest supported block size is 1024 << 5
pub const MAX_LOG_BLOCK_SIZE: u32 = 5;
pub const ROOT_INODE: u32 = 2;
/// inodes 1 to 10 are never handed out
pub const RESERVED_INODES: u32 = 10;
pub const FIRST_UNRESERVED_INODE: u32 = RESERVED_INODES + 1;
pub const DEFAULT_INODE_SIZE: u16 = 128;
pub const BLOCK_POINTERS: usize = 15;
const DIRECT_POINTERS: usize = 12;
const SINGLE_INDIRECT: usize = 12;
const DOUBLE_INDIRECT: usize = 13;
const TRIPLE_INDIRECT: usize = 14;
/// symlink targets up to this length live inside the inode
pub const FAST_SYMLINK_MAX: usize = 60;
/// "." plus the entry in the parent
const DIRECTORY_LINKS: u16 = 2;
/// ioctl request that flushes the device
pub const IOCTL_SYNC: u64 = 0x4F04;
