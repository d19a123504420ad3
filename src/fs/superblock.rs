use serde::{Deserialize, Serialize};

use crate::utils::{fs_size_calculator::Geometry, time_util, traits::OnDisk};

use super::{DEFAULT_INODE_SIZE, EXT2_SUPER_MAGIC, FIRST_UNRESERVED_INODE};

/// the superblock state meaning "cleanly unmounted"
pub const EXT2_VALID_FS: u16 = 1;
/// on errors, keep going
pub const EXT2_ERRORS_CONTINUE: u16 = 1;
/// dynamic revision, the first one with `first_ino` and `inode_size`
pub const EXT2_DYNAMIC_REV: u32 = 1;

/// The leading, interpreted part of the ext2 superblock.
///
/// Field order and widths follow the on-disk layout exactly, so the bincode
/// legacy encoding of this struct is the first [SuperBlock::SIZE] bytes of
/// the 1024-byte superblock region. The remaining bytes of the region are
/// kept verbatim by whoever owns the region.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    /// block size is `1024 << log_block_size`
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    // dynamic revision fields
    pub first_ino: u32,
    /// 0 on revision 0 filesystems, read as 128
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [[u8; 32]; 2],
    pub algo_bitmap: u32,
    // performance hints
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    pub padding: u16,
    // journaling, unused by ext2 itself
    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    pub padding_a: u16,
    pub padding_b: u8,
    pub default_mount_options: u32,
    pub first_meta_bg: u32,
}

impl OnDisk for SuperBlock {
    const SIZE: usize = 264;
}

impl SuperBlock {
    /// a fresh superblock for `geometry`, counters set by the caller after layout
    pub fn new(geometry: &Geometry) -> Self {
        let now = time_util::now();
        let log = (geometry.block_size / 1024).trailing_zeros();
        let mut volume_name = [0u8; 16];
        volume_name[..6].copy_from_slice(b"ext2fs");
        Self {
            inodes_count: geometry.inodes_count(),
            blocks_count: geometry.blocks_count,
            first_data_block: geometry.first_data_block,
            log_block_size: log,
            log_frag_size: log,
            blocks_per_group: geometry.blocks_per_group,
            frags_per_group: geometry.blocks_per_group,
            inodes_per_group: geometry.inodes_per_group,
            wtime: now,
            lastcheck: now,
            max_mnt_count: u16::MAX,
            magic: EXT2_SUPER_MAGIC,
            state: EXT2_VALID_FS,
            errors: EXT2_ERRORS_CONTINUE,
            rev_level: EXT2_DYNAMIC_REV,
            first_ino: FIRST_UNRESERVED_INODE,
            inode_size: DEFAULT_INODE_SIZE,
            volume_name,
            ..Default::default()
        }
    }

    pub fn block_size(&self) -> u32 {
        1024 << self.log_block_size
    }

    /// size of one on-disk inode record
    pub fn inode_size(&self) -> u32 {
        match self.inode_size {
            0 => DEFAULT_INODE_SIZE as u32,
            size => size as u32,
        }
    }

    /// how many groups the block range is split into
    pub fn group_count(&self) -> u32 {
        (self.blocks_count - self.first_data_block).div_ceil(self.blocks_per_group)
    }
}
