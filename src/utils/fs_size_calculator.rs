//! This module contains functions to calculate the size and placement of different fs components

use crate::fs::{block_group::GROUP_DESCRIPTOR_SIZE, DEFAULT_INODE_SIZE};

/// with 1 KiB blocks, block 0 belongs to the boot record and counting starts at 1
/// # Example
/// ```
/// use ext2fs::utils::fs_size_calculator::first_data_block;
/// assert_eq!(first_data_block(1024), 1);
/// assert_eq!(first_data_block(4096), 0);
/// ```
pub const fn first_data_block(block_size: u32) -> u32 {
    if block_size == 1024 {
        1
    } else {
        0
    }
}

/// the block the group descriptor table starts at
/// # Example
/// ```
/// use ext2fs::utils::fs_size_calculator::descriptor_table_start;
/// assert_eq!(descriptor_table_start(1024), 2);
/// assert_eq!(descriptor_table_start(2048), 1);
/// ```
pub const fn descriptor_table_start(block_size: u32) -> u32 {
    if block_size > 1024 {
        1
    } else {
        2
    }
}

/// how many groups `blocks_count` blocks are split into
/// # Example
/// ```
/// use ext2fs::utils::fs_size_calculator::group_count;
/// assert_eq!(group_count(8193, 1, 8192), 1);
/// assert_eq!(group_count(8194, 1, 8192), 2);
/// ```
pub const fn group_count(blocks_count: u32, first_data_block: u32, blocks_per_group: u32) -> u32 {
    (blocks_count - first_data_block).div_ceil(blocks_per_group)
}

/// calculate how many blocks the group descriptor table spans
/// # Example
/// ```
/// use ext2fs::utils::fs_size_calculator::descriptor_table_blocks;
/// assert_eq!(descriptor_table_blocks(32, 1024), 1);
/// assert_eq!(descriptor_table_blocks(33, 1024), 2);
/// ```
pub const fn descriptor_table_blocks(group_count: u32, block_size: u32) -> u32 {
    (group_count * GROUP_DESCRIPTOR_SIZE as u32).div_ceil(block_size)
}

/// calculate how many blocks one group's inode table spans
pub const fn inode_table_blocks(inodes_per_group: u32, inode_size: u32, block_size: u32) -> u32 {
    (inodes_per_group * inode_size).div_ceil(block_size)
}

/// the smallest number of inodes a group gets
const MIN_INODES_PER_GROUP: u32 = 16;

/// where everything of a freshly formatted filesystem lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: u32,
    pub blocks_count: u32,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub group_count: u32,
    pub descriptor_blocks: u32,
    pub inode_table_blocks: u32,
}

/// absolute block numbers of one group's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub start: u32,
    /// blocks that belong to this group, the last group may be short
    pub blocks: u32,
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    /// first block after the metadata
    pub first_free: u32,
}

impl GroupLayout {
    /// blocks this group spends on its own metadata
    pub fn overhead(&self) -> u32 {
        self.first_free - self.start
    }
}

impl Geometry {
    /// lay out a filesystem of `device_bytes` bytes holding at least `inodes_wanted` inodes
    pub fn plan(block_size: u32, device_bytes: u64, inodes_wanted: u32) -> Result<Self, String> {
        if !matches!(block_size, 1024 | 2048 | 4096) {
            return Err(format!(
                "block size must be 1024, 2048 or 4096, got {block_size}"
            ));
        }
        let first_data_block = first_data_block(block_size);
        let blocks_per_group = block_size * 8;
        let mut blocks_count = (device_bytes / block_size as u64).min(u32::MAX as u64) as u32;

        loop {
            if blocks_count <= first_data_block {
                return Err("device is too small to hold a filesystem".to_string());
            }
            let group_count = group_count(blocks_count, first_data_block, blocks_per_group);
            let per_block = block_size / DEFAULT_INODE_SIZE as u32;
            let inodes_per_group = inodes_wanted
                .div_ceil(group_count)
                .max(MIN_INODES_PER_GROUP)
                .next_multiple_of(per_block)
                .min(blocks_per_group);
            let geometry = Geometry {
                block_size,
                blocks_count,
                first_data_block,
                blocks_per_group,
                inodes_per_group,
                group_count,
                descriptor_blocks: descriptor_table_blocks(group_count, block_size),
                inode_table_blocks: inode_table_blocks(
                    inodes_per_group,
                    DEFAULT_INODE_SIZE as u32,
                    block_size,
                ),
            };

            let last = geometry.group(group_count - 1);
            if group_count > 1 && last.blocks <= last.overhead() {
                // the tail cannot even hold its own bitmaps, leave it unused
                blocks_count = last.start;
                continue;
            }
            // group 0 also needs room for the root directory
            let first = geometry.group(0);
            if first.blocks <= first.overhead() + 1 {
                return Err("device is too small to hold a filesystem".to_string());
            }
            return Ok(geometry);
        }
    }

    pub fn inodes_count(&self) -> u32 {
        self.inodes_per_group * self.group_count
    }

    /// the metadata placement of group `index`
    pub fn group(&self, index: u32) -> GroupLayout {
        let start = self.first_data_block + index * self.blocks_per_group;
        let blocks = (self.blocks_count - start).min(self.blocks_per_group);
        // group 0 starts with the superblock and the descriptor table
        let meta = if index == 0 {
            start + 1 + self.descriptor_blocks
        } else {
            start
        };
        GroupLayout {
            start,
            blocks,
            block_bitmap: meta,
            inode_bitmap: meta + 1,
            inode_table: meta + 2,
            first_free: meta + 2 + self.inode_table_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_small_1k_filesystem() {
        let geometry = Geometry::plan(1024, 1 << 20, 64).unwrap();
        assert_eq!(geometry.blocks_count, 1024);
        assert_eq!(geometry.first_data_block, 1);
        assert_eq!(geometry.group_count, 1);
        assert_eq!(geometry.inodes_per_group, 64);
        assert_eq!(geometry.descriptor_blocks, 1);
        assert_eq!(geometry.inode_table_blocks, 8);

        let group = geometry.group(0);
        assert_eq!(group.start, 1);
        assert_eq!(group.blocks, 1023);
        assert_eq!(group.block_bitmap, 3);
        assert_eq!(group.inode_bitmap, 4);
        assert_eq!(group.inode_table, 5);
        assert_eq!(group.first_free, 13);
    }

    #[test]
    fn test_plan_4k_starts_at_block_zero() {
        let geometry = Geometry::plan(4096, 4 << 20, 128).unwrap();
        assert_eq!(geometry.first_data_block, 0);
        let group = geometry.group(0);
        assert_eq!(group.start, 0);
        // superblock block, one descriptor block, then the bitmaps
        assert_eq!(group.block_bitmap, 2);
    }

    #[test]
    fn test_plan_multiple_groups() {
        // two full groups of 1 KiB blocks and a partial third
        let geometry = Geometry::plan(1024, (8192 * 2 + 4000) * 1024, 600).unwrap();
        assert_eq!(geometry.group_count, 3);
        assert_eq!(geometry.inodes_per_group, 200);
        assert!(geometry.inodes_count() >= 600);
        let last = geometry.group(2);
        assert_eq!(last.start, 1 + 2 * 8192);
        assert_eq!(last.blocks, geometry.blocks_count - last.start);
        assert_eq!(last.block_bitmap, last.start);
    }

    #[test]
    fn test_plan_drops_useless_tail_group() {
        // one full group plus 3 stray blocks which cannot hold a bitmap pair and a table
        let geometry = Geometry::plan(1024, (8193 + 3) * 1024, 64).unwrap();
        assert_eq!(geometry.group_count, 1);
        assert_eq!(geometry.blocks_count, 8193);
    }

    #[test]
    fn test_plan_rejects_bad_block_size() {
        assert!(Geometry::plan(512, 1 << 20, 64).is_err());
        assert!(Geometry::plan(3000, 1 << 20, 64).is_err());
    }

    #[test]
    fn test_plan_rejects_tiny_device() {
        assert!(Geometry::plan(1024, 8 * 1024, 64).is_err());
    }
}
