use std::ops::Range;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::fs::error::Result;
use crate::utils::traits::OnDisk;

/// size of one record in the group descriptor table
pub const GROUP_DESCRIPTOR_SIZE: usize = 32;

/// one entry of the block group descriptor table
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDescriptor {
    /// block holding this group's block bitmap
    pub block_bitmap: u32,
    /// block holding this group's inode bitmap
    pub inode_bitmap: u32,
    /// first block of this group's inode table
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub pad: u16,
    pub reserved: [u8; 12],
}

impl OnDisk for GroupDescriptor {
    const SIZE: usize = GROUP_DESCRIPTOR_SIZE;
}

/// for serialize and deserialize the whole table
impl GroupDescriptor {
    /// decode `count` consecutive descriptors from `buf`
    pub fn decode_table(buf: &[u8], count: usize) -> Result<Vec<GroupDescriptor>> {
        (0..count)
            .map(|idx| {
                GroupDescriptor::decode(buf.get(idx * GROUP_DESCRIPTOR_SIZE..).unwrap_or_default())
            })
            .collect()
    }

    /// encode `groups` back to back into `buf`, which must be large enough
    pub fn encode_table(groups: &[GroupDescriptor], buf: &mut [u8]) -> Result<()> {
        for (idx, group) in groups.iter().enumerate() {
            let slot = buf
                .get_mut(idx * GROUP_DESCRIPTOR_SIZE..)
                .unwrap_or_default();
            group.encode_into(slot)?;
        }
        Ok(())
    }
}

/// An allocation bitmap as stored in a single block.
/// Bit `i` lives in byte `i / 8` at position `i % 8`, least significant bit first.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Bitmap {
    bits: BitVec<u8, Lsb0>,
}

impl From<BitVec<u8, Lsb0>> for Bitmap {
    fn from(bits: BitVec<u8, Lsb0>) -> Self {
        Bitmap { bits }
    }
}

impl Bitmap {
    /// wrap the raw bytes of a bitmap block
    pub fn from_block(raw: Vec<u8>) -> Self {
        Bitmap {
            bits: BitVec::from_vec(raw),
        }
    }

    /// check if slot `i` is in use, slots past the end are reported free
    pub fn is_occupied(&self, i: usize) -> bool {
        self.bits.get(i).as_deref().copied().unwrap_or(false)
    }

    pub fn occupy(&mut self, i: usize) {
        self.bits.set(i, true);
    }

    /// mark every slot in `range` as used
    pub fn occupy_range(&mut self, range: Range<usize>) {
        self.bits[range].fill(true);
    }

    /// lowest free slot among the first `limit` slots
    pub fn first_free(&self, limit: usize) -> Option<usize> {
        self.bits[..limit.min(self.bits.len())].first_zero()
    }

    /// every free slot among the first `limit` slots, ascending
    pub fn free_slots(&self, limit: usize) -> impl Iterator<Item = usize> + '_ {
        self.bits[..limit.min(self.bits.len())].iter_zeros()
    }

    /// calculate the number of free slots among the first `limit` slots
    pub fn count_free(&self, limit: usize) -> usize {
        self.bits[..limit.min(self.bits.len())].count_zeros()
    }

    pub fn as_raw_slice(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }
}
