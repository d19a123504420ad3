//! logical to physical block translation through the inode's pointer tree
use log::warn;
use smallvec::SmallVec;

use super::{
    error::{Error, Result},
    fs_layout::Ext2Fs,
    inode::Inode,
    DIRECT_POINTERS, DOUBLE_INDIRECT, SINGLE_INDIRECT, TRIPLE_INDIRECT,
};

/// where logical block `iblock` hangs in the pointer tree: a slot of
/// `inode.block`, then one pointer index per level of indirection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockPath {
    pub root: usize,
    pub offsets: SmallVec<[u32; 3]>,
}

impl BlockPath {
    /// decompose `iblock` for a tree with `pointers` pointers per block
    pub fn resolve(iblock: u32, pointers: u32) -> Result<Self> {
        let p = pointers as u64;
        let mut index = iblock as u64;
        if index < DIRECT_POINTERS as u64 {
            return Ok(BlockPath {
                root: index as usize,
                offsets: SmallVec::new(),
            });
        }
        index -= DIRECT_POINTERS as u64;
        if index < p {
            return Ok(BlockPath {
                root: SINGLE_INDIRECT,
                offsets: SmallVec::from_slice(&[index as u32]),
            });
        }
        index -= p;
        if index < p * p {
            return Ok(BlockPath {
                root: DOUBLE_INDIRECT,
                offsets: SmallVec::from_slice(&[(index / p) as u32, (index % p) as u32]),
            });
        }
        index -= p * p;
        if index < p * p * p {
            return Ok(BlockPath {
                root: TRIPLE_INDIRECT,
                offsets: SmallVec::from_slice(&[
                    (index / (p * p)) as u32,
                    ((index / p) % p) as u32,
                    (index % p) as u32,
                ]),
            });
        }
        warn!("logical block {iblock} is beyond triple-indirect reach");
        Err(Error::BadBlock(iblock))
    }
}

fn pointer_at(table: &[u8], index: u32) -> u32 {
    let at = index as usize * 4;
    u32::from_le_bytes([table[at], table[at + 1], table[at + 2], table[at + 3]])
}

fn set_pointer_at(table: &mut [u8], index: u32, value: u32) {
    let at = index as usize * 4;
    table[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// the pointer tree
impl Ext2Fs {
    /// physical block backing logical block `iblock`, 0 for a hole
    pub(crate) fn get_block_number(&self, inode: &Inode, iblock: u32) -> Result<u32> {
        let path = BlockPath::resolve(iblock, self.pointers_per_block())?;
        let mut block = inode.block[path.root];
        let mut table = vec![0u8; self.block_size() as usize];
        for &offset in &path.offsets {
            if block == 0 {
                return Ok(0);
            }
            self.read_block(block, &mut table)?;
            block = pointer_at(&table, offset);
        }
        Ok(block)
    }

    /// record `rblock` as the backing of logical block `iblock`,
    /// allocating any missing indirect blocks on the way
    pub(crate) fn set_block_number(
        &self,
        inode: &mut Inode,
        inode_no: u32,
        iblock: u32,
        rblock: u32,
    ) -> Result<()> {
        let path = BlockPath::resolve(iblock, self.pointers_per_block())?;
        let Some((&last, inner)) = path.offsets.split_last() else {
            inode.block[path.root] = rblock;
            return Ok(());
        };
        if inode.block[path.root] == 0 {
            inode.block[path.root] = self.allocate_block()?;
            self.write_inode(inode_no, inode)?;
        }

        let mut table_at = inode.block[path.root];
        let mut table = vec![0u8; self.block_size() as usize];
        for &offset in inner {
            self.read_block(table_at, &mut table)?;
            let mut next = pointer_at(&table, offset);
            if next == 0 {
                next = self.allocate_block()?;
                set_pointer_at(&mut table, offset, next);
                self.write_block(table_at, &table)?;
            }
            table_at = next;
        }
        self.read_block(table_at, &mut table)?;
        set_pointer_at(&mut table, last, rblock);
        self.write_block(table_at, &table)
    }

    /// back logical block `iblock` with a fresh block and extend the
    /// inode's coverage to include it
    pub(crate) fn allocate_inode_block(
        &self,
        inode: &mut Inode,
        inode_no: u32,
        iblock: u32,
    ) -> Result<()> {
        verbose!(self, "allocating logical block {iblock} of inode #{inode_no}");
        let block = self.allocate_block()?;
        self.set_block_number(inode, inode_no, iblock, block)?;
        let sectors_per_block = self.block_size() / 512;
        let needed = (iblock + 1) * sectors_per_block;
        if inode.blocks < needed {
            inode.blocks = needed;
        }
        self.write_inode(inode_no, inode)
    }

    /// read logical block `iblock` into `buf`;
    /// past the coverage and in holes `buf` comes back zeroed
    /// # Returns
    /// The physical block read, 0 if nothing was read
    pub(crate) fn inode_read_block(
        &self,
        inode: &Inode,
        iblock: u32,
        buf: &mut [u8],
    ) -> Result<u32> {
        if iblock >= inode.allocated_blocks(self.block_size()) {
            verbose!(self, "logical block {iblock} is past the coverage, reading zeros");
            buf.fill(0);
            return Ok(0);
        }
        let block = self.get_block_number(inode, iblock)?;
        if block == 0 {
            buf.fill(0);
            return Ok(0);
        }
        self.read_block(block, buf)?;
        Ok(block)
    }

    /// write `buf` as logical block `iblock`, growing the coverage up to and
    /// including `iblock` first; `inode` is kept in step with the disk
    /// # Returns
    /// The physical block written
    pub(crate) fn inode_write_block(
        &self,
        inode: &mut Inode,
        inode_no: u32,
        iblock: u32,
        buf: &[u8],
    ) -> Result<u32> {
        loop {
            let covered = inode.allocated_blocks(self.block_size());
            if iblock < covered {
                break;
            }
            self.allocate_inode_block(inode, inode_no, covered)?;
            *inode = self.read_inode(inode_no)?;
        }
        let mut block = self.get_block_number(inode, iblock)?;
        if block == 0 {
            // a hole inside the coverage
            block = self.allocate_block()?;
            self.set_block_number(inode, inode_no, iblock, block)?;
            self.write_inode(inode_no, inode)?;
        }
        self.write_block(block, buf)?;
        Ok(block)
    }
}
