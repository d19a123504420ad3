//! what does our filesystem look like in the memory

use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::{
    device::BlockDevice,
    mount::MountOptions,
    utils::{fs_size_calculator, time_util, traits::OnDisk},
};

use super::{
    block_group::{Bitmap, GroupDescriptor},
    error::{Error, Result},
    inode::Inode,
    superblock::SuperBlock,
    EXT2_SUPER_MAGIC, MAX_LOG_BLOCK_SIZE, RESERVED_INODES, SUPERBLOCK_OFFSET,
    SUPERBLOCK_REGION_SIZE,
};

/// A mounted ext2 filesystem.
///
/// Geometry is fixed at mount time. Everything the allocators touch (the
/// superblock counters, the descriptor table, and through them the bitmaps)
/// sits behind one filesystem-wide lock; inode records and data blocks do not.
pub struct Ext2Fs {
    device: Arc<dyn BlockDevice>,
    options: MountOptions,
    block_size: u32,
    pointers_per_block: u32,
    blocks_count: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    first_data_block: u32,
    inode_size: u32,
    descriptor_table_start: u32,
    descriptor_table_blocks: u32,
    /// inode table location of each group, never moves
    inode_tables: Vec<u32>,
    state: Mutex<AllocState>,
}

struct AllocState {
    superblock: SuperBlock,
    /// the whole 1024 byte region, bytes past the decoded head are kept verbatim
    superblock_region: Vec<u8>,
    groups: Vec<GroupDescriptor>,
}

/// usage numbers for `statfs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    pub blocks: u32,
    pub free_blocks: u32,
    pub reserved_blocks: u32,
    pub inodes: u32,
    pub free_inodes: u32,
}

impl Ext2Fs {
    /// read the superblock and descriptor table of `device` and validate them
    pub fn mount(device: Arc<dyn BlockDevice>, options: MountOptions) -> Result<Arc<Self>> {
        let mut superblock_region = vec![0u8; SUPERBLOCK_REGION_SIZE];
        device.read_at(SUPERBLOCK_OFFSET, &mut superblock_region)?;
        let mut superblock = SuperBlock::decode(&superblock_region)?;
        if superblock.magic != EXT2_SUPER_MAGIC {
            error!(
                "bad superblock magic {:#06x}, this is not an ext2 filesystem",
                superblock.magic
            );
            return Err(Error::BadMagic(superblock.magic));
        }
        // directory record lengths are 16-bit, so blocks stop at 32 KiB
        if superblock.log_block_size > MAX_LOG_BLOCK_SIZE {
            return Err(Error::Invalid(format!(
                "unsupported block size 1024 << {}",
                superblock.log_block_size
            )));
        }
        let block_size = superblock.block_size();
        let inode_size = superblock.inode_size();
        let bits_per_bitmap = block_size * 8;
        if superblock.blocks_per_group == 0
            || superblock.blocks_per_group > bits_per_bitmap
            || superblock.inodes_per_group == 0
            || superblock.inodes_per_group > bits_per_bitmap
            || inode_size < Inode::SIZE as u32
            || inode_size > block_size
            || superblock.blocks_count <= superblock.first_data_block
        {
            return Err(Error::Invalid(format!(
                "unsupported geometry: {} blocks per group, {} inodes per group, {} byte inodes",
                superblock.blocks_per_group, superblock.inodes_per_group, inode_size
            )));
        }

        let group_count = superblock.group_count();
        let descriptor_table_start = fs_size_calculator::descriptor_table_start(block_size);
        let descriptor_table_blocks =
            fs_size_calculator::descriptor_table_blocks(group_count, block_size);
        let mut table = vec![0u8; (descriptor_table_blocks * block_size) as usize];
        device.read_at(
            descriptor_table_start as u64 * block_size as u64,
            &mut table,
        )?;
        let groups = GroupDescriptor::decode_table(&table, group_count as usize)?;

        info!(
            "mounting ext2: {} byte blocks, {} blocks in {} groups, {} inodes, {}",
            block_size,
            superblock.blocks_count,
            group_count,
            superblock.inodes_count,
            if options.read_write { "read-write" } else { "read-only" }
        );

        if options.read_write {
            superblock.mtime = time_util::now();
            superblock.mnt_count = superblock.mnt_count.wrapping_add(1);
        }
        let fs = Ext2Fs {
            device,
            options,
            block_size,
            pointers_per_block: block_size / 4,
            blocks_count: superblock.blocks_count,
            blocks_per_group: superblock.blocks_per_group,
            inodes_per_group: superblock.inodes_per_group,
            first_data_block: superblock.first_data_block,
            inode_size,
            descriptor_table_start,
            descriptor_table_blocks,
            inode_tables: groups.iter().map(|group| group.inode_table).collect(),
            state: Mutex::new(AllocState {
                superblock,
                superblock_region,
                groups,
            }),
        };
        {
            let mut state = fs.state.lock();
            for (idx, group) in state.groups.iter().enumerate() {
                verbose!(
                    fs,
                    "group {idx}: block bitmap @ {}, inode bitmap @ {}, inode table @ {}, {} free blocks, {} free inodes, {} directories",
                    group.block_bitmap,
                    group.inode_bitmap,
                    group.inode_table,
                    group.free_blocks_count,
                    group.free_inodes_count,
                    group.used_dirs_count
                );
            }
            if fs.options.read_write {
                fs.rewrite_superblock(&mut state)?;
            }
        }
        Ok(Arc::new(fs))
    }
}

/// get geometry and options of this filesystem
impl Ext2Fs {
    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub(crate) fn pointers_per_block(&self) -> u32 {
        self.pointers_per_block
    }

    #[inline]
    pub fn verbose(&self) -> bool {
        self.options.verbose
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        !self.options.read_write
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// a copy of the in-memory superblock
    pub fn superblock(&self) -> SuperBlock {
        self.state.lock().superblock.clone()
    }

    /// a copy of the in-memory group descriptor table
    pub fn group_descriptors(&self) -> Vec<GroupDescriptor> {
        self.state.lock().groups.clone()
    }

    pub fn stats(&self) -> FsStats {
        let state = self.state.lock();
        FsStats {
            block_size: self.block_size,
            blocks: state.superblock.blocks_count,
            free_blocks: state.superblock.free_blocks_count,
            reserved_blocks: state.superblock.r_blocks_count,
            inodes: state.superblock.inodes_count,
            free_inodes: state.superblock.free_inodes_count,
        }
    }

    /// flush the device
    pub fn sync(&self) -> Result<()> {
        self.device.sync()?;
        Ok(())
    }

    /// blocks that belong to `group`, the last group may be short
    fn blocks_in_group(&self, group: usize) -> u32 {
        let start = self.first_data_block + group as u32 * self.blocks_per_group;
        (self.blocks_count - start).min(self.blocks_per_group)
    }
}

/// raw block access
impl Ext2Fs {
    #[inline]
    fn block_offset(&self, block_no: u32) -> u64 {
        block_no as u64 * self.block_size as u64
    }

    fn write_bytes(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.device.write_at(offset, buf)?;
        Ok(())
    }

    /// read filesystem block `block_no` into `buf`, which is one block long
    pub(crate) fn read_block(&self, block_no: u32, buf: &mut [u8]) -> Result<()> {
        if block_no == 0 {
            error!("attempted to read block #0, which never holds file data");
            return Err(Error::BadBlock(0));
        }
        self.device.read_at(self.block_offset(block_no), buf)?;
        Ok(())
    }

    /// write `buf`, which is one block long, to filesystem block `block_no`
    pub(crate) fn write_block(&self, block_no: u32, buf: &[u8]) -> Result<()> {
        if block_no == 0 {
            error!("attempted to write block #0, which never holds file data");
            return Err(Error::BadBlock(0));
        }
        self.write_bytes(self.block_offset(block_no), buf)
    }

    fn rewrite_superblock(&self, state: &mut AllocState) -> Result<()> {
        let AllocState {
            superblock,
            superblock_region,
            ..
        } = state;
        superblock.encode_into(superblock_region)?;
        self.write_bytes(SUPERBLOCK_OFFSET, &superblock_region[..])
    }

    fn rewrite_descriptors(&self, state: &AllocState) -> Result<()> {
        let mut table = vec![0u8; (self.descriptor_table_blocks * self.block_size) as usize];
        GroupDescriptor::encode_table(&state.groups, &mut table)?;
        self.write_bytes(self.block_offset(self.descriptor_table_start), &table)
    }
}

/// block and inode allocation
impl Ext2Fs {
    /// claim the lowest free block of the first group that has one,
    /// zero it and return its absolute number
    pub(crate) fn allocate_block(&self) -> Result<u32> {
        self.ensure_writable()?;
        let block_size = self.block_size as usize;
        let block_no = {
            let mut state = self.state.lock();
            let Some(group) = state
                .groups
                .iter()
                .position(|group| group.free_blocks_count > 0)
            else {
                error!("no available blocks, disk is out of space");
                return Err(Error::NoSpace);
            };
            let bitmap_at = state.groups[group].block_bitmap;
            let mut raw = vec![0u8; block_size];
            self.read_block(bitmap_at, &mut raw)?;
            let mut bitmap = Bitmap::from_block(raw);
            let Some(bit) = bitmap.first_free(self.blocks_in_group(group) as usize) else {
                error!(
                    "group {group} claims {} free blocks but its bitmap is full",
                    state.groups[group].free_blocks_count
                );
                return Err(Error::Corrupt(format!(
                    "block bitmap of group {group} disagrees with its free count"
                )));
            };
            bitmap.occupy(bit);
            self.write_block(bitmap_at, bitmap.as_raw_slice())?;

            state.groups[group].free_blocks_count -= 1;
            state.superblock.free_blocks_count =
                state.superblock.free_blocks_count.saturating_sub(1);
            self.rewrite_descriptors(&state)?;
            self.rewrite_superblock(&mut state)?;

            let block_no =
                self.first_data_block + group as u32 * self.blocks_per_group + bit as u32;
            verbose!(self, "allocated block #{block_no} (group {group}, bit {bit})");
            block_no
        };
        if block_no == 0 {
            return Err(Error::Corrupt("block #0 is marked free".to_string()));
        }
        self.write_block(block_no, &vec![0u8; block_size])?;
        Ok(block_no)
    }

    /// claim a free inode numbered above the reserved range
    pub(crate) fn allocate_inode(&self) -> Result<u32> {
        self.ensure_writable()?;
        let mut state = self.state.lock();
        for group in 0..state.groups.len() {
            if state.groups[group].free_inodes_count == 0 {
                continue;
            }
            verbose!(
                self,
                "group {group} has {} free inodes",
                state.groups[group].free_inodes_count
            );
            let bitmap_at = state.groups[group].inode_bitmap;
            let mut raw = vec![0u8; self.block_size as usize];
            self.read_block(bitmap_at, &mut raw)?;
            let mut bitmap = Bitmap::from_block(raw);
            let first_in_group = group as u32 * self.inodes_per_group + 1;
            let usable = {
                let mut free = bitmap.free_slots(self.inodes_per_group as usize).peekable();
                if free.peek().is_none() {
                    error!(
                        "group {group} claims {} free inodes but its bitmap is full",
                        state.groups[group].free_inodes_count
                    );
                    return Err(Error::Corrupt(format!(
                        "inode bitmap of group {group} disagrees with its free count"
                    )));
                }
                free.find(|&bit| first_in_group + bit as u32 > RESERVED_INODES)
            };
            // free bits left only in the reserved range
            let Some(bit) = usable else {
                warn!("group {group} has free inodes only up to #{RESERVED_INODES}, trying the next one");
                continue;
            };
            bitmap.occupy(bit);
            self.write_block(bitmap_at, bitmap.as_raw_slice())?;

            state.groups[group].free_inodes_count -= 1;
            state.superblock.free_inodes_count =
                state.superblock.free_inodes_count.saturating_sub(1);
            self.rewrite_descriptors(&state)?;
            self.rewrite_superblock(&mut state)?;

            let inode_no = first_in_group + bit as u32;
            verbose!(self, "allocated inode #{inode_no}");
            return Ok(inode_no);
        }
        error!("no available inodes, disk is out of space");
        Err(Error::NoSpace)
    }

    /// bump the directory count of the group `inode_no` lives in
    pub(crate) fn count_directory(&self, inode_no: u32) -> Result<()> {
        let group = ((inode_no - 1) / self.inodes_per_group) as usize;
        let mut state = self.state.lock();
        let Some(descriptor) = state.groups.get_mut(group) else {
            return Err(Error::BadInode(inode_no));
        };
        descriptor.used_dirs_count += 1;
        self.rewrite_descriptors(&state)
    }
}

/// [Inode] operations
impl Ext2Fs {
    /// absolute byte offset of inode `inode_no`'s slot
    fn inode_offset(&self, inode_no: u32) -> Result<u64> {
        if inode_no == 0 {
            error!("attempted to access inode #0");
            return Err(Error::BadInode(0));
        }
        let index = inode_no - 1;
        let group = (index / self.inodes_per_group) as usize;
        let Some(&table) = self.inode_tables.get(group) else {
            error!(
                "inode #{inode_no} lies in group {group}, but there are only {} groups",
                self.inode_tables.len()
            );
            return Err(Error::BadInode(inode_no));
        };
        let local = (index % self.inodes_per_group) as u64;
        Ok(self.block_offset(table) + local * self.inode_size as u64)
    }

    /// fetch the current on-disk record of `inode_no`
    pub fn read_inode(&self, inode_no: u32) -> Result<Inode> {
        let mut raw = [0u8; Inode::SIZE];
        self.device.read_at(self.inode_offset(inode_no)?, &mut raw)?;
        Inode::decode(&raw)
    }

    /// store `inode` as the record of `inode_no`;
    /// the part of the slot past the first 128 bytes is left alone
    pub(crate) fn write_inode(&self, inode_no: u32, inode: &Inode) -> Result<()> {
        let mut raw = [0u8; Inode::SIZE];
        inode.encode_into(&mut raw)?;
        self.write_bytes(self.inode_offset(inode_no)?, &raw)
    }
}
