//! create our filesystem
use anyhow::anyhow;
use byte_unit::{Byte, ByteUnit};
use log::info;
use std::path::Path;

use crate::{
    device::{BlockDevice, ImageFile},
    fs::{
        block_group::{Bitmap, GroupDescriptor},
        directory::DirEntry,
        filekind::EXT2_S_IFDIR,
        Error, Inode, Result, SuperBlock, RESERVED_INODES, ROOT_INODE, SUPERBLOCK_OFFSET,
        SUPERBLOCK_REGION_SIZE,
    },
    utils::{
        credentials::Owner,
        fs_size_calculator::{descriptor_table_start, Geometry},
        traits::OnDisk,
    },
};

/// permissions of the root directory of a new filesystem
const ROOT_MODE: u16 = 0o755;

/// lay an empty ext2 filesystem over the whole of `device`
///
/// The result has one root directory (inode 2) holding only "." and "..",
/// and inodes 1 to 10 marked used.
/// # Returns
/// The geometry that was written
pub fn format(device: &dyn BlockDevice, block_size: u32, inodes_count: u32) -> Result<Geometry> {
    let geometry = Geometry::plan(block_size, device.len(), inodes_count).map_err(Error::Invalid)?;
    let bs = block_size as usize;
    let bits = bs * 8;
    let root_block = geometry.group(0).first_free;

    let mut groups = Vec::with_capacity(geometry.group_count as usize);
    for index in 0..geometry.group_count {
        let layout = geometry.group(index);
        let first = index == 0;

        let mut blocks = Bitmap::from_block(vec![0u8; bs]);
        blocks.occupy_range(0..layout.overhead() as usize);
        // bits past the end of a short last group never map to real blocks
        blocks.occupy_range(layout.blocks as usize..bits);
        if first {
            blocks.occupy((root_block - layout.start) as usize);
        }
        device.write_at(
            layout.block_bitmap as u64 * block_size as u64,
            blocks.as_raw_slice(),
        )?;

        let mut inodes = Bitmap::from_block(vec![0u8; bs]);
        inodes.occupy_range(geometry.inodes_per_group as usize..bits);
        if first {
            inodes.occupy_range(0..RESERVED_INODES as usize);
        }
        device.write_at(
            layout.inode_bitmap as u64 * block_size as u64,
            inodes.as_raw_slice(),
        )?;

        let table = vec![0u8; geometry.inode_table_blocks as usize * bs];
        device.write_at(layout.inode_table as u64 * block_size as u64, &table)?;

        groups.push(GroupDescriptor {
            block_bitmap: layout.block_bitmap,
            inode_bitmap: layout.inode_bitmap,
            inode_table: layout.inode_table,
            free_blocks_count: blocks.count_free(bits) as u16,
            free_inodes_count: inodes.count_free(bits) as u16,
            used_dirs_count: u16::from(first),
            ..Default::default()
        });
    }

    // the root directory
    let mut dir_block = vec![0u8; bs];
    let dot = DirEntry::new(ROOT_INODE, b".");
    dot.encode(&mut dir_block, 0)?;
    let mut dotdot = DirEntry::new(ROOT_INODE, b"..");
    dotdot.rec_len = (bs - dot.rec_len as usize) as u16;
    dotdot.encode(&mut dir_block, dot.rec_len as usize)?;
    device.write_at(root_block as u64 * block_size as u64, &dir_block)?;

    let mut root = Inode::new(EXT2_S_IFDIR | ROOT_MODE, Owner::current());
    root.size = block_size;
    root.blocks = block_size / 512;
    root.block[0] = root_block;
    let mut record = vec![0u8; Inode::SIZE];
    root.encode_into(&mut record)?;
    let root_offset = groups[0].inode_table as u64 * block_size as u64
        + (ROOT_INODE - 1) as u64 * Inode::SIZE as u64;
    device.write_at(root_offset, &record)?;

    let mut table = vec![0u8; geometry.descriptor_blocks as usize * bs];
    GroupDescriptor::encode_table(&groups, &mut table)?;
    device.write_at(
        descriptor_table_start(block_size) as u64 * block_size as u64,
        &table,
    )?;

    let mut superblock = SuperBlock::new(&geometry);
    superblock.free_blocks_count = groups.iter().map(|g| g.free_blocks_count as u32).sum();
    superblock.free_inodes_count = groups.iter().map(|g| g.free_inodes_count as u32).sum();
    let mut region = vec![0u8; SUPERBLOCK_REGION_SIZE];
    superblock.encode_into(&mut region)?;
    device.write_at(SUPERBLOCK_OFFSET, &region)?;

    device.sync()?;
    Ok(geometry)
}

/// create a new filesystem,given the path of the image file,image file size and block size,
/// # Params
/// - `image_file_path`: the path of the image file, which must not exist yet
/// - `file_size`: the size of the image file, shrunk to a whole number of blocks
/// - `inode_count`: the least number of inodes
/// - `block_size`: the block size of the filesystem
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(
    image_file_path: P,
    file_size: u64,
    inode_count: u32,
    block_size: u32,
) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    // check if specified image_file_size is enough before touching the disk
    let geometry = Geometry::plan(block_size, file_size, inode_count).map_err(|reason| {
        anyhow!(
            "cannot format {} with block size {} and {} inodes: {reason}",
            Byte::from_bytes(file_size as _).get_appropriate_unit(true),
            Byte::from_bytes(block_size as _).get_adjusted_unit(ByteUnit::B),
            inode_count
        )
    })?;
    let image_len = geometry.blocks_count as u64 * block_size as u64;
    let image = ImageFile::create(image_file_path, image_len)?;
    let geometry = format(&image, block_size, inode_count)?;
    info!(
        "created ext2 filesystem: {} blocks of {} bytes in {} groups, {} inodes",
        geometry.blocks_count,
        geometry.block_size,
        geometry.group_count,
        geometry.inodes_count()
    );
    Ok(())
}
