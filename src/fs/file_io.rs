//! byte-range reads and writes over an inode's blocks
use super::{
    error::{Error, Result},
    fs_layout::Ext2Fs,
    inode::Inode,
};

/// read and write data in the filesystem
impl Ext2Fs {
    /// copy up to `buf.len()` bytes starting at `offset` out of `inode`,
    /// stopping at the file size
    /// # Returns
    /// The number of bytes read
    pub(crate) fn read_inode_buffer(
        &self,
        inode: &Inode,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let size = inode.size as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let end = (offset + buf.len() as u64).min(size);
        let block_size = self.block_size() as u64;
        let mut block = vec![0u8; block_size as usize];
        let mut pos = offset;
        while pos < end {
            let iblock = (pos / block_size) as u32;
            let in_block = (pos % block_size) as usize;
            let chunk = (block_size - in_block as u64).min(end - pos) as usize;
            self.inode_read_block(inode, iblock, &mut block)?;
            let at = (pos - offset) as usize;
            buf[at..at + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
            pos += chunk as u64;
        }
        Ok((end - offset) as usize)
    }

    /// store `data` at `offset` in `inode`, growing the file as needed
    /// # Returns
    /// The number of bytes written
    pub(crate) fn write_inode_buffer(
        &self,
        inode: &mut Inode,
        inode_no: u32,
        offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        if end > u32::MAX as u64 {
            return Err(Error::Invalid(format!(
                "a write ending at byte {end} exceeds the 32-bit file size"
            )));
        }
        if end > inode.size as u64 {
            verbose!(self, "inode #{inode_no} grows from {} to {end} bytes", inode.size);
            inode.size = end as u32;
            self.write_inode(inode_no, inode)?;
        }

        let block_size = self.block_size() as u64;
        let mut block = vec![0u8; block_size as usize];
        let mut pos = offset;
        while pos < end {
            let iblock = (pos / block_size) as u32;
            let in_block = (pos % block_size) as usize;
            let chunk = (block_size - in_block as u64).min(end - pos) as usize;
            if chunk < block_size as usize {
                // keep the rest of a partially overwritten block
                self.inode_read_block(inode, iblock, &mut block)?;
            }
            let at = (pos - offset) as usize;
            block[in_block..in_block + chunk].copy_from_slice(&data[at..at + chunk]);
            self.inode_write_block(inode, inode_no, iblock, &block)?;
            pos += chunk as u64;
        }
        Ok(data.len())
    }

    /// cut `inode_no` to zero length
    ///
    /// Only the size changes; the blocks stay allocated and referenced.
    pub(crate) fn truncate_inode(&self, inode_no: u32) -> Result<()> {
        self.ensure_writable()?;
        let mut inode = self.read_inode(inode_no)?;
        inode.size = 0;
        self.write_inode(inode_no, &inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::{filekind::EXT2_S_IFREG, ROOT_INODE},
        utils::init_test_environment::*,
    };

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|n| (n % 251) as u8).collect()
    }

    #[test]
    fn test_write_3000_then_read_a_slice() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"data", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        let data = pattern(3000);
        assert_eq!(fs.write_inode_buffer(&mut inode, inode_no, 0, &data).unwrap(), 3000);

        let inode = fs.read_inode(inode_no).unwrap();
        assert_eq!(inode.size, 3000);
        assert_eq!(inode.allocated_blocks(1024), 3);
        let mut buf = vec![0u8; 2000];
        assert_eq!(fs.read_inode_buffer(&inode, 500, &mut buf).unwrap(), 2000);
        assert_eq!(buf, &data[500..2500]);
    }

    #[test]
    fn test_range_across_direct_and_single_indirect() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"edge", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        // logical block 11 is the last direct one, 12 the first behind the indirect block
        let start = 11 * 1024 + 300;
        let data = pattern(1424);
        assert_eq!(
            fs.write_inode_buffer(&mut inode, inode_no, start as u64, &data)
                .unwrap(),
            1424
        );

        let inode = fs.read_inode(inode_no).unwrap();
        assert_eq!(inode.size as usize, 12 * 1024 + 700);
        assert_ne!(inode.block[12], 0);
        let mut buf = vec![0u8; data.len()];
        assert_eq!(
            fs.read_inode_buffer(&inode, start as u64, &mut buf).unwrap(),
            1424
        );
        assert_eq!(buf, data);
        // everything before the range reads back as zeros
        let mut head = vec![0xAAu8; start];
        assert_eq!(fs.read_inode_buffer(&inode, 0, &mut head).unwrap(), start);
        assert!(head.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_reads_stop_at_the_size() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"short", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        fs.write_inode_buffer(&mut inode, inode_no, 0, b"hello world")
            .unwrap();
        let mut buf = vec![0u8; 100];
        assert_eq!(fs.read_inode_buffer(&inode, 6, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(fs.read_inode_buffer(&inode, 11, &mut buf).unwrap(), 0);
        assert_eq!(fs.read_inode_buffer(&inode, 4000, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_overwrite_inside_a_block_keeps_neighbours() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"patch", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        let mut expected = pattern(2500);
        fs.write_inode_buffer(&mut inode, inode_no, 0, &expected)
            .unwrap();
        // straddle the first block boundary
        fs.write_inode_buffer(&mut inode, inode_no, 1020, b"XXXXXXXX")
            .unwrap();
        expected[1020..1028].copy_from_slice(b"XXXXXXXX");

        let inode = fs.read_inode(inode_no).unwrap();
        assert_eq!(inode.size, 2500);
        let mut buf = vec![0u8; 2500];
        fs.read_inode_buffer(&inode, 0, &mut buf).unwrap();
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_write_past_the_end_leaves_zeros() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"gap", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        fs.write_inode_buffer(&mut inode, inode_no, 5000, b"tail")
            .unwrap();
        let inode = fs.read_inode(inode_no).unwrap();
        assert_eq!(inode.size, 5004);
        let mut buf = vec![0xFFu8; 5004];
        fs.read_inode_buffer(&inode, 0, &mut buf).unwrap();
        assert!(buf[..5000].iter().all(|&b| b == 0));
        assert_eq!(&buf[5000..], b"tail");
    }

    #[test]
    fn test_large_file_goes_through_double_indirect() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"big", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        // 12 direct + 256 single-indirect blocks, then 2 more
        let data = pattern((12 + 256 + 2) * 1024);
        fs.write_inode_buffer(&mut inode, inode_no, 0, &data).unwrap();

        let inode = fs.read_inode(inode_no).unwrap();
        assert_ne!(inode.block[13], 0);
        let mut buf = vec![0u8; 2048];
        fs.read_inode_buffer(&inode, (12 + 256) * 1024, &mut buf)
            .unwrap();
        assert_eq!(buf, &data[(12 + 256) * 1024..]);
    }

    #[test]
    fn test_truncate_keeps_blocks() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"cut", 0o644).unwrap();
        let mut inode = fs.read_inode(inode_no).unwrap();
        fs.write_inode_buffer(&mut inode, inode_no, 0, &pattern(2048))
            .unwrap();
        let free = fs.superblock().free_blocks_count;
        fs.truncate_inode(inode_no).unwrap();
        let inode = fs.read_inode(inode_no).unwrap();
        assert_eq!(inode.size, 0);
        assert_eq!(inode.allocated_blocks(1024), 2);
        assert_eq!(fs.superblock().free_blocks_count, free);
        let mut buf = vec![0u8; 16];
        assert_eq!(fs.read_inode_buffer(&inode, 0, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_new_inode_has_no_data() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode = Inode::new(EXT2_S_IFREG | 0o644, Default::default());
        let mut buf = vec![0u8; 16];
        assert_eq!(fs.read_inode_buffer(&inode, 0, &mut buf).unwrap(), 0);
    }
}
