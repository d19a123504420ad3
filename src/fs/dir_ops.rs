//! directory contents: lookup, listing, insertion and removal of records,
//! and the namespace operations built on them
use std::ops::ControlFlow;

use log::{debug, warn};

use crate::utils::credentials::Owner;

use super::{
    directory::{DirEntry, MAX_NAME_LEN},
    error::{Error, Result},
    filekind::{EXT2_S_IFDIR, EXT2_S_IFLNK, EXT2_S_IFREG},
    fs_layout::Ext2Fs,
    inode::Inode,
    FAST_SYMLINK_MAX,
};

/// where a record sits inside its directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryPos {
    /// logical block of the directory
    block_nr: u32,
    /// byte offset inside that block
    offset: usize,
    /// byte offset from the start of the directory
    total: u64,
}

/// what `create_entry` found while walking the directory
enum Slot {
    /// a deleted record large enough to take the new one
    Reuse(EntryPos),
    /// the last record, which has slack after it
    Tail(EntryPos, DirEntry),
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Invalid(format!(
            "name must be 1 to {MAX_NAME_LEN} bytes, got {}",
            name.len()
        )));
    }
    if name.contains(&b'/') || name.contains(&0) {
        return Err(Error::Invalid(
            "name must not contain '/' or NUL".to_string(),
        ));
    }
    Ok(())
}

/// walking and editing directory records
impl Ext2Fs {
    fn directory_inode(&self, inode_no: u32) -> Result<Inode> {
        let inode = self.read_inode(inode_no)?;
        if !inode.is_dir() {
            warn!("inode #{inode_no} is not a directory");
            return Err(Error::BadParent);
        }
        Ok(inode)
    }

    /// visit every record of `dir` in order until `visit` breaks;
    /// on a break, `block` holds the directory block the record lives in
    fn walk_entries<T>(
        &self,
        dir: &Inode,
        block: &mut [u8],
        mut visit: impl FnMut(&DirEntry, EntryPos) -> ControlFlow<T>,
    ) -> Result<Option<T>> {
        let block_size = self.block_size() as usize;
        let size = dir.size as u64;
        let mut pos = EntryPos {
            block_nr: 0,
            offset: 0,
            total: 0,
        };
        if size == 0 {
            return Ok(None);
        }
        self.inode_read_block(dir, 0, block)?;
        while pos.total < size {
            if pos.offset >= block_size {
                pos.block_nr += 1;
                pos.offset -= block_size;
                self.inode_read_block(dir, pos.block_nr, block)?;
            }
            let entry = DirEntry::decode(block, pos.offset)?;
            if let ControlFlow::Break(found) = visit(&entry, pos) {
                return Ok(Some(found));
            }
            pos.offset += entry.rec_len as usize;
            pos.total += entry.rec_len as u64;
        }
        Ok(None)
    }

    /// the live record named `name` in directory `dir_no`
    pub(crate) fn find_entry(&self, dir_no: u32, name: &[u8]) -> Result<Option<DirEntry>> {
        let dir = self.directory_inode(dir_no)?;
        let mut block = vec![0u8; self.block_size() as usize];
        self.walk_entries(&dir, &mut block, |entry, _| {
            if entry.inode != 0 && entry.name == name {
                ControlFlow::Break(entry.clone())
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// the `index`-th live record of directory `dir_no`, "." and ".." not counted
    pub(crate) fn entry_at(&self, dir_no: u32, index: usize) -> Result<Option<DirEntry>> {
        let dir = self.directory_inode(dir_no)?;
        let mut block = vec![0u8; self.block_size() as usize];
        let mut seen = 0;
        self.walk_entries(&dir, &mut block, |entry, _| {
            if entry.inode == 0 || entry.is_dot_or_dotdot() {
                return ControlFlow::Continue(());
            }
            if seen == index {
                return ControlFlow::Break(entry.clone());
            }
            seen += 1;
            ControlFlow::Continue(())
        })
    }

    /// link `name` to `inode_no` inside directory `parent_no`
    ///
    /// Takes the first deleted record that is large enough, else splits the
    /// slack off the last record, else appends a whole new block.
    pub(crate) fn create_entry(&self, parent_no: u32, name: &[u8], inode_no: u32) -> Result<()> {
        check_name(name)?;
        let mut parent = self.directory_inode(parent_no)?;
        let block_size = self.block_size() as usize;
        let rec_len = DirEntry::min_rec_len(name.len());
        let mut block = vec![0u8; block_size];
        let parent_size = parent.size as u64;
        verbose!(
            self,
            "creating a {rec_len} byte record for {} -> #{inode_no} in #{parent_no}",
            String::from_utf8_lossy(name)
        );

        let slot = self.walk_entries(&parent, &mut block, |entry, pos| {
            if entry.inode == 0 && entry.rec_len as usize >= rec_len {
                return ControlFlow::Break(Slot::Reuse(pos));
            }
            let is_last = pos.total + entry.rec_len as u64 == parent_size;
            if is_last && entry.rec_len as usize != entry.actual_len() {
                return ControlFlow::Break(Slot::Tail(pos, entry.clone()));
            }
            ControlFlow::Continue(())
        })?;

        match slot {
            Some(Slot::Reuse(pos)) => {
                let mut entry = DirEntry::new(inode_no, name);
                // keep the record's extent, the next record starts where it did
                entry.rec_len = DirEntry::decode(&block, pos.offset)?.rec_len;
                entry.encode(&mut block, pos.offset)?;
                self.inode_write_block(&mut parent, parent_no, pos.block_nr, &block)?;
                return Ok(());
            }
            Some(Slot::Tail(pos, mut tail)) => {
                let new_offset = pos.offset + tail.actual_len();
                if new_offset + rec_len <= block_size {
                    tail.rec_len = tail.actual_len() as u16;
                    tail.encode(&mut block, pos.offset)?;
                    let mut entry = DirEntry::new(inode_no, name);
                    entry.rec_len = (block_size - new_offset) as u16;
                    entry.encode(&mut block, new_offset)?;
                    self.inode_write_block(&mut parent, parent_no, pos.block_nr, &block)?;
                    return Ok(());
                }
            }
            None => {}
        }

        // no room anywhere, the record gets a block of its own
        let block_nr = parent.size / block_size as u32;
        verbose!(self, "directory #{parent_no} grows to {} blocks", block_nr + 1);
        block.fill(0);
        let mut entry = DirEntry::new(inode_no, name);
        entry.rec_len = block_size as u16;
        entry.encode(&mut block, 0)?;
        // the size only covers the block once it is on disk
        self.inode_write_block(&mut parent, parent_no, block_nr, &block)?;
        parent.size = (block_nr + 1) * block_size as u32;
        self.write_inode(parent_no, &parent)?;
        Ok(())
    }

    /// clear the record named `name` in `parent_no` and drop one link of its target
    ///
    /// A target left without links keeps its blocks and inode; nothing is freed.
    pub(crate) fn remove_entry(&self, parent_no: u32, name: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if name == b"." || name == b".." {
            return Err(Error::Invalid(
                "cannot unlink \".\" or \"..\"".to_string(),
            ));
        }
        let mut parent = self.directory_inode(parent_no)?;
        let mut block = vec![0u8; self.block_size() as usize];
        let found = self.walk_entries(&parent, &mut block, |entry, pos| {
            if entry.inode != 0 && entry.name == name {
                ControlFlow::Break((pos, entry.inode))
            } else {
                ControlFlow::Continue(())
            }
        })?;
        let Some((pos, target_no)) = found else {
            return Err(Error::NotFound);
        };
        block[pos.offset..pos.offset + 4].copy_from_slice(&0u32.to_le_bytes());
        self.inode_write_block(&mut parent, parent_no, pos.block_nr, &block)?;

        let mut target = self.read_inode(target_no)?;
        if target.links_count == 1 {
            debug!("inode #{target_no} has no links left, its blocks are not reclaimed");
        }
        if target.links_count > 0 {
            target.links_count -= 1;
            self.write_inode(target_no, &target)?;
        }
        Ok(())
    }
}

/// namespace operations
impl Ext2Fs {
    fn ensure_absent(&self, parent_no: u32, name: &[u8]) -> Result<()> {
        check_name(name)?;
        if self.find_entry(parent_no, name)?.is_some() {
            return Err(Error::Exists);
        }
        Ok(())
    }

    /// create an empty regular file `name` in `parent_no`
    pub(crate) fn create_file(&self, parent_no: u32, name: &[u8], mode: u16) -> Result<u32> {
        self.ensure_writable()?;
        self.ensure_absent(parent_no, name)?;
        let inode_no = self.allocate_inode()?;
        let inode = Inode::new(EXT2_S_IFREG | (mode & 0o7777), Owner::current());
        self.write_inode(inode_no, &inode)?;
        self.create_entry(parent_no, name, inode_no)?;
        Ok(inode_no)
    }

    /// create directory `name` in `parent_no`, with its "." and ".."
    pub(crate) fn make_directory(&self, parent_no: u32, name: &[u8], mode: u16) -> Result<u32> {
        self.ensure_writable()?;
        self.ensure_absent(parent_no, name)?;
        let inode_no = self.allocate_inode()?;
        let mut inode = Inode::new(EXT2_S_IFDIR | (mode & 0o7777), Owner::current());
        self.write_inode(inode_no, &inode)?;
        self.create_entry(parent_no, name, inode_no)?;

        let block_size = self.block_size() as usize;
        let mut block = vec![0u8; block_size];
        let dot = DirEntry::new(inode_no, b".");
        dot.encode(&mut block, 0)?;
        let mut dotdot = DirEntry::new(parent_no, b"..");
        dotdot.rec_len = (block_size - dot.rec_len as usize) as u16;
        dotdot.encode(&mut block, dot.rec_len as usize)?;
        self.inode_write_block(&mut inode, inode_no, 0, &block)?;
        inode.size = block_size as u32;
        self.write_inode(inode_no, &inode)?;

        let mut parent = self.read_inode(parent_no)?;
        parent.links_count += 1;
        self.write_inode(parent_no, &parent)?;
        self.count_directory(inode_no)?;
        Ok(inode_no)
    }

    /// create symlink `name` in `parent_no` pointing at `target`
    pub(crate) fn make_symlink(&self, parent_no: u32, target: &[u8], name: &[u8]) -> Result<u32> {
        self.ensure_writable()?;
        if target.is_empty() {
            return Err(Error::Invalid("symlink target must not be empty".to_string()));
        }
        self.ensure_absent(parent_no, name)?;
        let inode_no = self.allocate_inode()?;
        let mut inode = Inode::new(EXT2_S_IFLNK | 0o777, Owner::current());
        let embedded = target.len() <= FAST_SYMLINK_MAX;
        if embedded {
            inode.set_inline_data(target);
            inode.size = target.len() as u32;
        }
        self.write_inode(inode_no, &inode)?;
        self.create_entry(parent_no, name, inode_no)?;
        if !embedded {
            self.write_inode_buffer(&mut inode, inode_no, 0, target)?;
        }
        Ok(inode_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::ROOT_INODE, utils::init_test_environment::*};

    fn names(fs: &Ext2Fs, dir_no: u32) -> Vec<String> {
        (0..)
            .map_while(|index| fs.entry_at(dir_no, index).unwrap())
            .map(|entry| entry.name_lossy())
            .collect()
    }

    #[test]
    fn test_fresh_root_lists_nothing() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        assert!(names(&fs, ROOT_INODE).is_empty());
        let dot = fs.find_entry(ROOT_INODE, b".").unwrap().unwrap();
        assert_eq!(dot.inode, ROOT_INODE);
        let dotdot = fs.find_entry(ROOT_INODE, b"..").unwrap().unwrap();
        assert_eq!(dotdot.inode, ROOT_INODE);
    }

    #[test]
    fn test_create_find_unlink() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let inode_no = fs.create_file(ROOT_INODE, b"hello", 0o644).unwrap();
        assert!(inode_no > 10);
        assert_eq!(
            fs.find_entry(ROOT_INODE, b"hello").unwrap().unwrap().inode,
            inode_no
        );
        assert_eq!(fs.read_inode(inode_no).unwrap().links_count, 1);

        fs.remove_entry(ROOT_INODE, b"hello").unwrap();
        assert!(fs.find_entry(ROOT_INODE, b"hello").unwrap().is_none());
        assert_eq!(fs.read_inode(inode_no).unwrap().links_count, 0);
        assert!(matches!(
            fs.remove_entry(ROOT_INODE, b"hello"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        fs.create_file(ROOT_INODE, b"twice", 0o644).unwrap();
        let free_inodes = fs.superblock().free_inodes_count;
        assert!(matches!(
            fs.create_file(ROOT_INODE, b"twice", 0o644),
            Err(Error::Exists)
        ));
        // nothing was allocated for the failed attempt
        assert_eq!(fs.superblock().free_inodes_count, free_inodes);
    }

    #[test]
    fn test_bad_names() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        assert!(matches!(fs.create_file(ROOT_INODE, b"", 0o644), Err(Error::Invalid(_))));
        assert!(matches!(
            fs.create_file(ROOT_INODE, &[b'x'; 256], 0o644),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            fs.create_file(ROOT_INODE, b"a/b", 0o644),
            Err(Error::Invalid(_))
        ));
        fs.create_file(ROOT_INODE, &[b'x'; 255], 0o644).unwrap();
    }

    #[test]
    fn test_listing_keeps_creation_order() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        for name in [b"a", b"b", b"c"] {
            fs.create_file(ROOT_INODE, name, 0o644).unwrap();
        }
        assert_eq!(names(&fs, ROOT_INODE), vec!["a", "b", "c"]);
        assert!(fs.entry_at(ROOT_INODE, 3).unwrap().is_none());
    }

    #[test]
    fn test_deleted_record_is_reused() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        for name in [b"one", b"two", b"six"] {
            fs.create_file(ROOT_INODE, name, 0o644).unwrap();
        }
        fs.remove_entry(ROOT_INODE, b"two").unwrap();
        let size = fs.read_inode(ROOT_INODE).unwrap().size;
        fs.create_file(ROOT_INODE, b"new", 0o644).unwrap();
        // the new name took the hole in the middle, not the tail
        assert_eq!(names(&fs, ROOT_INODE), vec!["one", "new", "six"]);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size, size);
    }

    #[test]
    fn test_full_block_spills_into_a_new_one() {
        let fs = mounted_fs(1024, 1 << 20, 128);
        // 16 byte records: "." and ".." take 24 bytes, 62 more fill the first block
        let created: Vec<String> = (0..70).map(|n| format!("file{n:04}")).collect();
        for name in &created {
            fs.create_file(ROOT_INODE, name.as_bytes(), 0o644).unwrap();
        }
        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert_eq!(root.size, 2048);
        assert_eq!(root.allocated_blocks(1024), 2);
        assert_eq!(names(&fs, ROOT_INODE), created);
        assert!(fs.find_entry(ROOT_INODE, b"file0069").unwrap().is_some());
    }

    #[test]
    fn test_growing_on_a_full_disk_leaves_directory_readable() {
        let fs = mounted_fs(1024, 1 << 20, 128);
        let created: Vec<String> = (0..62).map(|n| format!("file{n:04}")).collect();
        for name in &created {
            fs.create_file(ROOT_INODE, name.as_bytes(), 0o644).unwrap();
        }
        while fs.allocate_block().is_ok() {}

        assert!(matches!(
            fs.create_file(ROOT_INODE, b"spill", 0o644),
            Err(Error::NoSpace)
        ));
        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert_eq!(root.size, 1024);
        assert_eq!(root.allocated_blocks(1024), 1);
        assert!(fs.find_entry(ROOT_INODE, b"absent").unwrap().is_none());
        assert!(fs.entry_at(ROOT_INODE, 62).unwrap().is_none());
        assert_eq!(names(&fs, ROOT_INODE), created);
    }

    #[test]
    fn test_make_directory_on_a_full_disk_leaves_it_empty() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        while fs.allocate_block().is_ok() {}

        // the record fits in the root block, the directory's own block does not
        assert!(matches!(
            fs.make_directory(ROOT_INODE, b"sub", 0o755),
            Err(Error::NoSpace)
        ));
        let dir_no = fs.find_entry(ROOT_INODE, b"sub").unwrap().unwrap().inode;
        assert_eq!(fs.read_inode(dir_no).unwrap().size, 0);
        assert!(fs.find_entry(dir_no, b"absent").unwrap().is_none());
        assert!(fs.entry_at(dir_no, 0).unwrap().is_none());
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().links_count, 2);
    }

    #[test]
    fn test_make_directory() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let used_dirs = fs.group_descriptors()[0].used_dirs_count;
        let dir_no = fs.make_directory(ROOT_INODE, b"sub", 0o755).unwrap();
        let dir = fs.read_inode(dir_no).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.size, 1024);
        assert_eq!(dir.links_count, 2);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().links_count, 3);
        assert_eq!(fs.group_descriptors()[0].used_dirs_count, used_dirs + 1);

        assert_eq!(fs.find_entry(dir_no, b".").unwrap().unwrap().inode, dir_no);
        assert_eq!(
            fs.find_entry(dir_no, b"..").unwrap().unwrap().inode,
            ROOT_INODE
        );
        fs.create_file(dir_no, b"inner", 0o600).unwrap();
        assert_eq!(names(&fs, dir_no), vec!["inner"]);
    }

    #[test]
    fn test_directory_ops_on_a_file() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let file_no = fs.create_file(ROOT_INODE, b"plain", 0o644).unwrap();
        assert!(matches!(fs.find_entry(file_no, b"x"), Err(Error::BadParent)));
        assert!(matches!(
            fs.create_file(file_no, b"x", 0o644),
            Err(Error::BadParent)
        ));
    }

    #[test]
    fn test_short_symlink_uses_no_block() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let free = fs.superblock().free_blocks_count;
        let link_no = fs.make_symlink(ROOT_INODE, b"/etc/passwd", b"pw").unwrap();
        assert_eq!(fs.superblock().free_blocks_count, free);
        let link = fs.read_inode(link_no).unwrap();
        assert!(link.is_fast_symlink());
        assert_eq!(link.size, 11);
        assert_eq!(&link.inline_data()[..11], b"/etc/passwd");
    }

    #[test]
    fn test_long_symlink_uses_a_block() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let target = [b'z'; 61];
        let link_no = fs.make_symlink(ROOT_INODE, &target, b"long").unwrap();
        let link = fs.read_inode(link_no).unwrap();
        assert!(!link.is_fast_symlink());
        assert_eq!(link.size, 61);
        assert_eq!(link.allocated_blocks(1024), 1);
    }
}
