use std::{ffi::OsStr, path::Path, sync::Arc, time::Duration};

use fuser::{FileAttr, Filesystem, FUSE_ROOT_ID};
use log::{error, info};

use crate::utils::time_util::to_system_time;

use super::{
    directory::MAX_NAME_LEN,
    error::{Error, Result},
    fs_layout::Ext2Fs,
    node::{DirNode, Node, NodeInfo},
    FileKind, IOCTL_SYNC, ROOT_INODE,
};

/// attributes and entries may change behind the kernel's back, never cache them
const TTL: Duration = Duration::ZERO;

/// serves a mounted [Ext2Fs] to the kernel through `FUSE`
pub struct FuseAdapter {
    fs: Arc<Ext2Fs>,
}

/// the kernel calls the root 1, ext2 calls it 2
fn ext2_inode(ino: u64) -> Result<u32> {
    if ino == FUSE_ROOT_ID {
        return Ok(ROOT_INODE);
    }
    u32::try_from(ino).map_err(|_| Error::Invalid(format!("inode number {ino} is out of range")))
}

fn fuse_ino(inode: u32) -> u64 {
    if inode == ROOT_INODE {
        FUSE_ROOT_ID
    } else {
        inode as u64
    }
}

fn utf8_name(name: &OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| Error::Invalid(format!("{name:?} is not valid UTF-8")))
}

impl FuseAdapter {
    pub fn new(fs: Arc<Ext2Fs>) -> Self {
        FuseAdapter { fs }
    }

    fn node(&self, ino: u64) -> Result<Node> {
        self.fs.node(ext2_inode(ino)?, "")
    }

    fn dir(&self, ino: u64) -> Result<DirNode> {
        self.node(ino)?.into_dir().ok_or(Error::BadParent)
    }

    fn attr(&self, info: &NodeInfo) -> FileAttr {
        FileAttr {
            ino: fuse_ino(info.inode),
            size: info.length as u64,
            blocks: info.blocks as u64,
            atime: to_system_time(info.atime),
            mtime: to_system_time(info.mtime),
            ctime: to_system_time(info.ctime),
            crtime: to_system_time(info.ctime),
            kind: info.kind.into(),
            perm: info.mask,
            nlink: info.nlink as u32,
            uid: info.uid as u32,
            gid: info.gid as u32,
            rdev: 0,
            blksize: self.fs.block_size(),
            flags: 0,
        }
    }

    /// the attributes of `name` in `dir`, after it was just created
    fn entry_attr(&self, dir: &DirNode, name: &str) -> Result<FileAttr> {
        Ok(self.attr(dir.finddir(name)?.info()))
    }

    /// "." and ".." followed by every live entry of directory `ino`
    fn listing(&self, ino: u64) -> Result<Vec<(u32, FileKind, String)>> {
        let dir = self.dir(ino)?;
        let parent = dir.finddir("..")?;
        let mut entries = vec![
            (dir.inode(), FileKind::Directory, ".".to_string()),
            (parent.inode(), parent.kind(), "..".to_string()),
        ];
        let mut index = 0;
        while let Some(dirent) = dir.readdir(index)? {
            let kind = self.fs.node(dirent.inode, &dirent.name)?.kind();
            entries.push((dirent.inode, kind, dirent.name));
            index += 1;
        }
        Ok(entries)
    }

    fn set_attributes(&self, ino: u64, mode: Option<u32>, size: Option<u64>) -> Result<FileAttr> {
        let mut node = self.node(ino)?;
        if let Some(mode) = mode {
            node.chmod((mode & 0o7777) as u16)?;
        }
        match (size, node) {
            (None, node) => Ok(self.attr(node.info())),
            (Some(0), Node::File(mut file)) => {
                file.truncate()?;
                Ok(self.attr(file.info()))
            }
            (Some(size), node) if size == node.info().length as u64 => Ok(self.attr(node.info())),
            (Some(size), _) => Err(Error::Invalid(format!(
                "files can only be truncated to zero length, not {size} bytes"
            ))),
        }
    }
}

impl Filesystem for FuseAdapter {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        info!(
            "init() called, serving a {} filesystem",
            if self.fs.read_only() {
                "read-only"
            } else {
                "read-write"
            }
        );
        Ok(())
    }

    // to umount the filesystem
    fn destroy(&mut self) {
        if let Err(e) = self.fs.sync() {
            error!("failed to sync the device on unmount: {e}");
        }
    }

    // to show FS information
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.fs.stats();
        reply.statfs(
            stats.blocks as u64,
            stats.free_blocks as u64,
            stats.free_blocks.saturating_sub(stats.reserved_blocks) as u64,
            stats.inodes as u64,
            stats.free_inodes as u64,
            stats.block_size,
            MAX_NAME_LEN as u32,
            stats.block_size,
        )
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number: {ino}");
        match self.node(ino) {
            Ok(node) => reply.attr(&TTL, &self.attr(node.info())),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to look up a file
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        let found = utf8_name(name).and_then(|name| self.dir(parent)?.finddir(name));
        match found {
            Ok(node) => reply.entry(&TTL, &self.attr(node.info()), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to read from a file
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!("read() called with inode number: {ino}, fh: {fh}, offset: {offset}, size: {size}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let node = match self.node(ino) {
            Ok(node) => node,
            Err(e) => return reply.error(e.errno()),
        };
        let Some(file) = node.into_file() else {
            reply.error(libc::EISDIR);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match file.read(offset as u64, &mut buf) {
            Ok(read) => reply.data(&buf[..read]),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to write to a file
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number: {ino}, fh: {fh}, offset: {offset}, {} bytes",
            data.len()
        );
        // if offset < 0, return EINVAL
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let node = match self.node(ino) {
            Ok(node) => node,
            Err(e) => return reply.error(e.errno()),
        };
        let Some(mut file) = node.into_file() else {
            reply.error(libc::EISDIR);
            return;
        };
        match file.write(offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to set file attributes
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!(
            "setattr() called with inode number: {ino}, mode: {mode:?}, uid: {uid:?}, gid: {gid:?}, size: {size:?}"
        );
        if uid.is_some() || gid.is_some() {
            reply.error(libc::EPERM);
            return;
        }
        match self.set_attributes(ino, mode, size) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to read a dir
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number: {ino}, offset: {offset}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let entries = match self.listing(ino) {
            Ok(entries) => entries,
            Err(e) => return reply.error(e.errno()),
        };
        for (index, (inode, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // the offset handed back is where the next call resumes
            let buffer_full = reply.add(fuse_ino(inode), index as i64 + 1, kind.into(), name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    // to create a dir
    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        let created = utf8_name(name).and_then(|name| {
            let dir = self.dir(parent)?;
            dir.mkdir(name, (mode & !umask & 0o7777) as u16)?;
            self.entry_attr(&dir, name)
        });
        match created {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    // to create a new file
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        let created = utf8_name(name).and_then(|name| {
            let dir = self.dir(parent)?;
            dir.create(name, (mode & !umask & 0o7777) as u16)?;
            self.entry_attr(&dir, name)
        });
        match created {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        match utf8_name(name).and_then(|name| self.dir(parent)?.unlink(name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    // create a symbolic link
    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: fuser::ReplyEntry,
    ) {
        info!("symlink() called with parent inode number: {parent} and name: {name:?} and link: {link:?}");
        let created = utf8_name(name).and_then(|name| {
            let target = utf8_name(link.as_os_str())?;
            let dir = self.dir(parent)?;
            dir.symlink(target, name)?;
            self.entry_attr(&dir, name)
        });
        match created {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyData) {
        info!("readlink() called with inode number: {ino}");
        let node = match self.node(ino) {
            Ok(node) => node,
            Err(e) => return reply.error(e.errno()),
        };
        let Some(link) = node.into_symlink() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut buf = vec![0u8; link.info().length as usize];
        match link.readlink(&mut buf) {
            Ok(len) => reply.data(&buf[..len]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        info!("fsync() called with inode number: {ino}");
        match self.node(ino).and_then(|node| node.ioctl(IOCTL_SYNC)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::init_test_environment::*;
    use std::os::unix::prelude::OsStrExt;

    #[test]
    fn test_root_inode_mapping() {
        assert_eq!(ext2_inode(FUSE_ROOT_ID).unwrap(), ROOT_INODE);
        assert_eq!(ext2_inode(12).unwrap(), 12);
        assert!(ext2_inode(u64::MAX).is_err());
        assert_eq!(fuse_ino(ROOT_INODE), FUSE_ROOT_ID);
        assert_eq!(fuse_ino(12), 12);
    }

    #[test]
    fn test_root_attributes() {
        let adapter = FuseAdapter::new(mounted_fs(1024, 1 << 20, 64));
        let root = adapter.node(FUSE_ROOT_ID).unwrap();
        let attr = adapter.attr(root.info());
        assert_eq!(attr.ino, FUSE_ROOT_ID);
        assert_eq!(attr.kind, fuser::FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 1024);
        assert_eq!(attr.blksize, 1024);
    }

    #[test]
    fn test_listing_starts_with_dot_entries() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let root = fs.root().unwrap();
        root.create("file", 0o644).unwrap();
        root.symlink("file", "link").unwrap();
        let adapter = FuseAdapter::new(fs);
        let listing = adapter.listing(FUSE_ROOT_ID).unwrap();
        let names: Vec<&str> = listing.iter().map(|(_, _, name)| name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "file", "link"]);
        assert_eq!(listing[0].0, ROOT_INODE);
        assert_eq!(listing[1].0, ROOT_INODE);
        assert_eq!(listing[2].1, FileKind::RegularFile);
        assert_eq!(listing[3].1, FileKind::SymbolicLink);
    }

    #[test]
    fn test_listing_of_a_file_is_rejected() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let root = fs.root().unwrap();
        root.create("plain", 0o644).unwrap();
        let file = root.finddir("plain").unwrap().inode();
        let adapter = FuseAdapter::new(fs);
        let err = adapter.listing(file as u64).unwrap_err();
        assert_eq!(err.errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_set_attributes() {
        let fs = mounted_fs(1024, 1 << 20, 64);
        let root = fs.root().unwrap();
        root.create("f", 0o644).unwrap();
        let mut file = root.finddir("f").unwrap().into_file().unwrap();
        file.write(0, b"0123456789").unwrap();
        let ino = file.inode() as u64;
        let adapter = FuseAdapter::new(fs);

        let attr = adapter
            .set_attributes(ino, Some(libc::S_IFREG | 0o600), None)
            .unwrap();
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);

        let attr = adapter.set_attributes(ino, None, Some(10)).unwrap();
        assert_eq!(attr.size, 10);
        assert!(adapter.set_attributes(ino, None, Some(3)).is_err());
        let attr = adapter.set_attributes(ino, None, Some(0)).unwrap();
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn test_non_utf8_names_are_invalid() {
        let name = OsStr::from_bytes(b"bad\xFFname");
        assert_eq!(utf8_name(name).unwrap_err().errno(), libc::EINVAL);
        assert_eq!(utf8_name(OsStr::new("fine")).unwrap(), "fine");
    }
}
