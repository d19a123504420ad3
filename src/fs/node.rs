//! The nodes a mounted filesystem hands to the VFS.
//!
//! A node is a snapshot of one inode plus a handle on the filesystem. Which
//! operations a node offers depends on its type: a [FileNode] can be read and
//! written, a [DirNode] can be searched and changed, a [SymlinkNode] can be
//! resolved. Every node can be `chmod`ed and `ioctl`ed.
use std::{fmt, marker::PhantomData, sync::Arc};

use log::info;

use super::{
    error::{Error, Result},
    filekind::FileKind,
    fs_layout::Ext2Fs,
    inode::Inode,
    IOCTL_SYNC, ROOT_INODE,
};

/// node type markers
pub mod kind {
    #[derive(Debug)]
    pub enum File {}
    #[derive(Debug)]
    pub enum Directory {}
    #[derive(Debug)]
    pub enum Symlink {}
    /// block and character devices
    #[derive(Debug)]
    pub enum Device {}
    /// FIFOs and sockets
    #[derive(Debug)]
    pub enum Pipe {}
}

/// what the VFS sees of an inode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub inode: u32,
    pub name: String,
    pub kind: FileKind,
    /// permission bits
    pub mask: u16,
    pub uid: u16,
    pub gid: u16,
    pub length: u32,
    pub nlink: u16,
    /// allocated storage in 512-byte units
    pub blocks: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl NodeInfo {
    pub fn new(inode_no: u32, name: &str, inode: &Inode) -> Self {
        NodeInfo {
            inode: inode_no,
            name: name.to_string(),
            kind: inode.kind(),
            mask: inode.permissions(),
            uid: inode.uid,
            gid: inode.gid,
            length: inode.size,
            nlink: inode.links_count,
            blocks: inode.blocks,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }
}

/// one live directory entry, as listed by `readdir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub inode: u32,
    pub name: String,
}

/// a node of kind `K`
pub struct NodeHandle<K> {
    fs: Arc<Ext2Fs>,
    info: NodeInfo,
    _kind: PhantomData<K>,
}

pub type FileNode = NodeHandle<kind::File>;
pub type DirNode = NodeHandle<kind::Directory>;
pub type SymlinkNode = NodeHandle<kind::Symlink>;
pub type DeviceNode = NodeHandle<kind::Device>;
pub type PipeNode = NodeHandle<kind::Pipe>;

impl<K> Clone for NodeHandle<K> {
    fn clone(&self) -> Self {
        NodeHandle {
            fs: self.fs.clone(),
            info: self.info.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> fmt::Debug for NodeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle").field("info", &self.info).finish()
    }
}

/// operations every node has
impl<K> NodeHandle<K> {
    fn new(fs: Arc<Ext2Fs>, info: NodeInfo) -> Self {
        NodeHandle {
            fs,
            info,
            _kind: PhantomData,
        }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn inode(&self) -> u32 {
        self.info.inode
    }

    pub fn filesystem(&self) -> &Arc<Ext2Fs> {
        &self.fs
    }

    /// re-read the inode behind this node
    pub fn refresh(&mut self) -> Result<()> {
        let inode = self.fs.read_inode(self.info.inode)?;
        self.info = NodeInfo::new(self.info.inode, &self.info.name, &inode);
        Ok(())
    }

    /// replace the permission bits, the type bits stay
    pub fn chmod(&mut self, mode: u16) -> Result<()> {
        self.fs.ensure_writable()?;
        let mut inode = self.fs.read_inode(self.info.inode)?;
        inode.set_permissions(mode);
        self.fs.write_inode(self.info.inode, &inode)?;
        self.info.mask = inode.permissions();
        self.info.ctime = inode.ctime;
        Ok(())
    }

    /// [IOCTL_SYNC] flushes the device, every other request is invalid
    pub fn ioctl(&self, request: u64) -> Result<()> {
        match request {
            IOCTL_SYNC => self.fs.sync(),
            _ => Err(Error::Invalid(format!("unknown ioctl request {request:#x}"))),
        }
    }
}

impl FileNode {
    /// read up to `buf.len()` bytes starting at `offset`
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.fs.read_inode(self.info.inode)?;
        self.fs.read_inode_buffer(&inode, offset, buf)
    }

    /// write `data` at `offset`, growing the file as needed
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut inode = self.fs.read_inode(self.info.inode)?;
        let written = self
            .fs
            .write_inode_buffer(&mut inode, self.info.inode, offset, data)?;
        self.info.length = inode.size;
        self.info.blocks = inode.blocks;
        Ok(written)
    }

    /// cut the file to zero length; its blocks are not reclaimed
    pub fn truncate(&mut self) -> Result<()> {
        self.fs.truncate_inode(self.info.inode)?;
        self.info.length = 0;
        Ok(())
    }
}

impl DirNode {
    /// the node `name` refers to in this directory
    pub fn finddir(&self, name: &str) -> Result<Node> {
        let entry = self
            .fs
            .find_entry(self.info.inode, name.as_bytes())?
            .ok_or(Error::NotFound)?;
        self.fs.node(entry.inode, name)
    }

    /// the `index`-th live entry, "." and ".." skipped; `None` past the end
    pub fn readdir(&self, index: usize) -> Result<Option<Dirent>> {
        Ok(self
            .fs
            .entry_at(self.info.inode, index)?
            .map(|entry| Dirent {
                inode: entry.inode,
                name: entry.name_lossy(),
            }))
    }

    /// create an empty regular file
    pub fn create(&self, name: &str, mode: u16) -> Result<()> {
        info!("create() called with {name:?} in #{}", self.info.inode);
        self.fs
            .create_file(self.info.inode, name.as_bytes(), mode)?;
        Ok(())
    }

    /// create a subdirectory
    pub fn mkdir(&self, name: &str, mode: u16) -> Result<()> {
        info!("mkdir() called with {name:?} in #{}", self.info.inode);
        self.fs
            .make_directory(self.info.inode, name.as_bytes(), mode)?;
        Ok(())
    }

    /// create a symlink `name` pointing at `target`
    pub fn symlink(&self, target: &str, name: &str) -> Result<()> {
        info!(
            "symlink() called with {name:?} -> {target:?} in #{}",
            self.info.inode
        );
        self.fs
            .make_symlink(self.info.inode, target.as_bytes(), name.as_bytes())?;
        Ok(())
    }

    /// remove the entry `name`; the target loses one link
    pub fn unlink(&self, name: &str) -> Result<()> {
        info!("unlink() called with {name:?} in #{}", self.info.inode);
        self.fs.remove_entry(self.info.inode, name.as_bytes())
    }
}

impl SymlinkNode {
    /// copy the target into `buf`, truncated to fit, NUL-terminated when room is left
    /// # Returns
    /// The number of target bytes copied
    pub fn readlink(&self, buf: &mut [u8]) -> Result<usize> {
        let inode = self.fs.read_inode(self.info.inode)?;
        let len = inode.size as usize;
        let copied = if inode.is_fast_symlink() {
            let inline = inode.inline_data();
            let copied = len.min(buf.len());
            buf[..copied].copy_from_slice(&inline[..copied]);
            copied
        } else {
            self.fs.read_inode_buffer(&inode, 0, buf)?
        };
        if copied < buf.len() {
            buf[copied] = 0;
        }
        Ok(copied)
    }
}

/// a node of any type
#[derive(Debug, Clone)]
pub enum Node {
    File(FileNode),
    Directory(DirNode),
    Symlink(SymlinkNode),
    Device(DeviceNode),
    Pipe(PipeNode),
}

macro_rules! each_node {
    ($node:expr, $handle:ident => $body:expr) => {
        match $node {
            Node::File($handle) => $body,
            Node::Directory($handle) => $body,
            Node::Symlink($handle) => $body,
            Node::Device($handle) => $body,
            Node::Pipe($handle) => $body,
        }
    };
}

impl Node {
    /// wrap `inode` in the node type its mode calls for
    pub fn new(fs: Arc<Ext2Fs>, inode_no: u32, name: &str, inode: &Inode) -> Result<Self> {
        let info = NodeInfo::new(inode_no, name, inode);
        Ok(match info.kind {
            FileKind::RegularFile => Node::File(NodeHandle::new(fs, info)),
            FileKind::Directory => Node::Directory(NodeHandle::new(fs, info)),
            FileKind::SymbolicLink => Node::Symlink(NodeHandle::new(fs, info)),
            FileKind::BlockDevice | FileKind::CharDevice => {
                Node::Device(NodeHandle::new(fs, info))
            }
            FileKind::NamedPipe | FileKind::Socket => Node::Pipe(NodeHandle::new(fs, info)),
            FileKind::Unknown => {
                return Err(Error::Corrupt(format!(
                    "inode #{inode_no} has unknown type bits in mode {:#o}",
                    inode.mode
                )))
            }
        })
    }

    pub fn info(&self) -> &NodeInfo {
        each_node!(self, handle => handle.info())
    }

    pub fn inode(&self) -> u32 {
        self.info().inode
    }

    pub fn kind(&self) -> FileKind {
        self.info().kind
    }

    pub fn chmod(&mut self, mode: u16) -> Result<()> {
        each_node!(self, handle => handle.chmod(mode))
    }

    pub fn ioctl(&self, request: u64) -> Result<()> {
        each_node!(self, handle => handle.ioctl(request))
    }

    pub fn into_file(self) -> Option<FileNode> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn into_dir(self) -> Option<DirNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn into_symlink(self) -> Option<SymlinkNode> {
        match self {
            Node::Symlink(link) => Some(link),
            _ => None,
        }
    }
}

/// entry points from the filesystem into its nodes
impl Ext2Fs {
    /// the node for `inode_no`, known to the VFS as `name`
    pub fn node(self: &Arc<Self>, inode_no: u32, name: &str) -> Result<Node> {
        let inode = self.read_inode(inode_no)?;
        Node::new(self.clone(), inode_no, name, &inode)
    }

    /// the root directory, inode 2
    pub fn root(self: &Arc<Self>) -> Result<DirNode> {
        self.node(ROOT_INODE, "/")?
            .into_dir()
            .ok_or_else(|| Error::Invalid("the root inode is not a directory".to_string()))
    }
}
