use serde::{Deserialize, Serialize};

use crate::utils::{credentials::Owner, time_util, traits::OnDisk};

use super::{
    filekind::{FileKind, EXT2_S_IFMT},
    BLOCK_POINTERS, DIRECTORY_LINKS, FAST_SYMLINK_MAX,
};

/// An on-disk ext2 inode record (the first 128 bytes of an inode slot).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Inode {
    /// type bits in `0xF000`, permission bits in `0x0FFF`
    pub mode: u16,
    pub uid: u16,
    /// byte length of the file
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// allocated storage in 512-byte units
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    /// 12 direct pointers, then single, double and triple indirect
    pub block: [u32; BLOCK_POINTERS],
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
    pub osd2: [u8; 12],
}

impl OnDisk for Inode {
    const SIZE: usize = 128;
}

impl Inode {
    /// a fresh inode of type and permissions `mode`, owned by `owner`, stamped now
    pub fn new(mode: u16, owner: Owner) -> Self {
        let now = time_util::now();
        Inode {
            mode,
            uid: owner.uid,
            gid: owner.gid,
            atime: now,
            ctime: now,
            mtime: now,
            links_count: if FileKind::from_mode(mode) == FileKind::Directory {
                DIRECTORY_LINKS
            } else {
                1
            },
            ..Inode::default()
        }
    }
}

/// This block is about file metadata operations
impl Inode {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::SymbolicLink
    }

    /// the low 12 bits of `mode`
    pub fn permissions(&self) -> u16 {
        self.mode & !EXT2_S_IFMT
    }

    /// replace the permission bits, keeping the type bits
    pub fn set_permissions(&mut self, mode: u16) {
        self.mode = (self.mode & EXT2_S_IFMT) | (mode & !EXT2_S_IFMT);
        self.ctime = time_util::now();
    }

    /// how many whole filesystem blocks the inode's coverage spans
    pub fn allocated_blocks(&self, block_size: u32) -> u32 {
        self.blocks / (block_size / 512)
    }
}

/// This block is about symlink targets stored inside the pointer array
impl Inode {
    /// a symlink whose target fits into the 60 pointer bytes keeps it there
    pub fn is_fast_symlink(&self) -> bool {
        self.is_symlink() && (self.size as usize) <= FAST_SYMLINK_MAX && self.blocks == 0
    }

    /// the pointer array viewed as raw bytes
    pub fn inline_data(&self) -> [u8; FAST_SYMLINK_MAX] {
        let mut raw = [0u8; FAST_SYMLINK_MAX];
        for (chunk, pointer) in raw.chunks_exact_mut(4).zip(self.block.iter()) {
            chunk.copy_from_slice(&pointer.to_le_bytes());
        }
        raw
    }

    /// store `data` (at most 60 bytes) in the pointer array
    pub fn set_inline_data(&mut self, data: &[u8]) {
        let mut raw = [0u8; FAST_SYMLINK_MAX];
        let len = data.len().min(FAST_SYMLINK_MAX);
        raw[..len].copy_from_slice(&data[..len]);
        for (pointer, chunk) in self.block.iter_mut().zip(raw.chunks_exact(4)) {
            *pointer = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
}
