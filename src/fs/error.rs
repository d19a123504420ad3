//! errors raised by the filesystem engine
//!
//! Internally every failure is one of the variants below. At the VFS
//! boundary (the FUSE adapter, or any other caller) a variant is turned into
//! exactly one POSIX errno with [Error::errno].
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// block 0 was referenced, or a logical block lies beyond triple-indirect reach
    #[error("invalid block number {0}")]
    BadBlock(u32),
    /// no free block or inode is left
    #[error("no space left on device")]
    NoSpace,
    /// a directory operation was attempted on something that is not a directory
    #[error("parent is not a directory")]
    BadParent,
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("filesystem is mounted read-only")]
    ReadOnly,
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("not an ext2 filesystem (magic {0:#06x})")]
    BadMagic(u16),
    #[error("bad inode number {0}")]
    BadInode(u32),
    /// on-disk metadata contradicts itself; never retried
    #[error("filesystem is corrupted: {0}")]
    Corrupt(String),
    #[error("on-disk record codec failed: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// the errno reported to the VFS for this error
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::Exists => libc::EEXIST,
            Error::ReadOnly => libc::EROFS,
            Error::Invalid(_) | Error::BadMagic(_) | Error::BadInode(_) => libc::EINVAL,
            Error::NoSpace => libc::ENOSPC,
            Error::BadParent => libc::ENOTDIR,
            Error::BadBlock(_) | Error::Corrupt(_) | Error::Codec(_) | Error::Io(_) => libc::EIO,
        }
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(e: bincode::error::EncodeError) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(e: bincode::error::DecodeError) -> Self {
        Error::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NotFound.errno(), libc::ENOENT);
        assert_eq!(Error::Exists.errno(), libc::EEXIST);
        assert_eq!(Error::ReadOnly.errno(), libc::EROFS);
        assert_eq!(Error::BadMagic(0x1234).errno(), libc::EINVAL);
        assert_eq!(Error::BadInode(0).errno(), libc::EINVAL);
        assert_eq!(Error::NoSpace.errno(), libc::ENOSPC);
        assert_eq!(Error::BadParent.errno(), libc::ENOTDIR);
        assert_eq!(Error::BadBlock(0).errno(), libc::EIO);
    }

    #[test]
    fn test_magic_is_printed_in_hex() {
        assert_eq!(
            Error::BadMagic(0x1324).to_string(),
            "not an ext2 filesystem (magic 0x1324)"
        );
    }
}
