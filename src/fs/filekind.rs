//! the type bits of an inode's mode

/// mask selecting the type bits of `mode`
pub const EXT2_S_IFMT: u16 = 0xF000;
pub const EXT2_S_IFSOCK: u16 = 0xC000;
pub const EXT2_S_IFLNK: u16 = 0xA000;
pub const EXT2_S_IFREG: u16 = 0x8000;
pub const EXT2_S_IFBLK: u16 = 0x6000;
pub const EXT2_S_IFDIR: u16 = 0x4000;
pub const EXT2_S_IFCHR: u16 = 0x2000;
pub const EXT2_S_IFIFO: u16 = 0x1000;

/// an enum to describe the type of a file
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// a symbolic link
    SymbolicLink,
    BlockDevice,
    CharDevice,
    /// a FIFO
    NamedPipe,
    Socket,
    /// type bits that match none of the above
    #[default]
    Unknown,
}

impl FileKind {
    /// decode the type bits of `mode`, which must match exactly
    pub fn from_mode(mode: u16) -> Self {
        match mode & EXT2_S_IFMT {
            EXT2_S_IFREG => FileKind::RegularFile,
            EXT2_S_IFDIR => FileKind::Directory,
            EXT2_S_IFLNK => FileKind::SymbolicLink,
            EXT2_S_IFBLK => FileKind::BlockDevice,
            EXT2_S_IFCHR => FileKind::CharDevice,
            EXT2_S_IFIFO => FileKind::NamedPipe,
            EXT2_S_IFSOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }
}

/// implement a trait to convert [FileKind] to [fuser::FileType]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::SymbolicLink => fuser::FileType::Symlink,
            FileKind::BlockDevice => fuser::FileType::BlockDevice,
            FileKind::CharDevice => fuser::FileType::CharDevice,
            FileKind::NamedPipe => fuser::FileType::NamedPipe,
            FileKind::Socket => fuser::FileType::Socket,
            // Unknown Types are treated as regular files
            FileKind::Unknown => fuser::FileType::RegularFile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mode() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::RegularFile);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Directory);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::SymbolicLink);
        assert_eq!(FileKind::from_mode(0o060660), FileKind::BlockDevice);
        assert_eq!(FileKind::from_mode(0o020620), FileKind::CharDevice);
        assert_eq!(FileKind::from_mode(0o010644), FileKind::NamedPipe);
        assert_eq!(FileKind::from_mode(0o140755), FileKind::Socket);
        assert_eq!(FileKind::from_mode(0o000644), FileKind::Unknown);
    }

    #[test]
    fn test_type_bits_must_match_exactly() {
        // a socket shares bits with both a directory and a regular file,
        // and a symlink shares bits with a regular file
        assert_ne!(FileKind::from_mode(EXT2_S_IFSOCK), FileKind::Directory);
        assert_ne!(FileKind::from_mode(EXT2_S_IFLNK), FileKind::RegularFile);
        assert_ne!(FileKind::from_mode(EXT2_S_IFBLK), FileKind::Directory);
    }
}
