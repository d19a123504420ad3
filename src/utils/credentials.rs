//! who owns the nodes we create

/// the owner stamped on a newly created inode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u16,
    pub gid: u16,
}

impl Owner {
    /// the effective user and group of this process
    ///
    /// ext2 (revision 0 fields) keeps only the low 16 bits of each id.
    pub fn current() -> Self {
        Owner {
            uid: users::get_effective_uid() as u16,
            gid: users::get_effective_gid() as u16,
        }
    }
}
