use serde::{Deserialize, Serialize};

use crate::fs::error::{Error, Result};
use crate::utils::traits::OnDisk;

/// the fixed part in front of every directory record's name
pub const DIR_ENTRY_HEADER_SIZE: usize = 8;
/// longest name a directory record can hold
pub const MAX_NAME_LEN: usize = 255;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
struct DirEntryHeader {
    inode: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
}

impl OnDisk for DirEntryHeader {
    const SIZE: usize = DIR_ENTRY_HEADER_SIZE;
}

/// One variable-length directory record.
///
/// `rec_len` is the distance to the next record; the last record of a block
/// stretches to the end of the block. `inode == 0` marks a deleted record
/// whose space may be reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    /// always written as 0, directories carry no type hints
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// a record pointing `name` at `inode`, sized to fit exactly
    pub fn new(inode: u32, name: &[u8]) -> Self {
        DirEntry {
            inode,
            rec_len: Self::min_rec_len(name.len()) as u16,
            file_type: 0,
            name: name.to_vec(),
        }
    }

    /// the smallest record holding a name of `name_len` bytes, rounded up to 4
    pub const fn min_rec_len(name_len: usize) -> usize {
        (DIR_ENTRY_HEADER_SIZE + name_len).next_multiple_of(4)
    }

    /// how many bytes this record really needs
    pub fn actual_len(&self) -> usize {
        Self::min_rec_len(self.name.len())
    }

    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// decode the record starting at `offset` of a directory block
    pub fn decode(block: &[u8], offset: usize) -> Result<Self> {
        let header = DirEntryHeader::decode(block.get(offset..).unwrap_or_default())?;
        let rec_len = header.rec_len as usize;
        let name_end = offset + DIR_ENTRY_HEADER_SIZE + header.name_len as usize;
        if rec_len < DIR_ENTRY_HEADER_SIZE
            || offset + rec_len > block.len()
            || name_end > offset + rec_len
        {
            return Err(Error::Corrupt(format!(
                "directory record at offset {offset} has bad length {rec_len} (name length {})",
                header.name_len
            )));
        }
        Ok(DirEntry {
            inode: header.inode,
            rec_len: header.rec_len,
            file_type: header.file_type,
            name: block[offset + DIR_ENTRY_HEADER_SIZE..name_end].to_vec(),
        })
    }

    /// encode the record at `offset`, bytes between the name and `rec_len` are left alone
    pub fn encode(&self, block: &mut [u8], offset: usize) -> Result<()> {
        let name_start = offset + DIR_ENTRY_HEADER_SIZE;
        let name_end = name_start + self.name.len();
        if self.name.len() > MAX_NAME_LEN || name_end > block.len() {
            return Err(Error::Invalid(format!(
                "directory record for a {} byte name does not fit at offset {offset}",
                self.name.len()
            )));
        }
        let header = DirEntryHeader {
            inode: self.inode,
            rec_len: self.rec_len,
            name_len: self.name.len() as u8,
            file_type: self.file_type,
        };
        header.encode_into(&mut block[offset..])?;
        block[name_start..name_end].copy_from_slice(&self.name);
        Ok(())
    }
}
