use serde::{de::DeserializeOwned, Serialize};

use crate::fs::error::{Error, Result};

/// Trait for records with a fixed little-endian on-disk layout
/// # Note
/// Records are encoded with bincode's legacy configuration
/// (fixed-width integers, little endian, no length prefix on arrays),
/// which matches the packed C layout of ext2 structures field for field.
/// An implementor's fields must add up to exactly [OnDisk::SIZE] bytes.
pub trait OnDisk: Serialize + DeserializeOwned {
    /// encoded size in bytes
    const SIZE: usize;

    /// decode from the first [OnDisk::SIZE] bytes of `buf`
    fn decode(buf: &[u8]) -> Result<Self> {
        let Some(raw) = buf.get(..Self::SIZE) else {
            return Err(Error::Codec(format!(
                "need {} bytes to decode, only {} available",
                Self::SIZE,
                buf.len()
            )));
        };
        let config = bincode::config::legacy();
        let (object, _): (Self, usize) = bincode::serde::decode_from_slice(raw, config)?;
        Ok(object)
    }

    /// encode into the first [OnDisk::SIZE] bytes of `buf`, leaving the rest untouched
    /// # Returns
    /// The number of bytes written if successful
    fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let available = buf.len();
        let Some(raw) = buf.get_mut(..Self::SIZE) else {
            return Err(Error::Codec(format!(
                "need {} bytes to encode, only {available} available",
                Self::SIZE
            )));
        };
        let config = bincode::config::legacy();
        Ok(bincode::serde::encode_into_slice(self, raw, config)?)
    }
}
