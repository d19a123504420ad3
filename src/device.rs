//! the byte-addressed storage a filesystem lives on
use std::{
    fs::OpenOptions,
    io::{self, ErrorKind},
    path::Path,
};

use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};

/// Random-access storage with a fixed length.
///
/// Reads and writes never change the length; touching bytes past the end
/// is an [ErrorKind::UnexpectedEof] error.
pub trait BlockDevice: Send + Sync {
    /// fill `buf` with the bytes starting at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    /// store `buf` at `offset`
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    /// make every write so far durable
    fn sync(&self) -> io::Result<()>;
    /// length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_range(offset: u64, len: usize, device_len: usize) -> io::Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    match start.checked_add(len) {
        Some(end) if end <= device_len => Ok(start..end),
        _ => Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("access of {len} bytes at offset {offset} is past the end of a {device_len} byte device"),
        )),
    }
}

/// an image file, mapped into memory
pub struct ImageFile {
    map: RwLock<MmapMut>,
}

impl ImageFile {
    /// open an existing image for read and write
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::map(&file)
    }

    /// create a new zero-filled image of `size` bytes, which must not exist yet
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.set_len(size)?;
        Self::map(&file)
    }

    fn map(file: &std::fs::File) -> io::Result<Self> {
        // Safety
        // This method returns an error when the underlying system call fails,
        // which can happen for a variety of reasons,
        // such as when the file is not open with read and write permissions.
        // from https://docs.rs/memmap2/0.5.10/memmap2/struct.MmapMut.html
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(ImageFile {
            map: RwLock::new(map),
        })
    }
}

impl BlockDevice for ImageFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let map = self.map.read();
        let range = check_range(offset, buf.len(), map.len())?;
        buf.copy_from_slice(&map[range]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut map = self.map.write();
        let range = check_range(offset, buf.len(), map.len())?;
        map[range].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.map.read().flush()
    }

    fn len(&self) -> u64 {
        self.map.read().len() as u64
    }
}

/// a device kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryDevice {
    /// a zero-filled device of `size` bytes
    pub fn new(size: usize) -> Self {
        MemoryDevice {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    /// take the contents out again
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes.into_inner()
    }
}

impl From<Vec<u8>> for MemoryDevice {
    fn from(bytes: Vec<u8>) -> Self {
        MemoryDevice {
            bytes: Mutex::new(bytes),
        }
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let bytes = self.bytes.lock();
        let range = check_range(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut bytes = self.bytes.lock();
        let range = check_range(offset, buf.len(), bytes.len())?;
        bytes[range].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.lock().len() as u64
    }
}
