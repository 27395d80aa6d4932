use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::util::checked_range;
use crate::{StoreError, StoreResult};

const ZERO_CHUNK: [u8; 4096] = [0u8; 4096];

/// Random-access byte store backing an emulated card.
///
/// This is the "persistent medium" seen by the device: a flat byte container that can be
/// read, written, extended and flushed. The device only ever writes whole 512-byte blocks
/// through it; reads may cover any sub-range.
pub trait BlockStore {
    /// Current size of the container in bytes. A store that does not exist yet reports 0.
    fn len(&mut self) -> StoreResult<u64>;

    /// Resize the container. Growing must zero-fill the new region.
    fn set_len(&mut self, len: u64) -> StoreResult<()>;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> StoreResult<()>;

    fn flush(&mut self) -> StoreResult<()>;

    fn is_empty(&mut self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Overwrite `len` bytes starting at `offset` with zeros.
    fn fill_zero(&mut self, offset: u64, len: u64) -> StoreResult<()> {
        let end = offset.checked_add(len).ok_or(StoreError::OffsetOverflow)?;
        let mut pos = offset;
        while pos < end {
            let chunk = (end - pos).min(ZERO_CHUNK.len() as u64) as usize;
            self.write_at(pos, &ZERO_CHUNK[..chunk])?;
            pos += chunk as u64;
        }
        Ok(())
    }
}

impl<T: BlockStore + ?Sized> BlockStore for &mut T {
    fn len(&mut self) -> StoreResult<u64> {
        (**self).len()
    }

    fn set_len(&mut self, len: u64) -> StoreResult<()> {
        (**self).set_len(len)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> StoreResult<()> {
        (**self).write_at(offset, buf)
    }

    fn flush(&mut self) -> StoreResult<()> {
        (**self).flush()
    }

    fn fill_zero(&mut self, offset: u64, len: u64) -> StoreResult<()> {
        (**self).fill_zero(offset, len)
    }
}

impl<T: BlockStore + ?Sized> BlockStore for Box<T> {
    fn len(&mut self) -> StoreResult<u64> {
        (**self).len()
    }

    fn set_len(&mut self, len: u64) -> StoreResult<()> {
        (**self).set_len(len)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> StoreResult<()> {
        (**self).write_at(offset, buf)
    }

    fn flush(&mut self) -> StoreResult<()> {
        (**self).flush()
    }

    fn fill_zero(&mut self, offset: u64, len: u64) -> StoreResult<()> {
        (**self).fill_zero(offset, len)
    }
}

/// In-memory store, mostly useful for tests and for embedding a throwaway card.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len(len: u64) -> StoreResult<Self> {
        let mut store = Self::new();
        store.set_len(len)?;
        Ok(store)
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl BlockStore for MemStore {
    fn len(&mut self) -> StoreResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> StoreResult<()> {
        let len: usize = len.try_into().map_err(|_| StoreError::OffsetOverflow)?;
        self.data
            .try_reserve(len.saturating_sub(self.data.len()))
            .map_err(|_| StoreError::Io(format!("unable to allocate {len} bytes")))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        checked_range(offset, buf.len(), self.data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> StoreResult<()> {
        checked_range(offset, buf.len(), self.data.len() as u64)?;
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Image file on the host filesystem.
///
/// The file is opened, used and closed inside every call; no handle outlives an operation, so
/// the image can be inspected or copied between device calls. Missing files read as empty and
/// are created by [`BlockStore::set_len`].
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_existing(&self) -> StoreResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::Io(format!("open {}: {e}", self.path.display())))
    }

    /// Opens the image and seeks to `offset` after checking `len` bytes fit in the file.
    fn open_at(&self, offset: u64, len: usize) -> StoreResult<File> {
        let mut file = self.open_existing()?;
        let file_len = file.metadata()?.len();
        checked_range(offset, len, file_len)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }
}

impl BlockStore for FileStore {
    fn len(&mut self) -> StoreResult<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_len(&mut self, len: u64) -> StoreResult<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", self.path.display())))?;
        file.set_len(len)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        let mut file = self.open_at(offset, buf.len())?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> StoreResult<()> {
        let mut file = self.open_at(offset, buf.len())?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.open_existing()?.sync_data()?;
        Ok(())
    }

    fn fill_zero(&mut self, offset: u64, len: u64) -> StoreResult<()> {
        let len_usize: usize = len.try_into().map_err(|_| StoreError::OffsetOverflow)?;
        let mut file = self.open_at(offset, len_usize)?;
        let mut remaining = len_usize;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_CHUNK.len());
            file.write_all(&ZERO_CHUNK[..chunk])?;
            remaining -= chunk;
        }
        file.flush()?;
        Ok(())
    }
}
