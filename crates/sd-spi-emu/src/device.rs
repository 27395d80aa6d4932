use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::cache::BlockBuffer;
use crate::registers::{Cid, Csd};
use crate::util::{block_byte_offset, fits_in_block};
use crate::{
    BlockStore, CacheMode, ChipSelect, DeviceConfig, DeviceError, Result, SelectLine,
    StoreError, BLOCK_SIZE,
};

/// Direction of a continuous transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    Read,
    Write,
}

/// An open continuous transfer.
///
/// `address` is the block the next streamed write lands in, or the block currently served to
/// streamed reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    pub mode: SessionMode,
    pub address: u32,
}

/// Diagnostic counters. They never influence behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoStats {
    /// Reads issued to the backing store.
    pub block_reads: u64,
    /// Whole-block writes issued to the backing store.
    pub block_writes: u64,
    /// Dirty cache blocks written back.
    pub flushes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// An emulated SD card speaking block-addressed commands.
///
/// The card owns its backing store and select line. Every public operation that touches the
/// store asserts the select line on entry and releases it before returning, on both the success
/// and error paths.
pub struct Device<S, C = SelectLine> {
    pub(crate) store: S,
    chip_select: C,
    capacity_blocks: u32,
    pub(crate) session: Option<Session>,
    /// Present only in [`CacheMode::WriteBack`].
    pub(crate) cache: Option<BlockBuffer>,
    pub(crate) stats: IoStats,
}

impl<S: BlockStore> Device<S> {
    /// Bring up a card on `store`, using a bookkeeping-only select line on the configured pin.
    pub fn initialize(config: &DeviceConfig, store: S) -> Result<Self> {
        Self::initialize_with_select(config, store, SelectLine::new(config.chip_select_pin))
    }
}

impl<S: BlockStore, C: ChipSelect> Device<S, C> {
    /// Bring up a card on `store` with a caller-provided select line.
    ///
    /// The store is zero-extended to `capacity_blocks * 512` bytes when it is missing or
    /// smaller than that; existing contents are preserved. Any store failure during bring-up is
    /// reported as [`DeviceError::InitTimeout`].
    pub fn initialize_with_select(config: &DeviceConfig, store: S, chip_select: C) -> Result<Self> {
        config.validate()?;

        let mut dev = Device {
            store,
            chip_select,
            capacity_blocks: config.capacity_blocks,
            session: None,
            cache: match config.cache {
                CacheMode::Direct => None,
                CacheMode::WriteBack => Some(BlockBuffer::new()),
            },
            stats: IoStats::default(),
        };

        let required = config.capacity_bytes();
        dev.selected(|dev| {
            let current = dev.store.len().map_err(DeviceError::InitTimeout)?;
            if current < required {
                debug!(current, required, "extending backing store");
                dev.store
                    .set_len(required)
                    .map_err(DeviceError::InitTimeout)?;
            }
            dev.store.flush().map_err(DeviceError::InitTimeout)
        })?;

        debug!(
            capacity_blocks = config.capacity_blocks,
            cache = ?config.cache,
            "card initialized"
        );
        Ok(dev)
    }

    /// Run `op` with the card selected, releasing the line on every exit path.
    pub(crate) fn selected<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.chip_select.select();
        let res = op(self);
        self.chip_select.deselect();
        res
    }

    pub fn card_capacity_blocks(&self) -> u32 {
        self.capacity_blocks
    }

    pub fn cache_mode(&self) -> CacheMode {
        if self.cache.is_some() {
            CacheMode::WriteBack
        } else {
            CacheMode::Direct
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session
    }

    pub fn stats(&self) -> IoStats {
        self.stats
    }

    pub fn is_selected(&self) -> bool {
        self.chip_select.is_selected()
    }

    pub fn chip_select(&self) -> &C {
        &self.chip_select
    }

    /// Block currently held by the write-back cache. Always `None` in [`CacheMode::Direct`].
    pub fn current_buffered_block(&self) -> Option<u32> {
        self.cache.as_ref().and_then(|c| c.address)
    }

    /// Whether the cache holds bytes that have not reached the backing store yet.
    pub fn has_pending_write(&self) -> bool {
        self.cache.as_ref().is_some_and(|c| c.dirty)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Tear the card down without flushing and hand back the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Status poll. The emulated card is never busy.
    pub fn device_status(&mut self) -> Result<()> {
        self.selected(|_| Ok(()))
    }

    pub fn read_identification(&mut self) -> Result<Cid> {
        self.selected(|_| Ok(Cid::EMULATED))
    }

    pub fn read_configuration(&mut self) -> Result<Csd> {
        self.selected(|_| Ok(Csd::EMULATED))
    }

    /// Write `data` into `block` starting at byte `offset`.
    ///
    /// While a continuous write session is open the session address is used instead of `block`
    /// and the call behaves like [`Device::write_next`].
    pub fn write(&mut self, block: u32, data: &[u8], offset: usize) -> Result<()> {
        if !fits_in_block(offset, data.len()) {
            return Err(DeviceError::WriteOutsideBlock {
                offset,
                len: data.len(),
            });
        }

        self.selected(|dev| match dev.session {
            Some(Session {
                mode: SessionMode::Write,
                address,
            }) => {
                if address != block {
                    trace!(block, address, "continuous write ignores explicit address");
                }
                dev.stream_write(data, offset)
            }
            _ if dev.cache.is_some() => dev.buffered_write(block, data, offset),
            _ => dev.direct_write(block, data, offset),
        })
    }

    /// Write one full block.
    pub fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.write(block, data, 0)
    }

    /// Read `buf.len()` bytes of `block` starting at byte `offset`.
    pub fn read(&mut self, block: u32, buf: &mut [u8], offset: usize) -> Result<()> {
        if !fits_in_block(offset, buf.len()) {
            return Err(DeviceError::ReadOutsideBlock {
                offset,
                len: buf.len(),
            });
        }

        self.selected(|dev| {
            if dev.cache.is_some() {
                dev.buffered_read(block, buf, offset)
            } else {
                dev.direct_read(block, buf, offset)
            }
        })
    }

    /// Push any pending cached block to the backing store.
    pub fn flush(&mut self) -> Result<()> {
        self.selected(|dev| dev.flush_cache())
    }

    /// Raw contents of `block` as stored, bypassing (and not flushing) the cache.
    pub fn dump_block(&mut self, block: u32) -> Result<[u8; BLOCK_SIZE]> {
        let mut image = [0u8; BLOCK_SIZE];
        self.selected(|dev| dev.store_read(block, 0, &mut image))?;
        Ok(image)
    }

    /// Zero blocks `start..end`.
    ///
    /// Pending cached data is flushed first. A cached block inside the range is replaced by a
    /// zeroed image so later reads do not have to reload it.
    pub fn erase_range(&mut self, start: u32, end: u32) -> Result<()> {
        self.selected(|dev| {
            let capacity = u64::from(dev.capacity_blocks) * BLOCK_SIZE as u64;
            let offset = u64::from(start) * BLOCK_SIZE as u64;
            let len = u64::from(end.saturating_sub(start)) * BLOCK_SIZE as u64;
            if start > end || offset + len > capacity {
                return Err(DeviceError::EraseFailure {
                    start,
                    end,
                    source: StoreError::OutOfBounds {
                        offset,
                        len: usize::try_from(len).unwrap_or(usize::MAX),
                        capacity,
                    },
                });
            }

            dev.flush_cache()?;

            let res = dev
                .store
                .fill_zero(offset, len)
                .and_then(|()| dev.store.flush());

            let covered = |block: u32| (start..end).contains(&block);
            if let Some(cache) = dev.cache.as_mut() {
                match cache.address {
                    Some(block) if covered(block) && res.is_ok() => {
                        cache.publish(block, [0u8; BLOCK_SIZE]);
                    }
                    Some(block) if covered(block) => cache.invalidate(),
                    _ => {}
                }
            }

            res.map_err(|source| {
                warn!(start, end, error = %source, "erase failed");
                DeviceError::EraseFailure { start, end, source }
            })?;
            debug!(start, end, "erased blocks");
            Ok(())
        })
    }

    pub fn erase_all(&mut self) -> Result<()> {
        self.erase_range(0, self.capacity_blocks)
    }

    /// Write one whole block image to the backing store.
    pub(crate) fn store_write_block(&mut self, block: u32, image: &[u8; BLOCK_SIZE]) -> Result<()> {
        let res = block_byte_offset(block, self.capacity_blocks)
            .and_then(|offset| self.store.write_at(offset, image));
        if let Err(source) = res {
            warn!(block, error = %source, "block write failed");
            return Err(DeviceError::WriteFailure { block, source });
        }
        self.stats.block_writes += 1;
        trace!(block, "block written");
        Ok(())
    }

    /// Read `buf.len()` bytes of `block` starting at `offset` from the backing store.
    pub(crate) fn store_read(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        let res = block_byte_offset(block, self.capacity_blocks)
            .and_then(|base| self.store.read_at(base + offset as u64, buf));
        if let Err(source) = res {
            warn!(block, error = %source, "block read failed");
            return Err(DeviceError::ReadFailure { block, source });
        }
        self.stats.block_reads += 1;
        trace!(block, offset, len = buf.len(), "block read");
        Ok(())
    }

    pub(crate) fn write_session_address(&self) -> Option<u32> {
        match self.session {
            Some(Session {
                mode: SessionMode::Write,
                address,
            }) => Some(address),
            _ => None,
        }
    }

    /// Move an open write session past `block` once that block has been stored.
    pub(crate) fn advance_write_session(&mut self, block: u32) -> bool {
        match self.session.as_mut() {
            Some(session) if session.mode == SessionMode::Write && session.address == block => {
                session.address = session.address.saturating_add(1);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    fn card(capacity_blocks: u32, cache: CacheMode) -> Device<MemStore> {
        let cfg = DeviceConfig::with_capacity(capacity_blocks).with_cache(cache);
        Device::initialize(&cfg, MemStore::new()).unwrap()
    }

    #[test]
    fn initialize_zero_extends_store_to_capacity() {
        let dev = card(16, CacheMode::WriteBack);
        assert_eq!(dev.store().as_slice().len(), 16 * BLOCK_SIZE);
        assert!(dev.store().as_slice().iter().all(|b| *b == 0));
        assert!(!dev.is_selected());
        assert_eq!(dev.card_capacity_blocks(), 16);
        assert_eq!(dev.current_buffered_block(), None);
    }

    #[test]
    fn initialize_preserves_existing_contents() {
        let mut data = vec![0u8; 4 * BLOCK_SIZE];
        data[BLOCK_SIZE] = 0x42;
        let cfg = DeviceConfig::with_capacity(8);
        let dev = Device::initialize(&cfg, MemStore::from_vec(data)).unwrap();

        let store = dev.into_store().into_vec();
        assert_eq!(store.len(), 8 * BLOCK_SIZE);
        assert_eq!(store[BLOCK_SIZE], 0x42);
    }

    #[test]
    fn initialize_rejects_zero_capacity() {
        let cfg = DeviceConfig::with_capacity(0);
        let err = Device::initialize(&cfg, MemStore::new()).err().unwrap();
        assert!(matches!(err, DeviceError::InvalidConfig(_)));
    }

    #[test]
    fn select_line_is_released_after_errors() {
        let mut dev = card(4, CacheMode::WriteBack);
        let mut buf = [0u8; 8];
        let err = dev.read(9, &mut buf, 0).unwrap_err();
        assert!(matches!(err, DeviceError::ReadFailure { block: 9, .. }));
        assert!(!dev.is_selected());
    }

    #[test]
    fn out_of_block_spans_are_rejected_before_touching_the_store() {
        for mode in [CacheMode::Direct, CacheMode::WriteBack] {
            let mut dev = card(4, mode);
            let before = dev.stats();

            let err = dev.write(1, &[1u8; 10], 503).unwrap_err();
            assert!(matches!(
                err,
                DeviceError::WriteOutsideBlock {
                    offset: 503,
                    len: 10
                }
            ));

            let mut buf = [0u8; 2];
            let err = dev.read(1, &mut buf, 511).unwrap_err();
            assert!(matches!(err, DeviceError::ReadOutsideBlock { .. }));

            assert_eq!(dev.stats(), before);
            assert!(!dev.has_pending_write());
            assert!(dev.store().as_slice().iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn rejected_spans_leave_pending_cached_block_untouched() {
        let mut dev = card(4, CacheMode::WriteBack);
        dev.write(2, b"pending", 5).unwrap();
        let before = dev.stats();

        let err = dev.write(2, &[0xFF; 8], 508).unwrap_err();
        assert!(matches!(err, DeviceError::WriteOutsideBlock { .. }));
        let err = dev.write(3, &[0xFF; BLOCK_SIZE], 1).unwrap_err();
        assert!(matches!(err, DeviceError::WriteOutsideBlock { .. }));
        let mut buf = [0u8; 4];
        let err = dev.read(3, &mut buf, 509).unwrap_err();
        assert!(matches!(err, DeviceError::ReadOutsideBlock { .. }));

        assert_eq!(dev.stats(), before);
        assert_eq!(dev.current_buffered_block(), Some(2));
        assert!(dev.has_pending_write());
        assert!(dev.store().as_slice().iter().all(|b| *b == 0));

        dev.flush().unwrap();
        let raw = dev.store().as_slice();
        assert_eq!(&raw[2 * BLOCK_SIZE + 5..2 * BLOCK_SIZE + 12], b"pending");
        assert!(raw[2 * BLOCK_SIZE + 12..3 * BLOCK_SIZE].iter().all(|b| *b == 0));
    }

    #[test]
    fn registers_and_status_are_constant() {
        let mut dev = card(4, CacheMode::Direct);
        assert_eq!(dev.read_identification().unwrap(), Cid::EMULATED);
        assert_eq!(dev.read_configuration().unwrap(), Csd::EMULATED);
        dev.device_status().unwrap();
        assert!(!dev.is_selected());
    }

    #[test]
    fn erase_rejects_inverted_or_oversized_ranges() {
        let mut dev = card(4, CacheMode::WriteBack);
        assert!(matches!(
            dev.erase_range(3, 1).unwrap_err(),
            DeviceError::EraseFailure { start: 3, end: 1, .. }
        ));
        assert!(matches!(
            dev.erase_range(0, 5).unwrap_err(),
            DeviceError::EraseFailure { .. }
        ));
        dev.erase_range(2, 2).unwrap();
    }

    #[test]
    fn erase_replaces_cached_block_inside_range() {
        let mut dev = card(8, CacheMode::WriteBack);
        dev.write(3, b"pending", 10).unwrap();
        assert!(dev.has_pending_write());

        dev.erase_range(3, 5).unwrap();
        assert!(!dev.has_pending_write());
        assert_eq!(dev.current_buffered_block(), Some(3));

        let reads = dev.stats().block_reads;
        let mut buf = [0xFFu8; 7];
        dev.read(3, &mut buf, 10).unwrap();
        assert_eq!(buf, [0u8; 7]);
        // Served from the zeroed cache image.
        assert_eq!(dev.stats().block_reads, reads);
    }

    #[test]
    fn erase_all_zeroes_every_block() {
        let mut dev = card(4, CacheMode::Direct);
        for block in 0..4 {
            dev.write_block(block, &[0xAB; BLOCK_SIZE]).unwrap();
        }
        dev.erase_all().unwrap();
        assert!(dev.store().as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn dump_block_bypasses_pending_cache_data() {
        let mut dev = card(4, CacheMode::WriteBack);
        dev.write(2, b"xyz", 0).unwrap();

        assert_eq!(dev.dump_block(2).unwrap(), [0u8; BLOCK_SIZE]);
        dev.flush().unwrap();
        assert_eq!(&dev.dump_block(2).unwrap()[..3], b"xyz");
    }
}
