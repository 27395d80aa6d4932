//! Continuous (multi-block) transfers.
//!
//! A session fixes the starting block once; streamed reads and writes then walk forward one
//! block at a time without the caller passing addresses. Only one session exists at a time and
//! opening one flushes whatever the random-access path left in the cache.

use tracing::debug;

use crate::device::{Device, Session, SessionMode};
use crate::util::fits_in_block;
use crate::{BlockStore, ChipSelect, DeviceError, Result, BLOCK_SIZE};

impl<S: BlockStore, C: ChipSelect> Device<S, C> {
    /// Open a continuous write session at `start`.
    ///
    /// `pre_erase_blocks` mirrors the pre-erase hint real cards accept before a multi-block
    /// write. The emulated card has nothing to pre-erase and ignores it.
    pub fn start_continuous_write(&mut self, start: u32, pre_erase_blocks: u32) -> Result<()> {
        self.selected(|dev| {
            dev.flush_cache()?;
            dev.session = Some(Session {
                mode: SessionMode::Write,
                address: start,
            });
            if let Some(cache) = dev.cache.as_mut() {
                cache.reset(Some(start));
            }
            debug!(start, pre_erase_blocks, "continuous write started");
            Ok(())
        })
    }

    /// Write `data` at `offset` within the session's current block.
    ///
    /// A full block goes straight to the store and moves the session to the next block. Partial
    /// writes accumulate in a zero-initialised block image until [`Device::write_boundary`] or
    /// [`Device::stop_continuous_write`] commits it.
    pub fn write_next(&mut self, data: &[u8], offset: usize) -> Result<()> {
        if !fits_in_block(offset, data.len()) {
            return Err(DeviceError::WriteOutsideBlock {
                offset,
                len: data.len(),
            });
        }
        self.selected(|dev| dev.stream_write(data, offset))
    }

    /// Commit the session's current block (if anything was written to it) and move on.
    pub fn write_boundary(&mut self) -> Result<()> {
        self.selected(|dev| {
            dev.flush_cache()?;
            if let (Some(address), Some(cache)) = (dev.write_session_address(), dev.cache.as_mut())
            {
                cache.reset(Some(address));
            }
            Ok(())
        })
    }

    /// Commit any pending block, close the session and report card status.
    pub fn stop_continuous_write(&mut self) -> Result<()> {
        self.selected(|dev| {
            dev.flush_cache()?;
            if let Some(session) = dev.session.take() {
                debug!(next = session.address, "continuous write stopped");
            }
            Ok(())
        })?;
        self.device_status()
    }

    /// Open a continuous read session and load block `start` so the first
    /// [`Device::read_next`] is served from the cache.
    ///
    /// If the load fails the previous session, if any, is left as it was.
    pub fn start_continuous_read(&mut self, start: u32) -> Result<()> {
        self.selected(|dev| {
            dev.flush_cache()?;
            if dev.cache.is_some() {
                let image = dev.load_block(start)?;
                if let Some(cache) = dev.cache.as_mut() {
                    cache.publish(start, image);
                }
            }
            dev.session = Some(Session {
                mode: SessionMode::Read,
                address: start,
            });
            debug!(start, "continuous read started");
            Ok(())
        })
    }

    /// Read from the session's current block.
    pub fn read_next(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        if !fits_in_block(offset, buf.len()) {
            return Err(DeviceError::ReadOutsideBlock {
                offset,
                len: buf.len(),
            });
        }

        self.selected(|dev| {
            let address = dev.read_session_address()?;
            if dev.cache.is_none() {
                return dev.direct_read(address, buf, offset);
            }

            dev.ensure_cached(address)?;
            if let Some(cache) = dev.cache.as_ref() {
                buf.copy_from_slice(&cache.data[offset..offset + buf.len()]);
            }
            Ok(())
        })
    }

    /// Move the read session to the next block, loading it eagerly when caching.
    ///
    /// The session stays on its current block if the load fails.
    pub fn read_advance(&mut self) -> Result<()> {
        self.selected(|dev| {
            let next = dev.read_session_address()?.saturating_add(1);
            if dev.cache.is_some() {
                dev.ensure_cached(next)?;
            }
            if let Some(session) = dev.session.as_mut() {
                session.address = next;
            }
            Ok(())
        })
    }

    pub fn stop_continuous_read(&mut self) -> Result<()> {
        self.selected(|dev| {
            if let Some(session) = dev.session.take() {
                debug!(last = session.address, "continuous read stopped");
            }
            Ok(())
        })
    }

    fn read_session_address(&self) -> Result<u32> {
        match self.session {
            Some(Session {
                mode: SessionMode::Read,
                address,
            }) => Ok(address),
            _ => Err(DeviceError::NoSession("read")),
        }
    }

    /// Point the cache at the session block, committing anything left over from elsewhere.
    fn claim_stream_buffer(&mut self, address: u32) -> Result<()> {
        if self.current_buffered_block() == Some(address) {
            return Ok(());
        }
        self.flush_cache()?;
        if let Some(cache) = self.cache.as_mut() {
            cache.reset(Some(address));
        }
        Ok(())
    }

    pub(crate) fn stream_write(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let address = self
            .write_session_address()
            .ok_or(DeviceError::NoSession("write"))?;

        if self.cache.is_none() {
            return self.direct_write(address, data, offset);
        }

        self.claim_stream_buffer(address)?;

        if data.len() == BLOCK_SIZE {
            let mut image = [0u8; BLOCK_SIZE];
            image.copy_from_slice(data);
            self.store_write_block(address, &image)?;
            self.advance_write_session(address);
            if let Some(cache) = self.cache.as_mut() {
                cache.reset(Some(address.saturating_add(1)));
            }
            return Ok(());
        }

        if let Some(cache) = self.cache.as_mut() {
            cache.data[offset..offset + data.len()].copy_from_slice(data);
            cache.dirty = true;
        }
        Ok(())
    }
}
