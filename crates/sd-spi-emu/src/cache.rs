use tracing::debug;

use crate::device::Device;
use crate::{BlockStore, ChipSelect, Result, BLOCK_SIZE};

/// The card's single-block write-back buffer.
pub(crate) struct BlockBuffer {
    pub(crate) data: [u8; BLOCK_SIZE],
    /// Block the buffer belongs to; `None` when it holds nothing meaningful.
    pub(crate) address: Option<u32>,
    /// Buffer holds bytes the backing store has not seen yet.
    pub(crate) dirty: bool,
    /// Buffer is the authoritative image of `address` (store contents plus any dirty bytes).
    pub(crate) fresh: bool,
}

impl BlockBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: [0u8; BLOCK_SIZE],
            address: None,
            dirty: false,
            fresh: false,
        }
    }

    pub(crate) fn holds(&self, block: u32) -> bool {
        self.fresh && self.address == Some(block)
    }

    /// Adopt `image` as the clean, current contents of `block`.
    pub(crate) fn publish(&mut self, block: u32, image: [u8; BLOCK_SIZE]) {
        self.data = image;
        self.address = Some(block);
        self.dirty = false;
        self.fresh = true;
    }

    /// Zero the buffer and point it at `address` without claiming it mirrors the store.
    pub(crate) fn reset(&mut self, address: Option<u32>) {
        self.data = [0u8; BLOCK_SIZE];
        self.address = address;
        self.dirty = false;
        self.fresh = false;
    }

    pub(crate) fn invalidate(&mut self) {
        self.reset(None);
    }
}

impl<S: BlockStore, C: ChipSelect> Device<S, C> {
    /// Write the cached block back if it is dirty.
    ///
    /// On failure the buffer stays dirty so a later flush can retry. Flushing the block a
    /// continuous write session is filling advances that session.
    pub(crate) fn flush_cache(&mut self) -> Result<()> {
        let (block, image) = match self.cache.as_ref() {
            Some(BlockBuffer {
                dirty: true,
                address: Some(block),
                data,
                ..
            }) => (*block, *data),
            _ => return Ok(()),
        };

        self.store_write_block(block, &image)?;
        self.stats.flushes += 1;

        let in_session = self.session.is_some();
        let advanced = self.advance_write_session(block);
        if let Some(cache) = self.cache.as_mut() {
            cache.dirty = false;
            cache.fresh = !in_session;
        }
        debug!(block, advanced, "flushed cached block");
        Ok(())
    }

    /// Read `block` from the store into a scratch image.
    pub(crate) fn load_block(&mut self, block: u32) -> Result<[u8; BLOCK_SIZE]> {
        let mut image = [0u8; BLOCK_SIZE];
        self.store_read(block, 0, &mut image)?;
        Ok(image)
    }

    /// Make `block` the cached block, writing back whatever was cached before.
    pub(crate) fn ensure_cached(&mut self, block: u32) -> Result<()> {
        if self.cache.as_ref().is_some_and(|c| c.holds(block)) {
            self.stats.cache_hits += 1;
            return Ok(());
        }
        self.stats.cache_misses += 1;

        self.flush_cache()?;
        let image = self.load_block(block)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.publish(block, image);
        }
        Ok(())
    }

    pub(crate) fn buffered_write(&mut self, block: u32, data: &[u8], offset: usize) -> Result<()> {
        if data.len() == BLOCK_SIZE {
            // A full overwrite needs no prior contents: store it and keep it as the cached block.
            let mut image = [0u8; BLOCK_SIZE];
            image.copy_from_slice(data);

            self.flush_cache()?;
            self.store_write_block(block, &image)?;
            if let Some(cache) = self.cache.as_mut() {
                cache.publish(block, image);
            }
            return Ok(());
        }

        self.ensure_cached(block)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.data[offset..offset + data.len()].copy_from_slice(data);
            cache.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn buffered_read(&mut self, block: u32, buf: &mut [u8], offset: usize) -> Result<()> {
        if let Some(streaming) = self.write_session_address() {
            // Leave the session buffer alone. Only uncommitted session bytes are served from it;
            // everything else comes straight from the store.
            if let Some(cache) = self
                .cache
                .as_ref()
                .filter(|c| c.dirty && c.address == Some(streaming) && block == streaming)
            {
                buf.copy_from_slice(&cache.data[offset..offset + buf.len()]);
                return Ok(());
            }
            return self.store_read(block, offset, buf);
        }

        self.flush_cache()?;
        self.ensure_cached(block)?;
        if let Some(cache) = self.cache.as_ref() {
            buf.copy_from_slice(&cache.data[offset..offset + buf.len()]);
        }
        Ok(())
    }
}
