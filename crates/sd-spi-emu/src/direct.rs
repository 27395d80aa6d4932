use crate::device::Device;
use crate::{BlockStore, ChipSelect, Result, BLOCK_SIZE};

impl<S: BlockStore, C: ChipSelect> Device<S, C> {
    /// Uncached write: the payload is padded with zeros to a whole block and stored at once.
    ///
    /// Inside a continuous write session the session address is the target and it advances
    /// after every successful write.
    pub(crate) fn direct_write(&mut self, block: u32, data: &[u8], offset: usize) -> Result<()> {
        let target = self.write_session_address().unwrap_or(block);

        let mut image = [0u8; BLOCK_SIZE];
        image[offset..offset + data.len()].copy_from_slice(data);
        self.store_write_block(target, &image)?;

        self.advance_write_session(target);
        Ok(())
    }

    pub(crate) fn direct_read(&mut self, block: u32, buf: &mut [u8], offset: usize) -> Result<()> {
        self.store_read(block, offset, buf)
    }
}
