use crate::{StoreError, StoreResult, BLOCK_SIZE};

pub fn checked_range(offset: u64, len: usize, capacity: u64) -> StoreResult<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(StoreError::OffsetOverflow)?;
    if end > capacity {
        return Err(StoreError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

/// Returns `true` when `len` bytes starting at `offset` stay inside a single block.
pub fn fits_in_block(offset: usize, len: usize) -> bool {
    offset
        .checked_add(len)
        .is_some_and(|end| end <= BLOCK_SIZE)
}

/// Byte offset of `block` in a flat image, rejecting blocks at or past `capacity_blocks`.
pub fn block_byte_offset(block: u32, capacity_blocks: u32) -> StoreResult<u64> {
    let offset = u64::from(block) * BLOCK_SIZE as u64;
    checked_range(offset, BLOCK_SIZE, u64::from(capacity_blocks) * BLOCK_SIZE as u64)?;
    Ok(offset)
}
