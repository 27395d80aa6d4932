use serde::{Deserialize, Serialize};

use crate::registers::DEFAULT_CAPACITY_BLOCKS;
use crate::{DeviceError, Result, BLOCK_SIZE};

/// Chip select pin used when a config does not name one.
pub const DEFAULT_CHIP_SELECT_PIN: u8 = 4;

/// How the card services byte-granular transfers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Every call becomes one backing-store transaction. Partial writes are zero-padded to a
    /// full block.
    Direct,
    /// Single-block write-back cache; partial writes merge with the existing block contents.
    #[default]
    WriteBack,
}

/// Construction-time parameters of an emulated card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Number of addressable 512-byte blocks.
    pub capacity_blocks: u32,
    pub cache: CacheMode,
    pub chip_select_pin: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capacity_blocks: DEFAULT_CAPACITY_BLOCKS,
            cache: CacheMode::default(),
            chip_select_pin: DEFAULT_CHIP_SELECT_PIN,
        }
    }
}

impl DeviceConfig {
    pub fn with_capacity(capacity_blocks: u32) -> Self {
        Self {
            capacity_blocks,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.capacity_blocks) * BLOCK_SIZE as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity_blocks == 0 {
            return Err(DeviceError::InvalidConfig("capacity_blocks must be > 0"));
        }
        Ok(())
    }
}
