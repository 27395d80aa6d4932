//! Emulated SD card (SPI mode) backed by a host file or memory buffer.
//!
//! Filesystem code written against a block-addressed SD card can run against this crate on a
//! development machine instead of real hardware. The card exposes byte-granular reads and writes
//! within 512-byte blocks, continuous multi-block transfers, block erase and the CID/CSD
//! identification registers, while the backing store only ever sees whole-block writes.
//!
//! - [`Device`]: the card; owns a [`BlockStore`] and a [`ChipSelect`] line
//! - [`CacheMode`]: direct (one store transaction per call) or single-block write-back cache
//! - [`FileStore`] / [`MemStore`]: backing stores
//! - [`Cid`] / [`Csd`]: register images
//!
//! ```rust
//! use sd_spi_emu::{Device, DeviceConfig, MemStore};
//!
//! let mut card = Device::initialize(&DeviceConfig::with_capacity(64), MemStore::new()).unwrap();
//! card.write(1, b"hello", 0).unwrap();
//! card.flush().unwrap();
//!
//! let mut buf = [0u8; 5];
//! card.read(1, &mut buf, 0).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

mod cache;
mod config;
mod continuous;
mod device;
mod direct;
mod error;
pub mod registers;
mod select;
mod store;
mod util;

pub use config::{CacheMode, DeviceConfig, DEFAULT_CHIP_SELECT_PIN};
pub use device::{Device, IoStats, Session, SessionMode};
pub use error::{DeviceError, Result, StoreError, StoreResult};
pub use registers::{Cid, Csd, DEFAULT_CAPACITY_BLOCKS};
pub use select::{ChipSelect, SelectLine};
pub use store::{BlockStore, FileStore, MemStore};

/// Size of one addressable block in bytes.
pub const BLOCK_SIZE: usize = 512;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;
