//! SD/MMC card driver for the SPI bus.
//!
//! Identifies MMC v3, SD v1.x and SD v2.0 (byte or block addressed) cards
//! and exposes them as 512-byte sector storage: `initialize`, `status`,
//! `read`, `write` and `ioctl`, plus a 10 ms `timer_tick` that the platform
//! calls from a periodic interrupt.
//!
//! ```ignore
//! static STATE: DiskState = DiskState::new();
//!
//! let mut card = MmcSpi::new(SpiTransport::new(spi, cs), &STATE);
//! // 10 ms timer interrupt: STATE.tick(&mut FixedSocket::new());
//! if !card.initialize().contains(DiskStatus::UNINITIALIZED) {
//!     card.read(&mut buf, 0, 1)?;
//! }
//! ```
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod block;
mod bus;
mod command;
mod config;
mod csd;
mod device;
mod disk;
mod dma;
mod error;
mod identify;
mod ioctl;
mod link;
mod socket;
mod status;
mod timer;
mod transport;

pub use bus::{BusArbiter, BusLock, Exclusive, InterruptGate, SharedBus};
pub use command::{NO_RESPONSE, R1};
pub use config::{Config, DataCrc};
pub use csd::{au_sectors, Csd};
pub use disk::MmcSpi;
pub use dma::{DmaChannel, DmaCompletion, DmaTransport};
pub use error::{Error, Fault, ResultCode};
pub use ioctl::{ControlCode, Ioctl};
pub use socket::{FixedSocket, GpioSocket, Socket};
pub use status::{CardType, DiskStatus};
pub use timer::{DiskState, TICK_MS};
pub use transport::{BusClock, SpiTransport, Transport};

/// Physical sector size; every card is driven with 512-byte blocks.
pub const SECTOR_SIZE: usize = 512;
