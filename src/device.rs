//! `block-device-driver` adapter, for async file-system crates.

use aligned::{Aligned, A4};
use block_device_driver::BlockDevice;

use crate::bus::BusArbiter;
use crate::error::Error;
use crate::ioctl::Ioctl;
use crate::socket::Socket;
use crate::transport::Transport;
use crate::{MmcSpi, SECTOR_SIZE};

impl<'s, T: Transport, S: Socket, A: BusArbiter> BlockDevice<SECTOR_SIZE> for MmcSpi<'s, T, S, A> {
    type Error = Error;
    type Align = A4;

    async fn read(
        &mut self,
        block_address: u32,
        data: &mut [Aligned<Self::Align, [u8; SECTOR_SIZE]>],
    ) -> Result<(), Self::Error> {
        for (i, block) in data.iter_mut().enumerate() {
            MmcSpi::read(self, &mut block[..], block_address.wrapping_add(i as u32), 1)?;
        }

        Ok(())
    }

    async fn write(
        &mut self,
        block_address: u32,
        data: &[Aligned<Self::Align, [u8; SECTOR_SIZE]>],
    ) -> Result<(), Self::Error> {
        for (i, block) in data.iter().enumerate() {
            MmcSpi::write(self, &block[..], block_address.wrapping_add(i as u32), 1)?;
        }

        Ok(())
    }

    /// Capacity in bytes.
    async fn size(&mut self) -> Result<u64, Self::Error> {
        let mut sectors = 0;
        self.ioctl(Ioctl::GetSectorCount(&mut sectors))?;
        Ok(sectors as u64 * SECTOR_SIZE as u64)
    }
}
