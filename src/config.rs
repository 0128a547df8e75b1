use fugit::HertzU32;

/// What to do with the two CRC bytes trailing every received data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataCrc {
    /// Clock them out and drop them.
    #[default]
    Discard,
    /// Check them as CRC16-XMODEM over the payload.
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Bus clock during identification (100-400 kHz).
    pub slow_clock: HertzU32,
    /// Bus clock once the card is ready.
    pub fast_clock: HertzU32,
    pub data_crc: DataCrc,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slow_clock: HertzU32::kHz(400),
            // highest rate cards reliably sustain in SPI mode
            fast_clock: HertzU32::MHz(24),
            data_crc: DataCrc::Discard,
        }
    }
}
