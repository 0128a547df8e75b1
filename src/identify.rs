//! Card identification: power cycle, SPI-mode entry and the SD v2 / SD v1 /
//! MMC probe sequence.

use crate::bus::{BusArbiter, BusGuard};
use crate::command::{Cmd, R1};
use crate::disk::MmcSpi;
use crate::socket::Socket;
use crate::status::{CardType, DiskStatus};
use crate::timer::Countdown;
use crate::transport::Transport;
use crate::SECTOR_SIZE;

/// Socket power settle time.
const SETTLE_MS: u32 = 100;
/// Budget for the card to leave the idle state.
const IDENTIFY_MS: u32 = 1000;
/// 80 clocks with CS high put the card's front end into a known state.
const WAKE_BYTES: usize = 10;
/// SEND_IF_COND echo pattern.
const CHECK_PATTERN: u8 = 0xAA;
/// OCR card capacity status (CCS) bit, in the first OCR byte.
const OCR_CCS: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    IdleRequested,
    V2Probe,
    LegacyProbe,
    Ready(CardType),
    Failed,
}

impl InitState {
    fn name(&self) -> &'static str {
        match self {
            InitState::IdleRequested => "idle-requested",
            InitState::V2Probe => "v2-probe",
            InitState::LegacyProbe => "legacy-probe",
            InitState::Ready(_) => "ready",
            InitState::Failed => "failed",
        }
    }
}

impl<'s, T: Transport, S: Socket, A: BusArbiter> MmcSpi<'s, T, S, A> {
    /// Power-cycles the socket and identifies the card.
    ///
    /// Blocks for at least the 100 ms settle time and up to about a second
    /// more, so the timer tick must be running. On success `UNINITIALIZED`
    /// is cleared and the bus is switched to the fast clock.
    pub fn initialize(&mut self) -> DiskStatus {
        let state = self.link.state;

        trace!("init: power-off");
        self.socket.power_off();
        state.set(DiskStatus::UNINITIALIZED);

        trace!("init: settling");
        state.poll_until(Countdown::Data, SETTLE_MS, || {
            core::hint::spin_loop();
            None::<()>
        });
        if state.status().contains(DiskStatus::NO_MEDIA) {
            debug!("init: socket empty");
            return state.status();
        }

        let _bus = BusGuard::acquire(&mut self.arbiter);
        let link = &mut self.link;
        self.socket.power_on();
        link.bus.set_clock(self.config.slow_clock);
        for _ in 0..WAKE_BYTES {
            link.exchange(0xFF);
        }

        let mut step = InitState::IdleRequested;
        loop {
            trace!("init: {}", step.name());
            step = match step {
                InitState::IdleRequested => {
                    if link.send_command(Cmd::cmd0()) == R1::IDLE.bits() {
                        state.arm(Countdown::Data, IDENTIFY_MS);
                        InitState::V2Probe
                    } else {
                        InitState::Failed
                    }
                }
                InitState::V2Probe => {
                    if link.send_command(Cmd::cmd8(CHECK_PATTERN)) != R1::IDLE.bits() {
                        InitState::LegacyProbe
                    } else {
                        let echo = link.receive_trailer();
                        if echo[2] != 0x01 || echo[3] != CHECK_PATTERN {
                            debug!("init: voltage check echo {:02x} {:02x}", echo[2], echo[3]);
                            InitState::Failed
                        } else {
                            while !state.expired(Countdown::Data)
                                && link.send_command(Cmd::acmd41(true)) != 0
                            {}
                            if state.expired(Countdown::Data) || link.send_command(Cmd::cmd58()) != 0 {
                                InitState::Failed
                            } else {
                                let ocr = link.receive_trailer();
                                if ocr[0] & OCR_CCS != 0 {
                                    InitState::Ready(CardType::SD2 | CardType::BLOCK)
                                } else {
                                    InitState::Ready(CardType::SD2)
                                }
                            }
                        }
                    }
                }
                InitState::LegacyProbe => {
                    let (card_type, leave_idle) =
                        if link.send_command(Cmd::acmd41(false)) <= R1::IDLE.bits() {
                            (CardType::SD1, Cmd::acmd41(false))
                        } else {
                            (CardType::MMC, Cmd::cmd1())
                        };
                    while !state.expired(Countdown::Data) && link.send_command(leave_idle) != 0 {}
                    if state.expired(Countdown::Data)
                        || link.send_command(Cmd::cmd16(SECTOR_SIZE as u32)) != 0
                    {
                        InitState::Failed
                    } else {
                        InitState::Ready(card_type)
                    }
                }
                InitState::Ready(_) | InitState::Failed => break,
            };
        }

        link.deselect();
        if let InitState::Ready(card_type) = step {
            self.card_type = card_type;
            state.clear(DiskStatus::UNINITIALIZED);
            link.bus.set_clock(self.config.fast_clock);
            info!(
                "card ready: type {:02x}, fast clock {} Hz",
                card_type.bits(),
                self.config.fast_clock.raw()
            );
        } else {
            self.card_type = CardType::empty();
            self.socket.power_off();
            warn!("card identification failed");
        }

        state.status()
    }
}
