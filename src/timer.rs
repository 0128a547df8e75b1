//! Interrupt-visible driver state: the two 10 ms countdowns and the disk
//! status flags.
//!
//! The periodic timer interrupt is the only decrementer; the driver only
//! reloads counters and reads them. Everything is a single atomic, so the
//! main flow never takes a lock to look at a deadline.

use portable_atomic::{AtomicU8, Ordering};

use crate::socket::Socket;
use crate::status::DiskStatus;

/// Period of [`DiskState::tick`].
pub const TICK_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Countdown {
    /// identification budget, settle delay and start-block token waits
    Data = 0,
    /// wait-ready polling
    Ready = 1,
}

pub struct DiskState {
    countdowns: [AtomicU8; 2],
    status: AtomicU8,
}

impl DiskState {
    pub const fn new() -> Self {
        Self {
            countdowns: [AtomicU8::new(0), AtomicU8::new(0)],
            status: AtomicU8::new(DiskStatus::UNINITIALIZED.bits()),
        }
    }

    pub fn status(&self) -> DiskStatus {
        DiskStatus::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    /// Timer interrupt body; call every [`TICK_MS`].
    ///
    /// Decrements both countdowns (floor at zero) and re-samples the socket
    /// switches. An empty socket also forces `UNINITIALIZED`.
    pub fn tick<S: Socket + ?Sized>(&self, socket: &mut S) {
        for countdown in &self.countdowns {
            let _ = countdown.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }

        if socket.is_write_protected() {
            self.set(DiskStatus::WRITE_PROTECTED);
        } else {
            self.clear(DiskStatus::WRITE_PROTECTED);
        }

        if socket.is_present() {
            self.clear(DiskStatus::NO_MEDIA);
        } else {
            self.set(DiskStatus::NO_MEDIA | DiskStatus::UNINITIALIZED);
        }
    }

    pub(crate) fn set(&self, flags: DiskStatus) {
        self.status.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear(&self, flags: DiskStatus) {
        self.status.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn load(&self, countdown: Countdown, ticks: u8) {
        self.countdowns[countdown as usize].store(ticks, Ordering::Release);
    }

    /// Arms `countdown` for `ms`, saturating at what 8 bits hold.
    pub(crate) fn arm(&self, countdown: Countdown, ms: u32) {
        self.load(countdown, (ms / TICK_MS).min(u8::MAX as u32) as u8);
    }

    pub(crate) fn remaining(&self, countdown: Countdown) -> u8 {
        self.countdowns[countdown as usize].load(Ordering::Acquire)
    }

    pub(crate) fn expired(&self, countdown: Countdown) -> bool {
        self.remaining(countdown) == 0
    }

    /// Calls `poll` until it yields a value or `ms` elapse on `countdown`.
    ///
    /// `poll` runs at least once. Budgets longer than one 8-bit load reload
    /// the counter until the whole budget is spent.
    pub(crate) fn poll_until<R>(
        &self,
        countdown: Countdown,
        ms: u32,
        mut poll: impl FnMut() -> Option<R>,
    ) -> Option<R> {
        let mut ticks = ms / TICK_MS;
        loop {
            let chunk = ticks.min(u8::MAX as u32);
            ticks -= chunk;
            self.load(countdown, chunk as u8);
            loop {
                if let Some(value) = poll() {
                    return Some(value);
                }
                if self.expired(countdown) {
                    break;
                }
            }
            if ticks == 0 {
                return None;
            }
        }
    }
}

impl Default for DiskState {
    fn default() -> Self {
        Self::new()
    }
}
