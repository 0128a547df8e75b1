//! Ownership of a serial bus shared with other peripherals.

use portable_atomic::{AtomicBool, Ordering};

/// Grants the driver exclusive use of the bus for one facade call.
pub trait BusArbiter {
    /// Whatever `release` needs to put back, typically the interrupt-enable
    /// state of a peripheral that had to be quiesced.
    type Saved;

    fn acquire(&mut self) -> Self::Saved;

    fn release(&mut self, saved: Self::Saved);
}

/// The bus has no other users.
#[derive(Debug, Default, Clone, Copy)]
pub struct Exclusive;

impl BusArbiter for Exclusive {
    type Saved = ();

    fn acquire(&mut self) {}

    fn release(&mut self, _saved: ()) {}
}

/// Interrupt source that must stay quiet while the card owns the bus.
pub trait InterruptGate {
    /// Disables the interrupt, returning whether it was enabled.
    fn suspend(&mut self) -> bool;

    fn restore(&mut self, was_enabled: bool);
}

/// No interrupt to gate.
impl InterruptGate for () {
    fn suspend(&mut self) -> bool {
        false
    }

    fn restore(&mut self, _was_enabled: bool) {}
}

/// Bus mutex shared by every driver on the same bus.
pub struct BusLock {
    owned: AtomicBool,
}

impl BusLock {
    pub const fn new() -> Self {
        Self {
            owned: AtomicBool::new(false),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    fn lock(&self) {
        while self
            .owned
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.owned.store(false, Ordering::Release);
    }
}

impl Default for BusLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Arbiter over a [`BusLock`], suspending `G` for the duration.
pub struct SharedBus<'l, G = ()> {
    lock: &'l BusLock,
    gate: G,
}

impl<'l, G: InterruptGate> SharedBus<'l, G> {
    pub fn new(lock: &'l BusLock, gate: G) -> Self {
        Self { lock, gate }
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }
}

impl<'l, G: InterruptGate> BusArbiter for SharedBus<'l, G> {
    type Saved = bool;

    fn acquire(&mut self) -> bool {
        self.lock.lock();
        self.gate.suspend()
    }

    fn release(&mut self, was_enabled: bool) {
        self.gate.restore(was_enabled);
        self.lock.unlock();
    }
}

/// Holds the bus until dropped.
pub(crate) struct BusGuard<'a, A: BusArbiter> {
    arbiter: &'a mut A,
    saved: Option<A::Saved>,
}

impl<'a, A: BusArbiter> BusGuard<'a, A> {
    pub fn acquire(arbiter: &'a mut A) -> Self {
        let saved = arbiter.acquire();
        Self {
            arbiter,
            saved: Some(saved),
        }
    }
}

impl<A: BusArbiter> Drop for BusGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.arbiter.release(saved);
        }
    }
}
