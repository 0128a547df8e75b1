//! DMA-accelerated bulk receive.
//!
//! The completion interrupt may fire before the caller gets around to
//! waiting. [`DmaCompletion`] is a latch, reset and armed inside a critical
//! section before the channel is started, so an early interrupt leaves the
//! latch set and the wait returns straight away instead of parking forever.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use fugit::HertzU32;

use crate::transport::Transport;

/// Transfer-complete latch shared between the driver and the DMA interrupt.
pub struct DmaCompletion {
    done: Signal<CriticalSectionRawMutex, ()>,
}

impl DmaCompletion {
    pub const fn new() -> Self {
        Self {
            done: Signal::new(),
        }
    }

    /// Call from the DMA transfer-complete interrupt.
    pub fn complete(&self) {
        self.done.signal(());
    }

    /// Clears the latch and runs `start` with interrupts masked, so the
    /// completion cannot be observed before the latch is armed.
    pub(crate) fn arm(&self, start: impl FnOnce()) {
        critical_section::with(|_| {
            self.done.reset();
            start();
        });
    }

    /// Parks until the latch is set.
    pub(crate) fn wait(&self) {
        embassy_futures::block_on(self.done.wait());
    }
}

impl Default for DmaCompletion {
    fn default() -> Self {
        Self::new()
    }
}

/// A DMA engine able to clock a receive on the bus behind `T`.
pub trait DmaChannel<T> {
    /// Programs source/destination descriptors for a `len`-byte receive into
    /// `dst`, keeps MOSI high, and enables the requests. Must not block; the
    /// end of the transfer is reported through [`DmaCompletion::complete`].
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `len` byte writes until completion is
    /// signalled. [`DmaTransport`] guarantees this by waiting on the latch
    /// before returning the buffer to its caller.
    unsafe fn start_receive(&mut self, bus: &mut T, dst: *mut u8, len: usize);

    /// Returns the bus to polled mode after the transfer.
    fn finish(&mut self, _bus: &mut T) {}
}

/// Transport that routes bulk receives through a DMA channel and everything
/// else through the wrapped polled transport.
pub struct DmaTransport<'c, T, D> {
    bus: T,
    dma: D,
    completion: &'c DmaCompletion,
}

impl<'c, T: Transport, D: DmaChannel<T>> DmaTransport<'c, T, D> {
    pub fn new(bus: T, dma: D, completion: &'c DmaCompletion) -> Self {
        Self {
            bus,
            dma,
            completion,
        }
    }

    pub fn bus(&self) -> &T {
        &self.bus
    }

    pub fn dma(&self) -> &D {
        &self.dma
    }

    pub fn release(self) -> (T, D) {
        (self.bus, self.dma)
    }
}

impl<'c, T: Transport, D: DmaChannel<T>> Transport for DmaTransport<'c, T, D> {
    fn exchange(&mut self, out: u8) -> u8 {
        self.bus.exchange(out)
    }

    fn receive_bulk(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }

        let dst = buf.as_mut_ptr();
        let len = buf.len();
        let (bus, dma) = (&mut self.bus, &mut self.dma);
        // SAFETY: `buf` stays borrowed until the wait below has observed
        // the completion.
        self.completion.arm(|| unsafe { dma.start_receive(bus, dst, len) });
        self.completion.wait();
        self.dma.finish(&mut self.bus);
    }

    fn transmit_bulk(&mut self, buf: &[u8]) {
        self.bus.transmit_bulk(buf)
    }

    fn select(&mut self) {
        self.bus.select()
    }

    fn deselect(&mut self) {
        self.bus.deselect()
    }

    fn set_clock(&mut self, freq: HertzU32) {
        self.bus.set_clock(freq)
    }
}
