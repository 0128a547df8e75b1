use embedded_hal::digital::InputPin;

/// Physical card socket: presence and write-protect switches plus socket
/// power.
pub trait Socket {
    fn is_present(&mut self) -> bool;

    fn is_write_protected(&mut self) -> bool;

    fn power_on(&mut self) {}

    fn power_off(&mut self) {}
}

impl<S: Socket + ?Sized> Socket for &mut S {
    fn is_present(&mut self) -> bool {
        (**self).is_present()
    }

    fn is_write_protected(&mut self) -> bool {
        (**self).is_write_protected()
    }

    fn power_on(&mut self) {
        (**self).power_on()
    }

    fn power_off(&mut self) {
        (**self).power_off()
    }
}

/// Socket without detect or protect wiring and without a power switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSocket {
    present: bool,
    write_protected: bool,
}

impl FixedSocket {
    /// Card always present, never write protected.
    pub const fn new() -> Self {
        Self {
            present: true,
            write_protected: false,
        }
    }

    pub const fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    pub const fn write_protected(mut self, write_protected: bool) -> Self {
        self.write_protected = write_protected;
        self
    }
}

impl Default for FixedSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for FixedSocket {
    fn is_present(&mut self) -> bool {
        self.present
    }

    fn is_write_protected(&mut self) -> bool {
        self.write_protected
    }
}

/// Socket with card-detect and write-protect switches on GPIO inputs.
///
/// Detect is active-low (the switch grounds the pin with a card inserted),
/// write-protect reads high when the tab is set. A pin that fails to read
/// reports "absent" / "protected".
pub struct GpioSocket<CD, WP> {
    detect: CD,
    protect: WP,
}

impl<CD: InputPin, WP: InputPin> GpioSocket<CD, WP> {
    pub fn new(detect: CD, protect: WP) -> Self {
        Self { detect, protect }
    }

    pub fn release(self) -> (CD, WP) {
        (self.detect, self.protect)
    }
}

impl<CD: InputPin, WP: InputPin> Socket for GpioSocket<CD, WP> {
    fn is_present(&mut self) -> bool {
        self.detect.is_low().unwrap_or(false)
    }

    fn is_write_protected(&mut self) -> bool {
        self.protect.is_high().unwrap_or(true)
    }
}
