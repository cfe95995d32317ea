//! [`Pins`] over embedded-hal 1.0 digital pins.
//!
//! embedded-hal 1.0 has no trait for switching a pin between input and
//! output, so HALs provide it through [`FlexPin`]. Most HALs already have a
//! "flex" or open-drain pin type with those two methods.
//!
//! ```ignore
//! impl FlexPin for Flex<'static> {
//!     fn set_as_input(&mut self) { Flex::set_as_input(self, Pull::Down) }
//!     fn set_as_output(&mut self) { Flex::set_as_output(self) }
//! }
//!
//! let pins = HalPins::new(Delay).with_pin(25, Flex::new(p.PIN_25));
//! ```

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::time::Duration;
use crate::traits::Pins;
use crate::types::{Direction, Level, Pin};

/// A GPIO that can be switched between input and output at runtime.
pub trait FlexPin: InputPin + OutputPin {
    fn set_as_input(&mut self);
    fn set_as_output(&mut self);
}

/// Pin backend over a set of [`FlexPin`]s and a busy-wait delay.
///
/// GPIO errors are not recoverable mid-frame: failed writes are dropped and
/// failed reads return [`Level::Low`], which the checksum then rejects.
pub struct HalPins<IO, D> {
    pins: Vec<(Pin, IO)>,
    delay: D,
}

impl<IO: FlexPin, D: DelayNs> HalPins<IO, D> {
    pub fn new(delay: D) -> Self {
        Self {
            pins: Vec::new(),
            delay,
        }
    }

    pub fn with_pin(mut self, pin: Pin, io: IO) -> Self {
        self.insert(pin, io);
        self
    }

    /// Register `io` under `pin`, returning the pin it replaced.
    pub fn insert(&mut self, pin: Pin, io: IO) -> Option<IO> {
        match self.get_mut(pin) {
            Some(slot) => Some(core::mem::replace(slot, io)),
            None => {
                self.pins.push((pin, io));
                None
            }
        }
    }

    pub fn release(self) -> (Vec<(Pin, IO)>, D) {
        (self.pins, self.delay)
    }

    fn get_mut(&mut self, pin: Pin) -> Option<&mut IO> {
        self.pins
            .iter_mut()
            .find(|(id, _)| *id == pin)
            .map(|(_, io)| io)
    }
}

impl<IO: FlexPin, D: DelayNs> Pins for HalPins<IO, D> {
    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        if let Some(io) = self.get_mut(pin) {
            match direction {
                Direction::Input => io.set_as_input(),
                Direction::Output => io.set_as_output(),
            }
        }
    }

    fn set_level(&mut self, pin: Pin, level: Level) {
        if let Some(io) = self.get_mut(pin) {
            let _ = match level {
                Level::High => io.set_high(),
                Level::Low => io.set_low(),
            };
        }
    }

    fn read_level(&mut self, pin: Pin) -> Level {
        match self.get_mut(pin) {
            Some(io) => Level::from(io.is_high().unwrap_or(false)),
            None => Level::Low,
        }
    }

    fn delay(&mut self, duration: Duration) {
        let mut remaining = duration.as_micros();
        while remaining > 0 {
            let chunk = remaining.min(u32::MAX as u64);
            self.delay.delay_us(chunk as u32);
            remaining -= chunk;
        }
    }
}
