//! Bit-banged physical transport over a single digital pin.
//!
//! ## Waveform
//!
//! ```text
//! | start | kind | b7 b6 .. b0 | b7 .. b0 | ... | idle
//!   HIGH    H=data  byte 0       byte 1
//!           L=control
//! ```
//!
//! Each cell lasts one bit delay. Bytes go most-significant bit first and the
//! line is pulled low after every byte. The receiver is triggered by the
//! start cell and waits 1.4 bit delays before its first sample, which puts
//! every sample in the middle of a cell as long as the start was detected
//! within the first 0.6 of its cell.

use crate::time::Duration;
use crate::traits::Pins;
use crate::types::{Direction, Error, Level, Pin};
use crate::wire::{ByteSource, DecodeError, Encode, Frame, FrameKind};

/// Delay from detecting the start cell to sampling the kind cell.
pub fn sample_offset(bit_delay: Duration) -> Duration {
    bit_delay.mul_ratio(14, 10)
}

fn send_byte<P: Pins>(pins: &mut P, pin: Pin, byte: u8, bit_delay: Duration) {
    for i in (0..8).rev() {
        pins.set_level(pin, Level::from((byte >> i) & 1 == 1));
        pins.delay(bit_delay);
    }
    pins.set_level(pin, Level::Low);
}

/// Transmit a frame, then return the pin to input.
pub fn send_frame<P: Pins>(pins: &mut P, pin: Pin, frame: &Frame, bit_delay: Duration) {
    send_raw(pins, pin, frame.kind(), &frame.encode_to_vec(), bit_delay);
}

/// Transmit an arbitrary body behind a start and kind cell.
pub fn send_raw<P: Pins>(pins: &mut P, pin: Pin, kind: FrameKind, body: &[u8], bit_delay: Duration) {
    pins.set_direction(pin, Direction::Output);
    pins.set_level(pin, Level::High);
    pins.delay(bit_delay);
    pins.set_level(pin, kind.level());
    pins.delay(bit_delay);

    for &byte in body {
        send_byte(pins, pin, byte, bit_delay);
    }

    pins.set_level(pin, Level::Low);
    pins.set_direction(pin, Direction::Input);
}

/// Samples bytes off a pin, one bit delay per bit.
pub struct PinReader<'a, P> {
    pins: &'a mut P,
    pin: Pin,
    bit_delay: Duration,
}

impl<'a, P: Pins> PinReader<'a, P> {
    pub fn new(pins: &'a mut P, pin: Pin, bit_delay: Duration) -> Self {
        Self {
            pins,
            pin,
            bit_delay,
        }
    }
}

impl<P: Pins> ByteSource for PinReader<'_, P> {
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let mut value = 0u8;
        for i in (0..8).rev() {
            if self.pins.read_level(self.pin).is_high() {
                value |= 1 << i;
            }
            self.pins.delay(self.bit_delay);
        }
        Ok(value)
    }
}

/// Receive one frame. Call right after the start cell was seen on `pin`.
///
/// Returns once the whole body has been sampled or decoding failed.
pub fn receive_frame<P: Pins>(pins: &mut P, pin: Pin, bit_delay: Duration) -> Result<Frame, Error> {
    pins.delay(sample_offset(bit_delay));
    let kind = FrameKind::from_level(pins.read_level(pin));
    pins.delay(bit_delay);

    let mut reader = PinReader::new(pins, pin, bit_delay);
    Frame::decode(kind, &mut reader)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::packet::Packet;
    use crate::time::Timestamp;
    use crate::traits::test_impls::{frame_waveform, level_at, MockClock, MockPins};
    use crate::types::Address;

    const D: Duration = Duration::from_micros(2000);

    #[test]
    fn test_byte_is_msb_first() {
        let clock = MockClock::new();
        let mut pins = MockPins::new(clock.clone());
        pins.set_direction(3, Direction::Output);

        send_byte(&mut pins, 3, 0b1010_0001, D);

        let levels: Vec<Level> = (0..8)
            .map(|i| level_at(pins.output(3), Timestamp::from_micros(i * 2000 + 1000)))
            .collect();
        assert_eq!(
            levels,
            [
                Level::High,
                Level::Low,
                Level::High,
                Level::Low,
                Level::Low,
                Level::Low,
                Level::Low,
                Level::High
            ]
        );
        assert_eq!(clock.now_micros(), 8 * 2000);
        // Released after the byte.
        assert_eq!(pins.output(3).last(), Some(&(Timestamp::from_micros(16000), Level::Low)));
    }

    #[test]
    fn test_frame_leaves_pin_in_input() {
        let clock = MockClock::new();
        let mut pins = MockPins::new(clock.clone());

        send_frame(&mut pins, 7, &Frame::AddressRequest, D);

        assert_eq!(pins.direction(7), Some(Direction::Input));
        // start + kind + one opcode byte
        assert_eq!(clock.now_micros(), (2 + 8) * 2000);
    }

    #[test]
    fn test_start_and_kind_cells() {
        let data = Frame::Data(Packet::with_data(Address::root(), b"x", 1).unwrap());
        let wave = frame_waveform(&data, Timestamp::ZERO, D);
        assert_eq!(level_at(&wave, Timestamp::from_micros(1000)), Level::High);
        assert_eq!(level_at(&wave, Timestamp::from_micros(3000)), Level::High);

        let control = frame_waveform(&Frame::AddressRequest, Timestamp::ZERO, D);
        assert_eq!(level_at(&control, Timestamp::from_micros(1000)), Level::High);
        assert_eq!(level_at(&control, Timestamp::from_micros(3000)), Level::Low);
    }

    #[test]
    fn test_receive_scripted_frame() {
        let packet = Packet::with_data(Address::from_slice(&[1, 2, 3]).unwrap(), b"HELLO", 77).unwrap();
        let frame = Frame::Data(packet);

        let clock = MockClock::new();
        let mut pins = MockPins::new(clock.clone());
        pins.script_frame(2, Timestamp::from_micros(500), &frame, D);

        // Poll until the start cell shows up, as the node does.
        while pins.read_level(2) == Level::Low {
            pins.delay(Duration::from_micros(100));
        }
        assert_eq!(receive_frame(&mut pins, 2, D), Ok(frame));
    }

    #[test]
    fn test_late_detection_within_tolerance() {
        let frame = Frame::Ack {
            id: 0xA5A5,
            checksum: 0x5A5A,
        };
        let clock = MockClock::new();
        let mut pins = MockPins::new(clock.clone());
        pins.script_frame(1, Timestamp::ZERO, &frame, D);

        // Detected half a cell late.
        clock.set(Timestamp::from_micros(1000));
        assert!(pins.read_level(1).is_high());
        assert_eq!(receive_frame(&mut pins, 1, D), Ok(frame));
    }

    #[test]
    fn test_idle_line_reads_as_control_garbage() {
        // A spurious trigger on an idle line decodes as opcode 0.
        let clock = MockClock::new();
        let mut pins = MockPins::new(clock);
        assert_eq!(
            receive_frame(&mut pins, 9, D),
            Err(Error::Decode(DecodeError::InvalidOpcode))
        );
    }

    #[test]
    fn test_sample_offset() {
        assert_eq!(sample_offset(D), Duration::from_micros(2800));
    }
}
