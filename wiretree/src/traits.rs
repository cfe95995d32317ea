//! Core traits for pin, time, randomness, and application abstraction.
//!
//! These traits allow the protocol to be used with different:
//! - Pin backends (MCU GPIO via embedded-hal, simulated wires, test mocks)
//! - Time sources (real hardware time, simulated time)
//! - Random number generators
//! - Application callbacks

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::{Duration, Timestamp};
use crate::types::{Address, Connection, Direction, Error, Event, Level, Payload, Pin};

/// Queue size for the command channel.
pub(crate) const COMMAND_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Requests applied by the node's worker at the start of each tick.
///
/// All routing-table and address changes go through here so that only the
/// worker ever mutates node state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Route a payload from this node.
    Send {
        destination: Address,
        payload: Payload,
    },
    /// Add a neighbor and start polling its pin.
    AddConnection(Connection),
    /// Drop the neighbor on a pin. The pin stays polled.
    RemoveConnection { pin: Pin },
    SetAddress(Address),
    /// Send `CONNECT_REQUEST` on a pin.
    Connect { pin: Pin },
    /// Send `ADDRESS_REQUEST` on a pin.
    Discover { pin: Pin },
    /// Stop the node; `run()` returns afterwards.
    Stop,
}

/// Command channel type.
pub type CommandChannel = Channel<ChannelMutex, Command, COMMAND_QUEUE_SIZE>;

/// Digital pin capability used by the bit-level transport.
///
/// Lines are half-duplex: the transport switches a pin to output only for
/// the duration of a send.
///
/// # Example (testing with MockPins)
///
/// ```
/// use wiretree::traits::test_impls::{MockClock, MockPins};
/// use wiretree::{Direction, Duration, Level, Pins, Timestamp};
///
/// let clock = MockClock::new();
/// let mut pins = MockPins::new(clock.clone());
///
/// pins.set_direction(4, Direction::Output);
/// pins.set_level(4, Level::High);
/// pins.delay(Duration::from_micros(2000));
/// pins.set_level(4, Level::Low);
///
/// // Delays advance the shared clock
/// assert_eq!(clock.now_micros(), 2000);
/// assert_eq!(
///     pins.output(4),
///     &[
///         (Timestamp::ZERO, Level::High),
///         (Timestamp::from_micros(2000), Level::Low),
///     ]
/// );
/// ```
pub trait Pins {
    /// Switch a pin between input and output.
    fn set_direction(&mut self, pin: Pin, direction: Direction);

    /// Drive an output pin.
    fn set_level(&mut self, pin: Pin, level: Level);

    /// Sample an input pin.
    fn read_level(&mut self, pin: Pin) -> Level;

    /// Busy-wait for the given duration.
    fn delay(&mut self, duration: Duration);
}

/// Time source trait for real or simulated time.
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_micros(embassy_time::Instant::now().as_micros())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_micros(time.as_micros()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    ///
    /// `run()` uses this to yield between polling cycles.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait.
///
/// Used for packet ids.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u16.
    fn gen_u16(&mut self) -> u16 {
        self.gen_range(0, u16::MAX as u64 + 1) as u16
    }
}

/// Application callbacks, registered once at construction.
pub trait Handler {
    /// A packet addressed to this node arrived (or was sent to self).
    fn on_data(&mut self, payload: &Payload);

    /// Checksum failure, unreachable destination, or neighbor exhaustion.
    fn on_error(&mut self, error: &Error);

    /// Connection-table and neighbor protocol notifications.
    fn on_event(&mut self, event: &Event) {
        let _ = event;
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use hashbrown::HashMap;

    use super::*;
    use crate::phy;
    use crate::wire::{Frame, FrameKind};

    /// Level changes on a line, in time order.
    pub type Waveform = Vec<(Timestamp, Level)>;

    /// Level of a waveform at `at`. Idle lines are low.
    ///
    /// With several transitions at the same instant the last one wins.
    pub fn level_at(waveform: &[(Timestamp, Level)], at: Timestamp) -> Level {
        let after = waveform.partition_point(|(time, _)| *time <= at);
        if after == 0 {
            Level::Low
        } else {
            waveform[after - 1].1
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    ///
    /// Clones share the same time, so a clock handed to a node can still be
    /// advanced by the test and by [`MockPins`] delays.
    #[derive(Clone, Default)]
    pub struct MockClock {
        current: Rc<Cell<Timestamp>>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Rc::new(Cell::new(time)),
            }
        }

        /// Advance time to the given timestamp.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }

        pub fn now_micros(&self) -> u64 {
            self.current.get().as_micros()
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        /// Completes immediately, jumping time forward to `time`.
        fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
            if time > self.current.get() {
                self.current.set(time);
            }
            ready(())
        }
    }

    /// Mock pins that record driven waveforms and replay scripted inputs.
    pub struct MockPins {
        clock: MockClock,
        directions: HashMap<Pin, Direction>,
        output: HashMap<Pin, Waveform>,
        input: HashMap<Pin, Waveform>,
    }

    impl MockPins {
        /// Create pins whose delays advance `clock`.
        pub fn new(clock: MockClock) -> Self {
            Self {
                clock,
                directions: HashMap::new(),
                output: HashMap::new(),
                input: HashMap::new(),
            }
        }

        pub fn clock(&self) -> &MockClock {
            &self.clock
        }

        pub fn direction(&self, pin: Pin) -> Option<Direction> {
            self.directions.get(&pin).copied()
        }

        /// Everything driven on `pin` so far.
        pub fn output(&self, pin: Pin) -> &[(Timestamp, Level)] {
            self.output.get(&pin).map(Vec::as_slice).unwrap_or(&[])
        }

        pub fn take_output(&mut self, pin: Pin) -> Waveform {
            self.output.remove(&pin).unwrap_or_default()
        }

        /// Schedule level changes seen when reading `pin`.
        pub fn script_input(&mut self, pin: Pin, waveform: impl IntoIterator<Item = (Timestamp, Level)>) {
            let line = self.input.entry(pin).or_default();
            line.extend(waveform);
            line.sort_by_key(|(time, _)| *time);
        }

        /// Schedule a neighbor transmitting `frame` on `pin`, starting at `at`.
        pub fn script_frame(&mut self, pin: Pin, at: Timestamp, frame: &Frame, bit_delay: Duration) {
            let waveform = frame_waveform(frame, at, bit_delay);
            self.script_input(pin, waveform);
        }

        /// Schedule a neighbor transmitting raw bytes on `pin`, starting at `at`.
        pub fn script_raw(
            &mut self,
            pin: Pin,
            at: Timestamp,
            kind: FrameKind,
            body: &[u8],
            bit_delay: Duration,
        ) {
            let waveform = raw_waveform(kind, body, at, bit_delay);
            self.script_input(pin, waveform);
        }

        /// Decode every frame driven on `pin` so far.
        pub fn sent_frames(&self, pin: Pin, bit_delay: Duration) -> Vec<Frame> {
            decode_waveform(self.output(pin), bit_delay)
        }
    }

    impl Pins for MockPins {
        fn set_direction(&mut self, pin: Pin, direction: Direction) {
            self.directions.insert(pin, direction);
        }

        fn set_level(&mut self, pin: Pin, level: Level) {
            if self.direction(pin) == Some(Direction::Output) {
                let now = self.clock.now();
                self.output.entry(pin).or_default().push((now, level));
            }
        }

        fn read_level(&mut self, pin: Pin) -> Level {
            match self.input.get(&pin) {
                Some(line) => level_at(line, self.clock.now()),
                None => Level::Low,
            }
        }

        fn delay(&mut self, duration: Duration) {
            self.clock.advance(duration);
        }
    }

    /// Waveform of `frame` as the transport would drive it from `at`.
    pub fn frame_waveform(frame: &Frame, at: Timestamp, bit_delay: Duration) -> Waveform {
        const PIN: Pin = 0;
        let mut pins = MockPins::new(MockClock::at(at));
        phy::send_frame(&mut pins, PIN, frame, bit_delay);
        pins.take_output(PIN)
    }

    /// Waveform of an arbitrary body, which need not decode.
    pub fn raw_waveform(kind: FrameKind, body: &[u8], at: Timestamp, bit_delay: Duration) -> Waveform {
        const PIN: Pin = 0;
        let mut pins = MockPins::new(MockClock::at(at));
        phy::send_raw(&mut pins, PIN, kind, body, bit_delay);
        pins.take_output(PIN)
    }

    /// Decode all frames in a recorded waveform, skipping undecodable ones.
    pub fn decode_waveform(waveform: &[(Timestamp, Level)], bit_delay: Duration) -> Vec<Frame> {
        const PIN: Pin = 0;
        let mut frames = Vec::new();
        let mut rx = MockPins::new(MockClock::new());
        rx.script_input(PIN, waveform.iter().copied());

        loop {
            // Next start cell: a rising edge after the current time.
            let now = rx.clock.now();
            let start = waveform.iter().enumerate().find(|(i, (time, level))| {
                *time >= now
                    && level.is_high()
                    && level_at(&waveform[..*i], *time) == Level::Low
            });
            let Some((_, (start, _))) = start else {
                break;
            };
            rx.clock.set(*start);
            if let Ok(frame) = phy::receive_frame(&mut rx, PIN, bit_delay) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max - min;
            if range == 0 {
                return min;
            }
            min + ((self.state >> 33) % range)
        }
    }

    /// Handler that records every callback.
    #[derive(Default, Debug)]
    pub struct RecordingHandler {
        pub data: Vec<Payload>,
        pub errors: Vec<Error>,
        pub events: Vec<Event>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Handler for RecordingHandler {
        fn on_data(&mut self, payload: &Payload) {
            self.data.push(*payload);
        }

        fn on_error(&mut self, error: &Error) {
            self.errors.push(error.clone());
        }

        fn on_event(&mut self, event: &Event) {
            self.events.push(event.clone());
        }
    }
}
