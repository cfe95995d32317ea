//! Simulated wires, pins, clock, and the SimNode wrapper.

use std::cell::{Cell, RefCell};
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use wiretree::debug::{DebugEmitter, DebugEvent};
use wiretree::traits::test_impls::{level_at, Waveform};
use wiretree::{
    Address, Clock, Direction, Error, Event, FastConfig, Handler, Level, LinkMetrics, Node,
    NodeConfig, NodeSetup, Payload, Pin, Pins, Random, Timestamp,
};

/// One direction of a wire: the levels its driver put on it, plus the
/// windows during which nothing got through.
#[derive(Debug, Default)]
pub struct Line {
    waveform: Waveform,
    outages: Vec<(Timestamp, Timestamp)>,
}

impl Line {
    /// Record a level driven at `at`. Repeats of the current level are skipped.
    pub fn drive(&mut self, at: Timestamp, level: Level) {
        if self.waveform.last().map(|&(_, last)| last) == Some(level) {
            return;
        }
        self.waveform.push((at, level));
    }

    /// Level seen by the listener at `at`. A broken line reads low.
    pub fn level_at(&self, at: Timestamp) -> Level {
        if self.is_broken_at(at) {
            return Level::Low;
        }
        level_at(&self.waveform, at)
    }

    pub fn is_broken_at(&self, at: Timestamp) -> bool {
        self.outages
            .iter()
            .any(|&(start, end)| start <= at && at < end)
    }

    /// Break the line from `at` until repaired.
    pub fn break_at(&mut self, at: Timestamp) {
        if !self.is_broken_at(at) {
            self.outages.push((at, Timestamp::MAX));
        }
    }

    /// Close every open outage that started at or before `at`.
    pub fn repair_at(&mut self, at: Timestamp) {
        for outage in &mut self.outages {
            if outage.0 <= at && outage.1 > at {
                outage.1 = at;
            }
        }
    }

    pub fn waveform(&self) -> &[(Timestamp, Level)] {
        &self.waveform
    }
}

pub type SharedLine = Rc<RefCell<Line>>;

/// Both directions of a wire between two pins.
///
/// `forward` is driven by the link's `a` end and heard by `b`; `backward`
/// the other way round.
///
/// The two directions never interfere. A real single wire is one shared bus
/// where both ends driving at once garble each other, so collisions between
/// simultaneous transmissions are not simulated.
#[derive(Debug, Clone, Default)]
pub struct Wire {
    pub forward: SharedLine,
    pub backward: SharedLine,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cut_at(&self, at: Timestamp) {
        self.forward.borrow_mut().break_at(at);
        self.backward.borrow_mut().break_at(at);
    }

    pub fn restore_at(&self, at: Timestamp) {
        self.forward.borrow_mut().repair_at(at);
        self.backward.borrow_mut().repair_at(at);
    }
}

/// Mock clock for simulation.
///
/// Clones share the same time; the node's pins advance it on every delay and
/// the simulator advances it between ticks.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    current: Rc<Cell<Timestamp>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Rc::new(Cell::new(time)),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: wiretree::Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
        if time > self.current.get() {
            self.current.set(time);
        }
        ready(())
    }
}

struct Port {
    direction: Direction,
    drive: SharedLine,
    sense: SharedLine,
}

/// Pins wired into the simulation.
///
/// Writes land on the pin's outgoing line while the pin is an output; reads
/// sample the incoming line at the node's current time. Unwired pins read low.
pub struct SimPins {
    clock: SimClock,
    ports: HashMap<Pin, Port>,
}

impl SimPins {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            ports: HashMap::new(),
        }
    }

    /// Wire `pin`: drive `drive`, listen on `sense`.
    pub fn attach(&mut self, pin: Pin, drive: SharedLine, sense: SharedLine) {
        self.ports.insert(
            pin,
            Port {
                direction: Direction::Input,
                drive,
                sense,
            },
        );
    }

    pub fn direction(&self, pin: Pin) -> Option<Direction> {
        self.ports.get(&pin).map(|port| port.direction)
    }

    pub fn is_wired(&self, pin: Pin) -> bool {
        self.ports.contains_key(&pin)
    }
}

impl Pins for SimPins {
    fn set_direction(&mut self, pin: Pin, direction: Direction) {
        if let Some(port) = self.ports.get_mut(&pin) {
            port.direction = direction;
        }
    }

    fn set_level(&mut self, pin: Pin, level: Level) {
        if let Some(port) = self.ports.get(&pin) {
            if port.direction == Direction::Output {
                port.drive.borrow_mut().drive(self.clock.now(), level);
            }
        }
    }

    fn read_level(&mut self, pin: Pin) -> Level {
        match self.ports.get(&pin) {
            Some(port) => port.sense.borrow().level_at(self.clock.now()),
            None => Level::Low,
        }
    }

    fn delay(&mut self, duration: wiretree::Duration) {
        self.clock.advance(duration);
    }
}

/// Mock random for simulation (deterministic LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let range = max - min;
        if range == 0 {
            return min;
        }
        min + ((self.state >> 33) % range)
    }
}

/// Application side of a simulated node: every callback, timestamped.
pub struct SimHandler {
    clock: SimClock,
    pub delivered: Vec<(Timestamp, Payload)>,
    pub errors: Vec<(Timestamp, Error)>,
    pub events: Vec<(Timestamp, Event)>,
}

impl SimHandler {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            delivered: Vec::new(),
            errors: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl Handler for SimHandler {
    fn on_data(&mut self, payload: &Payload) {
        self.delivered.push((self.clock.now(), *payload));
    }

    fn on_error(&mut self, error: &Error) {
        self.errors.push((self.clock.now(), error.clone()));
    }

    fn on_event(&mut self, event: &Event) {
        self.events.push((self.clock.now(), event.clone()));
    }
}

/// Collects debug events into a buffer shared with the [`SimNode`].
struct TraceCollector(Arc<Mutex<Vec<DebugEvent>>>);

impl DebugEmitter for TraceCollector {
    fn emit(&mut self, event: DebugEvent) {
        if let Ok(mut trace) = self.0.lock() {
            trace.push(event);
        }
    }
}

/// Timing used by every simulated node.
pub type SimConfig = FastConfig;

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimPins, SimClock, SimRandom, SimHandler, SimConfig>;

/// Wrapper around a wiretree Node for simulation.
pub struct SimNode {
    inner: SimNodeInner,
    clock: SimClock,
    powered: bool,
    trace: Arc<Mutex<Vec<DebugEvent>>>,
}

impl SimNode {
    /// Create a started node with its own clock at `start`. Pins are
    /// unwired until [`attach`](Self::attach) is called.
    pub fn new(setup: NodeSetup, seed: u64, start: Timestamp) -> Self {
        let clock = SimClock::at(start);
        let pins = SimPins::new(clock.clone());
        let handler = SimHandler::new(clock.clone());

        let mut inner: SimNodeInner =
            Node::new(setup, pins, clock.clone(), SimRandom::with_seed(seed), handler);

        let trace = Arc::new(Mutex::new(Vec::new()));
        inner.set_debug_emitter(Box::new(TraceCollector(trace.clone())));
        inner.start();

        Self {
            inner,
            clock,
            powered: true,
            trace,
        }
    }

    pub fn attach(&mut self, pin: Pin, drive: SharedLine, sense: SharedLine) {
        self.inner.pins_mut().attach(pin, drive, sense);
    }

    /// One polling cycle followed by the poll-interval sleep.
    pub fn tick(&mut self) {
        self.inner.tick();
        self.clock.advance(SimConfig::poll_interval());
    }

    /// Whether the scheduler should keep ticking this node.
    pub fn is_active(&self) -> bool {
        self.powered && self.inner.is_running()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Stop ticking. Lines keep whatever level the node last drove.
    pub fn power_off(&mut self) {
        self.powered = false;
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn address(&self) -> &Address {
        self.inner.address()
    }

    /// Queue an application send; applied on the next tick.
    pub fn send(&self, destination: &Address, payload: &[u8]) -> Result<(), Error> {
        self.inner.send(destination, payload)
    }

    pub fn delivered(&self) -> &[(Timestamp, Payload)] {
        &self.inner.handler().delivered
    }

    pub fn errors(&self) -> &[(Timestamp, Error)] {
        &self.inner.handler().errors
    }

    pub fn events(&self) -> &[(Timestamp, Event)] {
        &self.inner.handler().events
    }

    pub fn metrics(&self) -> &LinkMetrics {
        self.inner.metrics()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    /// Take all debug events emitted since the last call.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        match self.trace.lock() {
            Ok(mut trace) => std::mem::take(&mut *trace),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use wiretree::traits::test_impls::{decode_waveform, frame_waveform};
    use wiretree::{Duration, Frame};

    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn t(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn test_wire_directions_are_independent() {
        let wire = Wire::new();
        wire.forward.borrow_mut().drive(t(10), Level::High);
        wire.backward.borrow_mut().drive(t(10), Level::High);
        wire.backward.borrow_mut().drive(t(12), Level::Low);

        // Both ends transmit at once and each still hears the other cleanly.
        assert_eq!(wire.forward.borrow().level_at(t(13)), Level::High);
        assert_eq!(wire.backward.borrow().level_at(t(11)), Level::High);
        assert_eq!(wire.backward.borrow().level_at(t(13)), Level::Low);
    }

    #[test]
    fn test_line_levels_and_outages() {
        let mut line = Line::default();
        line.drive(t(10), Level::High);
        line.drive(t(15), Level::High);
        line.drive(t(20), Level::Low);
        assert_eq!(line.waveform().len(), 2);

        assert_eq!(line.level_at(t(5)), Level::Low);
        assert_eq!(line.level_at(t(12)), Level::High);
        assert_eq!(line.level_at(t(20)), Level::Low);

        line.break_at(t(11));
        assert_eq!(line.level_at(t(10)), Level::High);
        assert_eq!(line.level_at(t(12)), Level::Low);

        line.repair_at(t(14));
        assert_eq!(line.level_at(t(12)), Level::Low);
        assert_eq!(line.level_at(t(14)), Level::High);
        assert!(!line.is_broken_at(t(100)));
    }

    #[test]
    fn test_pins_only_drive_as_output() {
        let clock = SimClock::new();
        let mut pins = SimPins::new(clock.clone());
        let wire = Wire::new();
        pins.attach(1, wire.forward.clone(), wire.backward.clone());

        pins.set_level(1, Level::High);
        assert!(wire.forward.borrow().waveform().is_empty());

        pins.set_direction(1, Direction::Output);
        pins.set_level(1, Level::High);
        pins.delay(Duration::from_micros(50));
        pins.set_level(1, Level::Low);
        assert_eq!(
            wire.forward.borrow().waveform(),
            &[(t(0), Level::High), (t(50), Level::Low)]
        );
        assert_eq!(clock.now(), t(50));

        // Unwired pins are inert
        pins.set_level(9, Level::High);
        assert_eq!(pins.read_level(9), Level::Low);
        assert!(!pins.is_wired(9));
    }

    #[test]
    fn test_pins_read_the_far_end() {
        let clock = SimClock::new();
        let mut pins = SimPins::new(clock.clone());
        let wire = Wire::new();
        pins.attach(2, wire.forward.clone(), wire.backward.clone());

        wire.backward.borrow_mut().drive(t(100), Level::High);
        assert_eq!(pins.read_level(2), Level::Low);
        clock.set(t(100));
        assert_eq!(pins.read_level(2), Level::High);

        wire.cut_at(t(150));
        clock.set(t(160));
        assert_eq!(pins.read_level(2), Level::Low);
        wire.restore_at(t(170));
        clock.set(t(170));
        assert_eq!(pins.read_level(2), Level::High);
    }

    #[test]
    fn test_sim_random_deterministic() {
        let mut a = SimRandom::with_seed(7);
        let mut b = SimRandom::with_seed(7);
        let mut c = SimRandom::with_seed(8);
        let xs: Vec<u16> = (0..4).map(|_| a.gen_u16()).collect();
        let ys: Vec<u16> = (0..4).map(|_| b.gen_u16()).collect();
        let zs: Vec<u16> = (0..4).map(|_| c.gen_u16()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_simnode_creation() {
        let setup = NodeSetup::new(addr("1")).with_connection(addr("1,1"), 1);
        let node = SimNode::new(setup, 42, t(500));

        assert!(node.is_active());
        assert_eq!(node.now(), t(500));
        assert_eq!(node.address(), &addr("1"));
        assert_eq!(node.inner().routing_table().len(), 1);

        let events = node.take_debug_events();
        assert!(matches!(events[..], [DebugEvent::Started { ports: 1, .. }]));
        assert!(node.take_debug_events().is_empty());
    }

    #[test]
    fn test_simnode_tick_advances_clock() {
        let mut node = SimNode::new(NodeSetup::new(addr("1")), 1, Timestamp::ZERO);
        node.tick();
        assert_eq!(node.now(), Timestamp::ZERO + SimConfig::poll_interval());

        node.power_off();
        assert!(!node.is_active());
        assert!(!node.is_powered());
    }

    #[test]
    fn test_simnode_local_delivery() {
        let mut node = SimNode::new(NodeSetup::new(addr("1,2")), 1, t(1000));
        node.send(&addr("1,2"), b"ping").unwrap();
        node.tick();

        assert_eq!(node.delivered().len(), 1);
        assert_eq!(node.delivered()[0].0, t(1000));
        assert_eq!(&node.delivered()[0].1[..4], b"ping");
        assert_eq!(node.metrics().delivered, 1);
    }

    #[test]
    fn test_simnode_transmits_on_wire() {
        let setup = NodeSetup::new(addr("1")).with_connection(addr("1,1"), 1);
        let mut node = SimNode::new(setup, 3, Timestamp::ZERO);
        let wire = Wire::new();
        node.attach(1, wire.forward.clone(), wire.backward.clone());

        node.inner_mut()
            .submit(wiretree::Command::Discover { pin: 1 })
            .unwrap();
        node.tick();

        let sent = decode_waveform(wire.forward.borrow().waveform(), SimConfig::bit_delay());
        assert_eq!(sent, [Frame::AddressRequest]);

        // Same levels as the transport drives, minus repeated writes
        let reference =
            frame_waveform(&Frame::AddressRequest, Timestamp::ZERO, SimConfig::bit_delay());
        let line = wire.forward.borrow();
        for (at, level) in reference {
            assert_eq!(line.level_at(at), level);
        }
        assert_eq!(node.inner().pins().direction(1), Some(Direction::Input));
    }
}
