//! Node implementation - the polling worker that owns all protocol state.
//!
//! One call to [`Node::tick`] is one polling cycle:
//! 1. Apply queued [`Command`]s (the only way to change the table or address)
//! 2. Sample every port; a high line starts a frame receive
//! 3. Retransmit, fail over, or drop timed-out pending packets
//!
//! [`Node::run`] repeats `tick()` with a short sleep in between and returns
//! once a [`Command::Stop`] has been applied.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, _, DefaultConfig>::new(setup, pins, clock, random, handler);
//!
//! // Queue a send from another task via the command channel
//! node.send(&"1,2,4".parse()?, b"HELLO")?;
//!
//! node.run().await;
//! ```

#[cfg(feature = "debug")]
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;

use embassy_sync::channel::Channel;

use crate::config::{DefaultConfig, NodeConfig, NodeSetup};
#[cfg(feature = "debug")]
use crate::debug::{DebugEmitter, DebugEvent};
use crate::packet::Packet;
use crate::phy;
use crate::reliability::{PendingSet, RecentIds, RetryAction};
use crate::routing::RoutingTable;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Command, CommandChannel, Handler, Pins, Random};
use crate::types::{payload_from, Address, Connection, Direction, Error, Event, LinkMetrics, Pin};
use crate::wire::Frame;

/// A protocol node.
///
/// Generic over:
/// - `P`: Pin backend
/// - `Clk`: Clock implementation
/// - `R`: Random number generator (packet ids)
/// - `H`: Application callbacks
/// - `Cfg`: Compile-time timing and bounds (defaults to [`DefaultConfig`])
pub struct Node<P, Clk, R, H, Cfg = DefaultConfig> {
    // Dependencies (injected)
    pins: P,
    clock: Clk,
    random: R,
    handler: H,

    commands: CommandChannel,

    // Identity and neighbors
    address: Address,
    table: RoutingTable,
    ports: Vec<Pin>,

    // Reliability
    pending: PendingSet,
    recent: RecentIds,

    running: bool,
    metrics: LinkMetrics,

    #[cfg(feature = "debug")]
    debug_emitter: Option<Box<dyn DebugEmitter>>,

    _config: PhantomData<Cfg>,
}

impl<P, Clk, R, H, Cfg> Node<P, Clk, R, H, Cfg>
where
    P: Pins,
    Clk: Clock,
    R: Random,
    H: Handler,
    Cfg: NodeConfig,
{
    /// Create a stopped node. Duplicate connections in `setup` are skipped.
    pub fn new(setup: NodeSetup, pins: P, clock: Clk, random: R, handler: H) -> Self {
        let ports = setup.all_ports();
        let NodeSetup {
            address,
            connections,
            ..
        } = setup;

        Self {
            pins,
            clock,
            random,
            handler,

            commands: Channel::new(),

            address,
            table: RoutingTable::from_connections(connections),
            ports,

            pending: PendingSet::new(Cfg::MAX_PENDING),
            recent: RecentIds::new(Cfg::RECENT_IDS),

            running: false,
            metrics: LinkMetrics::default(),

            #[cfg(feature = "debug")]
            debug_emitter: None,

            _config: PhantomData,
        }
    }

    /// Put every port in input mode and enable ticking. No-op if running.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        for &pin in &self.ports {
            self.pins.set_direction(pin, Direction::Input);
        }
        self.running = true;
        emit_debug!(
            self,
            Started {
                timestamp: self.now(),
                ports: self.ports.len(),
            }
        );
    }

    /// Disable ticking and leave every port in input mode. No-op if stopped.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        for &pin in &self.ports {
            self.pins.set_direction(pin, Direction::Input);
        }
        emit_debug!(
            self,
            Stopped {
                timestamp: self.now(),
            }
        );
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One polling cycle. Does nothing while stopped.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        self.drain_commands();
        if !self.running {
            return;
        }

        // Ports only grow while ticking, so indexing stays valid.
        let mut i = 0;
        while i < self.ports.len() {
            let pin = self.ports[i];
            self.poll_port(pin);
            i += 1;
        }

        self.check_pending();
    }

    /// Start, then tick until a [`Command::Stop`] is applied.
    ///
    /// Sleeps [`NodeConfig::POLL_INTERVAL_US`] between cycles, waking early
    /// when a command arrives.
    pub async fn run(&mut self) {
        use embassy_futures::select::{select, Either};

        self.start();
        loop {
            self.tick();
            if !self.running {
                return;
            }

            let wake = self.clock.now() + Cfg::poll_interval();
            let woke = select(self.commands.receive(), self.clock.sleep_until(wake)).await;
            if let Either::First(command) = woke {
                self.apply_command(command);
            }
        }
    }

    /// Queue a payload for `destination`.
    ///
    /// The outcome is reported through the [`Handler`]. Fails with
    /// [`Error::PayloadTooLarge`] or, under backpressure, [`Error::QueueFull`].
    pub fn send(&self, destination: &Address, data: &[u8]) -> Result<(), Error> {
        let payload = payload_from(data)?;
        self.submit(Command::Send {
            destination: destination.clone(),
            payload,
        })
    }

    /// Queue any command for the worker.
    pub fn submit(&self, command: Command) -> Result<(), Error> {
        self.commands.try_send(command).map_err(|_| Error::QueueFull)
    }

    /// Command channel, for producers running alongside `run()`.
    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Pins being polled.
    pub fn ports(&self) -> &[Pin] {
        &self.ports
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    /// Packets awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Install the receiver for protocol trace events.
    #[cfg(feature = "debug")]
    pub fn set_debug_emitter(&mut self, emitter: Box<dyn DebugEmitter>) {
        self.debug_emitter = Some(emitter);
    }

    #[cfg(feature = "debug")]
    pub(crate) fn emit_debug(&mut self, event: DebugEvent) {
        if let Some(emitter) = self.debug_emitter.as_mut() {
            emitter.emit(event);
        }
    }

    // --- Commands ---

    fn drain_commands(&mut self) {
        while self.running {
            match self.commands.try_receive() {
                Ok(command) => self.apply_command(command),
                Err(_) => break,
            }
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Send {
                destination,
                payload,
            } => {
                let id = self.random.gen_u16();
                // A copy looping back to us is dropped as a duplicate.
                self.recent.insert(id);
                self.route_packet(Packet::new(destination, payload, id));
            }
            Command::AddConnection(connection) => {
                self.add_connection(connection);
            }
            Command::RemoveConnection { pin } => {
                if self.table.remove_pin(pin).is_some() {
                    emit_debug!(self, ConnectionRemoved { pin });
                    self.notify(Event::ConnectionRemoved { pin });
                }
            }
            Command::SetAddress(address) => {
                emit_debug!(
                    self,
                    AddressChanged {
                        address: address.clone(),
                    }
                );
                self.address = address.clone();
                self.notify(Event::AddressChanged(address));
            }
            Command::Connect { pin } => {
                self.ensure_port(pin);
                let request = Frame::ConnectRequest(self.address.clone());
                self.transmit(pin, &request);
            }
            Command::Discover { pin } => {
                self.ensure_port(pin);
                self.transmit(pin, &Frame::AddressRequest);
            }
            Command::Stop => self.stop(),
        }
    }

    // --- Receive path ---

    fn poll_port(&mut self, pin: Pin) {
        if !self.pins.read_level(pin).is_high() {
            return;
        }

        match phy::receive_frame(&mut self.pins, pin, Cfg::bit_delay()) {
            Ok(frame) => {
                self.metrics.frames_received += 1;
                emit_debug!(
                    self,
                    FrameReceived {
                        timestamp: self.now(),
                        pin,
                        kind: frame.kind(),
                    }
                );
                self.handle_frame(pin, frame);
            }
            Err(error) => {
                emit_debug!(
                    self,
                    DecodeFailed {
                        pin,
                        error: error.clone(),
                    }
                );
                if let Error::ChecksumMismatch { .. } = error {
                    self.metrics.checksum_failures += 1;
                    self.handler.on_error(&error);
                } else {
                    self.metrics.decode_failures += 1;
                }
            }
        }
    }

    fn handle_frame(&mut self, pin: Pin, frame: Frame) {
        match frame {
            Frame::Data(packet) => self.handle_data(pin, packet),
            Frame::Ack { id, checksum } => self.handle_ack(pin, id, checksum),
            Frame::ConnectRequest(address) => {
                let accepted = self.table.len() < Cfg::MAX_CONNECTIONS
                    && self.add_connection(Connection::new(address, pin));
                self.transmit(pin, &Frame::ConnectReply { accepted });
            }
            Frame::ConnectReply { accepted } => {
                self.notify(Event::ConnectReply { pin, accepted });
            }
            Frame::AddressRequest => {
                let reply = Frame::AddressReply(self.address.clone());
                self.transmit(pin, &reply);
            }
            Frame::AddressReply(address) => {
                self.add_connection(Connection::new(address, pin));
            }
        }
    }

    /// Acknowledge, then deliver or forward unless the id was seen recently.
    fn handle_data(&mut self, pin: Pin, packet: Packet) {
        let duplicate = self.recent.check_and_insert(packet.id());
        self.transmit(pin, &Frame::ack_for(&packet));

        if duplicate {
            emit_debug!(
                self,
                DuplicateDropped {
                    id: packet.id(),
                    pin,
                }
            );
            self.metrics.duplicates += 1;
            return;
        }

        self.route_packet(packet);
    }

    // --- Helpers shared with routing and reliability ---

    /// Send a frame on `pin`, blocking for its duration.
    pub(crate) fn transmit(&mut self, pin: Pin, frame: &Frame) {
        emit_debug!(
            self,
            FrameSent {
                timestamp: self.now(),
                pin,
                kind: frame.kind(),
            }
        );
        self.metrics.frames_sent += 1;
        phy::send_frame(&mut self.pins, pin, frame, Cfg::bit_delay());
    }

    pub(crate) fn notify(&mut self, event: Event) {
        self.handler.on_event(&event);
    }

    /// Add a neighbor unless its pin or address is taken; its pin is polled.
    fn add_connection(&mut self, connection: Connection) -> bool {
        if !self.table.add(connection.clone()) {
            return false;
        }
        self.ensure_port(connection.pin);
        emit_debug!(
            self,
            ConnectionAdded {
                address: connection.address.clone(),
                pin: connection.pin,
            }
        );
        self.notify(Event::ConnectionAdded(connection));
        true
    }

    fn ensure_port(&mut self, pin: Pin) {
        if !self.ports.contains(&pin) {
            self.ports.push(pin);
            self.pins.set_direction(pin, Direction::Input);
        }
    }

    pub(crate) fn scan_pending(
        &mut self,
        now: Timestamp,
        timeout: Duration,
        max_attempts: u8,
    ) -> Vec<RetryAction> {
        self.pending.scan(now, timeout, max_attempts, &mut self.table)
    }

    pub(crate) fn pending_mut(&mut self) -> &mut PendingSet {
        &mut self.pending
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut LinkMetrics {
        &mut self.metrics
    }

    pub(crate) fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}
