//! Discrete event simulator for wiretree networks.

use std::collections::BinaryHeap;

use wiretree::{Address, Duration, Timestamp};

use crate::event::{ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{NetworkSnapshot, NodeSnapshot, SimMetrics, SimulationResult};
use crate::node::{SimNode, Wire};
use crate::topology::{NodeIndex, Topology};

/// Discrete event simulator for wiretree networks.
///
/// Every node keeps its own clock. The simulator always ticks the node that
/// is furthest behind, so by the time a node samples a line at time `t`,
/// every peer has already recorded whatever it started driving before `t`.
/// A frame is written in one tick, so a receiver that catches the start cell
/// finds the whole frame on the line.
pub struct Simulator {
    nodes: Vec<SimNode>,
    topology: Topology,
    /// Indexed like `topology.links()`.
    wires: Vec<Wire>,
    /// Lowest clock among running nodes.
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Build one started node per topology entry and wire their pins.
    ///
    /// `seed` feeds every node's packet-id generator.
    pub fn new(topology: Topology, seed: u64) -> Self {
        let mut nodes = Vec::with_capacity(topology.len());
        for index in 0..topology.len() {
            if let Some(setup) = topology.setup(index) {
                let node_seed = seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                nodes.push(SimNode::new(setup, node_seed, Timestamp::ZERO));
            }
        }

        let mut wires = Vec::with_capacity(topology.links().len());
        for link in topology.links() {
            let wire = Wire::new();
            if let Some(node) = nodes.get_mut(link.a.node) {
                node.attach(link.a.pin, wire.forward.clone(), wire.backward.clone());
            }
            if let Some(node) = nodes.get_mut(link.b.node) {
                node.attach(link.b.pin, wire.backward.clone(), wire.forward.clone());
            }
            wires.push(wire);
        }

        Self {
            nodes,
            topology,
            wires,
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    /// Record every node's metrics at this interval.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    pub fn node(&self, index: NodeIndex) -> Option<&SimNode> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut SimNode> {
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Node with the given address.
    pub fn find(&self, address: &Address) -> Option<&SimNode> {
        self.node(self.topology.find(address)?)
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Wire for the link at `index` in `topology().links()`.
    pub fn wire(&self, index: usize) -> Option<&Wire> {
        self.wires.get(index)
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an action at `time`.
    ///
    /// Link faults are written onto the wires right away as time windows, so
    /// they take effect at exactly `time` even inside another node's frame.
    /// Schedule them before the run passes `time`.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        if action.is_link_fault() {
            self.apply_link_fault(time, &action);
            return;
        }
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, action));
    }

    /// Schedule an application send.
    pub fn schedule_send(
        &mut self,
        time: Timestamp,
        from: NodeIndex,
        to: Address,
        payload: &[u8],
    ) {
        self.schedule_action(
            time,
            ScenarioAction::Send {
                from,
                to,
                payload: payload.to_vec(),
            },
        );
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(index) = self.next_node() {
            let Some(frontier) = self.node(index).map(SimNode::now) else {
                break;
            };
            if frontier >= end_time {
                break;
            }

            self.advance_time(frontier);
            self.process_events_until(frontier);
            self.maybe_take_snapshot();

            // An action may just have powered the node off
            if let Some(node) = self.nodes.get_mut(index) {
                if node.is_active() {
                    node.tick();
                    self.metrics.ticks += 1;
                }
            }
        }

        self.process_events_until(end_time);
        self.advance_time(end_time);
        self.maybe_take_snapshot();

        // Final snapshot
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Record every node's metrics at the current time.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = NetworkSnapshot::new(self.current_time);
        for node in &self.nodes {
            snapshot.record_node(NodeSnapshot {
                metrics: node.metrics().clone(),
                pending: node.pending_count(),
                connections: node.inner().routing_table().len(),
                powered: node.is_powered(),
            });
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Running node with the earliest clock; lowest index on ties.
    fn next_node(&self) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_active())
            .min_by_key(|(index, node)| (node.now(), *index))
            .map(|(index, _)| index)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_events_until(&mut self, time: Timestamp) {
        while self.event_queue.peek().is_some_and(|event| event.time <= time) {
            if let Some(event) = self.event_queue.pop() {
                self.execute_action(event.time, event.action);
            }
        }
    }

    fn execute_action(&mut self, time: Timestamp, action: ScenarioAction) {
        match action {
            ScenarioAction::Send { from, to, payload } => {
                let accepted = self
                    .nodes
                    .get(from)
                    .filter(|node| node.is_active())
                    .is_some_and(|node| node.send(&to, &payload).is_ok());
                if accepted {
                    self.metrics.sends_submitted += 1;
                } else {
                    self.metrics.sends_rejected += 1;
                }
            }
            ScenarioAction::PowerOff { node } => {
                if let Some(node) = self.nodes.get_mut(node) {
                    if node.is_powered() {
                        node.power_off();
                        self.metrics.nodes_powered_off += 1;
                    }
                }
            }
            ScenarioAction::Command { node, command } => {
                if let Some(node) = self.nodes.get(node) {
                    if node.inner().submit(command).is_ok() {
                        self.metrics.commands_submitted += 1;
                    }
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
            fault => self.apply_link_fault(time, &fault),
        }
    }

    fn apply_link_fault(&mut self, time: Timestamp, action: &ScenarioAction) {
        match *action {
            ScenarioAction::CutLink { a, b } => {
                for index in self.topology.links_between(a, b) {
                    self.wires[index].cut_at(time);
                }
            }
            ScenarioAction::CutLine { from, to } => {
                for index in self.topology.links_between(from, to) {
                    let wire = &self.wires[index];
                    let line = if self.topology.links()[index].a.node == from {
                        &wire.forward
                    } else {
                        &wire.backward
                    };
                    line.borrow_mut().break_at(time);
                }
            }
            ScenarioAction::RestoreLink { a, b } => {
                for index in self.topology.links_between(a, b) {
                    self.wires[index].restore_at(time);
                }
            }
            _ => return,
        }
        self.metrics.link_faults += 1;
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }
}
