//! Scenario actions and the priority queue that orders them.

use std::cmp::Ordering;

use wiretree::{Address, Command, Timestamp};

use crate::topology::NodeIndex;

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Things that happen to the network at a given instant.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Application on `from` sends a payload.
    Send {
        from: NodeIndex,
        to: Address,
        payload: Vec<u8>,
    },
    /// Break every wire between two nodes, both directions.
    CutLink { a: NodeIndex, b: NodeIndex },
    /// `to` stops hearing `from`; the other direction keeps working.
    CutLine { from: NodeIndex, to: NodeIndex },
    /// Repair every wire between two nodes.
    RestoreLink { a: NodeIndex, b: NodeIndex },
    /// The node stops ticking for the rest of the run.
    PowerOff { node: NodeIndex },
    /// Queue a command on a node, as its configuration UI would.
    Command { node: NodeIndex, command: Command },
    /// Record per-node metrics.
    TakeSnapshot,
}

impl ScenarioAction {
    /// Faults that are recorded on the wires instead of being queued.
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            ScenarioAction::CutLink { .. }
                | ScenarioAction::CutLine { .. }
                | ScenarioAction::RestoreLink { .. }
        )
    }
}

/// A scheduled action with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    /// Breaks ties between actions at the same instant, in scheduling order.
    pub seq: SequenceNumber,
    pub action: ScenarioAction,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, action: ScenarioAction) -> Self {
        Self { time, seq, action }
    }
}

// Reversed so that BinaryHeap (a max-heap) pops the earliest event first.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
