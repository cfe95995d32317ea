//! Metrics collection for simulation analysis.

use wiretree::{LinkMetrics, Timestamp};

use crate::topology::NodeIndex;

/// Add every counter of `other` into `total`.
pub fn accumulate(total: &mut LinkMetrics, other: &LinkMetrics) {
    total.frames_sent += other.frames_sent;
    total.frames_received += other.frames_received;
    total.decode_failures += other.decode_failures;
    total.checksum_failures += other.checksum_failures;
    total.duplicates += other.duplicates;
    total.acks_received += other.acks_received;
    total.retransmissions += other.retransmissions;
    total.failovers += other.failovers;
    total.packets_dropped += other.packets_dropped;
    total.delivered += other.delivered;
    total.forwarded += other.forwarded;
    total.unreachable += other.unreachable;
}

/// State of one node when a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub metrics: LinkMetrics,
    /// Packets still waiting for an acknowledgment.
    pub pending: usize,
    pub connections: usize,
    pub powered: bool,
}

/// Per-node state at a point in time.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    pub time: Timestamp,
    /// Indexed by node.
    pub nodes: Vec<NodeSnapshot>,
}

impl NetworkSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: Vec::new(),
        }
    }

    pub fn record_node(&mut self, node: NodeSnapshot) {
        self.nodes.push(node);
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeSnapshot> {
        self.nodes.get(index)
    }

    /// Counters summed over every node.
    pub fn total(&self) -> LinkMetrics {
        let mut total = LinkMetrics::default();
        for node in &self.nodes {
            accumulate(&mut total, &node.metrics);
        }
        total
    }

    pub fn total_pending(&self) -> usize {
        self.nodes.iter().map(|node| node.pending).sum()
    }

    /// True once every sent packet was acknowledged or given up on.
    pub fn is_quiescent(&self) -> bool {
        self.total_pending() == 0
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Application sends accepted into a node's command queue.
    pub sends_submitted: u64,
    /// Application sends refused at submission (bad payload, full queue).
    pub sends_rejected: u64,
    pub commands_submitted: u64,
    pub link_faults: u64,
    pub nodes_powered_off: u64,
    /// Polling cycles run across all nodes.
    pub ticks: u64,
    pub snapshots: Vec<NetworkSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: NetworkSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&NetworkSnapshot> {
        self.snapshots.last()
    }

    /// First snapshot at or after `time`.
    pub fn snapshot_at(&self, time: Timestamp) -> Option<&NetworkSnapshot> {
        self.snapshots.iter().find(|s| s.time >= time)
    }

    /// First snapshot time with nothing left pending.
    pub fn quiescent_since(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.is_quiescent())
            .map(|s| s.time)
    }
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether every scheduled action was executed.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Counters summed over every node at the end of the run.
    pub fn totals(&self) -> LinkMetrics {
        self.metrics
            .latest_snapshot()
            .map(NetworkSnapshot::total)
            .unwrap_or_default()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeSnapshot> {
        self.metrics.latest_snapshot()?.node(index)
    }

    pub fn is_quiescent(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(NetworkSnapshot::is_quiescent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(delivered: u32, pending: usize) -> NodeSnapshot {
        NodeSnapshot {
            metrics: LinkMetrics {
                delivered,
                frames_sent: 2,
                ..LinkMetrics::default()
            },
            pending,
            connections: 1,
            powered: true,
        }
    }

    #[test]
    fn test_snapshot_totals() {
        let mut snapshot = NetworkSnapshot::new(Timestamp::from_millis(5));
        snapshot.record_node(node(1, 0));
        snapshot.record_node(node(2, 3));

        let total = snapshot.total();
        assert_eq!(total.delivered, 3);
        assert_eq!(total.frames_sent, 4);
        assert_eq!(snapshot.total_pending(), 3);
        assert!(!snapshot.is_quiescent());
        assert_eq!(snapshot.node(1).map(|n| n.pending), Some(3));
    }

    #[test]
    fn test_quiescent_since() {
        let mut metrics = SimMetrics::new();
        for (ms, pending) in [(10, 1), (20, 0), (30, 0)] {
            let mut snapshot = NetworkSnapshot::new(Timestamp::from_millis(ms));
            snapshot.record_node(node(0, pending));
            metrics.add_snapshot(snapshot);
        }

        assert_eq!(metrics.quiescent_since(), Some(Timestamp::from_millis(20)));
        assert_eq!(
            metrics.snapshot_at(Timestamp::from_millis(15)).map(|s| s.time),
            Some(Timestamp::from_millis(20))
        );
        assert_eq!(metrics.latest_snapshot().map(|s| s.time), Some(Timestamp::from_millis(30)));
    }

    #[test]
    fn test_empty_result() {
        let result = SimulationResult {
            end_time: Timestamp::ZERO,
            metrics: SimMetrics::new(),
            queue_exhausted: true,
        };
        assert_eq!(result.totals(), LinkMetrics::default());
        assert!(!result.is_quiescent());
        assert!(result.node(0).is_none());
    }
}
