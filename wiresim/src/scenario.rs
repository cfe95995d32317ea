//! Scenario builder for setting up and running simulations.

use wiretree::{Address, Command, Duration, Error, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{NodeIndex, Topology};

/// Builder for simulation scenarios.
///
/// ```
/// use wiresim::{Duration, ScenarioBuilder, Timestamp};
///
/// let (mut sim, nodes) = ScenarioBuilder::chain(3)
///     .unwrap()
///     .send_at(Timestamp::from_millis(1), 0, "1,1,1".parse().unwrap(), b"ping")
///     .build();
/// sim.run_for(Duration::from_millis(300));
///
/// assert_eq!(nodes.len(), 3);
/// assert_eq!(sim.node(2).unwrap().delivered().len(), 1);
/// ```
pub struct ScenarioBuilder {
    topology: Topology,
    /// Seed for packet ids.
    seed: u64,
    actions: Vec<(Timestamp, ScenarioAction)>,
    snapshot_interval: Option<Duration>,
}

impl ScenarioBuilder {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            seed: 42,
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    /// Nodes `1`, `1,1`, `1,1,1`, ... each wired to the next.
    pub fn chain(len: usize) -> Result<Self, Error> {
        Ok(Self::new(Topology::chain(len)?))
    }

    /// Full tree under `1`; see [`Topology::tree`].
    pub fn tree(depth: usize, fanout: u16) -> Result<Self, Error> {
        Ok(Self::new(Topology::tree(depth, fanout)?))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn action_at(mut self, time: Timestamp, action: ScenarioAction) -> Self {
        self.actions.push((time, action));
        self
    }

    pub fn send_at(self, time: Timestamp, from: NodeIndex, to: Address, payload: &[u8]) -> Self {
        self.action_at(
            time,
            ScenarioAction::Send {
                from,
                to,
                payload: payload.to_vec(),
            },
        )
    }

    pub fn cut_link_at(self, time: Timestamp, a: NodeIndex, b: NodeIndex) -> Self {
        self.action_at(time, ScenarioAction::CutLink { a, b })
    }

    /// `to` stops hearing `from` at `time`.
    pub fn cut_line_at(self, time: Timestamp, from: NodeIndex, to: NodeIndex) -> Self {
        self.action_at(time, ScenarioAction::CutLine { from, to })
    }

    pub fn restore_link_at(self, time: Timestamp, a: NodeIndex, b: NodeIndex) -> Self {
        self.action_at(time, ScenarioAction::RestoreLink { a, b })
    }

    pub fn power_off_at(self, time: Timestamp, node: NodeIndex) -> Self {
        self.action_at(time, ScenarioAction::PowerOff { node })
    }

    pub fn command_at(self, time: Timestamp, node: NodeIndex, command: Command) -> Self {
        self.action_at(time, ScenarioAction::Command { node, command })
    }

    pub fn snapshot_at(self, time: Timestamp) -> Self {
        self.action_at(time, ScenarioAction::TakeSnapshot)
    }

    /// Build the simulator and schedule every action.
    ///
    /// Returns the node indices alongside, in topology order.
    pub fn build(mut self) -> (Simulator, Vec<NodeIndex>) {
        let nodes = (0..self.topology.len()).collect();
        let mut sim = Simulator::new(self.topology, self.seed);

        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        // Link faults apply as soon as they are scheduled, so a restore must
        // follow the cut it closes.
        self.actions.sort_by_key(|(time, _)| *time);
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        (sim, nodes)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::tree(1, 3).unwrap().with_seed(123).build();

        assert_eq!(nodes, [0, 1, 2, 3]);
        assert_eq!(sim.nodes().len(), 4);
        assert_eq!(sim.node(0).unwrap().inner().routing_table().len(), 3);
    }

    #[test]
    fn test_scenario_run_for() {
        let result = ScenarioBuilder::chain(2)
            .unwrap()
            .with_snapshot_interval(Duration::from_millis(1))
            .run_for(Duration::from_millis(3));

        assert_eq!(result.end_time, Timestamp::from_millis(3));
        assert!(!result.metrics.snapshots.is_empty());
    }

    #[test]
    fn test_restore_scheduled_before_cut_still_applies() {
        let (sim, _) = ScenarioBuilder::chain(2)
            .unwrap()
            .restore_link_at(Timestamp::from_millis(5), 0, 1)
            .cut_link_at(Timestamp::from_millis(2), 0, 1)
            .build();

        let wire = sim.wire(0).unwrap();
        assert!(wire.forward.borrow().is_broken_at(Timestamp::from_millis(3)));
        assert!(!wire.forward.borrow().is_broken_at(Timestamp::from_millis(5)));
    }

    #[test]
    fn test_command_action() {
        let result = ScenarioBuilder::chain(2)
            .unwrap()
            .command_at(Timestamp::from_micros(100), 0, Command::RemoveConnection { pin: 1 })
            .run_for(Duration::from_millis(1));

        assert_eq!(result.metrics.commands_submitted, 1);
        assert_eq!(result.node(0).map(|n| n.connections), Some(0));
        assert_eq!(result.node(1).map(|n| n.connections), Some(1));
    }

    #[test]
    fn test_chain_too_long() {
        assert!(ScenarioBuilder::chain(100).is_err());
    }
}
