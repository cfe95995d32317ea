//! wiresim - Discrete event simulator for wiretree networks.
//!
//! Runs whole networks of wiretree nodes in one process, with every GPIO
//! line replaced by a recorded waveform and every node on its own virtual
//! clock. No real-time delays; runs are deterministic for a given seed.
//!
//! # Features
//!
//! - **Simulated wires**: each direction of a link is a waveform the far end
//!   samples at its own time, so the real bit-level transport runs unchanged
//! - **Topology builder**: chains and trees of hierarchical addresses, or
//!   hand-wired links with explicit pins
//! - **Scenario actions**: application sends, configuration commands, cut or
//!   one-way broken links, powered-off nodes
//! - **Metrics collection**: per-node link counters and pending packets,
//!   sampled into snapshots
//! - **Protocol traces**: every node's `DebugEvent`s, ready to inspect
//!
//! # Example
//!
//! ```
//! use wiresim::{Duration, ScenarioBuilder, Timestamp};
//!
//! // 1 -- 1,1 -- 1,1,1 with the middle node dead from the start
//! let result = ScenarioBuilder::chain(3)
//!     .unwrap()
//!     .power_off_at(Timestamp::ZERO, 1)
//!     .send_at(Timestamp::from_millis(1), 0, "1,1,1".parse().unwrap(), b"hello")
//!     .run_for(Duration::from_secs(1));
//!
//! // The sender gave up after its retries and dropped the packet
//! assert_eq!(result.node(0).unwrap().metrics.packets_dropped, 1);
//! ```
//!
//! # Architecture
//!
//! The simulator repeatedly picks the running node with the earliest clock:
//! 1. Execute scheduled actions due by that time
//! 2. Call the node's `tick()` (one polling cycle, which may send or
//!    receive whole frames and advance the node's clock while doing so)
//! 3. Advance the node's clock by the poll interval
//!
//! Nodes are driven through `tick()` directly instead of the async `run()`
//! loop, which only adds the sleep between ticks.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{ScenarioAction, ScheduledEvent};
pub use metrics::{NetworkSnapshot, NodeSnapshot, SimMetrics, SimulationResult};
pub use node::{SimConfig, SimNode, Wire};
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
pub use topology::{Endpoint, Link, NodeIndex, Topology};
pub use wiretree::{Address, Duration, Timestamp};
