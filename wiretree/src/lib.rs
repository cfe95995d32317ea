#![forbid(unsafe_code)]
//! wiretree - Multi-hop tree-addressed protocol over single-wire GPIO links
//!
//! Nodes are wired pairwise, one GPIO per neighbor, and bit-bang their own
//! physical layer. Each node has a hierarchical address (a path from the tree
//! root) and routes by prefix matching against its neighbors' addresses, so no
//! node needs a view of the whole network.
//!
//! This crate is `no_std` but **requires the `alloc` crate**.
//!
//! # Key Properties
//!
//! - Routing walks toward the least common ancestor, then down to the target
//! - Data frames are checksummed, acknowledged, and retransmitted on silence
//! - A neighbor that never acknowledges is removed and traffic fails over
//! - Recently seen packet ids are dropped to break loops
//! - All state belongs to one worker; other tasks talk to it through commands
//!
//! # Example (basic usage)
//!
//! ```
//! use wiretree::{Address, FastConfig, Node, NodeSetup};
//! use wiretree::traits::test_impls::{MockClock, MockPins, MockRandom, RecordingHandler};
//!
//! let own: Address = "1,2".parse().unwrap();
//! let setup = NodeSetup::new(own.clone()).with_connection("1".parse().unwrap(), 25);
//!
//! let clock = MockClock::new();
//! let mut node = Node::<_, _, _, _, FastConfig>::new(
//!     setup,
//!     MockPins::new(clock.clone()),
//!     clock,
//!     MockRandom::new(),
//!     RecordingHandler::new(),
//! );
//! node.start();
//!
//! // Sending to ourselves is delivered locally
//! node.send(&own, b"HELLO").unwrap();
//! node.tick();
//! assert_eq!(&node.handler().data[0][..5], b"HELLO");
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use wiretree::{Node, NodeSetup, Pins, Clock, Random, Handler};
//!
//! // Implement traits for your platform (or use hal::HalPins)...
//!
//! // let setup = NodeSetup::parse(stored_address, stored_table)?;
//! // let mut node = Node::new(setup, pins, clock, random, handler);
//!
//! // Run the worker
//! // spawn(async move {
//! //     node.run().await;
//! // });
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, connections, errors, events, metrics
//! - [`packet`] - Packet and checksum
//! - [`wire`] - Byte-level frame codec
//! - [`phy`] - Bit-banged transport
//! - [`routing`] - Prefix-match routing and the routing table
//! - [`reliability`] - Pending packets, retransmission, failover, duplicates
//! - [`node`] - Main Node struct and polling worker
//! - [`traits`] - Pins, Clock, Random, Handler traits
//! - [`config`] - Compile-time timings and runtime setup
//! - [`time`] - Timestamp and Duration types

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock pins and a predictable random source."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

#[macro_use]
pub mod debug;
pub mod config;
#[cfg(feature = "embedded-hal")]
pub mod hal;
pub mod node;
pub mod packet;
pub mod phy;
pub mod reliability;
pub mod routing;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, FastConfig, NodeConfig, NodeSetup, ParseError};
pub use node::Node;
pub use packet::{calculate_checksum, Packet};
pub use routing::{Route, RoutingTable};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Command, CommandChannel, Handler, Pins, Random};
pub use types::{
    Address, Connection, Direction, Error, Event, Level, LinkMetrics, Payload, Pin,
};
pub use wire::{Decode, DecodeError, Encode, Frame, FrameKind};

// Re-export constants
pub use types::{MAX_ADDRESS_LEN, PAYLOAD_FILL, PAYLOAD_SIZE, RETURN_OK};
