//! Debug events for protocol tracing.
//!
//! Events are built only when the `debug` or `log` feature is enabled. With
//! `log` they go to the `log` facade at debug level; with `debug` they are
//! handed to the node's [`DebugEmitter`], which simulators use to collect a
//! trace.

use crate::time::Timestamp;
use crate::types::{Address, Error, Pin};
use crate::wire::FrameKind;

/// Trait for receiving debug events from a node.
/// Implemented by test harnesses to collect/print events.
pub trait DebugEmitter: Send {
    /// Called when a debug event is emitted.
    fn emit(&mut self, event: DebugEvent);
}

/// Debug events emitted by the node for protocol tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Node began polling its ports.
    Started { timestamp: Timestamp, ports: usize },
    Stopped { timestamp: Timestamp },
    FrameSent {
        timestamp: Timestamp,
        pin: Pin,
        kind: FrameKind,
    },
    /// A start cell was seen and a frame decoded.
    FrameReceived {
        timestamp: Timestamp,
        pin: Pin,
        kind: FrameKind,
    },
    /// A start cell was seen but the body did not decode.
    DecodeFailed { pin: Pin, error: Error },
    /// Data packet with a recently seen id; re-acknowledged and dropped.
    DuplicateDropped { id: u16, pin: Pin },
    /// Packet addressed to this node handed to the application.
    Delivered { id: u16, checksum: u16 },
    /// Packet sent toward its destination.
    Forwarded {
        id: u16,
        checksum: u16,
        destination: Address,
        pin: Pin,
    },
    /// No neighbor could take the packet.
    Unreachable { destination: Address },
    AckReceived {
        pin: Pin,
        id: u16,
        checksum: u16,
        /// Whether a pending packet was cleared.
        matched: bool,
    },
    /// Pending set was full; oldest entry dropped.
    PendingEvicted { id: u16, checksum: u16 },
    Retransmit { checksum: u16, pin: Pin, attempt: u8 },
    Failover { checksum: u16, from: Pin, to: Pin },
    /// Every neighbor failed; packet dropped.
    Exhausted { id: u16, checksum: u16, pin: Pin },
    ConnectionAdded { address: Address, pin: Pin },
    ConnectionRemoved { pin: Pin },
    AddressChanged { address: Address },
}

/// Emit a debug event from inside a `Node` method.
///
/// ```ignore
/// emit_debug!(self, Delivered { id, checksum });
/// ```
///
/// With neither `debug` nor `log` enabled the event is never constructed.
macro_rules! emit_debug {
    ($node:expr, $($event:tt)+) => {{
        #[cfg(any(feature = "debug", feature = "log"))]
        {
            let event = $crate::debug::DebugEvent::$($event)+;
            #[cfg(feature = "log")]
            log::debug!("{:?}", event);
            #[cfg(feature = "debug")]
            $node.emit_debug(event);
        }
        #[cfg(not(any(feature = "debug", feature = "log")))]
        {
            // Type-check the fields without building the event.
            let _ = || $crate::debug::DebugEvent::$($event)+;
        }
    }};
}
