//! Node configuration.
//!
//! Timing and memory bounds are compile-time constants on a [`NodeConfig`]
//! type, so a firmware image pays only for what it declares. The address and
//! neighbor table are runtime values in a [`NodeSetup`], usually parsed from
//! the text stored by the configuration UI.
//!
//! # Timing
//!
//! | Config | Bit delay | Poll interval | Resend timeout | Use |
//! |--------|----------:|--------------:|---------------:|-----|
//! | `DefaultConfig` | 2 ms | 100 µs | 2 s | hardware |
//! | `FastConfig` | 200 µs | 20 µs | 200 ms | simulation, tests |
//!
//! The poll interval must stay below 0.6 bit delays, otherwise a start cell
//! can be detected too late for the receiver to sample mid-cell.
//!
//! # Example
//!
//! ```
//! use wiretree::config::{NodeSetup, DefaultConfig, NodeConfig};
//!
//! let setup = NodeSetup::parse("1,2", "# uplink\n1:4\n1,2,1:5\n").unwrap();
//! assert_eq!(setup.connections.len(), 2);
//! assert_eq!(setup.connections[1].to_string(), "1,2,1:5");
//! assert_eq!(DefaultConfig::BIT_DELAY_US, 2000);
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Write;
use core::str::FromStr;

use crate::time::Duration;
use crate::types::{Address, Connection, Pin};

/// Compile-time timing and memory bounds.
///
/// All bounds must be non-zero.
pub trait NodeConfig {
    /// Length of one cell on the wire, in microseconds.
    const BIT_DELAY_US: u64;

    /// Pause between polling cycles.
    const POLL_INTERVAL_US: u64;

    /// Silence after which a pending packet is sent again.
    const RESEND_TIMEOUT_MS: u64;

    /// Transmissions per pin before the neighbor is declared dead.
    const MAX_ATTEMPTS: u8;

    /// Capacity of the duplicate-suppression ring.
    const RECENT_IDS: usize;

    /// Maximum packets awaiting acknowledgment.
    const MAX_PENDING: usize;

    /// Maximum neighbors accepted through `CONNECT_REQUEST`.
    const MAX_CONNECTIONS: usize;

    fn bit_delay() -> Duration {
        Duration::from_micros(Self::BIT_DELAY_US)
    }

    fn poll_interval() -> Duration {
        Duration::from_micros(Self::POLL_INTERVAL_US)
    }

    fn resend_timeout() -> Duration {
        Duration::from_millis(Self::RESEND_TIMEOUT_MS)
    }
}

/// Hardware timings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const BIT_DELAY_US: u64 = 2000;
    const POLL_INTERVAL_US: u64 = 100;
    const RESEND_TIMEOUT_MS: u64 = 2000;
    const MAX_ATTEMPTS: u8 = 3;
    const RECENT_IDS: usize = 16;
    const MAX_PENDING: usize = 16;
    const MAX_CONNECTIONS: usize = 16;
}

/// Short timings for simulation and tests. Same bounds as [`DefaultConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FastConfig;

impl NodeConfig for FastConfig {
    const BIT_DELAY_US: u64 = 200;
    const POLL_INTERVAL_US: u64 = 20;
    const RESEND_TIMEOUT_MS: u64 = 200;
    const MAX_ATTEMPTS: u8 = 3;
    const RECENT_IDS: usize = 16;
    const MAX_PENDING: usize = 16;
    const MAX_CONNECTIONS: usize = 16;
}

/// Why a connection-table line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// No `:` separating address and pin.
    MissingPin,
    InvalidPin,
    InvalidAddress,
}

/// Connection-table parse failure. `line` is 1-based; 0 means the own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.kind {
            ParseErrorKind::MissingPin => "expected `address:pin`",
            ParseErrorKind::InvalidPin => "invalid pin",
            ParseErrorKind::InvalidAddress => "invalid address",
        };
        if self.line == 0 {
            write!(f, "own address: {}", reason)
        } else {
            write!(f, "line {}: {}", self.line, reason)
        }
    }
}

impl core::error::Error for ParseError {}

impl FromStr for Connection {
    type Err = ParseErrorKind;

    /// Parse one `a,b,c:pin` line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, pin) = s.trim().rsplit_once(':').ok_or(ParseErrorKind::MissingPin)?;
        let pin: Pin = pin.trim().parse().map_err(|_| ParseErrorKind::InvalidPin)?;
        let address: Address = address.parse().map_err(|_| ParseErrorKind::InvalidAddress)?;
        Ok(Connection::new(address, pin))
    }
}

/// Parse a connection table: one `a,b,c:pin` per line, `#` starts a comment.
pub fn parse_connections(text: &str) -> Result<Vec<Connection>, ParseError> {
    let mut connections = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before,
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let connection = line.parse().map_err(|kind| ParseError {
            line: index + 1,
            kind,
        })?;
        connections.push(connection);
    }
    Ok(connections)
}

/// Format connections in the table text format.
pub fn format_connections(connections: &[Connection]) -> String {
    let mut out = String::new();
    for connection in connections {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{}", connection);
    }
    out
}

/// Runtime identity and neighbors of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSetup {
    pub address: Address,
    /// Initial routing table, in tie-break order.
    pub connections: Vec<Connection>,
    /// Extra pins to poll that have no configured neighbor yet.
    pub ports: Vec<Pin>,
}

impl NodeSetup {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            connections: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_connection(mut self, address: Address, pin: Pin) -> Self {
        self.connections.push(Connection::new(address, pin));
        self
    }

    pub fn with_port(mut self, pin: Pin) -> Self {
        self.ports.push(pin);
        self
    }

    /// Build from the stored own-address string and connection table.
    pub fn parse(address: &str, table: &str) -> Result<Self, ParseError> {
        let address = address.parse().map_err(|_| ParseError {
            line: 0,
            kind: ParseErrorKind::InvalidAddress,
        })?;
        Ok(Self {
            address,
            connections: parse_connections(table)?,
            ports: Vec::new(),
        })
    }

    /// Every pin to poll: connection pins first, then extra ports, no repeats.
    pub fn all_ports(&self) -> Vec<Pin> {
        let mut pins: Vec<Pin> = Vec::new();
        for pin in self.connections.iter().map(|c| c.pin).chain(self.ports.iter().copied()) {
            if !pins.contains(&pin) {
                pins.push(pin);
            }
        }
        pins
    }

    pub fn to_table_string(&self) -> String {
        format_connections(&self.connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(parts: &[u16]) -> Address {
        Address::from_slice(parts).unwrap()
    }

    #[test]
    fn test_default_config_values() {
        assert_eq!(DefaultConfig::bit_delay(), Duration::from_millis(2));
        assert_eq!(DefaultConfig::poll_interval(), Duration::from_micros(100));
        assert_eq!(DefaultConfig::resend_timeout(), Duration::from_secs(2));
        assert_eq!(DefaultConfig::MAX_ATTEMPTS, 3);
        assert_eq!(DefaultConfig::RECENT_IDS, 16);
    }

    #[test]
    fn test_poll_interval_within_sampling_tolerance() {
        fn check<C: NodeConfig>() {
            assert!(C::POLL_INTERVAL_US * 10 < C::BIT_DELAY_US * 6);
            assert!(C::MAX_ATTEMPTS > 0);
            assert!(C::RECENT_IDS > 0);
            assert!(C::MAX_PENDING > 0);
            assert!(C::MAX_CONNECTIONS > 0);
        }
        check::<DefaultConfig>();
        check::<FastConfig>();
    }

    #[test]
    fn test_parse_table() {
        let text = "\
# neighbors
1:25
1,2:26   # downstream

  3,4,5 : 7
";
        let connections = parse_connections(text).unwrap();
        assert_eq!(
            connections,
            [
                Connection::new(addr(&[1]), 25),
                Connection::new(addr(&[1, 2]), 26),
                Connection::new(addr(&[3, 4, 5]), 7),
            ]
        );
    }

    #[test]
    fn test_parse_errors_report_line() {
        assert_eq!(
            parse_connections("1:2\n1,2\n"),
            Err(ParseError {
                line: 2,
                kind: ParseErrorKind::MissingPin
            })
        );
        assert_eq!(
            parse_connections("1:300").unwrap_err().kind,
            ParseErrorKind::InvalidPin
        );
        assert_eq!(
            parse_connections("\n\n1,0:3").unwrap_err(),
            ParseError {
                line: 3,
                kind: ParseErrorKind::InvalidAddress
            }
        );
    }

    #[test]
    fn test_table_round_trips_through_text() {
        let setup = NodeSetup::new(addr(&[1]))
            .with_connection(addr(&[1, 2]), 4)
            .with_connection(Address::root(), 5);
        let text = setup.to_table_string();
        assert_eq!(text, "1,2:4\n:5\n");
        assert_eq!(parse_connections(&text).unwrap(), setup.connections);
    }

    #[test]
    fn test_parse_setup() {
        let setup = NodeSetup::parse(" 1,2 ", "1:4").unwrap();
        assert_eq!(setup.address, addr(&[1, 2]));
        assert_eq!(
            NodeSetup::parse("x", "").unwrap_err(),
            ParseError {
                line: 0,
                kind: ParseErrorKind::InvalidAddress
            }
        );
    }

    #[test]
    fn test_all_ports_dedups() {
        let setup = NodeSetup::new(addr(&[1]))
            .with_connection(addr(&[2]), 4)
            .with_connection(addr(&[3]), 5)
            .with_port(5)
            .with_port(9);
        assert_eq!(setup.all_ports(), [4, 5, 9]);
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            line: 4,
            kind: ParseErrorKind::InvalidPin,
        };
        assert_eq!(alloc::format!("{}", err), "line 4: invalid pin");
    }
}
