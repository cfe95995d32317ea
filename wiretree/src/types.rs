//! Core types and constants for the wiretree protocol.

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use crate::wire::DecodeError;

// Wire layout
pub const PAYLOAD_SIZE: usize = 16; // Fixed payload bytes per data frame
pub const PAYLOAD_FILL: u8 = b' '; // Blank filler for short payloads
pub const MAX_ADDRESS_LEN: usize = 16; // Components accepted before the 0 terminator
pub const ADDRESS_TERMINATOR: u16 = 0;

// Control frame opcodes
pub const OP_CONNECT_REQUEST: u8 = 0x01;
pub const OP_CONNECT_REPLY: u8 = 0x02;
pub const OP_ADDRESS_REQUEST: u8 = 0x03;
pub const OP_ADDRESS_REPLY: u8 = 0x04;
pub const RETURN_OK: u8 = 0x06;

/// Local GPIO pin identifier.
pub type Pin = u8;

/// Fixed-size, blank-padded payload buffer.
pub type Payload = [u8; PAYLOAD_SIZE];

/// Build a payload from a byte slice, padding with [`PAYLOAD_FILL`].
pub fn payload_from(data: &[u8]) -> Result<Payload, Error> {
    if data.len() > PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge { len: data.len() });
    }
    let mut payload = [PAYLOAD_FILL; PAYLOAD_SIZE];
    payload[..data.len()].copy_from_slice(data);
    Ok(payload)
}

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Direction of a GPIO pin. Lines are half-duplex: output only while sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Hierarchical address: path of hop identifiers from the tree root.
///
/// Components are non-zero because 0 terminates an address on the wire.
/// The empty address names the root.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Address(Vec<u16>);

impl Address {
    /// Create an address, rejecting zero components and over-long paths.
    pub fn new(components: Vec<u16>) -> Result<Self, Error> {
        if components.len() > MAX_ADDRESS_LEN || components.contains(&ADDRESS_TERMINATOR) {
            return Err(Error::InvalidAddress);
        }
        Ok(Self(components))
    }

    pub fn from_slice(components: &[u16]) -> Result<Self, Error> {
        Self::new(components.to_vec())
    }

    /// The tree root (empty path).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn components(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` is a prefix of this address (equality included).
    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True if this address lies strictly below `ancestor` in the tree.
    pub fn is_descendant_of(&self, ancestor: &Address) -> bool {
        self.len() > ancestor.len() && self.starts_with(ancestor)
    }

    /// Address one level below this one.
    pub fn child(&self, component: u16) -> Result<Self, Error> {
        let mut components = self.0.clone();
        components.push(component);
        Self::new(components)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse `1,2,3`. Whitespace around components is ignored; an empty
    /// string is the root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::root());
        }
        let components = s
            .split(',')
            .map(|part| part.trim().parse::<u16>().map_err(|_| Error::InvalidAddress))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(components)
    }
}

/// A neighbor reachable through a local pin.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Address of the neighbor.
    pub address: Address,
    /// Local pin wired to the neighbor.
    pub pin: Pin,
}

impl Connection {
    pub fn new(address: Address, pin: Pin) -> Self {
        Self { address, pin }
    }
}

/// Connection-table line format: `a,b,c:pin`.
impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.pin)
    }
}

/// Protocol events reported to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A neighbor was added (configuration command, connect request, or discovery).
    ConnectionAdded(Connection),
    /// A neighbor was removed (failover or configuration command).
    ConnectionRemoved { pin: Pin },
    /// A neighbor answered our connect request.
    ConnectReply { pin: Pin, accepted: bool },
    /// A pending packet moved to another neighbor after its pin failed.
    Rerouted { checksum: u16, from: Pin, to: Pin },
    /// Own address was changed by a configuration command.
    AddressChanged(Address),
}

/// Error type for node operations and reported failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Received frame failed checksum verification.
    ChecksumMismatch { expected: u16, actual: u16 },
    /// Packet id seen recently; dropped without routing.
    DuplicatePacket { id: u16 },
    /// Routing found no valid path.
    Unreachable { destination: Address },
    /// Every neighbor failed to acknowledge the packet.
    NeighborExhausted { id: u16, checksum: u16, pin: Pin },
    /// The command queue into the worker is full.
    QueueFull,
    /// Address has a zero component or too many components.
    InvalidAddress,
    /// Payload larger than [`PAYLOAD_SIZE`].
    PayloadTooLarge { len: usize },
    /// Frame could not be decoded.
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected {:04x}, got {:04x}",
                expected, actual
            ),
            Error::DuplicatePacket { id } => write!(f, "duplicate packet {:04x}", id),
            Error::Unreachable { destination } => {
                write!(f, "destination [{}] unreachable", destination)
            }
            Error::NeighborExhausted { id, checksum, pin } => write!(
                f,
                "packet {:04x} (checksum {:04x}) failed on pin {} with no alternate neighbor",
                id, checksum, pin
            ),
            Error::QueueFull => write!(f, "command queue full"),
            Error::InvalidAddress => write!(f, "invalid address"),
            Error::PayloadTooLarge { len } => {
                write!(f, "payload of {} bytes exceeds {}", len, PAYLOAD_SIZE)
            }
            Error::Decode(e) => write!(f, "decode error: {:?}", e),
        }
    }
}

impl core::error::Error for Error {}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Link-level counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub frames_sent: u32,
    pub frames_received: u32,
    pub decode_failures: u32,
    pub checksum_failures: u32,
    pub duplicates: u32,
    pub acks_received: u32,
    pub retransmissions: u32,
    pub failovers: u32,
    pub packets_dropped: u32,
    pub delivered: u32,
    pub forwarded: u32,
    pub unreachable: u32,
}
