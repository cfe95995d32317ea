//! Frame serialization and deserialization.
//!
//! Every transmission is a start cell, a kind cell, and a byte body. The
//! kind cell is a line level rather than a byte, so [`Frame`] encodes only
//! the body and reports its [`FrameKind`] separately.
//!
//! ## Data Frame Body
//!
//! See [`crate::packet`].
//!
//! ## Control Frame Body
//!
//! ```text
//! opcode (1) || body
//!
//! RETURN_OK        0x06  id (u16 LE) || checksum (u16 LE)
//! CONNECT_REQUEST  0x01  address (u16 LE components || 0x0000)
//! CONNECT_REPLY    0x02  accepted (1)
//! ADDRESS_REQUEST  0x03  -
//! ADDRESS_REPLY    0x04  address (u16 LE components || 0x0000)
//! ```
//!
//! Multi-byte integers are little-endian. Decoding pulls from any
//! [`ByteSource`]: a byte slice here, or the bit sampler in [`crate::phy`].

use alloc::vec::Vec;

use crate::packet::Packet;
use crate::types::{
    Address, Error, Level, ADDRESS_TERMINATOR, MAX_ADDRESS_LEN, OP_ADDRESS_REPLY,
    OP_ADDRESS_REQUEST, OP_CONNECT_REPLY, OP_CONNECT_REQUEST, RETURN_OK,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of input.
    UnexpectedEof,
    /// Address ran past [`MAX_ADDRESS_LEN`] components without a terminator.
    AddressTooLong,
    /// Unknown control opcode.
    InvalidOpcode,
    /// Address failed validation.
    InvalidAddress,
    /// Input left over after a complete frame.
    TrailingBytes,
}

/// A source of frame bytes.
pub trait ByteSource {
    /// Read a single byte.
    fn read_u8(&mut self) -> Result<u8, DecodeError>;

    /// Read a u16, low byte first.
    fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Read a zero-terminated address.
    fn read_address(&mut self) -> Result<Address, DecodeError> {
        let mut components = Vec::new();
        loop {
            let part = self.read_u16_le()?;
            if part == ADDRESS_TERMINATOR {
                break;
            }
            if components.len() == MAX_ADDRESS_LEN {
                return Err(DecodeError::AddressTooLong);
            }
            components.push(part);
        }
        Address::new(components).map_err(|_| DecodeError::InvalidAddress)
    }
}

/// Reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

impl ByteSource for Reader<'_> {
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }
}

/// Writer for encoding frame bodies.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a u16, low byte first.
    pub fn write_u16_le(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Write address components followed by the terminator.
    pub fn write_address(&mut self, address: &Address) {
        for &part in address.components() {
            self.write_u16_le(part);
        }
        self.write_u16_le(ADDRESS_TERMINATOR);
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from a byte source.
    fn decode<S: ByteSource>(src: &mut S) -> Result<Self, Error>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes.into());
        }
        Ok(result)
    }
}

/// Frame class, signalled by the level of the cell after the start cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Control,
}

impl FrameKind {
    pub fn level(self) -> Level {
        match self {
            FrameKind::Data => Level::High,
            FrameKind::Control => Level::Low,
        }
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::High => FrameKind::Data,
            Level::Low => FrameKind::Control,
        }
    }
}

/// Everything a node can put on a wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Application packet.
    Data(Packet),
    /// `RETURN_OK` acknowledging a data frame.
    Ack { id: u16, checksum: u16 },
    /// Ask the neighbor to add us to its table.
    ConnectRequest(Address),
    ConnectReply { accepted: bool },
    /// Ask the neighbor for its address.
    AddressRequest,
    AddressReply(Address),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Data(_) => FrameKind::Data,
            _ => FrameKind::Control,
        }
    }

    /// Acknowledgment for a received packet.
    pub fn ack_for(packet: &Packet) -> Self {
        Frame::Ack {
            id: packet.id(),
            checksum: packet.checksum(),
        }
    }

    /// Decode a frame body whose kind cell has already been read.
    pub fn decode<S: ByteSource>(kind: FrameKind, src: &mut S) -> Result<Self, Error> {
        if kind == FrameKind::Data {
            return Ok(Frame::Data(Packet::decode(src)?));
        }

        let frame = match src.read_u8()? {
            RETURN_OK => Frame::Ack {
                id: src.read_u16_le()?,
                checksum: src.read_u16_le()?,
            },
            OP_CONNECT_REQUEST => Frame::ConnectRequest(src.read_address()?),
            OP_CONNECT_REPLY => Frame::ConnectReply {
                accepted: src.read_u8()? != 0,
            },
            OP_ADDRESS_REQUEST => Frame::AddressRequest,
            OP_ADDRESS_REPLY => Frame::AddressReply(src.read_address()?),
            _ => return Err(DecodeError::InvalidOpcode.into()),
        };
        Ok(frame)
    }

    /// Decode from a byte slice (strict: rejects trailing bytes).
    pub fn decode_from_slice(kind: FrameKind, data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);
        let frame = Self::decode(kind, &mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes.into());
        }
        Ok(frame)
    }
}

impl Encode for Frame {
    fn encode(&self, w: &mut Writer) {
        match self {
            Frame::Data(packet) => packet.encode(w),
            Frame::Ack { id, checksum } => {
                w.write_u8(RETURN_OK);
                w.write_u16_le(*id);
                w.write_u16_le(*checksum);
            }
            Frame::ConnectRequest(address) => {
                w.write_u8(OP_CONNECT_REQUEST);
                w.write_address(address);
            }
            Frame::ConnectReply { accepted } => {
                w.write_u8(OP_CONNECT_REPLY);
                w.write_u8(*accepted as u8);
            }
            Frame::AddressRequest => w.write_u8(OP_ADDRESS_REQUEST),
            Frame::AddressReply(address) => {
                w.write_u8(OP_ADDRESS_REPLY);
                w.write_address(address);
            }
        }
    }
}
