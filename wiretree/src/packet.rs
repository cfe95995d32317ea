//! Addressed, checksummed data packets.
//!
//! ## Data Frame Body
//!
//! ```text
//! address components (u16 LE each) || 0x0000 || payload (16, blank padded)
//! || id (u16 LE) || checksum (u16 LE)
//! ```
//!
//! The checksum is Fletcher-style: two running sums modulo 255 over every
//! address component and then every payload byte, combined as
//! `(sum2 << 8 | sum1) ^ address_len`. It catches single-byte corruption and
//! most transpositions; retransmission covers the rest. The id is not covered,
//! which is why acknowledgments are matched on the checksum.

use crate::types::{payload_from, Address, Error, Payload};
use crate::wire::{ByteSource, Decode, Encode, Writer};

/// Compute the checksum over an address and payload.
pub fn calculate_checksum(address: &Address, payload: &Payload) -> u16 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let components = address.components().iter().map(|&part| part as u32);
    let bytes = payload.iter().map(|&b| b as u32);

    for value in components.chain(bytes) {
        sum1 = (sum1 + value) % 255;
        sum2 = (sum2 + sum1) % 255;
    }

    (((sum2 << 8) | sum1) as u16) ^ (address.len() as u16)
}

/// A unit of application data moving through the tree.
///
/// The checksum is derived from destination and payload on construction and
/// cannot be set independently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    destination: Address,
    payload: Payload,
    id: u16,
    checksum: u16,
}

impl Packet {
    pub fn new(destination: Address, payload: Payload, id: u16) -> Self {
        let checksum = calculate_checksum(&destination, &payload);
        Self {
            destination,
            payload,
            id,
            checksum,
        }
    }

    /// Build a packet from up to [`PAYLOAD_SIZE`](crate::types::PAYLOAD_SIZE) bytes.
    pub fn with_data(destination: Address, data: &[u8], id: u16) -> Result<Self, Error> {
        Ok(Self::new(destination, payload_from(data)?, id))
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }
}

impl Encode for Packet {
    fn encode(&self, w: &mut Writer) {
        w.write_address(&self.destination);
        w.write_bytes(&self.payload);
        w.write_u16_le(self.id);
        w.write_u16_le(self.checksum);
    }
}

impl Decode for Packet {
    /// Decode and verify. A mismatching checksum discards the packet.
    fn decode<S: ByteSource>(src: &mut S) -> Result<Self, Error> {
        let destination = src.read_address()?;
        let mut payload = [0u8; crate::types::PAYLOAD_SIZE];
        for byte in payload.iter_mut() {
            *byte = src.read_u8()?;
        }
        let id = src.read_u16_le()?;
        let transmitted = src.read_u16_le()?;

        let packet = Packet::new(destination, payload, id);
        if packet.checksum != transmitted {
            return Err(Error::ChecksumMismatch {
                expected: packet.checksum,
                actual: transmitted,
            });
        }
        Ok(packet)
    }
}
