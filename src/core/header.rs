//! Fixed packet header.
//!
//! ```text
//! [Magic(4)] [OpCode(2)] [Flags(1)] [Priority(1)] [Transport(1)] [Length(2)] [Payload(N)]
//! ```
//!
//! All integers are big-endian. `Length` covers header and payload and is always
//! computed from the payload; callers cannot set it.

use crate::config::{HEADER_SIZE, MAGIC_NUMBER};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut};

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Handshake = 0x0001,
    Credentials = 0x0002,
    Reply = 0x0003,
}

impl Opcode {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x0001 => Ok(Opcode::Handshake),
            0x0002 => Ok(Opcode::Credentials),
            0x0003 => Ok(Opcode::Reply),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Handshake => "HANDSHAKE",
            Opcode::Credentials => "CREDENTIALS",
            Opcode::Reply => "REPLY",
        }
    }
}

/// Feature bits carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Credential fields are encrypted
    pub const ENCRYPTED: PacketFlags = PacketFlags(0x01);
    /// Credential fields are compressed
    pub const COMPRESSED: PacketFlags = PacketFlags(0x02);

    pub fn from_bits(bits: u8) -> Self {
        PacketFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PacketFlags) {
        self.0 &= !other.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            _ => Err(ProtocolError::MalformedPayload(
                constants::ERR_UNKNOWN_PRIORITY,
            )),
        }
    }
}

/// Delivery hint for the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportHint {
    #[default]
    Reliable = 0,
    Unreliable = 1,
    Sequenced = 2,
}

impl TransportHint {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TransportHint::Reliable),
            1 => Ok(TransportHint::Unreliable),
            2 => Ok(TransportHint::Sequenced),
            _ => Err(ProtocolError::MalformedPayload(
                constants::ERR_UNKNOWN_TRANSPORT,
            )),
        }
    }
}

/// Caller-controlled header fields.
///
/// Magic number, opcode and length are not here: the first two are fixed per packet
/// type and the last is derived from the payload at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFields {
    pub flags: PacketFlags,
    pub priority: Priority,
    pub transport: TransportHint,
}

/// A header as read off the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub opcode: u16,
    pub fields: HeaderFields,
    pub length: u16,
}

impl RawHeader {
    /// Parse and validate the fixed header at the start of `frame`.
    ///
    /// Validation order is magic number first, then declared length against the actual
    /// frame size, so nothing past the header is trusted until both pass.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedPacket {
                declared: HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let mut buf = &frame[..HEADER_SIZE];
        let magic = buf.get_u32();
        if magic != MAGIC_NUMBER {
            return Err(ProtocolError::ProtocolMismatch(magic));
        }

        let opcode = buf.get_u16();
        let flags = PacketFlags::from_bits(buf.get_u8());
        let priority = buf.get_u8();
        let transport = buf.get_u8();
        let length = buf.get_u16();

        if length as usize != frame.len() || (length as usize) < HEADER_SIZE {
            return Err(ProtocolError::MalformedPacket {
                declared: length as usize,
                actual: frame.len(),
            });
        }

        Ok(Self {
            opcode,
            fields: HeaderFields {
                flags,
                priority: Priority::from_u8(priority)?,
                transport: TransportHint::from_u8(transport)?,
            },
            length,
        })
    }

    /// Peek at the declared length of a buffered header (magic already checked)
    pub fn peek_length(header: &[u8]) -> Option<usize> {
        if header.len() < HEADER_SIZE {
            return None;
        }
        Some(u16::from_be_bytes([header[9], header[10]]) as usize)
    }

    /// Peek at the magic number of a buffered header
    pub fn peek_magic(header: &[u8]) -> Option<u32> {
        if header.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([header[0], header[1], header[2], header[3]]))
    }
}

/// Write a complete header for a packet of `total_len` bytes
pub(crate) fn write_header<B: BufMut>(
    out: &mut B,
    opcode: Opcode,
    fields: &HeaderFields,
    total_len: u16,
) {
    out.put_u32(MAGIC_NUMBER);
    out.put_u16(opcode.to_u16());
    out.put_u8(fields.flags.bits());
    out.put_u8(fields.priority as u8);
    out.put_u8(fields.transport as u8);
    out.put_u16(total_len);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic: u32, length: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32(magic);
        out.put_u16(Opcode::Reply.to_u16());
        out.put_u8(0);
        out.put_u8(1);
        out.put_u8(0);
        out.put_u16(length);
        out
    }

    #[test]
    fn test_field_order_is_fixed() {
        let mut out = Vec::new();
        let fields = HeaderFields {
            flags: PacketFlags::ENCRYPTED,
            priority: Priority::High,
            transport: TransportHint::Sequenced,
        };
        write_header(&mut out, Opcode::Credentials, &fields, 0x0102);
        assert_eq!(
            out,
            vec![0x53, 0x48, 0x4C, 0x44, 0x00, 0x02, 0x01, 0x02, 0x02, 0x01, 0x02]
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_parse_valid_header() {
        let bytes = header_bytes(MAGIC_NUMBER, HEADER_SIZE as u16);
        let header = RawHeader::parse(&bytes).unwrap();
        assert_eq!(header.opcode, 0x0003);
        assert_eq!(header.fields.priority, Priority::Normal);
        assert_eq!(header.length as usize, HEADER_SIZE);
    }

    #[test]
    fn test_magic_checked_before_length() {
        // both wrong: magic must win
        let bytes = header_bytes(0xDEAD_BEEF, 999);
        assert!(matches!(
            RawHeader::parse(&bytes),
            Err(ProtocolError::ProtocolMismatch(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let bytes = header_bytes(MAGIC_NUMBER, 20);
        assert!(matches!(
            RawHeader::parse(&bytes),
            Err(ProtocolError::MalformedPacket {
                declared: 20,
                actual: 11
            })
        ));
    }

    #[test]
    fn test_unknown_priority_rejected() {
        let mut bytes = header_bytes(MAGIC_NUMBER, HEADER_SIZE as u16);
        bytes[7] = 9;
        assert!(matches!(
            RawHeader::parse(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_flags_manipulation() {
        let mut flags = PacketFlags::NONE;
        flags.insert(PacketFlags::COMPRESSED);
        flags.insert(PacketFlags::ENCRYPTED);
        assert!(flags.contains(PacketFlags::ENCRYPTED));
        flags.remove(PacketFlags::ENCRYPTED);
        assert!(!flags.contains(PacketFlags::ENCRYPTED));
        assert!(flags.contains(PacketFlags::COMPRESSED));
    }
}
