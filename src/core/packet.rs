//! Typed packets and the framing contract.
//!
//! Every message type implements [`Frame`]: it knows its opcode, how large its payload
//! is, how to write and read that payload, and how to wipe itself before going back to
//! the pool. [`Packet`] is the closed set of message types, dispatched by opcode.

use crate::config::{
    HEADER_SIZE, MAX_METADATA_FIELD, MAX_PACKET_SIZE, MAX_PASSWORD_FIELD, MAX_REPLY_MESSAGE,
    MAX_USERNAME_FIELD,
};
use crate::core::header::{write_header, HeaderFields, Opcode, PacketFlags, RawHeader};
use crate::error::{constants, ProtocolError, ReplyCode, Result};
use bincode::Options;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Framing contract implemented by every packet type.
pub trait Frame: Default + Send + 'static {
    const OPCODE: Opcode;

    fn header_fields(&self) -> &HeaderFields;

    fn header_fields_mut(&mut self) -> &mut HeaderFields;

    /// Size of the encoded payload.
    ///
    /// # Errors
    /// `SerializationError` if a variable-size field exceeds its maximum.
    fn payload_len(&self) -> Result<usize>;

    /// Write the payload. Only called after `payload_len` succeeded.
    fn write_payload<B: BufMut>(&self, out: &mut B) -> Result<()>;

    /// Populate `self` from a validated header and its payload bytes.
    fn read_payload(&mut self, fields: HeaderFields, payload: &[u8]) -> Result<()>;

    /// Restore every field to its default, wiping secret-bearing buffers.
    fn reset_for_pool(&mut self);

    /// Total encoded size; this is the value of the header's length field.
    fn encoded_len(&self) -> Result<usize> {
        let total = HEADER_SIZE + self.payload_len()?;
        if total > MAX_PACKET_SIZE {
            return Err(ProtocolError::SerializationError(
                constants::ERR_PACKET_TOO_LARGE.to_string(),
            ));
        }
        Ok(total)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let total = self.encoded_len()?;
        let mut out = Vec::with_capacity(total);
        write_header(&mut out, Self::OPCODE, self.header_fields(), total as u16);
        self.write_payload(&mut out)?;
        debug_assert_eq!(out.len(), total);
        Ok(out)
    }

    /// Serialize into caller-supplied storage, returning the number of bytes written.
    fn serialize_into(&self, buf: &mut [u8]) -> Result<usize> {
        let total = self.encoded_len()?;
        if buf.len() < total {
            return Err(ProtocolError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }
        let mut cursor = &mut buf[..total];
        write_header(&mut cursor, Self::OPCODE, self.header_fields(), total as u16);
        self.write_payload(&mut cursor)?;
        Ok(total)
    }
}

/// Sequential reader over a payload with length-prefixed fields
struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn u8(&mut self) -> Result<u8> {
        if self.buf.remaining() < 1 {
            return Err(ProtocolError::MalformedPayload(constants::ERR_TRUNCATED_FIELD));
        }
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        if self.buf.remaining() < 2 {
            return Err(ProtocolError::MalformedPayload(constants::ERR_TRUNCATED_FIELD));
        }
        Ok(self.buf.get_u16())
    }

    fn prefixed(&mut self, max: usize) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        if len > max || len > self.buf.len() {
            return Err(ProtocolError::MalformedPayload(constants::ERR_TRUNCATED_FIELD));
        }
        let (field, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(field)
    }

    fn prefixed_str(&mut self, max: usize) -> Result<String> {
        let bytes = self.prefixed(max)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_INVALID_UTF8))
    }

    fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::MalformedPayload(constants::ERR_TRAILING_BYTES))
        }
    }
}

fn check_field(name: &str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(ProtocolError::SerializationError(format!(
            "{name} field is {len} bytes (maximum {max})"
        )));
    }
    Ok(())
}

fn put_prefixed<B: BufMut>(out: &mut B, bytes: &[u8]) {
    out.put_u16(bytes.len() as u16);
    out.put_slice(bytes);
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Carries a raw ephemeral public key in either direction.
///
/// An empty payload decodes as "no key". The key length is not checked here; that is
/// the handshake's job, so it can answer with a precise rejection.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    pub fields: HeaderFields,
    public_key: Option<Vec<u8>>,
}

impl HandshakePacket {
    pub fn with_public_key(key: impl Into<Vec<u8>>) -> Self {
        let mut packet = Self::default();
        packet.set_public_key(key);
        packet
    }

    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    pub fn set_public_key(&mut self, key: impl Into<Vec<u8>>) {
        if let Some(mut old) = self.public_key.take() {
            old.zeroize();
        }
        let key = key.into();
        self.public_key = if key.is_empty() { None } else { Some(key) };
    }
}

impl fmt::Debug for HandshakePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakePacket")
            .field("fields", &self.fields)
            .field("public_key_len", &self.public_key.as_ref().map(Vec::len))
            .finish()
    }
}

impl Frame for HandshakePacket {
    const OPCODE: Opcode = Opcode::Handshake;

    fn header_fields(&self) -> &HeaderFields {
        &self.fields
    }

    fn header_fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }

    fn payload_len(&self) -> Result<usize> {
        let len = self.public_key.as_ref().map_or(0, Vec::len);
        check_field("public key", len, MAX_PACKET_SIZE - HEADER_SIZE)?;
        Ok(len)
    }

    fn write_payload<B: BufMut>(&self, out: &mut B) -> Result<()> {
        if let Some(key) = &self.public_key {
            out.put_slice(key);
        }
        Ok(())
    }

    fn read_payload(&mut self, fields: HeaderFields, payload: &[u8]) -> Result<()> {
        self.fields = fields;
        self.set_public_key(payload);
        Ok(())
    }

    fn reset_for_pool(&mut self) {
        if let Some(mut key) = self.public_key.take() {
            key.zeroize();
        }
        self.fields = HeaderFields::default();
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// What the account layer is asked to do with the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CredentialIntent {
    #[default]
    Login = 0,
    Register = 1,
    ChangePassword = 2,
}

impl CredentialIntent {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CredentialIntent::Login),
            1 => Ok(CredentialIntent::Register),
            2 => Ok(CredentialIntent::ChangePassword),
            _ => Err(ProtocolError::MalformedPayload(constants::ERR_UNKNOWN_INTENT)),
        }
    }

    /// Whether this intent sets a new username/password and must pass the policy
    pub fn sets_credentials(self) -> bool {
        matches!(
            self,
            CredentialIntent::Register | CredentialIntent::ChangePassword
        )
    }
}

/// Fixed-width little-endian bincode; the blob must be consumed exactly
fn metadata_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Client-supplied metadata, bincode-encoded inside the credentials payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct CredentialMetadata {
    pub client_version: u32,
    pub device: String,
    pub remember_me: bool,
}

/// Username, password and metadata. Wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub metadata: CredentialMetadata,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            metadata: CredentialMetadata::default(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username_len", &self.username.len())
            .field("password", &"<redacted>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CredentialsPacket {
    pub fields: HeaderFields,
    pub intent: CredentialIntent,
    pub credentials: Option<Credentials>,
}

impl CredentialsPacket {
    pub fn new(intent: CredentialIntent, credentials: Credentials) -> Self {
        Self {
            fields: HeaderFields::default(),
            intent,
            credentials: Some(credentials),
        }
    }

    pub fn flags(&self) -> PacketFlags {
        self.fields.flags
    }
}

impl Frame for CredentialsPacket {
    const OPCODE: Opcode = Opcode::Credentials;

    fn header_fields(&self) -> &HeaderFields {
        &self.fields
    }

    fn header_fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }

    fn payload_len(&self) -> Result<usize> {
        // intent + presence marker
        let mut len = 2;
        if let Some(creds) = &self.credentials {
            check_field("username", creds.username.len(), MAX_USERNAME_FIELD)?;
            check_field("password", creds.password.len(), MAX_PASSWORD_FIELD)?;
            let meta_len = metadata_options().serialized_size(&creds.metadata)? as usize;
            check_field("metadata", meta_len, MAX_METADATA_FIELD)?;
            len += 6 + creds.username.len() + creds.password.len() + meta_len;
        }
        Ok(len)
    }

    fn write_payload<B: BufMut>(&self, out: &mut B) -> Result<()> {
        out.put_u8(self.intent as u8);
        match &self.credentials {
            None => out.put_u8(0),
            Some(creds) => {
                out.put_u8(1);
                put_prefixed(out, creds.username.as_bytes());
                put_prefixed(out, creds.password.as_bytes());
                let blob = metadata_options().serialize(&creds.metadata)?;
                put_prefixed(out, &blob);
            }
        }
        Ok(())
    }

    fn read_payload(&mut self, fields: HeaderFields, payload: &[u8]) -> Result<()> {
        let mut reader = PayloadReader::new(payload);
        let intent = CredentialIntent::from_u8(reader.u8()?)?;
        let credentials = match reader.u8()? {
            0 => None,
            1 => {
                let username = reader.prefixed_str(MAX_USERNAME_FIELD)?;
                let password = reader.prefixed_str(MAX_PASSWORD_FIELD)?;
                let metadata = metadata_options()
                    .deserialize(reader.prefixed(MAX_METADATA_FIELD)?)
                    .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_INVALID_METADATA))?;
                Some(Credentials {
                    username,
                    password,
                    metadata,
                })
            }
            _ => {
                return Err(ProtocolError::MalformedPayload(
                    constants::ERR_INVALID_PRESENCE,
                ))
            }
        };
        reader.finish()?;

        self.reset_for_pool();
        self.fields = fields;
        self.intent = intent;
        self.credentials = credentials;
        Ok(())
    }

    fn reset_for_pool(&mut self) {
        if let Some(mut creds) = self.credentials.take() {
            creds.zeroize();
        }
        self.intent = CredentialIntent::default();
        self.fields = HeaderFields::default();
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Status reply: a code plus a short human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    pub fields: HeaderFields,
    pub code: ReplyCode,
    pub message: String,
}

impl Default for ReplyPacket {
    fn default() -> Self {
        Self {
            fields: HeaderFields::default(),
            code: ReplyCode::Ok,
            message: String::new(),
        }
    }
}

impl ReplyPacket {
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Self {
            fields: HeaderFields::default(),
            code,
            message: message.into(),
        }
    }

    /// Reply describing `err` without leaking internals
    pub fn from_error(err: &ProtocolError) -> Self {
        Self::new(err.reply_code(), err.reply_message())
    }
}

impl Frame for ReplyPacket {
    const OPCODE: Opcode = Opcode::Reply;

    fn header_fields(&self) -> &HeaderFields {
        &self.fields
    }

    fn header_fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }

    fn payload_len(&self) -> Result<usize> {
        check_field("message", self.message.len(), MAX_REPLY_MESSAGE)?;
        Ok(4 + self.message.len())
    }

    fn write_payload<B: BufMut>(&self, out: &mut B) -> Result<()> {
        out.put_u16(self.code.as_u16());
        put_prefixed(out, self.message.as_bytes());
        Ok(())
    }

    fn read_payload(&mut self, fields: HeaderFields, payload: &[u8]) -> Result<()> {
        let mut reader = PayloadReader::new(payload);
        let code = ReplyCode::from_u16(reader.u16()?).ok_or(ProtocolError::MalformedPayload(
            constants::ERR_UNKNOWN_REPLY_CODE,
        ))?;
        let message = reader.prefixed_str(MAX_REPLY_MESSAGE)?;
        reader.finish()?;

        self.fields = fields;
        self.code = code;
        self.message = message;
        Ok(())
    }

    fn reset_for_pool(&mut self) {
        self.message.clear();
        self.code = ReplyCode::Ok;
        self.fields = HeaderFields::default();
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// Any packet, tagged by type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Handshake(HandshakePacket),
    Credentials(CredentialsPacket),
    Reply(ReplyPacket),
}

impl Packet {
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Handshake(_) => HandshakePacket::OPCODE,
            Packet::Credentials(_) => CredentialsPacket::OPCODE,
            Packet::Reply(_) => ReplyPacket::OPCODE,
        }
    }

    pub fn header_fields(&self) -> &HeaderFields {
        match self {
            Packet::Handshake(p) => p.header_fields(),
            Packet::Credentials(p) => p.header_fields(),
            Packet::Reply(p) => p.header_fields(),
        }
    }

    pub fn encoded_len(&self) -> Result<usize> {
        match self {
            Packet::Handshake(p) => p.encoded_len(),
            Packet::Credentials(p) => p.encoded_len(),
            Packet::Reply(p) => p.encoded_len(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Packet::Handshake(p) => p.serialize(),
            Packet::Credentials(p) => p.serialize(),
            Packet::Reply(p) => p.serialize(),
        }
    }

    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Packet::Handshake(p) => p.serialize_into(buf),
            Packet::Credentials(p) => p.serialize_into(buf),
            Packet::Reply(p) => p.serialize_into(buf),
        }
    }

    /// Decode one complete frame.
    ///
    /// # Errors
    /// - `ProtocolMismatch` on an unknown magic number
    /// - `MalformedPacket` when the declared length differs from `bytes.len()`
    /// - `UnknownOpcode` on an unknown message type
    /// - `MalformedPayload` when the payload does not parse
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = RawHeader::parse(bytes)?;
        let payload = &bytes[HEADER_SIZE..];
        match Opcode::from_u16(header.opcode)? {
            Opcode::Handshake => decode_frame(header.fields, payload).map(Packet::Handshake),
            Opcode::Credentials => decode_frame(header.fields, payload).map(Packet::Credentials),
            Opcode::Reply => decode_frame(header.fields, payload).map(Packet::Reply),
        }
    }
}

fn decode_frame<T: Frame>(fields: HeaderFields, payload: &[u8]) -> Result<T> {
    let mut packet = T::default();
    packet.read_payload(fields, payload)?;
    Ok(packet)
}

impl From<HandshakePacket> for Packet {
    fn from(p: HandshakePacket) -> Self {
        Packet::Handshake(p)
    }
}

impl From<CredentialsPacket> for Packet {
    fn from(p: CredentialsPacket) -> Self {
        Packet::Credentials(p)
    }
}

impl From<ReplyPacket> for Packet {
    fn from(p: ReplyPacket) -> Self {
        Packet::Reply(p)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::header::Priority;

    fn sample_credentials() -> CredentialsPacket {
        let mut creds = Credentials::new("user_name", "Abc123!@");
        creds.metadata = CredentialMetadata {
            client_version: 42,
            device: "desktop".into(),
            remember_me: true,
        };
        CredentialsPacket::new(CredentialIntent::Register, creds)
    }

    #[test]
    fn test_length_field_matches_encoded_size() {
        let packets: Vec<Packet> = vec![
            HandshakePacket::with_public_key(vec![9u8; 32]).into(),
            sample_credentials().into(),
            ReplyPacket::new(ReplyCode::Ok, "fine").into(),
            HandshakePacket::default().into(),
        ];
        for packet in packets {
            let bytes = packet.serialize().unwrap();
            let declared = u16::from_be_bytes([bytes[9], bytes[10]]) as usize;
            assert_eq!(declared, bytes.len());
            assert_eq!(packet.encoded_len().unwrap(), bytes.len());
        }
    }

    #[test]
    fn test_credentials_decode_matches_original() {
        let mut packet = sample_credentials();
        packet.fields.priority = Priority::High;
        let bytes = packet.serialize().unwrap();
        match Packet::deserialize(&bytes).unwrap() {
            Packet::Credentials(decoded) => assert_eq!(decoded, packet),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn test_serialize_into_exact_and_short_buffers() {
        let packet = Packet::from(ReplyPacket::new(ReplyCode::Ok, "hello"));
        let total = packet.encoded_len().unwrap();

        let mut exact = vec![0u8; total];
        assert_eq!(packet.serialize_into(&mut exact).unwrap(), total);
        assert_eq!(exact, packet.serialize().unwrap());

        let mut short = vec![0u8; total - 1];
        match packet.serialize_into(&mut short) {
            Err(ProtocolError::BufferTooSmall { needed, available }) => {
                assert_eq!(needed, total);
                assert_eq!(available, total - 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oversized_field_is_serialization_error() {
        let mut packet = sample_credentials();
        if let Some(creds) = packet.credentials.as_mut() {
            creds.username = "u".repeat(MAX_USERNAME_FIELD + 1);
        }
        assert!(matches!(
            packet.serialize(),
            Err(ProtocolError::SerializationError(_))
        ));
    }

    #[test]
    fn test_empty_handshake_payload_decodes_as_absent() {
        let bytes = HandshakePacket::default().serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        match Packet::deserialize(&bytes).unwrap() {
            Packet::Handshake(p) => assert!(p.public_key().is_none()),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = ReplyPacket::new(ReplyCode::Ok, "x").serialize().unwrap();
        bytes.push(0);
        let len = bytes.len() as u16;
        bytes[9..11].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(
            Packet::deserialize(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut bytes = ReplyPacket::new(ReplyCode::Ok, "x").serialize().unwrap();
        bytes[4..6].copy_from_slice(&0x0777u16.to_be_bytes());
        assert!(matches!(
            Packet::deserialize(&bytes),
            Err(ProtocolError::UnknownOpcode(0x0777))
        ));
    }

    #[test]
    fn test_reset_for_pool_clears_secrets() {
        let mut packet = sample_credentials();
        packet.fields.flags.insert(PacketFlags::ENCRYPTED);
        packet.reset_for_pool();
        assert_eq!(packet, CredentialsPacket::default());

        let mut hs = HandshakePacket::with_public_key(vec![1u8; 32]);
        hs.reset_for_pool();
        assert!(hs.public_key().is_none());

        let mut reply = ReplyPacket::new(ReplyCode::CryptoFailure, "nope");
        reply.reset_for_pool();
        assert_eq!(reply, ReplyPacket::default());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let packet = sample_credentials();
        let text = format!("{packet:?}");
        assert!(!text.contains("Abc123!@"));
        assert!(text.contains("<redacted>"));
    }
}
