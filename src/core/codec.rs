use crate::config::{HEADER_SIZE, MAGIC_NUMBER};
use crate::core::header::RawHeader;
use crate::error::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Splits a byte stream into whole frames.
///
/// The decoder only trusts the header: it rejects a bad magic number or a length
/// smaller than the header as soon as the header is buffered, then waits for the rest
/// of the frame. Typed decoding happens later, against a pooled packet.
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if let Some(magic) = RawHeader::peek_magic(&src[..]) {
            if magic != MAGIC_NUMBER {
                return Err(ProtocolError::ProtocolMismatch(magic));
            }
        }

        let declared = RawHeader::peek_length(&src[..]).unwrap_or(HEADER_SIZE);
        if declared < HEADER_SIZE {
            return Err(ProtocolError::MalformedPacket {
                declared,
                actual: src.len(),
            });
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(declared).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Encoder<Vec<u8>> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
