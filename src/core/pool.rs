//! # Packet Pool
//!
//! Free lists of pre-allocated packets, one per packet kind, so steady-state traffic
//! does not allocate a fresh packet per message.
//!
//! A rented packet is wrapped in [`Pooled`]. When the guard drops, the packet is wiped
//! with [`Frame::reset_for_pool`] exactly once and pushed back, ready for the next
//! rental. Credentials never survive a return.
//!
//! ## Usage
//! ```rust
//! use session_shield::core::pool::PacketPool;
//! use session_shield::core::packet::Frame;
//!
//! let pool = PacketPool::new(4, 64);
//! let mut reply = pool.rent_reply();
//! reply.message.push_str("ok");
//! let bytes = reply.serialize().unwrap();
//! drop(reply); // wiped and returned
//! # assert!(!bytes.is_empty());
//! ```

use crate::config::{PoolConfig, HEADER_SIZE};
use crate::core::header::{Opcode, RawHeader};
use crate::core::packet::{CredentialsPacket, Frame, HandshakePacket, Packet, ReplyPacket};
use crate::error::Result;
use std::sync::{Arc, Mutex};

/// A packet on loan from a [`Pool`]; returned on drop
pub struct Pooled<T: Frame> {
    item: Option<T>,
    pool: Arc<Mutex<Vec<T>>>,
    max_idle: usize,
}

impl<T: Frame> Pooled<T> {
    /// Take the packet out of the pool's custody; it will not be wiped or returned
    pub fn detach(mut self) -> T {
        self.item.take().unwrap_or_default()
    }
}

impl<T: Frame> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut item) = self.item.take() {
            item.reset_for_pool();
            if let Ok(mut free) = self.pool.lock() {
                if free.len() < self.max_idle {
                    free.push(item);
                }
            }
            // Otherwise the wiped packet is simply deallocated
        }
    }
}

impl<T: Frame> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only `None` after `detach` consumed the guard
        self.item.as_ref().unwrap_or_else(|| unreachable!("pooled item already taken"))
    }
}

impl<T: Frame> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("pooled item already taken"))
    }
}

impl<T: Frame + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

/// Thread-safe free list for one packet type
pub struct Pool<T: Frame> {
    free: Arc<Mutex<Vec<T>>>,
    max_idle: usize,
}

impl<T: Frame> Pool<T> {
    pub fn new(preallocate: usize, max_idle: usize) -> Self {
        let mut free = Vec::with_capacity(preallocate);
        for _ in 0..preallocate {
            free.push(T::default());
        }

        Self {
            free: Arc::new(Mutex::new(free)),
            max_idle,
        }
    }

    /// Rent a packet (or allocate a new one if the free list is empty)
    pub fn rent(&self) -> Pooled<T> {
        let item = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();

        Pooled {
            item: Some(item),
            pool: self.free.clone(),
            max_idle: self.max_idle,
        }
    }

    /// Number of idle packets ready for rental
    pub fn available(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl<T: Frame> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            free: self.free.clone(),
            max_idle: self.max_idle,
        }
    }
}

/// A decoded packet still on loan from the pool
#[derive(Debug)]
pub enum PooledPacket {
    Handshake(Pooled<HandshakePacket>),
    Credentials(Pooled<CredentialsPacket>),
    Reply(Pooled<ReplyPacket>),
}

impl PooledPacket {
    pub fn opcode(&self) -> Opcode {
        match self {
            PooledPacket::Handshake(_) => Opcode::Handshake,
            PooledPacket::Credentials(_) => Opcode::Credentials,
            PooledPacket::Reply(_) => Opcode::Reply,
        }
    }

    /// Copy into an owned [`Packet`]; the pooled instance is still wiped on drop
    pub fn to_packet(&self) -> Packet {
        match self {
            PooledPacket::Handshake(p) => Packet::Handshake((**p).clone()),
            PooledPacket::Credentials(p) => Packet::Credentials((**p).clone()),
            PooledPacket::Reply(p) => Packet::Reply((**p).clone()),
        }
    }
}

/// One free list per packet kind
#[derive(Clone)]
pub struct PacketPool {
    handshakes: Pool<HandshakePacket>,
    credentials: Pool<CredentialsPacket>,
    replies: Pool<ReplyPacket>,
}

impl PacketPool {
    pub fn new(preallocate: usize, max_idle: usize) -> Self {
        Self {
            handshakes: Pool::new(preallocate, max_idle),
            credentials: Pool::new(preallocate, max_idle),
            replies: Pool::new(preallocate, max_idle),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.preallocate, config.max_idle)
    }

    pub fn rent_handshake(&self) -> Pooled<HandshakePacket> {
        self.handshakes.rent()
    }

    pub fn rent_credentials(&self) -> Pooled<CredentialsPacket> {
        self.credentials.rent()
    }

    pub fn rent_reply(&self) -> Pooled<ReplyPacket> {
        self.replies.rent()
    }

    /// Idle counts as (handshake, credentials, reply)
    pub fn available(&self) -> (usize, usize, usize) {
        (
            self.handshakes.available(),
            self.credentials.available(),
            self.replies.available(),
        )
    }

    /// Decode a frame into a rented packet.
    ///
    /// Same validation as [`Packet::deserialize`]. On failure the rented packet goes
    /// straight back to the pool.
    pub fn decode(&self, bytes: &[u8]) -> Result<PooledPacket> {
        let header = RawHeader::parse(bytes)?;
        let payload = &bytes[HEADER_SIZE..];
        Ok(match Opcode::from_u16(header.opcode)? {
            Opcode::Handshake => {
                let mut packet = self.rent_handshake();
                packet.read_payload(header.fields, payload)?;
                PooledPacket::Handshake(packet)
            }
            Opcode::Credentials => {
                let mut packet = self.rent_credentials();
                packet.read_payload(header.fields, payload)?;
                PooledPacket::Credentials(packet)
            }
            Opcode::Reply => {
                let mut packet = self.rent_reply();
                packet.read_payload(header.fields, payload)?;
                PooledPacket::Reply(packet)
            }
        })
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::packet::{CredentialIntent, Credentials};
    use crate::error::{ProtocolError, ReplyCode};

    #[test]
    fn test_pool_basic() {
        let pool: Pool<ReplyPacket> = Pool::new(10, 10);
        assert_eq!(pool.available(), 10);

        let mut reply = pool.rent();
        assert_eq!(pool.available(), 9);
        reply.message.push_str("hi");

        drop(reply);
        assert_eq!(pool.available(), 10);
    }

    #[test]
    fn test_returned_packet_is_wiped() {
        let pool: Pool<CredentialsPacket> = Pool::new(1, 1);
        {
            let mut packet = pool.rent();
            packet.intent = CredentialIntent::Register;
            packet.credentials = Some(Credentials::new("alice", "Secret1!"));
        }

        let reused = pool.rent();
        assert!(reused.credentials.is_none());
        assert_eq!(reused.intent, CredentialIntent::Login);
    }

    #[test]
    fn test_pool_empty_allocates() {
        let pool: Pool<HandshakePacket> = Pool::new(1, 1);
        let _a = pool.rent();
        let _b = pool.rent();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_max_idle_caps_free_list() {
        let pool: Pool<ReplyPacket> = Pool::new(0, 1);
        let a = pool.rent();
        let b = pool.rent();
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_detach_leaves_pool() {
        let pool: Pool<ReplyPacket> = Pool::new(1, 1);
        let mut reply = pool.rent();
        reply.message.push_str("keep me");
        let owned = reply.detach();
        assert_eq!(owned.message, "keep me");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_decode_into_rented_packet() {
        let pool = PacketPool::new(2, 2);
        let bytes = ReplyPacket::new(ReplyCode::PolicyRejected, "too short")
            .serialize()
            .unwrap();

        let decoded = pool.decode(&bytes).unwrap();
        assert_eq!(pool.available().2, 1);
        match &decoded {
            PooledPacket::Reply(reply) => {
                assert_eq!(reply.code, ReplyCode::PolicyRejected);
                assert_eq!(reply.message, "too short");
            }
            other => panic!("unexpected {other:?}"),
        }
        drop(decoded);
        assert_eq!(pool.available().2, 2);
    }

    #[test]
    fn test_failed_decode_returns_rental() {
        let pool = PacketPool::new(1, 1);
        let mut bytes = ReplyPacket::new(ReplyCode::Ok, "x").serialize().unwrap();
        // corrupt the reply code
        bytes[11] = 0x77;
        assert!(matches!(
            pool.decode(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
        assert_eq!(pool.available().2, 1);
    }
}
