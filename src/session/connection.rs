//! # Connection
//!
//! One live transport session as seen by the core.
//!
//! A connection starts as a `Guest` with no session key. A successful handshake
//! publishes the key and the `User` permission level together through a `OnceLock`, so
//! concurrent readers observe either "guest, no key" or "user, final key", never a mix,
//! and a second publish is refused instead of overwriting the first.
//!
//! The termination event is a list of close handlers. `close` fires each handler exactly
//! once, however many threads race to close the connection.

use crate::config::SESSION_KEY_SIZE;
use crate::error::{ProtocolError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed-width opaque connection identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; 16]);

impl ConnectionId {
    pub const SIZE: usize = 16;

    /// A fresh random identity
    pub fn random() -> Self {
        Self(rand::random::<[u8; 16]>())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({self})")
    }
}

/// Symmetric key derived by the handshake; wiped on drop and never printed
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PermissionLevel {
    #[default]
    Guest,
    User,
}

/// Transport-side handle of a connection. The core never opens sockets itself.
pub trait PeerLink: Send + Sync {
    /// Queue a serialized frame for the peer
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Ask the transport to tear the connection down
    fn disconnect(&self, reason: &str);
}

/// Handle returned by [`Connection::on_close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type CloseHandler = Box<dyn FnOnce(&Connection) + Send>;

struct Authenticated {
    key: SessionKey,
    permission: PermissionLevel,
}

struct CloseState {
    closed: bool,
    handlers: Vec<(SubscriptionId, CloseHandler)>,
}

pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
    auth: OnceLock<Authenticated>,
    close: Mutex<CloseState>,
    next_subscription: AtomicU64,
    link: Box<dyn PeerLink>,
}

impl Connection {
    pub fn new(remote: SocketAddr, link: impl PeerLink + 'static) -> Self {
        Self::with_id(ConnectionId::random(), remote, link)
    }

    pub fn with_id(id: ConnectionId, remote: SocketAddr, link: impl PeerLink + 'static) -> Self {
        Self {
            id,
            remote,
            auth: OnceLock::new(),
            close: Mutex::new(CloseState {
                closed: false,
                handlers: Vec::new(),
            }),
            next_subscription: AtomicU64::new(0),
            link: Box::new(link),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.auth.get().map(|a| &a.key)
    }

    pub fn permission(&self) -> PermissionLevel {
        self.auth
            .get()
            .map(|a| a.permission)
            .unwrap_or(PermissionLevel::Guest)
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.get().is_some()
    }

    /// Publish the session key and elevate to `User` in one step.
    ///
    /// # Errors
    /// `HandshakeAlreadyCompleted` if a key was already published; the existing key
    /// and permission level are left untouched and `key` is wiped.
    pub fn authenticate(&self, key: SessionKey) -> Result<()> {
        self.auth
            .set(Authenticated {
                key,
                permission: PermissionLevel::User,
            })
            .map_err(|_rejected| ProtocolError::HandshakeAlreadyCompleted)
    }

    pub fn send(&self, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.link.send(frame)
    }

    /// Subscribe to the termination event.
    ///
    /// Returns `None` if the connection is already closed; the handler is dropped
    /// without being called.
    pub fn on_close<F>(&self, handler: F) -> Option<SubscriptionId>
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        let mut state = self.close.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return None;
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        state.handlers.push((id, Box::new(handler)));
        Some(id)
    }

    /// Remove a close handler; returns whether it was still registered
    pub fn remove_close_handler(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.close.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.handlers.len();
        state.handlers.retain(|(id, _)| *id != subscription);
        state.handlers.len() != before
    }

    pub fn is_closed(&self) -> bool {
        self.close.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Mark the connection closed and fire close handlers.
    ///
    /// Idempotent: only the first call observes `true` and runs the handlers.
    pub fn close(&self) -> bool {
        let handlers = {
            let mut state = self.close.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return false;
            }
            state.closed = true;
            std::mem::take(&mut state.handlers)
        };

        debug!(connection = %self.id, remote = %self.remote, "Connection closed");

        // Handlers run without the lock held so they may call back into this connection
        for (_, handler) in handlers {
            handler(self);
        }
        true
    }

    /// Ask the transport to disconnect, then close.
    ///
    /// Safe to call on a connection that is already closing.
    pub fn disconnect(&self, reason: &str) {
        if !self.is_closed() {
            self.link.disconnect(reason);
        }
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("permission", &self.permission())
            .field("closed", &self.is_closed())
            .finish()
    }
}
