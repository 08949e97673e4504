//! # Connection Registry
//!
//! Live connections indexed by id. Every registered connection is removed exactly once:
//! either explicitly through [`ConnectionRegistry::unregister`], or automatically when
//! its termination event fires.

use crate::session::connection::{Connection, ConnectionId, SubscriptionId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, info, instrument};

struct Entry {
    connection: Arc<Connection>,
    subscription: SubscriptionId,
}

type Table = HashMap<ConnectionId, Entry>;

/// Cloneable handle to a shared connection table
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Table>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The table holds no invariant a panicking writer could break
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a connection until it closes.
    ///
    /// Returns `false` without changing anything if the id is already present or the
    /// connection has already closed.
    #[instrument(skip(self, connection), fields(connection = %connection.id()))]
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let id = connection.id();
        let mut table = self.write();
        if table.contains_key(&id) {
            debug!(remote = %connection.remote(), "Duplicate registration ignored");
            return false;
        }

        // A weak handle so the connection's own handler list does not keep the table alive
        let weak: Weak<RwLock<Table>> = Arc::downgrade(&self.inner);
        let subscription = connection.on_close(move |closed| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut table = inner.write().unwrap_or_else(|e| e.into_inner());
            // The id may have been re-registered by a different connection since
            let owned = table
                .get(&closed.id())
                .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(&entry.connection), closed));
            if owned {
                table.remove(&closed.id());
                debug!(connection = %closed.id(), "Closed connection unregistered");
            }
        });

        match subscription {
            Some(subscription) => {
                table.insert(
                    id,
                    Entry {
                        connection,
                        subscription,
                    },
                );
                true
            }
            None => {
                debug!("Connection closed before registration");
                false
            }
        }
    }

    /// Remove a connection and drop its close subscription
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let entry = self.write().remove(id);
        match entry {
            Some(entry) => {
                entry.connection.remove_close_handler(entry.subscription);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.read().get(id).map(|e| e.connection.clone())
    }

    pub fn exists(&self, id: &ConnectionId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Disconnect and forget every connection.
    ///
    /// The table is drained under the lock; connections are told to disconnect only
    /// after it is released.
    pub fn disconnect_all(&self, reason: &str) -> usize {
        let drained: Vec<Entry> = self.write().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();

        for entry in drained {
            entry.connection.remove_close_handler(entry.subscription);
            entry.connection.disconnect(reason);
        }

        info!(count, reason, "Disconnected all connections");
        count
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::connection::tests::{test_connection, RecordingLink};

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let conn = Arc::new(test_connection());
        let id = conn.id();

        assert!(registry.register(conn.clone()));
        assert!(registry.exists(&id));
        assert!(Arc::ptr_eq(&registry.lookup(&id).unwrap(), &conn));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from_bytes([7u8; 16]);
        let addr = "127.0.0.1:1".parse().unwrap();
        let first = Arc::new(Connection::with_id(id, addr, RecordingLink::default()));
        let second = Arc::new(Connection::with_id(id, addr, RecordingLink::default()));

        assert!(registry.register(first.clone()));
        assert!(!registry.register(second));
        assert!(Arc::ptr_eq(&registry.lookup(&id).unwrap(), &first));
    }

    #[test]
    fn test_close_removes_entry() {
        let registry = ConnectionRegistry::new();
        let conn = Arc::new(test_connection());
        registry.register(conn.clone());

        conn.close();
        assert!(!registry.exists(&conn.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_detaches_close_handler() {
        let registry = ConnectionRegistry::new();
        let conn = Arc::new(test_connection());
        registry.register(conn.clone());

        assert!(registry.unregister(&conn.id()));
        assert!(!registry.unregister(&conn.id()));

        // The connection can still be tracked elsewhere after being unregistered
        let other = ConnectionRegistry::new();
        other.register(conn.clone());
        conn.close();
        assert!(other.is_empty());
    }

    #[test]
    fn test_late_close_keeps_reregistered_id() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from_bytes([9u8; 16]);
        let addr = "127.0.0.1:2".parse().unwrap();
        let old = Arc::new(Connection::with_id(id, addr, RecordingLink::default()));
        let new = Arc::new(Connection::with_id(id, addr, RecordingLink::default()));

        // Runs before the registry's handler: the old entry is replaced mid-close
        let (r, replacement) = (registry.clone(), new.clone());
        old.on_close(move |_| {
            assert!(r.unregister(&id));
            assert!(r.register(replacement));
        });
        assert!(registry.register(old.clone()));

        old.close();
        let current = registry.lookup(&id).unwrap();
        assert!(Arc::ptr_eq(&current, &new));

        new.close();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_connection_not_registered() {
        let registry = ConnectionRegistry::new();
        let conn = Arc::new(test_connection());
        conn.close();
        assert!(!registry.register(conn));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_all() {
        let registry = ConnectionRegistry::new();
        let link = RecordingLink::default();
        let conns: Vec<_> = (0..3)
            .map(|i| {
                Arc::new(Connection::new(
                    format!("127.0.0.1:{}", 5000 + i).parse().unwrap(),
                    link.clone(),
                ))
            })
            .collect();
        for c in &conns {
            registry.register(c.clone());
        }
        // One connection is already closing
        conns[0].close();

        assert_eq!(registry.disconnect_all("shutdown"), 2);
        assert!(registry.is_empty());
        assert!(conns.iter().all(|c| c.is_closed()));
        assert_eq!(link.disconnects.lock().unwrap().len(), 2);
    }
}
