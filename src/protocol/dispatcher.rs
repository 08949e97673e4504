use crate::core::header::Opcode;
use crate::core::packet::Packet;
use crate::core::pool::PooledPacket;
use crate::error::{constants, ProtocolError, Result};
use crate::session::connection::Connection;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Connection, &mut PooledPacket) -> Result<Packet> + Send + Sync + 'static;

/// Routes a decoded packet to the handler registered for its opcode.
///
/// Handlers receive the pooled packet mutably so they can transform it in place; the
/// rental is returned to the pool when the caller drops it.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Opcode, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) the handler for `opcode`
    pub fn register<F>(&self, opcode: Opcode, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &mut PooledPacket) -> Result<Packet> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(opcode, Box::new(handler));
        Ok(())
    }

    /// Run the handler for the packet's opcode.
    ///
    /// # Errors
    /// `WrongPacketType` if no handler accepts this kind of packet, otherwise whatever
    /// the handler returns.
    pub fn dispatch(&self, connection: &Connection, packet: &mut PooledPacket) -> Result<Packet> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        handlers
            .get(&packet.opcode())
            .ok_or(ProtocolError::WrongPacketType)
            .and_then(|handler| handler(connection, packet))
    }

    pub fn handles(&self, opcode: Opcode) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&opcode))
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::{Frame, ReplyPacket};
    use crate::core::pool::PacketPool;
    use crate::error::ReplyCode;
    use crate::session::connection::tests::test_connection;

    #[test]
    fn test_routes_by_opcode() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(Opcode::Reply, |_, packet| match packet {
                PooledPacket::Reply(reply) => {
                    Ok(ReplyPacket::new(reply.code, format!("echo {}", reply.message)).into())
                }
                _ => Err(ProtocolError::WrongPacketType),
            })
            .unwrap();
        assert!(dispatcher.handles(Opcode::Reply));
        assert!(!dispatcher.handles(Opcode::Handshake));

        let pool = PacketPool::new(1, 1);
        let bytes = ReplyPacket::new(ReplyCode::Ok, "hi").serialize().unwrap();
        let mut packet = pool.decode(&bytes).unwrap();
        let conn = test_connection();

        match dispatcher.dispatch(&conn, &mut packet).unwrap() {
            Packet::Reply(reply) => assert_eq!(reply.message, "echo hi"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unregistered_opcode() {
        let dispatcher = Dispatcher::default();
        let pool = PacketPool::new(1, 1);
        let bytes = ReplyPacket::new(ReplyCode::Ok, "").serialize().unwrap();
        let mut packet = pool.decode(&bytes).unwrap();
        assert!(matches!(
            dispatcher.dispatch(&test_connection(), &mut packet),
            Err(ProtocolError::WrongPacketType)
        ));
    }
}
