//! # Gateway
//!
//! Server-side composition of the session layer: admission into the registry, frame
//! decoding through the pool, opcode dispatch and one reply per frame.
//!
//! Every failure is turned into a Reply packet; the peer never gets silence and never
//! gets more than one answer for a frame. Crypto failures are reported with a single
//! opaque code so a peer cannot tell which step rejected its payload.

use crate::config::SessionConfig;
use crate::core::header::Opcode;
use crate::core::packet::{CredentialIntent, Credentials, Frame, Packet, ReplyPacket};
use crate::core::pool::{PacketPool, PooledPacket};
use crate::error::{ErrorCategory, ProtocolError, ReplyCode, Result};
use crate::policy::{evaluate_password, evaluate_username, Verdict};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::perform_handshake;
use crate::protocol::pipeline::CredentialPipeline;
use crate::session::connection::Connection;
use crate::session::registry::ConnectionRegistry;
use crate::utils::metrics::{Metrics, Timer};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of an account operation, sent back to the peer as a Reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Granted(String),
    Denied(String),
}

impl AccountOutcome {
    pub fn into_reply(self) -> ReplyPacket {
        match self {
            AccountOutcome::Granted(message) => ReplyPacket::new(ReplyCode::Ok, message),
            AccountOutcome::Denied(message) => ReplyPacket::new(ReplyCode::AccountDenied, message),
        }
    }
}

/// Application hook that receives credentials once they are decrypted and, for
/// `Register`/`ChangePassword`, have passed the credential policy.
pub trait AccountHandler: Send + Sync + 'static {
    fn handle(
        &self,
        connection: &Connection,
        intent: CredentialIntent,
        credentials: &Credentials,
    ) -> AccountOutcome;
}

impl<F> AccountHandler for F
where
    F: Fn(&Connection, CredentialIntent, &Credentials) -> AccountOutcome + Send + Sync + 'static,
{
    fn handle(
        &self,
        connection: &Connection,
        intent: CredentialIntent,
        credentials: &Credentials,
    ) -> AccountOutcome {
        self(connection, intent, credentials)
    }
}

pub struct Gateway<A: AccountHandler> {
    config: SessionConfig,
    registry: ConnectionRegistry,
    pool: PacketPool,
    pipeline: CredentialPipeline,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    accounts: Arc<A>,
}

impl<A: AccountHandler> Gateway<A> {
    /// Build a gateway from a validated configuration.
    ///
    /// # Errors
    /// `ConfigError` if the configuration fails strict validation.
    pub fn new(config: SessionConfig, accounts: A) -> Result<Self> {
        config.validate_strict()?;

        let metrics = Arc::new(Metrics::new());
        let accounts = Arc::new(accounts);
        let pipeline = CredentialPipeline::from_config(&config.pipeline);
        let dispatcher = Dispatcher::new();

        let handshake_metrics = metrics.clone();
        dispatcher.register(Opcode::Handshake, move |connection, packet| {
            handshake_metrics.handshake_attempt();
            match perform_handshake(&packet.to_packet(), connection) {
                Ok(reply) => {
                    handshake_metrics.handshake_success();
                    Ok(reply.into())
                }
                Err(err) => {
                    handshake_metrics.handshake_failed();
                    Err(err)
                }
            }
        })?;

        let credential_metrics = metrics.clone();
        let handler = accounts.clone();
        dispatcher.register(Opcode::Credentials, move |connection, packet| {
            handle_credentials(
                &pipeline,
                &credential_metrics,
                handler.as_ref(),
                connection,
                packet,
            )
        })?;

        Ok(Self {
            pool: PacketPool::from_config(&config.pool),
            config,
            registry: ConnectionRegistry::new(),
            pipeline,
            dispatcher,
            metrics,
            accounts,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn pipeline(&self) -> &CredentialPipeline {
        &self.pipeline
    }

    pub fn accounts(&self) -> &A {
        &self.accounts
    }

    /// Admit a connection into the registry.
    ///
    /// # Errors
    /// `ConnectionLimit` once `max_connections` are live, `DuplicateConnection` if the
    /// id is already registered and `ConnectionClosed` if it closed before admission.
    #[instrument(skip_all, fields(connection = %connection.id(), remote = %connection.remote()))]
    pub fn accept(&self, connection: Arc<Connection>) -> Result<()> {
        let max = self.config.server.max_connections;
        if self.registry.len() >= max {
            self.metrics.connection_refused();
            warn!(max, "Connection limit reached");
            return Err(ProtocolError::ConnectionLimit(max));
        }

        if !self.registry.register(connection.clone()) {
            self.metrics.connection_refused();
            if connection.is_closed() {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Err(ProtocolError::DuplicateConnection(connection.id().to_string()));
        }

        self.metrics.connection_accepted();
        info!("Connection accepted");
        Ok(())
    }

    /// Process one inbound frame and return the serialized reply
    #[instrument(skip_all, fields(connection = %connection.id(), remote = %connection.remote(), len = frame.len()))]
    pub fn handle_frame(&self, connection: &Connection, frame: &[u8]) -> Vec<u8> {
        let _timer = Timer::start("handle_frame");
        self.metrics.frame_received(frame.len() as u64);

        let reply = match self.process(connection, frame) {
            Ok(reply) => self.encode(&reply),
            Err(err) => self.error_reply(connection, &err),
        };
        self.metrics.reply_sent();
        reply
    }

    fn process(&self, connection: &Connection, frame: &[u8]) -> Result<Packet> {
        let mut packet = self.pool.decode(frame)?;
        self.dispatcher.dispatch(connection, &mut packet)
    }

    /// Serialized Reply for a failed frame from `connection`
    pub fn error_reply(&self, connection: &Connection, err: &ProtocolError) -> Vec<u8> {
        let category = err.category();
        match category {
            ErrorCategory::Crypto => self.metrics.crypto_failure(),
            ErrorCategory::Protocol => self.metrics.protocol_error(),
            ErrorCategory::State | ErrorCategory::Local => {}
        }
        warn!(
            connection = %connection.id(),
            remote = %connection.remote(),
            category = category.as_str(),
            error = %err,
            "Frame rejected"
        );

        let mut reply = self.pool.rent_reply();
        reply.code = err.reply_code();
        reply.message = err.reply_message();
        match reply.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode error reply");
                internal_reply()
            }
        }
    }

    fn encode(&self, reply: &Packet) -> Vec<u8> {
        match reply.serialize() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, opcode = reply.opcode().name(), "Failed to encode reply");
                internal_reply()
            }
        }
    }

    /// Disconnect every registered connection with the configured reason
    pub fn shutdown(&self) -> usize {
        let count = self
            .registry
            .disconnect_all(&self.config.server.shutdown_reason);
        self.metrics.log_metrics();
        count
    }
}

fn internal_reply() -> Vec<u8> {
    ReplyPacket::new(ReplyCode::Internal, ReplyCode::Internal.default_message())
        .serialize()
        .unwrap_or_default()
}

fn handle_credentials<A: AccountHandler>(
    pipeline: &CredentialPipeline,
    metrics: &Metrics,
    accounts: &A,
    connection: &Connection,
    packet: &mut PooledPacket,
) -> Result<Packet> {
    let PooledPacket::Credentials(packet) = packet else {
        return Err(ProtocolError::WrongPacketType);
    };

    let key = connection
        .session_key()
        .ok_or(ProtocolError::NotAuthenticated)?;
    pipeline.unprotect(packet, key)?;
    metrics.credentials_unprotected();

    let intent = packet.intent;
    let credentials = packet
        .credentials
        .as_ref()
        .ok_or(ProtocolError::NullCredentials)?;

    if intent.sets_credentials() {
        let verdict = match intent {
            CredentialIntent::Register => match evaluate_username(Some(credentials.username.as_str())) {
                Verdict::Accepted => evaluate_password(Some(credentials.password.as_str())),
                rejected => rejected,
            },
            _ => evaluate_password(Some(credentials.password.as_str())),
        };
        if let Verdict::Rejected(violation) = verdict {
            metrics.policy_rejection();
            info!(connection = %connection.id(), ?intent, %violation, "Credentials rejected by policy");
            return Ok(ReplyPacket::new(ReplyCode::PolicyRejected, violation.to_string()).into());
        }
    }

    Ok(accounts.handle(connection, intent, credentials).into_reply().into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::packet::CredentialsPacket;
    use crate::protocol::handshake::{client_complete_handshake, client_handshake_init};
    use crate::session::connection::tests::test_connection;
    use crate::core::packet::HandshakePacket;
    use crate::session::SessionKey;
    use std::sync::Mutex;

    type AcceptAll = fn(&Connection, CredentialIntent, &Credentials) -> AccountOutcome;

    fn accept_all(_: &Connection, intent: CredentialIntent, creds: &Credentials) -> AccountOutcome {
        AccountOutcome::Granted(format!("{intent:?} {}", creds.username))
    }

    fn gateway() -> Gateway<AcceptAll> {
        Gateway::new(SessionConfig::default(), accept_all as AcceptAll).unwrap()
    }

    fn reply(bytes: &[u8]) -> ReplyPacket {
        match Packet::deserialize(bytes).unwrap() {
            Packet::Reply(reply) => reply,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    fn handshake<A: AccountHandler>(gw: &Gateway<A>, conn: &Connection) -> SessionKey {
        let (state, request) = client_handshake_init();
        let out = gw.handle_frame(conn, &request.serialize().unwrap());
        match Packet::deserialize(&out).unwrap() {
            Packet::Handshake(hs) => client_complete_handshake(state, &hs).unwrap(),
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    fn credentials_frame(
        key: &SessionKey,
        intent: CredentialIntent,
        username: &str,
        password: &str,
    ) -> Vec<u8> {
        let mut packet = CredentialsPacket::new(intent, Credentials::new(username, password));
        CredentialPipeline::default().protect(&mut packet, key).unwrap();
        packet.serialize().unwrap()
    }

    #[test]
    fn test_login_after_handshake() {
        let gw = gateway();
        let conn = test_connection();
        let key = handshake(&gw, &conn);

        let frame = credentials_frame(&key, CredentialIntent::Login, "bob", "whatever");
        let r = reply(&gw.handle_frame(&conn, &frame));
        assert_eq!(r.code, ReplyCode::Ok);
        assert_eq!(r.message, "Login bob");
    }

    #[test]
    fn test_credentials_before_handshake() {
        let gw = gateway();
        let conn = test_connection();
        let key = SessionKey::from_bytes([1; 32]);
        let frame = credentials_frame(&key, CredentialIntent::Login, "bob", "x");
        let r = reply(&gw.handle_frame(&conn, &frame));
        assert_eq!(r.code, ReplyCode::NotAuthenticated);
    }

    #[test]
    fn test_weak_password_rejected_by_policy() {
        let gw = gateway();
        let conn = test_connection();
        let key = handshake(&gw, &conn);

        let frame = credentials_frame(&key, CredentialIntent::Register, "new_user", "P@ssw0rd1!");
        let r = reply(&gw.handle_frame(&conn, &frame));
        assert_eq!(r.code, ReplyCode::PolicyRejected);
        assert_eq!(gw.metrics().snapshot().policy_rejections, 1);
    }

    #[test]
    fn test_wrong_key_is_opaque_crypto_failure() {
        let gw = gateway();
        let conn = test_connection();
        handshake(&gw, &conn);

        let frame = credentials_frame(
            &SessionKey::from_bytes([3; 32]),
            CredentialIntent::Login,
            "bob",
            "pw",
        );
        let r = reply(&gw.handle_frame(&conn, &frame));
        assert_eq!(r.code, ReplyCode::CryptoFailure);
        assert_eq!(r.message, ReplyCode::CryptoFailure.default_message());
    }

    #[test]
    fn test_garbage_gets_one_reply() {
        let gw = gateway();
        let conn = test_connection();
        let r = reply(&gw.handle_frame(&conn, b"not a packet at all"));
        assert_eq!(r.code, ReplyCode::ProtocolMismatch);
        assert_eq!(gw.metrics().snapshot().replies_sent, 1);
    }

    #[test]
    fn test_reply_packets_are_not_accepted() {
        let gw = gateway();
        let conn = test_connection();
        let frame = ReplyPacket::new(ReplyCode::Ok, "hi").serialize().unwrap();
        let r = reply(&gw.handle_frame(&conn, &frame));
        assert_eq!(r.code, ReplyCode::WrongPacketType);
    }

    #[test]
    fn test_accept_limits() {
        let config = SessionConfig::default_with_overrides(|c| c.server.max_connections = 1);
        let gw = Gateway::new(config, accept_all as AcceptAll).unwrap();

        let first = Arc::new(test_connection());
        gw.accept(first.clone()).unwrap();
        assert!(matches!(
            gw.accept(first.clone()),
            Err(ProtocolError::ConnectionLimit(1))
        ));

        first.close();
        let second = Arc::new(test_connection());
        gw.accept(second.clone()).unwrap();
        assert!(matches!(
            gw.accept(Arc::new(test_connection())),
            Err(ProtocolError::ConnectionLimit(1))
        ));
        assert_eq!(gw.shutdown(), 1);
        assert!(second.is_closed());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logged_while(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_rejected_handshake_logs_remote_and_category() {
        let gw = gateway();
        let conn = test_connection();
        let frame = HandshakePacket::with_public_key(vec![7u8; 31]).serialize().unwrap();

        let out = logged_while(|| {
            gw.handle_frame(&conn, &frame);
        });
        assert!(out.contains("Frame rejected"), "{out}");
        assert!(out.contains("127.0.0.1:4000"), "{out}");
        assert!(out.contains("category=\"protocol\""), "{out}");
    }

    #[test]
    fn test_crypto_rejection_logs_remote_and_category() {
        let gw = gateway();
        let conn = test_connection();
        handshake(&gw, &conn);
        let frame = credentials_frame(
            &SessionKey::from_bytes([5; 32]),
            CredentialIntent::Login,
            "bob",
            "pw",
        );

        let out = logged_while(|| {
            gw.handle_frame(&conn, &frame);
        });
        assert!(out.contains("127.0.0.1:4000"), "{out}");
        assert!(out.contains("category=\"crypto\""), "{out}");
    }

    #[test]
    fn test_duplicate_accept() {
        let gw = gateway();
        let conn = Arc::new(test_connection());
        gw.accept(conn.clone()).unwrap();
        assert!(matches!(
            gw.accept(conn),
            Err(ProtocolError::DuplicateConnection(_))
        ));
    }
}
