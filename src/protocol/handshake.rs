//! Ephemeral x25519 key exchange.
//!
//! The client sends a Handshake packet carrying its 32-byte public key. The server
//! answers with its own public key and both sides derive the session key as
//! `SHA-256(shared_secret)`. A fresh key pair is generated for every exchange and
//! secret material is zeroized as soon as the key is derived.
//!
//! On the server a connection can complete the exchange once. The derived key and the
//! `User` permission level are published together, so a replayed or concurrent second
//! handshake can never swap the key of a live session.

use crate::config::{PUBLIC_KEY_SIZE, SESSION_KEY_SIZE};
use crate::core::packet::{HandshakePacket, Packet};
use crate::error::{ProtocolError, Result};
use crate::session::connection::{Connection, SessionKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::Zeroize;

use tracing::{debug, instrument, warn};

/// Client-side secret kept between sending the request and reading the reply
pub struct ClientHandshakeState {
    secret: EphemeralSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl ClientHandshakeState {
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }
}

impl std::fmt::Debug for ClientHandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshakeState")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Validate a peer public key field and return it as a fixed array
fn peer_public_key(packet: &HandshakePacket) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    let key = packet.public_key().ok_or(ProtocolError::NullPayload)?;
    key.try_into().map_err(|_| ProtocolError::InvalidKeyLength {
        expected: PUBLIC_KEY_SIZE,
        actual: key.len(),
    })
}

/// Derive the session key; the intermediate digest is wiped
fn derive_session_key(shared: &SharedSecret) -> SessionKey {
    let mut digest: [u8; SESSION_KEY_SIZE] = Sha256::digest(shared.as_bytes()).into();
    let key = SessionKey::from_bytes(digest);
    digest.zeroize();
    key
}

/// Run the server side of the exchange for `connection`.
///
/// Checks run in a fixed order and the first failure wins:
/// 1. `WrongPacketType` if `packet` is not a Handshake
/// 2. `HandshakeAlreadyCompleted` if the connection already holds a key
/// 3. `NullPayload` if the packet carries no key
/// 4. `InvalidKeyLength` if the key is not 32 bytes
///
/// A low-order client key yields `HandshakeProcessingFailed`. No failure changes the
/// connection.
///
/// # Returns
/// The Handshake reply carrying the server public key
#[instrument(skip(packet, connection), fields(connection = %connection.id(), remote = %connection.remote()))]
pub fn perform_handshake(packet: &Packet, connection: &Connection) -> Result<HandshakePacket> {
    let Packet::Handshake(request) = packet else {
        return Err(ProtocolError::WrongPacketType);
    };

    if connection.is_authenticated() {
        warn!("Handshake attempted on an authenticated connection");
        return Err(ProtocolError::HandshakeAlreadyCompleted);
    }

    let client_public = PublicKey::from(peer_public_key(request)?);

    let server_secret = EphemeralSecret::random_from_rng(OsRng);
    let server_public = PublicKey::from(&server_secret);
    let shared = server_secret.diffie_hellman(&client_public);

    if !shared.was_contributory() {
        warn!("Rejected non-contributory client key");
        return Err(ProtocolError::HandshakeProcessingFailed);
    }

    // Loses cleanly to a concurrent handshake that published first
    connection.authenticate(derive_session_key(&shared))?;
    drop(shared);

    debug!("Handshake completed");
    Ok(HandshakePacket::with_public_key(server_public.to_bytes()))
}

/// Start a client exchange: a fresh key pair and the request packet to send
#[instrument]
pub fn client_handshake_init() -> (ClientHandshakeState, HandshakePacket) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret).to_bytes();

    debug!("Client initiating handshake");
    (
        ClientHandshakeState { secret, public },
        HandshakePacket::with_public_key(public),
    )
}

/// Finish a client exchange with the server's Handshake reply.
///
/// # Errors
/// `NullPayload` or `InvalidKeyLength` for a bad server key field, and
/// `HandshakeProcessingFailed` for a low-order server key.
#[instrument(skip_all)]
pub fn client_complete_handshake(
    state: ClientHandshakeState,
    reply: &HandshakePacket,
) -> Result<SessionKey> {
    let server_public = PublicKey::from(peer_public_key(reply)?);
    let shared = state.secret.diffie_hellman(&server_public);
    if !shared.was_contributory() {
        return Err(ProtocolError::HandshakeProcessingFailed);
    }

    debug!("Client derived session key");
    Ok(derive_session_key(&shared))
}
