//! Async transport driver.
//!
//! Frames a byte stream with [`PacketCodec`], feeds each frame to a [`Gateway`] and
//! writes back exactly one reply per frame. The connection's [`PeerLink`] is an mpsc
//! channel into the same task, so sends and disconnects issued from anywhere (for
//! example `Gateway::shutdown`) are applied in order with the replies.

use crate::core::codec::PacketCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::service::gateway::{AccountHandler, Gateway};
use crate::session::connection::{Connection, PeerLink};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

/// Outbound work for a stream task
#[derive(Debug)]
pub enum LinkCommand {
    Send(Vec<u8>),
    Disconnect(String),
}

/// [`PeerLink`] backed by the stream task's command channel
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl ChannelLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PeerLink for ChannelLink {
    fn send(&self, frame: &[u8]) -> Result<()> {
        self.tx
            .send(LinkCommand::Send(frame.to_vec()))
            .map_err(|_| ProtocolError::TransportError(constants::ERR_LINK_CLOSED.to_string()))
    }

    fn disconnect(&self, reason: &str) {
        // The task may already be gone; nothing left to tear down then
        let _ = self.tx.send(LinkCommand::Disconnect(reason.to_string()));
    }
}

/// Serve one peer until EOF, a framing error or a disconnect command.
///
/// The connection is admitted through [`Gateway::accept`] and closed on the way out,
/// which removes it from the registry.
///
/// # Errors
/// Admission errors, framing errors and I/O errors on the stream.
#[instrument(skip(gateway, stream), fields(remote = %remote))]
pub async fn serve_stream<A, S>(gateway: Arc<Gateway<A>>, remote: SocketAddr, stream: S) -> Result<()>
where
    A: AccountHandler,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (link, mut commands) = ChannelLink::new();
    let connection = Arc::new(Connection::new(remote, link));
    let mut framed = Framed::new(stream, PacketCodec);

    if let Err(err) = gateway.accept(connection.clone()) {
        let _ = framed.send(gateway.error_reply(&connection, &err)).await;
        return Err(err);
    }

    let result = drive(&gateway, &connection, &mut framed, &mut commands).await;
    connection.close();
    debug!(connection = %connection.id(), "Stream finished");
    result
}

async fn drive<A, S>(
    gateway: &Gateway<A>,
    connection: &Connection,
    framed: &mut Framed<S, PacketCodec>,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> Result<()>
where
    A: AccountHandler,
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    let reply = gateway.handle_frame(connection, &frame);
                    framed.send(reply).await?;
                }
                Some(Err(err)) => {
                    // The stream cannot be resynchronised; answer once and drop it
                    warn!(error = %err, "Framing error");
                    let _ = framed.send(gateway.error_reply(connection, &err)).await;
                    return Err(err);
                }
                None => return Ok(()),
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Send(bytes)) => framed.send(bytes).await?,
                Some(LinkCommand::Disconnect(reason)) => {
                    info!(connection = %connection.id(), %reason, "Disconnect requested");
                    return Ok(());
                }
                None => return Ok(()),
            },
        }
    }
}

/// Accept TCP peers until `shutdown_rx` fires, then disconnect everyone.
///
/// Waits up to `drain_timeout` for stream tasks to unregister after shutdown.
#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve_listener<A: AccountHandler>(
    gateway: Arc<Gateway<A>>,
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    drain_timeout: Duration,
) -> Result<()> {
    info!("Listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down listener");
                gateway.shutdown();

                let deadline = tokio::time::sleep(drain_timeout);
                tokio::pin!(deadline);
                while !gateway.registry().is_empty() {
                    tokio::select! {
                        _ = &mut deadline => {
                            warn!(remaining = gateway.registry().len(), "Drain timeout reached");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                    }
                }
                return Ok(());
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let gateway = gateway.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_stream(gateway, remote, stream).await {
                            debug!(error = %err, %remote, "Stream ended with error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "Accept failed");
                }
            },
        }
    }
}
