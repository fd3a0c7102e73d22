//! WebSocket server
//!
//! One task per connection runs the read loop and the session's dispatcher;
//! a second task drains the session's outbound lane into the socket.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::ServerConfig;
use crate::lobby::manager::RoomRegistry;
use crate::metrics::Metrics;
use crate::net::dispatcher::Dispatcher;
use crate::net::dos_protection::{ConnectionLimiter, DoSConfig};
#[cfg(feature = "dos_ratelimit")]
use crate::net::dos_protection::MessageRateLimiter;
use crate::net::protocol::encode;
use crate::net::session::{OutboundQueue, Session};

/// How long a closing connection may spend flushing queued messages
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket game server
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    limiter: Arc<Mutex<ConnectionLimiter>>,
    dos_config: DoSConfig,
    metrics: Arc<Metrics>,
}

impl GameServer {
    pub fn new(config: ServerConfig, registry: Arc<RoomRegistry>, metrics: Arc<Metrics>) -> Self {
        let dos_config = DoSConfig::from_server_config(&config);
        Self {
            limiter: Arc::new(Mutex::new(ConnectionLimiter::new(dos_config.clone()))),
            config,
            registry,
            dos_config,
            metrics,
        }
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Bind and run the server
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        tracing::info!("WebSocket server listening on ws://{}", self.bind_addr());
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.limiter.lock().register_connection(peer.ip()) {
                tracing::warn!("Connection from {} rejected: {}", peer, e);
                self.metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let registry = self.registry.clone();
            let limiter = self.limiter.clone();
            let dos_config = self.dos_config.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, registry, dos_config, metrics).await {
                    tracing::debug!("Connection error from {}: {}", peer, e);
                }
                limiter.lock().unregister_connection(peer.ip());
            });
        }
    }
}

/// Errors after which the socket is unusable
fn is_fatal(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) | WsError::Protocol(_)
    )
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RoomRegistry>,
    #[cfg_attr(not(feature = "dos_ratelimit"), allow(unused_variables))] dos_config: DoSConfig,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut frames) = ws.split();

    let (session, outbound) = Session::new();
    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(session = %session.id(), "Connection accepted from {}", peer);

    let writer = tokio::spawn(write_loop(sink, outbound, metrics.clone()));
    let mut dispatcher = Dispatcher::new(registry);
    #[cfg(feature = "dos_ratelimit")]
    let mut rate_limiter = MessageRateLimiter::new(&dos_config);

    while let Some(frame) = frames.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) if is_fatal(&e) => {
                tracing::debug!(session = %session.id(), "Read failed: {}", e);
                break;
            }
            Err(e) => {
                tracing::warn!(session = %session.id(), "Bad frame: {}", e);
                continue;
            }
        };

        let payload: &[u8] = match &message {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data.as_slice(),
            Message::Close(_) => break,
            _ => continue,
        };
        metrics.record_received(payload.len());

        #[cfg(feature = "dos_ratelimit")]
        if let Err(e) = rate_limiter.check_message(payload.len()) {
            if e.is_fatal() {
                tracing::warn!(session = %session.id(), "Disconnecting {}: {}", peer, e);
                break;
            }
            tracing::debug!(session = %session.id(), "Dropping message: {}", e);
            continue;
        }

        if session.on_inbound(&mut dispatcher, payload).await.is_err() {
            metrics.malformed_payloads.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Runs the implicit leave before the room can see the observer expire
    session.close(&mut dispatcher).await;
    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(
        session = %session.id(),
        age_secs = session.age().as_secs(),
        "Connection closed"
    );
    drop(session);

    let mut writer = writer;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    Ok(())
}

/// Drain `outbound` into `sink`, one message in flight at a time
async fn write_loop<S>(mut sink: S, mut outbound: OutboundQueue, metrics: Arc<Metrics>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(message) = outbound.next().await {
        let text = match encode(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to encode {:?}: {}", message, e);
                continue;
            }
        };

        let len = text.len();
        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::debug!("Write failed: {}", e);
            break;
        }
        metrics.record_sent(len);
    }

    let _ = sink.close().await;
}
