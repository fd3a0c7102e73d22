use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::net::protocol::{decode, ClientMessage, DecodeError, ServerMessage};

pub type SessionId = Uuid;

/// Event delivered to a session's handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A decoded inbound message
    Message(ClientMessage),
    /// The connection is going away. Delivered exactly once, never on the wire.
    Closing,
}

/// Receives the events of one session, in order
pub trait SessionHandler: Send {
    fn handle(
        &mut self,
        session: &Arc<Session>,
        event: SessionEvent,
    ) -> impl Future<Output = ()> + Send;
}

/// One client connection as seen by the game layer
///
/// Owned by its connection task. Everything else (rooms) holds a `Weak`.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: Instant,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    closed: AtomicBool,
}

/// Consumer side of a session's outbound lane
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Session {
    pub fn new() -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            outbound: tx,
            closed: AtomicBool::new(false),
        });
        (session, OutboundQueue { rx })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a message for the writer. No-op once closed.
    pub fn send(&self, message: ServerMessage) {
        if self.is_closed() {
            trace!(session = %self.id, "Dropping outbound message on closed session");
            return;
        }
        // The writer only goes away together with the connection
        let _ = self.outbound.send(message);
    }

    /// Decode one inbound payload and hand it to `handler`
    ///
    /// Malformed payloads are logged and dropped; the connection survives.
    pub async fn on_inbound<H: SessionHandler>(
        self: &Arc<Self>,
        handler: &mut H,
        payload: &[u8],
    ) -> Result<(), DecodeError> {
        if self.is_closed() {
            return Ok(());
        }
        match decode::<ClientMessage>(payload) {
            Ok(message) => {
                handler.handle(self, SessionEvent::Message(message)).await;
                Ok(())
            }
            Err(e) => {
                debug!(session = %self.id, "Discarding malformed payload: {}", e);
                Err(e)
            }
        }
    }

    /// Deliver `Closing` to `handler` once; later calls do nothing
    pub async fn close<H: SessionHandler>(self: &Arc<Self>, handler: &mut H) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        handler.handle(self, SessionEvent::Closing).await;
    }
}

impl OutboundQueue {
    /// Next message to transmit, `None` once the session is gone
    pub async fn next(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Everything queued so far
    #[cfg(test)]
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<SessionEvent>,
    }

    impl SessionHandler for Recorder {
        async fn handle(&mut self, _session: &Arc<Session>, event: SessionEvent) {
            self.events.push(event);
        }
    }

    #[test]
    fn test_session_ids_unique() {
        let (a, _) = Session::new();
        let (b, _) = Session::new();
        assert_ne!(a.id(), b.id());
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn test_outbound_fifo() {
        let (session, mut queue) = Session::new();
        for i in 0..5 {
            session.send(ServerMessage::Chat { msg: i.to_string() });
        }
        for i in 0..5 {
            assert_eq!(queue.next().await, Some(ServerMessage::Chat { msg: i.to_string() }));
        }
    }

    #[tokio::test]
    async fn test_queue_ends_when_session_dropped() {
        let (session, mut queue) = Session::new();
        session.send(ServerMessage::LobbyOtherJoined);
        drop(session);
        assert_eq!(queue.next().await, Some(ServerMessage::LobbyOtherJoined));
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_inbound_forwards_decoded_message() {
        let (session, _queue) = Session::new();
        let mut handler = Recorder::default();

        session
            .on_inbound(&mut handler, br#"{"type":"lobbyJoin","code":"ABC123"}"#)
            .await
            .unwrap();
        assert_eq!(
            handler.events,
            vec![SessionEvent::Message(ClientMessage::LobbyJoin { code: "ABC123".into() })]
        );
    }

    #[tokio::test]
    async fn test_malformed_inbound_not_delivered() {
        let (session, _queue) = Session::new();
        let mut handler = Recorder::default();

        assert!(session.on_inbound(&mut handler, b"{\"type\":").await.is_err());
        assert!(session.on_inbound(&mut handler, br#"{"type":"fly"}"#).await.is_err());
        assert!(handler.events.is_empty());
    }

    #[tokio::test]
    async fn test_close_delivers_closing_once() {
        let (session, mut queue) = Session::new();
        let mut handler = Recorder::default();

        session.close(&mut handler).await;
        session.close(&mut handler).await;
        assert_eq!(handler.events, vec![SessionEvent::Closing]);
        assert!(session.is_closed());

        // Sends and inbound after close are no-ops
        session.send(ServerMessage::LobbyOtherLeft);
        assert!(queue.drain().is_empty());
        session
            .on_inbound(&mut handler, br#"{"type":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(handler.events.len(), 1);
    }
}
