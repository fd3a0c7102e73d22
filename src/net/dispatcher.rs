//! Per-session routing between the registry and the bound room

use std::sync::Arc;

use tracing::{debug, trace};

use crate::lobby::manager::{RegistryError, RoomRegistry};
use crate::lobby::room::RoomHandle;
use crate::net::protocol::{ClientMessage, ServerMessage};
use crate::net::session::{Session, SessionEvent, SessionHandler};

/// Routes one session's events
///
/// Outside a room only create/join do anything. Inside, everything except
/// leaving is forwarded to the room's lane. No game rules live here.
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    room: Option<RoomHandle>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry, room: None }
    }

    /// Room this session is currently bound to
    pub fn room(&self) -> Option<&RoomHandle> {
        self.room.as_ref()
    }

    fn enter(&mut self, session: &Session, result: Result<RoomHandle, RegistryError>) {
        match result {
            Ok(handle) => {
                debug!(session = %session.id(), room = %handle.code(), "Bound to room");
                self.room = Some(handle);
            }
            Err(e) => {
                debug!(session = %session.id(), "Room request failed: {}", e);
                session.send(ServerMessage::join_failed());
            }
        }
    }

    async fn leave(&mut self, session: &Session) {
        if let Some(room) = self.room.take() {
            room.leave(session.id()).await;
        }
    }
}

impl SessionHandler for Dispatcher {
    async fn handle(&mut self, session: &Arc<Session>, event: SessionEvent) {
        let message = match event {
            SessionEvent::Closing => return self.leave(session).await,
            SessionEvent::Message(message) => message,
        };

        match message {
            ClientMessage::Ping => {}
            ClientMessage::LobbyCreate | ClientMessage::LobbyJoin { .. } if self.room.is_some() => {
                trace!(session = %session.id(), "Already in a room");
            }
            ClientMessage::LobbyCreate => {
                let result = self.registry.create(session).await;
                self.enter(session, result);
            }
            ClientMessage::LobbyJoin { code } => {
                let result = self.registry.find_and_join(&code, session).await;
                self.enter(session, result);
            }
            ClientMessage::LobbyLeave => self.leave(session).await,
            message => match &self.room {
                Some(room) => room.message(session.id(), message),
                None => trace!(session = %session.id(), ?message, "Not in a room"),
            },
        }
    }
}
