use std::sync::{Arc, Weak};

use crate::game::character::Character;
use crate::net::protocol::ServerMessage;
use crate::net::session::{Session, SessionId};
use crate::util::grid::Coordinate;

/// One of the two seats in a room
///
/// Slots live as long as their room and are only ever reset in place. The
/// session is observed, never owned: once its connection is gone the slot
/// reads as free.
#[derive(Debug, Default)]
pub struct Participant {
    observer: Weak<Session>,
    session_id: Option<SessionId>,
    pub character: Character,
    pub position: Coordinate,
}

impl Participant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound to a session that is still connected
    pub fn is_live(&self) -> bool {
        self.session_id.is_some()
            && self
                .observer
                .upgrade()
                .map(|session| !session.is_closed())
                .unwrap_or(false)
    }

    pub fn is_bound_to(&self, id: SessionId) -> bool {
        self.session_id == Some(id)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Seat `session` here with a fresh identity
    pub fn bind(&mut self, session: &Arc<Session>) {
        self.observer = Arc::downgrade(session);
        self.session_id = Some(session.id());
        self.reset_identity();
    }

    /// Free the seat
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn reset_identity(&mut self) {
        self.character = Character::Unset;
        self.position = Coordinate::ORIGIN;
    }

    /// Deliver to the seated session, if it is still around
    pub fn send(&self, message: ServerMessage) {
        if let Some(session) = self.observer.upgrade() {
            session.send(message);
        }
    }
}
