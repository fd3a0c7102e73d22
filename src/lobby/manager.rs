use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::game::constants::code;
use crate::lobby::room::{MazeSize, Room, RoomError, RoomHandle};
use crate::metrics::Metrics;
use crate::net::session::Session;

/// Six-character join code drawn from `[0-9A-Z]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code = (0..code::LENGTH)
            .map(|_| code::ALPHABET[rng.gen_range(0..code::ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalize user input (trim, upper-case) and check its shape
    pub fn parse(input: &str) -> Option<Self> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == code::LENGTH
            && code.bytes().all(|b| code::ALPHABET.contains(&b));
        valid.then_some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide map of open rooms by join code
///
/// The lock only guards map operations and is never held across an await.
/// Rooms remove themselves through `evict` once their last occupant leaves.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomCode, RoomHandle>>,
    max_rooms: usize,
    maze_size: MazeSize,
    metrics: Arc<Metrics>,
    shutting_down: AtomicBool,
    this: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(config: &ServerConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        Self::with_limits(config.max_rooms, config.maze_size(), metrics)
    }

    pub fn with_limits(max_rooms: usize, maze_size: MazeSize, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            rooms: Mutex::new(HashMap::new()),
            max_rooms,
            maze_size,
            metrics,
            shutting_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Open a room under a fresh code and seat `session` in it
    pub async fn create(&self, session: &Arc<Session>) -> Result<RoomHandle, RegistryError> {
        let handle = {
            let mut rooms = self.rooms.lock();
            if rooms.len() >= self.max_rooms {
                return Err(RegistryError::TooManyRooms);
            }

            let mut rng = rand::thread_rng();
            let code = loop {
                let code = RoomCode::generate(&mut rng);
                if !rooms.contains_key(&code) {
                    break code;
                }
            };
            self.open_locked(&mut rooms, code)
        };

        self.seat_creator(handle, session).await
    }

    /// Open a room under a caller-chosen code
    pub async fn create_with_code(
        &self,
        code: RoomCode,
        session: &Arc<Session>,
    ) -> Result<RoomHandle, RegistryError> {
        let handle = {
            let mut rooms = self.rooms.lock();
            if rooms.contains_key(&code) {
                return Err(RegistryError::CodeInUse);
            }
            if rooms.len() >= self.max_rooms {
                return Err(RegistryError::TooManyRooms);
            }
            self.open_locked(&mut rooms, code)
        };

        self.seat_creator(handle, session).await
    }

    fn open_locked(&self, rooms: &mut HashMap<RoomCode, RoomHandle>, code: RoomCode) -> RoomHandle {
        let room = Room::new(code.clone(), self.maze_size, self.this.clone(), self.metrics.clone());
        let handle = RoomHandle::spawn(room);
        rooms.insert(code.clone(), handle.clone());

        self.metrics.rooms_created.fetch_add(1, Ordering::Relaxed);
        self.metrics.rooms_active.store(rooms.len() as u64, Ordering::Relaxed);
        info!(room = %code, "Room created");
        handle
    }

    async fn seat_creator(
        &self,
        handle: RoomHandle,
        session: &Arc<Session>,
    ) -> Result<RoomHandle, RegistryError> {
        if let Err(e) = handle.join(session).await {
            // Nobody else knows the code yet
            let mut rooms = self.rooms.lock();
            rooms.remove(handle.code());
            self.metrics.rooms_active.store(rooms.len() as u64, Ordering::Relaxed);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Join the room behind `code` (case and surrounding whitespace ignored)
    pub async fn find_and_join(
        &self,
        code: &str,
        session: &Arc<Session>,
    ) -> Result<RoomHandle, RegistryError> {
        let code = RoomCode::parse(code).ok_or(RegistryError::RoomNotFound)?;
        let handle = self
            .rooms
            .lock()
            .get(&code)
            .cloned()
            .ok_or(RegistryError::RoomNotFound)?;

        handle.join(session).await?;
        Ok(handle)
    }

    /// Drop an abandoned room. Called from the room's own lane.
    pub fn evict(&self, code: &RoomCode) {
        let mut rooms = self.rooms.lock();
        match rooms.remove(code) {
            Some(handle) => {
                debug_assert_eq!(handle.occupants(), 0, "evicting occupied room {code}");
                if handle.occupants() != 0 {
                    warn!(room = %code, occupants = handle.occupants(), "Evicted a room that still had occupants");
                }
                info!(room = %code, "Room evicted");
            }
            None if self.shutting_down.load(Ordering::Acquire) => {}
            None => {
                debug_assert!(false, "evicting unknown room {code}");
                warn!(room = %code, "Eviction of unknown room");
            }
        }
        self.metrics.rooms_active.store(rooms.len() as u64, Ordering::Relaxed);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.lock().contains_key(code)
    }

    /// Forget every room. Lanes wind down as their remaining handles drop.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let closed = {
            let mut rooms = self.rooms.lock();
            let count = rooms.len();
            rooms.clear();
            count
        };
        self.metrics.rooms_active.store(0, Ordering::Relaxed);
        info!("Registry shut down, {} rooms closed", closed);
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Too many rooms")]
    TooManyRooms,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room code already in use")]
    CodeInUse,
    #[error(transparent)]
    Room(#[from] RoomError),
}
