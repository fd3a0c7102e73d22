//! Two-seat game room
//!
//! `Room` is a plain state machine. It is only ever touched from its own
//! lane (see `RoomHandle`), so none of its methods lock or await.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::game::character::Character;
use crate::game::constants::{maze as maze_defaults, room::SLOTS};
use crate::game::maze::Maze;
use crate::lobby::manager::{RoomCode, RoomRegistry};
use crate::lobby::player::Participant;
use crate::metrics::Metrics;
use crate::net::protocol::{ClientMessage, ServerMessage};
use crate::net::session::{Session, SessionId};
use crate::util::grid::Coordinate;

/// Room phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Picking characters
    CharacterSelect,
    /// Walking the maze
    InGame,
    /// Both at the exit with every coin collected
    Finished,
}

/// Dimensions used for every maze a room generates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MazeSize {
    pub rows: usize,
    pub cols: usize,
}

impl Default for MazeSize {
    fn default() -> Self {
        Self {
            rows: maze_defaults::DEFAULT_ROWS,
            cols: maze_defaults::DEFAULT_COLS,
        }
    }
}

#[inline]
fn partner_of(index: usize) -> usize {
    (index + 1) % SLOTS
}

pub struct Room {
    code: RoomCode,
    slots: [Participant; SLOTS],
    phase: RoomPhase,
    maze: Option<Maze>,
    maze_size: MazeSize,
    rng: StdRng,
    occupancy: Arc<AtomicUsize>,
    registry: Weak<RoomRegistry>,
    metrics: Arc<Metrics>,
    created_at: Instant,
    closed: bool,
}

impl Room {
    pub fn new(
        code: RoomCode,
        maze_size: MazeSize,
        registry: Weak<RoomRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            code,
            slots: Default::default(),
            phase: RoomPhase::CharacterSelect,
            maze: None,
            maze_size,
            rng: StdRng::from_entropy(),
            occupancy: Arc::new(AtomicUsize::new(0)),
            registry,
            metrics,
            created_at: Instant::now(),
            closed: false,
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn maze(&self) -> Option<&Maze> {
        self.maze.as_ref()
    }

    pub fn participant(&self, index: usize) -> &Participant {
        &self.slots[index]
    }

    /// Seats held by a connected session
    pub fn occupants(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_live()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn slot_of(&self, id: SessionId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_bound_to(id))
    }

    fn sync_occupancy(&self) {
        self.occupancy.store(self.occupants(), Ordering::Release);
    }

    fn broadcast(&self, message: ServerMessage) {
        for slot in &self.slots {
            slot.send(message.clone());
        }
    }

    /// Seat `session` in the first free slot
    pub fn join(&mut self, session: &Arc<Session>) -> Result<(), RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }

        let index = match self.slot_of(session.id()) {
            Some(index) => index,
            None => {
                self.release_stale();
                let index = self
                    .slots
                    .iter()
                    .position(|slot| !slot.is_live())
                    .ok_or(RoomError::Full)?;
                self.slots[index].bind(session);
                self.slots[partner_of(index)].send(ServerMessage::LobbyOtherJoined);
                index
            }
        };

        let partner = &self.slots[partner_of(index)];
        let other_confirm = if partner.is_live() {
            partner.character.confirmed()
        } else {
            None
        };
        self.slots[index].send(ServerMessage::LobbyJoinResult {
            success: true,
            code: self.code.to_string(),
            player_count: self.occupants(),
            other_confirm,
        });
        self.sync_occupancy();

        debug!(room = %self.code, session = %session.id(), "Session joined room");
        Ok(())
    }

    /// Vacate the slot held by `id`, closing the room once nobody is left
    pub fn leave(&mut self, id: SessionId) {
        let Some(index) = self.slot_of(id) else {
            return;
        };

        self.vacate(index, id);

        if self.occupants() == 0 {
            self.close();
        }
    }

    fn vacate(&mut self, index: usize, id: SessionId) {
        self.slots[index].clear();
        let partner = &mut self.slots[partner_of(index)];
        partner.reset_identity();
        partner.send(ServerMessage::LobbyOtherLeft);

        self.maze = None;
        self.phase = RoomPhase::CharacterSelect;
        self.sync_occupancy();

        debug!(room = %self.code, session = %id, "Session left room");
    }

    /// Run the leave for slots whose session closed before its leave reached
    /// the lane. The late leave then finds no slot and does nothing.
    fn release_stale(&mut self) {
        for index in 0..SLOTS {
            let slot = &self.slots[index];
            let stale = slot.session_id().filter(|_| !slot.is_live());
            if let Some(id) = stale {
                self.vacate(index, id);
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        info!(
            room = %self.code,
            age_secs = self.created_at.elapsed().as_secs(),
            "Room abandoned"
        );
        if let Some(registry) = self.registry.upgrade() {
            registry.evict(&self.code);
        }
    }

    /// Route an in-room message according to the current phase
    pub fn handle_message(&mut self, id: SessionId, message: ClientMessage) {
        let Some(index) = self.slot_of(id) else {
            trace!(room = %self.code, session = %id, "Message from unseated session");
            return;
        };

        match (self.phase, message) {
            (_, ClientMessage::Chat { msg }) => {
                self.slots[partner_of(index)].send(ServerMessage::Chat { msg });
            }
            (RoomPhase::CharacterSelect, ClientMessage::CharacterHover { character }) => {
                self.hover(index, character)
            }
            (RoomPhase::CharacterSelect, ClientMessage::CharacterConfirm { character }) => {
                self.confirm(index, character)
            }
            (RoomPhase::InGame, ClientMessage::CharacterMove { coordinate }) => {
                self.move_to(index, coordinate)
            }
            (RoomPhase::InGame, ClientMessage::CheckWin) => self.check_win(),
            (RoomPhase::Finished, ClientMessage::NewGame) => self.restart(),
            (phase, message) => {
                trace!(room = %self.code, ?phase, ?message, "Ignoring message");
            }
        }
    }

    fn hover(&self, index: usize, character: Character) {
        let partner = &self.slots[partner_of(index)];
        if !character.is_concrete() || partner.character == character {
            return;
        }
        partner.send(ServerMessage::CharacterHover { character });
    }

    fn confirm(&mut self, index: usize, character: Character) {
        let partner = partner_of(index);
        if self.slots[index].character == character {
            return;
        }
        if character.is_concrete() && self.slots[partner].character == character {
            debug!(room = %self.code, ?character, "Character already taken");
            return;
        }

        self.slots[index].character = character;
        self.slots[partner].send(ServerMessage::CharacterConfirm {
            character: character.confirmed(),
        });

        if self
            .slots
            .iter()
            .all(|slot| slot.is_live() && slot.character.is_concrete())
        {
            self.start_game();
        }
    }

    fn start_game(&mut self) {
        let maze = Maze::generate(self.maze_size.rows, self.maze_size.cols, &mut self.rng);
        self.begin(maze);
    }

    fn begin(&mut self, maze: Maze) {
        let start = maze.start();
        for slot in &mut self.slots {
            slot.position = start;
        }

        for index in 0..SLOTS {
            let own = self.slots[index].character;
            let teammate = self.slots[partner_of(index)].character;
            let slot = &self.slots[index];
            slot.send(ServerMessage::TransitionToInGame);
            slot.send(ServerMessage::MazeState {
                maze: maze.serialize_for(own),
                start,
                end: maze.end(),
                cell: maze.serialize_cell(start, teammate),
            });
        }

        info!(room = %self.code, rows = maze.rows(), cols = maze.cols(), "Game started");
        self.maze = Some(maze);
        self.phase = RoomPhase::InGame;
        self.metrics.games_started.fetch_add(1, Ordering::Relaxed);
    }

    fn move_to(&mut self, index: usize, target: Coordinate) {
        let partner = partner_of(index);
        let Some(maze) = self.maze.as_mut() else {
            return;
        };

        let from = self.slots[index].position;
        let direction = match from.direction_to(target) {
            Some(direction) if maze.in_bounds(target) => direction,
            _ => {
                trace!(room = %self.code, ?from, ?target, "Rejecting move");
                self.slots[index].send(ServerMessage::CharacterMoveRejected);
                return;
            }
        };
        let teammate = self.slots[partner].character;

        if !maze.traversable(from, target) {
            let start = maze.start();
            let cell = maze.serialize_cell(start, teammate);
            self.slots[index].position = start;
            self.slots[index].send(ServerMessage::CharacterMoved {
                coordinate: start,
                cell,
                reset: true,
            });
            self.slots[partner].send(ServerMessage::OtherCharacterMoved {
                direction,
                reset: true,
                cell: 0,
            });
            return;
        }

        let cell = maze.serialize_cell(target, teammate);
        self.slots[index].position = target;
        self.slots[index].send(ServerMessage::CharacterMoved {
            coordinate: target,
            cell,
            reset: false,
        });
        self.slots[partner].send(ServerMessage::OtherCharacterMoved {
            direction,
            reset: false,
            cell,
        });

        if maze.take_coin(target) {
            self.broadcast(ServerMessage::CollectibleTaken { coordinate: target });
        }
        self.check_win();
    }

    fn check_win(&mut self) {
        let Some(maze) = &self.maze else {
            return;
        };
        if self.phase != RoomPhase::InGame {
            return;
        }

        let end = maze.end();
        if maze.any_coin() || !self.slots.iter().all(|slot| slot.position == end) {
            return;
        }

        self.phase = RoomPhase::Finished;
        self.broadcast(ServerMessage::TransitionToFinished);
        self.metrics.games_finished.fetch_add(1, Ordering::Relaxed);
        info!(room = %self.code, "Game finished");
    }

    fn restart(&mut self) {
        for slot in &mut self.slots {
            slot.reset_identity();
        }
        self.maze = None;
        self.phase = RoomPhase::CharacterSelect;
        self.broadcast(ServerMessage::TransitionToCharacterSelect);
    }
}

type Task = Box<dyn FnOnce(&mut Room) + Send>;

/// Handle to a room's serialized lane
///
/// Every closure posted through any clone runs on the room's task, one at a
/// time, in the order it was posted.
#[derive(Clone)]
pub struct RoomHandle {
    code: RoomCode,
    tx: mpsc::UnboundedSender<Task>,
    occupancy: Arc<AtomicUsize>,
}

impl RoomHandle {
    /// Move `room` onto its own task. The lane stops once the room closes
    /// or every handle is dropped.
    pub fn spawn(room: Room) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let handle = Self {
            code: room.code.clone(),
            tx,
            occupancy: room.occupancy.clone(),
        };

        tokio::spawn(async move {
            let mut room = room;
            while let Some(task) = rx.recv().await {
                task(&mut room);
                if room.is_closed() {
                    break;
                }
            }
            debug!(room = %room.code, "Room lane stopped");
        });

        handle
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Occupancy as of the last completed task
    pub fn occupants(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    /// Fire and forget. False when the lane has stopped.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Room) + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }

    /// Run `f` on the lane and wait for its result
    pub async fn call<F, T>(&self, f: F) -> Result<T, RoomError>
    where
        F: FnOnce(&mut Room) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task: Task = Box::new(move |room: &mut Room| {
            let _ = reply_tx.send(f(room));
        });
        self.tx.send(task).map_err(|_| RoomError::Closed)?;
        reply_rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn join(&self, session: &Arc<Session>) -> Result<(), RoomError> {
        let session = session.clone();
        self.call(move |room| room.join(&session)).await?
    }

    /// Leave and wait until the room has processed it
    pub async fn leave(&self, id: SessionId) {
        if self.call(move |room| room.leave(id)).await.is_err() {
            trace!(room = %self.code, session = %id, "Leave after room closed");
        }
    }

    pub fn message(&self, id: SessionId, message: ClientMessage) {
        self.post(move |room| room.handle_message(id, message));
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("code", &self.code)
            .field("occupants", &self.occupants())
            .finish()
    }
}

/// Room errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,
    #[error("Room is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::maze::Visibility;
    use crate::net::session::{OutboundQueue, SessionEvent, SessionHandler};
    use crate::util::grid::Direction;

    struct Idle;

    impl SessionHandler for Idle {
        async fn handle(&mut self, _session: &Arc<Session>, _event: SessionEvent) {}
    }

    fn test_room() -> Room {
        let code = RoomCode::parse("TEST01").unwrap();
        let mut room = Room::new(code, MazeSize { rows: 4, cols: 4 }, Weak::new(), Arc::new(Metrics::new()));
        room.rng = StdRng::seed_from_u64(7);
        room
    }

    fn seat(room: &mut Room) -> (Arc<Session>, OutboundQueue) {
        let (session, queue) = Session::new();
        room.join(&session).unwrap();
        (session, queue)
    }

    /// 2x2 fixture
    ///
    /// (0,0)-(1,0) shared, (0,0)-(0,1) shared, (1,0)-(1,1) Io only,
    /// (0,1)-(1,1) closed, coin on (1,0).
    fn fixture() -> Maze {
        let mut maze = Maze::new(2, 2);
        maze.open_passage(Coordinate::new(0, 0), Direction::Right, Visibility::Both);
        maze.open_passage(Coordinate::new(0, 0), Direction::Down, Visibility::Both);
        maze.open_passage(Coordinate::new(1, 0), Direction::Down, Visibility::Only(Character::Io));
        maze.place_coin(Coordinate::new(1, 0));
        maze
    }

    /// Io in slot 0, Blair in slot 1, playing on `fixture()`
    fn in_game() -> (Room, [(Arc<Session>, OutboundQueue); 2]) {
        let mut room = test_room();
        let mut a = seat(&mut room);
        let mut b = seat(&mut room);
        room.slots[0].character = Character::Io;
        room.slots[1].character = Character::Blair;
        room.begin(fixture());
        a.1.drain();
        b.1.drain();
        (room, [a, b])
    }

    fn moved(room: &mut Room, session: &Arc<Session>, x: i32, y: i32) {
        room.handle_message(
            session.id(),
            ClientMessage::CharacterMove { coordinate: Coordinate::new(x, y) },
        );
    }

    #[test]
    fn test_join_two_then_full() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        assert_eq!(
            qa.drain(),
            vec![ServerMessage::LobbyJoinResult {
                success: true,
                code: "TEST01".into(),
                player_count: 1,
                other_confirm: None,
            }]
        );

        let (_b, mut qb) = seat(&mut room);
        assert_eq!(qa.drain(), vec![ServerMessage::LobbyOtherJoined]);
        assert!(matches!(
            qb.drain().as_slice(),
            [ServerMessage::LobbyJoinResult { success: true, player_count: 2, .. }]
        ));
        assert_eq!(room.occupants(), 2);

        let (c, _qc) = Session::new();
        assert_eq!(room.join(&c), Err(RoomError::Full));
        assert!(room.slot_of(a.id()).is_some());
    }

    #[test]
    fn test_join_reports_other_confirm() {
        let mut room = test_room();
        let (a, _qa) = seat(&mut room);
        room.handle_message(a.id(), ClientMessage::CharacterConfirm { character: Character::Blair });

        let (_b, mut qb) = seat(&mut room);
        assert!(matches!(
            qb.drain().as_slice(),
            [ServerMessage::LobbyJoinResult { other_confirm: Some(Character::Blair), .. }]
        ));
    }

    #[test]
    fn test_expired_slot_is_reusable() {
        let mut room = test_room();
        let (a, _qa) = seat(&mut room);
        let (_b, _qb) = seat(&mut room);
        drop(a);

        let (c, mut qc) = Session::new();
        room.join(&c).unwrap();
        assert!(matches!(qc.drain().as_slice(), [ServerMessage::LobbyJoinResult { success: true, .. }]));
    }

    #[test]
    fn test_hover_relay() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        let (b, mut qb) = seat(&mut room);
        qa.drain();

        room.handle_message(a.id(), ClientMessage::CharacterHover { character: Character::Io });
        assert_eq!(qb.drain(), vec![ServerMessage::CharacterHover { character: Character::Io }]);
        assert!(qa.drain().is_empty());

        // Unset hovers go nowhere, neither do hovers on the partner's character
        room.handle_message(a.id(), ClientMessage::CharacterHover { character: Character::Unset });
        room.handle_message(b.id(), ClientMessage::CharacterConfirm { character: Character::Blair });
        qa.drain();
        room.handle_message(a.id(), ClientMessage::CharacterHover { character: Character::Blair });
        assert!(qb.drain().is_empty());
    }

    #[test]
    fn test_confirm_conflicts() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        let (b, mut qb) = seat(&mut room);
        qa.drain();

        room.handle_message(a.id(), ClientMessage::CharacterConfirm { character: Character::Io });
        assert_eq!(qb.drain(), vec![ServerMessage::CharacterConfirm { character: Some(Character::Io) }]);

        // Same identity again is a no-op
        room.handle_message(a.id(), ClientMessage::CharacterConfirm { character: Character::Io });
        assert!(qb.drain().is_empty());

        // Taken by the other slot
        room.handle_message(b.id(), ClientMessage::CharacterConfirm { character: Character::Io });
        assert!(qa.drain().is_empty());
        assert_eq!(room.participant(1).character, Character::Unset);

        // Releasing sends null
        room.handle_message(a.id(), ClientMessage::CharacterConfirm { character: Character::Unset });
        assert_eq!(qb.drain(), vec![ServerMessage::CharacterConfirm { character: None }]);
        assert_eq!(room.phase(), RoomPhase::CharacterSelect);
    }

    #[test]
    fn test_both_confirmed_starts_game() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        let (b, mut qb) = seat(&mut room);
        qa.drain();
        qb.drain();

        room.handle_message(a.id(), ClientMessage::CharacterConfirm { character: Character::Io });
        room.handle_message(b.id(), ClientMessage::CharacterConfirm { character: Character::Blair });
        assert_eq!(room.phase(), RoomPhase::InGame);

        let maze = room.maze().unwrap();
        assert_eq!((maze.rows(), maze.cols()), (4, 4));
        assert_eq!(room.participant(0).position, maze.start());
        assert_eq!(room.participant(1).position, maze.start());

        let io_view = qa.drain();
        assert_eq!(io_view.len(), 3);
        assert_eq!(io_view[0], ServerMessage::CharacterConfirm { character: Some(Character::Blair) });
        assert_eq!(io_view[1], ServerMessage::TransitionToInGame);
        assert_eq!(
            io_view[2],
            ServerMessage::MazeState {
                maze: maze.serialize_for(Character::Io),
                start: Coordinate::new(0, 0),
                end: Coordinate::new(3, 3),
                cell: maze.serialize_cell(maze.start(), Character::Blair),
            }
        );

        let blair_view = qb.drain();
        // Io's confirm arrived before the transition
        assert_eq!(blair_view[0], ServerMessage::CharacterConfirm { character: Some(Character::Io) });
        assert_eq!(blair_view[1], ServerMessage::TransitionToInGame);
        assert!(matches!(&blair_view[2], ServerMessage::MazeState { maze: grid, .. } if *grid == maze.serialize_for(Character::Blair)));
    }

    #[test]
    fn test_chat_goes_to_other_only() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        let (_b, mut qb) = seat(&mut room);
        qa.drain();
        qb.drain();

        room.handle_message(a.id(), ClientMessage::Chat { msg: "left at the fork".into() });
        assert_eq!(qb.drain(), vec![ServerMessage::Chat { msg: "left at the fork".into() }]);
        assert!(qa.drain().is_empty());
    }

    #[test]
    fn test_move_collect_and_win() {
        let (mut room, [(a, mut qa), (b, mut qb)]) = in_game();
        let coin = ServerMessage::CollectibleTaken { coordinate: Coordinate::new(1, 0) };

        // Io right onto the coin; cell is serialized for Blair
        moved(&mut room, &a, 1, 0);
        assert_eq!(
            qa.drain(),
            vec![
                ServerMessage::CharacterMoved { coordinate: Coordinate::new(1, 0), cell: 264, reset: false },
                coin.clone(),
            ]
        );
        assert_eq!(
            qb.drain(),
            vec![
                ServerMessage::OtherCharacterMoved { direction: Direction::Right, reset: false, cell: 264 },
                coin,
            ]
        );

        // Blair follows; serialized for Io, coin gone
        moved(&mut room, &b, 1, 0);
        assert_eq!(
            qb.drain(),
            vec![ServerMessage::CharacterMoved { coordinate: Coordinate::new(1, 0), cell: 72, reset: false }]
        );
        assert_eq!(
            qa.drain(),
            vec![ServerMessage::OtherCharacterMoved { direction: Direction::Right, reset: false, cell: 72 }]
        );

        // Blair walks a passage only Io can see
        moved(&mut room, &b, 1, 1);
        assert_eq!(
            qb.drain(),
            vec![ServerMessage::CharacterMoved { coordinate: Coordinate::new(1, 1), cell: 16, reset: false }]
        );
        assert_eq!(room.phase(), RoomPhase::InGame);
        qa.drain();

        moved(&mut room, &a, 1, 1);
        assert_eq!(
            qa.drain(),
            vec![
                ServerMessage::CharacterMoved { coordinate: Coordinate::new(1, 1), cell: 0, reset: false },
                ServerMessage::TransitionToFinished,
            ]
        );
        assert_eq!(
            qb.drain(),
            vec![
                ServerMessage::OtherCharacterMoved { direction: Direction::Down, reset: false, cell: 0 },
                ServerMessage::TransitionToFinished,
            ]
        );
        assert_eq!(room.phase(), RoomPhase::Finished);
        assert_eq!(room.metrics.games_finished.load(Ordering::Relaxed), 1);

        // Moves are ignored once finished
        moved(&mut room, &a, 1, 0);
        assert!(qa.drain().is_empty());
    }

    #[test]
    fn test_blocked_move_resets_mover_only() {
        let (mut room, [(a, mut qa), (b, mut qb)]) = in_game();

        moved(&mut room, &a, 0, 1);
        moved(&mut room, &b, 1, 0);
        qa.drain();
        qb.drain();

        // (0,1) -> (1,1) is a wall
        moved(&mut room, &a, 1, 1);
        assert_eq!(
            qa.drain(),
            vec![ServerMessage::CharacterMoved { coordinate: Coordinate::new(0, 0), cell: 6, reset: true }]
        );
        assert_eq!(
            qb.drain(),
            vec![ServerMessage::OtherCharacterMoved { direction: Direction::Right, reset: true, cell: 0 }]
        );
        assert_eq!(room.participant(0).position, Coordinate::new(0, 0));
        assert_eq!(room.participant(1).position, Coordinate::new(1, 0));
    }

    #[test]
    fn test_move_rejected() {
        let (mut room, [(a, mut qa), (_b, mut qb)]) = in_game();

        moved(&mut room, &a, 1, 1);
        moved(&mut room, &a, -1, 0);
        moved(&mut room, &a, 0, 0);
        assert_eq!(qa.drain(), vec![ServerMessage::CharacterMoveRejected; 3]);
        assert!(qb.drain().is_empty());
        assert_eq!(room.participant(0).position, Coordinate::new(0, 0));
    }

    #[test]
    fn test_remaining_coin_blocks_win() {
        let (mut room, [(a, mut qa), (b, _qb)]) = in_game();
        room.maze.as_mut().unwrap().place_coin(Coordinate::new(0, 1));

        moved(&mut room, &a, 1, 0);
        moved(&mut room, &a, 1, 1);
        moved(&mut room, &b, 1, 0);
        moved(&mut room, &b, 1, 1);
        qa.drain();

        room.handle_message(a.id(), ClientMessage::CheckWin);
        assert_eq!(room.phase(), RoomPhase::InGame);
        assert!(qa.drain().is_empty());
    }

    #[test]
    fn test_new_game_after_finish() {
        let (mut room, [(a, mut qa), (b, mut qb)]) = in_game();
        room.handle_message(a.id(), ClientMessage::NewGame);
        assert_eq!(room.phase(), RoomPhase::InGame);

        moved(&mut room, &a, 1, 0);
        moved(&mut room, &a, 1, 1);
        moved(&mut room, &b, 1, 0);
        moved(&mut room, &b, 1, 1);
        assert_eq!(room.phase(), RoomPhase::Finished);
        qa.drain();
        qb.drain();

        room.handle_message(b.id(), ClientMessage::NewGame);
        assert_eq!(room.phase(), RoomPhase::CharacterSelect);
        assert!(room.maze().is_none());
        assert_eq!(room.participant(0).character, Character::Unset);
        assert_eq!(room.participant(1).character, Character::Unset);
        assert_eq!(qa.drain(), vec![ServerMessage::TransitionToCharacterSelect]);
        assert_eq!(qb.drain(), vec![ServerMessage::TransitionToCharacterSelect]);
    }

    #[test]
    fn test_leave_mid_game() {
        let (mut room, [(a, _qa), (_b, mut qb)]) = in_game();

        room.leave(a.id());
        assert_eq!(qb.drain(), vec![ServerMessage::LobbyOtherLeft]);
        assert_eq!(room.phase(), RoomPhase::CharacterSelect);
        assert!(room.maze().is_none());
        assert_eq!(room.participant(1).character, Character::Unset);
        assert_eq!(room.occupants(), 1);
        assert!(!room.is_closed());

        // Unknown sessions are ignored
        room.leave(a.id());
        assert!(qb.drain().is_empty());
    }

    #[tokio::test]
    async fn test_join_while_occupant_closing() {
        let (mut room, [(a, _qa), (_b, mut qb)]) = in_game();

        // Closed, but its leave has not reached the room yet
        a.close(&mut Idle).await;
        let (c, mut qc) = Session::new();
        room.join(&c).unwrap();

        assert_eq!(qb.drain(), vec![ServerMessage::LobbyOtherLeft, ServerMessage::LobbyOtherJoined]);
        assert_eq!(
            qc.drain(),
            vec![ServerMessage::LobbyJoinResult {
                success: true,
                code: "TEST01".into(),
                player_count: 2,
                other_confirm: None,
            }]
        );
        assert_eq!(room.phase(), RoomPhase::CharacterSelect);
        assert!(room.maze().is_none());
        assert_eq!(room.participant(1).character, Character::Unset);

        room.leave(a.id());
        assert!(qb.drain().is_empty());
        assert!(qc.drain().is_empty());
        assert_eq!(room.occupants(), 2);
        assert!(room.participant(0).is_bound_to(c.id()));
    }

    #[tokio::test]
    async fn test_join_after_both_closed() {
        let mut room = test_room();
        let (a, _qa) = seat(&mut room);
        let (b, _qb) = seat(&mut room);
        a.close(&mut Idle).await;
        b.close(&mut Idle).await;

        let (c, mut qc) = Session::new();
        room.join(&c).unwrap();
        assert!(matches!(
            qc.drain().as_slice(),
            [ServerMessage::LobbyJoinResult { success: true, player_count: 1, .. }]
        ));

        room.leave(a.id());
        room.leave(b.id());
        assert!(qc.drain().is_empty());
        assert!(!room.is_closed());
        assert_eq!(room.occupants(), 1);
    }

    #[test]
    fn test_leave_after_finish() {
        let (mut room, [(a, _qa), (b, mut qb)]) = in_game();
        moved(&mut room, &a, 1, 0);
        moved(&mut room, &a, 1, 1);
        moved(&mut room, &b, 1, 0);
        moved(&mut room, &b, 1, 1);
        assert_eq!(room.phase(), RoomPhase::Finished);
        qb.drain();

        room.leave(a.id());
        assert_eq!(qb.drain(), vec![ServerMessage::LobbyOtherLeft]);
        assert_eq!(room.phase(), RoomPhase::CharacterSelect);
        assert!(room.maze().is_none());
        assert_eq!(room.participant(1).character, Character::Unset);
        assert_eq!(room.participant(1).position, Coordinate::ORIGIN);
        assert_eq!(room.occupants(), 1);
    }

    #[test]
    fn test_last_leave_closes() {
        let mut room = test_room();
        let (a, _qa) = seat(&mut room);
        let (b, _qb) = seat(&mut room);

        room.leave(a.id());
        room.leave(b.id());
        assert!(room.is_closed());
        assert_eq!(room.occupancy.load(Ordering::Acquire), 0);

        let (c, _qc) = Session::new();
        assert_eq!(room.join(&c), Err(RoomError::Closed));
    }

    #[tokio::test]
    async fn test_lane_preserves_order() {
        let mut room = test_room();
        let (a, mut qa) = seat(&mut room);
        let (_b, mut qb) = seat(&mut room);
        qa.drain();
        let handle = RoomHandle::spawn(room);

        for i in 0..50 {
            handle.message(a.id(), ClientMessage::Chat { msg: i.to_string() });
        }
        let count = handle.call(|room| room.occupants()).await.unwrap();
        assert_eq!(count, 2);

        let received: Vec<_> = qb.drain();
        let expected: Vec<_> = (0..50)
            .map(|i| ServerMessage::Chat { msg: i.to_string() })
            .collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_lane_join_and_close() {
        let handle = RoomHandle::spawn(test_room());
        let (a, _qa) = Session::new();
        let (b, _qb) = Session::new();
        let (c, _qc) = Session::new();

        handle.join(&a).await.unwrap();
        handle.join(&b).await.unwrap();
        assert_eq!(handle.occupants(), 2);
        assert_eq!(handle.join(&c).await, Err(RoomError::Full));

        handle.leave(a.id()).await;
        handle.leave(b.id()).await;
        assert_eq!(handle.occupants(), 0);

        // Lane is gone
        assert_eq!(handle.call(|room| room.occupants()).await, Err(RoomError::Closed));
        assert_eq!(handle.join(&c).await, Err(RoomError::Closed));
        assert!(!handle.post(|_| {}));
    }
}
