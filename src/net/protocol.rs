//! Wire protocol
//!
//! JSON objects tagged by a camelCase `type` field, one message per frame.

use serde::{Deserialize, Serialize};

use crate::game::character::Character;
use crate::util::grid::{Coordinate, Direction};

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Open a new room and take its first slot
    LobbyCreate,
    /// Join an existing room by code
    LobbyJoin { code: String },
    /// Leave the current room
    LobbyLeave,
    Chat { msg: String },
    /// Preview a character without claiming it
    CharacterHover { character: Character },
    /// Claim a character (`unknown` releases the current one)
    CharacterConfirm { character: Character },
    /// Step to an adjacent cell
    CharacterMove { coordinate: Coordinate },
    CheckWin,
    /// Back to character select after a finished game
    NewGame,
    /// Client keep-alive
    Ping,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Outcome of a create or join request
    #[serde(rename = "lobbyJoin")]
    LobbyJoinResult {
        success: bool,
        code: String,
        player_count: usize,
        /// Character the other occupant already confirmed
        other_confirm: Option<Character>,
    },
    #[serde(rename = "lobbyOtherJoin")]
    LobbyOtherJoined,
    #[serde(rename = "lobbyOtherLeave")]
    LobbyOtherLeft,
    Chat { msg: String },
    CharacterHover { character: Character },
    /// The other occupant's confirmed character, `null` when released
    CharacterConfirm { character: Option<Character> },
    TransitionToInGame,
    /// Full maze as seen by the recipient
    #[serde(rename = "inGameMaze")]
    MazeState {
        maze: Vec<Vec<u16>>,
        start: Coordinate,
        end: Coordinate,
        /// Start cell as seen by the teammate
        cell: u16,
    },
    /// Result of the recipient's own move
    #[serde(rename = "characterMove")]
    CharacterMoved {
        coordinate: Coordinate,
        cell: u16,
        reset: bool,
    },
    /// The teammate moved (or was sent back to start)
    #[serde(rename = "characterOtherMove")]
    OtherCharacterMoved {
        direction: Direction,
        reset: bool,
        cell: u16,
    },
    CharacterMoveRejected,
    #[serde(rename = "coinTaken")]
    CollectibleTaken { coordinate: Coordinate },
    #[serde(rename = "transitionToGameDone")]
    TransitionToFinished,
    TransitionToCharacterSelect,
}

impl ServerMessage {
    /// Negative create/join result
    pub fn join_failed() -> Self {
        ServerMessage::LobbyJoinResult {
            success: false,
            code: String::new(),
            player_count: 0,
            other_confirm: None,
        }
    }
}

/// Encode a message as a JSON text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a JSON payload (text or binary frame)
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
