use serde::{Deserialize, Serialize};

/// Character identity a participant plays as
///
/// `Unset` may be held by both slots at once, each concrete character by at most one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Character {
    #[default]
    #[serde(rename = "unknown")]
    Unset,
    Io,
    Blair,
}

impl Character {
    /// Whether this is one of the two playable characters
    #[inline]
    pub fn is_concrete(self) -> bool {
        self != Character::Unset
    }

    /// `None` for `Unset`, used where the wire format expects `null`
    pub fn confirmed(self) -> Option<Character> {
        self.is_concrete().then_some(self)
    }
}
