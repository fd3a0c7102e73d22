/// Maze generation constants
pub mod maze {
    /// Default number of rows
    pub const DEFAULT_ROWS: usize = 8;
    /// Default number of columns
    pub const DEFAULT_COLS: usize = 8;
    /// Smallest accepted dimension (a 1-wide maze has no decisions to make)
    pub const MIN_DIMENSION: usize = 2;
    /// Largest accepted dimension (keeps the serialized grid well under the frame cap)
    pub const MAX_DIMENSION: usize = 32;
    /// Chance that an opened passage is visible to Io only
    pub const IO_ONLY_CHANCE: f64 = 0.1;
    /// Chance that an opened passage is visible to Blair only
    pub const BLAIR_ONLY_CHANCE: f64 = 0.1;
    /// Chance that a fully explored cell receives a coin
    pub const COIN_CHANCE: f64 = 0.1;
}

/// Cell bit layout (in-memory and wire)
pub mod cell {
    /// First bit of the Io passage group
    pub const IO_SHIFT: usize = 0;
    /// First bit of the Blair passage group
    pub const BLAIR_SHIFT: usize = 4;
    /// First bit of the "visible to both" group in serialized form
    pub const SHARED_SHIFT: usize = 0;
    /// First bit of the "visible only to me" group in serialized form
    pub const EXCLUSIVE_SHIFT: usize = 4;
    /// Coin flag
    pub const COIN_BIT: usize = 8;
}

/// Join code constants
pub mod code {
    /// Length of a room join code
    pub const LENGTH: usize = 6;
    /// Characters a join code is drawn from
    pub const ALPHABET: &[u8; 36] = b"1234567890ABCDEFGHIJKLMNOPQRSTUVWXYZ";
}

/// Room limits
pub mod room {
    /// Seats per room
    pub const SLOTS: usize = 2;
    /// Default cap on concurrently open rooms
    pub const DEFAULT_MAX_ROOMS: usize = 1000;
}
