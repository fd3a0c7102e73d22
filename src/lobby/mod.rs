//! Rooms and the registry that hands them out by join code

pub mod manager;
pub mod player;
pub mod room;
