//! Maze Duo Server Library
//!
//! Pairs two WebSocket clients into a room by join code and referees a
//! cooperative maze game in which each player sees a different slice of the
//! walls.
//!
//! # Features
//!
//! - `dos_ratelimit` - Per-connection message rate limiting (enabled by default)

pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
