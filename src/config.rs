use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::game::constants::{maze, room};
use crate::lobby::room::MazeSize;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebSocket port
    pub port: u16,
    /// Maximum number of concurrent rooms
    pub max_rooms: usize,
    /// Maze rows for every new game
    pub maze_rows: usize,
    /// Maze columns for every new game
    pub maze_cols: usize,
    /// Port of the metrics HTTP endpoint
    pub metrics_port: u16,
    /// Concurrent connections allowed from one IP
    pub max_connections_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            max_rooms: room::DEFAULT_MAX_ROOMS,
            maze_rows: maze::DEFAULT_ROWS,
            maze_cols: maze::DEFAULT_COLS,
            metrics_port: 9090,
            max_connections_per_ip: 16,
        }
    }
}

/// Parse `key` from `lookup`, keeping `current` when unset, malformed or out of range
fn read_var<T, F>(lookup: &F, key: &str, range: Option<RangeInclusive<T>>, current: T) -> T
where
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return current;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => match &range {
            Some(range) if !range.contains(&parsed) => {
                tracing::warn!(
                    "{} must be {}-{}, using default",
                    key,
                    range.start(),
                    range.end()
                );
                current
            }
            _ => parsed,
        },
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            current
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let dimensions = maze::MIN_DIMENSION..=maze::MAX_DIMENSION;

        Self {
            bind_address: read_var(&lookup, "BIND_ADDRESS", None, defaults.bind_address),
            port: read_var(&lookup, "PORT", Some(1..=u16::MAX), defaults.port),
            max_rooms: read_var(&lookup, "MAX_ROOMS", Some(1..=100_000), defaults.max_rooms),
            maze_rows: read_var(&lookup, "MAZE_ROWS", Some(dimensions.clone()), defaults.maze_rows),
            maze_cols: read_var(&lookup, "MAZE_COLS", Some(dimensions), defaults.maze_cols),
            metrics_port: read_var(&lookup, "METRICS_PORT", Some(1..=u16::MAX), defaults.metrics_port),
            max_connections_per_ip: read_var(
                &lookup,
                "MAX_CONNECTIONS_PER_IP",
                Some(1..=10_000),
                defaults.max_connections_per_ip,
            ),
        }
    }

    pub fn maze_size(&self) -> MazeSize {
        MazeSize {
            rows: self.maze_rows,
            cols: self.maze_cols,
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.port == self.metrics_port {
            return Err(ConfigError::PortClash(self.port));
        }
        if self.max_rooms == 0 {
            return Err(ConfigError::NoRooms);
        }
        let dimensions = maze::MIN_DIMENSION..=maze::MAX_DIMENSION;
        if !dimensions.contains(&self.maze_rows) || !dimensions.contains(&self.maze_cols) {
            return Err(ConfigError::MazeSize {
                rows: self.maze_rows,
                cols: self.maze_cols,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Port cannot be 0")]
    ZeroPort,
    #[error("Game and metrics servers both want port {0}")]
    PortClash(u16),
    #[error("max_rooms must be at least 1")]
    NoRooms,
    #[error("Maze size {rows}x{cols} outside {}-{}", maze::MIN_DIMENSION, maze::MAX_DIMENSION)]
    MazeSize { rows: usize, cols: usize },
}
