use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;

/// Configuration for DoS protection
#[derive(Debug, Clone)]
pub struct DoSConfig {
    /// Maximum total concurrent connections
    pub max_connections_total: usize,
    /// Maximum connections per IP address
    pub max_connections_per_ip: usize,
    /// Maximum messages per window per connection
    pub max_messages_per_window: u32,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Time window for rate limiting
    pub rate_limit_window: Duration,
    /// Number of violations before the connection is dropped
    pub violations_before_disconnect: u32,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 4096,
            max_connections_per_ip: 16,
            max_messages_per_window: 60,
            max_message_size: 16 * 1024,
            rate_limit_window: Duration::from_secs(1),
            violations_before_disconnect: 5,
        }
    }
}

impl DoSConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            max_connections_per_ip: config.max_connections_per_ip,
            ..Self::default()
        }
    }
}

/// Concurrent connection caps, shared by the accept loop
#[derive(Debug)]
pub struct ConnectionLimiter {
    config: DoSConfig,
    ip_connections: HashMap<IpAddr, usize>,
    total_connections: usize,
}

impl ConnectionLimiter {
    pub fn new(config: DoSConfig) -> Self {
        Self {
            config,
            ip_connections: HashMap::new(),
            total_connections: 0,
        }
    }

    /// Check if a new connection from this IP is allowed
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), DoSError> {
        if self.total_connections >= self.config.max_connections_total {
            return Err(DoSError::TooManyConnections);
        }
        if self.connections_from_ip(ip) >= self.config.max_connections_per_ip {
            return Err(DoSError::TooManyConnectionsFromIp);
        }
        Ok(())
    }

    /// Count a new connection, or refuse it
    pub fn register_connection(&mut self, ip: IpAddr) -> Result<(), DoSError> {
        self.check_connection(ip)?;
        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        Ok(())
    }

    pub fn unregister_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
        self.total_connections = self.total_connections.saturating_sub(1);
    }

    pub fn connection_count(&self) -> usize {
        self.total_connections
    }

    pub fn connections_from_ip(&self, ip: IpAddr) -> usize {
        self.ip_connections.get(&ip).copied().unwrap_or(0)
    }
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new(DoSConfig::default())
    }
}

/// Per-connection inbound budget, owned by the read loop
#[derive(Debug)]
pub struct MessageRateLimiter {
    max_messages: u32,
    max_message_size: usize,
    window: Duration,
    violations_allowed: u32,
    message_count: u32,
    window_start: Instant,
    violations: u32,
}

impl MessageRateLimiter {
    pub fn new(config: &DoSConfig) -> Self {
        Self {
            max_messages: config.max_messages_per_window,
            max_message_size: config.max_message_size,
            window: config.rate_limit_window,
            violations_allowed: config.violations_before_disconnect,
            message_count: 0,
            window_start: Instant::now(),
            violations: 0,
        }
    }

    /// Check if a message of `size` bytes may be processed
    ///
    /// `ViolationLimitExceeded` means the connection should be dropped;
    /// other errors mean just this message is discarded.
    pub fn check_message(&mut self, size: usize) -> Result<(), DoSError> {
        self.check_message_at(size, Instant::now())
    }

    fn check_message_at(&mut self, size: usize, now: Instant) -> Result<(), DoSError> {
        if self.violations >= self.violations_allowed {
            return Err(DoSError::ViolationLimitExceeded);
        }

        if size > self.max_message_size {
            self.violations += 1;
            return Err(DoSError::MessageTooLarge(size));
        }

        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.message_count = 0;
        }

        self.message_count += 1;
        if self.message_count > self.max_messages {
            self.violations += 1;
            return Err(DoSError::RateLimitExceeded);
        }
        Ok(())
    }

    pub fn violation_count(&self) -> u32 {
        self.violations
    }
}

/// Errors from DoS protection checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoSError {
    #[error("Too many total connections")]
    TooManyConnections,
    #[error("Too many connections from this IP")]
    TooManyConnectionsFromIp,
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Too many violations, connection terminated")]
    ViolationLimitExceeded,
}

impl DoSError {
    /// Whether the offending connection should be closed
    pub fn is_fatal(&self) -> bool {
        matches!(self, DoSError::ViolationLimitExceeded)
    }
}
