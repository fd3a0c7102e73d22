//! Prometheus-compatible metrics endpoint
//!
//! Default endpoint: http://localhost:9090/metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Connections
    pub connections_active: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_rejected: AtomicU64,

    // Rooms and games
    pub rooms_active: AtomicU64,
    pub rooms_created: AtomicU64,
    pub games_started: AtomicU64,
    pub games_finished: AtomicU64,

    // Traffic
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_payloads: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            rooms_active: AtomicU64::new(0),
            rooms_created: AtomicU64::new(0),
            games_started: AtomicU64::new(0),
            games_finished: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("maze_duo_connections_active", "Open WebSocket connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("maze_duo_connections_total", "Accepted WebSocket connections", "counter",
            self.connections_total.load(Ordering::Relaxed));
        metric!("maze_duo_connections_rejected_total", "Connections refused by limits", "counter",
            self.connections_rejected.load(Ordering::Relaxed));

        metric!("maze_duo_rooms_active", "Rooms currently registered", "gauge",
            self.rooms_active.load(Ordering::Relaxed));
        metric!("maze_duo_rooms_created_total", "Rooms created", "counter",
            self.rooms_created.load(Ordering::Relaxed));
        metric!("maze_duo_games_started_total", "Games that reached the maze", "counter",
            self.games_started.load(Ordering::Relaxed));
        metric!("maze_duo_games_finished_total", "Games won", "counter",
            self.games_finished.load(Ordering::Relaxed));

        metric!("maze_duo_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("maze_duo_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("maze_duo_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("maze_duo_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("maze_duo_malformed_payloads_total", "Inbound payloads that failed to decode", "counter",
            self.malformed_payloads.load(Ordering::Relaxed));

        metric!("maze_duo_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON view of the same counters
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "connections": {
                "active": self.connections_active.load(Ordering::Relaxed),
                "total": self.connections_total.load(Ordering::Relaxed),
                "rejected": self.connections_rejected.load(Ordering::Relaxed),
            },
            "rooms": {
                "active": self.rooms_active.load(Ordering::Relaxed),
                "created": self.rooms_created.load(Ordering::Relaxed),
                "games_started": self.games_started.load(Ordering::Relaxed),
                "games_finished": self.games_finished.load(Ordering::Relaxed),
            },
            "network": {
                "messages_sent": self.messages_sent.load(Ordering::Relaxed),
                "messages_received": self.messages_received.load(Ordering::Relaxed),
                "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
                "bytes_received": self.bytes_received.load(Ordering::Relaxed),
                "malformed_payloads": self.malformed_payloads.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }

    /// Build the full HTTP response for one request head
    fn respond(&self, request: &str) -> String {
        let path = request
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("GET "))
            .and_then(|rest| rest.split_whitespace().next());

        let (content_type, body) = match path {
            Some("/metrics/json") | Some("/json") => ("application/json", self.to_json()),
            Some("/metrics") => ("text/plain; version=0.0.4", self.to_prometheus()),
            Some("/health") | Some("/") => ("text/plain", "OK".to_string()),
            _ => {
                return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_string()
            }
        };

        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = metrics.respond(&request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
