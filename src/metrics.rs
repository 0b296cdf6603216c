//! Prometheus-compatible metrics endpoint
//!
//! Exposes arena server counters in Prometheus text format and as JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // Membership
    pub connections_active: AtomicU64,
    pub clients_registered: AtomicU64,
    pub players_in_game: AtomicU64,

    // Spore economy
    pub spore_count: AtomicU64,
    pub spores_replenished: AtomicU64,
    pub spores_dropped: AtomicU64,
    pub spores_consumed: AtomicU64,

    // Claims
    pub players_consumed: AtomicU64,
    pub claims_rejected: AtomicU64,

    // Hub fan-out
    pub broadcasts: AtomicU64,

    // Network stats
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            clients_registered: AtomicU64::new(0),
            players_in_game: AtomicU64::new(0),
            spore_count: AtomicU64::new(0),
            spores_replenished: AtomicU64::new(0),
            spores_dropped: AtomicU64::new(0),
            spores_consumed: AtomicU64::new(0),
            players_consumed: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero
    #[inline]
    pub fn decr(gauge: &AtomicU64) {
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    #[inline]
    pub fn set(gauge: &AtomicU64, value: usize) {
        gauge.store(value as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
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

        metric!("spore_arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("spore_arena_clients_registered", "Clients registered with the hub", "gauge",
            self.clients_registered.load(Ordering::Relaxed));
        metric!("spore_arena_players_in_game", "Players currently in the arena", "gauge",
            self.players_in_game.load(Ordering::Relaxed));

        metric!("spore_arena_spores", "Spores currently in the arena", "gauge",
            self.spore_count.load(Ordering::Relaxed));
        metric!("spore_arena_spores_replenished_total", "Spores created by replenishment", "counter",
            self.spores_replenished.load(Ordering::Relaxed));
        metric!("spore_arena_spores_dropped_total", "Spores shed by moving players", "counter",
            self.spores_dropped.load(Ordering::Relaxed));
        metric!("spore_arena_spores_consumed_total", "Accepted spore consumption claims", "counter",
            self.spores_consumed.load(Ordering::Relaxed));
        metric!("spore_arena_players_consumed_total", "Accepted player consumption claims", "counter",
            self.players_consumed.load(Ordering::Relaxed));
        metric!("spore_arena_claims_rejected_total", "Consumption claims that failed validation", "counter",
            self.claims_rejected.load(Ordering::Relaxed));

        metric!("spore_arena_broadcasts_total", "Packets fanned out by the hub", "counter",
            self.broadcasts.load(Ordering::Relaxed));
        metric!("spore_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("spore_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("spore_arena_messages_dropped_total", "Outbound messages dropped on a full queue", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("spore_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("spore_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        metric!("spore_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);

        serde_json::json!({
            "clients": {
                "connections": load(&self.connections_active),
                "registered": load(&self.clients_registered),
                "in_game": load(&self.players_in_game),
            },
            "spores": {
                "count": load(&self.spore_count),
                "replenished": load(&self.spores_replenished),
                "dropped": load(&self.spores_dropped),
                "consumed": load(&self.spores_consumed),
            },
            "claims": {
                "players_consumed": load(&self.players_consumed),
                "rejected": load(&self.claims_rejected),
            },
            "network": {
                "broadcasts": load(&self.broadcasts),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "messages_dropped": load(&self.messages_dropped),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }

    /// Build the full HTTP response for a raw request
    pub fn respond(&self, request: &str) -> String {
        let (content_type, body) = if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
            ("application/json", self.to_json())
        } else if request.starts_with("GET /metrics") {
            ("text/plain; version=0.0.4", self.to_prometheus())
        } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
            ("text/plain", "OK".to_string())
        } else {
            return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
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
