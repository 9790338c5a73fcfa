//! Prometheus-compatible sync metrics
//!
//! Counters for the publish/receive path and ownership arbitration of one
//! participant. Exposed as Prometheus text, optionally over a tiny HTTP
//! endpoint (`GET /metrics`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for one participant
#[derive(Debug)]
pub struct SyncMetrics {
    // Broadcaster
    pub snapshots_published: AtomicU64,
    pub snapshots_throttled: AtomicU64,
    pub write_failures: AtomicU64,

    // Receiver
    pub snapshots_received: AtomicU64,
    pub snapshots_stale: AtomicU64,
    pub decode_errors: AtomicU64,

    // Relay
    pub relays_sent: AtomicU64,
    pub relays_applied: AtomicU64,

    // Ownership
    pub claims_granted: AtomicU64,
    pub claims_rejected: AtomicU64,
    pub orphans_released: AtomicU64,

    // Lifecycle
    pub rounds_completed: AtomicU64,
    pub entities_tagged: AtomicU64,

    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            snapshots_published: AtomicU64::new(0),
            snapshots_throttled: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            snapshots_received: AtomicU64::new(0),
            snapshots_stale: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            relays_sent: AtomicU64::new(0),
            relays_applied: AtomicU64::new(0),
            claims_granted: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
            orphans_released: AtomicU64::new(0),
            rounds_completed: AtomicU64::new(0),
            entities_tagged: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(600)),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        // Ten seconds of frames at 60 Hz
        while history.len() > 600 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

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

        metric!("pursuit_sync_snapshots_published_total", "Snapshots written to the channel", "counter",
            Self::get(&self.snapshots_published));
        metric!("pursuit_sync_snapshots_throttled_total", "Publish requests dropped inside the throttle window", "counter",
            Self::get(&self.snapshots_throttled));
        metric!("pursuit_sync_write_failures_total", "Fire-and-forget writes that failed", "counter",
            Self::get(&self.write_failures));
        metric!("pursuit_sync_snapshots_received_total", "Snapshots applied by the receiver", "counter",
            Self::get(&self.snapshots_received));
        metric!("pursuit_sync_snapshots_stale_total", "Snapshots older than the last applied one", "counter",
            Self::get(&self.snapshots_stale));
        metric!("pursuit_sync_decode_errors_total", "Channel values that failed schema validation", "counter",
            Self::get(&self.decode_errors));
        metric!("pursuit_sync_relays_sent_total", "Position relays written by this participant", "counter",
            Self::get(&self.relays_sent));
        metric!("pursuit_sync_relays_applied_total", "Position relays applied by the host", "counter",
            Self::get(&self.relays_applied));
        metric!("pursuit_sync_claims_granted_total", "Ownership claims granted", "counter",
            Self::get(&self.claims_granted));
        metric!("pursuit_sync_claims_rejected_total", "Ownership claims rejected", "counter",
            Self::get(&self.claims_rejected));
        metric!("pursuit_sync_orphans_released_total", "Ownership records cleared after a participant left", "counter",
            Self::get(&self.orphans_released));
        metric!("pursuit_sync_rounds_completed_total", "Rounds that reached a terminal condition", "counter",
            Self::get(&self.rounds_completed));
        metric!("pursuit_sync_entities_tagged_total", "Pursued entities deactivated by a tag", "counter",
            Self::get(&self.entities_tagged));
        metric!("pursuit_sync_tick_count", "Total ticks processed", "counter",
            Self::get(&self.tick_count));
        metric!("pursuit_sync_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            Self::get(&self.tick_time_us));
        metric!("pursuit_sync_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            Self::get(&self.tick_time_p95_us));
        metric!("pursuit_sync_tick_time_max_microseconds", "Maximum tick time", "gauge",
            Self::get(&self.tick_time_max_us));
        metric!("pursuit_sync_uptime_seconds", "Seconds since the participant started", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `GET /metrics` until the listener fails
pub async fn start_metrics_server(metrics: Arc<SyncMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
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
                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

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
