//! Local demo: one host and two guests sharing an in-process channel.
//!
//! Every participant runs its own poll/tick loop on the same tokio interval,
//! exactly as separate clients would against a hosted channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pursuit_sync::channel::memory::MemoryChannel;
use pursuit_sync::config::{RulesConfig, SyncConfig};
use pursuit_sync::game::input::InputState;
use pursuit_sync::game::state::Timestamp;
use pursuit_sync::game::systems::spawn::entity_id;
use pursuit_sync::lobby::lifecycle::Phase;
use pursuit_sync::metrics;
use pursuit_sync::session::{SessionEvent, SyncSession};

const SESSION_ID: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Pursuit Sync demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::load_or_default();
    let rules = RulesConfig::load_or_default();
    info!(
        "Configuration loaded: mode={:?}, throttle={}ms, delay={}ms, rounds={}",
        rules.mode, config.throttle_window_ms, config.interpolation_delay_ms, config.max_rounds
    );

    let server = MemoryChannel::new();
    let started = Instant::now();
    let clock = move || started.elapsed().as_millis() as Timestamp;

    let mut host = SyncSession::host(
        Arc::new(server.connect()),
        SESSION_ID,
        "host",
        config.clone(),
        rules.clone(),
    )?;
    let mut guests = Vec::new();
    for name in ["guest-1", "guest-2"] {
        guests.push(SyncSession::join(
            Arc::new(server.connect()),
            SESSION_ID,
            name,
            config.clone(),
            rules.clone(),
        )?);
    }

    // Metrics endpoint only when asked for
    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|s| s.parse::<u16>().ok()) {
        let host_metrics = host.metrics();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(host_metrics, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    host.poll(clock());
    host.start(clock())?;

    for (index, guest) in guests.iter_mut().enumerate() {
        guest.wait_for_snapshot(clock).await?;
        let Some((side, _)) = guest.my_role() else {
            warn!("{} has no role", guest.participant_id());
            continue;
        };
        if let Err(e) = guest.claim(entity_id(side, index)) {
            warn!("{} could not claim an entity: {}", guest.participant_id(), e);
        }
    }

    let frame = Duration::from_secs_f32(config.frame_interval_ms / 1000.0);
    let mut interval = tokio::time::interval(frame);

    let game = async {
        while host.phase() != Phase::Finished {
            interval.tick().await;
            let now = clock();

            for event in host.poll(now).into_iter().chain(host.tick(now, &InputState::default())) {
                log_event("host", &event);
            }
            for (index, guest) in guests.iter_mut().enumerate() {
                let input = wander(now, index);
                guest.poll(now);
                guest.tick(now, &input);
            }
        }
    };

    let finished = tokio::select! {
        _ = game => true,
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down...");
            false
        }
    };
    if finished {
        info!("Session finished, team scores {:?}", host.world().team_scores);
    }

    for guest in guests.iter_mut() {
        guest.leave();
    }
    host.leave();
    println!("{}", host.metrics().to_prometheus());

    Ok(())
}

/// Scripted guest input: change heading every half second
fn wander(now: Timestamp, index: usize) -> InputState {
    let heading = (now / 500 + index as u64) % 4;
    InputState {
        up: heading == 0,
        right: heading == 1,
        down: heading == 2,
        left: heading == 3,
        action: now % 3000 < 20,
    }
}

fn log_event(who: &str, event: &SessionEvent) {
    match event {
        SessionEvent::PhaseChanged { from, to } => info!("[{}] phase {:?} -> {:?}", who, from, to),
        SessionEvent::RoundChanged { round } => info!("[{}] round {}", who, round),
        SessionEvent::EntityTagged { tagger, runner } => {
            info!("[{}] entity {} tagged {}", who, tagger, runner)
        }
        SessionEvent::ParticipantLeft { participant, released } => {
            info!("[{}] {} left, released {:?}", who, participant, released)
        }
        _ => {}
    }
}
