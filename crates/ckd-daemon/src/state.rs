//! Shared runtime state for ckd-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The kitchen itself
//! owns all order and resource state; this module adds the SSE bus, the
//! simulation play flag and the background loops that feed the bus.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ckd_ledger::{AllocationMap, LedgerStatus};
use ckd_runtime::Kitchen;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Status(StatusSnapshot),
    LogLine {
        level: String,
        msg: String,
    },
    Deadlock {
        cycles: Vec<BTreeSet<String>>,
        deadlocked: BTreeSet<String>,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the kitchen, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// Changes on every daemon start.
    pub boot_id: Uuid,
    pub config_hash: Option<String>,
    pub simulation_playing: bool,
    pub ledger: LedgerStatus,
    pub pending: AllocationMap,
    pub active: AllocationMap,
    pub priorities: BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Handle shared across all Axum handlers and background tasks.
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub boot_id: Uuid,
    pub config_hash: Option<String>,
    pub kitchen: Arc<Kitchen>,
    /// Simulation ticker runs steps only while set.
    pub playing: AtomicBool,
}

impl AppState {
    pub fn new(kitchen: Arc<Kitchen>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "ckd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            boot_id: Uuid::new_v4(),
            config_hash: None,
            kitchen,
            playing: AtomicBool::new(false),
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let snap = self.kitchen.snapshot().await;
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            boot_id: self.boot_id,
            config_hash: self.config_hash.clone(),
            simulation_playing: self.is_playing(),
            ledger: snap.ledger,
            pending: snap.pending,
            active: snap.active,
            priorities: snap.priorities,
        }
    }

    /// Broadcast the current status. No receivers is not an error.
    pub async fn publish_status(&self) {
        let snap = self.status_snapshot().await;
        let _ = self.bus.send(BusMsg::Status(snap));
    }

    pub fn publish_log(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Run one deadlock analysis and broadcast a `deadlock` event if any cycle
/// exists. Returns whether one was found.
pub async fn deadlock_tick(state: &AppState) -> bool {
    let report = state.kitchen.analyze().await;
    if !report.has_deadlock() {
        return false;
    }
    for line in ckd_analyzer::explain(&report) {
        state.publish_log("WARN", line);
    }
    let _ = state.bus.send(BusMsg::Deadlock {
        cycles: report.cycles,
        deadlocked: report.deadlocked,
    });
    true
}

/// Spawn the periodic deadlock monitor.
pub fn spawn_deadlock_monitor(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if deadlock_tick(&state).await {
                warn!("deadlock monitor: cycle present");
            }
        }
    });
}

/// Spawn the simulation ticker. Each tick runs one
/// [`Kitchen::simulation_step`] while the play flag is set.
pub fn spawn_simulation_ticker(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !state.is_playing() {
                continue;
            }
            match state.kitchen.simulation_step().await {
                Ok(None) => debug!("simulation tick skipped: nothing to request"),
                Ok(Some(step)) => {
                    state.publish_log(
                        "INFO",
                        format!(
                            "simulation created {} ({} allocated)",
                            step.order_id,
                            step.report.allocated.len()
                        ),
                    );
                    state.publish_status().await;
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "simulation step failed");
                    state.publish_log("ERROR", format!("simulation step failed: {err:#}"));
                }
            }
        }
    });
}
