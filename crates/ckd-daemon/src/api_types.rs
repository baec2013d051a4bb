//! Request and response types for all ckd-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use std::collections::BTreeMap;

use ckd_analyzer::DeadlockReport;
use ckd_db::LogEntry;
use ckd_ledger::{AllocationMap, ResourceMap};
use ckd_orders::ProcessReport;
use ckd_runtime::SimulationStep;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors (400 / 500)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub pending: AllocationMap,
    pub active: AllocationMap,
    pub priorities: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub request: ResourceMap,
    /// Configured default priority when absent.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Run an allocation pass right after creating. Defaults to true.
    #[serde(default)]
    pub process: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    /// An existing order with this id was overwritten.
    pub replaced: bool,
    /// Present when an allocation pass ran.
    pub report: Option<ProcessReport>,
}

/// Release / abort / preempt result. `removed == false` means the id was
/// unknown and nothing changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRemovedResponse {
    pub order_id: String,
    pub removed: bool,
    /// Quantities returned to the pool, if the order held any.
    pub released: Option<ResourceMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub order_id: String,
    pub rescheduled: bool,
}

// ---------------------------------------------------------------------------
// /v1/resources/virtual
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualResourcesRequest {
    pub resources: ResourceMap,
}

// ---------------------------------------------------------------------------
// /v1/deadlocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlocksResponse {
    #[serde(flatten)]
    pub report: DeadlockReport,
    /// Human-readable summary lines.
    pub explanation: Vec<String>,
}

// ---------------------------------------------------------------------------
// /v1/log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    pub entries: Vec<LogEntry>,
}

// ---------------------------------------------------------------------------
// /v1/simulation/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub playing: bool,
}

/// `created` is false when every share rounded down to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStepResponse {
    pub created: bool,
    #[serde(flatten)]
    pub step: Option<SimulationStep>,
}
