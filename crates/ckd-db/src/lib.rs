//! ckd-db
//!
//! Persistence for kitchen state.
//! - [`Store`]: the load/save contract the runtime writes through
//! - [`SqliteStore`]: single-file SQLite store with embedded migrations
//! - [`MemoryStore`]: process-local store for tests and ephemeral daemons
//!
//! Row types mirror the tables one-to-one. Interpreting them (which rows are
//! grants vs. requests) is the runtime's job.

mod memory;
mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{MemoryStore, MEMORY_LOG_CAPACITY};
pub use sqlite::{DbStatus, SqliteStore, ENV_DB_PATH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRow {
    pub resource_name: String,
    pub total: i64,
    pub available: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRow {
    pub order_id: String,
    /// `"pending"` or `"allocated"`.
    pub status: String,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub order_id: String,
    pub resource_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts_utc: DateTime<Utc>,
    pub event: String,
}

/// Durable load/save interface for resources, orders, allocation rows and
/// the event log.
///
/// Every method is a single write or read; callers serialize mutations.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn load_resources(&self) -> Result<Vec<ResourceRow>>;
    async fn upsert_resource(&self, resource_name: &str, total: i64, available: i64)
        -> Result<()>;

    async fn load_orders(&self) -> Result<Vec<OrderRow>>;
    async fn upsert_order(&self, order_id: &str, status: &str, priority: i64) -> Result<()>;
    /// Removes the order and its allocation rows.
    async fn delete_order(&self, order_id: &str) -> Result<()>;

    async fn load_allocations(&self) -> Result<Vec<AllocationRow>>;
    async fn upsert_allocation(
        &self,
        order_id: &str,
        resource_name: &str,
        quantity: i64,
    ) -> Result<()>;
    async fn delete_allocations_for_order(&self, order_id: &str) -> Result<()>;

    async fn append_log_entry(&self, ts_utc: DateTime<Utc>, event: &str) -> Result<()>;
    /// Newest first, at most `limit` entries.
    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<LogEntry>>;
}
