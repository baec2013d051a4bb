use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::{AllocationRow, LogEntry, OrderRow, ResourceRow, Store};

#[derive(Debug, Default)]
struct Tables {
    resources: BTreeMap<String, (i64, i64)>,
    orders: BTreeMap<String, (String, i64)>,
    allocations: BTreeMap<(String, String), i64>,
    logs: VecDeque<LogEntry>,
}

/// Log entries a [`MemoryStore`] keeps by default; older ones are dropped.
pub const MEMORY_LOG_CAPACITY: usize = 10_000;

/// In-process [`Store`]. Same semantics as [`SqliteStore`](crate::SqliteStore)
/// without durability, except that only the newest log entries are kept.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    log_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_log_capacity(MEMORY_LOG_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            log_capacity: log_capacity.max(1),
        }
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn load_resources(&self) -> Result<Vec<ResourceRow>> {
        self.with_tables(|t| {
            t.resources
                .iter()
                .map(|(name, &(total, available))| ResourceRow {
                    resource_name: name.clone(),
                    total,
                    available,
                })
                .collect()
        })
    }

    async fn upsert_resource(
        &self,
        resource_name: &str,
        total: i64,
        available: i64,
    ) -> Result<()> {
        self.with_tables(|t| {
            t.resources
                .insert(resource_name.to_string(), (total, available));
        })
    }

    async fn load_orders(&self) -> Result<Vec<OrderRow>> {
        self.with_tables(|t| {
            t.orders
                .iter()
                .map(|(id, (status, priority))| OrderRow {
                    order_id: id.clone(),
                    status: status.clone(),
                    priority: *priority,
                })
                .collect()
        })
    }

    async fn upsert_order(&self, order_id: &str, status: &str, priority: i64) -> Result<()> {
        self.with_tables(|t| {
            t.orders
                .insert(order_id.to_string(), (status.to_string(), priority));
        })
    }

    async fn delete_order(&self, order_id: &str) -> Result<()> {
        self.with_tables(|t| {
            t.allocations.retain(|(oid, _), _| oid != order_id);
            t.orders.remove(order_id);
        })
    }

    async fn load_allocations(&self) -> Result<Vec<AllocationRow>> {
        self.with_tables(|t| {
            t.allocations
                .iter()
                .map(|((order_id, resource_name), &quantity)| AllocationRow {
                    order_id: order_id.clone(),
                    resource_name: resource_name.clone(),
                    quantity,
                })
                .collect()
        })
    }

    async fn upsert_allocation(
        &self,
        order_id: &str,
        resource_name: &str,
        quantity: i64,
    ) -> Result<()> {
        self.with_tables(|t| {
            if !t.orders.contains_key(order_id) {
                return Err(anyhow!(
                    "upsert_allocation failed for {order_id}/{resource_name}: unknown order"
                ));
            }
            t.allocations
                .insert((order_id.to_string(), resource_name.to_string()), quantity);
            Ok(())
        })?
    }

    async fn delete_allocations_for_order(&self, order_id: &str) -> Result<()> {
        self.with_tables(|t| {
            t.allocations.retain(|(oid, _), _| oid != order_id);
        })
    }

    async fn append_log_entry(&self, ts_utc: DateTime<Utc>, event: &str) -> Result<()> {
        let cap = self.log_capacity;
        self.with_tables(|t| {
            while t.logs.len() >= cap {
                t.logs.pop_front();
            }
            t.logs.push_back(LogEntry {
                ts_utc,
                event: event.to_string(),
            });
        })
    }

    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        self.with_tables(|t| t.logs.iter().rev().take(limit).cloned().collect())
    }
}
