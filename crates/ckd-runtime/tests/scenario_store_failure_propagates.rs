//! Scenario: Store failures surface to the caller
//!
//! # Invariants under test
//!
//! 1. A failing write returns an error that is not classified as invalid
//!    input; the in-memory mutation stays applied.
//!
//! 2. Caller mistakes (duplicate id, negative quantity) are classified as
//!    invalid input and leave memory and store untouched.
//!
//! 3. Reads never touch the store's write path.
//!
//! 4. A store left behind by a failed or interrupted write can always be
//!    reopened: the next mutation rewrites it from memory, and a reopen
//!    derives available counts from the persisted grants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use ckd_config::KitchenSettings;
use ckd_db::{AllocationRow, LogEntry, MemoryStore, OrderRow, ResourceRow, Store};
use ckd_ledger::resource_map;
use ckd_runtime::{is_invalid_input, Kitchen};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Memory store whose writes fail while `broken` is set. With
/// `fail_next_grant` set, the next `upsert_order(.., "allocated", ..)` fails.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
    fail_next_grant: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("disk on fire");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for FlakyStore {
    async fn load_resources(&self) -> Result<Vec<ResourceRow>> {
        self.inner.load_resources().await
    }
    async fn upsert_resource(&self, name: &str, total: i64, available: i64) -> Result<()> {
        self.check()?;
        self.inner.upsert_resource(name, total, available).await
    }
    async fn load_orders(&self) -> Result<Vec<OrderRow>> {
        self.inner.load_orders().await
    }
    async fn upsert_order(&self, order_id: &str, status: &str, priority: i64) -> Result<()> {
        self.check()?;
        if status == "allocated" && self.fail_next_grant.swap(false, Ordering::SeqCst) {
            bail!("grant write lost");
        }
        self.inner.upsert_order(order_id, status, priority).await
    }
    async fn delete_order(&self, order_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_order(order_id).await
    }
    async fn load_allocations(&self) -> Result<Vec<AllocationRow>> {
        self.inner.load_allocations().await
    }
    async fn upsert_allocation(&self, order_id: &str, res: &str, qty: i64) -> Result<()> {
        self.check()?;
        self.inner.upsert_allocation(order_id, res, qty).await
    }
    async fn delete_allocations_for_order(&self, order_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_allocations_for_order(order_id).await
    }
    async fn append_log_entry(&self, ts_utc: DateTime<Utc>, event: &str) -> Result<()> {
        self.check()?;
        self.inner.append_log_entry(ts_utc, event).await
    }
    async fn recent_log_entries(&self, limit: i64) -> Result<Vec<LogEntry>> {
        self.inner.recent_log_entries(limit).await
    }
}

async fn kitchen() -> Result<(Kitchen, Arc<FlakyStore>)> {
    let store = Arc::new(FlakyStore::default());
    let kitchen = Kitchen::open(store.clone(), KitchenSettings::default()).await?;
    Ok((kitchen, store))
}

// ---------------------------------------------------------------------------
// 1: Infrastructure errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_write_is_reported_and_memory_keeps_the_mutation() -> Result<()> {
    let (kitchen, store) = kitchen().await?;
    store.broken.store(true, Ordering::SeqCst);

    let err = kitchen
        .create_order("OrderA", resource_map([("Oven", 1)]), None)
        .await
        .unwrap_err();
    assert!(!is_invalid_input(&err));
    assert!(format!("{err:#}").contains("disk on fire"));

    assert!(kitchen.current_requests().await.contains_key("OrderA"));
    assert!(store.inner.load_orders().await?.is_empty());

    store.broken.store(false, Ordering::SeqCst);
    let report = kitchen.process_pending_orders().await?;
    assert_eq!(report.allocated, vec!["OrderA".to_string()]);
    assert_eq!(store.inner.load_orders().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn open_fails_when_seeding_cannot_be_written() {
    let store = Arc::new(FlakyStore::default());
    store.broken.store(true, Ordering::SeqCst);
    assert!(Kitchen::open(store, KitchenSettings::default()).await.is_err());
}

// ---------------------------------------------------------------------------
// 2: Invalid input
// ---------------------------------------------------------------------------

#[tokio::test]
async fn caller_mistakes_are_invalid_input() -> Result<()> {
    let (kitchen, store) = kitchen().await?;
    kitchen
        .create_order("OrderA", resource_map([("Oven", 1)]), None)
        .await?;
    let before = kitchen.snapshot().await;
    let rows_before = store.inner.load_orders().await?;

    let dup = kitchen
        .create_order("OrderA", resource_map([("Chef", 1)]), None)
        .await
        .unwrap_err();
    assert!(is_invalid_input(&dup), "{dup:#}");

    let neg = kitchen
        .create_order("OrderB", resource_map([("Chef", -1)]), None)
        .await
        .unwrap_err();
    assert!(is_invalid_input(&neg), "{neg:#}");

    let empty = kitchen
        .create_order("", resource_map([("Chef", 1)]), None)
        .await
        .unwrap_err();
    assert!(is_invalid_input(&empty), "{empty:#}");

    assert_eq!(kitchen.snapshot().await, before);
    assert_eq!(store.inner.load_orders().await?, rows_before);
    Ok(())
}

// ---------------------------------------------------------------------------
// 3: Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn analysis_reads_work_while_writes_are_broken() -> Result<()> {
    let (kitchen, store) = kitchen().await?;
    kitchen
        .submit_order("OrderA", resource_map([("Oven", 1)]), None)
        .await?;
    store.broken.store(true, Ordering::SeqCst);

    assert!(kitchen.detect_deadlocks().await.is_empty());
    let report = kitchen.analyze().await;
    assert!(report.safety.safe);
    assert_eq!(kitchen.status().await.available_of("Oven"), 0);
    assert_eq!(kitchen.active_orders().await.len(), 1);

    // The safety verdict is logged, so it fails with the store.
    assert!(kitchen.check_safe_state().await.is_err());
    Ok(())
}

// ---------------------------------------------------------------------------
// 4: Recovery after partial writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_grant_write_is_repaired_by_the_next_mutation() -> Result<()> {
    let (kitchen, store) = kitchen().await?;
    kitchen
        .create_order("OrderA", resource_map([("Oven", 1)]), None)
        .await?;

    store.fail_next_grant.store(true, Ordering::SeqCst);
    let err = kitchen.process_pending_orders().await.unwrap_err();
    assert!(!is_invalid_input(&err));
    assert!(kitchen.active_orders().await.contains_key("OrderA"));
    let rows = store.inner.load_orders().await?;
    assert_eq!(rows[0].status, "pending");

    kitchen
        .add_virtual_resources(&resource_map([("Chef", 1)]))
        .await?;
    kitchen.process_pending_orders().await?;

    let rows = store.inner.load_orders().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "allocated");
    let allocs = store.inner.load_allocations().await?;
    assert_eq!(allocs.len(), 1);
    assert_eq!((allocs[0].resource_name.as_str(), allocs[0].quantity), ("Oven", 1));

    let reopened = Kitchen::open(store.clone(), KitchenSettings::default()).await?;
    assert_eq!(reopened.snapshot().await, kitchen.snapshot().await);
    reopened.check_invariants().await?;
    Ok(())
}

#[tokio::test]
async fn failed_removal_write_is_repaired_by_the_next_mutation() -> Result<()> {
    let (kitchen, store) = kitchen().await?;
    kitchen
        .submit_order("OrderA", resource_map([("Oven", 1)]), None)
        .await?;

    store.broken.store(true, Ordering::SeqCst);
    assert!(kitchen.release_order("OrderA").await.is_err());
    store.broken.store(false, Ordering::SeqCst);

    kitchen
        .create_order("OrderB", resource_map([("Chef", 1)]), None)
        .await?;
    let ids: Vec<_> = store
        .inner
        .load_orders()
        .await?
        .into_iter()
        .map(|r| r.order_id)
        .collect();
    assert_eq!(ids, vec!["OrderB".to_string()]);

    let reopened = Kitchen::open(store.clone(), KitchenSettings::default()).await?;
    assert_eq!(reopened.snapshot().await, kitchen.snapshot().await);
    Ok(())
}

#[tokio::test]
async fn reopen_derives_available_from_persisted_grants() -> Result<()> {
    // A process stopped after the resource row was written but before the
    // order row: the column says the oven is taken, the rows say pending.
    let store = Arc::new(MemoryStore::new());
    store.upsert_resource("Oven", 1, 0).await?;
    store.upsert_resource("Chef", 2, 2).await?;
    store.upsert_order("OrderA", "pending", 1).await?;
    store.upsert_allocation("OrderA", "Oven", 1).await?;

    let kitchen = Kitchen::open(store.clone(), KitchenSettings::default()).await?;
    assert_eq!(kitchen.status().await.available_of("Oven"), 1);
    let oven = store
        .load_resources()
        .await?
        .into_iter()
        .find(|r| r.resource_name == "Oven")
        .map(|r| r.available);
    assert_eq!(oven, Some(1));

    let report = kitchen.process_pending_orders().await?;
    assert_eq!(report.allocated, vec!["OrderA".to_string()]);
    kitchen.check_invariants().await?;
    Ok(())
}
