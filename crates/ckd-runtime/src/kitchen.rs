use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ckd_analyzer::{analyze, AnalysisInput, DeadlockReport, SafetyReport};
use ckd_config::KitchenSettings;
use ckd_db::{LogEntry, Store};
use ckd_ledger::{AllocationMap, LedgerStatus, ResourceMap};
use ckd_orders::{
    CoordinatorSnapshot, CreateOutcome, OrderCoordinator, OrderStatus, ProcessReport, RemovedOrder,
};

use crate::is_invalid_input;
use crate::restore::{load_or_seed, next_sequential_order_no};

/// Entries returned by [`Kitchen::recent_log`] when the caller has no
/// preference.
pub const DEFAULT_LOG_LIMIT: i64 = 50;

/// Result of one [`Kitchen::simulation_step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStep {
    pub order_id: String,
    pub request: ResourceMap,
    pub report: ProcessReport,
}

/// Everything guarded by the kitchen lock.
struct KitchenState {
    coordinator: OrderCoordinator,
    next_order_no: u64,
    /// A write-through failed; the store may disagree with memory until the
    /// next mutation rewrites it.
    store_dirty: bool,
}

impl KitchenState {
    /// Mark the store dirty when `result` is a store failure.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !is_invalid_input(err) {
                self.store_dirty = true;
            }
        }
        result
    }
}

/// Shared kitchen service.
///
/// Every mutation runs under one lock and writes through to the store
/// before the lock is released, so the store sees mutations in lock order.
/// If a store write fails the in-memory state keeps the mutation, the error
/// is returned to the caller, and the next mutation first rewrites the
/// whole kitchen state to the store.
pub struct Kitchen {
    store: Arc<dyn Store>,
    settings: KitchenSettings,
    state: Mutex<KitchenState>,
}

impl Kitchen {
    /// Restore from `store`, or seed it with `settings.resources` when empty.
    pub async fn open(store: Arc<dyn Store>, settings: KitchenSettings) -> Result<Self> {
        settings.validate()?;
        let (coordinator, restored) = load_or_seed(store.as_ref(), &settings).await?;
        let next_order_no = next_sequential_order_no(&coordinator);

        let kitchen = Self {
            store,
            settings,
            state: Mutex::new(KitchenState {
                coordinator,
                next_order_no,
                store_dirty: false,
            }),
        };

        {
            let st = kitchen.state.lock().await;
            let n_resources = st.coordinator.ledger().total().len();
            let n_orders = st.coordinator.orders().count();
            if restored {
                info!(n_resources, n_orders, "kitchen restored from store");
                kitchen
                    .log(format!(
                        "Kitchen restored: {n_resources} resources, {n_orders} orders"
                    ))
                    .await?;
            } else {
                info!(n_resources, "kitchen seeded from settings");
                kitchen
                    .log(format!("Kitchen initialised with {n_resources} resources"))
                    .await?;
            }
        }

        Ok(kitchen)
    }

    pub fn settings(&self) -> &KitchenSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Order lifecycle
    // -----------------------------------------------------------------------

    /// Register a pending order. `priority` defaults to the configured
    /// default priority.
    pub async fn create_order(
        &self,
        order_id: &str,
        request: ResourceMap,
        priority: Option<i64>,
    ) -> Result<CreateOutcome> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let result = self
            .create_locked(&mut st.coordinator, order_id, request, priority)
            .await;
        st.track(result)
    }

    /// Create an order and immediately run one allocation pass.
    pub async fn submit_order(
        &self,
        order_id: &str,
        request: ResourceMap,
        priority: Option<i64>,
    ) -> Result<(CreateOutcome, ProcessReport)> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let result = self
            .create_locked(&mut st.coordinator, order_id, request, priority)
            .await;
        let outcome = st.track(result)?;
        let result = self.process_locked(&mut st.coordinator).await;
        let report = st.track(result)?;
        Ok((outcome, report))
    }

    /// One greedy allocation pass over pending orders.
    pub async fn process_pending_orders(&self) -> Result<ProcessReport> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let result = self.process_locked(&mut st.coordinator).await;
        st.track(result)
    }

    /// Release an order's resources and delete it. Unknown ids return
    /// `Ok(None)`.
    pub async fn release_order(&self, order_id: &str) -> Result<Option<RemovedOrder>> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let removed = st.coordinator.release_order(order_id);
        let result = self.finish_removal(&st.coordinator, removed, "released").await;
        st.track(result)
    }

    /// Abandon an order. Same effect as [`release_order`](Self::release_order).
    pub async fn abort_order(&self, order_id: &str) -> Result<Option<RemovedOrder>> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let removed = st.coordinator.cancel_order(order_id);
        let result = self.finish_removal(&st.coordinator, removed, "aborted").await;
        st.track(result)
    }

    /// Forcibly reclaim an order's resources; the order is deleted.
    pub async fn preempt_order(&self, order_id: &str) -> Result<Option<RemovedOrder>> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let removed = st.coordinator.preempt_order(order_id);
        let result = self
            .finish_removal(&st.coordinator, removed, "preempted")
            .await;
        st.track(result)
    }

    /// Change priority only. Returns `false` for unknown ids.
    pub async fn reschedule_order(&self, order_id: &str, new_priority: i64) -> Result<bool> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        if !st.coordinator.reschedule_order(order_id, new_priority) {
            debug!(order_id, "reschedule of unknown order ignored");
            return Ok(false);
        }
        let result = self.persist_order(&st.coordinator, order_id).await;
        st.track(result)?;
        info!(order_id, priority = new_priority, "order rescheduled");
        let result = self
            .log(format!(
                "Order {order_id} rescheduled to priority {new_priority}"
            ))
            .await;
        st.track(result)?;
        Ok(true)
    }

    /// Grow capacity. Existing resources gain `qty`; new names are created.
    pub async fn add_virtual_resources(&self, additions: &ResourceMap) -> Result<()> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        st.coordinator
            .add_virtual_resources(additions)
            .map_err(anyhow::Error::new)?;
        let result = self.persist_resources(&st.coordinator).await;
        st.track(result)?;
        info!(?additions, "virtual resources added");
        let result = self
            .log(format!(
                "Virtual resources added: {}",
                format_resources(additions)
            ))
            .await;
        st.track(result)
    }

    // -----------------------------------------------------------------------
    // Simulation
    // -----------------------------------------------------------------------

    /// Create `Order{n}` requesting `floor(total * request_fraction)` of each
    /// resource (zero results omitted), then run one allocation pass.
    ///
    /// Returns `Ok(None)` without creating an order when every share rounds
    /// down to zero.
    pub async fn simulation_step(&self) -> Result<Option<SimulationStep>> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;

        let fraction = self.settings.simulation.request_fraction;
        let request: ResourceMap = st
            .coordinator
            .ledger()
            .total()
            .iter()
            .filter_map(|(name, &total)| {
                let qty = (total as f64 * fraction).floor() as i64;
                (qty > 0).then(|| (name.clone(), qty))
            })
            .collect();
        if request.is_empty() {
            debug!(fraction, "simulation step skipped: nothing to request");
            return Ok(None);
        }

        let mut n = st.next_order_no;
        let mut order_id = format!("Order{n}");
        while st.coordinator.order(&order_id).is_some() {
            n += 1;
            order_id = format!("Order{n}");
        }
        st.next_order_no = n + 1;

        let result = self
            .create_locked(&mut st.coordinator, &order_id, request.clone(), None)
            .await;
        st.track(result)?;
        let result = self.process_locked(&mut st.coordinator).await;
        let report = st.track(result)?;
        debug!(order_id, ?report, "simulation step");

        Ok(Some(SimulationStep {
            order_id,
            request,
            report,
        }))
    }

    /// Drop every order and make all capacity available again.
    pub async fn reset(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        self.resync_locked(&mut st).await?;
        let ids: Vec<String> = st
            .coordinator
            .orders()
            .map(|o| o.order_id.clone())
            .collect();
        st.coordinator.reset();
        st.next_order_no = 1;

        let result = self.persist_reset(&st.coordinator, &ids).await;
        st.track(result)?;
        info!(removed = ids.len(), "simulation reset");
        let result = self.log("Simulation reset".to_string()).await;
        st.track(result)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn status(&self) -> LedgerStatus {
        self.state.lock().await.coordinator.status()
    }

    pub async fn current_requests(&self) -> AllocationMap {
        self.state.lock().await.coordinator.current_requests()
    }

    pub async fn active_orders(&self) -> AllocationMap {
        self.state.lock().await.coordinator.active_orders()
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        self.state.lock().await.coordinator.snapshot()
    }

    /// Copy under the lock; the analyzer runs on the copy.
    pub async fn analysis_input(&self) -> AnalysisInput {
        let snap = self.snapshot().await;
        AnalysisInput {
            allocations: snap.ledger.allocated,
            requests: snap.pending,
            available: snap.ledger.available,
            max_demand: None,
        }
    }

    pub async fn analyze(&self) -> DeadlockReport {
        let input = self.analysis_input().await;
        let report = analyze(&input);
        if report.has_deadlock() {
            warn!(deadlocked = ?report.deadlocked, "deadlock detected");
        }
        report
    }

    /// Cycles in the current wait-for graph.
    pub async fn detect_deadlocks(&self) -> Vec<BTreeSet<String>> {
        self.analyze().await.cycles
    }

    /// Banker's check over the current state; the verdict is logged.
    pub async fn check_safe_state(&self) -> Result<SafetyReport> {
        let safety = self.analyze().await.safety;
        if safety.safe {
            info!(sequence = ?safety.safe_sequence, "state is safe");
            self.log(
                "System is in a safe state according to Banker's Algorithm.".to_string(),
            )
            .await?;
        } else {
            warn!(unfinished = ?safety.unfinished, "state is unsafe");
            self.log(
                "System is in an unsafe state according to Banker's Algorithm.".to_string(),
            )
            .await?;
        }
        Ok(safety)
    }

    /// Newest first.
    pub async fn recent_log(&self, limit: i64) -> Result<Vec<LogEntry>> {
        self.store.recent_log_entries(limit).await
    }

    /// Coordinator and ledger invariants.
    pub async fn check_invariants(&self) -> Result<()> {
        self.state
            .lock()
            .await
            .coordinator
            .check_invariants()
            .map_err(anyhow::Error::new)
    }

    // -----------------------------------------------------------------------
    // Locked helpers
    // -----------------------------------------------------------------------

    async fn create_locked(
        &self,
        coordinator: &mut OrderCoordinator,
        order_id: &str,
        request: ResourceMap,
        priority: Option<i64>,
    ) -> Result<CreateOutcome> {
        let priority = priority.unwrap_or(self.settings.default_priority);
        let outcome = coordinator
            .create_order(order_id, request, priority)
            .map_err(anyhow::Error::new)?;

        self.persist_order(coordinator, order_id).await?;
        if outcome.released.is_some() {
            self.persist_resources(coordinator).await?;
        }

        info!(order_id, priority, replaced = outcome.replaced, "order created");
        self.log(format!("Order {order_id} created with priority {priority}"))
            .await?;
        Ok(outcome)
    }

    async fn process_locked(&self, coordinator: &mut OrderCoordinator) -> Result<ProcessReport> {
        let report = coordinator.process_pending_orders();

        for order_id in &report.allocated {
            self.persist_order(coordinator, order_id).await?;
        }
        if !report.allocated.is_empty() {
            self.persist_resources(coordinator).await?;
        }
        for order_id in &report.allocated {
            info!(order_id = %order_id, "order allocated");
            self.log(format!("Order {order_id} allocated resources"))
                .await?;
        }
        for order_id in &report.rejected {
            warn!(order_id = %order_id, "pending request refused by the ledger");
        }
        for order_id in &report.still_pending {
            debug!(order_id = %order_id, "order still pending");
        }
        Ok(report)
    }

    async fn finish_removal(
        &self,
        coordinator: &OrderCoordinator,
        removed: Option<RemovedOrder>,
        verb: &str,
    ) -> Result<Option<RemovedOrder>> {
        let Some(removed) = removed else {
            return Ok(None);
        };
        let order_id = removed.record.order_id.as_str();

        self.store.delete_order(order_id).await?;
        if removed.released.is_some() {
            self.persist_resources(coordinator).await?;
        }

        info!(order_id, released = ?removed.released, "order {verb}");
        self.log(format!("Order {order_id} {verb}")).await?;
        Ok(Some(removed))
    }

    // -----------------------------------------------------------------------
    // Write-through
    // -----------------------------------------------------------------------

    /// After a failed write, rewrite every resource and order row from memory
    /// and delete rows for orders memory no longer has.
    async fn resync_locked(&self, st: &mut KitchenState) -> Result<()> {
        if !st.store_dirty {
            return Ok(());
        }
        warn!("store behind memory after a failed write; rewriting kitchen state");

        let live: BTreeSet<String> = st
            .coordinator
            .orders()
            .map(|o| o.order_id.clone())
            .collect();
        for row in self.store.load_orders().await? {
            if !live.contains(&row.order_id) {
                self.store.delete_order(&row.order_id).await?;
            }
        }
        for order_id in &live {
            self.persist_order(&st.coordinator, order_id).await?;
        }
        self.persist_resources(&st.coordinator).await?;

        st.store_dirty = false;
        info!(n_orders = live.len(), "store resynchronised");
        self.log(format!("Store resynchronised: {} orders", live.len()))
            .await
    }

    async fn persist_reset(&self, coordinator: &OrderCoordinator, ids: &[String]) -> Result<()> {
        for id in ids {
            self.store.delete_order(id).await?;
        }
        self.persist_resources(coordinator).await
    }

    async fn persist_resources(&self, coordinator: &OrderCoordinator) -> Result<()> {
        let ledger = coordinator.ledger();
        for (name, &total) in ledger.total() {
            self.store
                .upsert_resource(name, total, ledger.available_of(name))
                .await?;
        }
        Ok(())
    }

    /// Order row plus its allocation rows: the grant when allocated, the
    /// request when pending.
    async fn persist_order(&self, coordinator: &OrderCoordinator, order_id: &str) -> Result<()> {
        let Some(rec) = coordinator.order(order_id) else {
            return Ok(());
        };
        let rows = match rec.status {
            OrderStatus::Allocated => coordinator
                .ledger()
                .held_by(order_id)
                .cloned()
                .unwrap_or_default(),
            OrderStatus::Pending => rec.request.clone(),
        };

        self.store
            .upsert_order(order_id, rec.status.as_str(), rec.priority)
            .await?;
        self.store.delete_allocations_for_order(order_id).await?;
        for (res, &qty) in &rows {
            self.store.upsert_allocation(order_id, res, qty).await?;
        }
        Ok(())
    }

    async fn log(&self, event: String) -> Result<()> {
        self.store.append_log_entry(Utc::now(), &event).await
    }
}

fn format_resources(map: &ResourceMap) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
