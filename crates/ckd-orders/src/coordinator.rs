//! Order coordinator: lifecycle, priority and the greedy allocation pass.
//!
//! # Invariants
//! - An order id is never both pending and holding an allocation.
//! - An `Allocated` record's granted resources live in the ledger; a
//!   `Pending` record's request lives only here.
//! - Every ledger allocation belongs to an `Allocated` record.
//!
//! The coordinator owns its ledger. Wrapping one `OrderCoordinator` in a
//! single lock gives ledger and order maps one mutual-exclusion domain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ckd_ledger::{
    validate_quantities, AllocationMap, LedgerError, LedgerStatus, ResourceLedger, ResourceMap,
};

use crate::state_machine::{OrderEvent, OrderRecord, OrderStatus, TransitionError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Input rejected by the ledger's validation.
    Ledger(LedgerError),
    /// Internal state machine refused an event.
    Transition(TransitionError),
    /// `create_order` on an existing id under [`DuplicateOrderPolicy::Reject`].
    DuplicateOrder { order_id: String },
    /// Order ids must be non-empty.
    EmptyOrderId,
    /// The request names no positive quantity.
    EmptyRequest { order_id: String },
    /// Persisted rows do not describe a consistent state.
    RestoreMismatch { order_id: String, detail: String },
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger(_) => write!(f, "ledger rejected input"),
            Self::Transition(_) => write!(f, "order transition refused"),
            Self::DuplicateOrder { order_id } => {
                write!(f, "order {order_id} already exists")
            }
            Self::EmptyOrderId => write!(f, "order id must not be empty"),
            Self::EmptyRequest { order_id } => {
                write!(f, "order {order_id} requests no resources")
            }
            Self::RestoreMismatch { order_id, detail } => {
                write!(f, "restore mismatch for {order_id}: {detail}")
            }
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ledger(e) => Some(e),
            Self::Transition(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for CoordinatorError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<TransitionError> for CoordinatorError {
    fn from(e: TransitionError) -> Self {
        Self::Transition(e)
    }
}

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// What `create_order` does when the id already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateOrderPolicy {
    #[default]
    Reject,
    /// Replace request and priority. A held allocation is released first.
    Overwrite,
}

/// Result of a successful `create_order`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOutcome {
    /// An existing record was replaced.
    pub replaced: bool,
    /// Quantities returned to the pool because the replaced order held them.
    pub released: Option<ResourceMap>,
}

/// Outcome of one allocation pass, all lists in attempt order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub allocated: Vec<String>,
    pub still_pending: Vec<String>,
    /// Subset of `still_pending` whose request the ledger refused outright,
    /// e.g. an unknown resource under the strict policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

/// An order removed by release, abort or preemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedOrder {
    pub record: OrderRecord,
    /// `None` when the order held nothing (it was pending).
    pub released: Option<ResourceMap>,
}

/// Owned, consistent copy of everything the analyzer and presentation
/// layers read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub ledger: LedgerStatus,
    /// Pending order id -> outstanding request.
    pub pending: AllocationMap,
    /// Allocated order id -> granted resources.
    pub active: AllocationMap,
    pub priorities: BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// OrderCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderCoordinator {
    ledger: ResourceLedger,
    orders: BTreeMap<String, OrderRecord>,
    duplicate_policy: DuplicateOrderPolicy,
}

impl OrderCoordinator {
    pub fn new(ledger: ResourceLedger) -> Self {
        Self {
            ledger,
            orders: BTreeMap::new(),
            duplicate_policy: DuplicateOrderPolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateOrderPolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn duplicate_policy(&self) -> DuplicateOrderPolicy {
        self.duplicate_policy
    }

    /// Rebuild from a restored ledger and persisted order records.
    ///
    /// `Allocated` records must match the ledger's allocation for their id;
    /// `Pending` records must hold nothing; every ledger allocation must
    /// belong to an `Allocated` record.
    pub fn restore(
        ledger: ResourceLedger,
        records: Vec<OrderRecord>,
    ) -> Result<Self, CoordinatorError> {
        let mut orders = BTreeMap::new();

        for rec in records {
            validate_order_id(&rec.order_id)?;
            validate_quantities(&rec.request)?;

            let held = ledger.held_by(&rec.order_id);
            match rec.status {
                OrderStatus::Allocated => {
                    let granted = positive_entries(&rec.request);
                    let matches = match held {
                        Some(h) => *h == granted,
                        None => granted.is_empty(),
                    };
                    if !matches {
                        return Err(CoordinatorError::RestoreMismatch {
                            order_id: rec.order_id,
                            detail: "allocation rows differ from ledger".to_string(),
                        });
                    }
                }
                OrderStatus::Pending => {
                    if held.is_some() {
                        return Err(CoordinatorError::RestoreMismatch {
                            order_id: rec.order_id,
                            detail: "pending order holds resources".to_string(),
                        });
                    }
                }
            }

            if orders.contains_key(&rec.order_id) {
                return Err(CoordinatorError::DuplicateOrder {
                    order_id: rec.order_id,
                });
            }
            orders.insert(rec.order_id.clone(), rec);
        }

        for order_id in ledger.allocations().keys() {
            if !orders.contains_key(order_id) {
                return Err(CoordinatorError::RestoreMismatch {
                    order_id: order_id.clone(),
                    detail: "allocation without order".to_string(),
                });
            }
        }

        Ok(Self {
            ledger,
            orders,
            duplicate_policy: DuplicateOrderPolicy::default(),
        })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Register `order_id` as pending with `request` and `priority`.
    ///
    /// # Errors
    /// Empty id, malformed or empty request, unknown resource under the
    /// ledger's `Reject` policy, or an existing id under
    /// [`DuplicateOrderPolicy::Reject`]. State is unchanged on error.
    pub fn create_order(
        &mut self,
        order_id: &str,
        request: ResourceMap,
        priority: i64,
    ) -> Result<CreateOutcome, CoordinatorError> {
        validate_order_id(order_id)?;
        validate_quantities(&request)?;
        if positive_entries(&request).is_empty() {
            return Err(CoordinatorError::EmptyRequest {
                order_id: order_id.to_string(),
            });
        }
        self.ledger.check_known(&request)?;

        let mut outcome = CreateOutcome::default();
        if self.orders.contains_key(order_id) {
            match self.duplicate_policy {
                DuplicateOrderPolicy::Reject => {
                    return Err(CoordinatorError::DuplicateOrder {
                        order_id: order_id.to_string(),
                    });
                }
                DuplicateOrderPolicy::Overwrite => {
                    outcome.replaced = true;
                    outcome.released = self.ledger.release_resources(order_id);
                }
            }
        }

        self.orders.insert(
            order_id.to_string(),
            OrderRecord::pending(order_id, request, priority),
        );
        Ok(outcome)
    }

    /// One greedy pass over pending orders by
    /// [`attempt_key`](OrderRecord::attempt_key).
    ///
    /// Each order is attempted exactly once. An order that fails stays
    /// pending until the next call. A request the ledger refuses is reported
    /// in `rejected` and the pass carries on, so grants made earlier in the
    /// pass are always reported.
    pub fn process_pending_orders(&mut self) -> ProcessReport {
        let mut pending: Vec<&OrderRecord> =
            self.orders.values().filter(|o| o.is_pending()).collect();
        pending.sort_by(|a, b| a.attempt_key().cmp(&b.attempt_key()));
        let queue: Vec<String> = pending.into_iter().map(|o| o.order_id.clone()).collect();

        let mut report = ProcessReport::default();
        for order_id in queue {
            let Some(record) = self.orders.get_mut(&order_id) else {
                continue;
            };
            match self.ledger.request_resources(&order_id, &record.request) {
                Ok(true) => {
                    if record.apply(OrderEvent::Grant).is_err() {
                        self.ledger.release_resources(&order_id);
                        continue;
                    }
                    report.allocated.push(order_id);
                }
                Ok(false) => report.still_pending.push(order_id),
                Err(_) => {
                    report.rejected.push(order_id.clone());
                    report.still_pending.push(order_id);
                }
            }
        }
        report
    }

    /// Release held resources (if any) and delete the order.
    /// Unknown ids are a no-op returning `None`.
    pub fn release_order(&mut self, order_id: &str) -> Option<RemovedOrder> {
        let record = self.orders.remove(order_id)?;
        let released = self.ledger.release_resources(order_id);
        Some(RemovedOrder { record, released })
    }

    /// Same effect as [`release_order`](Self::release_order); named for
    /// callers abandoning an order.
    pub fn cancel_order(&mut self, order_id: &str) -> Option<RemovedOrder> {
        self.release_order(order_id)
    }

    /// Forcibly reclaim the order's resources and delete it.
    pub fn preempt_order(&mut self, order_id: &str) -> Option<RemovedOrder> {
        let record = self.orders.remove(order_id)?;
        let released = self.ledger.preempt_resources(order_id);
        Some(RemovedOrder { record, released })
    }

    /// Change priority only; no allocation is attempted. Returns `false` for
    /// unknown ids.
    pub fn reschedule_order(&mut self, order_id: &str, new_priority: i64) -> bool {
        match self.orders.get_mut(order_id) {
            Some(rec) => {
                rec.priority = new_priority;
                true
            }
            None => false,
        }
    }

    pub fn add_virtual_resources(&mut self, additions: &ResourceMap) -> Result<(), CoordinatorError> {
        self.ledger.add_virtual_resources(additions)?;
        Ok(())
    }

    /// Drop every order and restore full availability.
    pub fn reset(&mut self) {
        self.orders.clear();
        self.ledger.reset();
    }

    // -----------------------------------------------------------------------
    // Reads (all owned copies)
    // -----------------------------------------------------------------------

    pub fn status(&self) -> LedgerStatus {
        self.ledger.status()
    }

    /// Pending order id -> outstanding request.
    pub fn current_requests(&self) -> AllocationMap {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .map(|o| (o.order_id.clone(), o.request.clone()))
            .collect()
    }

    /// Allocated order id -> granted resources.
    pub fn active_orders(&self) -> AllocationMap {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Allocated)
            .map(|o| {
                let held = self.ledger.held_by(&o.order_id).cloned().unwrap_or_default();
                (o.order_id.clone(), held)
            })
            .collect()
    }

    pub fn priorities(&self) -> BTreeMap<String, i64> {
        self.orders
            .values()
            .map(|o| (o.order_id.clone(), o.priority))
            .collect()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            ledger: self.ledger.status(),
            pending: self.current_requests(),
            active: self.active_orders(),
            priorities: self.priorities(),
        }
    }

    pub fn order(&self, order_id: &str) -> Option<&OrderRecord> {
        self.orders.get(order_id)
    }

    /// All orders by id.
    pub fn orders(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Ledger invariants plus the pending/allocated exclusivity rules.
    pub fn check_invariants(&self) -> Result<(), CoordinatorError> {
        self.ledger.check_invariants()?;

        for rec in self.orders.values() {
            if rec.is_pending() && self.ledger.holds(&rec.order_id) {
                return Err(CoordinatorError::RestoreMismatch {
                    order_id: rec.order_id.clone(),
                    detail: "pending order holds resources".to_string(),
                });
            }
        }
        for order_id in self.ledger.allocations().keys() {
            let allocated = self
                .orders
                .get(order_id)
                .is_some_and(|o| o.status == OrderStatus::Allocated);
            if !allocated {
                return Err(CoordinatorError::RestoreMismatch {
                    order_id: order_id.clone(),
                    detail: "allocation without allocated order".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn validate_order_id(order_id: &str) -> Result<(), CoordinatorError> {
    if order_id.trim().is_empty() {
        return Err(CoordinatorError::EmptyOrderId);
    }
    Ok(())
}

fn positive_entries(map: &ResourceMap) -> ResourceMap {
    map.iter()
        .filter(|(_, q)| **q > 0)
        .map(|(r, q)| (r.clone(), *q))
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
