//! Resource ledger: capacity counts and per-order allocation records.
//!
//! # Invariants
//! For every resource `r`, after every successful call:
//!
//! - `0 ≤ available[r] ≤ total[r]`
//! - `available[r] + Σ allocated[order][r] == total[r]`
//! - no allocation record stores a zero or negative quantity
//!
//! Every write validates its input first and returns [`LedgerError`] without
//! touching state when the input is malformed. Insufficient capacity is not
//! an error: [`ResourceLedger::request_resources`] returns `Ok(false)`.
//!
//! # Usage
//! ```ignore
//! let mut ledger = ResourceLedger::new(&resource_map([("Oven", 1)]))?;
//! assert!(ledger.request_resources("Order1", &resource_map([("Oven", 1)]))?);
//! assert!(!ledger.request_resources("Order2", &resource_map([("Oven", 1)]))?);
//! ledger.release_resources("Order1");
//! ```

use std::collections::BTreeSet;

use crate::types::{AllocationMap, LedgerStatus, ResourceMap, UnknownResourcePolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Contract violations the ledger refuses to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Order ids must be non-empty.
    EmptyOrderId,
    /// Resource names must be non-empty.
    EmptyResourceName,
    /// Quantities must be `>= 0`.
    NegativeQty { resource: String, qty: i64 },
    /// Request names a resource the ledger does not know, under
    /// [`UnknownResourcePolicy::Reject`].
    UnknownResource { resource: String },
    /// The order already holds an allocation; grants are all-or-nothing and
    /// never grow.
    AlreadyAllocated { order_id: String },
    /// Adding capacity would overflow `i64`.
    Overflow { resource: String },
    /// Supplied or derived counts break `available = total − Σ allocated`.
    InvariantViolation {
        resource: String,
        total: i64,
        available: i64,
        allocated: i64,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyOrderId => write!(f, "ledger: order id must not be empty"),
            Self::EmptyResourceName => write!(f, "ledger: resource name must not be empty"),
            Self::NegativeQty { resource, qty } => {
                write!(f, "ledger: quantity for {resource} must be >= 0, got {qty}")
            }
            Self::UnknownResource { resource } => {
                write!(f, "ledger: unknown resource {resource}")
            }
            Self::AlreadyAllocated { order_id } => {
                write!(f, "ledger: order {order_id} already holds an allocation")
            }
            Self::Overflow { resource } => {
                write!(f, "ledger: capacity overflow for {resource}")
            }
            Self::InvariantViolation {
                resource,
                total,
                available,
                allocated,
            } => write!(
                f,
                "ledger invariant: {resource} total={total} available={available} allocated={allocated}"
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// ResourceLedger
// ---------------------------------------------------------------------------

/// Capacity pool plus the allocation records drawn against it.
#[derive(Clone, Debug, Default)]
pub struct ResourceLedger {
    total: ResourceMap,
    available: ResourceMap,
    allocated: AllocationMap,
    unknown_policy: UnknownResourcePolicy,
}

impl ResourceLedger {
    /// Create a ledger where every resource starts fully available.
    pub fn new(initial: &ResourceMap) -> Result<Self, LedgerError> {
        validate_quantities(initial)?;
        Ok(Self {
            total: initial.clone(),
            available: initial.clone(),
            allocated: AllocationMap::new(),
            unknown_policy: UnknownResourcePolicy::default(),
        })
    }

    /// Rebuild a ledger from persisted counts and allocation records.
    ///
    /// Zero-quantity allocation entries are dropped. The combination must
    /// satisfy the ledger invariants or [`LedgerError::InvariantViolation`]
    /// is returned.
    pub fn from_parts(
        total: ResourceMap,
        available: ResourceMap,
        allocated: AllocationMap,
    ) -> Result<Self, LedgerError> {
        validate_quantities(&total)?;
        validate_quantities(&available)?;

        let mut cleaned = AllocationMap::new();
        for (order_id, held) in allocated {
            if order_id.trim().is_empty() {
                return Err(LedgerError::EmptyOrderId);
            }
            validate_quantities(&held)?;
            let held: ResourceMap = held.into_iter().filter(|(_, q)| *q > 0).collect();
            if !held.is_empty() {
                cleaned.insert(order_id, held);
            }
        }

        let ledger = Self {
            total,
            available,
            allocated: cleaned,
            unknown_policy: UnknownResourcePolicy::default(),
        };
        ledger.check_invariants()?;
        Ok(ledger)
    }

    /// Set the policy for resource names the ledger has never seen.
    pub fn with_unknown_policy(mut self, policy: UnknownResourcePolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn unknown_policy(&self) -> UnknownResourcePolicy {
        self.unknown_policy
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Grant `request` to `order_id` if every resource has enough available.
    ///
    /// Returns `Ok(true)` and records the grant when satisfiable, `Ok(false)`
    /// without mutation otherwise.
    ///
    /// # Errors
    /// Malformed input, an unknown resource under
    /// [`UnknownResourcePolicy::Reject`], or an order that already holds an
    /// allocation. The ledger is **not** mutated on error.
    pub fn request_resources(
        &mut self,
        order_id: &str,
        request: &ResourceMap,
    ) -> Result<bool, LedgerError> {
        validate_order_id(order_id)?;
        validate_quantities(request)?;

        if self.allocated.contains_key(order_id) {
            return Err(LedgerError::AlreadyAllocated {
                order_id: order_id.to_string(),
            });
        }

        self.check_known(request)?;

        if !self.can_allocate(request) {
            return Ok(false);
        }

        let mut granted = ResourceMap::new();
        for (res, &qty) in request {
            if qty == 0 {
                continue;
            }
            // can_allocate guarantees the entry exists and covers qty.
            if let Some(avail) = self.available.get_mut(res) {
                *avail -= qty;
                granted.insert(res.clone(), qty);
            }
        }

        if !granted.is_empty() {
            self.allocated.insert(order_id.to_string(), granted);
        }
        Ok(true)
    }

    /// Return everything `order_id` holds to the pool.
    ///
    /// Returns the released quantities, or `None` if the order held nothing.
    pub fn release_resources(&mut self, order_id: &str) -> Option<ResourceMap> {
        let held = self.allocated.remove(order_id)?;
        for (res, qty) in &held {
            *self.available.entry(res.clone()).or_insert(0) += qty;
        }
        Some(held)
    }

    /// Forced reclamation. Mechanically identical to
    /// [`release_resources`](Self::release_resources); kept separate so
    /// callers state intent.
    pub fn preempt_resources(&mut self, order_id: &str) -> Option<ResourceMap> {
        self.release_resources(order_id)
    }

    /// Increase `total` and `available` by each quantity. Unknown names are
    /// created. Capacity is never decreased.
    ///
    /// # Errors
    /// Negative quantities, empty names or `i64` overflow. The ledger is
    /// **not** mutated on error.
    pub fn add_virtual_resources(&mut self, additions: &ResourceMap) -> Result<(), LedgerError> {
        validate_quantities(additions)?;

        for (res, &qty) in additions {
            let total = self.total.get(res).copied().unwrap_or(0);
            let avail = self.available.get(res).copied().unwrap_or(0);
            if total.checked_add(qty).is_none() || avail.checked_add(qty).is_none() {
                return Err(LedgerError::Overflow {
                    resource: res.clone(),
                });
            }
        }

        for (res, &qty) in additions {
            *self.total.entry(res.clone()).or_insert(0) += qty;
            *self.available.entry(res.clone()).or_insert(0) += qty;
        }
        Ok(())
    }

    /// Drop every allocation and make all capacity available again.
    pub fn reset(&mut self) {
        self.allocated.clear();
        self.available = self.total.clone();
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    /// `true` if every requested quantity fits in what is available now.
    /// Unknown resources count as zero available.
    pub fn can_allocate(&self, request: &ResourceMap) -> bool {
        request
            .iter()
            .all(|(res, &qty)| self.available.get(res).copied().unwrap_or(0) >= qty)
    }

    /// Apply the unknown-resource policy to `request` without allocating.
    pub fn check_known(&self, request: &ResourceMap) -> Result<(), LedgerError> {
        if self.unknown_policy == UnknownResourcePolicy::Reject {
            if let Some(res) = request.keys().find(|r| !self.total.contains_key(*r)) {
                return Err(LedgerError::UnknownResource {
                    resource: res.clone(),
                });
            }
        }
        Ok(())
    }

    /// Owned snapshot of totals, availability and allocations.
    pub fn status(&self) -> LedgerStatus {
        LedgerStatus {
            total: self.total.clone(),
            available: self.available.clone(),
            allocated: self.allocated.clone(),
        }
    }

    pub fn total(&self) -> &ResourceMap {
        &self.total
    }

    pub fn available(&self) -> &ResourceMap {
        &self.available
    }

    pub fn allocations(&self) -> &AllocationMap {
        &self.allocated
    }

    /// Resources currently granted to `order_id`.
    pub fn held_by(&self, order_id: &str) -> Option<&ResourceMap> {
        self.allocated.get(order_id)
    }

    pub fn holds(&self, order_id: &str) -> bool {
        self.allocated.contains_key(order_id)
    }

    /// Available quantity of `resource` (0 if unknown).
    pub fn available_of(&self, resource: &str) -> i64 {
        self.available.get(resource).copied().unwrap_or(0)
    }

    /// Re-derive `available = total − Σ allocated` for every resource.
    ///
    /// O(resources × orders); for tests, restore and debug verification.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let mut names: BTreeSet<&String> = self.total.keys().collect();
        names.extend(self.available.keys());
        for held in self.allocated.values() {
            names.extend(held.keys());
        }

        for res in names {
            let total = self.total.get(res).copied().unwrap_or(0);
            let available = self.available.get(res).copied().unwrap_or(0);
            let mut allocated: i64 = 0;
            for held in self.allocated.values() {
                if let Some(&q) = held.get(res) {
                    if q <= 0 {
                        return Err(LedgerError::NegativeQty {
                            resource: res.clone(),
                            qty: q,
                        });
                    }
                    allocated = allocated.saturating_add(q);
                }
            }

            let consistent = available >= 0
                && available <= total
                && available.checked_add(allocated) == Some(total);
            if !consistent {
                return Err(LedgerError::InvariantViolation {
                    resource: res.clone(),
                    total,
                    available,
                    allocated,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_order_id(order_id: &str) -> Result<(), LedgerError> {
    if order_id.trim().is_empty() {
        return Err(LedgerError::EmptyOrderId);
    }
    Ok(())
}

/// Every name non-empty, every quantity non-negative.
pub fn validate_quantities(map: &ResourceMap) -> Result<(), LedgerError> {
    for (res, &qty) in map {
        if res.trim().is_empty() {
            return Err(LedgerError::EmptyResourceName);
        }
        if qty < 0 {
            return Err(LedgerError::NegativeQty {
                resource: res.clone(),
                qty,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
