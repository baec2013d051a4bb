//! ckd-ledger
//!
//! Resource Ledger for the kitchen contention model.
//! - Fixed pool of named, countable resources (`total` / `available`)
//! - Per-order allocation records, granted all-or-nothing
//! - `available = total − Σ allocated` holds after every mutation
//! - Pure deterministic logic (no IO, no time, no locking)
//!
//! Callers that share a ledger across tasks wrap it (together with the order
//! coordinator) in a single lock; see `ckd-runtime`.

mod ledger;
mod types;

pub use ledger::{validate_quantities, LedgerError, ResourceLedger};
pub use types::{AllocationMap, LedgerStatus, ResourceMap, UnknownResourcePolicy};

/// Helper to build a [`ResourceMap`] with minimal boilerplate in tests/callers.
pub fn resource_map<I, S>(items: I) -> ResourceMap
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut m = ResourceMap::new();
    for (name, qty) in items {
        m.insert(name.into(), qty);
    }
    m
}
