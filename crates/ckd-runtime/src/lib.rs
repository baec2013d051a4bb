//! ckd-runtime
//!
//! The `Kitchen` service: one coarse async lock around the order
//! coordinator (which owns the resource ledger), write-through persistence
//! to a [`Store`](ckd_db::Store), and deadlock analysis over snapshots taken
//! under that lock and evaluated outside it.
//!
//! Errors are `anyhow`. Caller mistakes carry a
//! [`CoordinatorError`](ckd_orders::CoordinatorError) that can be recovered
//! with `downcast_ref`; anything else is a store failure.

mod kitchen;
mod restore;

pub use kitchen::{Kitchen, SimulationStep, DEFAULT_LOG_LIMIT};

/// `true` when `err` is a caller mistake (bad input, duplicate id) rather
/// than an infrastructure failure.
pub fn is_invalid_input(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ckd_orders::CoordinatorError>().is_some()
}
