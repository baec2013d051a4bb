//! ckd-orders
//!
//! Order Coordinator for the kitchen contention model.
//! - Per-order lifecycle: `pending -> allocated -> (removed)`
//! - Priority-ordered, single greedy allocation pass (no backtracking)
//! - Owns the [`ResourceLedger`](ckd_ledger::ResourceLedger) so ledger and
//!   order maps mutate as one unit under the caller's lock
//! - Pure deterministic logic (no IO, no time, no locking)

mod coordinator;
pub mod state_machine;

pub use coordinator::{
    CoordinatorError, CoordinatorSnapshot, CreateOutcome, DuplicateOrderPolicy, OrderCoordinator,
    ProcessReport, RemovedOrder,
};
pub use state_machine::{OrderEvent, OrderRecord, OrderStatus, TransitionError};

/// Priority assigned when the caller does not supply one.
pub const DEFAULT_PRIORITY: i64 = 5;
