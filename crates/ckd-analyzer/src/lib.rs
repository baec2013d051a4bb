//! ckd-analyzer
//!
//! Deadlock Analyzer for the kitchen contention model.
//! - Wait-for graph built from an allocation + request snapshot
//! - Cycle extraction by iterative DFS over arena-indexed nodes
//! - Banker's safe-state check with the completion order it found
//!
//! Deterministic, pure logic. No IO. Never mutates its input; "no deadlock"
//! and "unsafe" are ordinary return values.

mod bankers;
mod graph;
mod report;

pub use bankers::{bankers, is_safe_state, max_demand_from, SafetyReport};
pub use graph::{deadlocked_orders, detect, WaitForGraph};
pub use report::{analyze, explain, AnalysisInput, DeadlockReport, WaitEdge};
