use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use ckd_ledger::{AllocationMap, ResourceMap};

use crate::bankers::{bankers, max_demand_from, SafetyReport};
use crate::graph::{deadlocked_orders, WaitForGraph};

/// Everything one analysis pass reads. Taken as a single consistent copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInput {
    /// Holder order id -> granted resources.
    pub allocations: AllocationMap,
    /// Pending order id -> outstanding request.
    pub requests: AllocationMap,
    pub available: ResourceMap,
    /// Explicit claims. `None` derives them with [`max_demand_from`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_demand: Option<AllocationMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEdge {
    pub waiter: String,
    pub holder: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub cycles: Vec<BTreeSet<String>>,
    pub deadlocked: BTreeSet<String>,
    pub edges: Vec<WaitEdge>,
    pub safety: SafetyReport,
}

impl DeadlockReport {
    pub fn has_deadlock(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// Run cycle detection and the banker's check over one input.
pub fn analyze(input: &AnalysisInput) -> DeadlockReport {
    let graph = WaitForGraph::build(&input.allocations, &input.requests);
    let cycles = graph.detect_cycles();
    let deadlocked = deadlocked_orders(&cycles);
    let edges = graph
        .edges()
        .into_iter()
        .map(|(waiter, holder)| WaitEdge { waiter, holder })
        .collect();

    let derived;
    let max_demand = match &input.max_demand {
        Some(m) => m,
        None => {
            derived = max_demand_from(&input.allocations, &input.requests);
            &derived
        }
    };
    let safety = bankers(max_demand, &input.allocations, &input.available);

    DeadlockReport {
        cycles,
        deadlocked,
        edges,
        safety,
    }
}

/// Operator-facing summary of a report.
pub fn explain(report: &DeadlockReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.has_deadlock() {
        lines.push("Deadlock detected among the following orders:".to_string());
        for cycle in &report.cycles {
            lines.push(cycle.iter().cloned().collect::<Vec<_>>().join(" -> "));
        }
        lines.push("Resolution strategies:".to_string());
        lines.push("- Preempt resources from one or more orders.".to_string());
        lines.push("- Abort or rollback orders to break the deadlock.".to_string());
        lines.push(
            "- Use avoidance techniques like Banker's Algorithm to prevent unsafe states."
                .to_string(),
        );
    } else if !report.safety.safe {
        lines.push("No deadlock cycle detected, but the state is unsafe.".to_string());
        lines.push(format!(
            "Orders that cannot finish: {}",
            report.safety.unfinished.join(", ")
        ));
    } else {
        lines.push("No deadlocks detected. System is in a safe state.".to_string());
    }
    lines
}
