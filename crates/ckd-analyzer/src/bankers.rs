use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use ckd_ledger::{AllocationMap, ResourceMap};

/// Result of a banker's safe-state check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    /// Orders in the completion order found.
    pub safe_sequence: Vec<String>,
    /// Orders that could never finish. Empty iff `safe`.
    pub unfinished: Vec<String>,
}

/// Banker's algorithm over `max_demand`, current `allocation` and
/// system-wide `available`.
///
/// Only orders keyed in `max_demand` take part. An order's need covers the
/// resources listed in its max demand: `need[r] = max[r] - alloc[r]`. Each
/// round scans unfinished orders in id order; an order finishes when every
/// need fits in `work` (missing entries count as 0) and then returns its
/// whole allocation to `work`. Rounds repeat until one makes no progress.
pub fn bankers(
    max_demand: &AllocationMap,
    allocation: &AllocationMap,
    available: &ResourceMap,
) -> SafetyReport {
    let mut work = available.clone();
    let mut finished: BTreeSet<&str> = BTreeSet::new();
    let mut sequence = Vec::new();
    let empty = ResourceMap::new();

    loop {
        let mut progress = false;
        for (order_id, max) in max_demand {
            if finished.contains(order_id.as_str()) {
                continue;
            }
            let held = allocation.get(order_id).unwrap_or(&empty);
            let fits = max.iter().all(|(res, &m)| {
                let need = m - held.get(res).copied().unwrap_or(0);
                need <= work.get(res).copied().unwrap_or(0)
            });
            if fits {
                for (res, &q) in held {
                    *work.entry(res.clone()).or_insert(0) += q;
                }
                finished.insert(order_id.as_str());
                sequence.push(order_id.clone());
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    let unfinished: Vec<String> = max_demand
        .keys()
        .filter(|id| !finished.contains(id.as_str()))
        .cloned()
        .collect();

    SafetyReport {
        safe: unfinished.is_empty(),
        safe_sequence: sequence,
        unfinished,
    }
}

pub fn is_safe_state(
    max_demand: &AllocationMap,
    allocation: &AllocationMap,
    available: &ResourceMap,
) -> bool {
    bankers(max_demand, allocation, available).safe
}

/// Maximum demand when no explicit claims exist: for every order holding or
/// requesting, `max(held[r], requested[r])` per resource.
pub fn max_demand_from(allocations: &AllocationMap, requests: &AllocationMap) -> AllocationMap {
    let mut out = AllocationMap::new();
    for (order_id, held) in allocations {
        let entry = out.entry(order_id.clone()).or_insert_with(ResourceMap::new);
        for (res, &q) in held {
            let slot = entry.entry(res.clone()).or_insert(0);
            *slot = (*slot).max(q);
        }
    }
    for (order_id, wanted) in requests {
        let entry = out.entry(order_id.clone()).or_insert_with(ResourceMap::new);
        for (res, &q) in wanted {
            let slot = entry.entry(res.clone()).or_insert(0);
            *slot = (*slot).max(q);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ckd_ledger::resource_map;

    fn orders(items: &[(&str, &[(&str, i64)])]) -> AllocationMap {
        items
            .iter()
            .map(|(id, res)| (id.to_string(), resource_map(res.iter().copied())))
            .collect()
    }

    #[test]
    fn safe_when_one_order_already_at_max() {
        let max = orders(&[("X", &[("R", 2)]), ("Y", &[("R", 1)])]);
        let alloc = orders(&[("X", &[("R", 1)]), ("Y", &[("R", 1)])]);
        let report = bankers(&max, &alloc, &resource_map([("R", 2)]));
        assert!(report.safe);
        assert!(report.unfinished.is_empty());
        assert_eq!(report.safe_sequence.len(), 2);
    }

    #[test]
    fn unsafe_when_nothing_available_and_everyone_needs_more() {
        let max = orders(&[("X", &[("R", 2)]), ("Y", &[("R", 2)])]);
        let alloc = orders(&[("X", &[("R", 1)]), ("Y", &[("R", 1)])]);
        let report = bankers(&max, &alloc, &resource_map([("R", 0)]));
        assert!(!report.safe);
        assert!(report.safe_sequence.is_empty());
        assert_eq!(report.unfinished, vec!["X".to_string(), "Y".to_string()]);
    }

    #[test]
    fn finishing_order_frees_work_for_later_ones() {
        // Y must finish before X can.
        let max = orders(&[("X", &[("R", 3)]), ("Y", &[("R", 2)])]);
        let alloc = orders(&[("X", &[("R", 1)]), ("Y", &[("R", 1)])]);
        let report = bankers(&max, &alloc, &resource_map([("R", 1)]));
        assert!(report.safe);
        assert_eq!(report.safe_sequence, vec!["Y".to_string(), "X".to_string()]);
    }

    #[test]
    fn missing_work_entry_counts_as_zero() {
        let max = orders(&[("X", &[("Grill", 1)])]);
        assert!(!is_safe_state(&max, &AllocationMap::new(), &ResourceMap::new()));
    }

    #[test]
    fn resources_outside_max_demand_are_ignored() {
        // X holds an oven but its max demand names only Chef.
        let max = orders(&[("X", &[("Chef", 1)])]);
        let alloc = orders(&[("X", &[("Chef", 1), ("Oven", 1)])]);
        let report = bankers(&max, &alloc, &ResourceMap::new());
        assert!(report.safe);
    }

    #[test]
    fn empty_state_is_safe() {
        assert!(is_safe_state(
            &AllocationMap::new(),
            &AllocationMap::new(),
            &ResourceMap::new()
        ));
    }

    #[test]
    fn max_demand_takes_per_resource_maximum() {
        let held = orders(&[("A", &[("Oven", 1), ("Chef", 2)])]);
        let wanted = orders(&[("A", &[("Chef", 1)]), ("B", &[("Oven", 1)])]);
        let max = max_demand_from(&held, &wanted);
        assert_eq!(max["A"], resource_map([("Oven", 1), ("Chef", 2)]));
        assert_eq!(max["B"], resource_map([("Oven", 1)]));
    }
}
