use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource name -> quantity.
pub type ResourceMap = BTreeMap<String, i64>;

/// Order id -> resources currently granted to that order.
pub type AllocationMap = BTreeMap<String, ResourceMap>;

/// How the ledger treats a request that names a resource it has never seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownResourcePolicy {
    /// Unknown names have `available = 0`; a positive request simply fails
    /// the capacity check.
    #[default]
    TreatAsZero,
    /// Unknown names are a caller error and are rejected before any check.
    Reject,
}

/// A point-in-time, owned view of the ledger.
///
/// Produced by [`ResourceLedger::status`](crate::ResourceLedger::status);
/// mutating it has no effect on the ledger it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub total: ResourceMap,
    pub available: ResourceMap,
    pub allocated: AllocationMap,
}

impl LedgerStatus {
    /// Quantity of `resource` currently held across all orders.
    pub fn in_use(&self, resource: &str) -> i64 {
        self.allocated
            .values()
            .filter_map(|held| held.get(resource))
            .sum()
    }

    /// Available quantity (0 for unknown resources).
    pub fn available_of(&self, resource: &str) -> i64 {
        self.available.get(resource).copied().unwrap_or(0)
    }

    /// Fraction of `resource` in use, in `[0.0, 1.0]`. Zero-capacity
    /// resources report `0.0`.
    pub fn utilization(&self, resource: &str) -> f64 {
        let total = self.total.get(resource).copied().unwrap_or(0);
        if total <= 0 {
            return 0.0;
        }
        self.in_use(resource) as f64 / total as f64
    }

    /// Resources granted to `order_id`, if it holds any.
    pub fn held_by(&self, order_id: &str) -> Option<&ResourceMap> {
        self.allocated.get(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, i64)]) -> ResourceMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn status_read_helpers() {
        let mut allocated = AllocationMap::new();
        allocated.insert("Order1".into(), map(&[("Chef", 1)]));
        allocated.insert("Order2".into(), map(&[("Chef", 1), ("Oven", 1)]));
        let status = LedgerStatus {
            total: map(&[("Chef", 4), ("Oven", 1), ("Grill", 0)]),
            available: map(&[("Chef", 2), ("Oven", 0), ("Grill", 0)]),
            allocated,
        };

        assert_eq!(status.in_use("Chef"), 2);
        assert_eq!(status.utilization("Chef"), 0.5);
        assert_eq!(status.utilization("Oven"), 1.0);
        assert_eq!(status.utilization("Grill"), 0.0);
        assert_eq!(status.utilization("Wok"), 0.0);
        assert_eq!(status.available_of("Wok"), 0);
        assert_eq!(status.held_by("Order1"), Some(&map(&[("Chef", 1)])));
        assert!(status.held_by("Order3").is_none());
    }

    #[test]
    fn policy_uses_config_spelling() {
        assert_eq!(
            serde_json::to_value(UnknownResourcePolicy::TreatAsZero).unwrap(),
            "treat_as_zero"
        );
        let strict: UnknownResourcePolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(strict, UnknownResourcePolicy::Reject);
    }

    #[test]
    fn status_serializes_as_three_maps() {
        let mut allocated = AllocationMap::new();
        allocated.insert("Order1".into(), map(&[("Oven", 1)]));
        let status = LedgerStatus {
            total: map(&[("Oven", 1)]),
            available: map(&[("Oven", 0)]),
            allocated,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["total"]["Oven"], 1);
        assert_eq!(json["available"]["Oven"], 0);
        assert_eq!(json["allocated"]["Order1"]["Oven"], 1);

        let back: LedgerStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
