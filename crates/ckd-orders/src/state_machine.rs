//! Order lifecycle state machine.
//!
//! ```text
//!   create_order()          Grant
//!   ──────────────► Pending ──────► Allocated
//!                      │                │
//!                      └── release / abort / preempt ──► (record removed)
//! ```
//!
//! There is no `Allocated -> Pending` edge. Removal is not a state: the
//! coordinator deletes the record outright.

use serde::{Deserialize, Serialize};

use ckd_ledger::ResourceMap;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for its whole request to fit.
    Pending,
    /// Request granted by the ledger.
    Allocated,
}

impl OrderStatus {
    /// Persisted spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allocated => "allocated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "allocated" => Some(Self::Allocated),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrderEvent / TransitionError
// ---------------------------------------------------------------------------

/// Events that move an [`OrderRecord`] between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    /// The ledger granted the full request.
    Grant,
}

/// Returned when an event cannot legally be applied in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub order_id: String,
    pub from: OrderStatus,
    pub event: OrderEvent,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order transition for {}: {} + {:?}",
            self.order_id, self.from, self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// OrderRecord
// ---------------------------------------------------------------------------

/// One order known to the coordinator.
///
/// `request` is the full resource request the order was created with. While
/// `Pending` it is the outstanding request; once `Allocated` it equals what
/// the ledger granted (less any zero entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub priority: i64,
    pub status: OrderStatus,
    pub request: ResourceMap,
}

impl OrderRecord {
    pub fn pending(order_id: impl Into<String>, request: ResourceMap, priority: i64) -> Self {
        Self {
            order_id: order_id.into(),
            priority,
            status: OrderStatus::Pending,
            request,
        }
    }

    /// Apply `event`. On error the record is unchanged.
    pub fn apply(&mut self, event: OrderEvent) -> Result<(), TransitionError> {
        match (self.status, event) {
            (OrderStatus::Pending, OrderEvent::Grant) => {
                self.status = OrderStatus::Allocated;
                Ok(())
            }
            (from, event) => Err(TransitionError {
                order_id: self.order_id.clone(),
                from,
                event,
            }),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Sort key for the allocation pass: lower priority value first, then
    /// order id.
    pub fn attempt_key(&self) -> (i64, &str) {
        (self.priority, self.order_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ckd_ledger::resource_map;

    fn pending_order() -> OrderRecord {
        OrderRecord::pending("Order1", resource_map([("Oven", 1)]), 5)
    }

    #[test]
    fn new_order_starts_pending() {
        let o = pending_order();
        assert_eq!(o.status, OrderStatus::Pending);
        assert!(o.is_pending());
    }

    #[test]
    fn grant_moves_pending_to_allocated() {
        let mut o = pending_order();
        o.apply(OrderEvent::Grant).unwrap();
        assert_eq!(o.status, OrderStatus::Allocated);
    }

    #[test]
    fn second_grant_is_illegal_and_leaves_state() {
        let mut o = pending_order();
        o.apply(OrderEvent::Grant).unwrap();
        let err = o.apply(OrderEvent::Grant).unwrap_err();
        assert_eq!(err.from, OrderStatus::Allocated);
        assert_eq!(o.status, OrderStatus::Allocated);
    }

    #[test]
    fn status_round_trips_persisted_spelling() {
        for s in [OrderStatus::Pending, OrderStatus::Allocated] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("released"), None);
    }

    #[test]
    fn attempt_key_orders_by_priority_then_id() {
        let a = OrderRecord::pending("B", ResourceMap::new(), 1);
        let b = OrderRecord::pending("A", ResourceMap::new(), 2);
        let c = OrderRecord::pending("A", ResourceMap::new(), 1);
        let mut v = vec![&b, &a, &c];
        v.sort_by(|x, y| x.attempt_key().cmp(&y.attempt_key()));
        let ids: Vec<_> = v.iter().map(|o| (o.order_id.as_str(), o.priority)).collect();
        assert_eq!(ids, vec![("A", 1), ("B", 1), ("A", 2)]);
    }
}
