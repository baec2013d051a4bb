//! Scenario: Priority-ordered greedy allocation over a shared oven
//!
//! # Invariants under test
//!
//! 1. `process_pending_orders` grants in ascending priority; a blocked
//!    order stays pending and is granted on a later pass once resources
//!    are released.
//!
//! 2. An order id is never pending and holding an allocation at the same
//!    time, at every observable point.
//!
//! 3. `available + Σ allocated == total` holds after every coordinator
//!    operation.
//!
//! 4. Rescheduling alters the next pass's order, never the current
//!    allocations.
//!
//! All tests are pure; no IO, no DB, no network.

use ckd_ledger::{resource_map, ResourceLedger};
use ckd_orders::{OrderCoordinator, OrderStatus, DEFAULT_PRIORITY};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn coordinator_with(total: &[(&str, i64)]) -> OrderCoordinator {
    OrderCoordinator::new(ResourceLedger::new(&resource_map(total.iter().copied())).unwrap())
}

fn assert_consistent(c: &OrderCoordinator) {
    c.check_invariants().unwrap();
    let pending = c.current_requests();
    let active = c.active_orders();
    for id in pending.keys() {
        assert!(!active.contains_key(id), "{id} both pending and allocated");
    }
}

// ---------------------------------------------------------------------------
// 1: Oven hand-off between two orders
// ---------------------------------------------------------------------------

#[test]
fn oven_is_handed_to_next_order_after_release() {
    let mut c = coordinator_with(&[("Oven", 1)]);

    c.create_order("Order1", resource_map([("Oven", 1)]), 1)
        .unwrap();
    c.create_order("Order2", resource_map([("Oven", 1)]), 2)
        .unwrap();
    assert_consistent(&c);

    let report = c.process_pending_orders();
    assert_eq!(report.allocated, vec!["Order1".to_string()]);
    assert_eq!(report.still_pending, vec!["Order2".to_string()]);
    assert_eq!(c.status().available_of("Oven"), 0);
    assert_eq!(c.order("Order1").unwrap().status, OrderStatus::Allocated);
    assert_eq!(c.order("Order2").unwrap().status, OrderStatus::Pending);
    assert_consistent(&c);

    c.release_order("Order1");
    assert_eq!(c.status().available_of("Oven"), 1);
    assert_consistent(&c);

    let report = c.process_pending_orders();
    assert_eq!(report.allocated, vec!["Order2".to_string()]);
    assert!(report.still_pending.is_empty());
    assert_eq!(c.order("Order2").unwrap().status, OrderStatus::Allocated);
    assert_consistent(&c);
}

// ---------------------------------------------------------------------------
// 2 + 3: Mixed workload keeps exclusivity and conservation
// ---------------------------------------------------------------------------

#[test]
fn mixed_workload_preserves_invariants() {
    let mut c = coordinator_with(&[
        ("Oven", 1),
        ("Chef", 2),
        ("Delivery_Bike", 1),
        ("Ingredients", 5),
    ]);

    for (i, prio) in [(1, 3), (2, 1), (3, DEFAULT_PRIORITY), (4, 2)] {
        c.create_order(
            &format!("Order{i}"),
            resource_map([("Chef", 1), ("Ingredients", 2)]),
            prio,
        )
        .unwrap();
        assert_consistent(&c);
    }

    let report = c.process_pending_orders();
    // Priorities 1 and 2 fit (Chef 2, Ingredients 4); the rest wait.
    assert_eq!(
        report.allocated,
        vec!["Order2".to_string(), "Order4".to_string()]
    );
    assert_consistent(&c);

    c.preempt_order("Order2");
    assert_consistent(&c);
    c.add_virtual_resources(&resource_map([("Ingredients", 1)]))
        .unwrap();
    assert_consistent(&c);

    let report = c.process_pending_orders();
    assert_eq!(report.allocated, vec!["Order1".to_string()]);
    assert_consistent(&c);

    c.reset();
    assert_consistent(&c);
}

// ---------------------------------------------------------------------------
// 4: Reschedule takes effect on the next pass only
// ---------------------------------------------------------------------------

#[test]
fn reschedule_changes_next_pass_winner() {
    let mut c = coordinator_with(&[("Oven", 1)]);
    c.create_order("Order1", resource_map([("Oven", 1)]), 1)
        .unwrap();
    c.create_order("Order2", resource_map([("Oven", 1)]), 2)
        .unwrap();

    assert!(c.reschedule_order("Order2", 0));
    assert!(c.active_orders().is_empty(), "reschedule must not allocate");

    let report = c.process_pending_orders();
    assert_eq!(report.allocated, vec!["Order2".to_string()]);
}

#[test]
fn snapshot_serializes_for_presentation() {
    let mut c = coordinator_with(&[("Oven", 1)]);
    c.create_order("Order1", resource_map([("Oven", 1)]), 1)
        .unwrap();
    c.process_pending_orders();

    let json = serde_json::to_value(c.snapshot()).unwrap();
    assert_eq!(json["active"]["Order1"]["Oven"], 1);
    assert_eq!(json["ledger"]["available"]["Oven"], 0);
    assert_eq!(json["priorities"]["Order1"], 1);
}
