//! Scenario: Concurrent submissions never over-commit a resource
//!
//! # Invariants under test
//!
//! 1. Many tasks racing to submit orders for a single oven produce exactly
//!    one allocation; every other order is left pending.
//!
//! 2. `available + Σ allocated == total` holds once all tasks finish, and
//!    the persisted rows agree with memory.
//!
//! 3. Releasing the holder lets exactly one waiter in on the next pass.
//!
//! Uses the in-memory store on a multi-threaded runtime.

use std::sync::Arc;

use ckd_config::KitchenSettings;
use ckd_db::{MemoryStore, Store};
use ckd_ledger::resource_map;
use ckd_runtime::Kitchen;

const RACERS: usize = 16;

async fn one_oven_kitchen() -> anyhow::Result<(Arc<Kitchen>, Arc<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new());
    let mut settings = KitchenSettings::default();
    settings.resources = resource_map([("Oven", 1)]);
    let kitchen = Kitchen::open(store.clone(), settings).await?;
    Ok((Arc::new(kitchen), store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_submissions_allocate_the_oven_once() -> anyhow::Result<()> {
    let (kitchen, store) = one_oven_kitchen().await?;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let k = kitchen.clone();
        handles.push(tokio::spawn(async move {
            k.submit_order(&format!("Racer{i:02}"), resource_map([("Oven", 1)]), None)
                .await
        }));
    }
    for h in handles {
        h.await??;
    }

    let snap = kitchen.snapshot().await;
    assert_eq!(snap.active.len(), 1);
    assert_eq!(snap.pending.len(), RACERS - 1);
    assert_eq!(snap.ledger.available_of("Oven"), 0);
    kitchen.check_invariants().await?;

    let held: i64 = store
        .load_allocations()
        .await?
        .iter()
        .filter(|row| snap.active.contains_key(&row.order_id))
        .map(|row| row.quantity)
        .sum();
    assert_eq!(held, 1);
    let oven = store
        .load_resources()
        .await?
        .into_iter()
        .find(|r| r.resource_name == "Oven")
        .expect("oven row");
    assert_eq!(oven.available, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_hands_the_oven_to_exactly_one_waiter() -> anyhow::Result<()> {
    let (kitchen, _store) = one_oven_kitchen().await?;

    let mut handles = Vec::new();
    for i in 0..4 {
        let k = kitchen.clone();
        handles.push(tokio::spawn(async move {
            k.create_order(&format!("Racer{i}"), resource_map([("Oven", 1)]), Some(i))
                .await
        }));
    }
    for h in handles {
        h.await??;
    }

    let first = kitchen.process_pending_orders().await?;
    assert_eq!(first.allocated, vec!["Racer0".to_string()]);

    let (a, b) = tokio::join!(
        kitchen.release_order("Racer0"),
        kitchen.process_pending_orders()
    );
    a?;
    b?;
    let after = kitchen.process_pending_orders().await?;
    let snap = kitchen.snapshot().await;
    assert_eq!(snap.active.len(), 1);
    assert!(snap.active.contains_key("Racer1"), "{after:?} {snap:?}");
    kitchen.check_invariants().await?;
    Ok(())
}
