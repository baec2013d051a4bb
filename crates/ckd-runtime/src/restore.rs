//! Rebuild coordinator state from persisted rows, or seed an empty store.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use ckd_config::KitchenSettings;
use ckd_db::Store;
use ckd_ledger::{AllocationMap, ResourceLedger, ResourceMap};
use ckd_orders::{OrderCoordinator, OrderRecord, OrderStatus};

/// Load from `store` if it holds any resources, otherwise seed it from
/// `settings.resources`. Returns the coordinator and whether it was restored.
pub(crate) async fn load_or_seed(
    store: &dyn Store,
    settings: &KitchenSettings,
) -> Result<(OrderCoordinator, bool)> {
    let resources = store.load_resources().await?;

    if resources.is_empty() {
        let ledger = ResourceLedger::new(&settings.resources)
            .map_err(anyhow::Error::new)
            .context("invalid initial resources")?
            .with_unknown_policy(settings.unknown_resources);
        for (name, &qty) in &settings.resources {
            store.upsert_resource(name, qty, qty).await?;
        }
        let coordinator =
            OrderCoordinator::new(ledger).with_duplicate_policy(settings.duplicate_orders);
        return Ok((coordinator, false));
    }

    let mut total = ResourceMap::new();
    let mut stored_available = ResourceMap::new();
    for row in resources {
        total.insert(row.resource_name.clone(), row.total);
        stored_available.insert(row.resource_name, row.available);
    }

    let orders = store.load_orders().await?;
    let mut statuses: BTreeMap<String, (OrderStatus, i64)> = BTreeMap::new();
    for row in orders {
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("order {} has unknown status {:?}", row.order_id, row.status))?;
        statuses.insert(row.order_id, (status, row.priority));
    }

    // Allocation rows are the grant of an allocated order and the request of
    // a pending one.
    let mut rows_by_order: AllocationMap = AllocationMap::new();
    for row in store.load_allocations().await? {
        if !statuses.contains_key(&row.order_id) {
            bail!("allocation row for unknown order {}", row.order_id);
        }
        rows_by_order
            .entry(row.order_id)
            .or_default()
            .insert(row.resource_name, row.quantity);
    }

    let mut granted = AllocationMap::new();
    let mut records = Vec::with_capacity(statuses.len());
    for (order_id, (status, priority)) in statuses {
        let rows = rows_by_order.remove(&order_id).unwrap_or_default();
        if status == OrderStatus::Allocated {
            granted.insert(order_id.clone(), rows.clone());
        }
        records.push(OrderRecord {
            order_id,
            priority,
            status,
            request: rows,
        });
    }

    // Order and allocation rows are authoritative; the available column can
    // trail them when a process stopped between writes.
    let available = derive_available(&total, &granted);
    let ledger = ResourceLedger::from_parts(total, available, granted)
        .map_err(anyhow::Error::new)
        .context("persisted resources are inconsistent")?
        .with_unknown_policy(settings.unknown_resources);
    for (name, &cap) in ledger.total() {
        let derived = ledger.available_of(name);
        let stored = stored_available.get(name).copied().unwrap_or(derived);
        if stored != derived {
            warn!(resource = %name, stored, derived, "stale available count repaired");
            store.upsert_resource(name, cap, derived).await?;
        }
    }
    let coordinator = OrderCoordinator::restore(ledger, records)
        .map_err(anyhow::Error::new)
        .context("persisted orders are inconsistent")?
        .with_duplicate_policy(settings.duplicate_orders);

    Ok((coordinator, true))
}

/// `total - Σ granted` per resource. Grants of resources missing from
/// `total` show up as negative counts, which the ledger rejects.
fn derive_available(total: &ResourceMap, granted: &AllocationMap) -> ResourceMap {
    let mut available = total.clone();
    for held in granted.values() {
        for (name, &qty) in held {
            *available.entry(name.clone()).or_insert(0) -= qty;
        }
    }
    available
}

/// Next free `Order{n}` number: one past the highest existing.
pub(crate) fn next_sequential_order_no(coordinator: &OrderCoordinator) -> u64 {
    coordinator
        .orders()
        .filter_map(|o| o.order_id.strip_prefix("Order")?.parse::<u64>().ok())
        .max()
        .map_or(1, |n| n + 1)
}
