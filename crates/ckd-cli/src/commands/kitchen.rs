//! Kitchen commands: one `Kitchen` per invocation, `key=value` output.

use anyhow::Result;
use ckd_db::LogEntry;
use ckd_ledger::{AllocationMap, ResourceMap};
use ckd_orders::ProcessReport;
use ckd_runtime::Kitchen;

use super::format_resources;

pub async fn resources_show(k: &Kitchen) -> Result<()> {
    let status = k.status().await;
    for (name, &total) in &status.total {
        println!(
            "resource={} total={} available={} in_use={} utilization={:.2}",
            name,
            total,
            status.available_of(name),
            status.in_use(name),
            status.utilization(name)
        );
    }
    Ok(())
}

pub async fn resources_add(k: &Kitchen, additions: &ResourceMap) -> Result<()> {
    k.add_virtual_resources(additions).await?;
    println!("added={}", format_resources(additions));
    resources_show(k).await
}

pub async fn order_create(
    k: &Kitchen,
    order_id: &str,
    request: ResourceMap,
    priority: Option<i64>,
    process: bool,
) -> Result<()> {
    if process {
        let (outcome, report) = k.submit_order(order_id, request, priority).await?;
        println!("created=true order_id={order_id} replaced={}", outcome.replaced);
        print_report(&report);
    } else {
        let outcome = k.create_order(order_id, request, priority).await?;
        println!("created=true order_id={order_id} replaced={}", outcome.replaced);
    }
    Ok(())
}

/// Shared by release, abort and preempt. `removed` is `None` for unknown
/// ids, `Some(None)` for an order that held nothing.
fn print_removed(verb: &str, order_id: &str, removed: Option<Option<ResourceMap>>) {
    match removed {
        Some(released) => println!(
            "{verb}=true order_id={order_id} released={}",
            released.map(|m| format_resources(&m)).unwrap_or_default()
        ),
        None => println!("{verb}=false order_id={order_id} reason=unknown_order"),
    }
}

pub async fn order_release(k: &Kitchen, order_id: &str) -> Result<()> {
    let removed = k.release_order(order_id).await?;
    print_removed("released", order_id, removed.map(|r| r.released));
    Ok(())
}

pub async fn order_abort(k: &Kitchen, order_id: &str) -> Result<()> {
    let removed = k.abort_order(order_id).await?;
    print_removed("aborted", order_id, removed.map(|r| r.released));
    Ok(())
}

pub async fn order_preempt(k: &Kitchen, order_id: &str) -> Result<()> {
    let removed = k.preempt_order(order_id).await?;
    print_removed("preempted", order_id, removed.map(|r| r.released));
    Ok(())
}

pub async fn order_reschedule(k: &Kitchen, order_id: &str, priority: i64) -> Result<()> {
    let ok = k.reschedule_order(order_id, priority).await?;
    println!("rescheduled={ok} order_id={order_id} priority={priority}");
    Ok(())
}

pub async fn order_list(k: &Kitchen) -> Result<()> {
    let snap = k.snapshot().await;
    print_orders("allocated", &snap.active, &snap.priorities);
    print_orders("pending", &snap.pending, &snap.priorities);
    Ok(())
}

fn print_orders(
    status: &str,
    orders: &AllocationMap,
    priorities: &std::collections::BTreeMap<String, i64>,
) {
    for (id, res) in orders {
        println!(
            "order_id={} status={} priority={} resources={}",
            id,
            status,
            priorities.get(id).copied().unwrap_or_default(),
            format_resources(res)
        );
    }
}

pub async fn process(k: &Kitchen) -> Result<()> {
    let report = k.process_pending_orders().await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ProcessReport) {
    println!("allocated={}", report.allocated.join(","));
    println!("still_pending={}", report.still_pending.join(","));
    if !report.rejected.is_empty() {
        println!("rejected={}", report.rejected.join(","));
    }
}

pub async fn detect(k: &Kitchen) -> Result<()> {
    let report = k.analyze().await;
    println!("deadlock={}", report.has_deadlock());
    for line in ckd_analyzer::explain(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn safe(k: &Kitchen) -> Result<()> {
    let report = k.check_safe_state().await?;
    println!("safe={}", report.safe);
    println!("safe_sequence={}", report.safe_sequence.join(","));
    if !report.unfinished.is_empty() {
        println!("unfinished={}", report.unfinished.join(","));
    }
    Ok(())
}

pub async fn simulate(k: &Kitchen, steps: u32) -> Result<()> {
    for _ in 0..steps {
        match k.simulation_step().await? {
            Some(step) => println!(
                "step order_id={} request={} allocated={}",
                step.order_id,
                format_resources(&step.request),
                step.report.allocated.join(",")
            ),
            None => println!("step skipped=true reason=nothing_to_request"),
        }
    }
    Ok(())
}

pub async fn reset(k: &Kitchen) -> Result<()> {
    k.reset().await?;
    println!("reset=true");
    Ok(())
}

pub async fn log(k: &Kitchen, limit: i64) -> Result<()> {
    let entries: Vec<LogEntry> = k.recent_log(limit).await?;
    for e in entries.iter().rev() {
        println!("{} {}", e.ts_utc.to_rfc3339(), e.event);
    }
    Ok(())
}
