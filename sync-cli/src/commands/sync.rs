//! Run cycles, retry failures and clean up exhausted items.

use anyhow::{Context, Result};
use resync_client::CycleReport;

use super::Queue;

/// Run one sync cycle.
pub async fn run(queue: &Queue, force: bool, offline: bool) -> Result<CycleReport> {
    if offline {
        tracing::info!("Running with the remote marked unreachable");
        queue.set_online(false);
    }
    let report = queue
        .run_cycle(force)
        .await
        .context("Sync cycle failed")?;
    print_report(&report);
    Ok(report)
}

/// Reset failed items and run a cycle.
pub async fn retry(queue: &Queue) -> Result<CycleReport> {
    let report = queue
        .retry_failed_items()
        .await
        .context("Retry failed")?;
    println!("Reset {} failed item(s)", report.retried);
    print_report(&report);
    Ok(report)
}

/// Drop items that ran out of attempts.
pub async fn cleanup(queue: &Queue) -> Result<usize> {
    let removed = queue
        .cleanup_failed_items()
        .await
        .context("Cleanup failed")?;

    println!("Removed {} exhausted item(s)", removed.len());
    for item in &removed {
        println!(
            "  {} {} {} ({})",
            item.id,
            item.operation,
            item.store_name,
            item.last_error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(removed.len())
}

fn print_report(report: &CycleReport) {
    if let Some(reason) = &report.skipped {
        println!("Cycle skipped: {:?}", reason);
        return;
    }
    println!("Cycle finished{}", if report.stopped { " (stopped)" } else { "" });
    println!("  Batches:            {}", report.batches);
    println!("  Uploaded:           {}", report.completed);
    println!("  Failed:             {}", report.failed);
    println!("  Rejected:           {}", report.rejected);
    println!("  Conflicts resolved: {}", report.conflicts_resolved);
    println!("  Conflicts deferred: {}", report.conflicts_deferred);
    println!("  Remote applied:     {}", report.remote_applied);
}
