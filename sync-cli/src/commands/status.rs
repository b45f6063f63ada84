//! Show queue and conflict status.

use anyhow::Result;
use resync_types::DataType;

use super::Queue;

/// Run the status command.
pub async fn run(queue: &Queue) -> Result<()> {
    println!("=== resync status ===");
    println!();

    let stats = queue.stats().await;
    println!("Queue:");
    let state = queue.state();
    println!(
        "  State:     {}, {} cycle(s) running",
        if state.is_online() { "online" } else { "offline" },
        state.active_cycles()
    );
    println!("  Pending:   {}", stats.pending);
    println!("  Failed:    {}", stats.failed);
    println!("  Exhausted: {}", stats.exhausted);
    for (priority, count) in &stats.by_priority {
        println!("    {:<8} {}", priority.as_str(), count);
    }

    println!();
    let checkpoints = queue.engine().checkpoints().await;
    println!("Last synced:");
    for data_type in DataType::ALL {
        match checkpoints.get(data_type) {
            Some(at) => println!("  {:<9} {}", data_type.store_name(), at.to_rfc3339()),
            None => println!("  {:<9} never", data_type.store_name()),
        }
    }

    println!();
    let manual = queue.engine().pending_manual().await;
    if manual.is_empty() {
        println!("Conflicts: none waiting");
    } else {
        println!("Conflicts: {} waiting for a decision", manual.len());
        println!();
        println!("Run 'resync conflicts' to review them.");
    }

    Ok(())
}
