//! Buffer a local mutation.

use anyhow::{Context, Result};
use resync_types::{ItemId, Operation, Priority};

use super::Queue;

/// Run the enqueue command.
pub async fn run(
    queue: &Queue,
    store: &str,
    operation: Operation,
    payload: &str,
    priority: Priority,
) -> Result<ItemId> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let id = queue
        .enqueue(operation, store, payload, priority)
        .await
        .context("Failed to enqueue mutation")?;

    println!("Queued {} on {} ({} priority)", operation, store, priority);
    println!("  Item: {}", id);
    Ok(id)
}
