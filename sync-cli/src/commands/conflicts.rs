//! Review conflicts waiting for a decision, and decide them.

use anyhow::{Context, Result};
use resync_client::Resolved;
use resync_types::{ConflictId, ManualDecision};

use super::Queue;

/// List conflicts routed to manual resolution.
pub async fn list(queue: &Queue) -> Result<usize> {
    let requests = queue.engine().pending_manual().await;
    if requests.is_empty() {
        println!("No conflicts waiting for a decision.");
        return Ok(0);
    }

    for request in &requests {
        println!(
            "{}  {}/{}",
            request.conflict_id, request.data_type, request.record_id
        );
        println!("  Suggested: {:?}", request.suggested_resolution);
        for field in &request.field_conflicts {
            println!(
                "  {:<14} local={} remote={} ({}{})",
                field.field,
                field.local_value,
                field.remote_value,
                field.severity,
                if field.can_merge { ", mergeable" } else { "" }
            );
        }
        println!();
    }
    println!(
        "Decide with: resync resolve <id> --keep-local | --keep-remote | --merge | --fields <json>"
    );
    Ok(requests.len())
}

/// Apply a decision to one conflict.
pub async fn resolve(queue: &Queue, id: &str, decision: ManualDecision) -> Result<Resolved> {
    let conflict_id: ConflictId = id
        .parse()
        .with_context(|| format!("Invalid conflict id: {}", id))?;

    let resolved = queue
        .resolve_manual(conflict_id, decision)
        .await
        .with_context(|| format!("Failed to resolve conflict {}", conflict_id))?;

    println!(
        "Resolved {}/{} with {}",
        resolved.data_type,
        resolved
            .result
            .resolved_record
            .id()
            .unwrap_or_default(),
        resolved.result.strategy
    );
    if resolved.upload {
        println!("  Queued the resolved record for upload. Run 'resync sync' to send it.");
    }
    Ok(resolved)
}

/// Parse the `--fields` argument into a decision.
pub fn fields_decision(json: &str) -> Result<ManualDecision> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("--fields is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(ManualDecision::Fields(map)),
        _ => anyhow::bail!("--fields must be a JSON object"),
    }
}
