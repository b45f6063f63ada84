//! Show the conflict audit trail.

use anyhow::{Context, Result};

use super::Queue;

/// Print up to `limit` audit entries, newest first.
pub async fn run(queue: &Queue, limit: usize) -> Result<usize> {
    let entries = queue
        .engine()
        .audit_log(limit)
        .await
        .context("Failed to read the audit log")?;

    if entries.is_empty() {
        println!("Audit log is empty.");
        return Ok(0);
    }

    for entry in &entries {
        let strategy = entry
            .strategy
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let winner = entry
            .winner
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9} {}/{}  strategy={} winner={} ({} ms)",
            entry.at.to_rfc3339(),
            entry.kind.to_string(),
            entry.data_type,
            entry.record_id,
            strategy,
            winner,
            entry.duration_ms
        );
        if let Some(detail) = &entry.detail {
            println!("    {}", detail);
        }
    }
    Ok(entries.len())
}
