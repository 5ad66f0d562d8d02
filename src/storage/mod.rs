//! Persistence layer.
//!
//! Saves and loads the house snapshot to/from a JSON file. The file is
//! written to a sibling temp path first and then renamed over the old one,
//! so a crash mid-write never leaves a truncated snapshot behind.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::HouseSnapshot;
use crate::types::format_amount;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "drawhouse_state.json";

/// Save a house snapshot to a JSON file.
pub fn save_snapshot(snapshot: &HouseSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise house snapshot")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json)
        .context(format!("Failed to write snapshot to {tmp}"))?;
    std::fs::rename(&tmp, path)
        .context(format!("Failed to move snapshot into {path}"))?;

    debug!(
        path,
        draws = snapshot.draws.len(),
        total_pool = %format_amount(snapshot.pool.total_pool),
        "Snapshot saved"
    );
    Ok(())
}

/// Load a house snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: Option<&str>) -> Result<Option<HouseSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: HouseSnapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        total_pool = %format_amount(snapshot.pool.total_pool),
        draws = snapshot.draws.len(),
        saved_at = %snapshot.saved_at.to_rfc3339(),
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_snapshot(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
