//! Recovery: rebuild tables by replaying the commit journal
//!
//! 1. Scan the journal, validating checksums and sequence continuity
//! 2. Cut off a damaged tail (a torn final write) so appends resume cleanly
//! 3. Apply every valid write-set in order

use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::journal::{read_journal, truncate_journal, JournalError};
use crate::store::Tables;

/// Metrics collected during recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryMetrics {
    pub replay_count: u64,
    pub rows_applied: u64,
    /// Bytes removed from a damaged tail
    pub truncated_bytes: u64,
    pub elapsed_ms: u64,
}

/// State rebuilt from the journal
#[derive(Debug, Default)]
pub struct Recovered {
    pub tables: Tables,
    pub next_sequence: u64,
    pub metrics: RecoveryMetrics,
}

/// Replay the journal at `path` into fresh tables.
pub fn recover(path: &Path) -> Result<Recovered, JournalError> {
    let start = Instant::now();
    let scan = read_journal(path)?;

    let mut metrics = RecoveryMetrics::default();
    if let Some(offset) = scan.corrupted_at {
        let file_len = std::fs::metadata(path)?.len();
        metrics.truncated_bytes = file_len.saturating_sub(offset);
        warn!(
            path = %path.display(),
            offset,
            truncated_bytes = metrics.truncated_bytes,
            detail = scan.detail.as_deref().unwrap_or(""),
            "Journal tail damaged; truncating to last valid commit"
        );
        truncate_journal(path, offset)?;
    }

    let mut tables = Tables::default();
    let mut next_sequence = 0;
    for record in scan.records {
        metrics.rows_applied += record.changes.len() as u64;
        for change in record.changes {
            tables.apply(change);
        }
        next_sequence = record.sequence + 1;
        metrics.replay_count += 1;
    }
    metrics.elapsed_ms = start.elapsed().as_millis() as u64;

    info!(
        path = %path.display(),
        commits = metrics.replay_count,
        rows = metrics.rows_applied,
        elapsed_ms = metrics.elapsed_ms,
        "Journal replay complete"
    );

    Ok(Recovered {
        tables,
        next_sequence,
        metrics,
    })
}
