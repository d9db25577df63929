//! Retention cap enforcement.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::store::scan_records;

/// Deletes backups of `original_name` beyond `max_per_file`, oldest first.
/// `protect` names a backup that is never an eviction candidate: the
/// pre-restore safety copy taken during a restore must not evict the very
/// backup being restored while the restore is still in flight.
///
/// Best effort: a failed removal is logged and skipped, and the create that
/// triggered the sweep never fails because of it.
pub(crate) fn enforce(
    backup_dir: &Path,
    original_name: &str,
    max_per_file: usize,
    protect: Option<&str>,
) {
    let records = scan_records(backup_dir, Some(original_name));
    let excess = records.len().saturating_sub(max_per_file);
    if excess == 0 {
        return;
    }
    // scan_records sorts newest first; walk from the oldest end.
    let doomed = records
        .into_iter()
        .rev()
        .filter(|record| protect != Some(record.backup_name.as_str()))
        .take(excess);
    for record in doomed {
        let path = backup_dir.join(&record.backup_name);
        match fs::remove_file(&path) {
            Ok(()) => debug!(backup = %record.backup_name, "evicted old backup"),
            Err(err) => {
                warn!(backup = %record.backup_name, error = %err, "could not evict old backup")
            }
        }
    }
}
