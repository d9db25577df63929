use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupTrigger {
    /// A watched file's size crossed the danger threshold.
    DangerThreshold,
    /// The periodic automatic pass.
    PeriodicAutomatic,
    /// A user asked for one file to be backed up.
    ManualSingle,
    /// A user asked for every file to be backed up.
    ManualBulk,
    /// Safety copy of a restore target, taken before overwriting it.
    PreRestore,
}

impl BackupTrigger {
    /// Automatic triggers are subject to the cooldown gate; manual ones
    /// never are.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, BackupTrigger::ManualSingle | BackupTrigger::ManualBulk)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackupTrigger::DangerThreshold => "danger-threshold",
            BackupTrigger::PeriodicAutomatic => "periodic",
            BackupTrigger::ManualSingle => "manual",
            BackupTrigger::ManualBulk => "manual-bulk",
            BackupTrigger::PreRestore => "pre-restore",
        }
    }
}

impl fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One stored backup, described entirely by its filename plus filesystem
/// metadata. Records are immutable: they come into being when the physical
/// write succeeds and only ever disappear through an explicit delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Logical save-file identity, e.g. `Amazon.d2s`.
    pub original_name: String,
    /// Physical stored-file name inside the backup directory.
    pub backup_name: String,
    /// Wall-clock creation time, second precision (millisecond when two
    /// backups of one file land in the same second).
    pub timestamp: NaiveDateTime,
    /// Size of the logical, uncompressed content.
    pub size_bytes: i64,
    /// When set, the physical file is a zip container holding exactly one
    /// entry.
    pub compressed: bool,
}
