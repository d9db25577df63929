//! Lifecycle notifications for store operations.

use saveguard_core::BackupTrigger;

/// Emitted synchronously from within the store's call stack, before and
/// after each backup attempt and ahead of every item in a bulk pass. The
/// receiver is responsible for marshaling to its own execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    Started {
        file_name: String,
        trigger: BackupTrigger,
    },
    Completed {
        file_name: String,
        trigger: BackupTrigger,
    },
    Failed {
        file_name: String,
        error: String,
    },
    Progress {
        current: usize,
        total: usize,
        current_file: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BackupEvent);
}

/// Sink for callers that do not care about notifications.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &BackupEvent) {}
}
