//! The backup store: create, list, restore and delete operations over a
//! flat backup directory, serialized per logical save file.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Timelike};
use parking_lot::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

use saveguard_core::{codec, BackupRecord, BackupTrigger};

use crate::error::StoreError;
use crate::events::{BackupEvent, EventSink, NullSink};
use crate::fileio;
use crate::locks::KeyedLocks;
use crate::retention;

/// Store construction knobs. Range validation is the config layer's job;
/// the store trusts what it is handed.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Flat directory holding every backup.
    pub backup_dir: PathBuf,
    /// Write new backups as single-entry zip containers.
    pub compress: bool,
    /// Retention cap per original file.
    pub max_backups_per_file: usize,
    /// Minimum interval between automatic backups of one source.
    pub cooldown: Duration,
}

pub struct BackupStore {
    config: StoreConfig,
    locks: KeyedLocks,
    cooldowns: Mutex<HashMap<String, Instant>>,
    sink: Arc<dyn EventSink>,
}

/// Result of a successful create.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub record: BackupRecord,
    pub trigger: BackupTrigger,
    pub duration: Duration,
}

/// Result of a successful restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Safety copy of the previous target content, when one was taken.
    pub pre_restore: Option<BackupRecord>,
}

impl BackupStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    pub fn with_sink(config: StoreConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            locks: KeyedLocks::new(),
            cooldowns: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    /// Physical location of a record's stored file.
    pub fn backup_path(&self, record: &BackupRecord) -> PathBuf {
        self.config.backup_dir.join(&record.backup_name)
    }

    /// Cooldown gate. Only automatic triggers are ever refused; a manual
    /// backup always goes through.
    pub fn can_create(&self, target: &Path, trigger: BackupTrigger) -> bool {
        if !trigger.is_automatic() {
            return true;
        }
        let cooldowns = self.cooldowns.lock();
        match cooldowns.get(&lock_key(target)) {
            Some(last) => last.elapsed() >= self.config.cooldown,
            None => true,
        }
    }

    /// Backs up `source` into the store. Serialized against every other
    /// operation on the same logical file.
    pub async fn create(
        &self,
        source: &Path,
        trigger: BackupTrigger,
    ) -> Result<CreateOutcome, StoreError> {
        let _guard = self.locks.acquire(&lock_key(source)).await;
        let outcome = self.create_locked(source, trigger, None).await;
        self.locks.sweep_idle();
        outcome
    }

    /// Backs up each source in turn. Sequential on purpose: the per-file
    /// locks would allow distinct targets in parallel, but a serial loop
    /// keeps progress reporting deterministic.
    pub async fn create_bulk(
        &self,
        sources: &[PathBuf],
        trigger: BackupTrigger,
    ) -> Vec<Result<CreateOutcome, StoreError>> {
        let total = sources.len();
        let mut results = Vec::with_capacity(total);
        for (index, source) in sources.iter().enumerate() {
            self.sink.emit(&BackupEvent::Progress {
                current: index + 1,
                total,
                current_file: display_name(source),
            });
            results.push(self.create(source, trigger).await);
        }
        results
    }

    /// Every decodable backup in the store, newest first. Never fails: an
    /// unreadable directory reads as empty and malformed names are skipped.
    pub async fn list_all(&self) -> Vec<BackupRecord> {
        self.scan(None).await
    }

    /// Backups of one original file, newest first.
    pub async fn list_for(&self, original_name: &str) -> Vec<BackupRecord> {
        self.scan(Some(original_name.to_owned())).await
    }

    /// Writes a backup's content back over `target`.
    ///
    /// The physical backup must still exist, or the operation fails before
    /// the target is touched. With `take_pre_restore_backup` the current
    /// target content is first captured as a `PreRestore` backup inside the
    /// same critical section, so a bad restore can itself be undone.
    pub async fn restore(
        &self,
        record: &BackupRecord,
        target: &Path,
        take_pre_restore_backup: bool,
    ) -> Result<RestoreOutcome, StoreError> {
        let _guard = self.locks.acquire(&lock_key(target)).await;
        let outcome = self
            .restore_locked(record, target, take_pre_restore_backup)
            .await;
        self.locks.sweep_idle();
        outcome
    }

    /// Removes a stored backup. Locked under the original file's key so a
    /// concurrent backup or restore of that file cannot race the removal.
    /// `Ok(false)` means the physical file was already gone.
    pub async fn delete(&self, record: &BackupRecord) -> Result<bool, StoreError> {
        let _guard = self.locks.acquire(&record.original_name.to_lowercase()).await;
        let path = self.backup_path(record);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(StoreError::Delete {
                    path,
                    reason: err.to_string(),
                })
            }
        };
        if removed {
            info!(backup = %record.backup_name, "backup deleted");
        }
        self.locks.sweep_idle();
        Ok(removed)
    }

    /// Body of `create`, entered with the file's lock already held. Also
    /// used by `restore` for the pre-restore safety copy, which runs inside
    /// the restore's own critical section.
    async fn create_locked(
        &self,
        source: &Path,
        trigger: BackupTrigger,
        retention_protect: Option<&str>,
    ) -> Result<CreateOutcome, StoreError> {
        let file_name = display_name(source);
        self.sink.emit(&BackupEvent::Started {
            file_name: file_name.clone(),
            trigger,
        });
        let started = Instant::now();

        match self.try_create(source).await {
            Ok(record) => {
                self.note_backup_time(source);
                self.apply_retention(&record.original_name, retention_protect)
                    .await;
                self.sink.emit(&BackupEvent::Completed { file_name, trigger });
                info!(backup = %record.backup_name, %trigger, "backup created");
                Ok(CreateOutcome {
                    record,
                    trigger,
                    duration: started.elapsed(),
                })
            }
            Err(err) => {
                self.sink.emit(&BackupEvent::Failed {
                    file_name: file_name.clone(),
                    error: err.to_string(),
                });
                warn!(file = %file_name, error = %err, "backup failed");
                Err(err)
            }
        }
    }

    async fn try_create(&self, source: &Path) -> Result<BackupRecord, StoreError> {
        let metadata = fs::metadata(source)
            .map_err(|_| StoreError::SourceNotFound(source.to_path_buf()))?;
        let original_name = display_name(source);
        let now = Local::now().naive_local();
        let (backup_name, timestamp) = self.pick_backup_name(&original_name, now)?;

        fs::create_dir_all(&self.config.backup_dir).map_err(|err| StoreError::BackupDir {
            path: self.config.backup_dir.clone(),
            reason: err.to_string(),
        })?;

        let src = source.to_path_buf();
        let dest = self.config.backup_dir.join(&backup_name);
        let compress = self.config.compress;
        let entry_name = original_name.clone();
        task::spawn_blocking(move || {
            if compress {
                fileio::compress_into(&src, &dest, &entry_name)
            } else {
                fileio::copy_file(&src, &dest)
            }
        })
        .await
        .map_err(|err| StoreError::Worker(err.to_string()))??;

        Ok(BackupRecord {
            original_name,
            backup_name,
            timestamp,
            size_bytes: metadata.len() as i64,
            compressed: compress,
        })
    }

    /// Picks an unused backup name for this instant. The second-precision
    /// form is preferred; when several backups of one file land in the same
    /// second the millisecond form disambiguates.
    fn pick_backup_name(
        &self,
        original_name: &str,
        now: NaiveDateTime,
    ) -> Result<(String, NaiveDateTime), StoreError> {
        let seconds = now.with_nanosecond(0).unwrap_or(now);
        let name = codec::encode_backup_name(original_name, seconds, self.config.compress);
        if !self.config.backup_dir.join(&name).exists() {
            return Ok((name, seconds));
        }

        let base_ms = (now.nanosecond() / 1_000_000).min(999);
        let mut last = String::new();
        for bump in 0..1000u32 {
            let ms = (base_ms + bump) % 1000;
            if ms == 0 {
                // The zero-millisecond encoding is the second-precision
                // form already tried above.
                continue;
            }
            let candidate = seconds.with_nanosecond(ms * 1_000_000).unwrap_or(seconds);
            let name = codec::encode_backup_name(original_name, candidate, self.config.compress);
            if !self.config.backup_dir.join(&name).exists() {
                return Ok((name, candidate));
            }
            last = name;
        }
        Err(StoreError::BackupExists(last))
    }

    async fn restore_locked(
        &self,
        record: &BackupRecord,
        target: &Path,
        take_pre_restore_backup: bool,
    ) -> Result<RestoreOutcome, StoreError> {
        let backup_path = self.backup_path(record);
        if !backup_path.exists() {
            return Err(StoreError::BackupNotFound(backup_path));
        }

        let mut pre_restore = None;
        if take_pre_restore_backup && target.exists() {
            // Best effort: restoring from a known-good backup matters more
            // than snapshotting a possibly corrupt target. The backup being
            // restored is shielded from the retention sweep this create
            // kicks off.
            match self
                .create_locked(target, BackupTrigger::PreRestore, Some(&record.backup_name))
                .await
            {
                Ok(outcome) => pre_restore = Some(outcome.record),
                Err(err) => {
                    warn!(target = %display_name(target), error = %err, "pre-restore backup failed")
                }
            }
        }

        let src = backup_path;
        let dst = target.to_path_buf();
        let compressed = record.compressed;
        task::spawn_blocking(move || {
            if compressed {
                fileio::decompress_from(&src, &dst)
            } else {
                fileio::copy_file(&src, &dst)
            }
        })
        .await
        .map_err(|err| StoreError::Worker(err.to_string()))??;

        info!(backup = %record.backup_name, target = %display_name(target), "backup restored");
        Ok(RestoreOutcome { pre_restore })
    }

    async fn scan(&self, original: Option<String>) -> Vec<BackupRecord> {
        let dir = self.config.backup_dir.clone();
        task::spawn_blocking(move || scan_records(&dir, original.as_deref()))
            .await
            .unwrap_or_default()
    }

    fn note_backup_time(&self, target: &Path) {
        self.cooldowns.lock().insert(lock_key(target), Instant::now());
    }

    async fn apply_retention(&self, original_name: &str, protect: Option<&str>) {
        let dir = self.config.backup_dir.clone();
        let name = original_name.to_owned();
        let cap = self.config.max_backups_per_file;
        let protect = protect.map(str::to_owned);
        if let Err(err) =
            task::spawn_blocking(move || retention::enforce(&dir, &name, cap, protect.as_deref()))
                .await
        {
            warn!(error = %err, "retention sweep aborted");
        }
    }
}

/// Decodes every backup in `backup_dir`, optionally narrowed to one
/// original file, newest first. Unreadable directories and undecodable
/// names are skipped silently: a name that does not parse is not a backup.
pub(crate) fn scan_records(backup_dir: &Path, original: Option<&str>) -> Vec<BackupRecord> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %backup_dir.display(), error = %err, "backup directory not readable");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(decoded) = codec::decode_backup_name(name) else {
            continue;
        };
        if let Some(wanted) = original {
            if !decoded.original_name.eq_ignore_ascii_case(wanted) {
                continue;
            }
        }
        records.push(BackupRecord {
            original_name: decoded.original_name,
            backup_name: name.to_owned(),
            timestamp: decoded.timestamp,
            size_bytes: logical_size(&entry.path(), decoded.compressed),
            compressed: decoded.compressed,
        });
    }
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.backup_name.cmp(&a.backup_name))
    });
    records
}

/// Size of the uncompressed content. For archives this is the first
/// entry's recorded size, falling back to the container size when the
/// archive cannot be read.
fn logical_size(path: &Path, compressed: bool) -> i64 {
    let container = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if compressed {
        fileio::archived_entry_size(path).unwrap_or(container) as i64
    } else {
        container as i64
    }
}

/// Lock and cooldown key for a path: the final component, case-folded.
/// Create, restore and delete all funnel through the same key for the same
/// logical save file regardless of how it is addressed.
fn lock_key(path: &Path) -> String {
    display_name(path).to_lowercase()
}

/// Final path component as text; falls back to the whole path for inputs
/// without one.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
