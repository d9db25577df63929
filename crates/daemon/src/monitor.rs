//! Polling save-directory watcher.
//!
//! The monitor decides *when* a backup happens; the store decides how. Each
//! poll compares every watched file's size against the last observation and
//! fires a danger backup when the size crosses the configured threshold
//! upward. The monitor owns debouncing: a burst of writes produces at most
//! one create call per debounce window per file, and the store's cooldown
//! gate is consulted on top of that. A slower periodic pass backs up every
//! watched file in one sequential bulk run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use saveguard_core::{BackupTrigger, SAVE_EXT};
use saveguard_storage::BackupStore;

use crate::config::Settings;

pub struct Monitor {
    store: Arc<BackupStore>,
    save_dir: PathBuf,
    poll_interval: Duration,
    size_threshold: u64,
    debounce: Duration,
    periodic_interval: Option<Duration>,
    seen_sizes: HashMap<PathBuf, u64>,
    last_triggered: HashMap<PathBuf, Instant>,
}

impl Monitor {
    pub fn new(store: Arc<BackupStore>, settings: &Settings) -> Self {
        Self {
            store,
            save_dir: settings.save_dir.clone(),
            poll_interval: settings.poll_interval,
            size_threshold: settings.size_threshold_bytes,
            debounce: settings.debounce,
            periodic_interval: settings.periodic_interval,
            seen_sizes: HashMap::new(),
            last_triggered: HashMap::new(),
        }
    }

    /// Runs until ctrl-c.
    pub async fn run(mut self) {
        info!(
            dir = %self.save_dir.display(),
            threshold = self.size_threshold,
            "watching save directory"
        );
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_periodic = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                    if let Some(every) = self.periodic_interval {
                        if last_periodic.elapsed() >= every {
                            last_periodic = Instant::now();
                            self.periodic_pass().await;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
    }

    /// One scan of the save directory.
    async fn poll_once(&mut self) {
        for path in save_files(&self.save_dir) {
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            let size = metadata.len();
            let previous = self.seen_sizes.insert(path.clone(), size);

            // Only an observed upward crossing counts; a file that is
            // already large when first seen is not in danger of anything.
            let crossed = previous
                .is_some_and(|prev| prev < self.size_threshold && size >= self.size_threshold);
            if !crossed {
                continue;
            }
            if !self.allow_trigger(&path) {
                debug!(file = %path.display(), "danger backup debounced");
                continue;
            }
            if !self.store.can_create(&path, BackupTrigger::DangerThreshold) {
                debug!(file = %path.display(), "danger backup suppressed by cooldown");
                continue;
            }
            match self.store.create(&path, BackupTrigger::DangerThreshold).await {
                Ok(outcome) => {
                    info!(backup = %outcome.record.backup_name, "danger backup created")
                }
                Err(err) => error!(file = %path.display(), error = %err, "danger backup failed"),
            }
        }
    }

    /// Backs up every watched file in one sequential bulk pass.
    async fn periodic_pass(&mut self) {
        let files: Vec<PathBuf> = save_files(&self.save_dir)
            .into_iter()
            .filter(|path| self.store.can_create(path, BackupTrigger::PeriodicAutomatic))
            .collect();
        if files.is_empty() {
            return;
        }
        info!(count = files.len(), "periodic backup pass");
        for result in self
            .store
            .create_bulk(&files, BackupTrigger::PeriodicAutomatic)
            .await
        {
            if let Err(err) = result {
                error!(error = %err, "periodic backup failed");
            }
        }
    }

    /// The debounce marker is set whenever a trigger is allowed through,
    /// regardless of whether the create then succeeds, so a failing file
    /// cannot hammer the store every poll.
    fn allow_trigger(&mut self, path: &Path) -> bool {
        match self.last_triggered.get(path) {
            Some(at) if at.elapsed() < self.debounce => false,
            _ => {
                self.last_triggered.insert(path.to_path_buf(), Instant::now());
                true
            }
        }
    }
}

/// The save files under `dir`, by extension.
pub fn save_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "save directory not readable");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SAVE_EXT))
        })
        .collect();
    files.sort();
    files
}
