use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use saveguard_core::{BackupRecord, BackupTrigger};
use saveguard_daemon::config::{self, Config, Settings};
use saveguard_daemon::monitor::{save_files, Monitor};
use saveguard_storage::{BackupEvent, BackupStore, EventSink};
use tracing::{debug, info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let (cfg, command) = parse_args()?;
    let settings = Settings::resolve(&cfg);
    let store = Arc::new(BackupStore::with_sink(
        settings.store_config(),
        Arc::new(LogSink),
    ));

    match command {
        Command::Watch => {
            Monitor::new(Arc::clone(&store), &settings).run().await;
            Ok(())
        }
        Command::Backup { file } => backup_one(&store, &settings, &file).await,
        Command::BackupAll => backup_all(&store, &settings).await,
        Command::List { original, json } => list(&store, original.as_deref(), json).await,
        Command::Restore {
            backup_name,
            target,
            pre_backup,
        } => restore(&store, &settings, &backup_name, target, pre_backup).await,
        Command::Delete { backup_name } => delete(&store, &backup_name).await,
    }
}

enum Command {
    Watch,
    Backup { file: PathBuf },
    BackupAll,
    List { original: Option<String>, json: bool },
    Restore {
        backup_name: String,
        target: Option<PathBuf>,
        pre_backup: bool,
    },
    Delete { backup_name: String },
}

/// Parse CLI args, returning the loaded config and the selected command.
fn parse_args() -> Result<(Config, Command)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut json = false;
    let mut pre_backup = true;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--json" => json = true,
            "--no-pre-backup" => pre_backup = false,
            other => positional.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    let command = match positional.first().map(String::as_str) {
        None | Some("watch") => Command::Watch,
        Some("backup") => Command::Backup {
            file: PathBuf::from(positional.get(1).context("backup requires a file argument")?),
        },
        Some("backup-all") => Command::BackupAll,
        Some("list") => Command::List {
            original: positional.get(1).cloned(),
            json,
        },
        Some("restore") => Command::Restore {
            backup_name: positional
                .get(1)
                .context("restore requires a backup name")?
                .clone(),
            target: positional.get(2).map(PathBuf::from),
            pre_backup,
        },
        Some("delete") => Command::Delete {
            backup_name: positional
                .get(1)
                .context("delete requires a backup name")?
                .clone(),
        },
        Some(other) => bail!("unknown command: {other}"),
    };

    Ok((cfg, command))
}

/// Translates store notifications into log lines.
struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &BackupEvent) {
        match event {
            BackupEvent::Started { file_name, trigger } => {
                debug!(file = %file_name, %trigger, "backup started")
            }
            BackupEvent::Completed { file_name, trigger } => {
                debug!(file = %file_name, %trigger, "backup completed")
            }
            BackupEvent::Failed { file_name, error } => {
                warn!(file = %file_name, error = %error, "backup failed")
            }
            BackupEvent::Progress {
                current,
                total,
                current_file,
            } => info!(current, total, file = %current_file, "bulk progress"),
        }
    }
}

async fn backup_one(store: &BackupStore, settings: &Settings, file: &PathBuf) -> Result<()> {
    // A bare name is looked up in the save directory.
    let source = if file.exists() {
        file.clone()
    } else {
        settings.save_dir.join(file)
    };
    let outcome = store.create(&source, BackupTrigger::ManualSingle).await?;
    info!(
        backup = %outcome.record.backup_name,
        millis = outcome.duration.as_millis() as u64,
        "backup created"
    );
    Ok(())
}

async fn backup_all(store: &BackupStore, settings: &Settings) -> Result<()> {
    let files = save_files(&settings.save_dir);
    if files.is_empty() {
        bail!("no save files in {}", settings.save_dir.display());
    }
    let results = store.create_bulk(&files, BackupTrigger::ManualBulk).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(
        total = results.len(),
        failed, "bulk backup finished"
    );
    if failed > 0 {
        bail!("{failed} of {} backups failed", results.len());
    }
    Ok(())
}

async fn list(store: &BackupStore, original: Option<&str>, json: bool) -> Result<()> {
    let records = match original {
        Some(name) => store.list_for(name).await,
        None => store.list_all().await,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in &records {
        println!(
            "{:<48} {:>8} B  {}  {}",
            record.backup_name,
            record.size_bytes,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            if record.compressed { "zip" } else { "" },
        );
    }
    info!(count = records.len(), "backups listed");
    Ok(())
}

async fn restore(
    store: &BackupStore,
    settings: &Settings,
    backup_name: &str,
    target: Option<PathBuf>,
    pre_backup: bool,
) -> Result<()> {
    let record = find_record(store, backup_name).await?;
    let target = target.unwrap_or_else(|| settings.save_dir.join(&record.original_name));
    let outcome = store.restore(&record, &target, pre_backup).await?;
    match outcome.pre_restore {
        Some(pre) => info!(
            target = %target.display(),
            pre_restore = %pre.backup_name,
            "restore finished"
        ),
        None => info!(target = %target.display(), "restore finished"),
    }
    Ok(())
}

async fn delete(store: &BackupStore, backup_name: &str) -> Result<()> {
    let record = find_record(store, backup_name).await?;
    if store.delete(&record).await? {
        info!(backup = %backup_name, "backup deleted");
    } else {
        warn!(backup = %backup_name, "backup file was already gone");
    }
    Ok(())
}

async fn find_record(store: &BackupStore, backup_name: &str) -> Result<BackupRecord> {
    store
        .list_all()
        .await
        .into_iter()
        .find(|record| record.backup_name == backup_name)
        .with_context(|| format!("no backup named {backup_name}"))
}
