//! File-based backup storage engine for save files.
//!
//! The store keeps timestamped, optionally zip-compressed copies of save
//! files in a flat backup directory. Filenames are the only index: every
//! query re-derives its answer by decoding directory entries through
//! [`saveguard_core::codec`]. Operations on the same logical file are
//! serialized by a per-file lock registry; unrelated files proceed in
//! parallel.

pub mod error;
pub mod events;
mod fileio;
mod locks;
mod retention;
pub mod store;

pub use error::StoreError;
pub use events::{BackupEvent, EventSink, NullSink};
pub use fileio::FileIoError;
pub use store::{BackupStore, CreateOutcome, RestoreOutcome, StoreConfig};
