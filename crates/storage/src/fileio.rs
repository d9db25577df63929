//! Copy, compress and decompress primitives that tolerate transient file
//! locks.
//!
//! The game client keeps save files open while it writes them, so any of
//! these operations can hit a sharing violation. Those are retried with
//! exponential backoff inside the blocking worker; every other failure is
//! terminal on the first attempt. A terminal failure never leaves a
//! partially written destination behind.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Attempts per operation before a contended file is given up on.
const MAX_ATTEMPTS: u32 = 3;
/// Backoff base; attempt `n` sleeps `BASE_DELAY_MS * 2^n` before retrying.
const BASE_DELAY_MS: u64 = 50;

/// Terminal outcome of a copy/compress/decompress operation, carrying a
/// human-readable reason and how many attempts were spent.
#[derive(Debug, Error)]
#[error("{op} failed for {} after {attempts} attempt(s): {reason}", .path.display())]
pub struct FileIoError {
    pub op: &'static str,
    pub path: PathBuf,
    pub attempts: u32,
    pub reason: String,
}

/// Copies `src` over `dst`, replacing it.
pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<(), FileIoError> {
    run_with_retry("copy", src, || try_copy(src, dst))
}

/// Writes `src` into a fresh zip container at `archive` as its single
/// entry, named `entry_name`.
pub(crate) fn compress_into(
    src: &Path,
    archive: &Path,
    entry_name: &str,
) -> Result<(), FileIoError> {
    run_with_retry("compress", src, || try_compress(src, archive, entry_name))
}

/// Extracts the first (and only expected) entry of `archive` over `dst`.
pub(crate) fn decompress_from(archive: &Path, dst: &Path) -> Result<(), FileIoError> {
    run_with_retry("decompress", archive, || try_decompress(archive, dst))
}

/// Uncompressed size of the first archive entry, so listings can report
/// logical sizes without extracting anything.
pub(crate) fn archived_entry_size(archive: &Path) -> Option<u64> {
    let file = File::open(archive).ok()?;
    let mut zip = ZipArchive::new(file).ok()?;
    let entry = zip.by_index(0).ok()?;
    Some(entry.size())
}

fn run_with_retry(
    op: &'static str,
    path: &Path,
    mut attempt_fn: impl FnMut() -> io::Result<()>,
) -> Result<(), FileIoError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(()) => return Ok(()),
            Err(err) if is_sharing_violation(&err) && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(BASE_DELAY_MS << attempt);
                debug!(
                    op,
                    path = %path.display(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "file is busy, backing off"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(FileIoError {
                    op,
                    path: path.to_path_buf(),
                    attempts: attempt + 1,
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// Another process holding the file open is the one failure worth waiting
/// out. Everything else (missing file, permissions, full disk) will not get
/// better on a retry.
fn is_sharing_violation(err: &io::Error) -> bool {
    // 32/33 are ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION on Windows,
    // where the watched game client actually runs.
    matches!(err.raw_os_error(), Some(32) | Some(33))
        || matches!(
            err.kind(),
            io::ErrorKind::WouldBlock
                | io::ErrorKind::ResourceBusy
                | io::ErrorKind::ExecutableFileBusy
        )
}

fn try_copy(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let mut output = File::create(dst)?;
    if let Err(err) = io::copy(&mut input, &mut output) {
        drop(output);
        remove_partial(dst);
        return Err(err);
    }
    Ok(())
}

fn try_compress(src: &Path, archive: &Path, entry_name: &str) -> io::Result<()> {
    // Opening the source first means a missing or locked source never
    // clobbers an existing destination.
    let mut input = File::open(src)?;
    let output = File::create(archive)?;
    let mut writer = ZipWriter::new(output);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let written = write_entry(&mut writer, &mut input, entry_name, options)
        .and_then(|()| writer.finish().map(drop).map_err(io::Error::other));
    if let Err(err) = written {
        remove_partial(archive);
        return Err(err);
    }
    Ok(())
}

fn write_entry(
    writer: &mut ZipWriter<File>,
    input: &mut File,
    entry_name: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    writer
        .start_file(entry_name, options)
        .map_err(io::Error::other)?;
    io::copy(input, writer)?;
    Ok(())
}

fn try_decompress(archive: &Path, dst: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(io::Error::other)?;
    if zip.len() == 0 {
        return Err(io::Error::other("archive contains no entries"));
    }
    let mut entry = zip.by_index(0).map_err(io::Error::other)?;
    let mut output = File::create(dst)?;
    if let Err(err) = io::copy(&mut entry, &mut output) {
        drop(output);
        remove_partial(dst);
        return Err(err);
    }
    Ok(())
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %err, "could not remove partial file");
        }
    }
}
