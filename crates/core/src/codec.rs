//! Backup filename codec.
//!
//! Filenames are the only persistence this system has: everything a listing
//! needs (original name, timestamp, compression) is encoded into the stored
//! file's name and recovered by parsing it back. A name that does not parse
//! is not an error, it is simply not a backup.
//!
//! The shape is `<original>_<YYYYMMDD>_<HHMMSS[mmm]>.<ext>`, with a `.zip`
//! suffix appended when the payload is compressed:
//!
//! ```text
//! Amazon.d2s_20251002_082801.d2s
//! Amazon.d2s_20251002_082801.d2s.zip
//! Amazon.d2s_20251002_082801123.d2s
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Extension of the save files this tool understands.
pub const SAVE_EXT: &str = "d2s";
/// Suffix appended to compressed backups.
pub const ARCHIVE_EXT: &str = "zip";

/// Identity fields recovered from a backup filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    pub original_name: String,
    pub timestamp: NaiveDateTime,
    pub compressed: bool,
}

/// Builds the stored-file name for a backup of `original_name` taken at
/// `timestamp`. Second-precision timestamps produce the 6-digit time form;
/// a nonzero millisecond component produces the 9-digit form.
pub fn encode_backup_name(
    original_name: &str,
    timestamp: NaiveDateTime,
    compressed: bool,
) -> String {
    let ext = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(SAVE_EXT);
    let millis = (timestamp.nanosecond() / 1_000_000).min(999);
    let date = timestamp.format("%Y%m%d");
    let time = timestamp.format("%H%M%S");
    let mut name = if millis == 0 {
        format!("{original_name}_{date}_{time}.{ext}")
    } else {
        format!("{original_name}_{date}_{time}{millis:03}.{ext}")
    };
    if compressed {
        name.push('.');
        name.push_str(ARCHIVE_EXT);
    }
    name
}

/// Parses a stored-file name back into its identity fields.
///
/// Splits from the right: optional archive suffix, recognized base
/// extension, time segment (6 or 9 digits), date segment (8 digits); the
/// nonempty remainder is the original name. Anything that does not fit the
/// grammar exactly yields `None`.
pub fn decode_backup_name(name: &str) -> Option<DecodedName> {
    let (rest, compressed) = match split_extension(name, ARCHIVE_EXT) {
        Some((stem, _)) => (stem, true),
        None => (name, false),
    };
    let (rest, ext) = split_extension(rest, SAVE_EXT)?;
    let (rest, time_part) = rest.rsplit_once('_')?;
    let (stem, date_part) = rest.rsplit_once('_')?;
    if stem.is_empty() {
        return None;
    }
    let date = parse_date(date_part)?;
    let time = parse_time(time_part)?;
    let original_name = if carries_extension(stem, ext) {
        stem.to_owned()
    } else {
        format!("{stem}.{ext}")
    };
    Some(DecodedName {
        original_name,
        timestamp: NaiveDateTime::new(date, time),
        compressed,
    })
}

/// Splits `name` into (stem, extension) when its extension matches `ext`
/// ASCII-case-insensitively. Save files come from a case-insensitive
/// filesystem, so `Amazon.D2S` is as good as `Amazon.d2s`.
fn split_extension<'a>(name: &'a str, ext: &str) -> Option<(&'a str, &'a str)> {
    let (stem, tail) = name.rsplit_once('.')?;
    (!stem.is_empty() && tail.eq_ignore_ascii_case(ext)).then_some((stem, tail))
}

fn carries_extension(stem: &str, ext: &str) -> bool {
    stem.rsplit_once('.')
        .is_some_and(|(_, tail)| tail.eq_ignore_ascii_case(ext))
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !all_digits(s) {
        return None;
    }
    let year = s[0..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    if (s.len() != 6 && s.len() != 9) || !all_digits(s) {
        return None;
    }
    let hour = s[0..2].parse().ok()?;
    let minute = s[2..4].parse().ok()?;
    let second = s[4..6].parse().ok()?;
    let milli = if s.len() == 9 { s[6..9].parse().ok()? } else { 0 };
    NaiveTime::from_hms_milli_opt(hour, minute, second, milli)
}
