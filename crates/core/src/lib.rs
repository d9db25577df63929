pub mod codec;
pub mod record;

pub use codec::{decode_backup_name, encode_backup_name, DecodedName, ARCHIVE_EXT, SAVE_EXT};
pub use record::{BackupRecord, BackupTrigger};
