//! Property tests for the backup filename codec: encode/decode must be
//! exact inverses over the whole identity space, and decode must never
//! panic on arbitrary input.

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;

use saveguard_core::{decode_backup_name, encode_backup_name};

fn arb_timestamp() -> impl Strategy<Value = NaiveDateTime> {
    (
        1990i32..2100,
        1u32..=12,
        1u32..=28,
        0u32..24,
        0u32..60,
        0u32..60,
        0u32..1000,
    )
        .prop_map(|(year, month, day, hour, minute, second, milli)| {
            NaiveDate::from_ymd_opt(year, month, day)
                .unwrap()
                .and_hms_milli_opt(hour, minute, second, milli)
                .unwrap()
        })
}

fn arb_original_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ._-]{0,24}".prop_map(|stem| format!("{stem}.d2s"))
}

proptest! {
    #[test]
    fn encode_decode_round_trips(
        name in arb_original_name(),
        timestamp in arb_timestamp(),
        compressed in any::<bool>(),
    ) {
        let encoded = encode_backup_name(&name, timestamp, compressed);
        let decoded = decode_backup_name(&encoded).expect("encoded name must decode");
        prop_assert_eq!(decoded.original_name, name);
        prop_assert_eq!(decoded.timestamp, timestamp);
        prop_assert_eq!(decoded.compressed, compressed);
    }

    #[test]
    fn decode_never_panics(name in ".{0,64}") {
        let _ = decode_backup_name(&name);
    }

    #[test]
    fn decode_rejects_wrong_time_widths(
        stem in "[A-Za-z]{1,8}",
        digits in proptest::collection::vec(0u8..10, 1..12),
    ) {
        // Only 6- and 9-digit time segments are valid.
        prop_assume!(digits.len() != 6 && digits.len() != 9);
        let time: String = digits.iter().map(|d| char::from(b'0' + d)).collect();
        let name = format!("{stem}.d2s_20250101_{time}.d2s");
        prop_assert!(decode_backup_name(&name).is_none());
    }
}
