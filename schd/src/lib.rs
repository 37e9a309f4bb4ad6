//! `ddss-schd`: data delivery scheduling core.
//!
//! A token-scoped key/value store plus the update/read sequence protocol
//! that lets polling display devices find out whether their payload is
//! stale and when the next update is due.
//!
//! Layout:
//! - [`store`]: `(service, client, key) -> value` table (SQLite or memory)
//! - [`auth`]: bearer token → [`auth::Role`]
//! - [`engine`]: `setup`, `enroll`, `remove`, `schedule`, `next`, `update`,
//!   `peek`, `read` and the read-only overviews

pub mod action;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod status;
pub mod store;
pub mod timestamp;

pub use action::{Action, NextSchedule, Outcome, Payload};
pub use auth::{AuthGate, Role};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::DdssConfig;
pub use engine::ScheduleEngine;
pub use errors::{ConfigError, Result, ScheduleError, StorageError};
pub use status::DeviceStatus;
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};

/// Partition of the shared `services` table owned by this subsystem.
pub const SERVICE: &str = "schd";

/// Client id and key of the admin credential record.
pub const ADMIN_CLIENT: &str = "admin";
pub const ADMIN_TOKEN_KEY: &str = "token";

pub const ENROLLED_KEY: &str = "enrolled";
pub const UPDATE_SEQ_KEY: &str = "update_seq";
pub const UPDATE_TS_KEY: &str = "update_ts";
pub const READ_SEQ_KEY: &str = "read_seq";
pub const READ_TS_KEY: &str = "read_ts";

/// Keys managed by the engine; never writable or readable as data slots.
pub const RESERVED_KEYS: [&str; 5] = [
    ENROLLED_KEY,
    UPDATE_SEQ_KEY,
    UPDATE_TS_KEY,
    READ_SEQ_KEY,
    READ_TS_KEY,
];

/// Slot used when a request names no key.
pub const DEFAULT_KEY: &str = "data";

pub const DEFAULT_MIME: &str = "application/octet-stream";

/// `update_seq` wraps at this value.
pub const SEQ_MODULUS: i64 = 65536;

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Lenient integer read of a stored counter or flag.
///
/// Leading whitespace, an optional sign and leading digits are honoured;
/// anything unparseable reads as 0 and out-of-range runs saturate.
pub fn parse_int(raw: &[u8]) -> i64 {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let run = &digits[..end];
    if run.is_empty() {
        return 0;
    }

    // A non-empty digit run only fails to parse by overflowing.
    match run.parse::<i64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) if negative => i64::MIN,
        Err(_) => i64::MAX,
    }
}

/// Shorten a token for logs: first four characters and an ellipsis.
pub fn redact(token: &str) -> String {
    let mut chars = token.chars();
    let head: String = chars.by_ref().take(4).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_is_lenient() {
        assert_eq!(parse_int(b"42"), 42);
        assert_eq!(parse_int(b" 7"), 7);
        assert_eq!(parse_int(b"-3"), -3);
        assert_eq!(parse_int(b"+5"), 5);
        assert_eq!(parse_int(b"12abc"), 12);
        assert_eq!(parse_int(b"abc"), 0);
        assert_eq!(parse_int(b""), 0);
        assert_eq!(parse_int(&[0xff, 0xfe]), 0);
    }

    #[test]
    fn parse_int_saturates() {
        assert_eq!(parse_int(b"99999999999999999999"), i64::MAX);
        assert_eq!(parse_int(b"-99999999999999999999"), i64::MIN);
        assert_eq!(parse_int(b"9223372036854775807"), i64::MAX);
    }

    #[test]
    fn redact_keeps_short_prefix() {
        assert_eq!(redact("abcdefgh"), "abcd…");
        assert_eq!(redact("abcd"), "abcd");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn reserved_keys() {
        assert!(is_reserved_key("update_seq"));
        assert!(!is_reserved_key("data"));
        assert!(!is_reserved_key("token"));
    }
}
