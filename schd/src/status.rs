//! Per-device overview assembled from a client's full record set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::is_truthy;
use crate::{
    ENROLLED_KEY, READ_SEQ_KEY, READ_TS_KEY, UPDATE_SEQ_KEY, UPDATE_TS_KEY, is_reserved_key,
    parse_int, timestamp,
};

/// One side (update or read) of the schedule state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSide {
    pub ts: Option<String>,
    pub seq: i64,
    pub missed: bool,
}

/// A caller-defined data slot and its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSummary {
    pub key: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub token: String,
    pub enrolled: bool,
    pub update: ScheduleSide,
    pub read: ScheduleSide,
    pub slots: Vec<SlotSummary>,
}

impl DeviceStatus {
    /// Build the overview from `list_by_client` output.
    ///
    /// The update side is missed when no valid `update_ts` is stored or it
    /// is not in the future; the read side is missed while outdated.
    pub fn from_records(
        token: &str,
        records: &BTreeMap<String, Vec<u8>>,
        now: DateTime<Utc>,
    ) -> Self {
        let text = |key: &str| {
            records
                .get(key)
                .map(|v| String::from_utf8_lossy(v).into_owned())
        };
        let int = |key: &str| records.get(key).map_or(0, |v| parse_int(v));

        let update_ts = text(UPDATE_TS_KEY);
        let update_seq = int(UPDATE_SEQ_KEY);
        let update_missed = update_ts
            .as_deref()
            .and_then(timestamp::parse_strict)
            .is_none_or(|due| now >= due);

        let read_seq = int(READ_SEQ_KEY);

        let slots = records
            .iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .map(|(key, value)| SlotSummary {
                key: key.clone(),
                len: value.len(),
            })
            .collect();

        Self {
            token: token.to_string(),
            enrolled: records.get(ENROLLED_KEY).is_some_and(|v| is_truthy(v)),
            update: ScheduleSide {
                ts: update_ts,
                seq: update_seq,
                missed: update_missed,
            },
            read: ScheduleSide {
                ts: text(READ_TS_KEY),
                seq: read_seq,
                missed: read_seq != update_seq,
            },
            slots,
        }
    }
}
