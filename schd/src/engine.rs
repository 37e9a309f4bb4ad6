//! Update/read sequence state machine.
//!
//! Per enrolled client the engine keeps `update_seq`/`update_ts` (advanced
//! by `schedule`) and `read_seq`/`read_ts` (advanced by `read`). A client is
//! outdated while the two sequence numbers differ.
//!
//! Every field is written with its own upsert. `schedule` and `read` each
//! touch two keys without a transaction, so a `schedule` landing between
//! the two steps of a `read` leaves the client marked caught up to a
//! sequence whose payload it may not have fetched. That window is accepted.

use crate::action::{Action, NextSchedule, Outcome, Payload};
use crate::auth::{AuthGate, Role, is_truthy};
use crate::clock::{Clock, SystemClock};
use crate::errors::{Result, ScheduleError};
use crate::status::DeviceStatus;
use crate::store::RecordStore;
use crate::{
    ADMIN_CLIENT, ADMIN_TOKEN_KEY, DEFAULT_KEY, DEFAULT_MIME, ENROLLED_KEY, READ_SEQ_KEY,
    READ_TS_KEY, SEQ_MODULUS, UPDATE_SEQ_KEY, UPDATE_TS_KEY, is_reserved_key, parse_int, redact,
    timestamp,
};

pub struct ScheduleEngine<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: RecordStore> ScheduleEngine<S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: RecordStore, C: Clock> ScheduleEngine<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn gate(&self) -> AuthGate<'_, S> {
        AuthGate::new(&self.store)
    }

    /// Classify `token` and run `action` under the resulting role.
    pub fn handle(&self, token: Option<&str>, action: Action) -> Result<Outcome> {
        let role = self.gate().classify(token)?;
        let name = action.name();
        let result = self.dispatch(&role, token.unwrap_or_default(), action);

        match &result {
            Ok(_) => tracing::debug!(action = name, "Action completed"),
            Err(ScheduleError::Storage(e)) => {
                tracing::error!(action = name, error = %e, "Storage failure")
            }
            Err(e) => tracing::warn!(action = name, error = %e, "Action rejected"),
        }
        result
    }

    fn dispatch(&self, role: &Role, token: &str, action: Action) -> Result<Outcome> {
        match action {
            Action::Setup => self.setup(role, token).map(|()| Outcome::Done),
            Action::Enroll { dev_token } => self.enroll(role, &dev_token).map(|()| Outcome::Done),
            Action::Remove { dev_token } => self.remove(role, &dev_token).map(|()| Outcome::Done),
            Action::Devices => self.devices(role).map(Outcome::Devices),
            Action::Schedule { ts } => self.schedule(role, &ts).map(|()| Outcome::Accepted),
            Action::Next => self.next(role).map(Outcome::Next),
            Action::Update { key, value } => self
                .update(role, key.as_deref(), value)
                .map(|()| Outcome::Accepted),
            Action::Peek { key, mime } => self
                .peek(role, key.as_deref(), mime.as_deref())
                .map(Outcome::Payload),
            Action::Read { key } => self.read(role, key.as_deref()).map(Outcome::Payload),
            Action::Status => self.status(role).map(Outcome::Status),
        }
    }

    // ── Admin ────────────────────────────────────────────────────────────

    /// Store `candidate` as the admin token. Permitted exactly once.
    pub fn setup(&self, role: &Role, candidate: &str) -> Result<()> {
        if *role != Role::Uninitialized {
            return Err(ScheduleError::unauthorized("Already initialized"));
        }
        if candidate.is_empty() {
            return Err(ScheduleError::bad_request("Invalid token"));
        }

        self.store
            .set(ADMIN_CLIENT, ADMIN_TOKEN_KEY, candidate.as_bytes())?;
        tracing::info!("Admin token initialized");
        Ok(())
    }

    pub fn enroll(&self, role: &Role, dev_token: &str) -> Result<()> {
        self.set_enrolled(role, dev_token, true)
    }

    /// Soft revoke: the flag is cleared, the device's rows stay.
    pub fn remove(&self, role: &Role, dev_token: &str) -> Result<()> {
        self.set_enrolled(role, dev_token, false)
    }

    fn set_enrolled(&self, role: &Role, dev_token: &str, enrolled: bool) -> Result<()> {
        role.require_admin()?;
        if dev_token.is_empty() || dev_token == ADMIN_CLIENT {
            return Err(ScheduleError::bad_request("Invalid device token"));
        }

        let flag: &[u8] = if enrolled { b"1" } else { b"0" };
        self.store.set(dev_token, ENROLLED_KEY, flag)?;
        tracing::info!(device = %redact(dev_token), enrolled, "Enrollment changed");
        Ok(())
    }

    /// Enrolled device tokens, sorted.
    pub fn devices(&self, role: &Role) -> Result<Vec<String>> {
        role.require_admin()?;
        let flags = self.store.list_by_key(ENROLLED_KEY)?;
        Ok(flags
            .into_iter()
            .filter(|(token, flag)| token != ADMIN_CLIENT && is_truthy(flag))
            .map(|(token, _)| token)
            .collect())
    }

    // ── Device ───────────────────────────────────────────────────────────

    /// Set the next update time and bump `update_seq` (mod 65536).
    pub fn schedule(&self, role: &Role, ts: &str) -> Result<()> {
        let client = role.require_device()?;
        let due = timestamp::parse_strict(ts)
            .ok_or_else(|| ScheduleError::bad_request("Invalid timestamp"))?;

        self.store
            .set(client, UPDATE_TS_KEY, timestamp::format(&due).as_bytes())?;
        let seq = (self.int(client, UPDATE_SEQ_KEY)?.rem_euclid(SEQ_MODULUS) + 1) % SEQ_MODULUS;
        self.store
            .set(client, UPDATE_SEQ_KEY, seq.to_string().as_bytes())?;

        tracing::info!(device = %redact(client), seq, due = %due, "Update scheduled");
        Ok(())
    }

    /// Staleness flag and seconds until the scheduled update.
    pub fn next(&self, role: &Role) -> Result<NextSchedule> {
        let client = role.require_device()?;

        let update_seq = self.int(client, UPDATE_SEQ_KEY)?;
        let read_seq = self.int(client, READ_SEQ_KEY)?;

        let now = self.clock.now();
        let due = self
            .store
            .get(client, UPDATE_TS_KEY)?
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|raw| timestamp::parse_strict(&raw))
            .ok_or_else(|| ScheduleError::bad_request("Invalid update timestamp"))?;

        Ok(NextSchedule {
            outdated: update_seq != read_seq,
            next_schd_s: due.timestamp() - now.timestamp(),
        })
    }

    /// Write a data slot. Leaves the schedule state alone.
    pub fn update(&self, role: &Role, key: Option<&str>, value: Option<Vec<u8>>) -> Result<()> {
        let client = role.require_device()?;
        let Some(value) = value else {
            return Err(ScheduleError::bad_request("Invalid method"));
        };
        let key = data_key(key)?;

        self.store.set(client, key, &value)?;
        tracing::debug!(device = %redact(client), key, len = value.len(), "Slot updated");
        Ok(())
    }

    /// Return a slot without marking it consumed.
    pub fn peek(&self, role: &Role, key: Option<&str>, mime: Option<&str>) -> Result<Payload> {
        let client = role.require_device()?;
        let key = data_key(key)?;

        let body = self.store.get(client, key)?.unwrap_or_default();
        Ok(Payload {
            key: key.to_string(),
            mime: mime
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MIME)
                .to_string(),
            body,
        })
    }

    /// Return a slot, then record the read: `read_ts := now`,
    /// `read_seq := update_seq`.
    pub fn read(&self, role: &Role, key: Option<&str>) -> Result<Payload> {
        let client = role.require_device()?;
        let key = data_key(key)?;

        let body = self.store.get(client, key)?.unwrap_or_default();

        let now = timestamp::format_utc(&self.clock.now());
        self.store.set(client, READ_TS_KEY, now.as_bytes())?;
        let seq = self.int(client, UPDATE_SEQ_KEY)?;
        self.store
            .set(client, READ_SEQ_KEY, seq.to_string().as_bytes())?;

        tracing::debug!(device = %redact(client), key, seq, "Slot read");
        Ok(Payload {
            key: key.to_string(),
            mime: DEFAULT_MIME.to_string(),
            body,
        })
    }

    pub fn status(&self, role: &Role) -> Result<DeviceStatus> {
        let client = role.require_device()?;
        let records = self.store.list_by_client(client)?;
        Ok(DeviceStatus::from_records(
            client,
            &records,
            self.clock.now(),
        ))
    }

    fn int(&self, client: &str, key: &str) -> Result<i64> {
        Ok(self
            .store
            .get(client, key)?
            .map_or(0, |raw| parse_int(&raw)))
    }
}

/// Resolve an optional slot name, defaulting to `data`.
fn data_key(key: Option<&str>) -> Result<&str> {
    let key = key.unwrap_or(DEFAULT_KEY);
    if key.is_empty() || is_reserved_key(key) {
        return Err(ScheduleError::bad_request("Invalid key"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::MemoryRecordStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn device(client: &str) -> Role {
        Role::Device(client.to_string())
    }

    fn engine() -> ScheduleEngine<Arc<MemoryRecordStore>, MockClock> {
        ScheduleEngine::with_clock(Arc::new(MemoryRecordStore::new()), MockClock::fixed())
    }

    #[test]
    fn data_key_defaults_and_rejects_reserved() {
        assert_eq!(data_key(None).unwrap(), "data");
        assert_eq!(data_key(Some("meta")).unwrap(), "meta");
        assert!(data_key(Some("")).is_err());
        for key in crate::RESERVED_KEYS {
            assert!(data_key(Some(key)).is_err(), "{key} accepted");
        }
    }

    #[test]
    fn schedule_stores_canonical_timestamp() {
        let engine = engine();
        engine
            .schedule(&device("dev1"), "2030-01-01T00:00:00Z")
            .unwrap();

        assert_eq!(
            engine.store().get("dev1", UPDATE_TS_KEY).unwrap(),
            Some(b"2030-01-01T00:00:00+00:00".to_vec())
        );
        assert_eq!(
            engine.store().get("dev1", UPDATE_SEQ_KEY).unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn schedule_rejects_bad_timestamp_without_side_effects() {
        let engine = engine();
        let err = engine
            .schedule(&device("dev1"), "2030-01-01 00:00")
            .unwrap_err();
        assert_eq!(err.to_string(), "bad request: Invalid timestamp");
        assert_eq!(engine.store().get("dev1", UPDATE_SEQ_KEY).unwrap(), None);
    }

    #[test]
    fn sequence_wraps_at_modulus() {
        let engine = engine();
        engine
            .store()
            .set("dev1", UPDATE_SEQ_KEY, b"65535")
            .unwrap();
        engine
            .schedule(&device("dev1"), "2030-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(
            engine.store().get("dev1", UPDATE_SEQ_KEY).unwrap(),
            Some(b"0".to_vec())
        );
    }

    #[test]
    fn sequence_survives_out_of_range_counter() {
        let engine = engine();
        for (stored, expected) in [
            ("9223372036854775807", b"0".to_vec()),
            ("99999999999999999999999", b"0".to_vec()),
            ("-1", b"0".to_vec()),
            ("65536", b"1".to_vec()),
        ] {
            engine
                .store()
                .set("dev1", UPDATE_SEQ_KEY, stored.as_bytes())
                .unwrap();
            engine
                .schedule(&device("dev1"), "2030-01-01T00:00:00Z")
                .unwrap();
            assert_eq!(
                engine.store().get("dev1", UPDATE_SEQ_KEY).unwrap(),
                Some(expected),
                "stored {stored}"
            );
        }
    }

    #[test]
    fn next_requires_a_schedule() {
        let engine = engine();
        let err = engine.next(&device("dev1")).unwrap_err();
        assert_eq!(err.to_string(), "bad request: Invalid update timestamp");

        engine
            .store()
            .set("dev1", UPDATE_TS_KEY, b"garbage")
            .unwrap();
        assert!(engine.next(&device("dev1")).is_err());
    }

    #[test]
    fn next_reports_negative_delay_after_deadline() {
        let engine = engine();
        engine
            .schedule(&device("dev1"), "2026-01-15T11:59:00Z")
            .unwrap();
        let next = engine.next(&device("dev1")).unwrap();
        assert_eq!(
            next,
            NextSchedule {
                outdated: true,
                next_schd_s: -60
            }
        );
    }

    #[test]
    fn next_uses_instant_not_wall_clock_offset() {
        let engine = engine();
        // 13:00 at +01:00 is 12:00 UTC, the mock clock's time.
        engine
            .schedule(&device("dev1"), "2026-01-15T13:00:00+01:00")
            .unwrap();
        assert_eq!(engine.next(&device("dev1")).unwrap().next_schd_s, 0);
    }

    #[test]
    fn read_snapshots_update_seq_and_time() {
        let engine = engine();
        engine.store().set("dev1", "data", b"frame").unwrap();
        engine
            .schedule(&device("dev1"), "2030-01-01T00:00:00Z")
            .unwrap();
        engine
            .schedule(&device("dev1"), "2030-01-02T00:00:00Z")
            .unwrap();

        let payload = engine.read(&device("dev1"), None).unwrap();
        assert_eq!(payload.body, b"frame".to_vec());
        assert_eq!(payload.mime, "application/octet-stream");
        assert_eq!(
            engine.store().get("dev1", READ_SEQ_KEY).unwrap(),
            Some(b"2".to_vec())
        );
        assert_eq!(
            engine.store().get("dev1", READ_TS_KEY).unwrap(),
            Some(b"2026-01-15T12:00:00+00:00".to_vec())
        );
    }

    #[test]
    fn peek_of_missing_slot_is_empty() {
        let engine = engine();
        let payload = engine
            .peek(&device("dev1"), Some("svg"), Some("image/svg+xml"))
            .unwrap();
        assert_eq!(
            payload,
            Payload {
                key: "svg".to_string(),
                mime: "image/svg+xml".to_string(),
                body: Vec::new(),
            }
        );
    }

    #[test]
    fn update_without_body_is_rejected() {
        let engine = engine();
        let err = engine.update(&device("dev1"), None, None).unwrap_err();
        assert_eq!(err.to_string(), "bad request: Invalid method");
    }

    #[test]
    fn device_actions_reject_admin_role() {
        let engine = engine();
        let admin = Role::Admin("root".to_string());
        assert_eq!(engine.next(&admin).unwrap_err().status_code(), 400);
        assert_eq!(
            engine.read(&admin, None).unwrap_err().status_code(),
            400
        );
        assert_eq!(
            engine
                .schedule(&admin, "2030-01-01T00:00:00Z")
                .unwrap_err()
                .status_code(),
            400
        );
    }

    #[test]
    fn devices_lists_only_enrolled() {
        let engine = engine();
        let admin = Role::Admin("root".to_string());
        engine.enroll(&admin, "b").unwrap();
        engine.enroll(&admin, "a").unwrap();
        engine.enroll(&admin, "c").unwrap();
        engine.remove(&admin, "c").unwrap();

        assert_eq!(engine.devices(&admin).unwrap(), vec!["a", "b"]);
        assert!(engine.devices(&device("a")).is_err());
    }

    #[test]
    fn enroll_requires_device_token() {
        let engine = engine();
        let admin = Role::Admin("root".to_string());
        assert_eq!(engine.enroll(&admin, "").unwrap_err().status_code(), 400);
        assert_eq!(engine.remove(&admin, "").unwrap_err().status_code(), 400);
    }

    #[test]
    fn admin_record_client_cannot_be_enrolled() {
        let engine = engine();
        let admin = Role::Admin("root".to_string());
        let err = engine.enroll(&admin, ADMIN_CLIENT).unwrap_err();
        assert_eq!(err.to_string(), "bad request: Invalid device token");
        assert_eq!(engine.store().get(ADMIN_CLIENT, ENROLLED_KEY).unwrap(), None);
    }
}
