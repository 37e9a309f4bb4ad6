//! Request kinds and their results.

use serde::Serialize;

use crate::status::DeviceStatus;

/// One request against the engine, carrying its typed payload.
///
/// Keys stay unvalidated here; the engine checks them after the caller's
/// role is known so that unauthenticated callers learn nothing about keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Store the presented token as the admin credential.
    Setup,
    Enroll { dev_token: String },
    Remove { dev_token: String },
    /// List enrolled device tokens.
    Devices,
    Schedule { ts: String },
    Next,
    /// `value` is `None` when the request carried no body-bearing write.
    Update {
        key: Option<String>,
        value: Option<Vec<u8>>,
    },
    Peek {
        key: Option<String>,
        mime: Option<String>,
    },
    Read { key: Option<String> },
    Status,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Enroll { .. } => "enroll",
            Self::Remove { .. } => "remove",
            Self::Devices => "devices",
            Self::Schedule { .. } => "schedule",
            Self::Next => "next",
            Self::Update { .. } => "update",
            Self::Peek { .. } => "peek",
            Self::Read { .. } => "read",
            Self::Status => "status",
        }
    }
}

/// Answer to `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextSchedule {
    pub outdated: bool,
    /// Seconds until the scheduled update; negative once it has passed.
    pub next_schd_s: i64,
}

/// Raw slot contents returned by `peek` and `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub key: String,
    pub mime: String,
    pub body: Vec<u8>,
}

/// Successful result of an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// State transition with no body (`setup`, `enroll`, `remove`).
    Done,
    /// Write acknowledged (`schedule`, `update`).
    Accepted,
    Devices(Vec<String>),
    Next(NextSchedule),
    Payload(Payload),
    Status(DeviceStatus),
}
