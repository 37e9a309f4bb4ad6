//! Request classification by bearer token.
//!
//! The role is derived once per request and threaded through dispatch.

use crate::errors::{Result, ScheduleError};
use crate::store::RecordStore;
use crate::{ADMIN_CLIENT, ADMIN_TOKEN_KEY, ENROLLED_KEY, redact};

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// No admin token stored yet; only `setup` is meaningful.
    Uninitialized,
    /// The caller presented the admin token.
    Admin(String),
    /// The caller presented an enrolled device token.
    Device(String),
}

impl Role {
    /// The admin token, or `Unauthorized` for any other role.
    pub fn require_admin(&self) -> Result<&str> {
        match self {
            Self::Admin(token) => Ok(token),
            Self::Uninitialized => Err(ScheduleError::unauthorized("Not initialized")),
            Self::Device(_) => Err(ScheduleError::unauthorized("Admin token required")),
        }
    }

    /// The device's client id.
    ///
    /// The admin token is a valid credential but the wrong role, which is a
    /// malformed request rather than an authorization failure.
    pub fn require_device(&self) -> Result<&str> {
        match self {
            Self::Device(client) => Ok(client),
            Self::Admin(_) => Err(ScheduleError::bad_request("Invalid token")),
            Self::Uninitialized => Err(ScheduleError::unauthorized("Not initialized")),
        }
    }
}

/// Read-only view of the store that resolves tokens to roles.
pub struct AuthGate<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> AuthGate<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Classify a presented token.
    ///
    /// - no admin token stored → `Uninitialized`
    /// - token equals the admin token → `Admin`
    /// - non-empty token other than the admin record's client id, with a
    ///   truthy `enrolled` flag → `Device`
    /// - otherwise → `Unauthorized`
    pub fn classify(&self, presented: Option<&str>) -> Result<Role> {
        let Some(admin) = self.admin_token()? else {
            return Ok(Role::Uninitialized);
        };

        let presented = presented.unwrap_or_default();
        if !presented.is_empty() && presented.as_bytes() == admin.as_slice() {
            return Ok(Role::Admin(presented.to_string()));
        }

        if !presented.is_empty() && presented != ADMIN_CLIENT && self.is_enrolled(presented)? {
            return Ok(Role::Device(presented.to_string()));
        }

        tracing::warn!(token = %redact(presented), "Rejected token");
        Err(ScheduleError::unauthorized("Invalid token"))
    }

    /// Role for an operator with direct database access.
    ///
    /// Acts with the stored admin credential; fails if setup never ran.
    pub fn operator(&self) -> Result<Role> {
        match self.admin_token()? {
            Some(admin) => Ok(Role::Admin(String::from_utf8_lossy(&admin).into_owned())),
            None => Err(ScheduleError::unauthorized("Not initialized")),
        }
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.admin_token()?.is_some())
    }

    /// Whether `client` currently holds a truthy `enrolled` flag.
    pub fn is_enrolled(&self, client: &str) -> Result<bool> {
        let flag = self.store.get(client, ENROLLED_KEY)?;
        Ok(flag.as_deref().is_some_and(is_truthy))
    }

    fn admin_token(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(ADMIN_CLIENT, ADMIN_TOKEN_KEY)?)
    }
}

/// Integer truthiness of a stored flag: non-zero integer → true.
pub fn is_truthy(value: &[u8]) -> bool {
    crate::parse_int(value) != 0
}
