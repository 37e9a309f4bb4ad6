//! DDSS HTTP transport.
//!
//! Two surfaces share one listener:
//! - `/?action=...`: the token-gated scheduling actions ([`http`])
//! - `/disp?...`: display image, thumbnail and info blobs ([`disp`])
//!
//! Request handling is synchronous. [`http::serve`] runs one blocking
//! accept loop per worker thread against a shared `tiny_http::Server`.

pub mod disp;
pub mod http;

use ddss_blob::BlobStore;
use ddss_schd::{Clock, RecordStore, ScheduleEngine, SystemClock};

/// Request bodies above this many bytes are refused with 413.
pub const DEFAULT_MAX_BODY_BYTES: u64 = ddss_schd::config::DEFAULT_MAX_BODY_BYTES;

/// Everything a request handler needs.
pub struct App<S, C = SystemClock> {
    pub engine: ScheduleEngine<S, C>,
    pub blobs: Box<dyn BlobStore>,
    pub max_body: u64,
}

impl<S: RecordStore, C: Clock> App<S, C> {
    pub fn new(engine: ScheduleEngine<S, C>, blobs: impl BlobStore + 'static) -> Self {
        Self {
            engine,
            blobs: Box::new(blobs),
            max_body: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }
}
