//! Action surface: `GET|POST /?action=<name>&token=<token>`.
//!
//! Control actions answer with JSON, data actions (`peek`, `read`) with the
//! raw slot bytes. Errors are `{"code":<status>,"msg":<message>}` carried
//! with the same HTTP status.

use std::io::{Cursor, Read};

use ddss_schd::{Action, Clock, Outcome, RecordStore, ScheduleError};
use serde::Serialize;
use serde_json::json;
use tiny_http::{Header, Request, Response, Server, StatusCode};

pub use tiny_http::Method;

use crate::{App, disp};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Why a request body could not be taken in.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to read body: {0}")]
    Io(#[from] std::io::Error),
}

impl BodyError {
    fn reply(&self) -> HttpReply {
        match self {
            Self::TooLarge { .. } => {
                HttpReply::json(413, &json!({ "code": 413, "msg": "Payload too large" }))
            }
            Self::Io(_) => HttpReply::json(400, &json!({ "code": 400, "msg": "Unreadable body" })),
        }
    }
}

/// Read `reader` to the end, failing once more than `limit` bytes arrive.
pub fn read_body(reader: impl Read, limit: u64) -> Result<Vec<u8>, BodyError> {
    let mut body = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
    if body.len() as u64 > limit {
        return Err(BodyError::TooLarge { limit });
    }
    Ok(body)
}

/// Transport-independent view of an incoming request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path plus query string, as sent on the request line.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Drain a `tiny_http` request into an owned [`HttpRequest`], reading
    /// at most `max_body` bytes of body.
    fn from_tiny(request: &mut Request, max_body: u64) -> Result<Self, BodyError> {
        if let Some(declared) = request.body_length()
            && declared as u64 > max_body
        {
            return Err(BodyError::TooLarge { limit: max_body });
        }
        let body = read_body(request.as_reader(), max_body)?;
        let content_type = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Content-Type"))
            .map(|h| h.value.as_str().to_string());

        Ok(Self {
            method: request.method().clone(),
            url: request.url().to_string(),
            content_type,
            body,
        })
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::Post
    }

    /// Whether the body is an urlencoded form (parameters after `;` ignored).
    pub fn is_form(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        })
    }

    fn path_and_query(&self) -> (&str, &str) {
        self.url.split_once('?').unwrap_or((self.url.as_str(), ""))
    }

    /// Form fields, present only for urlencoded POST bodies.
    fn form(&self) -> Params {
        if self.is_post() && self.is_form() {
            Params::parse(&self.body)
        } else {
            Params::default()
        }
    }
}

/// Decoded `name=value` pairs from a query string or form body.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn parse(input: &[u8]) -> Self {
        Self(url::form_urlencoded::parse(input).into_owned().collect())
    }

    /// Value of `name`; the last occurrence wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response about to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn bytes(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            ..Self::bytes("text/plain", body)
        }
    }

    /// Serialize `value` as the JSON body; a serialization failure becomes a 500.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                ..Self::bytes("application/json", body)
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode JSON response");
                Self {
                    status: 500,
                    ..Self::bytes(
                        "application/json",
                        br#"{"code":500,"msg":"Encoding failure"}"#.to_vec(),
                    )
                }
            }
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup, `Content-Type` included.
    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("Content-Type") {
            return Some(&self.content_type);
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn into_response(self) -> Response<Cursor<Vec<u8>>> {
        let mut response = Response::from_data(self.body).with_status_code(StatusCode(self.status));
        let headers =
            std::iter::once(("Content-Type".to_string(), self.content_type)).chain(self.headers);
        for (name, value) in headers {
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response.add_header(header),
                Err(()) => tracing::warn!(header = %name, "Dropping unencodable header"),
            }
        }
        response
    }
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Dispatch one request to the action or display surface.
pub fn route<S: RecordStore, C: Clock>(app: &App<S, C>, request: &HttpRequest) -> HttpReply {
    let (path, query) = request.path_and_query();
    let query = Params::parse(query.as_bytes());

    match path.trim_end_matches('/') {
        "" => handle_action(app, request, &query),
        "/disp" => disp::route(
            app.blobs.as_ref(),
            request,
            &query,
            app.engine.clock().now(),
        ),
        _ => HttpReply::text(404, "Not found"),
    }
}

fn handle_action<S: RecordStore, C: Clock>(
    app: &App<S, C>,
    request: &HttpRequest,
    query: &Params,
) -> HttpReply {
    let form = request.form();
    let token = field(query, &form, "token");

    let Some(action) = parse_action(request, query, &form) else {
        return error_reply(&ScheduleError::bad_request("Unknown action"));
    };

    match app.engine.handle(token, action) {
        Ok(outcome) => outcome_reply(outcome),
        Err(e) => error_reply(&e),
    }
}

/// Non-empty query parameter, else form field, else the empty query value.
fn field<'a>(query: &'a Params, form: &'a Params, name: &str) -> Option<&'a str> {
    match query.get(name) {
        Some(value) if !value.is_empty() => Some(value),
        value => form.get(name).or(value),
    }
}

fn parse_action(request: &HttpRequest, query: &Params, form: &Params) -> Option<Action> {
    let owned = |value: Option<&str>| value.map(str::to_string);

    let action = match query.get("action")? {
        "setup" => Action::Setup,
        "enroll" => Action::Enroll {
            dev_token: field(query, form, "dev_token")
                .unwrap_or_default()
                .to_string(),
        },
        "remove" => Action::Remove {
            dev_token: field(query, form, "dev_token")
                .unwrap_or_default()
                .to_string(),
        },
        "devices" => Action::Devices,
        "schedule" => Action::Schedule {
            ts: query.get("ts").unwrap_or_default().to_string(),
        },
        "next" => Action::Next,
        "update" => update_action(request, query, form),
        "peek" => Action::Peek {
            key: owned(query.get("key")),
            mime: owned(query.get("mime").filter(|m| is_header_safe(m))),
        },
        "read" => Action::Read {
            key: owned(query.get("key")),
        },
        "status" => Action::Status,
        _ => return None,
    };
    Some(action)
}

/// `update` takes its slot from one of two shapes:
/// - raw body, `key` in the query (device upload)
/// - urlencoded form with `token`, `key`, `data` fields when the query
///   carries no token or an empty one (browser form)
fn update_action(request: &HttpRequest, query: &Params, form: &Params) -> Action {
    if !request.is_post() {
        return Action::Update {
            key: query.get("key").map(str::to_string),
            value: None,
        };
    }

    if query.get("token").is_none_or(str::is_empty) && request.is_form() {
        Action::Update {
            key: form.get("key").map(str::to_string),
            value: Some(form.get("data").unwrap_or_default().as_bytes().to_vec()),
        }
    } else {
        Action::Update {
            key: query.get("key").map(str::to_string),
            value: Some(request.body.clone()),
        }
    }
}

fn outcome_reply(outcome: Outcome) -> HttpReply {
    match outcome {
        Outcome::Done => HttpReply::json(200, &json!({ "code": 200 })),
        Outcome::Accepted => HttpReply::json(200, &json!({ "code": 200, "msg": "OK" })),
        Outcome::Devices(tokens) => HttpReply::json(200, &tokens),
        Outcome::Next(next) => HttpReply::json(200, &next),
        Outcome::Status(status) => HttpReply::json(200, &status),
        Outcome::Payload(payload) => {
            let disposition = format!(
                "inline; filename=\"{}.bin\"",
                sanitize_filename(&payload.key)
            );
            HttpReply::bytes(payload.mime, payload.body)
                .with_header("Content-Disposition", disposition)
        }
    }
}

fn error_reply(error: &ScheduleError) -> HttpReply {
    let status = error.status_code();
    HttpReply::json(
        status,
        &json!({ "code": status, "msg": error.public_message() }),
    )
}

fn is_header_safe(value: &str) -> bool {
    !value.is_empty() && value.is_ascii() && !value.chars().any(|c| c.is_ascii_control())
}

/// Make `name` usable inside a quoted `filename="..."` parameter.
pub(crate) fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && !matches!(c, '"' | '\\')) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Serving ──────────────────────────────────────────────────────────────

/// Accept loop for one worker thread.
///
/// Returns once [`Server::unblock`] wakes this worker.
pub fn serve<S: RecordStore, C: Clock>(server: &Server, app: &App<S, C>, worker: usize) {
    tracing::debug!(worker, "HTTP worker started");

    for mut request in server.incoming_requests() {
        let reply = match HttpRequest::from_tiny(&mut request, app.max_body) {
            Ok(http) => {
                let reply = route(app, &http);
                tracing::debug!(
                    worker,
                    method = %http.method,
                    path = http.path_and_query().0,
                    status = reply.status,
                    "Request served"
                );
                reply
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "Rejected request body");
                e.reply()
            }
        };

        if let Err(e) = request.respond(reply.into_response()) {
            tracing::warn!(worker, error = %e, "Failed to send response");
        }
    }

    tracing::debug!(worker, "HTTP worker stopped");
}
