//! Display blob surface at `/disp`.
//!
//! | query | method | answer |
//! |---|---|---|
//! | `get=<id>[&ofs=N][&size=N]` | any | display image window, `text/plain` |
//! | `png=<id>` | any | thumbnail, `image/png` |
//! | `info=<id>` | any | info text, `text/plain` |
//! | `upd=<id>` | POST | stores display image, `{"error":0}` |
//! | `thumb=<id>` | POST | stores thumbnail, `{"error":0}` |
//!
//! Failures are plain text `ERROR <status>: <message>`.

use chrono::{DateTime, Utc};
use ddss_blob::{BlobError, BlobKind, BlobStore};

use crate::http::{HttpReply, HttpRequest, Params, sanitize_filename};

pub fn route(
    blobs: &dyn BlobStore,
    request: &HttpRequest,
    query: &Params,
    now: DateTime<Utc>,
) -> HttpReply {
    let result = if let Some(id) = query.get("get") {
        load(blobs, id, BlobKind::DisplayImage).map(|data| {
            let window = window(&data, number(query.get("ofs")), number(query.get("size")));
            HttpReply::text(200, window)
        })
    } else if let Some(id) = query.get("png") {
        load(blobs, id, BlobKind::Thumbnail).map(|data| {
            let filename = format!(
                "disp_{}_{}.png",
                sanitize_filename(id),
                now.format("%Y%m%d_%H%M%S")
            );
            HttpReply::bytes("image/png", data)
                .with_header("Content-Disposition", format!("filename=\"{filename}\""))
        })
    } else if let Some(id) = query.get("info") {
        load(blobs, id, BlobKind::Info).map(|data| HttpReply::text(200, data))
    } else if let Some(id) = query.get("upd") {
        store(blobs, request, id, BlobKind::DisplayImage)
    } else if let Some(id) = query.get("thumb") {
        store(blobs, request, id, BlobKind::Thumbnail)
    } else {
        Err(error(400, "Unknown operation"))
    };

    match result {
        Ok(reply) | Err(reply) => reply,
    }
}

fn load(blobs: &dyn BlobStore, id: &str, kind: BlobKind) -> Result<Vec<u8>, HttpReply> {
    match blobs.get_blob(id, kind) {
        Ok(Some(data)) => Ok(data),
        Ok(None) | Err(BlobError::InvalidDeviceId(_)) => Err(error(400, "No record")),
        Err(e) => {
            tracing::error!(?kind, error = %e, "Blob read failed");
            Err(error(500, "Storage failure"))
        }
    }
}

fn store(
    blobs: &dyn BlobStore,
    request: &HttpRequest,
    id: &str,
    kind: BlobKind,
) -> Result<HttpReply, HttpReply> {
    if !request.is_post() {
        return Err(error(400, "Invalid method"));
    }

    match blobs.put_blob(id, kind, &request.body) {
        Ok(()) => Ok(HttpReply::text(200, br#"{"error":0}"#.to_vec())),
        Err(BlobError::InvalidDeviceId(_)) => Err(error(400, "No record")),
        Err(e) => {
            tracing::error!(?kind, error = %e, "Blob write failed");
            Err(error(500, "Storage failure"))
        }
    }
}

/// `size` bytes starting at `offset`; `size == 0` runs to the end.
fn window(data: &[u8], offset: usize, size: usize) -> Vec<u8> {
    let rest = data.get(offset..).unwrap_or_default();
    let end = if size == 0 { rest.len() } else { size.min(rest.len()) };
    rest[..end].to_vec()
}

/// Non-negative integer parameter; anything else reads as 0.
fn number(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

fn error(status: u16, message: &str) -> HttpReply {
    HttpReply::text(status, format!("ERROR {status}: {message}"))
}
