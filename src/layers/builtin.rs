//! Built-in layers.
//!
//! The server registers these at startup: request/response logging,
//! gzip content negotiation, `Content-Length`, `Connection: close` echo and
//! a per-tag memory usage report. All of them are registered `can_fail`, so
//! a failure (e.g. no negotiable encoding) never aborts the cycle.

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::arena::Arena;
use crate::http::{Encoding, Request, Response};
use crate::layers::LayerError;

/// PRE_ROUTE: one line per received request.
pub fn request_log(
    request: &Request,
    _response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    info!(method = %request.method(), target = %request.target(), "recv");
    Ok(())
}

/// PRE_ROUTE: received request with headers and body.
pub fn request_log_verbose(
    request: &Request,
    _response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    info!(method = %request.method(), target = %request.target(), "recv");
    for (name, value) in request.headers().iter() {
        debug!("  {name}: {value}");
    }
    if !request.body().is_empty() {
        debug!(body = %request.body(), "request body");
    }
    Ok(())
}

/// POST_ROUTE: one line per outgoing response.
pub fn response_log(
    _request: &Request,
    response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    info!(status = %response.status(), "sent");
    Ok(())
}

/// POST_ROUTE: outgoing response with headers.
pub fn response_log_verbose(
    _request: &Request,
    response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    info!(status = %response.status(), "sent");
    for (name, value) in response.headers().iter() {
        debug!("  {name}: {value}");
    }
    Ok(())
}

/// POST_ROUTE: negotiates gzip via `Accept-Encoding`.
///
/// When the client offers `gzip` (anywhere in the comma-separated list), the
/// textual body is compressed into an arena buffer under the request's tag,
/// and `Content-Encoding` plus the compressed `Content-Length` are set.
/// Absence of the header or of a gzip offer is a swallowed failure.
pub fn content_encoding(
    request: &Request,
    response: &mut Response,
    arena: &mut Arena,
) -> Result<(), LayerError> {
    let offered = request
        .header("Accept-Encoding")
        .ok_or(LayerError::NotApplicable("no Accept-Encoding header"))?;
    if !offered.split(',').any(|entry| entry.trim() == "gzip") {
        return Err(LayerError::NotApplicable("gzip not offered"));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(response.body())?;
    let compressed = encoder.finish()?;

    let raw = arena.alloc(compressed.len(), request.tag())?;
    arena.bytes_mut(raw).copy_from_slice(&compressed);

    response.set_gzip_body(raw);
    response.add_header("Content-Encoding", "gzip");
    response.add_header("Content-Length", compressed.len().to_string());
    Ok(())
}

/// POST_ROUTE: sets `Content-Length` from the textual body, unless the
/// encoding layer already set it for the compressed body.
pub fn content_length(
    _request: &Request,
    response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    if response.encoding() == Encoding::Gzip || response.headers().contains("Content-Length") {
        return Ok(());
    }
    response.add_header("Content-Length", response.body().len().to_string());
    Ok(())
}

/// POST_ROUTE: echoes `Connection: close` when the request asked for it.
pub fn connection_close(
    request: &Request,
    response: &mut Response,
    _arena: &mut Arena,
) -> Result<(), LayerError> {
    if request.wants_close() {
        response.add_header("Connection", "close");
    }
    Ok(())
}

/// POST_ROUTE: reports the cycle's live arena footprint.
pub fn request_memory_usage(
    request: &Request,
    _response: &mut Response,
    arena: &mut Arena,
) -> Result<(), LayerError> {
    let total = arena.tag_bytes(request.tag());
    if total < 1024 {
        info!(tag = %request.tag(), "MEM: {total} bytes");
    } else if total < 1024 * 1024 {
        info!(tag = %request.tag(), "MEM: {:.2} KB", total as f64 / 1024.0);
    } else {
        info!(tag = %request.tag(), "MEM: {:.2} MB", total as f64 / (1024.0 * 1024.0));
    }
    Ok(())
}
