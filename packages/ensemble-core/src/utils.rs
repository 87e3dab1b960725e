//! General utilities shared across the crate.

use crate::error::{EnsembleError, EnsembleResult};
use crate::protocol_constants::{API_PATH, WS_PATH};

// ─────────────────────────────────────────────────────────────────────────────
// Server URLs
// ─────────────────────────────────────────────────────────────────────────────

/// Normalizes a user-entered server URL.
///
/// Trims whitespace and trailing slashes and defaults the scheme to `http://`.
///
/// # Errors
/// Returns `InvalidRequest` for an empty URL or an unsupported scheme.
pub fn normalize_server_url(raw: &str) -> EnsembleResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(EnsembleError::InvalidRequest("server URL is empty".into()));
    }

    let url = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let scheme = url.split("://").next().unwrap_or_default().to_lowercase();
    match scheme.as_str() {
        "http" | "https" => Ok(url),
        _ => Err(EnsembleError::InvalidRequest(format!(
            "unsupported URL scheme: {}",
            scheme
        ))),
    }
}

/// Returns the HTTP command endpoint for a server URL.
#[must_use]
pub fn api_url(server_url: &str) -> String {
    format!("{}{}", server_url.trim_end_matches('/'), API_PATH)
}

/// Returns the WebSocket endpoint for a server URL (`http` → `ws`, `https` → `wss`).
///
/// # Errors
/// Returns `InvalidRequest` if the URL cannot be normalized.
pub fn ws_url(server_url: &str) -> EnsembleResult<String> {
    let base = normalize_server_url(server_url)?;
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base
    };
    Ok(format!("{}{}", ws, WS_PATH))
}
