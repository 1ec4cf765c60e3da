use http::StatusCode;

/// Error type surfaced to stream consumers.
///
/// Parsing anomalies inside a stream (malformed `done` metadata, unknown
/// event names) are absorbed by the dispatcher and never become a
/// `StreamError`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Config error: {0}")]
    Config(String),
}

/// Broad error category, matching where in the stream lifecycle the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any network call.
    Precondition,
    Transport,
    /// Non-success status or unusable response.
    Protocol,
    Decoding,
}

impl StreamError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Auth(_) | StreamError::InvalidRequest(_) | StreamError::Config(_) => {
                ErrorCategory::Precondition
            }
            StreamError::Transport(_) => ErrorCategory::Transport,
            StreamError::Upstream { .. } => ErrorCategory::Protocol,
            StreamError::Decode(_) => ErrorCategory::Decoding,
        }
    }

    /// Text suitable for showing in place of the in-progress response.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Upstream { message, .. } | StreamError::Auth(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// True when the caller should re-authenticate before retrying.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        match self {
            StreamError::Auth(_) => true,
            StreamError::Upstream { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }
}

const MAX_DETAIL_LEN: usize = 500;

/// Extract a human-readable message from a non-success response body.
///
/// Prefers the server's `detail` field, then `message` / `error.message`,
/// then the canonical status reason.
#[must_use]
pub fn upstream_error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        match json.get("detail") {
            Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => {
                return truncate_detail(detail);
            }
            Some(detail) if !detail.is_null() && !detail.is_string() => {
                return truncate_detail(&detail.to_string());
            }
            _ => {}
        }
        if let Some(msg) = json
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            })
        {
            if !msg.trim().is_empty() {
                return truncate_detail(msg);
            }
        }
    }

    status.canonical_reason().map_or_else(
        || format!("HTTP {}", status.as_u16()),
        ToString::to_string,
    )
}

fn truncate_detail(msg: &str) -> String {
    if msg.len() <= MAX_DETAIL_LEN {
        return msg.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &msg[..end])
}
