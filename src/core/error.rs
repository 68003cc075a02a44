//! Error taxonomy for one streamed turn.
//!
//! Transport failures are classified once, where they happen, into
//! [`StreamError::Transient`] (worth retrying) or [`StreamError::Permanent`]
//! (surfaced immediately). The streaming session is the only place that turns
//! these into user-facing text, via [`StreamError::user_message`].

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    RateLimited,
    Server { status: u16 },
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    Unauthorized,
    Forbidden,
    BadRequest,
    UnsupportedMedia,
    MalformedResponse,
    /// The provider reported an error inside an otherwise healthy stream.
    Provider,
    /// Missing API key or unknown model; nothing was sent.
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    Transient {
        kind: TransientKind,
        detail: String,
    },
    Permanent {
        kind: PermanentKind,
        detail: String,
    },
    /// The user stopped the turn. A normal terminal state, not a failure.
    Cancelled,
    /// Every event was unreadable, so nothing at all was produced.
    ProtocolCorruption {
        skipped: usize,
    },
    EmptyResponse,
}

/// Coarse category handed to the UI alongside the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    ServiceUnavailable,
    Network,
    Auth,
    InvalidRequest,
    UnsupportedMedia,
    Provider,
    Protocol,
    EmptyResponse,
    Configuration,
    Storage,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::ServiceUnavailable => "service-unavailable",
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::UnsupportedMedia => "unsupported-media",
            ErrorKind::Provider => "provider",
            ErrorKind::Protocol => "protocol",
            ErrorKind::EmptyResponse => "empty-response",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl StreamError {
    pub fn transient(kind: TransientKind, detail: impl Into<String>) -> Self {
        StreamError::Transient {
            kind,
            detail: detail.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, detail: impl Into<String>) -> Self {
        StreamError::Permanent {
            kind,
            detail: detail.into(),
        }
    }

    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = summarize_error_body(body).unwrap_or_else(|| format!("HTTP {status}"));
        match status {
            429 => StreamError::transient(TransientKind::RateLimited, detail),
            500..=599 => StreamError::transient(TransientKind::Server { status }, detail),
            401 => StreamError::permanent(PermanentKind::Unauthorized, detail),
            403 => StreamError::permanent(PermanentKind::Forbidden, detail),
            415 => StreamError::permanent(PermanentKind::UnsupportedMedia, detail),
            _ => StreamError::permanent(PermanentKind::BadRequest, detail),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Transient { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Transient { kind, .. } => match kind {
                TransientKind::RateLimited => ErrorKind::RateLimited,
                TransientKind::Server { .. } => ErrorKind::ServiceUnavailable,
                TransientKind::Network => ErrorKind::Network,
            },
            StreamError::Permanent { kind, .. } => match kind {
                PermanentKind::Unauthorized | PermanentKind::Forbidden => ErrorKind::Auth,
                PermanentKind::BadRequest => ErrorKind::InvalidRequest,
                PermanentKind::UnsupportedMedia => ErrorKind::UnsupportedMedia,
                PermanentKind::MalformedResponse => ErrorKind::Protocol,
                PermanentKind::Provider => ErrorKind::Provider,
                PermanentKind::Configuration => ErrorKind::Configuration,
            },
            StreamError::Cancelled => ErrorKind::Cancelled,
            StreamError::ProtocolCorruption { .. } => ErrorKind::Protocol,
            StreamError::EmptyResponse => ErrorKind::EmptyResponse,
        }
    }

    /// Text shown to the user when a turn fails.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Transient { kind, .. } => match kind {
                TransientKind::RateLimited => {
                    "Too many requests. Please wait a moment and try again.".to_string()
                }
                TransientKind::Server { status } => {
                    format!("The AI service is temporarily unavailable (status {status}).")
                }
                TransientKind::Network => {
                    "Could not reach the AI service. Check your network connection.".to_string()
                }
            },
            StreamError::Permanent { kind, detail } => match kind {
                PermanentKind::Unauthorized => {
                    "The API key was rejected. Check your credentials.".to_string()
                }
                PermanentKind::Forbidden => {
                    "This API key is not allowed to use the selected model.".to_string()
                }
                PermanentKind::BadRequest => format!("The request was rejected: {detail}"),
                PermanentKind::UnsupportedMedia => {
                    format!("This attachment cannot be sent to the model: {detail}")
                }
                PermanentKind::MalformedResponse => {
                    "The AI service sent a response that could not be read.".to_string()
                }
                PermanentKind::Provider => format!("The AI service reported an error: {detail}"),
                PermanentKind::Configuration => detail.clone(),
            },
            StreamError::Cancelled => "Generation stopped.".to_string(),
            StreamError::ProtocolCorruption { .. } => {
                "The response stream was corrupted and produced no output.".to_string()
            }
            StreamError::EmptyResponse => "The AI service returned an empty response.".to_string(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transient { kind, detail } => match kind {
                TransientKind::RateLimited => write!(f, "rate limited: {detail}"),
                TransientKind::Server { status } => write!(f, "server error {status}: {detail}"),
                TransientKind::Network => write!(f, "network error: {detail}"),
            },
            StreamError::Permanent { kind, detail } => write!(f, "{kind:?}: {detail}"),
            StreamError::Cancelled => write!(f, "cancelled"),
            StreamError::ProtocolCorruption { skipped } => {
                write!(f, "stream produced no output ({skipped} unreadable events)")
            }
            StreamError::EmptyResponse => write!(f, "stream produced no output"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Pull a one-line summary out of a provider error body.
///
/// Handles `{"error":{"message":..}}`, `{"error":".."}` and `{"message":..}`;
/// falls back to the trimmed body text.
pub fn summarize_error_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let summary = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .or_else(|| {
                value
                    .get("error")
                    .and_then(|v| v.as_str().map(str::to_owned))
            })
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str().map(str::to_owned))
            })
            .unwrap_or_else(|| trimmed.to_string()),
        Err(_) => trimmed.to_string(),
    };

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
