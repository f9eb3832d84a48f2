//! Line-oriented decoder for the assistant's newline-delimited JSON
//! transcript.
//!
//! Each non-empty line is parsed as a single JSON value; only objects are
//! recognized. Two independent detectors run on every recognized object: the
//! content-delta detector that yields text fragments, and the error-result
//! detector that yields terminal signals (rate limit, authentication). The
//! two shapes are disjoint, so a line produces at most one event of each
//! category. The parser holds no state across calls.

pub mod rate_limit;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use rate_limit::{
    detect_rate_limit, minutes_until_hour, parse_reset_hour, RateLimitSignal,
};

/// Authentication failure categories detected in error results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    TokenExpired,
    AuthenticationFailed,
}

impl AuthErrorKind {
    /// Fixed human-readable description used in terminal job records.
    pub fn describe(self) -> &'static str {
        match self {
            Self::TokenExpired => "OAuth token has expired",
            Self::AuthenticationFailed => "authentication failed",
        }
    }
}

/// A single event decoded from one transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Assistant output text extracted from a `content_block_delta` event.
    TextFragment {
        text: String,
        observed_at: DateTime<Utc>,
    },
    /// The assistant reported hitting its usage limit.
    RateLimit {
        signal: RateLimitSignal,
        observed_at: DateTime<Utc>,
    },
    /// The assistant reported an authentication failure.
    AuthError {
        kind: AuthErrorKind,
        observed_at: DateTime<Utc>,
    },
}

impl StreamEvent {
    /// Returns true for signals that force a terminal classification.
    pub fn is_terminal_signal(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::AuthError { .. })
    }
}

/// Decodes one transcript line, evaluating both detectors independently.
///
/// Non-object lines (arrays, scalars, malformed JSON) and unrecognized
/// object shapes produce no events; they are never an error. `now` stamps
/// the decoded events and anchors rate-limit wait computation.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Vec<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Vec::new();
    };
    if !value.is_object() {
        return Vec::new();
    }

    let mut events = Vec::new();
    if let Some(text) = content_delta_text(&value) {
        events.push(StreamEvent::TextFragment {
            text: text.to_string(),
            observed_at: now,
        });
    }
    if let Some(result) = error_result_text(&value) {
        if let Some(signal) = detect_rate_limit(result, now) {
            events.push(StreamEvent::RateLimit {
                signal,
                observed_at: now,
            });
        } else if let Some(kind) = detect_auth_error(result) {
            events.push(StreamEvent::AuthError {
                kind,
                observed_at: now,
            });
        }
    }
    events
}

/// Concatenates the text fragments of a line sequence in input order.
///
/// # Examples
///
/// ```
/// use warden_stream::extract_text_from_stream;
///
/// let lines = [
///     r#"{"event":{"type":"content_block_delta","delta":{"text":"Hi, "}}}"#,
///     "not json",
///     r#"{"event":{"type":"content_block_delta","delta":{"text":"world"}}}"#,
/// ];
/// assert_eq!(extract_text_from_stream(lines), "Hi, world");
/// ```
pub fn extract_text_from_stream<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let now = Utc::now();
    let mut combined = String::new();
    for line in lines {
        for event in parse_line(line, now) {
            if let StreamEvent::TextFragment { text, .. } = event {
                combined.push_str(&text);
            }
        }
    }
    combined
}

/// Categorizes an error-result string as an authentication failure.
pub fn detect_auth_error(result: &str) -> Option<AuthErrorKind> {
    if result.contains("OAuth token has expired") {
        return Some(AuthErrorKind::TokenExpired);
    }
    if result.contains("Failed to authenticate") || result.contains("authentication_error") {
        return Some(AuthErrorKind::AuthenticationFailed);
    }
    None
}

fn content_delta_text(value: &Value) -> Option<&str> {
    let event = value.get("event")?;
    if event.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }
    let text = event.get("delta")?.get("text")?.as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn error_result_text(value: &Value) -> Option<&str> {
    if value.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }
    if value.get("is_error").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    value.get("result").and_then(Value::as_str)
}

/// Accumulates stream bytes and yields newline-terminated lines.
///
/// The watcher feeds arbitrarily-split chunks; JSON objects broken across
/// reads reassemble here. `drain` surfaces the trailing partial line at EOF.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every complete line it closed off.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(newline_index) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=newline_index).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Takes the unterminated tail, if any. Used once at stream EOF.
    pub fn drain(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}
