use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const RAW_BODY_MAX_CHARS: usize = 512;

const CREDENTIAL_MARKERS: &[&str] = &[
    "api_key",
    "api key",
    "apikey",
    "unauthorized",
    "invalid key",
    "authentication",
];
const THROTTLING_MARKERS: &[&str] = &["rate limit", "rate_limit", "too many requests"];

/// Coarse guess at why the backend refused a batch. Only a hint for user
/// messaging; the backend message is what gets shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    Credential,
    Throttling,
    Unknown,
}

impl FailureHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::Throttling => "throttling",
            Self::Unknown => "unknown",
        }
    }

    pub fn guidance(self) -> Option<&'static str> {
        match self {
            Self::Credential => Some("Please verify your API key is correct"),
            Self::Throttling => {
                Some("You've hit the rate limit. Please wait before trying again.")
            }
            Self::Unknown => None,
        }
    }
}

/// The backend rejected the whole batch. Never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamFailure {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub hint: FailureHint,
}

impl UpstreamFailure {
    /// Failure with no structured signal; the hint comes from the text.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let hint = classify_hint(None, None, &message);
        Self {
            message,
            status: None,
            code: None,
            hint,
        }
    }

    /// Failure from a non-success HTTP response body.
    ///
    /// A JSON error envelope supplies the message and code; otherwise the
    /// raw body (truncated) is the message.
    pub fn from_http(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let (message, code) = parsed
            .as_ref()
            .and_then(error_envelope)
            .unwrap_or_else(|| (raw_body_message(status, body), None));
        let hint = classify_hint(Some(status), code.as_deref(), &message);
        Self {
            message,
            status: Some(status),
            code,
            hint,
        }
    }
}

/// Structured signals first (status, then error code), text last.
pub fn classify_hint(status: Option<u16>, code: Option<&str>, message: &str) -> FailureHint {
    match status {
        Some(401) | Some(403) => return FailureHint::Credential,
        Some(429) => return FailureHint::Throttling,
        _ => {}
    }
    if let Some(hint) = code.and_then(hint_from_code) {
        return hint;
    }
    hint_from_text(message).unwrap_or(FailureHint::Unknown)
}

fn hint_from_code(code: &str) -> Option<FailureHint> {
    let lowered = code.to_ascii_lowercase();
    if lowered.contains("auth") {
        return Some(FailureHint::Credential);
    }
    hint_from_text(&lowered)
}

fn hint_from_text(text: &str) -> Option<FailureHint> {
    let lowered = text.to_ascii_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Some(FailureHint::Credential);
    }
    if THROTTLING_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Some(FailureHint::Throttling);
    }
    None
}

fn error_envelope(body: &Value) -> Option<(String, Option<String>)> {
    let error = body.get("error").unwrap_or(body);
    if let Some(text) = error.as_str().filter(|text| !text.trim().is_empty()) {
        return Some((text.to_string(), None));
    }
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())?
        .to_string();
    let code = ["code", "type"].iter().find_map(|key| {
        error
            .get(*key)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
    });
    Some((message, code))
}

fn raw_body_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("backend request failed ({status})");
    }
    truncate_text(trimmed, RAW_BODY_MAX_CHARS)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
