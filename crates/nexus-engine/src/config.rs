use std::env;
use std::time::Duration;

pub const TOGETHER_API_KEY_VAR: &str = "TOGETHER_API_KEY";
pub const TOGETHER_API_BASE_VAR: &str = "TOGETHER_API_BASE";
pub const REQUEST_TIMEOUT_VAR: &str = "NEXUS_REQUEST_TIMEOUT_SECONDS";

pub const DEFAULT_TOGETHER_API_BASE: &str = "https://api.together.xyz/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 120;
const MIN_REQUEST_TIMEOUT_SECONDS: u64 = 1;
const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 600;

/// Connection settings for an HTTP image backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl BackendSettings {
    pub fn together_from_env() -> Self {
        Self {
            api_base: api_base_from_env(TOGETHER_API_BASE_VAR, DEFAULT_TOGETHER_API_BASE),
            api_key: non_empty_env(TOGETHER_API_KEY_VAR),
            timeout: request_timeout(env::var(REQUEST_TIMEOUT_VAR).ok().as_deref()),
        }
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_base_from_env(key: &str, default: &str) -> String {
    normalize_api_base(env::var(key).ok().as_deref()).unwrap_or_else(|| default.to_string())
}

fn normalize_api_base(raw: Option<&str>) -> Option<String> {
    raw.map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
}

fn request_timeout(raw: Option<&str>) -> Duration {
    let seconds = raw
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
        .clamp(MIN_REQUEST_TIMEOUT_SECONDS, MAX_REQUEST_TIMEOUT_SECONDS);
    Duration::from_secs(seconds)
}
