use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields that carry an inline base64 image, in the order they are tried.
pub const INLINE_BASE64_FIELDS: &[&str] = &["b64_json", "base64", "data"];

/// Fields that carry a fetchable image address.
pub const REMOTE_URL_FIELDS: &[&str] = &["url"];

/// What a single response record turned out to carry.
///
/// Classification picks exactly one carrier per record; a record that has both
/// an inline payload and a URL is treated as inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawImagePayload {
    InlineBase64 { data: String },
    RemoteUrl { url: String },
    Unrecognized,
}

impl RawImagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InlineBase64 { .. } => "inline_base64",
            Self::RemoteUrl { .. } => "remote_url",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Pulls the ordered per-image records out of a backend response body.
///
/// Accepts either a bare array or an object with a `data` array. Anything
/// else has no records.
pub fn response_items(response: &Value) -> Vec<Value> {
    match response {
        Value::Array(rows) => rows.clone(),
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn normalize(items: &[Value]) -> Vec<RawImagePayload> {
    items.iter().map(classify).collect()
}

pub fn classify(item: &Value) -> RawImagePayload {
    let Some(obj) = item.as_object() else {
        return RawImagePayload::Unrecognized;
    };
    if let Some(data) = first_non_empty(obj, INLINE_BASE64_FIELDS) {
        return RawImagePayload::InlineBase64 { data };
    }
    if let Some(url) = first_non_empty(obj, REMOTE_URL_FIELDS) {
        return RawImagePayload::RemoteUrl { url };
    }
    RawImagePayload::Unrecognized
}

fn first_non_empty(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        obj.get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}
