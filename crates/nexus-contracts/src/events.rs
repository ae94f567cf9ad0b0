use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// One line kind in a batch's `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GenerationRequested,
    GenerationFailed,
    GenerationFinished,
    ImageDecoded,
    ImageDeferred,
    ImageFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerationRequested => "generation_requested",
            Self::GenerationFailed => "generation_failed",
            Self::GenerationFinished => "generation_finished",
            Self::ImageDecoded => "image_decoded",
            Self::ImageDeferred => "image_deferred",
            Self::ImageFailed => "image_failed",
        }
    }
}

/// Appends one compact JSON object per event: `type`, `run_id` and `ts`,
/// then the payload. The envelope keys cannot be overwritten by a payload.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    run_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn for_new_run(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_run_id())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = payload;
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(&line)?;

        Ok(Value::Object(event))
    }
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventKind, EventPayload, EventWriter};

    fn read_lines(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| -> anyhow::Result<Value> { Ok(serde_json::from_str(line)?) })
            .collect()
    }

    #[test]
    fn emit_writes_envelope_and_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), json!("flux"));
        let emitted = writer.emit(EventKind::GenerationRequested, payload)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines, vec![emitted]);
        assert_eq!(lines[0]["type"], json!("generation_requested"));
        assert_eq!(lines[0]["run_id"], json!("run-123"));
        assert_eq!(lines[0]["model"], json!("flux"));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_spoof_envelope_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "run-123");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), json!("other"));
        payload.insert("type".to_string(), json!("image_decoded"));
        let emitted = writer.emit(EventKind::ImageFailed, payload)?;

        assert_eq!(emitted["type"], json!("image_failed"));
        assert_eq!(emitted["run_id"], json!("run-123"));
        Ok(())
    }

    #[test]
    fn emit_appends_lines_and_creates_parent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::for_new_run(&path);
        assert_eq!(writer.run_id().len(), 32);

        writer.emit(EventKind::ImageDecoded, EventPayload::new())?;
        writer.emit(EventKind::ImageDeferred, EventPayload::new())?;

        let types: Vec<Value> = read_lines(&path)?
            .into_iter()
            .map(|row| row["type"].clone())
            .collect();
        assert_eq!(types, vec![json!("image_decoded"), json!("image_deferred")]);
        Ok(())
    }

    #[test]
    fn kind_serializes_like_its_line_type() -> anyhow::Result<()> {
        for kind in [
            EventKind::GenerationRequested,
            EventKind::GenerationFailed,
            EventKind::GenerationFinished,
            EventKind::ImageDecoded,
            EventKind::ImageDeferred,
            EventKind::ImageFailed,
        ] {
            assert_eq!(serde_json::to_value(kind)?, json!(kind.as_str()));
        }
        Ok(())
    }
}
