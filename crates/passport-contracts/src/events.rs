use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::pipeline::PipelineState;

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a session's `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `seq`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                seq: Mutex::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Holding the counter lock across the write keeps `seq` and line
        // order identical.
        let mut seq = self
            .inner
            .seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        *seq += 1;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::Number((*seq).into()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Compact view of a snapshot for the event log. Image payloads are
/// reduced to their sizes and media types.
pub fn state_payload(state: &PipelineState) -> EventPayload {
    let mut payload = Map::new();
    payload.insert(
        "step".to_string(),
        Value::String(state.step().as_str().to_string()),
    );
    payload.insert(
        "stage".to_string(),
        state
            .processing_stage()
            .map(|stage| Value::String(stage.as_str().to_string()))
            .unwrap_or(Value::Null),
    );
    payload.insert(
        "error".to_string(),
        state
            .error()
            .map(|error| Value::String(error.to_string()))
            .unwrap_or(Value::Null),
    );
    if let Some(upload) = state.uploaded() {
        payload.insert(
            "upload_mime_type".to_string(),
            Value::String(upload.mime_type.clone()),
        );
        payload.insert(
            "upload_bytes".to_string(),
            Value::Number(upload.byte_len.into()),
        );
    }
    if let Some(photo) = state.generated_photo() {
        payload.insert(
            "photo_mime_type".to_string(),
            Value::String(photo.mime_type.clone()),
        );
        payload.insert(
            "photo_base64_len".to_string(),
            Value::Number(photo.base64.len().into()),
        );
    }
    if let Some(report) = state.report() {
        payload.insert(
            "report_summary".to_string(),
            Value::String(report.summary().to_string()),
        );
    }
    payload
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
