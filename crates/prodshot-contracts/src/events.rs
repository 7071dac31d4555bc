use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::now_utc_iso;

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Destination for orchestration diagnostics.
///
/// Sinks receive every event the engine emits; filtering by level is the
/// sink's business. A failing sink is reported but never stops generation.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, level: Level, event_type: &str, payload: &EventPayload) -> anyhow::Result<()>;
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `level`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn append(
        &self,
        level: Level,
        event_type: &str,
        payload: &EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("level".to_string(), Value::String(level.as_str().to_string()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key.clone(), value.clone());
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

impl DiagnosticSink for EventWriter {
    fn emit(&self, level: Level, event_type: &str, payload: &EventPayload) -> anyhow::Result<()> {
        self.append(level, event_type, payload).map(|_| ())
    }
}

/// Forwards events to `tracing`, rendering the payload as `key=value` pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: Level, event_type: &str, payload: &EventPayload) -> anyhow::Result<()> {
        let details = render_payload(payload);
        match level {
            Level::Debug => tracing::debug!(event = event_type, "{details}"),
            Level::Info => tracing::info!(event = event_type, "{details}"),
            Level::Warn => tracing::warn!(event = event_type, "{details}"),
            Level::Error => tracing::error!(event = event_type, "{details}"),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn emit(&self, level: Level, event_type: &str, payload: EventPayload) {
        for sink in &self.sinks {
            if let Err(err) = sink.emit(level, event_type, &payload) {
                tracing::warn!(event = event_type, "diagnostic sink failed: {err:#}");
            }
        }
    }

    pub fn debug(&self, event_type: &str, payload: EventPayload) {
        self.emit(Level::Debug, event_type, payload);
    }

    pub fn info(&self, event_type: &str, payload: EventPayload) {
        self.emit(Level::Info, event_type, payload);
    }

    pub fn warn(&self, event_type: &str, payload: EventPayload) {
        self.emit(Level::Warn, event_type, payload);
    }

    pub fn error(&self, event_type: &str, payload: EventPayload) {
        self.emit(Level::Error, event_type, payload);
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

pub fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

fn render_payload(payload: &EventPayload) -> String {
    payload
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<String>>()
        .join(" ")
}
