//! Fire-and-forget telemetry for handshakes.
//!
//! The controller receives a sink at construction instead of reaching for a
//! process-wide instance. Recording never fails from the caller's point of
//! view: sinks log and swallow their own errors.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use passport_types::ProviderKind;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Named telemetry events emitted by the handshake controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// The login prompt was surfaced to the user (no cached credential).
    PromptShown,
    /// The user declined or dismissed the prompt.
    AuthDeclined,
    ExternalAuthSucceeded { provider: ProviderKind },
    ExternalAuthFailed {
        provider: ProviderKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::PromptShown => "prompt_shown",
            TelemetryEvent::AuthDeclined => "auth_declined",
            TelemetryEvent::ExternalAuthSucceeded { .. } => "external_auth_succeeded",
            TelemetryEvent::ExternalAuthFailed { .. } => "external_auth_failed",
        }
    }
}

pub trait Telemetry: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: &TelemetryEvent) {}
}

/// Emits each event as a structured tracing record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::ExternalAuthSucceeded { provider } => {
                tracing::info!(target: "passport::telemetry", event = event.name(), %provider);
            }
            TelemetryEvent::ExternalAuthFailed { provider, message } => {
                tracing::info!(
                    target: "passport::telemetry",
                    event = event.name(),
                    %provider,
                    message = message.as_deref().unwrap_or_default(),
                );
            }
            TelemetryEvent::PromptShown | TelemetryEvent::AuthDeclined => {
                tracing::info!(target: "passport::telemetry", event = event.name());
            }
        }
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a TelemetryEvent,
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonlTelemetry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTelemetry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &TelemetryEvent) -> std::io::Result<()> {
        let record = JsonlRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl Telemetry for JsonlTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        if let Err(err) = self.append(event) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to record telemetry event"
            );
        }
    }
}

/// Forwards each event to every inner sink.
#[derive(Default, Clone)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn Telemetry>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn Telemetry>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Telemetry>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Telemetry for FanoutTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

/// Builds the sink described by `[telemetry]`.
///
/// Disabled telemetry records nothing. Otherwise events go to tracing, and
/// also to a JSONL file when `jsonl_path` is set.
pub fn from_config(config: &Config, home: &Path) -> Arc<dyn Telemetry> {
    if !config.telemetry.enabled {
        return Arc::new(NoopTelemetry);
    }
    let mut fanout = FanoutTelemetry::new(vec![Arc::new(TracingTelemetry)]);
    if let Some(path) = config.telemetry_jsonl_path(home) {
        fanout.push(Arc::new(JsonlTelemetry::new(path)));
    }
    Arc::new(fanout)
}
