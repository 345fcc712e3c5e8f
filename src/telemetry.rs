use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Duration;

const QUEUE_CAPACITY: usize = 256;
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub level: TelemetryLevel,
    pub message: String,
    pub context: Value,
}

/// Best-effort log shipping to a remote collector.
///
/// Events go into a bounded queue drained by a background task. A full queue,
/// a missing runtime or a failed request drops the event without a trace.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    sender: Option<mpsc::Sender<TelemetryEvent>>,
}

impl Telemetry {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn spawn(url: impl Into<String>) -> Self {
        let url = url.into();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime, telemetry disabled");
            return Self::disabled();
        };
        let client = match reqwest::Client::builder().timeout(SEND_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                log::debug!("Telemetry client unavailable: {}", e);
                return Self::disabled();
            }
        };

        let (sender, mut receiver) = mpsc::channel::<TelemetryEvent>(QUEUE_CAPACITY);
        handle.spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = client.post(&url).json(&event).send().await {
                    log::debug!("Telemetry event dropped: {}", e);
                }
            }
        });

        Self {
            sender: Some(sender),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn emit(&self, level: TelemetryLevel, message: impl Into<String>, context: Value) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(TelemetryEvent {
                level,
                message: message.into(),
                context,
            });
        }
    }

    pub fn info(&self, message: impl Into<String>, context: Value) {
        self.emit(TelemetryLevel::Info, message, context);
    }

    pub fn warning(&self, message: impl Into<String>, context: Value) {
        self.emit(TelemetryLevel::Warning, message, context);
    }

    pub fn error(&self, message: impl Into<String>, context: Value) {
        self.emit(TelemetryLevel::Error, message, context);
    }
}
