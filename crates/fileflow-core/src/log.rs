use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERRR",
        };
        f.write_str(label)
    }
}

/// Append-only, ordered log for the file a runner is processing.
///
/// Lines are kept locally and, when a sink is attached, forwarded in order to
/// whoever persists them (usually the host through the runner channel).
#[derive(Clone, Default)]
pub struct FlowLogger {
    lines: Arc<Mutex<Vec<String>>>,
    sink: Option<mpsc::UnboundedSender<String>>,
}

impl FlowLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger that forwards every line to `sink`.
    pub fn with_sink(sink: mpsc::UnboundedSender<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            sink: Some(sink),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        let line = format!(
            "{} [{}] -> {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message.as_ref()
        );
        // Lock held across the send so forwarded order matches local order
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = &self.sink {
            let _ = sink.send(line.clone());
        }
        lines.push(line);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
