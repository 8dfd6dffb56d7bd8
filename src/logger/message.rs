use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Represents the severity level of a log message.
///
/// Variants are ordered from most to least important, so a logger configured
/// at `Info` lets `Fatal`, `Error`, `Warn` and `Info` through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Indicates a critical error that prevents the engine from continuing.
    Fatal,
    /// Indicates a script or engine error. The engine usually keeps going.
    Error,
    /// Indicates a potential issue or unexpected situation.
    Warn,
    /// Indicates informational messages about the engine's state or progress.
    Info,
    /// Indicates detailed messages useful for debugging scripts.
    Debug,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fatal => write!(f, "[FATAL]"),
            Severity::Error => write!(f, "[ERROR]"),
            Severity::Warn => write!(f, "[WARN]"),
            Severity::Info => write!(f, "[INFO]"),
            Severity::Debug => write!(f, "[DEBUG]"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fatal" => Ok(Severity::Fatal),
            "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warn),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// A structured log message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: Severity,
    pub msg: String,
}

impl Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level, self.msg)
    }
}

impl LogMessage {
    pub fn new(level: Severity, msg: String) -> Self {
        LogMessage { level, msg }
    }

    pub fn error(msg: String) -> Self {
        LogMessage::new(Severity::Error, msg)
    }

    pub fn warn(msg: String) -> Self {
        LogMessage::new(Severity::Warn, msg)
    }

    pub fn info(msg: String) -> Self {
        LogMessage::new(Severity::Info, msg)
    }

    pub fn debug(msg: String) -> Self {
        LogMessage::new(Severity::Debug, msg)
    }
}
