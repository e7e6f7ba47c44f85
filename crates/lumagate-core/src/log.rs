//! Structured logging hook.
//!
//! Components that report decisions (retries, non-retryable exits) take an
//! optional [`LogSink`]. Leaving it out never changes control flow.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key-value context attached to a log record.
pub type LogContext = Map<String, Value>;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Warn => "warn",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured log sink.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: &LogContext);
}

/// Sink forwarding records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, context: &LogContext) {
        let context = Value::Object(context.clone());
        match level {
            LogLevel::Debug => tracing::debug!(target: "lumagate", %context, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "lumagate", %context, "{}", message),
        }
    }
}

/// Turn a `serde_json::json!` object into a [`LogContext`].
///
/// Non-object values are stored under a single `value` key.
pub fn context(value: Value) -> LogContext {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_from_object() {
        let ctx = context(json!({"attempt": 1, "delay_ms": 250}));
        assert_eq!(ctx.get("attempt"), Some(&json!(1)));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_context_from_scalar() {
        let ctx = context(json!("plain"));
        assert_eq!(ctx.get("value"), Some(&json!("plain")));
    }

    #[test]
    fn test_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        TracingSink.log(LogLevel::Warn, "no subscriber installed", &context(json!({})));
    }
}
