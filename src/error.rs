//! Telemetry Error Types with Error Codes
//!
//! Error code ranges:
//! - NIKA-200-209: Configuration errors
//! - NIKA-210-219: Event shape errors
//! - NIKA-220-229: File transport errors
//! - NIKA-230-239: HTTP transport errors
//! - NIKA-240-249: Transport lifecycle errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TelemetryError {
    // ═══════════════════════════════════════════
    // CONFIG ERRORS (200-209)
    // ═══════════════════════════════════════════
    #[error("[NIKA-200] Invalid telemetry configuration: {reason}")]
    ConfigError { reason: String },

    #[error("[NIKA-201] Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("[NIKA-202] Failed to parse telemetry config: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ═══════════════════════════════════════════
    // EVENT ERRORS (210-219)
    // ═══════════════════════════════════════════
    #[error("[NIKA-210] Event '{event_type}' is missing required field '{field}'")]
    InvalidEvent {
        event_type: String,
        field: &'static str,
    },

    #[error("[NIKA-211] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ═══════════════════════════════════════════
    // FILE TRANSPORT ERRORS (220-229)
    // ═══════════════════════════════════════════
    #[error("[NIKA-220] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[NIKA-221] Event log '{path}' is not writable: {reason}")]
    FileWrite { path: String, reason: String },

    // ═══════════════════════════════════════════
    // HTTP TRANSPORT ERRORS (230-239)
    // ═══════════════════════════════════════════
    #[error("[NIKA-230] HTTP request to '{endpoint}' failed: {reason}")]
    HttpRequest { endpoint: String, reason: String },

    #[error("[NIKA-231] HTTP endpoint '{endpoint}' returned status {status}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("[NIKA-232] HTTP request to '{endpoint}' timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    // ═══════════════════════════════════════════
    // LIFECYCLE ERRORS (240-249)
    // ═══════════════════════════════════════════
    #[error("[NIKA-240] Transport '{transport}' is closed")]
    Closed { transport: String },
}

impl TelemetryError {
    /// Get the error code (e.g., "NIKA-230")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError { .. } => "NIKA-200",
            Self::InvalidEndpoint { .. } => "NIKA-201",
            Self::YamlParse(_) => "NIKA-202",
            Self::InvalidEvent { .. } => "NIKA-210",
            Self::Json(_) => "NIKA-211",
            Self::Io(_) => "NIKA-220",
            Self::FileWrite { .. } => "NIKA-221",
            Self::HttpRequest { .. } => "NIKA-230",
            Self::HttpStatus { .. } => "NIKA-231",
            Self::Timeout { .. } => "NIKA-232",
            Self::Closed { .. } => "NIKA-240",
        }
    }

    /// Whether a delivery attempt that failed with this error may be retried.
    ///
    /// Every non-2xx status counts, not just 5xx/429.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HttpRequest { .. } | Self::HttpStatus { .. } | Self::Timeout { .. }
        )
    }
}

impl FixSuggestion for TelemetryError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::ConfigError { .. } => {
                Some("Check the telemetry YAML: at least one transport and non-zero buffer sizes")
            }
            Self::InvalidEndpoint { .. } => Some("Use an absolute http:// or https:// URL"),
            Self::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            Self::InvalidEvent { .. } => None,
            Self::Json(_) => None,
            Self::Io(_) => Some("Check that the event log directory exists and is writable"),
            Self::FileWrite { .. } => Some("Check file permissions on the event log"),
            Self::HttpRequest { .. } | Self::Timeout { .. } => {
                Some("Check network connectivity to the telemetry endpoint")
            }
            Self::HttpStatus { status, .. } if *status == 401 || *status == 403 => {
                Some("Check NIKA_TELEMETRY_API_KEY")
            }
            Self::HttpStatus { .. } => None,
            Self::Closed { .. } => Some("Do not send events after calling close()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = TelemetryError::HttpStatus {
            endpoint: "http://localhost/events".to_string(),
            status: 503,
        };
        assert!(err.to_string().starts_with("[NIKA-231]"));
        assert_eq!(err.code(), "NIKA-231");
    }

    #[test]
    fn only_delivery_failures_are_retryable() {
        assert!(TelemetryError::HttpStatus {
            endpoint: "e".into(),
            status: 400
        }
        .is_retryable());
        assert!(TelemetryError::Timeout {
            endpoint: "e".into(),
            timeout_ms: 10
        }
        .is_retryable());
        assert!(!TelemetryError::Closed {
            transport: "file".into()
        }
        .is_retryable());
        assert!(!TelemetryError::ConfigError {
            reason: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn auth_failures_suggest_api_key() {
        let err = TelemetryError::HttpStatus {
            endpoint: "e".into(),
            status: 401,
        };
        assert_eq!(err.fix_suggestion(), Some("Check NIKA_TELEMETRY_API_KEY"));
    }
}
