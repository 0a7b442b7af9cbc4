//! Telemetry Configuration Module
//!
//! Config is read from a YAML file (default `.nika/telemetry.yaml`).
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`NIKA_TELEMETRY_FILE`, `NIKA_TELEMETRY_ENDPOINT`,
//!    `NIKA_TELEMETRY_API_KEY`, `NIKA_TELEMETRY_REDACT`)
//! 2. Config file
//! 3. Defaults (one unbuffered file transport, redaction on, evaluation on)
//!
//! Header values, endpoints and file paths may reference environment
//! variables as `${NAME}`.
//!
//! ```yaml
//! transports:
//!   - type: file
//!     path: .nika/telemetry/events.ndjson
//!   - type: http
//!     endpoint: https://telemetry.example.com/v1/events
//!     headers:
//!       Authorization: "Bearer ${TELEMETRY_TOKEN}"
//!     buffer: { size: 100, flush_interval_ms: 2000 }
//! redaction:
//!   fields: [password, token, ssn]
//! evaluation:
//!   max_node_duration_ms: 5000
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::evaluator::EvaluatorConfig;
use crate::redact::{Redactor, DEFAULT_REDACT_FIELDS};
use crate::resilience::RetryConfig;
use crate::transport::BufferOptions;

/// Default config file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = ".nika/telemetry.yaml";

/// Default event log location
pub const DEFAULT_EVENT_LOG: &str = ".nika/telemetry/events.ndjson";

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static env reference pattern")
});

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportConfig>,

    #[serde(default)]
    pub redaction: RedactionConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            transports: default_transports(),
            redaction: RedactionConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

/// One event destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    File(FileTransportConfig),
    Http(HttpTransportConfig),
    Memory(MemoryTransportConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Http(_) => "http",
            Self::Memory(_) => "memory",
        }
    }
}

/// Append-only NDJSON file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileTransportConfig {
    pub path: PathBuf,

    /// Create the parent directory on open
    #[serde(default = "default_true")]
    pub create_dir: bool,

    #[serde(default)]
    pub buffer: Option<BufferConfig>,
}

impl FileTransportConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dir: true,
            buffer: None,
        }
    }

    pub fn buffer_options(&self) -> BufferOptions {
        BufferConfig::resolve(self.buffer.as_ref(), BufferOptions::file_default())
    }
}

/// Batched POST to a remote collector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTransportConfig {
    pub endpoint: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total delivery attempts per batch
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff unit
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub buffer: Option<BufferConfig>,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            buffer: None,
        }
    }

    pub fn buffer_options(&self) -> BufferOptions {
        BufferConfig::resolve(self.buffer.as_ref(), BufferOptions::http_default())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry_delay_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Headers with credential values masked, for logging
    pub fn masked_headers(&self) -> BTreeMap<String, String> {
        let redactor = Redactor::default();
        self.headers
            .iter()
            .map(|(k, v)| {
                let shown = if redactor.is_sensitive(k) {
                    mask_credential(v)
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

/// In-process store (tests, evaluation-only hosts)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryTransportConfig {
    #[serde(default)]
    pub buffer: Option<BufferConfig>,
}

impl MemoryTransportConfig {
    pub fn buffer_options(&self) -> BufferOptions {
        BufferConfig::resolve(self.buffer.as_ref(), BufferOptions::disabled())
    }
}

/// Buffering overrides; unset fields fall back to the transport's defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

impl BufferConfig {
    pub fn resolve(config: Option<&BufferConfig>, defaults: BufferOptions) -> BufferOptions {
        let Some(config) = config else {
            return defaults;
        };
        BufferOptions {
            enabled: config.enabled.unwrap_or(true),
            size: config.size.unwrap_or(defaults.size),
            flush_interval: config
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_redact_fields")]
    pub fields: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: default_redact_fields(),
        }
    }
}

impl RedactionConfig {
    pub fn redactor(&self) -> Option<Redactor> {
        self.enabled.then(|| Redactor::new(&self.fields))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub thresholds: EvaluatorConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: EvaluatorConfig::default(),
        }
    }
}

fn default_transports() -> Vec<TransportConfig> {
    vec![TransportConfig::File(FileTransportConfig::new(DEFAULT_EVENT_LOG))]
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_redact_fields() -> Vec<String> {
    DEFAULT_REDACT_FIELDS.iter().map(|f| f.to_string()).collect()
}

impl TelemetryConfig {
    /// Load configuration from a YAML file
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No telemetry config, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| TelemetryError::ConfigError {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml(&content)
    }

    /// Parse, interpolate `${VAR}` references and validate
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        let config = config.interpolate(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with process environment variables
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Merge with environment values from `lookup`
    ///
    /// Environment values take precedence over config file values.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(path) = lookup("NIKA_TELEMETRY_FILE") {
            let existing = self.transports.iter_mut().find_map(|t| match t {
                TransportConfig::File(f) => Some(f),
                _ => None,
            });
            match existing {
                Some(file) => file.path = PathBuf::from(path),
                None => self
                    .transports
                    .push(TransportConfig::File(FileTransportConfig::new(path))),
            }
        }

        if let Some(endpoint) = lookup("NIKA_TELEMETRY_ENDPOINT") {
            let existing = self.http_transports_mut().next();
            match existing {
                Some(http) => http.endpoint = endpoint,
                None => self
                    .transports
                    .push(TransportConfig::Http(HttpTransportConfig::new(endpoint))),
            }
        }

        if let Some(key) = lookup("NIKA_TELEMETRY_API_KEY") {
            for http in self.http_transports_mut() {
                http.headers
                    .insert("Authorization".to_string(), format!("Bearer {}", key));
            }
        }

        if let Some(flag) = lookup("NIKA_TELEMETRY_REDACT") {
            self.redaction.enabled = !matches!(flag.to_lowercase().as_str(), "0" | "false" | "off");
        }

        self
    }

    /// Reject configurations no transport can be built from
    pub fn validate(&self) -> Result<()> {
        if self.transports.is_empty() {
            return Err(TelemetryError::ConfigError {
                reason: "at least one transport is required".to_string(),
            });
        }

        for transport in &self.transports {
            let buffer = match transport {
                TransportConfig::File(f) => {
                    if f.path.as_os_str().is_empty() {
                        return Err(TelemetryError::ConfigError {
                            reason: "file transport path is empty".to_string(),
                        });
                    }
                    f.buffer.as_ref()
                }
                TransportConfig::Http(h) => {
                    validate_endpoint(&h.endpoint)?;
                    if h.timeout_ms == 0 {
                        return Err(TelemetryError::ConfigError {
                            reason: format!("timeout_ms must be > 0 for '{}'", h.endpoint),
                        });
                    }
                    h.buffer.as_ref()
                }
                TransportConfig::Memory(m) => m.buffer.as_ref(),
            };
            if buffer.and_then(|b| b.size) == Some(0) {
                return Err(TelemetryError::ConfigError {
                    reason: format!("{} transport buffer size must be > 0", transport.kind()),
                });
            }
        }

        Ok(())
    }

    fn http_transports_mut(&mut self) -> impl Iterator<Item = &mut HttpTransportConfig> {
        self.transports.iter_mut().filter_map(|t| match t {
            TransportConfig::Http(h) => Some(h),
            _ => None,
        })
    }

    fn interpolate(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        for transport in &mut self.transports {
            match transport {
                TransportConfig::File(f) => {
                    let raw = f.path.to_string_lossy().into_owned();
                    f.path = PathBuf::from(expand_env(&raw, &lookup)?);
                }
                TransportConfig::Http(h) => {
                    h.endpoint = expand_env(&h.endpoint, &lookup)?;
                    for value in h.headers.values_mut() {
                        *value = expand_env(value, &lookup)?;
                    }
                }
                TransportConfig::Memory(_) => {}
            }
        }
        Ok(self)
    }
}

/// Replace `${NAME}` references; an unset variable is an error
pub fn expand_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut missing = None;
    let expanded = ENV_REF.replace_all(raw, |caps: &regex::Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.get_or_insert_with(|| name.to_string());
            String::new()
        })
    });

    match missing {
        Some(name) => Err(TelemetryError::ConfigError {
            reason: format!("environment variable '{}' is not set", name),
        }),
        None => Ok(expanded.into_owned()),
    }
}

pub(crate) fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint).map_err(|e| TelemetryError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TelemetryError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Mask a credential header value, keeping an auth scheme prefix readable.
///
/// At most a quarter of the credential (capped at 3 chars) stays visible,
/// so "Bearer abc" becomes "Bearer ***".
pub fn mask_credential(value: &str) -> String {
    let (scheme, credential) = match value.split_once(' ') {
        Some((scheme, rest)) if !scheme.is_empty() => (Some(scheme), rest.trim_start()),
        _ => (None, value),
    };
    let visible = (credential.chars().count() / 4).min(3);
    let masked = if credential.is_empty() {
        "***".to_string()
    } else {
        mask_secret(credential, visible)
    };
    match scheme {
        Some(scheme) => format!("{} {}", scheme, masked),
        None => masked,
    }
}

/// Mask a secret for display
///
/// Shows first N chars + asterisks, e.g. "sk-***"
pub fn mask_secret(secret: &str, visible_chars: usize) -> String {
    if secret.is_empty() {
        return String::new();
    }

    let visible: String = secret.chars().take(visible_chars).collect();
    format!("{}***", visible)
}
