//! HttpSink - POSTs batches to a collector endpoint
//!
//! One `POST {endpoint}` per batch, body `{"events": [...]}`. Any 2xx is
//! success; anything else (or a transport error / timeout) goes through the
//! retry policy. The per-execution cache only serves queries from this
//! process and is not authoritative.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Serialize;

use super::{BufferedTransport, EventSink, HttpTransport, TransportOptions};
use crate::config::{validate_endpoint, HttpTransportConfig};
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use crate::redact::Redactor;
use crate::resilience::RetryPolicy;

const USER_AGENT: &str = concat!("nika-telemetry/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct Batch<'a> {
    events: &'a [TelemetryEvent],
}

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    timeout: Duration,
    retry: RetryPolicy,
    cache: DashMap<String, Vec<TelemetryEvent>>,
}

impl HttpSink {
    pub fn new(config: &HttpTransportConfig) -> Result<Self> {
        validate_endpoint(&config.endpoint)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TelemetryError::ConfigError {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TelemetryError::ConfigError {
                    reason: format!("invalid header name '{}': {}", name, e),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| TelemetryError::ConfigError {
                reason: format!("invalid value for header '{}': {}", name, e),
            })?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            headers,
            timeout: config.timeout(),
            retry: RetryPolicy::new(config.retry_config()),
            cache: DashMap::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request_error(&self, e: reqwest::Error) -> TelemetryError {
        if e.is_timeout() {
            TelemetryError::Timeout {
                endpoint: self.endpoint.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TelemetryError::HttpRequest {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }
        }
    }

    /// Single delivery attempt
    async fn post(&self, batch: &Batch<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .json(batch)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::HttpStatus {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn cache_events(&self, events: &[TelemetryEvent]) {
        for event in events {
            self.cache
                .entry(event.execution_id.clone())
                .or_default()
                .push(event.clone());
        }
    }
}

#[async_trait]
impl EventSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn write_batch(&self, events: &[TelemetryEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let batch = Batch { events };
        self.retry.execute(|| self.post(&batch)).await?;
        tracing::debug!(endpoint = %self.endpoint, count = events.len(), "Delivered event batch");

        self.cache_events(events);
        Ok(())
    }

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self
            .cache
            .get(execution_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self
            .cache
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|e| e.workflow_id == workflow_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

impl HttpTransport {
    pub fn from_config(config: &HttpTransportConfig, redactor: Option<Redactor>) -> Result<Self> {
        let sink = HttpSink::new(config)?;
        let options = TransportOptions::new(config.buffer_options()).with_redactor(redactor);
        Ok(BufferedTransport::new(sink, options))
    }
}
