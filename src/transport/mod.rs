//! Transport layer - delivers events to their destinations
//!
//! ```text
//! TelemetryHook ──► Arc<dyn Transport>
//!                      ├── BufferedTransport<FileSink>    (NDJSON log)
//!                      ├── BufferedTransport<HttpSink>    (POST {events})
//!                      ├── BufferedTransport<MemorySink>  (in process)
//!                      └── CompositeTransport             (fan-out)
//! ```
//!
//! [`Transport`] is the contract the hook talks to. Destinations only
//! implement [`EventSink`]; [`BufferedTransport`] wraps a sink with the
//! shared buffering, redaction and timed-flush policy.

mod buffered;
mod composite;
mod file;
mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use buffered::{BufferOptions, BufferedTransport, TransportOptions};
pub use composite::CompositeTransport;
pub use file::FileSink;
pub use http::HttpSink;
pub use memory::MemorySink;

use crate::config::{TelemetryConfig, TransportConfig};
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;

pub type FileTransport = BufferedTransport<FileSink>;
pub type HttpTransport = BufferedTransport<HttpSink>;
pub type MemoryTransport = BufferedTransport<MemorySink>;

/// Event sender + query provider
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: TelemetryEvent) -> Result<()>;

    async fn send_batch(&self, events: Vec<TelemetryEvent>) -> Result<()>;

    /// Deliver everything buffered so far
    async fn flush(&self) -> Result<()>;

    /// Events of one execution, in store insertion order
    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>>;

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>>;

    /// Flush remaining events and release resources
    async fn close(&self) -> Result<()>;
}

/// Destination-specific writer wrapped by [`BufferedTransport`]
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Persist a batch; events arrive already validated and redacted
    async fn write_batch(&self, events: &[TelemetryEvent]) -> Result<()>;

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>>;

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the configured transport(s); several become a [`CompositeTransport`]
pub async fn from_config(config: &TelemetryConfig) -> Result<Arc<dyn Transport>> {
    let redactor = config.redaction.redactor();
    let mut members: Vec<Arc<dyn Transport>> = Vec::with_capacity(config.transports.len());

    for transport in &config.transports {
        let built: Arc<dyn Transport> = match transport {
            TransportConfig::File(file) => Arc::new(FileTransport::open(file, redactor.clone()).await?),
            TransportConfig::Http(http) => {
                Arc::new(HttpTransport::from_config(http, redactor.clone())?)
            }
            TransportConfig::Memory(memory) => {
                Arc::new(MemoryTransport::from_config(memory, redactor.clone()))
            }
        };
        tracing::debug!(transport = built.name(), "Transport ready");
        members.push(built);
    }

    match members.len() {
        0 => Err(TelemetryError::ConfigError {
            reason: "no transports configured".to_string(),
        }),
        1 => Ok(members.remove(0)),
        _ => Ok(Arc::new(CompositeTransport::new(members))),
    }
}
