//! MemorySink - keeps events in process
//!
//! For tests and for hosts that only want the evaluation.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BufferedTransport, EventSink, MemoryTransport, TransportOptions};
use crate::config::MemoryTransportConfig;
use crate::error::Result;
use crate::event::TelemetryEvent;
use crate::redact::Redactor;

#[derive(Debug, Default)]
pub struct MemorySink {
    events: RwLock<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event, in write order
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, events: &[TelemetryEvent]) -> Result<()> {
        self.events.write().extend_from_slice(events);
        Ok(())
    }

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

impl MemoryTransport {
    pub fn in_memory() -> Self {
        BufferedTransport::new(MemorySink::new(), TransportOptions::default())
    }

    pub fn from_config(config: &MemoryTransportConfig, redactor: Option<Redactor>) -> Self {
        let options = TransportOptions::new(config.buffer_options()).with_redactor(redactor);
        BufferedTransport::new(MemorySink::new(), options)
    }
}
