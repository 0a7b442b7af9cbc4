//! CompositeTransport - fan-out to several destinations
//!
//! Every member gets every call concurrently. A member failure is logged
//! and absorbed: it never blocks, delays or rolls back its siblings, and
//! the composite call still succeeds. Queries return the first non-empty
//! member result in member order (not a union).

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::Transport;
use crate::error::Result;
use crate::event::TelemetryEvent;

pub struct CompositeTransport {
    members: Vec<Arc<dyn Transport>>,
}

impl CompositeTransport {
    pub fn new(members: Vec<Arc<dyn Transport>>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Arc<dyn Transport>] {
        &self.members
    }

    fn absorb(&self, op: &'static str, results: Vec<Result<()>>) {
        for (member, result) in self.members.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    transport = member.name(),
                    op,
                    error = %e,
                    "Composite member failed"
                );
            }
        }
    }
}

#[async_trait]
impl Transport for CompositeTransport {
    fn name(&self) -> &str {
        "composite"
    }

    async fn send(&self, event: TelemetryEvent) -> Result<()> {
        let results = join_all(self.members.iter().map(|m| m.send(event.clone()))).await;
        self.absorb("send", results);
        Ok(())
    }

    async fn send_batch(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        let results = join_all(self.members.iter().map(|m| m.send_batch(events.clone()))).await;
        self.absorb("send_batch", results);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let results = join_all(self.members.iter().map(|m| m.flush())).await;
        self.absorb("flush", results);
        Ok(())
    }

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>> {
        for member in &self.members {
            match member.query_by_execution(execution_id).await {
                Ok(events) if !events.is_empty() => return Ok(events),
                Ok(_) => {}
                Err(e) => tracing::warn!(transport = member.name(), error = %e, "Query failed"),
            }
        }
        Ok(Vec::new())
    }

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>> {
        for member in &self.members {
            match member.query_by_workflow(workflow_id).await {
                Ok(events) if !events.is_empty() => return Ok(events),
                Ok(_) => {}
                Err(e) => tracing::warn!(transport = member.name(), error = %e, "Query failed"),
            }
        }
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<()> {
        let results = join_all(self.members.iter().map(|m| m.close())).await;
        self.absorb("close", results);
        Ok(())
    }
}
