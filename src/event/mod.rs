//! Event Module - telemetry records emitted for workflow executions
//!
//! Key types:
//! - `TelemetryEvent`: immutable record, one per lifecycle transition
//! - `EventType`: closed set of 11 kinds across 5 levels (workflow/node/eval/llm/tool)
//! - `EventScope`: correlation ids copied into every event of an execution
//! - Typed payloads (`NodeFailedPayload`, `LlmResponsePayload`, ...) that
//!   serialize into the open `payload` map

mod ids;
mod model;
mod payload;

pub use ids::{generate_run_id, new_event_id};
pub use model::{EventScope, EventStatus, EventType, NodeContext, TelemetryEvent};
pub use payload::{
    CustomPayload, ErrorInfo, LlmRequestPayload, LlmResponsePayload, NodeCompletedPayload,
    NodeFailedPayload, NodeStartedPayload, ToolCallPayload, ToolResponsePayload,
    WorkflowCompletedPayload, WorkflowFailedPayload, WorkflowStartedPayload,
};
