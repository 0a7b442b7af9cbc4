//! TelemetryEvent - the record every transport persists
//!
//! `event_type` decides which optional fields must be present:
//! - node.* events carry a `node_context`
//! - workflow/node completed|failed carry a `duration_ms`
//! - eval.completed carries a payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::new_event_id;
use crate::error::{Result, TelemetryError};

/// All event kinds (5 levels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    #[serde(rename = "workflow.started")]
    WorkflowStarted,
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow.failed")]
    WorkflowFailed,

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.completed")]
    NodeCompleted,
    #[serde(rename = "node.failed")]
    NodeFailed,

    // ═══════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════
    #[serde(rename = "eval.completed")]
    EvalCompleted,

    // ═══════════════════════════════════════════
    // FINE-GRAINED (llm/tool/custom)
    // ═══════════════════════════════════════════
    #[serde(rename = "llm.requested")]
    LlmRequested,
    #[serde(rename = "llm.responded")]
    LlmResponded,
    #[serde(rename = "tool.called")]
    ToolCalled,
    #[serde(rename = "tool.responded")]
    ToolResponded,
    #[serde(rename = "custom")]
    Custom,
}

impl EventType {
    /// Wire name (e.g. `node.completed`)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::NodeStarted => "node.started",
            Self::NodeCompleted => "node.completed",
            Self::NodeFailed => "node.failed",
            Self::EvalCompleted => "eval.completed",
            Self::LlmRequested => "llm.requested",
            Self::LlmResponded => "llm.responded",
            Self::ToolCalled => "tool.called",
            Self::ToolResponded => "tool.responded",
            Self::Custom => "custom",
        }
    }

    /// Status implied by the event kind
    pub fn status(self) -> EventStatus {
        match self {
            Self::WorkflowStarted | Self::NodeStarted | Self::LlmRequested | Self::ToolCalled => {
                EventStatus::Started
            }
            Self::WorkflowFailed | Self::NodeFailed => EventStatus::Failed,
            Self::WorkflowCompleted
            | Self::NodeCompleted
            | Self::EvalCompleted
            | Self::LlmResponded
            | Self::ToolResponded
            | Self::Custom => EventStatus::Completed,
        }
    }

    /// node.* events must carry a node context
    pub fn is_node_scoped(self) -> bool {
        match self {
            Self::NodeStarted | Self::NodeCompleted | Self::NodeFailed => true,
            Self::WorkflowStarted
            | Self::WorkflowCompleted
            | Self::WorkflowFailed
            | Self::EvalCompleted
            | Self::LlmRequested
            | Self::LlmResponded
            | Self::ToolCalled
            | Self::ToolResponded
            | Self::Custom => false,
        }
    }

    /// Terminal workflow/node events must carry a duration
    pub fn requires_duration(self) -> bool {
        match self {
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::NodeCompleted | Self::NodeFailed => {
                true
            }
            Self::WorkflowStarted
            | Self::NodeStarted
            | Self::EvalCompleted
            | Self::LlmRequested
            | Self::LlmResponded
            | Self::ToolCalled
            | Self::ToolResponded
            | Self::Custom => false,
        }
    }

    /// Check if this is a workflow-level event
    pub fn is_workflow_event(self) -> bool {
        matches!(
            self,
            Self::WorkflowStarted | Self::WorkflowCompleted | Self::WorkflowFailed
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
}

/// Identifies the node an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub node_name: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_index: Option<u32>,
}

impl NodeContext {
    pub fn new(node_name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: None,
            node_name: node_name.into(),
            node_type: node_type.into(),
            node_index: None,
        }
    }

    pub fn with_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_index(mut self, node_index: u32) -> Self {
        self.node_index = Some(node_index);
        self
    }
}

/// Correlation ids shared by every event of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventScope {
    pub run_id: String,
    pub workflow_id: String,
    pub workflow_name: Option<String>,
    pub execution_id: String,
    pub session_id: Option<String>,
}

/// Single telemetry record (immutable once built)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    pub execution_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_context: Option<NodeContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TelemetryEvent {
    /// Start building an event for the given scope, stamped now
    pub fn new(event_type: EventType, scope: &EventScope) -> Self {
        Self {
            event_id: new_event_id(),
            event_type,
            timestamp: Utc::now(),
            run_id: scope.run_id.clone(),
            workflow_id: scope.workflow_id.clone(),
            workflow_name: scope.workflow_name.clone(),
            execution_id: scope.execution_id.clone(),
            session_id: scope.session_id.clone(),
            node_context: None,
            duration_ms: None,
            status: event_type.status(),
            payload: None,
            metadata: None,
        }
    }

    pub fn with_node(mut self, node_context: NodeContext) -> Self {
        self.node_context = Some(node_context);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach a typed payload; non-object values land under `value`
    pub fn with_payload(mut self, payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => self.payload = Some(map),
            Ok(Value::Null) => {}
            Ok(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                self.payload = Some(map);
            }
            Err(e) => {
                tracing::warn!(event_type = %self.event_type, error = %e, "Dropping unserializable payload");
            }
        }
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Map<String, Value>>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Node name, if the event is node-scoped
    pub fn node_name(&self) -> Option<&str> {
        self.node_context.as_ref().map(|n| n.node_name.as_str())
    }

    /// Decode the payload into a typed struct
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        let map = self.payload.clone()?;
        serde_json::from_value(Value::Object(map)).ok()
    }

    /// Check the per-type shape invariant
    pub fn validate(&self) -> Result<()> {
        if self.event_type.is_node_scoped() && self.node_context.is_none() {
            return Err(self.missing("node_context"));
        }
        if self.event_type.requires_duration() && self.duration_ms.is_none() {
            return Err(self.missing("duration_ms"));
        }
        match self.event_type {
            EventType::EvalCompleted if self.payload.is_none() => Err(self.missing("payload")),
            _ => Ok(()),
        }
    }

    fn missing(&self, field: &'static str) -> TelemetryError {
        TelemetryError::InvalidEvent {
            event_type: self.event_type.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ErrorInfo, NodeFailedPayload};
    use serde_json::json;

    fn scope() -> EventScope {
        EventScope {
            run_id: "run-1".to_string(),
            workflow_id: "wf-1".to_string(),
            workflow_name: Some("Summarize".to_string()),
            execution_id: "exec-1".to_string(),
            session_id: None,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // EventType tests
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn event_type_serializes_as_dotted_name() {
        let json = serde_json::to_value(EventType::NodeCompleted).unwrap();
        assert_eq!(json, json!("node.completed"));

        let parsed: EventType = serde_json::from_value(json!("llm.responded")).unwrap();
        assert_eq!(parsed, EventType::LlmResponded);
    }

    #[test]
    fn event_type_implies_status() {
        assert_eq!(EventType::WorkflowStarted.status(), EventStatus::Started);
        assert_eq!(EventType::NodeFailed.status(), EventStatus::Failed);
        assert_eq!(EventType::EvalCompleted.status(), EventStatus::Completed);
    }

    #[test]
    fn event_type_as_str_matches_serde() {
        for event_type in [
            EventType::WorkflowStarted,
            EventType::WorkflowCompleted,
            EventType::WorkflowFailed,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::NodeFailed,
            EventType::EvalCompleted,
            EventType::LlmRequested,
            EventType::LlmResponded,
            EventType::ToolCalled,
            EventType::ToolResponded,
            EventType::Custom,
        ] {
            let json = serde_json::to_value(event_type).unwrap();
            assert_eq!(json, json!(event_type.as_str()));
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // TelemetryEvent tests
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn new_event_copies_scope() {
        let event = TelemetryEvent::new(EventType::WorkflowStarted, &scope());
        assert_eq!(event.execution_id, "exec-1");
        assert_eq!(event.workflow_name.as_deref(), Some("Summarize"));
        assert_eq!(event.status, EventStatus::Started);
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn serialized_event_omits_absent_optionals_but_keeps_session() {
        let event = TelemetryEvent::new(EventType::WorkflowStarted, &scope());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "workflow.started");
        assert!(json.get("node_context").is_none());
        assert!(json.get("duration_ms").is_none());
        assert_eq!(json["session_id"], Value::Null);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn serialized_event_has_no_newlines() {
        let event = TelemetryEvent::new(EventType::Custom, &scope())
            .with_payload(json!({"text": "line one\nline two"}));
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn validate_requires_node_context_for_node_events() {
        let event = TelemetryEvent::new(EventType::NodeStarted, &scope());
        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("node_context"));

        let ok = TelemetryEvent::new(EventType::NodeStarted, &scope())
            .with_node(NodeContext::new("fetch", "http"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn validate_requires_duration_for_terminal_events() {
        let event = TelemetryEvent::new(EventType::NodeCompleted, &scope())
            .with_node(NodeContext::new("fetch", "http"));
        assert!(event.validate().is_err());
        assert!(event.with_duration(12).validate().is_ok());

        let wf = TelemetryEvent::new(EventType::WorkflowFailed, &scope());
        assert!(wf.validate().is_err());
    }

    #[test]
    fn validate_requires_payload_for_eval() {
        let event = TelemetryEvent::new(EventType::EvalCompleted, &scope());
        assert!(event.validate().is_err());
        assert!(event.with_payload(json!({"score": 100})).validate().is_ok());
    }

    #[test]
    fn payload_round_trips_through_typed_struct() {
        let event = TelemetryEvent::new(EventType::NodeFailed, &scope())
            .with_node(NodeContext::new("parse", "code"))
            .with_duration(5)
            .with_payload(NodeFailedPayload {
                error: ErrorInfo::new("Invalid JSON response", "SyntaxError"),
            });

        let decoded: NodeFailedPayload = event.payload_as().unwrap();
        assert_eq!(decoded.error.message, "Invalid JSON response");
        assert_eq!(event.node_name(), Some("parse"));
    }

    #[test]
    fn non_object_payload_is_wrapped() {
        let event = TelemetryEvent::new(EventType::Custom, &scope()).with_payload(42);
        assert_eq!(event.payload.unwrap()["value"], json!(42));
    }

    #[test]
    fn unknown_fields_are_ignored_on_read() {
        let raw = r#"{"event_id":"e1","event_type":"workflow.started","timestamp":"2026-02-14T12:34:56.789Z","run_id":"r","workflow_id":"w","execution_id":"x","status":"started","future":"ok"}"#;
        let parsed: TelemetryEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.execution_id, "x");
        assert!(parsed.session_id.is_none());
    }
}
