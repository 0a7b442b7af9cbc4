//! Typed payloads per event kind
//!
//! The persisted `payload` is an open map; these structs are the shapes the
//! hook writes and the evaluator reads back via `TelemetryEvent::payload_as`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error reported by a failure callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStartedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCompletedPayload {
    pub node_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFailedPayload {
    pub error: ErrorInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    pub node_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStartedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_items_count: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCompletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_items_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailedPayload {
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequestPayload {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponsePayload {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPayload {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_info_uses_type_key() {
        let json = serde_json::to_value(ErrorInfo::new("boom", "TimeoutError")).unwrap();
        assert_eq!(json, json!({"message": "boom", "type": "TimeoutError"}));
    }

    #[test]
    fn llm_response_reads_partial_usage() {
        let parsed: LlmResponsePayload =
            serde_json::from_value(json!({"total_tokens": 120, "extra": true})).unwrap();
        assert_eq!(parsed.total_tokens, Some(120));
        assert!(parsed.prompt_tokens.is_none());
    }

    #[test]
    fn workflow_failed_omits_unknown_node() {
        let payload = WorkflowFailedPayload {
            error: ErrorInfo::new("boom", "Error"),
            failed_node: None,
            node_count: 2,
        };
        let json = serde_json::to_value(payload).unwrap();
        assert!(json.get("failed_node").is_none());
    }
}
