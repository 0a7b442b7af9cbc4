//! TelemetryHook - lifecycle callbacks for the host workflow engine
//!
//! ```text
//! not-started ──on_workflow_start──► running ──on_workflow_complete──► terminated
//!                                       │     └─on_workflow_fail─────►
//!                                       └── node / llm / tool / custom callbacks
//! ```
//!
//! Each callback updates the [`ExecutionTracker`], builds the event, keeps
//! an unredacted copy in the per-execution buffer and hands the event to
//! the transport (which redacts). On termination the buffer snapshot is
//! evaluated and an `eval.completed` event follows the terminal event.
//!
//! Callbacks for executions that are not running are dropped with a
//! warning and return `Ok(None)`.
//!
//! The hook is an explicit object: create one at startup and pass it to the
//! engine adapter. There is no global instance.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::evaluator::{EvaluationResult, Evaluator};
use crate::event::{
    generate_run_id, CustomPayload, ErrorInfo, EventScope, EventType, LlmRequestPayload,
    LlmResponsePayload, NodeCompletedPayload, NodeContext, NodeFailedPayload, NodeStartedPayload,
    TelemetryEvent, ToolCallPayload, ToolResponsePayload, WorkflowCompletedPayload,
    WorkflowFailedPayload, WorkflowStartedPayload,
};
use crate::tracker::ExecutionTracker;
use crate::transport::{self, Transport};

/// Log and swallow a telemetry error so it never fails the measured work
pub fn best_effort<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "Telemetry error ignored");
            None
        }
    }
}

pub struct TelemetryHook {
    tracker: ExecutionTracker,
    transport: Arc<dyn Transport>,
    evaluator: Option<Evaluator>,
    /// execution id -> events emitted so far (pre-redaction)
    buffers: DashMap<String, Vec<TelemetryEvent>>,
    run_id: String,
}

impl TelemetryHook {
    /// Hook with the default evaluator enabled
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            tracker: ExecutionTracker::new(),
            transport,
            evaluator: Some(Evaluator::default()),
            buffers: DashMap::new(),
            run_id: generate_run_id(),
        }
    }

    /// Build transports and evaluator from configuration
    pub async fn from_config(config: &TelemetryConfig) -> Result<Self> {
        config.validate()?;
        let transport = transport::from_config(config).await?;
        let evaluator = config
            .evaluation
            .enabled
            .then(|| Evaluator::new(config.evaluation.thresholds.clone()));
        Ok(Self::new(transport).with_evaluator(evaluator))
    }

    /// `None` disables evaluation
    pub fn with_evaluator(mut self, evaluator: Option<Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn active_executions(&self) -> Vec<String> {
        self.tracker.active_executions()
    }

    /// Events buffered for a running execution
    pub fn buffered_events(&self, execution_id: &str) -> Vec<TelemetryEvent> {
        self.buffers
            .get(execution_id)
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    pub async fn flush(&self) -> Result<()> {
        self.transport.flush().await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════

    pub async fn on_workflow_start(
        &self,
        execution_id: &str,
        workflow_id: &str,
        workflow_name: Option<&str>,
        session_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Option<TelemetryEvent>> {
        let state = self.tracker.start_execution(
            execution_id,
            workflow_id,
            workflow_name.map(String::from),
            session_id.map(String::from),
            metadata,
        );
        self.buffers.insert(execution_id.to_string(), Vec::new());
        tracing::debug!(execution_id, workflow_id, "Workflow started");

        let scope = EventScope {
            run_id: self.run_id.clone(),
            workflow_id: state.workflow_id,
            workflow_name: state.workflow_name,
            execution_id: state.execution_id,
            session_id: state.session_id,
        };
        let event = TelemetryEvent::new(EventType::WorkflowStarted, &scope)
            .with_payload(WorkflowStartedPayload { node_total: None })
            .with_metadata(state.metadata);
        self.emit(event).await
    }

    pub async fn on_workflow_complete(&self, execution_id: &str) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, "on_workflow_complete") else {
            return Ok(None);
        };
        let summary = self.tracker.complete_execution(execution_id);
        let event = TelemetryEvent::new(EventType::WorkflowCompleted, &scope)
            .with_duration(summary.duration_ms)
            .with_payload(WorkflowCompletedPayload {
                node_count: summary.node_count,
            });
        self.terminate(&scope, event).await
    }

    pub async fn on_workflow_fail(
        &self,
        execution_id: &str,
        error: ErrorInfo,
        failed_node: Option<&str>,
    ) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, "on_workflow_fail") else {
            return Ok(None);
        };
        let summary = self.tracker.complete_execution(execution_id);
        let event = TelemetryEvent::new(EventType::WorkflowFailed, &scope)
            .with_duration(summary.duration_ms)
            .with_payload(WorkflowFailedPayload {
                error,
                failed_node: failed_node.map(String::from),
                node_count: summary.node_count,
            });
        self.terminate(&scope, event).await
    }

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════

    pub async fn on_node_start(
        &self,
        execution_id: &str,
        node: NodeContext,
        input_items_count: Option<usize>,
    ) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, "on_node_start") else {
            return Ok(None);
        };
        let node_name = node.node_name.clone();
        self.tracker
            .start_node(execution_id, &node_name, node.clone(), input_items_count);

        let event = TelemetryEvent::new(EventType::NodeStarted, &scope)
            .with_node(node)
            .with_payload(NodeStartedPayload { input_items_count });
        self.emit(event).await
    }

    pub async fn on_node_complete(
        &self,
        execution_id: &str,
        node_name: &str,
        output_items_count: Option<usize>,
    ) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, "on_node_complete") else {
            return Ok(None);
        };
        let duration = self.tracker.complete_node(execution_id, node_name);
        let event = TelemetryEvent::new(EventType::NodeCompleted, &scope)
            .with_node(self.node_context(execution_id, node_name))
            .with_duration(duration)
            .with_payload(NodeCompletedPayload { output_items_count });
        self.emit(event).await
    }

    pub async fn on_node_fail(
        &self,
        execution_id: &str,
        node_name: &str,
        error: ErrorInfo,
    ) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, "on_node_fail") else {
            return Ok(None);
        };
        let duration = self.tracker.fail_node(execution_id, node_name);
        let event = TelemetryEvent::new(EventType::NodeFailed, &scope)
            .with_node(self.node_context(execution_id, node_name))
            .with_duration(duration)
            .with_payload(NodeFailedPayload { error });
        self.emit(event).await
    }

    // ═══════════════════════════════════════════
    // FINE-GRAINED
    // ═══════════════════════════════════════════

    pub async fn on_llm_request(
        &self,
        execution_id: &str,
        node_name: Option<&str>,
        request: LlmRequestPayload,
    ) -> Result<Option<TelemetryEvent>> {
        self.emit_scoped(execution_id, "on_llm_request", EventType::LlmRequested, node_name, |e| {
            e.with_payload(request)
        })
        .await
    }

    pub async fn on_llm_response(
        &self,
        execution_id: &str,
        node_name: Option<&str>,
        latency_ms: u64,
        response: LlmResponsePayload,
    ) -> Result<Option<TelemetryEvent>> {
        self.emit_scoped(execution_id, "on_llm_response", EventType::LlmResponded, node_name, |e| {
            e.with_duration(latency_ms).with_payload(response)
        })
        .await
    }

    pub async fn on_tool_call(
        &self,
        execution_id: &str,
        node_name: Option<&str>,
        call: ToolCallPayload,
    ) -> Result<Option<TelemetryEvent>> {
        self.emit_scoped(execution_id, "on_tool_call", EventType::ToolCalled, node_name, |e| {
            e.with_payload(call)
        })
        .await
    }

    pub async fn on_tool_response(
        &self,
        execution_id: &str,
        node_name: Option<&str>,
        duration_ms: Option<u64>,
        response: ToolResponsePayload,
    ) -> Result<Option<TelemetryEvent>> {
        self.emit_scoped(execution_id, "on_tool_response", EventType::ToolResponded, node_name, |e| {
            let e = e.with_payload(response);
            match duration_ms {
                Some(d) => e.with_duration(d),
                None => e,
            }
        })
        .await
    }

    pub async fn emit_custom(
        &self,
        execution_id: &str,
        name: &str,
        data: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Option<TelemetryEvent>> {
        let payload = CustomPayload {
            name: name.to_string(),
            data,
        };
        self.emit_scoped(execution_id, "emit_custom", EventType::Custom, None, |e| {
            e.with_payload(payload).with_metadata(metadata)
        })
        .await
    }

    // ═══════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════

    fn scope_or_warn(&self, execution_id: &str, callback: &'static str) -> Option<EventScope> {
        let scope = self.tracker.scope(execution_id, &self.run_id);
        if scope.is_none() {
            tracing::warn!(execution_id, callback, "Execution not running, event dropped");
        }
        scope
    }

    fn node_context(&self, execution_id: &str, node_name: &str) -> NodeContext {
        self.tracker
            .node_timing(execution_id, node_name)
            .map(|t| t.node_context)
            .unwrap_or_else(|| NodeContext::new(node_name, "unknown"))
    }

    async fn emit_scoped(
        &self,
        execution_id: &str,
        callback: &'static str,
        event_type: EventType,
        node_name: Option<&str>,
        build: impl FnOnce(TelemetryEvent) -> TelemetryEvent,
    ) -> Result<Option<TelemetryEvent>> {
        let Some(scope) = self.scope_or_warn(execution_id, callback) else {
            return Ok(None);
        };
        let mut event = TelemetryEvent::new(event_type, &scope);
        if let Some(timing) = node_name.and_then(|n| self.tracker.node_timing(execution_id, n)) {
            event = event.with_node(timing.node_context);
        }
        self.emit(build(event)).await
    }

    /// Buffer for evaluation, then send
    async fn emit(&self, event: TelemetryEvent) -> Result<Option<TelemetryEvent>> {
        if let Some(mut buffer) = self.buffers.get_mut(&event.execution_id) {
            buffer.push(event.clone());
        }
        self.transport.send(event.clone()).await?;
        Ok(Some(event))
    }

    /// Emit the terminal event, evaluate, then release execution state.
    ///
    /// State is released even when sending fails; the first error wins.
    async fn terminate(
        &self,
        scope: &EventScope,
        terminal: TelemetryEvent,
    ) -> Result<Option<TelemetryEvent>> {
        let execution_id = scope.execution_id.as_str();
        let sent = self.emit(terminal).await;

        let evaluated = match &self.evaluator {
            Some(evaluator) => {
                let result = evaluator.evaluate(&self.buffered_events(execution_id));
                self.send_evaluation(scope, &result).await
            }
            None => Ok(()),
        };

        self.tracker.cleanup_execution(execution_id);
        self.buffers.remove(execution_id);
        tracing::debug!(execution_id, "Execution released");

        let terminal = sent?;
        evaluated?;
        Ok(terminal)
    }

    async fn send_evaluation(&self, scope: &EventScope, result: &EvaluationResult) -> Result<()> {
        tracing::info!(
            execution_id = %scope.execution_id,
            score = result.score,
            labels = ?result.labels,
            "Execution evaluated"
        );
        let event = TelemetryEvent::new(EventType::EvalCompleted, scope).with_payload(result);
        self.transport.send(event).await
    }
}
