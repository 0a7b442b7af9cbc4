//! Rule-based evaluation of a finished execution trace
//!
//! Score starts at 100 and each rule below is applied unconditionally, in
//! this order, against the same running score:
//!
//! | Rule | Label | Effect |
//! |------|-------|--------|
//! | workflow.failed present | `workflow_failed` | clamp to `workflow_failure_max_score` |
//! | node.failed present | `node_failures` | `- count * failed_node_penalty` |
//! | total > `max_workflow_duration_ms` | `slow_execution` | `- floor(overage_s * slow_workflow_penalty_per_second)` |
//! | node duration > `max_node_duration_ms` | `slow_nodes` | `- count * slow_node_penalty` |
//! | completed, no failed, no slow nodes | `clean_execution` | `+ success_bonus` |
//!
//! The final score is clamped to `[0, 100]`. Evaluation is pure: no I/O, no
//! clock, same input gives the same result.

use serde::{Deserialize, Serialize};

use crate::event::{EventType, LlmResponsePayload, NodeFailedPayload, TelemetryEvent, WorkflowFailedPayload};

pub const LABEL_WORKFLOW_FAILED: &str = "workflow_failed";
pub const LABEL_NODE_FAILURES: &str = "node_failures";
pub const LABEL_SLOW_EXECUTION: &str = "slow_execution";
pub const LABEL_SLOW_NODES: &str = "slow_nodes";
pub const LABEL_CLEAN_EXECUTION: &str = "clean_execution";

const MAX_SCORE: i64 = 100;

/// Thresholds and penalties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_max_workflow_duration_ms")]
    pub max_workflow_duration_ms: u64,
    #[serde(default = "default_max_node_duration_ms")]
    pub max_node_duration_ms: u64,
    #[serde(default = "default_failed_node_penalty")]
    pub failed_node_penalty: i64,
    #[serde(default = "default_workflow_failure_max_score")]
    pub workflow_failure_max_score: i64,
    #[serde(default = "default_slow_workflow_penalty_per_second")]
    pub slow_workflow_penalty_per_second: f64,
    #[serde(default = "default_slow_node_penalty")]
    pub slow_node_penalty: i64,
    #[serde(default = "default_success_bonus")]
    pub success_bonus: i64,
}

fn default_max_workflow_duration_ms() -> u64 {
    60_000
}
fn default_max_node_duration_ms() -> u64 {
    10_000
}
fn default_failed_node_penalty() -> i64 {
    15
}
fn default_workflow_failure_max_score() -> i64 {
    30
}
fn default_slow_workflow_penalty_per_second() -> f64 {
    2.0
}
fn default_slow_node_penalty() -> i64 {
    5
}
fn default_success_bonus() -> i64 {
    10
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_workflow_duration_ms: default_max_workflow_duration_ms(),
            max_node_duration_ms: default_max_node_duration_ms(),
            failed_node_penalty: default_failed_node_penalty(),
            workflow_failure_max_score: default_workflow_failure_max_score(),
            slow_workflow_penalty_per_second: default_slow_workflow_penalty_per_second(),
            slow_node_penalty: default_slow_node_penalty(),
            success_bonus: default_success_bonus(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowestNode {
    pub name: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMetrics {
    pub total_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
}

/// Derived figures carried by the eval event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub total_duration_ms: u64,
    pub node_count: usize,
    pub failed_node_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slowest_node: Option<SlowestNode>,
    /// Rounded mean over node durations, 0 when none are known
    pub avg_node_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_metrics: Option<LlmMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// 0..=100
    pub score: u8,
    /// Unique, in rule order
    pub labels: Vec<String>,
    pub reasons: Vec<String>,
    pub metrics: EvalMetrics,
}

impl EvaluationResult {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Events of one execution, sorted into the buckets the rules look at
#[derive(Default)]
struct Trace<'a> {
    workflow_failed: Option<&'a TelemetryEvent>,
    workflow_completed: Option<&'a TelemetryEvent>,
    nodes_started: usize,
    nodes_finished: Vec<&'a TelemetryEvent>,
    nodes_failed: Vec<&'a TelemetryEvent>,
    llm_events: usize,
    llm_responses: Vec<&'a TelemetryEvent>,
}

impl<'a> Trace<'a> {
    fn collect(events: &'a [TelemetryEvent]) -> Self {
        let mut trace = Self::default();
        for event in events {
            match event.event_type {
                EventType::WorkflowCompleted => {
                    trace.workflow_completed.get_or_insert(event);
                }
                EventType::WorkflowFailed => {
                    trace.workflow_failed.get_or_insert(event);
                }
                EventType::NodeStarted => trace.nodes_started += 1,
                EventType::NodeCompleted => trace.nodes_finished.push(event),
                EventType::NodeFailed => {
                    trace.nodes_finished.push(event);
                    trace.nodes_failed.push(event);
                }
                EventType::LlmRequested => trace.llm_events += 1,
                EventType::LlmResponded => {
                    trace.llm_events += 1;
                    trace.llm_responses.push(event);
                }
                EventType::WorkflowStarted
                | EventType::EvalCompleted
                | EventType::ToolCalled
                | EventType::ToolResponded
                | EventType::Custom => {}
            }
        }
        trace
    }

    /// The workflow's terminal event; a failure outranks any completion
    fn terminal(&self) -> Option<&'a TelemetryEvent> {
        self.workflow_failed.or(self.workflow_completed)
    }

    fn completed_cleanly(&self) -> bool {
        self.terminal()
            .is_some_and(|e| e.event_type == EventType::WorkflowCompleted)
    }

    fn total_duration_ms(&self) -> u64 {
        self.terminal().and_then(|e| e.duration_ms).unwrap_or(0)
    }

    /// (name, duration) of every finished node with a known duration
    fn timed_nodes(&self) -> impl Iterator<Item = (&'a str, u64)> + '_ {
        self.nodes_finished
            .iter()
            .filter_map(|e| e.duration_ms.map(|d| (e.node_name().unwrap_or("unknown"), d)))
    }
}

/// Scores execution traces
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate the events of one execution
    pub fn evaluate(&self, events: &[TelemetryEvent]) -> EvaluationResult {
        let cfg = &self.config;
        let trace = Trace::collect(events);
        let total_duration_ms = trace.total_duration_ms();

        let mut score = MAX_SCORE;
        let mut labels: Vec<String> = Vec::new();
        let mut reasons = Vec::new();

        if let Some(failed) = trace.workflow_failed {
            score = score.min(cfg.workflow_failure_max_score);
            push_label(&mut labels, LABEL_WORKFLOW_FAILED);
            let payload: Option<WorkflowFailedPayload> = failed.payload_as();
            let message = payload
                .as_ref()
                .map(|p| p.error.message.as_str())
                .unwrap_or("unknown error");
            reasons.push(format!("Workflow failed: {}", message));
            if let Some(node) = payload.as_ref().and_then(|p| p.failed_node.as_deref()) {
                reasons.push(format!("Failed at node: {}", node));
            }
        }

        let failed_count = trace.nodes_failed.len();
        if failed_count > 0 {
            score -= failed_count as i64 * cfg.failed_node_penalty;
            push_label(&mut labels, LABEL_NODE_FAILURES);
            reasons.push(format!("{} node(s) failed", failed_count));
            for event in &trace.nodes_failed {
                let message = event
                    .payload_as::<NodeFailedPayload>()
                    .map(|p| p.error.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                reasons.push(format!(
                    "  - {}: {}",
                    event.node_name().unwrap_or("unknown"),
                    message
                ));
            }
        }

        if total_duration_ms > cfg.max_workflow_duration_ms {
            let overage_seconds =
                (total_duration_ms - cfg.max_workflow_duration_ms) as f64 / 1000.0;
            score -= (overage_seconds * cfg.slow_workflow_penalty_per_second).floor() as i64;
            push_label(&mut labels, LABEL_SLOW_EXECUTION);
            reasons.push(format!(
                "Workflow took {:.1}s (threshold: {:.1}s)",
                seconds(total_duration_ms),
                seconds(cfg.max_workflow_duration_ms)
            ));
        }

        let slow_nodes: Vec<(&str, u64)> = trace
            .timed_nodes()
            .filter(|(_, d)| *d > cfg.max_node_duration_ms)
            .collect();
        if !slow_nodes.is_empty() {
            score -= slow_nodes.len() as i64 * cfg.slow_node_penalty;
            push_label(&mut labels, LABEL_SLOW_NODES);
            reasons.push(format!(
                "{} node(s) exceeded {:.1}s",
                slow_nodes.len(),
                seconds(cfg.max_node_duration_ms)
            ));
            for (name, duration) in &slow_nodes {
                reasons.push(format!("  - {}: {:.1}s", name, seconds(*duration)));
            }
        }

        if trace.completed_cleanly() && failed_count == 0 && slow_nodes.is_empty() {
            score += cfg.success_bonus;
            push_label(&mut labels, LABEL_CLEAN_EXECUTION);
            reasons.push("Clean execution: all nodes completed without failures".to_string());
        }

        let score = score.clamp(0, MAX_SCORE) as u8;
        let metrics = Self::metrics(&trace, total_duration_ms);

        EvaluationResult {
            score,
            labels,
            reasons,
            metrics,
        }
    }

    fn metrics(trace: &Trace<'_>, total_duration_ms: u64) -> EvalMetrics {
        let mut slowest: Option<SlowestNode> = None;
        let mut sum: u64 = 0;
        let mut timed: u64 = 0;
        for (name, duration) in trace.timed_nodes() {
            sum = sum.saturating_add(duration);
            timed += 1;
            if slowest.as_ref().map_or(true, |s| duration > s.duration_ms) {
                slowest = Some(SlowestNode {
                    name: name.to_string(),
                    duration_ms: duration,
                });
            }
        }
        let avg_node_duration_ms = if timed == 0 {
            0
        } else {
            (sum as f64 / timed as f64).round() as u64
        };

        let llm_metrics = (trace.llm_events > 0).then(|| {
            let total_tokens: u64 = trace
                .llm_responses
                .iter()
                .filter_map(|e| e.payload_as::<LlmResponsePayload>())
                .filter_map(|p| p.total_tokens)
                .sum();
            let total_latency_ms: u64 = trace.llm_responses.iter().filter_map(|e| e.duration_ms).sum();
            LlmMetrics {
                total_requests: trace.llm_events / 2,
                total_tokens: (total_tokens > 0).then_some(total_tokens),
                total_latency_ms: (total_latency_ms > 0).then_some(total_latency_ms),
            }
        });

        EvalMetrics {
            total_duration_ms,
            node_count: trace.nodes_started,
            failed_node_count: trace.nodes_failed.len(),
            slowest_node: slowest,
            avg_node_duration_ms,
            llm_metrics,
        }
    }
}

fn push_label(labels: &mut Vec<String>, name: &str) {
    if !labels.iter().any(|l| l == name) {
        labels.push(name.to_string());
    }
}

fn seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}
