//! ExecutionTracker - timing state of in-flight executions
//!
//! One [`ExecutionState`] per execution id, held in a `DashMap` so
//! concurrently running executions never share state. Lookups on unknown
//! executions or nodes degrade to no-ops / zero durations instead of errors.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::event::{EventScope, NodeContext};

/// Start of one node run
#[derive(Debug, Clone)]
pub struct TimingEntry {
    pub start_time: Instant,
    pub node_context: NodeContext,
    pub input_items_count: Option<usize>,
}

/// Everything known about one running execution
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: Option<String>,
    pub session_id: Option<String>,
    pub start_time: Instant,
    /// Wall-clock start, for display
    pub started_at: DateTime<Utc>,
    /// Keyed by node name; a restart overwrites the entry
    pub node_timings: HashMap<String, TimingEntry>,
    pub completed_nodes: Vec<String>,
    pub failed_nodes: Vec<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl ExecutionState {
    pub fn node_count(&self) -> usize {
        self.completed_nodes.len() + self.failed_nodes.len()
    }

    pub fn elapsed_ms(&self) -> u64 {
        elapsed_ms(self.start_time)
    }
}

/// Final figures of a finished execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub duration_ms: u64,
    pub node_count: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executions: DashMap<String, ExecutionState>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution; replaces any state under the same id
    pub fn start_execution(
        &self,
        execution_id: &str,
        workflow_id: &str,
        workflow_name: Option<String>,
        session_id: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> ExecutionState {
        let state = ExecutionState {
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_name,
            session_id,
            start_time: Instant::now(),
            started_at: Utc::now(),
            node_timings: HashMap::new(),
            completed_nodes: Vec::new(),
            failed_nodes: Vec::new(),
            metadata,
        };
        if self
            .executions
            .insert(execution_id.to_string(), state.clone())
            .is_some()
        {
            tracing::debug!(execution_id, "Execution restarted, previous state replaced");
        }
        state
    }

    /// Record a node start; false when the execution is unknown
    pub fn start_node(
        &self,
        execution_id: &str,
        node_name: &str,
        node_context: NodeContext,
        input_items_count: Option<usize>,
    ) -> bool {
        let Some(mut state) = self.executions.get_mut(execution_id) else {
            return false;
        };
        let entry = TimingEntry {
            start_time: Instant::now(),
            node_context,
            input_items_count,
        };
        if state.node_timings.insert(node_name.to_string(), entry).is_some() {
            tracing::debug!(execution_id, node_name, "Node restarted, timing overwritten");
        }
        true
    }

    /// Elapsed ms since the node started; 0 if execution or node is unknown
    pub fn complete_node(&self, execution_id: &str, node_name: &str) -> u64 {
        self.finish_node(execution_id, node_name, false)
    }

    /// Like [`complete_node`](Self::complete_node) but records a failure
    pub fn fail_node(&self, execution_id: &str, node_name: &str) -> u64 {
        self.finish_node(execution_id, node_name, true)
    }

    fn finish_node(&self, execution_id: &str, node_name: &str, failed: bool) -> u64 {
        let Some(mut state) = self.executions.get_mut(execution_id) else {
            return 0;
        };
        let Some(duration) = state
            .node_timings
            .get(node_name)
            .map(|t| elapsed_ms(t.start_time))
        else {
            tracing::debug!(execution_id, node_name, "Finished node was never started");
            return 0;
        };
        if failed {
            state.failed_nodes.push(node_name.to_string());
        } else {
            state.completed_nodes.push(node_name.to_string());
        }
        duration
    }

    /// Duration since execution start and finished node count; zeros if unknown
    pub fn complete_execution(&self, execution_id: &str) -> ExecutionSummary {
        self.executions
            .get(execution_id)
            .map(|state| ExecutionSummary {
                duration_ms: state.elapsed_ms(),
                node_count: state.node_count(),
            })
            .unwrap_or_default()
    }

    pub fn cleanup_execution(&self, execution_id: &str) -> Option<ExecutionState> {
        self.executions.remove(execution_id).map(|(_, state)| state)
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<ExecutionState> {
        self.executions.get(execution_id).map(|s| s.clone())
    }

    pub fn node_timing(&self, execution_id: &str, node_name: &str) -> Option<TimingEntry> {
        self.executions
            .get(execution_id)
            .and_then(|s| s.node_timings.get(node_name).cloned())
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.executions.contains_key(execution_id)
    }

    pub fn active_executions(&self) -> Vec<String> {
        self.executions.iter().map(|e| e.key().clone()).collect()
    }

    /// Correlation fields for events of this execution
    pub fn scope(&self, execution_id: &str, run_id: &str) -> Option<EventScope> {
        self.executions.get(execution_id).map(|s| EventScope {
            run_id: run_id.to_string(),
            workflow_id: s.workflow_id.clone(),
            workflow_name: s.workflow_name.clone(),
            execution_id: s.execution_id.clone(),
            session_id: s.session_id.clone(),
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
