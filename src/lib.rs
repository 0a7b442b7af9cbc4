//! Nika Telemetry - lifecycle events and scoring for workflow executions
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  event/     TelemetryEvent, EventType, typed payloads        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  hook        Lifecycle callbacks (TelemetryHook)             │
//! │  tracker     Per-execution timing (ExecutionTracker)         │
//! │  evaluator   Rule-based scoring (Evaluator)                  │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  transport/  File (NDJSON), HTTP, memory, composite fan-out  │
//! │  redact      Sensitive-field masking                         │
//! │  resilience/ Retry with linear backoff                       │
//! │  config      YAML + env configuration                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`event`] | Event model, ids, payload shapes, shape validation |
//! | [`hook`] | Execution state machine, evaluation on termination |
//! | [`tracker`] | Concurrent execution/node timing (DashMap) |
//! | [`evaluator`] | Deterministic score, labels and reasons |
//! | [`transport`] | `Transport` trait, buffering decorator, sinks |
//! | [`redact`] | Recursive key-substring redaction |
//! | [`resilience`] | Retry policy for HTTP delivery |
//! | [`config`] | `TelemetryConfig` loading and validation |
//! | [`error`] | Error types with fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod event;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod evaluator;
pub mod hook;
pub mod tracker;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod redact;
pub mod resilience;
pub mod transport;

pub mod error;

// Re-exports for convenience
pub use config::TelemetryConfig;
pub use error::{FixSuggestion, Result, TelemetryError};
pub use evaluator::{EvalMetrics, EvaluationResult, Evaluator, EvaluatorConfig};
pub use event::{ErrorInfo, EventScope, EventType, NodeContext, TelemetryEvent};
pub use hook::{best_effort, TelemetryHook};
pub use redact::{redact, Redactor};
pub use tracker::ExecutionTracker;
pub use transport::{
    CompositeTransport, FileTransport, HttpTransport, MemoryTransport, Transport,
};
