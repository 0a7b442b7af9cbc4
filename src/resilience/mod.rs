//! Resilience patterns for event delivery
//!
//! - [`retry`]: Retry with linear backoff

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
