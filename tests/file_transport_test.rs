//! FileTransport integration tests
//!
//! NDJSON round-trip, index reload, and same-path write serialization.

use std::sync::Arc;
use std::time::Duration;

use nika_telemetry::config::{BufferConfig, FileTransportConfig};
use nika_telemetry::evaluator::LABEL_SLOW_NODES;
use nika_telemetry::transport::{EventSink, FileSink, FileTransport, Transport};
use nika_telemetry::{
    Evaluator, EventScope, EventType, NodeContext, Redactor, TelemetryError, TelemetryEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// HELPERS
// =============================================================================

fn scope(execution_id: &str) -> EventScope {
    EventScope {
        run_id: "run-test".into(),
        workflow_id: "wf-files".into(),
        workflow_name: Some("Files".into()),
        execution_id: execution_id.into(),
        session_id: None,
    }
}

fn node_event(execution_id: &str, i: usize) -> TelemetryEvent {
    TelemetryEvent::new(EventType::NodeCompleted, &scope(execution_id))
        .with_node(NodeContext::new(format!("node-{}", i), "code").with_index(i as u32))
        .with_duration(i as u64 * 10)
        .with_payload(json!({"output_items_count": i}))
}

fn config(dir: &TempDir) -> FileTransportConfig {
    FileTransportConfig::new(dir.path().join("logs/events.ndjson"))
}

// =============================================================================
// ROUND TRIP
// =============================================================================

#[tokio::test]
async fn test_write_then_read_is_lossless_and_ordered() {
    let dir = TempDir::new().unwrap();
    let transport = FileTransport::open(&config(&dir), None).await.unwrap();

    let written: Vec<_> = (0..25).map(|i| node_event("exec-1", i)).collect();
    for event in &written {
        transport.send(event.clone()).await.unwrap();
    }

    let read = FileSink::load(dir.path().join("logs/events.ndjson"))
        .await
        .unwrap();
    assert_eq!(read, written);
    assert_eq!(transport.query_by_execution("exec-1").await.unwrap(), written);
}

#[tokio::test]
async fn test_reopen_indexes_existing_events() {
    let dir = TempDir::new().unwrap();
    {
        let transport = FileTransport::open(&config(&dir), None).await.unwrap();
        transport
            .send_batch(vec![node_event("a", 1), node_event("b", 2)])
            .await
            .unwrap();
        transport.close().await.unwrap();
    }

    let reopened = FileTransport::open(&config(&dir), None).await.unwrap();
    assert_eq!(reopened.query_by_execution("a").await.unwrap().len(), 1);
    assert_eq!(reopened.query_by_workflow("wf-files").await.unwrap().len(), 2);
    assert!(reopened.query_by_workflow("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stored_trace_can_be_reevaluated() {
    let dir = TempDir::new().unwrap();
    let transport = FileTransport::open(&config(&dir), None).await.unwrap();
    let s = scope("exec-c");

    let events = vec![
        TelemetryEvent::new(EventType::WorkflowStarted, &s),
        TelemetryEvent::new(EventType::NodeStarted, &s).with_node(NodeContext::new("fast", "code")),
        TelemetryEvent::new(EventType::NodeCompleted, &s)
            .with_node(NodeContext::new("fast", "code"))
            .with_duration(5_000),
        TelemetryEvent::new(EventType::NodeStarted, &s).with_node(NodeContext::new("slow", "code")),
        TelemetryEvent::new(EventType::NodeCompleted, &s)
            .with_node(NodeContext::new("slow", "code"))
            .with_duration(15_000),
        TelemetryEvent::new(EventType::WorkflowCompleted, &s).with_duration(20_000),
    ];
    transport.send_batch(events).await.unwrap();

    let stored = transport.query_by_execution("exec-c").await.unwrap();
    let result = Evaluator::default().evaluate(&stored);
    assert_eq!(result.labels, vec![LABEL_SLOW_NODES.to_string()]);
    assert_eq!(result.score, 95);
    assert_eq!(result.metrics.total_duration_ms, 20_000);
}

// =============================================================================
// SERIALIZATION GATE
// =============================================================================

#[tokio::test]
async fn test_concurrent_writers_never_interleave_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.ndjson");

    // two sinks on the same path share the process-wide gate
    let first = Arc::new(FileSink::open(&path, true).await.unwrap());
    let second = Arc::new(FileSink::open(&path, true).await.unwrap());

    let mut handles = Vec::new();
    for task in 0..16 {
        let sink = if task % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        handles.push(tokio::spawn(async move {
            let id = format!("exec-{}", task);
            let batch: Vec<_> = (0..20).map(|i| node_event(&id, i)).collect();
            sink.write_batch(&batch).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 16 * 20);
    for line in &lines {
        serde_json::from_str::<TelemetryEvent>(line).expect("intact line");
    }

    // each batch is contiguous, in order
    let events = FileSink::load(&path).await.unwrap();
    for chunk in events.chunks(20) {
        let id = &chunk[0].execution_id;
        assert!(chunk.iter().all(|e| &e.execution_id == id));
        let indexes: Vec<_> = chunk
            .iter()
            .map(|e| e.node_context.as_ref().unwrap().node_index.unwrap())
            .collect();
        assert_eq!(indexes, (0..20).collect::<Vec<u32>>());
    }
}

// =============================================================================
// BUFFERING + REDACTION
// =============================================================================

#[tokio::test]
async fn test_buffered_file_transport_flushes_on_size_and_close() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.buffer = Some(BufferConfig {
        enabled: Some(true),
        size: Some(3),
        flush_interval_ms: Some(60_000),
    });
    let transport = FileTransport::open(&cfg, None).await.unwrap();

    transport.send(node_event("e", 0)).await.unwrap();
    transport.send(node_event("e", 1)).await.unwrap();
    assert_eq!(transport.sink().len(), 0);
    transport.send(node_event("e", 2)).await.unwrap();
    assert_eq!(transport.sink().len(), 3);

    transport.send(node_event("e", 3)).await.unwrap();
    assert_eq!(transport.pending(), 1);
    transport.close().await.unwrap();
    assert_eq!(transport.sink().len(), 4);

    let err = transport.send(node_event("e", 4)).await.unwrap_err();
    assert!(matches!(err, TelemetryError::Closed { .. }));
}

#[tokio::test]
async fn test_timer_flush_reaches_disk() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.buffer = Some(BufferConfig {
        enabled: Some(true),
        size: Some(1_000),
        flush_interval_ms: Some(50),
    });
    let transport = FileTransport::open(&cfg, None).await.unwrap();
    transport.send(node_event("e", 0)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let on_disk = FileSink::load(transport.sink().path()).await.unwrap();
    assert_eq!(on_disk.len(), 1);
}

#[tokio::test]
async fn test_redaction_applies_before_write() {
    let dir = TempDir::new().unwrap();
    let transport = FileTransport::open(&config(&dir), Some(Redactor::default()))
        .await
        .unwrap();

    let event = TelemetryEvent::new(EventType::Custom, &scope("r")).with_payload(json!({
        "name": "auth",
        "data": {"apiKey": "sk-123", "rows": [{"secret": "s"}, {"ok": 1}]}
    }));
    transport.send(event.clone()).await.unwrap();

    let content = std::fs::read_to_string(transport.sink().path()).unwrap();
    assert!(!content.contains("sk-123"));
    let stored = &transport.query_by_execution("r").await.unwrap()[0];
    let data = &stored.payload.as_ref().unwrap()["data"];
    assert_eq!(data["apiKey"], "[REDACTED]");
    assert_eq!(data["rows"][0]["secret"], "[REDACTED]");
    assert_eq!(data["rows"][1]["ok"], 1);

    // caller's event untouched
    assert_eq!(event.payload.as_ref().unwrap()["data"]["apiKey"], "sk-123");
}
