//! FileSink - newline-delimited JSON event log
//!
//! One JSON object per line, appended. Existing lines are loaded into an
//! in-memory index when the sink opens so queries never re-read the file.
//!
//! Appends to the same canonical path go through a process-wide gate, so
//! concurrent batches never interleave bytes. Different paths never block
//! each other. No cross-process locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{BufferedTransport, EventSink, FileTransport, TransportOptions};
use crate::config::FileTransportConfig;
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use crate::redact::Redactor;

/// Canonical path -> append gate
static PATH_GATES: Lazy<DashMap<PathBuf, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn gate_for(path: &Path) -> Arc<Mutex<()>> {
    PATH_GATES.entry(path.to_path_buf()).or_default().clone()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Gate key: the absolute path with `..` and symlinks in its directory resolved.
///
/// Falls back to the plain absolute path while the directory does not exist.
async fn gate_key(path: &Path) -> Result<PathBuf> {
    let path = absolute(path)?;
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Ok(path);
    };
    match tokio::fs::canonicalize(parent).await {
        Ok(dir) => Ok(dir.join(file_name)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
        Err(e) => Err(e.into()),
    }
}

/// Parse NDJSON content, skipping blank and malformed lines
fn parse_lines(content: &str, path: &Path) -> Vec<TelemetryEvent> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<TelemetryEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = i + 1,
                    error = %e,
                    "Skipping malformed event line"
                );
                None
            }
        })
        .collect()
}

pub struct FileSink {
    path: PathBuf,
    gate: Arc<Mutex<()>>,
    index: RwLock<Vec<TelemetryEvent>>,
}

impl FileSink {
    /// Open (or prepare) the log at `path` and index its existing lines
    pub async fn open(path: impl AsRef<Path>, create_dir: bool) -> Result<Self> {
        let path = absolute(path.as_ref())?;

        if create_dir {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let path = gate_key(&path).await?;

        let existing = Self::load(&path).await?;
        tracing::debug!(
            path = %path.display(),
            events = existing.len(),
            "Opened event log"
        );

        Ok(Self {
            gate: gate_for(&path),
            path,
            index: RwLock::new(existing),
        })
    }

    /// Read every well-formed event from `path` without opening a sink.
    ///
    /// A missing file is an empty log.
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<TelemetryEvent>> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(parse_lines(&content, path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed events
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn write_error(&self, e: std::io::Error) -> TelemetryError {
        TelemetryError::FileWrite {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    fn select(&self, predicate: impl Fn(&TelemetryEvent) -> bool) -> Vec<TelemetryEvent> {
        self.index
            .read()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write_batch(&self, events: &[TelemetryEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let _guard = self.gate.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.write_error(e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| self.write_error(e))?;
        file.flush().await.map_err(|e| self.write_error(e))?;

        self.index.write().extend_from_slice(events);
        Ok(())
    }

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self.select(|e| e.execution_id == execution_id))
    }

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>> {
        Ok(self.select(|e| e.workflow_id == workflow_id))
    }
}

impl FileTransport {
    pub async fn open(config: &FileTransportConfig, redactor: Option<Redactor>) -> Result<Self> {
        let sink = FileSink::open(&config.path, config.create_dir).await?;
        let options = TransportOptions::new(config.buffer_options()).with_redactor(redactor);
        Ok(BufferedTransport::new(sink, options))
    }
}
