use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Events that describe changes in prefetch queue state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A queue was created
    QueueCreated {
        queue: String,
        max_concurrency: usize,
        timestamp: DateTime<Utc>,
    },
    /// An idle queue was removed
    QueueRemoved {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A task was appended to the pending FIFO
    TaskQueued {
        queue: String,
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// A task's fetch started
    TaskStarted {
        queue: String,
        key: String,
        url: String,
        timestamp: DateTime<Utc>,
    },
    /// A fetch finished successfully
    TaskCompleted {
        queue: String,
        key: String,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },
    /// A fetch failed
    TaskFailed {
        queue: String,
        key: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A pending task was cancelled before it started
    TaskCancelled {
        queue: String,
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// A submit matched a task already in flight or pending
    DuplicateSuppressed {
        queue: String,
        key: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Name of the queue the event belongs to
    pub fn queue(&self) -> &str {
        match self {
            QueueEvent::QueueCreated { queue, .. }
            | QueueEvent::QueueRemoved { queue, .. }
            | QueueEvent::TaskQueued { queue, .. }
            | QueueEvent::TaskStarted { queue, .. }
            | QueueEvent::TaskCompleted { queue, .. }
            | QueueEvent::TaskFailed { queue, .. }
            | QueueEvent::TaskCancelled { queue, .. }
            | QueueEvent::DuplicateSuppressed { queue, .. } => queue,
        }
    }

    /// Task key, for task-level events
    pub fn key(&self) -> Option<&str> {
        match self {
            QueueEvent::TaskQueued { key, .. }
            | QueueEvent::TaskStarted { key, .. }
            | QueueEvent::TaskCompleted { key, .. }
            | QueueEvent::TaskFailed { key, .. }
            | QueueEvent::TaskCancelled { key, .. }
            | QueueEvent::DuplicateSuppressed { key, .. } => Some(key),
            QueueEvent::QueueCreated { .. } | QueueEvent::QueueRemoved { .. } => None,
        }
    }
}

/// Append-only JSON lines log of queue events
#[derive(Debug, Clone)]
pub struct EventLog {
    file_path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl EventLog {
    pub async fn new(base_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base_dir).await?;
        let file_path = base_dir.join("events.jsonl");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await
            .context("Failed to open event log")?;

        Ok(Self {
            file_path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append an event to the log
    pub async fn log(&self, event: &QueueEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read all events back from the log
    pub async fn read_events(&self) -> Result<Vec<QueueEvent>> {
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.file_path).await?;
        let mut events = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueueEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // one bad line does not invalidate the rest
                    warn!("Failed to parse event log line: {}. Error: {}", line, e);
                }
            }
        }
        Ok(events)
    }

    /// Record every event from a subscription until its sender closes
    pub fn record(&self, mut receiver: broadcast::Receiver<QueueEvent>) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = log.log(&event).await {
                            error!("Failed to write event log {:?}: {}", log.file_path, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event log fell behind, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
