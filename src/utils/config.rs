//! Prefetch configuration

use crate::fetcher::FetchConfig;
use crate::queue::IMMEDIATE_QUEUE_NAME;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_IMMEDIATE_CONCURRENCY: usize = 2;
pub const DEFAULT_PRIMARY_QUEUE: &str = "default";

/// Prefetch settings supplied by the embedding application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrefetchSettings {
    /// Concurrency bound for queues created without explicit configuration
    pub default_concurrency: usize,

    /// Concurrency bound of the immediate queue
    pub immediate_concurrency: usize,

    /// Queue used when a caller does not name one
    pub primary_queue_name: String,

    /// Queues created up front with their own bounds
    pub queues: Vec<QueueSettings>,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Retry attempts for retryable fetch failures
    pub retry_attempts: usize,

    /// Delay between retries (milliseconds)
    pub retry_delay_ms: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Reject bodies that are not a known image format
    pub verify_images: bool,
}

/// A named queue and its concurrency bound
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    pub max_concurrency: usize,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrency,
        }
    }
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            default_concurrency: DEFAULT_CONCURRENCY,
            immediate_concurrency: DEFAULT_IMMEDIATE_CONCURRENCY,
            primary_queue_name: DEFAULT_PRIMARY_QUEUE.to_string(),
            queues: Vec::new(),
            timeout_secs: 30,
            retry_attempts: 2,
            retry_delay_ms: 500,
            user_agent: format!("fastprefetch/{}", env!("CARGO_PKG_VERSION")),
            verify_images: false,
        }
    }
}

impl PrefetchSettings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fastprefetch")
            .join("settings.json")
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        Ok(settings.sanitized())
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Enforce sane minimums
    pub fn sanitized(mut self) -> Self {
        if self.default_concurrency == 0 {
            warn!("default_concurrency of 0 raised to 1");
            self.default_concurrency = 1;
        }
        if self.immediate_concurrency == 0 {
            warn!("immediate_concurrency of 0 raised to 1");
            self.immediate_concurrency = 1;
        }
        self.queues.retain(|queue| {
            let reserved = queue.name == IMMEDIATE_QUEUE_NAME;
            if reserved {
                warn!("Ignoring configured queue {}: the name is reserved", queue.name);
            }
            !reserved
        });
        for queue in &mut self.queues {
            if queue.max_concurrency == 0 {
                warn!("Queue {} max_concurrency of 0 raised to 1", queue.name);
                queue.max_concurrency = 1;
            }
        }
        if self.primary_queue_name.trim().is_empty()
            || self.primary_queue_name == IMMEDIATE_QUEUE_NAME
        {
            warn!(
                "Primary queue name {:?} replaced with {}",
                self.primary_queue_name, DEFAULT_PRIMARY_QUEUE
            );
            self.primary_queue_name = DEFAULT_PRIMARY_QUEUE.to_string();
        }
        self
    }

    /// Concurrency bound for a queue name: its configured bound, or the default
    pub fn concurrency_for(&self, name: &str) -> usize {
        self.queues
            .iter()
            .find(|q| q.name == name)
            .map(|q| q.max_concurrency)
            .unwrap_or(self.default_concurrency)
    }

    /// Fetcher configuration derived from these settings
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            user_agent: self.user_agent.clone(),
            verify_images: self.verify_images,
        }
    }
}
