//! Prefetch task records

use crate::utils::error::PrefetchError;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Immediate,
}

/// One requested image fetch
///
/// Immutable once built. `key` is the normalized URL and identifies the
/// fetch target inside its queue.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    id: Uuid,
    url: String,
    key: String,
    queue_name: String,
    priority: Priority,
}

impl TaskRecord {
    /// Create a task, rejecting URLs that do not parse as absolute URLs
    pub fn new(
        url: impl Into<String>,
        queue_name: impl Into<String>,
        priority: Priority,
    ) -> Result<Self, PrefetchError> {
        let url = url.into();
        let key = normalize_url(&url)?;

        Ok(Self {
            id: Uuid::new_v4(),
            url,
            key,
            queue_name: queue_name.into(),
            priority,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// URL as supplied by the caller
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl PartialEq for TaskRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.queue_name == other.queue_name
    }
}

impl Eq for TaskRecord {}

/// Derive the dedup key for a URL
///
/// Scheme and host are lower-cased, default ports dropped and the fragment
/// removed. Query strings are kept since they usually select a rendition.
pub fn normalize_url(raw: &str) -> Result<String, PrefetchError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| {
        PrefetchError::InvalidUrl(format!("{}: {}", trimmed, e))
    })?;
    if url.cannot_be_a_base() && url.scheme() != "data" {
        return Err(PrefetchError::InvalidUrl(trimmed.to_string()));
    }
    url.set_fragment(None);
    Ok(url.into())
}
