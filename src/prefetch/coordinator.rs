use crate::prefetch::context::PrefetchContext;
use crate::queue::{
    normalize_url, Priority, QueueEvent, QueueStats, SubmitOutcome, TaskRecord, IMMEDIATE_QUEUE_NAME,
};
use crate::utils::error::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Entry point for prefetch requests
///
/// Normal requests go to a named queue in the context's registry; immediate
/// requests go to the context's dedicated immediate queue so they never
/// wait behind bulk prefetch backlog. Every call returns without waiting
/// for a fetch.
#[derive(Clone)]
pub struct PrefetchCoordinator {
    context: Arc<PrefetchContext>,
}

impl PrefetchCoordinator {
    pub fn new(context: Arc<PrefetchContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<PrefetchContext> {
        &self.context
    }

    /// Warm `url` in `queue_name`, or in the primary queue when `None`
    pub fn prefetch(&self, url: &str, queue_name: Option<&str>) -> Result<SubmitOutcome> {
        let name = self.resolve(queue_name);
        let task = TaskRecord::new(url, name.as_str(), Priority::Normal)?;
        let max_concurrency = self.context.settings().concurrency_for(&name);

        loop {
            let queue = self.context.registry().get_or_create(&name, max_concurrency)?;
            match queue.submit(task.clone()) {
                SubmitOutcome::Closed => {
                    debug!("Queue {} was removed during submit, retrying", name);
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Warm `url` ahead of any bulk prefetch work
    pub fn prefetch_immediate(&self, url: &str) -> Result<SubmitOutcome> {
        let task = TaskRecord::new(url, IMMEDIATE_QUEUE_NAME, Priority::Immediate)?;
        Ok(self.context.immediate_queue().submit(task))
    }

    /// Cancel one pending URL. Unknown queues and in-flight URLs are left alone.
    pub fn cancel(&self, url: &str, queue_name: Option<&str>) -> Result<bool> {
        let key = normalize_url(url)?;
        let name = self.resolve(queue_name);
        Ok(self
            .context
            .registry()
            .get(&name)
            .map(|queue| queue.cancel(&key))
            .unwrap_or(false))
    }

    /// Cancel every pending task in a queue and return how many were dropped
    pub fn cancel_all(&self, queue_name: Option<&str>) -> usize {
        let name = self.resolve(queue_name);
        match self.context.registry().get(&name) {
            Some(queue) => queue.cancel_all(),
            None => {
                debug!("cancel_all on unknown queue {}", name);
                0
            }
        }
    }

    pub fn set_primary_queue_name(&self, name: impl Into<String>) {
        self.context.set_primary_queue_name(name);
    }

    pub fn primary_queue_name(&self) -> String {
        self.context.primary_queue_name()
    }

    pub fn stats(&self, queue_name: Option<&str>) -> Option<QueueStats> {
        let name = self.resolve(queue_name);
        self.context.registry().get(&name).map(|queue| queue.stats())
    }

    pub fn immediate_stats(&self) -> QueueStats {
        self.context.immediate_queue().stats()
    }

    /// Stats for every named queue, sorted by name
    pub fn all_stats(&self) -> Vec<QueueStats> {
        let registry = self.context.registry();
        registry
            .names()
            .iter()
            .filter_map(|name| registry.get(name))
            .map(|queue| queue.stats())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.context.subscribe()
    }

    fn resolve(&self, queue_name: Option<&str>) -> String {
        match queue_name {
            Some(name) => name.to_string(),
            None => self.context.primary_queue_name(),
        }
    }
}
