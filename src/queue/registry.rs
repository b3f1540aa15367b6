//! Name to queue table

use crate::fetcher::Fetcher;
use crate::queue::events::QueueEvent;
use crate::queue::named::NamedQueue;
use crate::utils::error::{PrefetchError, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Name reported by the immediate queue; registries never hand it out
pub const IMMEDIATE_QUEUE_NAME: &str = "immediate";

/// Registry of named prefetch queues
///
/// Queues are created on first reference and stay until they are removed
/// explicitly. Removal only succeeds for idle queues.
pub struct QueueRegistry {
    queues: Mutex<HashMap<String, Arc<NamedQueue>>>,
    fetcher: Arc<dyn Fetcher>,
    runtime: Handle,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueRegistry {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        runtime: Handle,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            fetcher,
            runtime,
            events,
        }
    }

    /// Return the queue for `name`, creating it with `max_concurrency` if new
    ///
    /// The bound is fixed by whoever creates the queue first; later calls
    /// with a different bound get the existing queue unchanged.
    pub fn get_or_create(&self, name: &str, max_concurrency: usize) -> Result<Arc<NamedQueue>> {
        if name == IMMEDIATE_QUEUE_NAME {
            return Err(PrefetchError::ReservedQueueName(name.to_string()));
        }
        if max_concurrency == 0 {
            return Err(PrefetchError::InvalidConcurrency {
                queue: name.to_string(),
            });
        }

        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get(name) {
            if queue.max_concurrency() != max_concurrency {
                debug!(
                    "Queue {} already exists with concurrency {}, ignoring requested {}",
                    name,
                    queue.max_concurrency(),
                    max_concurrency
                );
            }
            return Ok(Arc::clone(queue));
        }

        let queue = NamedQueue::new(
            name,
            max_concurrency,
            Arc::clone(&self.fetcher),
            self.runtime.clone(),
            self.events.clone(),
        );
        queues.insert(name.to_string(), Arc::clone(&queue));
        drop(queues);

        info!("Created queue {} with concurrency {}", name, max_concurrency);
        let _ = self.events.send(QueueEvent::QueueCreated {
            queue: name.to_string(),
            max_concurrency,
            timestamp: Utc::now(),
        });
        Ok(queue)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NamedQueue>> {
        self.queues.lock().get(name).cloned()
    }

    /// Queue names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }

    /// Discard an idle queue
    ///
    /// Returns `Ok(false)` for names that were never created. A queue with
    /// work in flight or pending is left in place and `Busy` is returned;
    /// call [`QueueRegistry::teardown`] to drain first.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get(name) else {
            return Ok(false);
        };

        if let Err((in_flight, pending)) = queue.try_close() {
            return Err(PrefetchError::Busy {
                queue: name.to_string(),
                in_flight,
                pending,
            });
        }
        queues.remove(name);
        drop(queues);

        info!("Removed queue {}", name);
        let _ = self.events.send(QueueEvent::QueueRemoved {
            queue: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Drain a queue and then remove it
    pub async fn teardown(&self, name: &str) -> Result<bool> {
        loop {
            let Some(queue) = self.get(name) else {
                return Ok(false);
            };
            queue.drain().await;

            match self.remove(name) {
                Err(PrefetchError::Busy { .. }) => {
                    debug!("Queue {} picked up new work while draining, draining again", name);
                }
                other => return other,
            }
        }
    }

    /// Tear down every queue
    pub async fn shutdown(&self) -> Result<()> {
        for name in self.names() {
            self.teardown(&name).await?;
        }
        Ok(())
    }
}
