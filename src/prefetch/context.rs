use crate::fetcher::Fetcher;
use crate::queue::{NamedQueue, QueueEvent, QueueRegistry, IMMEDIATE_QUEUE_NAME};
use crate::utils::config::PrefetchSettings;
use crate::utils::error::{PrefetchError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::info;

const EVENT_CAPACITY: usize = 1024;

/// State shared by every prefetch caller in an application
///
/// Owns the queue registry, the immediate queue and the primary queue name.
/// The embedding application creates it, hands it to one or more
/// [`PrefetchCoordinator`](crate::prefetch::PrefetchCoordinator)s and calls
/// [`PrefetchContext::shutdown`] when done.
pub struct PrefetchContext {
    settings: PrefetchSettings,
    registry: QueueRegistry,
    immediate: Arc<NamedQueue>,
    primary_queue_name: RwLock<String>,
    events: broadcast::Sender<QueueEvent>,
}

impl PrefetchContext {
    /// Create a context on the current Tokio runtime
    pub fn new(settings: PrefetchSettings, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| PrefetchError::NoRuntime)?;
        Self::with_runtime(settings, fetcher, runtime)
    }

    /// Create a context whose fetches run on `runtime`
    pub fn with_runtime(
        settings: PrefetchSettings,
        fetcher: Arc<dyn Fetcher>,
        runtime: Handle,
    ) -> Result<Self> {
        let settings = settings.sanitized();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let registry = QueueRegistry::new(Arc::clone(&fetcher), runtime.clone(), events.clone());
        for queue in &settings.queues {
            registry.get_or_create(&queue.name, queue.max_concurrency)?;
        }

        let immediate = NamedQueue::new(
            IMMEDIATE_QUEUE_NAME,
            settings.immediate_concurrency,
            fetcher,
            runtime,
            events.clone(),
        );

        info!(
            "Prefetch context ready: {} configured queues, primary queue {}",
            settings.queues.len(),
            settings.primary_queue_name
        );

        Ok(Self {
            primary_queue_name: RwLock::new(settings.primary_queue_name.clone()),
            settings,
            registry,
            immediate,
            events,
        })
    }

    pub fn settings(&self) -> &PrefetchSettings {
        &self.settings
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn immediate_queue(&self) -> &Arc<NamedQueue> {
        &self.immediate
    }

    pub fn primary_queue_name(&self) -> String {
        self.primary_queue_name.read().clone()
    }

    pub fn set_primary_queue_name(&self, name: impl Into<String>) {
        let name = name.into();
        info!("Primary queue set to {}", name);
        *self.primary_queue_name.write() = name;
    }

    /// Subscribe to events from every queue in this context
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Drain and remove every named queue, then drain the immediate queue
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down prefetch context");
        self.registry.shutdown().await?;
        self.immediate.drain().await;
        info!("Prefetch context shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::QueueSettings;
    use crate::utils::error::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct InstantFetcher;

    #[async_trait]
    impl Fetcher for InstantFetcher {
        async fn fetch(&self, _url: &str) -> std::result::Result<Bytes, FetchError> {
            Ok(Bytes::from_static(b"img"))
        }
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = PrefetchContext::new(PrefetchSettings::default(), Arc::new(InstantFetcher));
        assert!(matches!(result, Err(PrefetchError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_configured_queues_created_up_front() {
        let settings = PrefetchSettings {
            queues: vec![
                QueueSettings::new("thumbnails", 2),
                QueueSettings::new("avatars", 0),
            ],
            immediate_concurrency: 1,
            ..Default::default()
        };
        let context = PrefetchContext::new(settings, Arc::new(InstantFetcher)).unwrap();

        assert_eq!(context.registry().names(), vec!["avatars", "thumbnails"]);
        let thumbnails = context.registry().get("thumbnails").unwrap();
        assert_eq!(thumbnails.max_concurrency(), 2);
        // zero bounds are raised to 1
        assert_eq!(context.registry().get("avatars").unwrap().max_concurrency(), 1);
        assert_eq!(context.immediate_queue().max_concurrency(), 1);
        assert_eq!(context.immediate_queue().name(), IMMEDIATE_QUEUE_NAME);
    }

    #[tokio::test]
    async fn test_primary_queue_name_round_trip() {
        let context = PrefetchContext::new(PrefetchSettings::default(), Arc::new(InstantFetcher)).unwrap();
        assert_eq!(context.primary_queue_name(), "default");

        context.set_primary_queue_name("feed");
        assert_eq!(context.primary_queue_name(), "feed");
    }

    #[tokio::test]
    async fn test_shutdown_removes_queues() {
        let settings = PrefetchSettings {
            queues: vec![QueueSettings::new("thumbnails", 2)],
            ..Default::default()
        };
        let context = PrefetchContext::new(settings, Arc::new(InstantFetcher)).unwrap();
        context.shutdown().await.unwrap();
        assert!(context.registry().is_empty());
    }
}
