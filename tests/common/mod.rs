//! Shared test fixtures: a fetcher whose calls block until released.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use fastprefetch::{FetchError, Fetcher, PrefetchContext, PrefetchCoordinator, PrefetchSettings};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};

pub const WAIT: Duration = Duration::from_secs(5);

/// Fetcher that records every call and holds each one until `release(url)`
#[derive(Default)]
pub struct GatedFetcher {
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failing: Mutex<HashSet<String>>,
    open: Mutex<bool>,
}

impl GatedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fetcher that never blocks
    pub fn open() -> Arc<Self> {
        let fetcher = Self::default();
        *fetcher.open.lock() = true;
        Arc::new(fetcher)
    }

    fn gate(&self, url: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    /// Let one pending or future fetch of `url` finish
    pub fn release(&self, url: &str) {
        self.gate(url).add_permits(1);
    }

    pub fn release_all(&self, urls: &[String]) {
        for url in urls {
            self.release(url);
        }
    }

    /// Make fetches of `url` fail
    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == url).count()
    }

    /// Wait until `url` has been fetched at least once
    pub async fn wait_for_call(&self, url: &str) {
        timeout(WAIT, async {
            while self.call_count(url) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was never fetched", url));
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.lock().push(url.to_string());

        let open = *self.open.lock();
        if !open {
            let gate = self.gate(url);
            let permit = gate
                .acquire()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            permit.forget();
        }

        if self.failing.lock().contains(url) {
            return Err(FetchError::Network("simulated failure".to_string()));
        }
        Ok(Bytes::from_static(b"\x89PNG\r\n\x1a\n"))
    }
}

pub fn coordinator_with(
    settings: PrefetchSettings,
    fetcher: Arc<GatedFetcher>,
) -> PrefetchCoordinator {
    let context = PrefetchContext::new(settings, fetcher).expect("context");
    PrefetchCoordinator::new(Arc::new(context))
}

pub fn image_url(name: &str) -> String {
    format!("https://img.example.com/{}.png", name)
}
