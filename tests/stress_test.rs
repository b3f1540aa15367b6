//! Stress tests for the prefetch queues
//!
//! These hammer the queues from many tasks at once and check, after every
//! step, the invariants the rest of the crate relies on:
//! A - Concurrency bound: in_flight <= max_concurrency
//! B - Dedup: a key is never in flight and pending at the same time
//! C - No duplicate fetches for a key while it is active
//! D - Eventual progress: every admitted task is fetched or cancelled

mod common;

use common::{coordinator_with, image_url, GatedFetcher, WAIT};
use fastprefetch::{NamedQueue, PrefetchSettings, QueueSettings};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn check_invariants(queue: &NamedQueue) -> Result<(), String> {
    let stats = queue.stats();
    if stats.in_flight > stats.max_concurrency {
        return Err(format!(
            "INVARIANT A VIOLATED: {} in flight, max_concurrency = {}",
            stats.in_flight, stats.max_concurrency
        ));
    }

    let in_flight: HashSet<String> = queue.in_flight_keys().into_iter().collect();
    let pending = queue.pending_keys();
    let mut seen = HashSet::new();
    for key in &pending {
        if in_flight.contains(key) {
            return Err(format!("INVARIANT B VIOLATED: {} in flight and pending", key));
        }
        if !seen.insert(key) {
            return Err(format!("INVARIANT B VIOLATED: {} pending twice", key));
        }
    }
    Ok(())
}

/// Random submit/cancel/release traffic against a small queue
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_random_operations() {
    const MAX_CONCURRENT: usize = 3;
    const NUM_URLS: usize = 40;
    const ROUNDS: usize = 300;

    let fetcher = GatedFetcher::new();
    let coordinator = coordinator_with(
        PrefetchSettings {
            queues: vec![QueueSettings::new("stress", MAX_CONCURRENT)],
            ..Default::default()
        },
        fetcher.clone(),
    );
    let queue = coordinator.context().registry().get("stress").unwrap();
    let urls: Vec<String> = (0..NUM_URLS).map(|i| image_url(&format!("stress-{}", i))).collect();

    let mut rng = rand::thread_rng();
    for round in 0..ROUNDS {
        let url = &urls[rng.gen_range(0..NUM_URLS)];
        match rng.gen_range(0..4) {
            0 | 1 => {
                coordinator.prefetch(url, Some("stress")).unwrap();
            }
            2 => {
                let _ = coordinator.cancel(url, Some("stress"));
            }
            _ => fetcher.release(url),
        }

        check_invariants(&queue).unwrap_or_else(|e| panic!("round {}: {}", round, e));

        if rng.gen_bool(0.2) {
            sleep(Duration::from_millis(rng.gen_range(1..3))).await;
        }
        tokio::task::yield_now().await;
    }

    // let everything finish
    coordinator.cancel_all(Some("stress"));
    for url in &urls {
        for _ in 0..MAX_CONCURRENT {
            fetcher.release(url);
        }
    }
    timeout(WAIT, queue.drain()).await.expect("queue drains");
    check_invariants(&queue).expect("final invariants");

    let stats = queue.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(
        stats.completed as usize,
        fetcher.calls().len(),
        "every started fetch completes exactly once"
    );
}

/// Many tasks submitting the same URLs concurrently yield one fetch per URL
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_duplicate_submits() {
    const SUBMITTERS: usize = 16;
    const NUM_URLS: usize = 10;

    let fetcher = GatedFetcher::new();
    let coordinator = coordinator_with(
        PrefetchSettings {
            queues: vec![QueueSettings::new("dups", 2)],
            ..Default::default()
        },
        fetcher.clone(),
    );
    let urls: Arc<Vec<String>> =
        Arc::new((0..NUM_URLS).map(|i| image_url(&format!("dup-{}", i))).collect());

    let mut handles = Vec::new();
    for _ in 0..SUBMITTERS {
        let coordinator = coordinator.clone();
        let urls = Arc::clone(&urls);
        handles.push(tokio::spawn(async move {
            for url in urls.iter() {
                coordinator.prefetch(url, Some("dups")).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let queue = coordinator.context().registry().get("dups").unwrap();
    check_invariants(&queue).unwrap();

    fetcher.release_all(&urls);
    timeout(WAIT, queue.drain()).await.expect("queue drains");

    for url in urls.iter() {
        assert_eq!(fetcher.call_count(url), 1, "{} fetched more than once", url);
    }
    let stats = queue.stats();
    assert_eq!(stats.completed as usize, NUM_URLS);
    assert_eq!(stats.suppressed as usize, NUM_URLS * (SUBMITTERS - 1));
}

/// Bound holds while a large backlog drains through an open fetcher
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strict_concurrency_bound_under_backlog() {
    const MAX_CONCURRENT: usize = 2;
    const NUM_TASKS: usize = 200;

    let fetcher = GatedFetcher::open();
    let coordinator = coordinator_with(
        PrefetchSettings {
            queues: vec![QueueSettings::new("bound", MAX_CONCURRENT)],
            ..Default::default()
        },
        fetcher.clone(),
    );
    for i in 0..NUM_TASKS {
        coordinator
            .prefetch(&image_url(&format!("bound-{}", i)), Some("bound"))
            .unwrap();
    }

    let queue = coordinator.context().registry().get("bound").unwrap();
    let watcher = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while !queue.is_idle() {
                check_invariants(&queue).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    timeout(WAIT, queue.drain()).await.expect("queue drains");
    watcher.await.unwrap();

    assert_eq!(queue.stats().completed as usize, NUM_TASKS);
    assert_eq!(fetcher.calls().len(), NUM_TASKS);
}
