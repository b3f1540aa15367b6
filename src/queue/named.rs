//! Bounded-concurrency prefetch queue

use crate::fetcher::Fetcher;
use crate::queue::events::QueueEvent;
use crate::queue::task::TaskRecord;
use crate::utils::error::FetchError;
use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Result of submitting a task to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The fetch started right away
    Started,
    /// The task waits in the pending FIFO
    Queued,
    /// The key was already in flight or pending; nothing was added
    DuplicateSuppressed,
    /// The queue was removed from its registry
    Closed,
}

/// Snapshot of a queue's state and counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub max_concurrency: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub suppressed: u64,
}

/// Identifies one dispatched fetch
///
/// Completion is accepted only for the ticket currently registered for the
/// key, so a repeated or stale completion cannot free somebody else's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    key: String,
    id: u64,
}

#[derive(Default)]
struct QueueState {
    in_flight: HashMap<String, u64>,
    pending: VecDeque<TaskRecord>,
    pending_set: HashSet<String>,
    closed: bool,
    completed: u64,
    failed: u64,
    cancelled: u64,
    suppressed: u64,
}

impl QueueState {
    fn contains(&self, key: &str) -> bool {
        self.in_flight.contains_key(key) || self.pending_set.contains(key)
    }

    fn push_pending(&mut self, task: TaskRecord) {
        self.pending_set.insert(task.key().to_string());
        self.pending.push_back(task);
    }

    fn pop_pending(&mut self) -> Option<TaskRecord> {
        let task = self.pending.pop_front()?;
        self.pending_set.remove(task.key());
        Some(task)
    }

    fn outstanding(&self) -> usize {
        self.in_flight.len() + self.pending.len()
    }
}

/// Prefetch queue with a fixed concurrency bound
///
/// At most `max_concurrency` fetches run at once; further tasks wait in a
/// FIFO and are promoted one by one as fetches complete. A key is never in
/// flight and pending at the same time.
pub struct NamedQueue {
    name: String,
    max_concurrency: usize,
    state: Mutex<QueueState>,
    fetcher: Arc<dyn Fetcher>,
    runtime: Handle,
    events: broadcast::Sender<QueueEvent>,
    outstanding: watch::Sender<usize>,
    next_ticket: AtomicU64,
}

impl NamedQueue {
    /// Create new queue. `max_concurrency` must be above zero.
    pub(crate) fn new(
        name: impl Into<String>,
        max_concurrency: usize,
        fetcher: Arc<dyn Fetcher>,
        runtime: Handle,
        events: broadcast::Sender<QueueEvent>,
    ) -> Arc<Self> {
        let (outstanding, _) = watch::channel(0);
        Arc::new(Self {
            name: name.into(),
            max_concurrency,
            state: Mutex::new(QueueState::default()),
            fetcher,
            runtime,
            events,
            outstanding,
            next_ticket: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Submit a task without waiting for its fetch
    pub fn submit(self: &Arc<Self>, task: TaskRecord) -> SubmitOutcome {
        let mut state = self.state.lock();

        if state.closed {
            debug!("Queue {} is closed, rejecting {}", self.name, task.key());
            return SubmitOutcome::Closed;
        }

        if state.contains(task.key()) {
            state.suppressed += 1;
            drop(state);
            debug!("Duplicate prefetch of {} in queue {} suppressed", task.key(), self.name);
            self.emit(QueueEvent::DuplicateSuppressed {
                queue: self.name.clone(),
                key: task.key().to_string(),
                timestamp: Utc::now(),
            });
            return SubmitOutcome::DuplicateSuppressed;
        }

        if state.in_flight.len() < self.max_concurrency {
            let ticket = self.admit(&mut state, &task);
            drop(state);
            self.spawn_fetch(ticket, task);
            return SubmitOutcome::Started;
        }

        let key = task.key().to_string();
        state.push_pending(task);
        self.publish_outstanding(&state);
        drop(state);

        debug!("Queued {} in queue {}", key, self.name);
        self.emit(QueueEvent::TaskQueued {
            queue: self.name.clone(),
            key,
            timestamp: Utc::now(),
        });
        SubmitOutcome::Queued
    }

    /// Remove a pending task. In-flight and unknown keys are left alone.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            if !state.pending_set.remove(key) {
                return false;
            }
            if let Some(pos) = state.pending.iter().position(|t| t.key() == key) {
                state.pending.remove(pos);
            }
            state.cancelled += 1;
            self.publish_outstanding(&state);
            true
        };

        debug!("Cancelled pending {} in queue {}", key, self.name);
        self.emit(QueueEvent::TaskCancelled {
            queue: self.name.clone(),
            key: key.to_string(),
            timestamp: Utc::now(),
        });
        removed
    }

    /// Remove every pending task and return how many were dropped
    pub fn cancel_all(&self) -> usize {
        let dropped: Vec<TaskRecord> = {
            let mut state = self.state.lock();
            let dropped: Vec<TaskRecord> = state.pending.drain(..).collect();
            state.pending_set.clear();
            state.cancelled += dropped.len() as u64;
            self.publish_outstanding(&state);
            dropped
        };

        if !dropped.is_empty() {
            info!("Cancelled {} pending tasks in queue {}", dropped.len(), self.name);
        }
        for task in &dropped {
            self.emit(QueueEvent::TaskCancelled {
                queue: self.name.clone(),
                key: task.key().to_string(),
                timestamp: Utc::now(),
            });
        }
        dropped.len()
    }

    /// Wait until nothing is in flight or pending
    pub async fn drain(&self) {
        let mut receiver = self.outstanding.subscribe();
        // the sender lives as long as `self`, so this only returns once idle
        let _ = receiver.wait_for(|outstanding| *outstanding == 0).await;
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().outstanding() == 0
    }

    /// Keys currently being fetched, sorted
    pub fn in_flight_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().in_flight.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Pending keys in dispatch order
    pub fn pending_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|t| t.key().to_string())
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            name: self.name.clone(),
            max_concurrency: self.max_concurrency,
            in_flight: state.in_flight.len(),
            pending: state.pending.len(),
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            suppressed: state.suppressed,
        }
    }

    /// Close the queue if it is idle; otherwise report what is outstanding
    pub(crate) fn try_close(&self) -> Result<(), (usize, usize)> {
        let mut state = self.state.lock();
        if state.outstanding() > 0 {
            return Err((state.in_flight.len(), state.pending.len()));
        }
        state.closed = true;
        Ok(())
    }

    /// Settle a dispatched fetch and refill the freed slot from the FIFO
    ///
    /// Returns false when the ticket is no longer registered, which means
    /// the completion already happened.
    pub(crate) fn on_fetch_complete(
        self: &Arc<Self>,
        ticket: &FetchTicket,
        result: Result<Bytes, FetchError>,
    ) -> bool {
        let next = {
            let mut state = self.state.lock();
            if state.in_flight.get(&ticket.key) != Some(&ticket.id) {
                drop(state);
                warn!(
                    "Ignoring repeated completion of {} in queue {}",
                    ticket.key, self.name
                );
                return false;
            }
            state.in_flight.remove(&ticket.key);
            match result {
                Ok(_) => state.completed += 1,
                Err(_) => state.failed += 1,
            }

            let next = state.pop_pending().map(|task| {
                let ticket = self.admit(&mut state, &task);
                (ticket, task)
            });
            self.publish_outstanding(&state);
            next
        };

        match &result {
            Ok(body) => {
                debug!("Prefetched {} in queue {}", ticket.key, self.name);
                self.emit(QueueEvent::TaskCompleted {
                    queue: self.name.clone(),
                    key: ticket.key.clone(),
                    bytes: body.len(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!("Prefetch of {} in queue {} failed: {}", ticket.key, self.name, e);
                self.emit(QueueEvent::TaskFailed {
                    queue: self.name.clone(),
                    key: ticket.key.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        if let Some((ticket, task)) = next {
            self.spawn_fetch(ticket, task);
        }
        true
    }

    /// Register a task as in flight. Caller holds the state lock.
    fn admit(&self, state: &mut QueueState, task: &TaskRecord) -> FetchTicket {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        state.in_flight.insert(task.key().to_string(), id);
        self.publish_outstanding(state);
        FetchTicket {
            key: task.key().to_string(),
            id,
        }
    }

    fn spawn_fetch(self: &Arc<Self>, ticket: FetchTicket, task: TaskRecord) {
        debug!("Starting fetch of {} in queue {}", task.key(), self.name);
        self.emit(QueueEvent::TaskStarted {
            queue: self.name.clone(),
            key: task.key().to_string(),
            url: task.url().to_string(),
            timestamp: Utc::now(),
        });

        // built outside the future so it settles even if the task is never polled
        let guard = CompletionGuard {
            queue: Arc::clone(self),
            ticket: Some(ticket),
        };
        let fetcher = Arc::clone(&self.fetcher);
        self.runtime.spawn(async move {
            let result = AssertUnwindSafe(fetcher.fetch(task.url()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(FetchError::Panicked(panic_message(panic))));
            guard.settle(result);
        });
    }

    fn publish_outstanding(&self, state: &QueueState) {
        self.outstanding.send_replace(state.outstanding());
    }

    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Settles a dispatched fetch exactly once
///
/// A fetch task dropped before finishing (its runtime shut down, or spawn
/// hit a runtime that is already gone) still frees its slot, as a failure.
struct CompletionGuard {
    queue: Arc<NamedQueue>,
    ticket: Option<FetchTicket>,
}

impl CompletionGuard {
    fn settle(mut self, result: Result<Bytes, FetchError>) {
        if let Some(ticket) = self.ticket.take() {
            self.queue.on_fetch_complete(&ticket, result);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.queue.on_fetch_complete(
                &ticket,
                Err(FetchError::Network("fetch task dropped".to_string())),
            );
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
