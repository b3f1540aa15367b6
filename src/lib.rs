//! fastprefetch library
//!
//! Named, bounded-concurrency image prefetch queues with request
//! coalescing and a dedicated immediate queue for interactive requests.

pub mod fetcher;
pub mod prefetch;
pub mod queue;
pub mod utils;

// Re-export main types for easier use
pub use fetcher::{FetchConfig, Fetcher, HttpFetcher};
pub use prefetch::{PrefetchContext, PrefetchCoordinator};
pub use queue::{
    EventLog, NamedQueue, Priority, QueueEvent, QueueRegistry, QueueStats, SubmitOutcome,
    TaskRecord, IMMEDIATE_QUEUE_NAME,
};
pub use utils::{FetchError, PrefetchError, PrefetchSettings, QueueSettings};
