//! Configuration and error types

pub mod config;
pub mod error;

// Re-export for convenience
pub use config::{PrefetchSettings, QueueSettings};
pub use error::{FetchError, PrefetchError};
