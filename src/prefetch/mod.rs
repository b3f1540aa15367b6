//! Public prefetch entry points

pub mod context;
pub mod coordinator;

pub use context::PrefetchContext;
pub use coordinator::PrefetchCoordinator;
