pub mod events;
pub mod named;
pub mod registry;
pub mod task;

pub use events::{EventLog, QueueEvent};
pub use named::{NamedQueue, QueueStats, SubmitOutcome};
pub use registry::{QueueRegistry, IMMEDIATE_QUEUE_NAME};
pub use task::{normalize_url, Priority, TaskRecord};
