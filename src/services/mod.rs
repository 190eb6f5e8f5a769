//! Worker services: job queue consumption and the acquisition loop.

pub mod queue;
pub mod worker;

pub use queue::{JobMessage, JobQueue, QueueError};
pub use worker::JobWorker;
