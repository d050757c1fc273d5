//! # Pricegrid Queue
//!
//! Durable, at-least-once background job queue for the storefront backend.
//!
//! Features:
//! - Pluggable [`JobStore`] with an atomic claim (memory here, SQLite in
//!   `pricegrid-persist`)
//! - Typed handler registry validated at startup
//! - Retry with exponential backoff (`2^attempts` seconds) up to `max_attempts`
//! - Optional invoker loops ([`Worker`]); the engine itself never polls
//!
//! Handlers run at least once per successful job, so they must be idempotent.

pub mod config;
pub mod engine;
pub mod job;
pub mod memory;
pub mod registry;
pub mod store;
pub mod worker;

pub use config::QueueConfig;
pub use engine::{EnqueueOptions, JobQueue, ProcessOutcome};
pub use job::{BackoffStrategy, JobFilter, JobId, JobRecord, JobResult, JobStatus, JobUpdate, NewJob};
pub use memory::MemoryJobStore;
pub use registry::{FnHandler, HandlerRegistry, JobHandler};
pub use store::{JobStore, QueueError, StaleClaims};
pub use worker::{Worker, WorkerConfig, WorkerStats};
