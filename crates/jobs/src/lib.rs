//! Background job execution with live progress fan-out.
//!
//! Provides:
//! - `StagePlan` - ordered, weighted stages whose weights sum to 100
//! - `JobRunner` - runs a plan and publishes progress events
//! - `ProgressBus` - per-job pub/sub with bounded, drop-oldest mailboxes
//! - `JobRegistry` - live jobs keyed by id
//! - `JobStore` - where a job's final state outlives its bus
//! - `JobScheduler` - submission, bounded concurrency, bus teardown

pub mod bus;
pub mod plan;
pub mod record;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use bus::{BusError, ProgressBus, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use plan::{stage_fn, PlanError, Stage, StageContext, StageError, StagePlan, StageWork};
pub use record::{JobOutcome, JobRecord};
pub use registry::{JobEntry, JobRegistry};
pub use runner::JobRunner;
pub use scheduler::{JobScheduler, SchedulerConfig, SchedulerError};
pub use store::{JobStore, MemoryJobStore, StoreError};
