//! Recurring migration jobs
//!
//! A job pairs a migration config file with a [`Trigger`]. Jobs are kept in a
//! [`JobStore`] and executed one at a time by the [`Scheduler`] through the
//! [`Migrator`] registered for their [`JobKind`].

mod registry;
mod scheduler;
mod store;
mod trigger;

pub use registry::{JobKind, Migrator, MigratorRegistry};
pub use scheduler::Scheduler;
pub use store::{InMemoryJobStore, JobConfig, JobStatus, JobStore, JsonFileJobStore};
pub use trigger::{CronSchedule, IntervalUnit, Trigger, next_fire_time};

/// Job management errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    AlreadyExists(String),

    #[error("job id must not be empty")]
    EmptyId,

    #[error("no migrator registered for {0}")]
    NoMigrator(JobKind),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}
