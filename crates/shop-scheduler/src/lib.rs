//! Process-level scheduler for recurring jobs.

mod job;
mod scheduler;

pub use job::{JobDefinition, JobError, JobHandler, JobInfo, JobStatus};
pub use scheduler::{Scheduler, SchedulerError};
