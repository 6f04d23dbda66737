//! Conveyor workflow engine.
//!
//! Expands matrix strategies into execution variants, runs the stages of a
//! job sequentially per variant while fanning variants out over a bounded
//! worker pool, schedules whole pipelines across a `needs` dependency graph
//! under a global timeout, and drives periodic release of a pipeline against
//! cron triggers.

pub mod daemon;
pub mod dag;
pub mod job;
pub mod loader;
pub mod log;
pub mod params;
pub mod pipeline;
pub mod pool;
pub mod schedule;
pub mod settings;
pub mod strategy;
pub mod trigger;

pub use daemon::Scheduler;
pub use job::Job;
pub use loader::{from_yaml, load_pipeline};
pub use log::{FileReleaseLog, MemoryReleaseLog, ReleaseLog, ReleaseRecord};
pub use params::Param;
pub use pipeline::Pipeline;
pub use schedule::ReleaseResult;
pub use strategy::Strategy;
pub use trigger::Trigger;
