//! Error taxonomy for Conveyor.
//!
//! Failures are layered the way execution is layered: a stage failure is
//! local to its variant, a variant failure is recorded by its job, and a job
//! failure aborts the owning pipeline run. Configuration problems are caught
//! before any execution begins and surface as `ConfigError`.

use thiserror::Error;

/// Raised by a stage's own logic during `Stage::execute`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("command exited with code {code}: {message}")]
    CommandFailed { code: i32, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("utility error: {0}")]
    Utility(#[from] UtilityError),

    #[error("{0}")]
    Failed(String),
}

/// Raised by shared helper code invoked during stage execution.
#[derive(Debug, Error)]
pub enum UtilityError {
    #[error("unresolved placeholder: ${{{{ {0} }}}}")]
    UnresolvedPlaceholder(String),

    #[error("{0}")]
    Other(String),
}

/// Raised by a job when a stage in one of its variants fails. Always carries
/// the original error kind and message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("stage execution error: {0}")]
    Stage(#[from] StageError),

    #[error("utility error: {0}")]
    Utility(#[from] UtilityError),

    #[error("{0}")]
    Failed(String),
}

/// Raised by the pipeline engine, either wrapping a failed job or directly
/// for an execution-level problem.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job {job}: {source}")]
    Job {
        job: String,
        #[source]
        source: JobError,
    },

    #[error("required params on pipeline {pipeline} are not set: {missing:?}")]
    MissingParams {
        pipeline: String,
        missing: Vec<String>,
    },

    #[error("job {job} does not exist in pipeline {pipeline}")]
    UnknownJob { job: String, pipeline: String },

    #[error("execution of pipeline {0} timed out")]
    Timeout(String),
}

/// Configuration problems detected at construction or load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown stage kind: {0}")]
    UnknownStageKind(String),

    #[error("include entry {0} should have keys equal to a matrix variant")]
    InvalidInclude(String),

    #[error("max-parallel must be greater than zero")]
    InvalidMaxParallel,

    #[error("pipeline name should not contain a template placeholder: {0}")]
    TemplatedName(String),

    #[error("job id should not contain a template placeholder: {0}")]
    TemplatedJobId(String),

    #[error("needed jobs {missing:?} do not exist in pipeline {pipeline}")]
    UnknownNeeds {
        pipeline: String,
        missing: Vec<String>,
    },

    #[error("invalid cron expression {expr}: {message}")]
    InvalidCron { expr: String, message: String },

    #[error("cycle detected in job dependencies")]
    CycleDetected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pipeline file: {0}")]
    Parse(String),
}
