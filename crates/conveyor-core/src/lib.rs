//! Conveyor Core
//!
//! Core domain types for the Conveyor workflow engine: typed execution
//! results and contexts, run identifiers, the error taxonomy, string
//! interpolation, and the `Stage` contract consumed by the orchestrator.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the workflow and CLI crates.

pub mod context;
pub mod error;
pub mod ids;
pub mod interpolate;
pub mod registry;
pub mod result;
pub mod stage;

pub use context::{Variant, VariantContext, WorkflowContext};
pub use error::{ConfigError, JobError, PipelineError, StageError, UtilityError};
pub use ids::RunId;
pub use result::{JobOutput, JobResult, PipelineResult, StageOutput, Status, VariantResult};
pub use stage::Stage;
