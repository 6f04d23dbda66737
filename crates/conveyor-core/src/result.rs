//! Typed execution results.
//!
//! Each execution layer reports its own result type instead of one untyped
//! nested map: a stage produces a [`StageOutput`], a matrix variant a
//! [`VariantResult`], a job a [`JobResult`], and a pipeline run a
//! [`PipelineResult`]. The open-ended `outputs` bag lives only at the stage
//! layer where user-defined keys are genuinely free-form.

use crate::context::Variant;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of one execution unit. Maps to exit codes 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
        }
    }

    /// Combine with another status; any failure wins.
    pub fn and(self, other: Status) -> Status {
        if self.is_success() && other.is_success() {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Outputs produced by a single stage execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.outputs.insert(key.into(), value);
    }
}

/// The context one variant leaves behind: its matrix values and the outputs
/// of the stages that ran, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantOutput {
    #[serde(default)]
    pub matrix: Variant,
    #[serde(default)]
    pub stages: IndexMap<String, StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing all stages of a job for one matrix variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantResult {
    /// Deterministic id derived from the variant, used as the merge key so
    /// parallel variants never collide.
    pub key: String,
    pub status: Status,
    pub output: VariantOutput,
}

/// Aggregated result of a job execution across all of its variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: Status,
    pub variants: IndexMap<String, VariantOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// Fold a variant result into the aggregate.
    pub fn absorb(&mut self, variant: VariantResult) {
        self.status = self.status.and(variant.status);
        self.variants.insert(variant.key, variant.output);
    }

    /// The downstream-facing view of this job's outputs. More than one
    /// variant is wrapped under `strategies`; a single variant is exposed
    /// flat so callers see no fan-out when there effectively was none.
    pub fn into_output(self) -> JobOutput {
        let mut variants = self.variants;
        if variants.len() == 1 {
            if let Some((_, output)) = variants.pop() {
                return JobOutput::Single(output);
            }
        }
        JobOutput::Strategies {
            strategies: variants,
        }
    }
}

impl Default for JobResult {
    fn default() -> Self {
        Self {
            status: Status::Success,
            variants: IndexMap::new(),
            error: None,
        }
    }
}

/// A completed job's contribution to the shared `jobs` context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Strategies {
        strategies: IndexMap<String, VariantOutput>,
    },
    Single(VariantOutput),
}

impl JobOutput {
    /// The single variant output, if the job had no effective fan-out.
    pub fn single(&self) -> Option<&VariantOutput> {
        match self {
            JobOutput::Single(output) => Some(output),
            JobOutput::Strategies { .. } => None,
        }
    }

    /// View as a JSON value for dotted-path lookups.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: Status,
    pub params: IndexMap<String, Value>,
    pub jobs: IndexMap<String, JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
