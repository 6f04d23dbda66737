//! Execution contexts handed down through a pipeline run.
//!
//! Contexts are values, not shared references: every unit that may run in
//! parallel receives its own clone and merges results back only after it
//! completes, so no locking is needed anywhere in the execution path.

use crate::result::{JobOutput, StageOutput};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// One concrete parameter combination produced by matrix expansion.
pub type Variant = IndexMap<String, Value>;

/// Deterministic id for a variant, used to key merged results.
///
/// The empty variant is named `default`; otherwise keys render in matrix
/// order as `k=v` pairs. The rendering is injective over values, so two
/// distinct variants never share a key.
pub fn variant_key(variant: &Variant) -> String {
    if variant.is_empty() {
        return "default".to_string();
    }
    variant
        .iter()
        .map(|(k, v)| format!("{k}={}", render_key_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Plain strings render bare for readability; a string that itself reads
/// as a JSON literal keeps its quotes, so `"1"` and `1` cannot collide.
fn render_key_value(value: &Value) -> String {
    match value {
        Value::String(s) if serde_json::from_str::<Value>(s).is_err() => s.clone(),
        other => other.to_string(),
    }
}

/// Context shared across the jobs of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowContext {
    pub params: IndexMap<String, Value>,
    pub jobs: IndexMap<String, JobOutput>,
}

impl WorkflowContext {
    pub fn new(params: IndexMap<String, Value>) -> Self {
        Self {
            params,
            jobs: IndexMap::new(),
        }
    }
}

/// Working context of one variant execution: the run's params and upstream
/// job outputs, this variant's matrix values, and the outputs of the stages
/// that have run so far, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariantContext {
    pub params: IndexMap<String, Value>,
    pub jobs: IndexMap<String, JobOutput>,
    pub matrix: Variant,
    pub stages: IndexMap<String, StageOutput>,
}

impl VariantContext {
    pub fn from_workflow(ctx: &WorkflowContext, matrix: Variant) -> Self {
        Self {
            params: ctx.params.clone(),
            jobs: ctx.jobs.clone(),
            matrix,
            stages: IndexMap::new(),
        }
    }

    /// Merge a completed stage's outputs under its id.
    pub fn push_stage(&mut self, stage_id: &str, output: StageOutput) {
        self.stages.insert(stage_id.to_string(), output);
    }

    /// Resolve a dotted path (`params.x`, `matrix.os`,
    /// `stages.build.outputs.bin`, `jobs.a.stages.s.outputs.k`).
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let head = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        match head {
            "params" => dig_map(&self.params, &rest),
            "matrix" => dig_map(&self.matrix, &rest),
            "stages" => {
                let (stage_id, tail) = rest.split_first()?;
                let output = self.stages.get(*stage_id)?;
                let value = serde_json::to_value(output).ok()?;
                dig(&value, tail)
            }
            "jobs" => {
                let (job_id, tail) = rest.split_first()?;
                let value = self.jobs.get(*job_id)?.to_value();
                dig(&value, tail)
            }
            _ => None,
        }
    }
}

fn dig_map(map: &IndexMap<String, Value>, parts: &[&str]) -> Option<Value> {
    let (head, tail) = parts.split_first()?;
    dig(map.get(*head)?, tail)
}

/// Walk a JSON value along the remaining path segments.
pub fn dig(value: &Value, parts: &[&str]) -> Option<Value> {
    let mut current = value;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current.clone())
}
