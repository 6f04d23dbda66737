//! The stage contract and built-in stage kinds.
//!
//! A stage is the smallest unit of executable work inside a job. The
//! orchestrator only relies on this contract: a pure skip predicate, a
//! blocking `execute`, and a copy-on-stamp `with_run_id` so an in-flight run
//! never mutates the template definition.

use crate::context::VariantContext;
use crate::error::StageError;
use crate::ids::RunId;
use crate::interpolate::{interpolate_str, interpolate_value};
use crate::result::StageOutput;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Command;
use std::sync::Arc;

pub trait Stage: Send + Sync + std::fmt::Debug {
    /// Stable id this stage's outputs are keyed by.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Pure predicate; must not block and must not touch the context.
    fn is_skipped(&self, ctx: &VariantContext) -> bool;

    /// Run the stage against the working context. May block.
    fn execute(&self, ctx: &VariantContext) -> Result<StageOutput, StageError>;

    /// Return a copy stamped with the given run id. The receiver is never
    /// mutated.
    fn with_run_id(&self, run_id: RunId) -> Arc<dyn Stage>;
}

/// Raw stage definition as authored in a pipeline file. The registry turns
/// this into a concrete [`Stage`] implementation by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    /// Message logged by `empty` stages.
    #[serde(default)]
    pub message: Option<String>,
    /// Script executed by `shell` stages.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Literal outputs produced by `set` stages, interpolated at run time.
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
}

fn default_kind() -> String {
    "empty".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

impl StageConfig {
    /// Outputs are keyed by `id` when set, falling back to `name`.
    pub fn effective_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// Evaluate an `if` condition against the context. A missing path or a
/// falsy rendering (`false`, `0`, empty, null) means the condition is unmet.
fn condition_met(condition: Option<&str>, ctx: &VariantContext) -> bool {
    let Some(expr) = condition else {
        return true;
    };
    let value = match interpolate_str(expr, ctx) {
        Ok(value) => value,
        Err(_) => return false,
    };
    match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !matches!(s.trim(), "" | "false" | "0"),
        _ => true,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stage that only logs its message. Useful as a placeholder in templates.
#[derive(Debug, Clone)]
pub struct EmptyStage {
    pub id: String,
    pub name: String,
    pub condition: Option<String>,
    pub message: Option<String>,
    pub run_id: RunId,
}

impl Stage for EmptyStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_skipped(&self, ctx: &VariantContext) -> bool {
        !condition_met(self.condition.as_deref(), ctx)
    }

    fn execute(&self, _ctx: &VariantContext) -> Result<StageOutput, StageError> {
        tracing::info!(
            run_id = %self.run_id,
            stage = %self.id,
            message = self.message.as_deref().unwrap_or(""),
            "empty stage"
        );
        Ok(StageOutput::new())
    }

    fn with_run_id(&self, run_id: RunId) -> Arc<dyn Stage> {
        Arc::new(Self {
            run_id,
            ..self.clone()
        })
    }
}

/// Stage that interpolates configured literals into its outputs.
#[derive(Debug, Clone)]
pub struct SetStage {
    pub id: String,
    pub name: String,
    pub condition: Option<String>,
    pub values: IndexMap<String, Value>,
    pub run_id: RunId,
}

impl Stage for SetStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_skipped(&self, ctx: &VariantContext) -> bool {
        !condition_met(self.condition.as_deref(), ctx)
    }

    fn execute(&self, ctx: &VariantContext) -> Result<StageOutput, StageError> {
        let mut output = StageOutput::new();
        for (key, value) in &self.values {
            output.set(key.clone(), interpolate_value(value, ctx)?);
        }
        Ok(output)
    }

    fn with_run_id(&self, run_id: RunId) -> Arc<dyn Stage> {
        Arc::new(Self {
            run_id,
            ..self.clone()
        })
    }
}

/// Stage that runs a script through a shell and captures stdout, stderr,
/// and the exit code as outputs. A non-zero exit is a stage failure.
#[derive(Debug, Clone)]
pub struct ShellStage {
    pub id: String,
    pub name: String,
    pub condition: Option<String>,
    pub script: String,
    pub shell: String,
    pub run_id: RunId,
}

impl Stage for ShellStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_skipped(&self, ctx: &VariantContext) -> bool {
        !condition_met(self.condition.as_deref(), ctx)
    }

    fn execute(&self, ctx: &VariantContext) -> Result<StageOutput, StageError> {
        let script = render(&interpolate_str(&self.script, ctx)?);
        tracing::debug!(run_id = %self.run_id, stage = %self.id, shell = %self.shell, "running script");

        let out = Command::new(&self.shell).arg("-c").arg(&script).output()?;
        let stdout = String::from_utf8_lossy(&out.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&out.stderr).trim_end().to_string();
        let code = out.status.code().unwrap_or(-1);

        if !out.status.success() {
            let message = if stderr.is_empty() { stdout } else { stderr };
            return Err(StageError::CommandFailed { code, message });
        }

        let mut output = StageOutput::new();
        output.set("stdout", json!(stdout));
        output.set("stderr", json!(stderr));
        output.set("exit_code", json!(code));
        Ok(output)
    }

    fn with_run_id(&self, run_id: RunId) -> Arc<dyn Stage> {
        Arc::new(Self {
            run_id,
            ..self.clone()
        })
    }
}
