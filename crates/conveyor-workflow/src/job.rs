//! Job execution: sequential stages per variant, parallel variant fan-out.

use crate::pool::{scatter, CancelToken};
use crate::settings;
use crate::strategy::Strategy;
use conveyor_core::context::{variant_key, Variant, WorkflowContext};
use conveyor_core::context::VariantContext;
use conveyor_core::error::{ConfigError, JobError};
use conveyor_core::ids::RunId;
use conveyor_core::interpolate::has_placeholder;
use conveyor_core::result::{JobResult, Status, VariantOutput, VariantResult};
use conveyor_core::stage::Stage;
use std::fmt;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Instant;

/// A group of stages executed once per matrix variant.
///
/// The `id` is assigned by the owning pipeline from its jobs map key. The
/// definition is a template: `with_run_id` produces the copy an actual run
/// executes, so concurrent runs never share mutable state.
#[derive(Clone)]
pub struct Job {
    pub id: String,
    pub desc: Option<String>,
    pub runs_on: Option<String>,
    pub stages: Vec<Arc<dyn Stage>>,
    pub needs: Vec<String>,
    pub strategy: Strategy,
    pub run_id: RunId,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("needs", &self.needs)
            .field("stages", &self.stages.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("strategy", &self.strategy)
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desc: None,
            runs_on: None,
            stages: Vec::new(),
            needs: Vec::new(),
            strategy: Strategy::default(),
            run_id: RunId::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if has_placeholder(&self.id) {
            return Err(ConfigError::TemplatedJobId(self.id.clone()));
        }
        self.strategy.validate()
    }

    /// Copy of this job stamped with a new run id; the template is untouched.
    pub fn with_run_id(&self, run_id: RunId) -> Self {
        let mut job = self.clone();
        job.run_id = run_id;
        job
    }

    pub fn stage(&self, stage_id: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.id() == stage_id)
    }

    /// Run every stage of this job for one matrix variant, strictly in
    /// declaration order. A stage failure aborts the remaining stages of
    /// this variant only; the cancel token is re-checked before each
    /// execute, never mid-stage.
    pub fn execute_variant(
        &self,
        matrix: Variant,
        ctx: &WorkflowContext,
        cancel: Option<&CancelToken>,
    ) -> Result<VariantResult, JobError> {
        let key = variant_key(&matrix);

        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Ok(VariantResult {
                key,
                status: Status::Failure,
                output: VariantOutput {
                    matrix,
                    stages: Default::default(),
                    error: Some("execution cancelled before it started".to_string()),
                },
            });
        }

        let mut vctx = VariantContext::from_workflow(ctx, matrix.clone());

        for template in &self.stages {
            let stage = template.with_run_id(self.run_id);

            if stage.is_skipped(&vctx) {
                tracing::info!(run_id = %self.run_id, job = %self.id, stage = %stage.id(), "skipping stage");
                continue;
            }

            if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                return Ok(VariantResult {
                    key,
                    status: Status::Failure,
                    output: VariantOutput {
                        matrix,
                        stages: vctx.stages,
                        error: Some("execution cancelled at a stage boundary".to_string()),
                    },
                });
            }

            tracing::info!(run_id = %self.run_id, job = %self.id, stage = %stage.id(), "executing stage");
            if !matrix.is_empty() {
                tracing::debug!(run_id = %self.run_id, job = %self.id, variant = %key, "matrix");
            }

            match stage.execute(&vctx) {
                Ok(output) => vctx.push_stage(stage.id(), output),
                Err(err) => {
                    tracing::error!(run_id = %self.run_id, job = %self.id, stage = %stage.id(), error = %err, "stage failed");
                    return Err(JobError::Stage(err));
                }
            }
        }

        Ok(VariantResult {
            key,
            status: Status::Success,
            output: VariantOutput {
                matrix,
                stages: vctx.stages,
                error: None,
            },
        })
    }

    /// Run all variants of this job. Sequential when the strategy is unset
    /// or `max-parallel` is 1; otherwise variants fan out over a bounded
    /// pool under fail-fast or all-completed collection. Ordinary stage
    /// failures come back inside the `JobResult`, never as `Err`.
    pub fn execute(&self, ctx: &WorkflowContext) -> Result<JobResult, JobError> {
        let variants = self
            .strategy
            .make()
            .map_err(|err| JobError::Failed(err.to_string()))?;

        if !self.strategy.is_set() || self.strategy.max_parallel == 1 {
            let mut result = JobResult::default();
            for matrix in variants {
                match self.execute_variant(matrix, ctx, None) {
                    Ok(variant) => result.absorb(variant),
                    Err(err) => {
                        result.status = Status::Failure;
                        result.error.get_or_insert_with(|| err.to_string());
                        tracing::error!(run_id = %self.run_id, job = %self.id, error = %err, "variant failed");
                        if self.strategy.fail_fast {
                            break;
                        }
                    }
                }
            }
            return Ok(result);
        }

        let cancel = CancelToken::new();
        let total = variants.len();
        let tasks: Vec<_> = variants
            .into_iter()
            .map(|matrix| {
                let job = self.clone();
                let ctx = ctx.clone();
                let token = cancel.clone();
                move || job.execute_variant(matrix, &ctx, Some(&token))
            })
            .collect();

        let rx = scatter(self.strategy.max_parallel, tasks);

        let result = if self.strategy.fail_fast {
            self.collect_fail_fast(rx, total, &cancel)
        } else {
            self.collect_all_completed(rx, total)
        };
        Ok(result)
    }

    /// Fail-fast collection: the first variant error signals cancellation;
    /// everything that did complete still merges. The overall wait is
    /// bounded by the configurable fail-fast window.
    fn collect_fail_fast(
        &self,
        rx: std::sync::mpsc::Receiver<(usize, Result<VariantResult, JobError>)>,
        total: usize,
        cancel: &CancelToken,
    ) -> JobResult {
        let mut result = JobResult::default();
        let deadline = Instant::now() + settings::fail_fast_wait();
        let mut received = 0;

        while received < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((_, Ok(variant))) => {
                    received += 1;
                    result.absorb(variant);
                }
                Ok((_, Err(err))) => {
                    received += 1;
                    result.status = Status::Failure;
                    result.error.get_or_insert_with(|| err.to_string());
                    tracing::error!(
                        run_id = %self.run_id,
                        job = %self.id,
                        error = %err,
                        "variant failed, cancelling remaining variants"
                    );
                    cancel.cancel();
                }
                Err(RecvTimeoutError::Timeout) => {
                    result.status = Status::Failure;
                    result
                        .error
                        .get_or_insert_with(|| "fail-fast wait window elapsed".to_string());
                    tracing::warn!(run_id = %self.run_id, job = %self.id, "fail-fast wait window elapsed");
                    cancel.cancel();
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        result
    }

    /// All-completed collection: every variant runs to completion; a hung
    /// variant is converted into a failure by the per-variant timeout
    /// without aborting its siblings.
    fn collect_all_completed(
        &self,
        rx: std::sync::mpsc::Receiver<(usize, Result<VariantResult, JobError>)>,
        total: usize,
    ) -> JobResult {
        let mut result = JobResult::default();
        let timeout = settings::variant_timeout();

        for _ in 0..total {
            match rx.recv_timeout(timeout) {
                Ok((_, Ok(variant))) => result.absorb(variant),
                Ok((_, Err(err))) => {
                    result.status = Status::Failure;
                    result.error.get_or_insert_with(|| err.to_string());
                    tracing::error!(
                        run_id = %self.run_id,
                        job = %self.id,
                        error = %err,
                        "variant failed; fail-fast not set, siblings continue"
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    result.status = Status::Failure;
                    result
                        .error
                        .get_or_insert_with(|| "variant timed out".to_string());
                    tracing::warn!(run_id = %self.run_id, job = %self.id, "variant is hanging, marking it failed");
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        result
    }
}
