//! Pipeline execution: dependency-ordered jobs under a run deadline.

use crate::dag;
use crate::job::Job;
use crate::params::{self, Param};
use crate::settings;
use crate::trigger::Trigger;
use conveyor_core::context::WorkflowContext;
use conveyor_core::error::{ConfigError, PipelineError};
use conveyor_core::ids::RunId;
use conveyor_core::interpolate::has_placeholder;
use conveyor_core::result::{JobResult, PipelineResult, Status};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A named set of jobs with `needs` edges, declared parameters, and cron
/// triggers. The struct is a reusable template; `with_run_id` stamps the
/// copy one run executes.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub desc: Option<String>,
    pub params: IndexMap<String, Param>,
    pub on: Vec<Trigger>,
    pub jobs: IndexMap<String, Job>,
    pub run_id: RunId,
}

impl Pipeline {
    /// Build a pipeline from its parts. Job ids are assigned from the map
    /// keys. Templated names, templated job ids, invalid strategies, and
    /// `needs` pointing at jobs that do not exist are all rejected here;
    /// cycle detection is a separate, loader-level concern (see
    /// [`Pipeline::check_order`]).
    pub fn new(
        name: impl Into<String>,
        desc: Option<String>,
        params: IndexMap<String, Param>,
        on: Vec<Trigger>,
        jobs: IndexMap<String, Job>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if has_placeholder(&name) {
            return Err(ConfigError::TemplatedName(name));
        }

        let mut assigned = IndexMap::with_capacity(jobs.len());
        let mut missing = Vec::new();
        for (id, mut job) in jobs {
            job.id = id.clone();
            job.validate()?;
            assigned.insert(id, job);
        }
        for job in assigned.values() {
            for need in &job.needs {
                if !assigned.contains_key(need) && !missing.contains(need) {
                    missing.push(need.clone());
                }
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::UnknownNeeds {
                pipeline: name,
                missing,
            });
        }

        Ok(Self {
            name,
            desc,
            params,
            on,
            jobs: assigned,
            run_id: RunId::new(),
        })
    }

    /// Copy of this pipeline stamped with a new run id.
    pub fn with_run_id(&self, run_id: RunId) -> Self {
        let mut pipeline = self.clone();
        pipeline.run_id = run_id;
        pipeline
    }

    pub fn job(&self, id: &str) -> Result<&Job, PipelineError> {
        self.jobs.get(id).ok_or_else(|| PipelineError::UnknownJob {
            job: id.to_string(),
            pipeline: self.name.clone(),
        })
    }

    /// Topologically order the jobs, rejecting dependency cycles. Called
    /// eagerly by the loader; programmatic callers may skip it, in which
    /// case an unsatisfiable `needs` chain surfaces as a run timeout.
    pub fn check_order(&self) -> Result<Vec<String>, ConfigError> {
        dag::topological_order(&self.jobs).map_err(|err| match err {
            ConfigError::UnknownNeeds { missing, .. } => ConfigError::UnknownNeeds {
                pipeline: self.name.clone(),
                missing,
            },
            other => other,
        })
    }

    /// Execute the whole pipeline with the given caller params.
    ///
    /// `Err` is returned only when the run cannot start at all (missing
    /// required params). Everything that happens after execution begins,
    /// including job failures and the deadline elapsing, is reported
    /// inside the returned [`PipelineResult`], with `jobs` holding the
    /// contexts of every job that did complete.
    pub fn execute(
        &self,
        params: &IndexMap<String, Value>,
        timeout: Duration,
    ) -> Result<PipelineResult, PipelineError> {
        let params = params::parameterize(&self.name, &self.params, params)?;
        tracing::info!(run_id = %self.run_id, pipeline = %self.name, "start execution");

        let ctx = WorkflowContext::new(params.clone());
        if self.jobs.is_empty() {
            tracing::warn!(run_id = %self.run_id, pipeline = %self.name, "pipeline has no jobs");
            return Ok(PipelineResult {
                status: Status::Success,
                params,
                jobs: ctx.jobs,
                error: None,
            });
        }

        let queue: VecDeque<String> = self.jobs.keys().cloned().collect();
        let started = Instant::now();

        if settings::job_workers() <= 1 {
            self.execute_inline(ctx, params, queue, started, timeout)
        } else {
            self.execute_threaded(ctx, params, queue, started, timeout)
        }
    }

    fn execute_job(&self, id: &str, ctx: &WorkflowContext) -> Result<JobResult, PipelineError> {
        let job = self.job(id)?;
        tracing::info!(run_id = %self.run_id, pipeline = %self.name, job = id, "executing job");
        job.with_run_id(self.run_id)
            .execute(ctx)
            .map_err(|source| PipelineError::Job {
                job: id.to_string(),
                source,
            })
    }

    fn timed_out(
        &self,
        ctx: WorkflowContext,
        params: IndexMap<String, Value>,
        timeout: Duration,
    ) -> PipelineResult {
        let error = PipelineError::Timeout(self.name.clone());
        tracing::error!(
            run_id = %self.run_id,
            pipeline = %self.name,
            timeout_secs = timeout.as_secs(),
            "{error}"
        );
        PipelineResult {
            status: Status::Failure,
            params,
            jobs: ctx.jobs,
            error: Some(error.to_string()),
        }
    }

    /// Fold a completed job into the shared context. A failed job aborts
    /// dispatch immediately: first job error wins, already-merged contexts
    /// are kept.
    fn merge_job(
        &self,
        ctx: &mut WorkflowContext,
        id: String,
        result: JobResult,
    ) -> Result<(), String> {
        let failed = !result.status.is_success();
        let message = result.error.clone();
        ctx.jobs.insert(id.clone(), result.into_output());
        if failed {
            let message = message.unwrap_or_else(|| "job failed".to_string());
            tracing::error!(run_id = %self.run_id, pipeline = %self.name, job = %id, "{message}");
            return Err(format!("job {id}: {message}"));
        }
        Ok(())
    }

    /// Single-worker mode: jobs run on the calling thread in queue order,
    /// deferred while their `needs` are unmet. Nothing runs concurrently
    /// here, so a full pass over the queue without dispatching anything
    /// means the remaining `needs` can never be satisfied; the run then
    /// waits out its deadline and reports the timeout.
    fn execute_inline(
        &self,
        mut ctx: WorkflowContext,
        params: IndexMap<String, Value>,
        mut queue: VecDeque<String>,
        started: Instant,
        timeout: Duration,
    ) -> Result<PipelineResult, PipelineError> {
        let mut stalled = 0usize;

        while let Some(id) = queue.pop_front() {
            if started.elapsed() > timeout {
                return Ok(self.timed_out(ctx, params, timeout));
            }
            let job = self.job(&id)?;
            if !job.needs.iter().all(|need| ctx.jobs.contains_key(need)) {
                queue.push_back(id);
                stalled += 1;
                if stalled >= queue.len() {
                    thread::sleep(timeout.saturating_sub(started.elapsed()));
                    return Ok(self.timed_out(ctx, params, timeout));
                }
                continue;
            }
            stalled = 0;
            let result = match self.execute_job(&id, &ctx) {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(run_id = %self.run_id, pipeline = %self.name, error = %err, "job failed");
                    return Ok(PipelineResult {
                        status: Status::Failure,
                        params,
                        jobs: ctx.jobs,
                        error: Some(err.to_string()),
                    });
                }
            };
            if let Err(message) = self.merge_job(&mut ctx, id, result) {
                return Ok(PipelineResult {
                    status: Status::Failure,
                    params,
                    jobs: ctx.jobs,
                    error: Some(message),
                });
            }
        }

        Ok(PipelineResult {
            status: Status::Success,
            params,
            jobs: ctx.jobs,
            error: None,
        })
    }

    /// Pooled mode: every currently-ready job is dispatched to a worker
    /// with a snapshot of the context, then the loop blocks on the
    /// completion channel. A finished job folds back into the context and
    /// wakes the readiness check, so dependency waits cost no polling; a
    /// queue that can never drain sleeps out the remaining deadline.
    fn execute_threaded(
        &self,
        mut ctx: WorkflowContext,
        params: IndexMap<String, Value>,
        mut queue: VecDeque<String>,
        started: Instant,
        timeout: Duration,
    ) -> Result<PipelineResult, PipelineError> {
        type Task = (String, WorkflowContext);
        type Done = (String, Result<JobResult, PipelineError>);

        let workers = settings::job_workers();
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (done_tx, done_rx) = mpsc::channel::<Done>();

        for _ in 0..workers {
            let task_rx = Arc::clone(&task_rx);
            let done_tx = done_tx.clone();
            let pipeline = self.clone();
            thread::spawn(move || loop {
                let task = match task_rx.lock() {
                    Ok(guard) => guard.recv(),
                    Err(_) => break,
                };
                let Ok((id, ctx)) = task else { break };
                let result = pipeline.execute_job(&id, &ctx);
                if done_tx.send((id, result)).is_err() {
                    break;
                }
            });
        }
        drop(done_tx);

        let mut in_flight = 0usize;

        while !queue.is_empty() || in_flight > 0 {
            let mut deferred = VecDeque::with_capacity(queue.len());
            while let Some(id) = queue.pop_front() {
                let job = self.job(&id)?;
                if job.needs.iter().all(|need| ctx.jobs.contains_key(need)) {
                    in_flight += 1;
                    if task_tx.send((id, ctx.clone())).is_err() {
                        break;
                    }
                } else {
                    deferred.push_back(id);
                }
            }
            queue = deferred;

            if in_flight == 0 {
                if queue.is_empty() {
                    break;
                }
                // Nothing running and nothing ready: these needs can never
                // be satisfied.
                thread::sleep(timeout.saturating_sub(started.elapsed()));
                return Ok(self.timed_out(ctx, params, timeout));
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            match done_rx.recv_timeout(remaining) {
                Ok((id, Ok(result))) => {
                    in_flight -= 1;
                    if let Err(message) = self.merge_job(&mut ctx, id, result) {
                        return Ok(PipelineResult {
                            status: Status::Failure,
                            params,
                            jobs: ctx.jobs,
                            error: Some(message),
                        });
                    }
                }
                Ok((_, Err(err))) => {
                    tracing::error!(run_id = %self.run_id, pipeline = %self.name, error = %err, "job failed");
                    return Ok(PipelineResult {
                        status: Status::Failure,
                        params,
                        jobs: ctx.jobs,
                        error: Some(err.to_string()),
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Ok(self.timed_out(ctx, params, timeout));
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(PipelineResult {
            status: Status::Success,
            params,
            jobs: ctx.jobs,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::stage::{SetStage, Stage};
    use serde_json::json;

    fn set_job(id: &str, needs: Vec<&str>, key: &str, value: Value) -> Job {
        let mut job = Job::new(id);
        job.needs = needs.into_iter().map(String::from).collect();
        job.stages = vec![Arc::new(SetStage {
            id: "emit".into(),
            name: "emit".into(),
            condition: None,
            values: IndexMap::from([(key.to_string(), value)]),
            run_id: RunId::new(),
        }) as Arc<dyn Stage>];
        job
    }

    #[test]
    fn test_templated_name_rejected() {
        let err = Pipeline::new(
            "pipe-${{ params.env }}",
            None,
            IndexMap::new(),
            vec![],
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TemplatedName(_)));
    }

    #[test]
    fn test_unknown_needs_rejected_at_construction() {
        let jobs = IndexMap::from([("a".to_string(), {
            let mut j = Job::new("a");
            j.needs = vec!["ghost".to_string()];
            j
        })]);
        let err = Pipeline::new("demo", None, IndexMap::new(), vec![], jobs).unwrap_err();
        match err {
            ConfigError::UnknownNeeds { missing, .. } => {
                assert_eq!(missing, vec!["ghost".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_pipeline_succeeds() {
        let pipeline =
            Pipeline::new("empty", None, IndexMap::new(), vec![], IndexMap::new()).unwrap();
        let result = pipeline.execute(&IndexMap::new(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(result.status, Status::Success);
        assert!(result.jobs.is_empty());
    }

    #[test]
    fn test_needs_order_and_cross_job_reads() {
        let jobs = IndexMap::from([
            (
                "b".to_string(),
                set_job("b", vec!["a"], "y", json!("${{ jobs.a.stages.emit.outputs.x }}")),
            ),
            ("a".to_string(), set_job("a", vec![], "x", json!(41))),
        ]);
        let pipeline = Pipeline::new("chained", None, IndexMap::new(), vec![], jobs).unwrap();
        let result = pipeline.execute(&IndexMap::new(), DEFAULT_TIMEOUT).unwrap();

        assert_eq!(result.status, Status::Success);
        let b = result.jobs["b"].single().unwrap();
        assert_eq!(b.stages["emit"].outputs["y"], json!(41));
    }

    #[test]
    fn test_unsatisfiable_needs_hit_the_deadline() {
        let jobs = IndexMap::from([
            ("a".to_string(), {
                let mut j = set_job("a", vec![], "x", json!(1));
                j.needs = vec!["b".to_string()];
                j
            }),
            ("b".to_string(), {
                let mut j = set_job("b", vec![], "x", json!(1));
                j.needs = vec!["a".to_string()];
                j
            }),
        ]);
        let pipeline = Pipeline::new("stuck", None, IndexMap::new(), vec![], jobs).unwrap();
        assert!(pipeline.check_order().is_err());

        let result = pipeline
            .execute(&IndexMap::new(), Duration::from_millis(250))
            .unwrap();
        assert_eq!(result.status, Status::Failure);
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
        assert!(result.jobs.is_empty());
    }

    #[test]
    fn test_missing_required_param_is_an_error() {
        use crate::params::ParamKind;
        let params = IndexMap::from([("env".to_string(), Param::required(ParamKind::Str))]);
        let pipeline = Pipeline::new("strict", None, params, vec![], IndexMap::new()).unwrap();
        let err = pipeline.execute(&IndexMap::new(), DEFAULT_TIMEOUT).unwrap_err();
        assert!(matches!(err, PipelineError::MissingParams { .. }));
    }
}
