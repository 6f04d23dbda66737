//! Cron-driven releases: waiting for the next trigger point, firing it
//! exactly once, and poking every trigger of a pipeline in parallel.

use crate::log::{ReleaseLog, ReleaseRecord};
use crate::pipeline::Pipeline;
use crate::pool::scatter;
use crate::settings;
use crate::trigger::Trigger;
use chrono::{DateTime, Timelike, Utc};
use conveyor_core::ids::RunId;
use conveyor_core::interpolate::{interpolate_value, Lookup};
use conveyor_core::result::Status;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Stop poll-sleeping and take the final precise sleep once the trigger
/// point is this close.
const FINAL_SLEEP_BUFFER: Duration = Duration::from_secs(5);

/// Deadline applied to the pipeline run a release fires.
const RELEASE_RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one release attempt for one trigger.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResult {
    pub status: Status,
    pub params: IndexMap<String, Value>,
    /// Trigger expressions that actually fired.
    pub fired: Vec<String>,
    /// Trigger expressions skipped because their next point fell outside
    /// the release window.
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReleaseResult {
    fn skipped(trigger: &str, params: IndexMap<String, Value>) -> Self {
        Self {
            status: Status::Success,
            params,
            fired: Vec::new(),
            skipped: vec![trigger.to_string()],
            error: None,
        }
    }
}

/// Scope resolving `release.*` paths while a release's params are
/// interpolated.
struct ReleaseScope {
    logical_date: DateTime<Utc>,
}

impl Lookup for ReleaseScope {
    fn lookup(&self, path: &str) -> Option<Value> {
        match path {
            "release.logical_date" => Some(json!(self.logical_date.to_rfc3339())),
            _ => None,
        }
    }
}

impl Pipeline {
    /// Wait for, then fire, the next unreleased point of one trigger.
    ///
    /// Points already present in the log are never re-fired: the search
    /// starts after the latest logged point and skips anything `is_pointed`.
    /// A point further away than `window` is not waited for; the trigger is
    /// reported as skipped instead. While waiting, the thread sleeps in
    /// `poll` increments until the point is close, then sleeps the exact
    /// remainder.
    pub fn release(
        &self,
        trigger: &Trigger,
        params: &IndexMap<String, Value>,
        window: Duration,
        poll: Duration,
        log: &dyn ReleaseLog,
    ) -> ReleaseResult {
        let now = Utc::now().with_nanosecond(0).unwrap_or_else(Utc::now);
        let expr = trigger.to_string();

        let baseline = match log.latest_point(&self.name, &expr) {
            Some(point) => point.max(now),
            None => now,
        };
        let mut upcoming = trigger.upcoming(baseline);
        let next = loop {
            match upcoming.next() {
                Some(point) if log.is_pointed(&self.name, &expr, point) => continue,
                Some(point) => break point,
                None => {
                    return ReleaseResult::skipped(&expr, params.clone());
                }
            }
        };

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        if wait > window {
            tracing::debug!(
                pipeline = %self.name,
                trigger = %expr,
                next = %next,
                "next release point is outside the window, skipping"
            );
            return ReleaseResult::skipped(&expr, params.clone());
        }

        tracing::info!(pipeline = %self.name, trigger = %expr, release = %next, "waiting for release point");
        loop {
            let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if remaining <= FINAL_SLEEP_BUFFER {
                thread::sleep(remaining);
                break;
            }
            thread::sleep(poll.min(remaining - FINAL_SLEEP_BUFFER));
        }

        let runner = self.with_run_id(RunId::new());
        let scope = ReleaseScope { logical_date: next };
        let mut release_params = IndexMap::with_capacity(params.len());
        for (key, value) in params {
            match interpolate_value(value, &scope) {
                Ok(resolved) => {
                    release_params.insert(key.clone(), resolved);
                }
                Err(err) => {
                    return ReleaseResult {
                        status: Status::Failure,
                        params: params.clone(),
                        fired: Vec::new(),
                        skipped: Vec::new(),
                        error: Some(err.to_string()),
                    };
                }
            }
        }

        tracing::info!(run_id = %runner.run_id, pipeline = %self.name, trigger = %expr, "release fired");
        let context = match runner.execute(&release_params, RELEASE_RUN_TIMEOUT) {
            Ok(result) => result,
            Err(err) => {
                return ReleaseResult {
                    status: Status::Failure,
                    params: release_params,
                    fired: vec![expr],
                    skipped: Vec::new(),
                    error: Some(err.to_string()),
                };
            }
        };

        let mut status = context.status;
        let mut error = context.error.clone();
        let record = ReleaseRecord {
            name: self.name.clone(),
            trigger: expr.clone(),
            release: next,
            context,
            run_id: runner.run_id,
            parent_run_id: self.run_id,
        };
        if let Err(err) = log.save(&record) {
            status = Status::Failure;
            error.get_or_insert_with(|| format!("failed to persist release record: {err}"));
            tracing::error!(run_id = %runner.run_id, pipeline = %self.name, error = %err, "release log save failed");
        }

        ReleaseResult {
            status,
            params: release_params,
            fired: vec![expr],
            skipped: Vec::new(),
            error,
        }
    }

    /// Release every trigger of this pipeline once, in parallel over a
    /// bounded pool. Pipelines with no triggers return immediately without
    /// spinning up any threads.
    pub fn poke(
        &self,
        params: &IndexMap<String, Value>,
        window: Duration,
        poll: Duration,
        log: Arc<dyn ReleaseLog>,
    ) -> Vec<ReleaseResult> {
        if self.on.is_empty() {
            tracing::warn!(pipeline = %self.name, "poke on a pipeline with no triggers");
            return Vec::new();
        }

        let tasks: Vec<_> = self
            .on
            .iter()
            .cloned()
            .map(|trigger| {
                let pipeline = self.clone();
                let params = params.clone();
                let log = Arc::clone(&log);
                move || pipeline.release(&trigger, &params, window, poll, log.as_ref())
            })
            .collect();

        let total = tasks.len();
        let rx = scatter(settings::poke_workers(), tasks);
        let mut results: Vec<(usize, ReleaseResult)> = rx.into_iter().take(total).collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryReleaseLog;
    use crate::trigger::Trigger;

    fn pipeline_with_trigger(expr: &str) -> Pipeline {
        Pipeline::new(
            "scheduled",
            None,
            IndexMap::new(),
            vec![Trigger::parse(expr).unwrap()],
            IndexMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_distant_point_is_skipped() {
        // Yearly trigger: the next point is guaranteed outside a 1s window.
        let pipeline = pipeline_with_trigger("0 0 1 1 *");
        let log = MemoryReleaseLog::new();
        let result = pipeline.release(
            &pipeline.on[0].clone(),
            &IndexMap::new(),
            Duration::from_secs(1),
            Duration::from_millis(100),
            &log,
        );
        assert_eq!(result.status, Status::Success);
        assert!(result.fired.is_empty());
        assert_eq!(result.skipped, vec!["0 0 1 1 *".to_string()]);
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_release_fires_once_and_is_logged() {
        // Every-second trigger keeps the wait under the window.
        let pipeline = pipeline_with_trigger("* * * * * *");
        let trigger = pipeline.on[0].clone();
        let log = MemoryReleaseLog::new();

        let first = pipeline.release(
            &trigger,
            &IndexMap::new(),
            Duration::from_secs(10),
            Duration::from_millis(100),
            &log,
        );
        assert_eq!(first.status, Status::Success);
        assert_eq!(first.fired.len(), 1);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_ne!(records[0].run_id, pipeline.run_id);
        assert_eq!(records[0].parent_run_id, pipeline.run_id);

        // The logged point is never re-fired: the second release picks the
        // following point.
        let second = pipeline.release(
            &trigger,
            &IndexMap::new(),
            Duration::from_secs(10),
            Duration::from_millis(100),
            &log,
        );
        assert_eq!(second.fired.len(), 1);
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert!(records[1].release > records[0].release);
    }

    #[test]
    fn test_release_params_resolve_logical_date() {
        let pipeline = pipeline_with_trigger("* * * * * *");
        let log = MemoryReleaseLog::new();
        let params = IndexMap::from([(
            "run-date".to_string(),
            json!("${{ release.logical_date }}"),
        )]);

        let result = pipeline.release(
            &pipeline.on[0].clone(),
            &params,
            Duration::from_secs(10),
            Duration::from_millis(100),
            &log,
        );
        let run_date = result.params["run-date"].as_str().unwrap_or_default();
        assert!(run_date.contains('T'));
    }

    #[test]
    fn test_poke_without_triggers_is_empty() {
        let pipeline =
            Pipeline::new("bare", None, IndexMap::new(), vec![], IndexMap::new()).unwrap();
        let results = pipeline.poke(
            &IndexMap::new(),
            Duration::from_secs(1),
            Duration::from_millis(100),
            Arc::new(MemoryReleaseLog::new()),
        );
        assert!(results.is_empty());
    }
}
