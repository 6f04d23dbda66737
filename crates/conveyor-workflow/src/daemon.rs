//! Driving the triggers of many pipelines from one loop.
//!
//! A long-running deployment wraps [`Scheduler::run`] in its service main;
//! one-shot invocations and tests call [`Scheduler::tick`] directly.

use crate::log::ReleaseLog;
use crate::pipeline::Pipeline;
use crate::schedule::ReleaseResult;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// Owns a set of pipelines and pokes each of them on a fixed cadence,
/// sharing one release log so fired points stay deduplicated across ticks.
pub struct Scheduler {
    pipelines: Vec<Pipeline>,
    params: IndexMap<String, Value>,
    window: Duration,
    poll: Duration,
    log: Arc<dyn ReleaseLog>,
}

impl Scheduler {
    pub fn new(log: Arc<dyn ReleaseLog>) -> Self {
        Self {
            pipelines: Vec::new(),
            params: IndexMap::new(),
            window: DEFAULT_WINDOW,
            poll: DEFAULT_POLL,
            log,
        }
    }

    /// Release window forwarded to every poke.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Poll increment forwarded to every poke.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Params passed to every release of every registered pipeline.
    pub fn with_params(mut self, params: IndexMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn register(&mut self, pipeline: Pipeline) {
        self.pipelines.push(pipeline);
    }

    /// Poke every registered pipeline once, in registration order. Each
    /// poke fans its triggers out over the poke pool internally, so a tick
    /// blocks until every trigger of every pipeline has fired or been
    /// skipped.
    pub fn tick(&self) -> Vec<ReleaseResult> {
        let mut results = Vec::new();
        for pipeline in &self.pipelines {
            tracing::debug!(pipeline = %pipeline.name, "scheduler poking");
            results.extend(pipeline.poke(
                &self.params,
                self.window,
                self.poll,
                Arc::clone(&self.log),
            ));
        }
        results
    }

    /// Run `cycles` ticks with `interval` sleeps between them, collecting
    /// every release outcome.
    pub fn run(&self, cycles: usize, interval: Duration) -> Vec<ReleaseResult> {
        let mut results = Vec::new();
        for cycle in 0..cycles {
            if cycle > 0 {
                thread::sleep(interval);
            }
            tracing::info!(cycle, pipelines = self.pipelines.len(), "scheduler tick");
            results.extend(self.tick());
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryReleaseLog;
    use crate::trigger::Trigger;
    use conveyor_core::result::Status;

    fn every_second_pipeline(name: &str) -> Pipeline {
        Pipeline::new(
            name,
            None,
            IndexMap::new(),
            vec![Trigger::parse("* * * * * *").unwrap()],
            IndexMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_tick_pokes_every_registered_pipeline() {
        let log = Arc::new(MemoryReleaseLog::new());
        let mut scheduler = Scheduler::new(log.clone())
            .with_window(Duration::from_secs(10))
            .with_poll(Duration::from_millis(100));
        scheduler.register(every_second_pipeline("first"));
        scheduler.register(every_second_pipeline("second"));

        let results = scheduler.tick();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == Status::Success));
        assert!(results.iter().all(|r| r.fired.len() == 1));

        let records = log.records();
        assert_eq!(records.len(), 2);
        let mut names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_tick_without_pipelines_is_empty() {
        let scheduler = Scheduler::new(Arc::new(MemoryReleaseLog::new()));
        assert!(scheduler.tick().is_empty());
    }
}
