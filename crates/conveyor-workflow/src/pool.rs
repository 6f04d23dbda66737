//! Bounded OS-thread worker pool.
//!
//! Variants within a job, jobs within a pipeline run, and triggers within a
//! poke each fan out over their own pool; pools at different levels are
//! independent. Tasks drain from a shared queue and their results come back
//! over a channel, so the caller can apply its own wait policy
//! (`recv_timeout` for fail-fast windows and per-task timeouts).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

/// Cooperative cancellation signal shared by the tasks of one fan-out.
///
/// Once set, not-yet-started tasks short-circuit; in-flight tasks are
/// expected to check it at their own boundaries and are never interrupted
/// mid-step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `tasks` on at most `workers` OS threads and return the result
/// channel. Results arrive as `(task_index, value)` in completion order; the
/// channel disconnects once every task has finished. Dropping the receiver
/// early abandons results of still-running tasks without interrupting them.
pub fn scatter<T, F>(workers: usize, tasks: Vec<F>) -> Receiver<(usize, T)>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let queue: Arc<Mutex<VecDeque<(usize, F)>>> =
        Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
    let (tx, rx) = mpsc::channel();

    for _ in 0..workers.max(1) {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        thread::spawn(move || loop {
            let next = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => None,
            };
            match next {
                Some((index, task)) => {
                    // The receiver may be gone already (fail-fast abandon);
                    // that is not this worker's problem.
                    let _ = tx.send((index, task()));
                }
                None => break,
            }
        });
    }

    rx
}
