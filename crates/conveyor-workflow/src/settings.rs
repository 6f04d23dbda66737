//! Environment-configurable knobs.
//!
//! Read at call time, never cached, so a long-lived scheduler picks up
//! changes between runs.

use std::time::Duration;

const JOB_WORKERS: &str = "CONVEYOR_MAX_JOB_WORKERS";
const POKE_WORKERS: &str = "CONVEYOR_MAX_POKE_WORKERS";
const FAIL_FAST_WAIT: &str = "CONVEYOR_FAIL_FAST_WAIT_SECS";
const VARIANT_TIMEOUT: &str = "CONVEYOR_VARIANT_TIMEOUT_SECS";

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Pool size for jobs within one pipeline execution. 1 means inline.
pub fn job_workers() -> usize {
    env_usize(JOB_WORKERS, 2)
}

/// Pool size for triggers within one poke.
pub fn poke_workers() -> usize {
    env_usize(POKE_WORKERS, 4)
}

/// How long a fail-fast job waits for its in-flight variants before giving
/// up on them.
pub fn fail_fast_wait() -> Duration {
    env_secs(FAIL_FAST_WAIT, 1800)
}

/// Per-variant result timeout in all-completed mode; a variant exceeding it
/// is marked failed without aborting its siblings.
pub fn variant_timeout() -> Duration {
    env_secs(VARIANT_TIMEOUT, 60)
}
