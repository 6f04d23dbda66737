//! Release logs: the record of which trigger points already fired.

use chrono::{DateTime, NaiveDateTime, Utc};
use conveyor_core::ids::RunId;
use conveyor_core::result::PipelineResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// One persisted release: which pipeline fired, for which trigger, at
/// which logical time, and the full typed result of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub name: String,
    pub trigger: String,
    pub release: DateTime<Utc>,
    pub context: PipelineResult,
    pub run_id: RunId,
    pub parent_run_id: RunId,
}

/// Storage behind release deduplication. `latest_point` and `is_pointed`
/// guard against re-firing; `save` appends the record after a run.
pub trait ReleaseLog: Send + Sync {
    /// Most recent logical time already released for this pipeline and
    /// trigger, if any.
    fn latest_point(&self, name: &str, trigger: &str) -> Option<DateTime<Utc>>;

    /// Whether this exact logical time was already released.
    fn is_pointed(&self, name: &str, trigger: &str, at: DateTime<Utc>) -> bool;

    fn save(&self, record: &ReleaseRecord) -> io::Result<()>;
}

fn trigger_slug(trigger: &str) -> String {
    trigger
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Release log persisted as one JSON file per release under
/// `<root>/<pipeline>/<trigger-slug>/<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct FileReleaseLog {
    root: PathBuf,
}

impl FileReleaseLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, name: &str, trigger: &str) -> PathBuf {
        self.root.join(name).join(trigger_slug(trigger))
    }

    fn points(&self, name: &str, trigger: &str) -> Vec<DateTime<Utc>> {
        let Ok(entries) = fs::read_dir(self.dir(name, trigger)) else {
            return Vec::new();
        };
        let mut points: Vec<DateTime<Utc>> = entries
            .flatten()
            .filter_map(|entry| {
                let file = entry.file_name();
                let stem = file.to_str()?.strip_suffix(".json")?;
                NaiveDateTime::parse_from_str(stem, STAMP_FORMAT)
                    .ok()
                    .map(|naive| naive.and_utc())
            })
            .collect();
        points.sort();
        points
    }
}

impl ReleaseLog for FileReleaseLog {
    fn latest_point(&self, name: &str, trigger: &str) -> Option<DateTime<Utc>> {
        self.points(name, trigger).into_iter().next_back()
    }

    fn is_pointed(&self, name: &str, trigger: &str, at: DateTime<Utc>) -> bool {
        let stamp = at.format(STAMP_FORMAT).to_string();
        self.dir(name, trigger).join(format!("{stamp}.json")).is_file()
    }

    fn save(&self, record: &ReleaseRecord) -> io::Result<()> {
        let dir = self.dir(&record.name, &record.trigger);
        fs::create_dir_all(&dir)?;
        let stamp = record.release.format(STAMP_FORMAT).to_string();
        let file = fs::File::create(dir.join(format!("{stamp}.json")))?;
        serde_json::to_writer_pretty(file, record).map_err(io::Error::other)
    }
}

/// In-memory release log for tests and one-shot poke runs.
#[derive(Debug, Default)]
pub struct MemoryReleaseLog {
    records: Mutex<Vec<ReleaseRecord>>,
}

impl MemoryReleaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ReleaseRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ReleaseLog for MemoryReleaseLog {
    fn latest_point(&self, name: &str, trigger: &str) -> Option<DateTime<Utc>> {
        let records = self.records.lock().ok()?;
        records
            .iter()
            .filter(|r| r.name == name && r.trigger == trigger)
            .map(|r| r.release)
            .max()
    }

    fn is_pointed(&self, name: &str, trigger: &str, at: DateTime<Utc>) -> bool {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .any(|r| r.name == name && r.trigger == trigger && r.release == at)
            })
            .unwrap_or(false)
    }

    fn save(&self, record: &ReleaseRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::other("release log mutex poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
