//! Externally produced task and report snapshots.
//!
//! Another process writes one task file and one report file per worker
//! into two directories. Their shape is not ours, so they are read as open
//! key/value records ([`ExternalRecord`]) and only then projected onto the
//! few typed fields the derivation needs ([`TaskSnapshot`],
//! [`ReportSnapshot`]). Files that fail to parse are skipped with a
//! warning; a bad snapshot never makes the world state unavailable.
//!
//! [`FactsReader`] caches the parsed directories until it is invalidated by
//! a file-change notification. Each invalidation bumps a generation counter
//! that read-side caches key on.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::loose;

/// An open key/value document produced by another process.
pub type ExternalRecord = serde_json::Map<String, Value>;

/// Worker status as reported by the external feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    /// A task has been handed to the worker.
    Assigned,
    /// The worker is on it.
    Working,
    /// The task finished successfully.
    Done,
    /// The worker is idle. Treated as finished; see [`WorkerStatus::is_finished`].
    Idle,
    /// The task failed.
    Failed,
    /// Anything else.
    Unknown,
}

impl WorkerStatus {
    /// Parse a raw status string, case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assigned" | "queued" | "pending" => Self::Assigned,
            "working" | "in_progress" | "in-progress" | "running" | "active" => Self::Working,
            "done" | "complete" | "completed" | "success" | "succeeded" => Self::Done,
            "idle" => Self::Idle,
            "failed" | "failure" | "error" | "blocked" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// The worker currently holds the task.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Assigned | Self::Working)
    }

    /// The task is over and eligible for a reward.
    ///
    /// `Idle` counts as finished: the feed reports `idle` for a worker that
    /// has just handed in its work. This also means a worker that went idle
    /// without finishing is indistinguishable from a completion.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Idle)
    }
}

const WORKER_KEYS: &[&str] = &["worker", "workerId", "worker_id", "agent", "name"];
const TASK_KEYS: &[&str] = &["taskId", "task_id", "task", "id"];
const STATUS_KEYS: &[&str] = &["status", "state"];
const CATEGORY_KEYS: &[&str] = &["category", "type", "kind"];
const TITLE_KEYS: &[&str] = &["title", "summary", "description"];
const ASSIGNED_KEYS: &[&str] = &["assignedAt", "assigned_at", "startedAt", "started_at"];
const COMPLETED_KEYS: &[&str] = &[
    "completedAt",
    "completed_at",
    "finishedAt",
    "finished_at",
    "reportedAt",
];
const REPORT_ID_KEYS: &[&str] = &["reportId", "report_id"];

/// A worker's current assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Worker name.
    pub worker: String,
    /// External task id.
    pub task_id: String,
    /// Task title, if given.
    pub title: Option<String>,
    /// Raw task category (`"general"` when absent).
    pub category: String,
    /// Reported status.
    pub status: WorkerStatus,
    /// When the task was assigned.
    pub assigned_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Project a record. `fallback_worker` (usually the file stem) names the
    /// worker when the record does not.
    ///
    /// Returns `None` when the record carries no task id.
    pub fn from_record(record: &ExternalRecord, fallback_worker: &str) -> Option<Self> {
        let doc = Value::Object(record.clone());
        let task_id = loose::string(&doc, TASK_KEYS)?;
        Some(Self {
            worker: loose::string(&doc, WORKER_KEYS)
                .unwrap_or_else(|| fallback_worker.to_owned()),
            task_id,
            title: loose::string(&doc, TITLE_KEYS),
            category: loose::string(&doc, CATEGORY_KEYS)
                .unwrap_or_else(|| "general".to_owned()),
            status: loose::string(&doc, STATUS_KEYS)
                .map_or(WorkerStatus::Unknown, |s| WorkerStatus::parse(&s)),
            assigned_at: loose::timestamp(&doc, ASSIGNED_KEYS),
        })
    }
}

/// A worker's most recent completion or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSnapshot {
    /// Worker name.
    pub worker: String,
    /// External task id.
    pub task_id: String,
    /// Identity of this report; distinguishes repeated reports for one task.
    pub report_id: String,
    /// Reported status.
    pub status: WorkerStatus,
    /// Raw task category (`"general"` when absent).
    pub category: String,
    /// Task title, if given.
    pub title: Option<String>,
    /// When the task was assigned.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the task finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReportSnapshot {
    /// Project a record. Returns `None` when the record carries no task id.
    ///
    /// Without an explicit report id the completion time identifies the
    /// report, falling back to the literal `"latest"`.
    pub fn from_record(record: &ExternalRecord, fallback_worker: &str) -> Option<Self> {
        let doc = Value::Object(record.clone());
        let task_id = loose::string(&doc, TASK_KEYS)?;
        let completed_at = loose::timestamp(&doc, COMPLETED_KEYS);
        let report_id = loose::string(&doc, REPORT_ID_KEYS)
            .or_else(|| completed_at.map(|t| t.to_rfc3339()))
            .unwrap_or_else(|| "latest".to_owned());
        Some(Self {
            worker: loose::string(&doc, WORKER_KEYS)
                .unwrap_or_else(|| fallback_worker.to_owned()),
            task_id,
            report_id,
            status: loose::string(&doc, STATUS_KEYS)
                .map_or(WorkerStatus::Unknown, |s| WorkerStatus::parse(&s)),
            category: loose::string(&doc, CATEGORY_KEYS)
                .unwrap_or_else(|| "general".to_owned()),
            title: loose::string(&doc, TITLE_KEYS),
            assigned_at: loose::timestamp(&doc, ASSIGNED_KEYS),
            completed_at,
        })
    }

    /// Whether this report should pay a reward.
    pub const fn is_completion(&self) -> bool {
        self.status.is_finished()
    }

    /// The key recorded in the reward ledger once this report has paid.
    pub fn dedupe_key(&self) -> String {
        reward_key(&self.worker, &self.task_id, &self.report_id)
    }
}

/// Dedupe key for a `(worker, task, report)` completion.
pub fn reward_key(worker: &str, task_id: &str, report_id: &str) -> String {
    format!("{worker}:{task_id}:{report_id}")
}

/// Everything read from the snapshot directories in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    /// Current assignments.
    pub tasks: Vec<TaskSnapshot>,
    /// Latest reports.
    pub reports: Vec<ReportSnapshot>,
    /// Generation of the reader when these were read.
    pub generation: u64,
}

impl Facts {
    /// No facts at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reports that should pay a reward.
    pub fn completions(&self) -> impl Iterator<Item = &ReportSnapshot> {
        self.reports.iter().filter(|r| r.is_completion())
    }

    /// Tasks currently held by a worker.
    pub fn active_tasks(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.tasks.iter().filter(|t| t.status.is_active())
    }
}

/// Read every `.yaml`, `.yml` or `.json` file in `dir` as a record.
///
/// Returns `(file stem, record)` pairs sorted by file name. A missing
/// directory yields nothing; unreadable or non-object files are skipped.
pub fn read_records(dir: &Path) -> Vec<(String, ExternalRecord)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "cannot list snapshot directory");
            }
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && snapshot_format(p).is_some())
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| {
            let record = read_record(path)?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some((stem, record))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotFormat {
    Yaml,
    Json,
}

fn snapshot_format(path: &Path) -> Option<SnapshotFormat> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(SnapshotFormat::Yaml),
        "json" => Some(SnapshotFormat::Json),
        _ => None,
    }
}

fn read_record(path: &Path) -> Option<ExternalRecord> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read snapshot");
            return None;
        }
    };
    let parsed = match snapshot_format(path)? {
        SnapshotFormat::Yaml => {
            serde_yml::from_slice::<Value>(&bytes).map_err(|e| e.to_string())
        }
        SnapshotFormat::Json => {
            serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string())
        }
    };
    match parsed {
        Ok(Value::Object(record)) => Some(record),
        Ok(_) => {
            warn!(path = %path.display(), "snapshot is not a key/value document, skipping");
            None
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "snapshot failed to parse, skipping");
            None
        }
    }
}

/// Read-through cache over the two snapshot directories.
#[derive(Debug)]
pub struct FactsReader {
    tasks_dir: PathBuf,
    reports_dir: PathBuf,
    generation: AtomicU64,
    cache: Mutex<Option<Arc<Facts>>>,
}

impl FactsReader {
    /// Create a reader over the given directories. Nothing is read yet.
    pub fn new(tasks_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            reports_dir: reports_dir.into(),
            generation: AtomicU64::new(0),
            cache: Mutex::new(None),
        }
    }

    /// Directory of task snapshots.
    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Directory of report snapshots.
    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Current generation; bumped by every [`FactsReader::invalidate`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The cached facts, reading the directories if the cache is empty.
    pub fn load(&self) -> Arc<Facts> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(facts) = cache.as_ref() {
            return Arc::clone(facts);
        }
        let facts = Arc::new(self.read_now());
        debug!(
            tasks = facts.tasks.len(),
            reports = facts.reports.len(),
            generation = facts.generation,
            "loaded external facts"
        );
        *cache = Some(Arc::clone(&facts));
        facts
    }

    /// Drop the cache so the next [`FactsReader::load`] re-reads disk.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        *cache = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn read_now(&self) -> Facts {
        let generation = self.generation();
        let tasks = read_records(&self.tasks_dir)
            .iter()
            .filter_map(|(stem, record)| TaskSnapshot::from_record(record, stem))
            .collect();
        let reports = read_records(&self.reports_dir)
            .iter()
            .filter_map(|(stem, record)| ReportSnapshot::from_record(record, stem))
            .collect();
        Facts {
            tasks,
            reports,
            generation,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: &Value) -> ExternalRecord {
        value.as_object().cloned().unwrap()
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn status_parsing_and_idle_conflation() {
        assert_eq!(WorkerStatus::parse("In_Progress"), WorkerStatus::Working);
        assert_eq!(WorkerStatus::parse("DONE"), WorkerStatus::Done);
        assert!(WorkerStatus::parse("idle").is_finished());
        assert!(!WorkerStatus::parse("failed").is_finished());
        assert_eq!(WorkerStatus::parse("sleeping"), WorkerStatus::Unknown);
    }

    #[test]
    fn task_snapshot_uses_file_stem_for_worker() {
        let r = record(&json!({"taskId": "T-7", "status": "working", "category": "bugfix"}));
        let task = TaskSnapshot::from_record(&r, "ada").unwrap();
        assert_eq!(task.worker, "ada");
        assert_eq!(task.task_id, "T-7");
        assert!(task.status.is_active());
    }

    #[test]
    fn record_without_task_id_is_ignored() {
        let r = record(&json!({"worker": "ada", "status": "done"}));
        assert!(ReportSnapshot::from_record(&r, "ada").is_none());
    }

    #[test]
    fn report_identity_falls_back_to_completion_time() {
        let r = record(&json!({
            "worker": "bo",
            "task_id": "T-1",
            "status": "done",
            "completed_at": "2025-03-01T10:07:00Z",
        }));
        let report = ReportSnapshot::from_record(&r, "file").unwrap();
        assert_eq!(report.dedupe_key(), "bo:T-1:2025-03-01T10:07:00+00:00");
        assert!(report.is_completion());
    }

    #[test]
    fn reader_skips_bad_files_and_caches_until_invalidated() {
        let root = temp_dir("town-facts");
        let tasks = root.join("tasks");
        let reports = root.join("reports");
        fs::create_dir_all(&tasks).unwrap();
        fs::create_dir_all(&reports).unwrap();
        fs::write(tasks.join("ada.yaml"), "taskId: T-1\nstatus: working\n").unwrap();
        fs::write(tasks.join("bo.json"), "{not json").unwrap();
        fs::write(tasks.join("notes.txt"), "ignored").unwrap();

        let reader = FactsReader::new(&tasks, &reports);
        let first = reader.load();
        assert_eq!(first.tasks.len(), 1);
        assert!(first.reports.is_empty());

        fs::write(reports.join("ada.yaml"), "taskId: T-1\nstatus: done\n").unwrap();
        assert!(reader.load().reports.is_empty(), "cached until invalidated");

        reader.invalidate();
        let second = reader.load();
        assert_eq!(second.reports.len(), 1);
        assert!(second.generation > first.generation);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_directories_yield_no_facts() {
        let root = temp_dir("town-facts-missing");
        let reader = FactsReader::new(root.join("a"), root.join("b"));
        assert_eq!(*reader.load(), Facts::empty());
    }
}
