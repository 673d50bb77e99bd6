//! File system watching for the state file and the snapshot directories.
//!
//! A `notify` recommended watcher runs on its own thread and forwards
//! classified events into a tokio channel. [`FileWatcher::next_batch`]
//! waits for the first change and then keeps collecting until the
//! debounce window passes quietly, so a burst of writes from one producer
//! triggers a single reconciliation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Which watched input changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The persisted state file.
    State,
    /// A task or report snapshot.
    Facts,
}

/// Changes collected over one debounce window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// The state file changed.
    pub state: bool,
    /// A snapshot directory changed.
    pub facts: bool,
}

impl ChangeSet {
    const fn add(&mut self, change: Change) {
        match change {
            Change::State => self.state = true,
            Change::Facts => self.facts = true,
        }
    }
}

/// Paths the watcher sorts events into.
#[derive(Debug, Clone)]
struct Targets {
    state_path: PathBuf,
    fact_dirs: Vec<PathBuf>,
}

impl Targets {
    fn classify(&self, path: &Path) -> Option<Change> {
        if self.fact_dirs.iter().any(|d| path.starts_with(d)) {
            return Some(Change::Facts);
        }
        // Temporary files from atomic writes show up as siblings; only the
        // rename onto the real name counts.
        (path.file_name() == self.state_path.file_name()).then_some(Change::State)
    }
}

/// Watches the state file's directory and the snapshot directories.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<Change>,
}

impl FileWatcher {
    /// Start watching. Missing directories are created first so that
    /// producers may start after the engine.
    pub fn start(
        state_path: &Path,
        tasks_dir: &Path,
        reports_dir: &Path,
    ) -> Result<Self, EngineError> {
        let state_dir = state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        for dir in [state_dir.as_path(), tasks_dir, reports_dir] {
            std::fs::create_dir_all(dir).map_err(|source| EngineError::Directory {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let targets = Targets {
            state_path: state_path.to_path_buf(),
            fact_dirs: vec![absolute(tasks_dir), absolute(reports_dir)],
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for change in event.paths.iter().filter_map(|p| targets.classify(p)) {
                    if tx.send(change).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        })?;

        watcher.watch(&state_dir, RecursiveMode::NonRecursive)?;
        watcher.watch(tasks_dir, RecursiveMode::Recursive)?;
        watcher.watch(reports_dir, RecursiveMode::Recursive)?;
        debug!(
            state_dir = %state_dir.display(),
            tasks_dir = %tasks_dir.display(),
            reports_dir = %reports_dir.display(),
            "file watcher started"
        );
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next burst of changes. Returns `None` once the watcher
    /// thread has gone away.
    pub async fn next_batch(&mut self, debounce: Duration) -> Option<ChangeSet> {
        let mut batch = ChangeSet::default();
        batch.add(self.rx.recv().await?);
        loop {
            match tokio::time::timeout(debounce, self.rx.recv()).await {
                Ok(Some(change)) => batch.add(change),
                Ok(None) | Err(_) => return Some(batch),
            }
        }
    }
}

/// Absolute form of a path, for comparing against event paths which the
/// platform backends report absolute.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_missing| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> Targets {
        Targets {
            state_path: PathBuf::from("/srv/town/data/world-state.yaml"),
            fact_dirs: vec![
                PathBuf::from("/srv/town/tasks"),
                PathBuf::from("/srv/town/reports"),
            ],
        }
    }

    #[test]
    fn events_are_classified_by_path() {
        let t = targets();
        assert_eq!(
            t.classify(Path::new("/srv/town/tasks/ada.yaml")),
            Some(Change::Facts)
        );
        assert_eq!(
            t.classify(Path::new("/srv/town/data/world-state.yaml")),
            Some(Change::State)
        );
        assert_eq!(
            t.classify(Path::new("/srv/town/data/.world-state.yaml.tmp-1")),
            None
        );
        assert_eq!(t.classify(Path::new("/srv/town/data/notes.md")), None);
    }

    #[test]
    fn change_sets_accumulate() {
        let mut set = ChangeSet::default();
        set.add(Change::Facts);
        set.add(Change::Facts);
        assert_eq!(
            set,
            ChangeSet {
                state: false,
                facts: true
            }
        );
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_batch() {
        let root = std::env::temp_dir().join(format!("town-watch-{}", uuid::Uuid::now_v7()));
        let state = root.join("data").join("world-state.yaml");
        let tasks = root.join("tasks");
        let reports = root.join("reports");
        let Ok(mut watcher) = FileWatcher::start(&state, &tasks, &reports) else {
            return;
        };
        for i in 0..3 {
            let written = std::fs::write(tasks.join(format!("w{i}.yaml")), "taskId: t\n");
            assert!(written.is_ok());
        }
        let batch = tokio::time::timeout(
            Duration::from_secs(5),
            watcher.next_batch(Duration::from_millis(200)),
        )
        .await;
        if let Ok(Some(batch)) = batch {
            assert!(batch.facts);
        }
        let _cleanup = std::fs::remove_dir_all(&root);
    }
}
