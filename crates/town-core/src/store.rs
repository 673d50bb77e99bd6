//! The mutation queue and read path over the persisted world state.
//!
//! [`TownStore`] is the only way anything reads or writes the state file.
//! Writes are jobs on a single FIFO channel drained by one consumer task,
//! so at most one mutation body runs at a time and mutations complete in
//! the order they were enqueued. Each mutation is an optimistic
//! read-transition-write cycle:
//!
//! 1. Take a [`Snapshot`](crate::snapshot::Snapshot) (document + mtime).
//! 2. Derive the current [`WorldState`] from it and the external facts.
//! 3. Run the caller's transition. No next state means nothing to write.
//! 4. Mirror gold, stamp `updatedAt`, re-derive.
//! 5. Compare the file's mtime with the one captured in step 1, within
//!    the configured epsilon. A mismatch means another writer got in
//!    first: start over, up to the configured number of attempts, then
//!    fail with [`StoreError::Conflict`].
//! 6. Write atomically, drop cached views, notify subscribers.
//!
//! Reads never enter the queue. They re-snapshot the file every time and
//! reuse the last derived view only if neither the file nor the facts
//! changed since.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{mpsc, oneshot};
use town_types::WorldState;
use tracing::{debug, error, info, warn};

use crate::config::TownConfig;
use crate::derive::{DeriveContext, DeriveSettings, normalize_state, normalize_world};
use crate::error::StoreError;
use crate::facts::{Facts, FactsReader};
use crate::notifier::ChangeNotifier;
use crate::snapshot::{Snapshot, SnapshotReader, same_modification_time};

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// What a transition function returns: an optional next state and a
/// result for the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<R> {
    /// State to persist, or `None` when nothing changes.
    pub next: Option<WorldState>,
    /// Value handed back to the caller of `mutate`.
    pub result: R,
}

impl<R> Transition<R> {
    /// Persist `next` and return `result`.
    pub const fn commit(next: WorldState, result: R) -> Self {
        Self {
            next: Some(next),
            result,
        }
    }

    /// Write nothing and return `result`.
    pub const fn skip(result: R) -> Self {
        Self { next: None, result }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce(&Shared) + Send>;

/// A derived view and the inputs it was derived from.
struct CachedView {
    modified: Option<SystemTime>,
    generation: u64,
    day: NaiveDate,
    state: Arc<WorldState>,
}

/// State shared between store handles and the queue consumer.
struct Shared {
    reader: SnapshotReader,
    facts: FactsReader,
    settings: DeriveSettings,
    attempts: u32,
    notifiers: RwLock<Vec<Arc<dyn ChangeNotifier>>>,
    view: Mutex<Option<CachedView>>,
    commits: AtomicU64,
}

/// Handle to the world state store. Cheap to clone; all clones share one
/// queue.
#[derive(Clone)]
pub struct TownStore {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for TownStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TownStore")
            .field("path", &self.shared.reader.path())
            .field("commits", &self.commits())
            .finish_non_exhaustive()
    }
}

impl TownStore {
    /// Open the store described by `config` and start its queue consumer.
    ///
    /// The state file's parent directory is created if missing; the file
    /// itself is not created until the first committed write.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the parent directory cannot be
    /// created.
    pub fn open(config: &TownConfig) -> Result<Self, StoreError> {
        let storage = &config.storage;
        if let Some(parent) = storage
            .state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }

        let shared = Arc::new(Shared {
            reader: SnapshotReader::new(&storage.state_path, storage.cas_epsilon()),
            facts: FactsReader::new(&storage.tasks_dir, &storage.reports_dir),
            settings: DeriveSettings::from_config(config),
            attempts: storage.attempts(),
            notifiers: RwLock::new(Vec::new()),
            view: Mutex::new(None),
            commits: AtomicU64::new(0),
        });

        let (jobs, rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(drain_queue(Arc::clone(&shared), rx));

        info!(
            path = %storage.state_path.display(),
            attempts = shared.attempts,
            epsilon_us = storage.cas_epsilon_us,
            "town store opened"
        );
        Ok(Self { shared, jobs })
    }

    /// Path of the persisted state file.
    pub fn path(&self) -> &Path {
        self.shared.reader.path()
    }

    /// The external facts reader.
    pub fn facts(&self) -> &FactsReader {
        &self.shared.facts
    }

    /// Settings used by every derivation.
    pub fn settings(&self) -> &DeriveSettings {
        &self.shared.settings
    }

    /// Number of writes committed through this store.
    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::Acquire)
    }

    /// Register a callback run after every committed write.
    pub fn add_notifier(&self, notifier: Arc<dyn ChangeNotifier>) {
        self.shared
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifier);
    }

    /// Forget the cached external facts; the next read or mutation re-reads
    /// the snapshot directories.
    pub fn invalidate_facts(&self) {
        self.shared.facts.invalidate();
    }

    /// Run a transition through the queue.
    ///
    /// The transition may be called more than once if the file changes
    /// underneath it; only the result of the committed (or skipped)
    /// attempt is returned.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the state file is corrupt,
    /// [`StoreError::Conflict`] if every attempt lost the race, I/O and
    /// serialization failures, or [`StoreError::QueueClosed`].
    pub async fn mutate<R, F>(&self, mut transition: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnMut(&WorldState) -> Transition<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |shared: &Shared| {
            let outcome = shared.run_mutation(&mut transition);
            if tx.send(outcome).is_err() {
                debug!("mutation caller went away before its result arrived");
            }
        });
        self.jobs
            .send(job)
            .map_err(|_closed| StoreError::QueueClosed)?;
        rx.await.map_err(|_dropped| StoreError::QueueClosed)?
    }

    /// Like [`TownStore::mutate`], but a corrupt state file aborts the write
    /// quietly with `Ok(None)` instead of failing. Used by background
    /// reconciliation.
    ///
    /// # Errors
    ///
    /// Everything [`TownStore::mutate`] returns except `Unavailable`.
    pub async fn mutate_best_effort<R, F>(&self, transition: F) -> Result<Option<R>, StoreError>
    where
        R: Send + 'static,
        F: FnMut(&WorldState) -> Transition<R> + Send + 'static,
    {
        match self.mutate(transition).await {
            Ok(result) => Ok(Some(result)),
            Err(StoreError::Unavailable { reason }) => {
                warn!(%reason, "state file unavailable, skipping best-effort write");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The current derived state, re-snapshotted from disk.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the state file is corrupt, or
    /// [`StoreError::Io`].
    pub async fn current_state(&self) -> Result<Arc<WorldState>, StoreError> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.read_view())
            .await
            .map_err(|e| StoreError::from(io::Error::other(e)))?
    }
}

/// Queue consumer: runs jobs one at a time, in arrival order, until every
/// sender is gone.
async fn drain_queue(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let shared = Arc::clone(&shared);
        if let Err(e) = tokio::task::spawn_blocking(move || job(&shared)).await {
            error!(error = %e, "mutation job panicked");
        }
    }
    debug!("mutation queue closed");
}

// ---------------------------------------------------------------------------
// Queue body and read path
// ---------------------------------------------------------------------------

impl Shared {
    fn derive(&self, snapshot: &Snapshot, facts: &Facts, now: DateTime<Utc>) -> WorldState {
        let ctx = DeriveContext {
            facts,
            now,
            settings: &self.settings,
        };
        normalize_world(snapshot.document.as_ref(), &ctx)
    }

    fn run_mutation<R, F>(&self, transition: &mut F) -> Result<R, StoreError>
    where
        F: FnMut(&WorldState) -> Transition<R>,
    {
        let attempts = self.attempts;
        for attempt in 1..=attempts {
            let snapshot = self.reader.read()?;
            let facts = self.facts.load();
            let now = Utc::now();
            let current = self.derive(&snapshot, &facts, now);

            let Transition { next, result } = transition(&current);
            let Some(mut next) = next else {
                debug!(attempt, "transition left the state unchanged");
                return Ok(result);
            };

            mirror_gold(&current, &mut next);
            next.updated_at = Some(now);
            let ctx = DeriveContext {
                facts: &facts,
                now,
                settings: &self.settings,
            };
            let next = normalize_state(&next, &ctx);

            let latest = self.reader.modified()?;
            if !same_modification_time(snapshot.modified, latest, self.reader.epsilon()) {
                warn!(attempt, attempts, "state file changed during mutation, retrying");
                continue;
            }

            let modified = self.reader.write(&next)?;
            self.invalidate_view();
            let commit = self.commits.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            info!(
                commit,
                attempt,
                gold = next.town.gold,
                xp = next.town.xp,
                log_len = next.activity_log.len(),
                ?modified,
                "state committed"
            );
            self.notify(&Arc::new(next));
            return Ok(result);
        }
        warn!(attempts, "write conflict, giving up");
        Err(StoreError::Conflict { attempts })
    }

    fn read_view(&self) -> Result<Arc<WorldState>, StoreError> {
        let snapshot = self.reader.read()?;
        let generation = self.facts.generation();
        let now = Utc::now();
        let day = now.date_naive();

        if let Some(hit) = self.cached_view(snapshot.modified, generation, day) {
            return Ok(hit);
        }

        let facts = self.facts.load();
        let state = Arc::new(self.derive(&snapshot, &facts, now));
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedView {
            modified: snapshot.modified,
            generation,
            day,
            state: Arc::clone(&state),
        });
        Ok(state)
    }

    fn cached_view(
        &self,
        modified: Option<SystemTime>,
        generation: u64,
        day: NaiveDate,
    ) -> Option<Arc<WorldState>> {
        let view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        view.as_ref()
            .filter(|c| {
                c.modified == modified && c.generation == generation && c.day == day
            })
            .map(|c| Arc::clone(&c.state))
    }

    fn invalidate_view(&self) {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn notify(&self, state: &Arc<WorldState>) {
        let notifiers = self
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for notifier in notifiers.iter() {
            notifier.notify(state);
        }
    }
}

/// Keep `town.gold` and the legacy `economy.gold` equal. Whichever side
/// the transition changed wins; `town` wins if both or neither changed.
pub fn mirror_gold(current: &WorldState, next: &mut WorldState) {
    let town_changed = next.town.gold != current.town.gold;
    let economy_changed = next.economy.gold != current.economy.gold;
    if economy_changed && !town_changed {
        next.town.gold = next.economy.gold;
    } else {
        next.economy.gold = next.town.gold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gold_mirror_prefers_changed_side() {
        let mut current = WorldState::default();
        current.town.gold = 100;
        current.economy.gold = 100;

        let mut via_economy = current.clone();
        via_economy.economy.gold = 40;
        mirror_gold(&current, &mut via_economy);
        assert_eq!(via_economy.town.gold, 40);

        let mut via_town = current.clone();
        via_town.town.gold = 70;
        mirror_gold(&current, &mut via_town);
        assert_eq!(via_town.economy.gold, 70);

        let mut both = current.clone();
        both.town.gold = 10;
        both.economy.gold = 20;
        mirror_gold(&current, &mut both);
        assert_eq!(both.economy.gold, 10);
    }

    #[test]
    fn transition_constructors() {
        let skip: Transition<u8> = Transition::skip(1);
        assert!(skip.next.is_none());
        let commit = Transition::commit(WorldState::default(), 2);
        assert!(commit.next.is_some());
        assert_eq!(commit.result, 2);
    }
}
