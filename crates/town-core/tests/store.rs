//! Integration tests for the mutation queue and read path.
//!
//! Each test runs a real [`TownStore`] against a state file in its own
//! temporary directory, so the CAS check, atomic writes and re-derivation
//! are exercised end to end.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde_json::Value;
use town_core::transitions::{WorkCompletion, apply_work_completion, purchase_item};
use town_core::{BroadcastNotifier, StoreError, TownConfig, TownStore, Transition};
use town_types::WorldState;
use town_world::Occupancy;
use town_world::grid::footprint_cells;

struct Sandbox {
    root: PathBuf,
    config: TownConfig,
}

impl Sandbox {
    fn new(prefix: &str) -> Self {
        let root = std::env::temp_dir().join(format!("{prefix}-{}", uuid::Uuid::now_v7()));
        let mut config = TownConfig::default();
        config.storage.state_path = root.join("data").join("world-state.yaml");
        config.storage.tasks_dir = root.join("tasks");
        config.storage.reports_dir = root.join("reports");
        Self { root, config }
    }

    fn state_path(&self) -> PathBuf {
        self.config.storage.state_path.clone()
    }

    fn open(&self) -> TownStore {
        TownStore::open(&self.config).unwrap()
    }

    fn persisted(&self) -> Value {
        let raw = fs::read_to_string(self.state_path()).unwrap();
        serde_yml::from_str(&raw).unwrap()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            eprintln!("could not clean up {}: {e}", self.root.display());
        }
    }
}

fn add_gold(amount: u64) -> impl FnMut(&WorldState) -> Transition<u64> + Send + 'static {
    move |state: &WorldState| {
        let mut next = state.clone();
        next.town.gold += amount;
        let gold = next.town.gold;
        Transition::commit(next, gold)
    }
}

fn touch(path: &Path, ahead: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + ahead)
        .unwrap();
}

fn completion() -> WorkCompletion {
    let done = chrono::Utc::now();
    WorkCompletion {
        worker: "ada".to_owned(),
        task_id: "t-1".to_owned(),
        report_id: "r-1".to_owned(),
        category: "feature".to_owned(),
        title: None,
        assigned_at: Some(done - chrono::Duration::minutes(6)),
        completed_at: done,
    }
}

#[tokio::test]
async fn missing_file_reads_as_default_state() {
    let sandbox = Sandbox::new("town-store-missing");
    let store = sandbox.open();

    let state = store.current_state().await.unwrap();
    assert_eq!(state.town.gold, 100);
    assert_eq!(state.buildings.len(), 10);
    assert!((8..=10).contains(&state.missions.len()));
    assert!(!sandbox.state_path().exists());
}

#[tokio::test]
async fn skipped_transition_writes_nothing() {
    let sandbox = Sandbox::new("town-store-skip");
    let store = sandbox.open();

    let result = store
        .mutate(|_state: &WorldState| Transition::skip("nothing to do"))
        .await
        .unwrap();
    assert_eq!(result, "nothing to do");
    assert!(!sandbox.state_path().exists());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn corrupt_file_is_unavailable_and_left_alone() {
    let sandbox = Sandbox::new("town-store-corrupt");
    let store = sandbox.open();
    let garbage = "town: [unclosed\n  gold: ";
    fs::write(sandbox.state_path(), garbage).unwrap();

    let read = store.current_state().await.unwrap_err();
    assert!(matches!(read, StoreError::Unavailable { .. }));
    assert_eq!(read.status_code(), 503);

    let write = store.mutate(add_gold(5)).await.unwrap_err();
    assert!(matches!(write, StoreError::Unavailable { .. }));

    let best_effort = store.mutate_best_effort(add_gold(5)).await.unwrap();
    assert!(best_effort.is_none());

    assert_eq!(fs::read_to_string(sandbox.state_path()).unwrap(), garbage);
}

#[tokio::test]
async fn completion_is_paid_exactly_once() {
    let sandbox = Sandbox::new("town-store-idempotent");
    let store = sandbox.open();
    let rates = store.settings().rates;

    for _ in 0..3 {
        let c = completion();
        let mut rng = SmallRng::seed_from_u64(11);
        store
            .mutate(move |state: &WorldState| apply_work_completion(state, &c, rates, &mut rng))
            .await
            .unwrap()
            .unwrap();
    }

    let state = store.current_state().await.unwrap();
    assert_eq!(state.town.gold, 106);
    assert_eq!(state.town.xp, 12);
    assert_eq!(state.stats.tasks_completed, 1);
    assert_eq!(state.reward_ledger, vec!["ada:t-1:r-1".to_owned()]);
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn cas_mismatch_retries_against_the_new_file() {
    let sandbox = Sandbox::new("town-store-retry");
    let store = sandbox.open();
    store.mutate(add_gold(1)).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let path = sandbox.state_path();
    let attempts_seen = store
        .mutate(move |state: &WorldState| {
            let call = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                // Another writer lands between our read and our write.
                touch(&path, Duration::from_secs(5));
            }
            let mut next = state.clone();
            next.town.gold += 10;
            Transition::commit(next, call)
        })
        .await
        .unwrap();

    assert_eq!(attempts_seen, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let state = store.current_state().await.unwrap();
    assert_eq!(state.town.gold, 111);
}

#[tokio::test]
async fn conflict_after_every_attempt_loses() {
    let sandbox = Sandbox::new("town-store-conflict");
    let store = sandbox.open();
    store.mutate(add_gold(1)).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let path = sandbox.state_path();
    let err = store
        .mutate(move |state: &WorldState| {
            let call = seen.fetch_add(1, Ordering::SeqCst) + 1;
            touch(&path, Duration::from_secs(10 * u64::from(call)));
            let mut next = state.clone();
            next.town.gold += 1_000;
            Transition::commit(next, ())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Conflict { attempts: 3 }));
    assert_eq!(err.status_code(), 409);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let state = store.current_state().await.unwrap();
    assert_eq!(state.town.gold, 101);
}

#[tokio::test]
async fn concurrent_mutations_run_in_order_without_lost_updates() {
    let sandbox = Sandbox::new("town-store-fifo");
    let store = sandbox.open();

    let results = join_all((0..20).map(|_| store.mutate(add_gold(1)))).await;
    let observed: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(observed, (101..=120).collect::<Vec<u64>>());

    let state = store.current_state().await.unwrap();
    assert_eq!(state.town.gold, 120);
    assert_eq!(state.economy.gold, 120);
    assert_eq!(store.commits(), 20);
}

#[tokio::test]
async fn notifier_receives_each_commit() {
    let sandbox = Sandbox::new("town-store-notify");
    let store = sandbox.open();
    let notifier = Arc::new(BroadcastNotifier::new(8));
    let mut rx = notifier.subscribe();
    store.add_notifier(notifier);

    store.mutate(add_gold(7)).await.unwrap();
    let pushed = rx.recv().await.unwrap();
    assert_eq!(pushed.town.gold, 107);
    assert!(pushed.updated_at.is_some());

    store
        .mutate(|_state: &WorldState| Transition::skip(()))
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn reads_reuse_the_view_until_the_file_changes() {
    let sandbox = Sandbox::new("town-store-view");
    let store = sandbox.open();
    store.mutate(add_gold(1)).await.unwrap();

    let first = store.current_state().await.unwrap();
    let again = store.current_state().await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    store.mutate(add_gold(1)).await.unwrap();
    let after = store.current_state().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &after));
    assert_eq!(after.town.gold, 102);
}

#[tokio::test]
async fn writes_persist_a_repaired_state() {
    let sandbox = Sandbox::new("town-store-repair");
    let store = sandbox.open();

    let log: Vec<String> = (0..150)
        .map(|i| {
            format!(
                "  - id: e{i}\n    kind: purchase\n    timestamp: 2025-01-01T00:{:02}:{:02}Z\n",
                i / 60,
                i % 60
            )
        })
        .collect();
    let header = concat!(
        "town:\n  gold: 500\n  xp: 0\n",
        "buildings:\n",
        "  - type: forge\n    position: {x: 0, y: 0}\n",
        "  - type: market\n    position: {x: 0, y: 0}\n",
        "missions: []\ntheme: dusk\nactivityLog:\n",
    );
    let doc = format!("{header}{}", log.concat());
    fs::write(sandbox.state_path(), doc).unwrap();

    let bought = store
        .mutate(|state: &WorldState| purchase_item(state, "lantern", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bought.decoration_ids.len(), 1);

    let persisted = sandbox.persisted();
    assert_eq!(persisted["theme"], Value::String("dusk".to_owned()));
    assert_eq!(persisted["town"]["gold"], persisted["economy"]["gold"]);
    let state: WorldState = serde_json::from_value(persisted).unwrap();

    assert!(state.activity_log.len() <= 100);
    assert!(state.activity_log.iter().any(|e| e.item_id.as_deref() == Some("lantern")));
    assert!((8..=10).contains(&state.missions.len()));
    assert_eq!(state.town.gold, 460);

    let mut occupancy = Occupancy::new();
    for b in &state.buildings {
        for cell in footprint_cells(b.position, b.footprint) {
            assert!(!occupancy.is_occupied(cell), "{cell:?} used twice");
        }
        occupancy.mark(b.position, b.footprint);
    }
    for d in state.decorations.iter().filter(|d| d.is_placed()) {
        assert!(!occupancy.is_occupied(d.position.unwrap()));
    }
}
