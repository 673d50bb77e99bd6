//! Townhall state engine binary.
//!
//! Owns the world state file for one deployment. It keeps the file in
//! step with the task and report snapshots that workers drop into their
//! directories, and pushes every committed state to in-process
//! subscribers.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `town-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the store (creates the state file's directory)
//! 4. Attach the broadcast notifier and a logging subscriber
//! 5. Run an initial best-effort reconcile
//! 6. Watch the state and snapshot directories
//! 7. Reconcile on every debounced change and on a fixed interval
//! 8. Shut down on Ctrl-C

mod error;
mod watcher;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::broadcast::error::RecvError;
use town_core::{BroadcastNotifier, ReconcileReport, TownConfig, TownStore, reconcile};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::watcher::FileWatcher;

/// Capacity of the in-process state broadcast.
const BROADCAST_CAPACITY: usize = 64;

/// Application entry point for the state engine.
///
/// # Errors
///
/// Returns an error if configuration, the store, or the file watcher
/// cannot be set up.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration; its level is the fallback log filter.
    let config = TownConfig::load_or_default(Path::new("town-config.yaml"))
        .map_err(EngineError::from)
        .context("loading town-config.yaml")?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("town-engine starting");
    info!(
        state_path = %config.storage.state_path.display(),
        tasks_dir = %config.storage.tasks_dir.display(),
        reports_dir = %config.storage.reports_dir.display(),
        max_attempts = config.storage.attempts(),
        "Configuration loaded"
    );

    // 3. Open the store.
    let store = TownStore::open(&config)
        .map_err(EngineError::from)
        .context("opening the state store")?;

    // 4. Broadcast committed states.
    let notifier = Arc::new(BroadcastNotifier::new(BROADCAST_CAPACITY));
    let mut updates = notifier.subscribe();
    store.add_notifier(notifier);
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(state) => debug!(
                    gold = state.town.gold,
                    level = state.town.level,
                    missions = state.missions.len(),
                    "state committed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    info!("Change notifier attached");

    // 5. Catch up with anything that happened while we were down.
    run_reconcile(&store, "startup").await;

    // 6. Watch the inputs.
    let mut watcher = FileWatcher::start(
        store.path(),
        store.facts().tasks_dir(),
        store.facts().reports_dir(),
    )
    .context("starting the file watcher")?;
    info!("File watcher started");

    // 7. Reconcile loop.
    let debounce = config.watcher.debounce();
    let mut interval = tokio::time::interval(config.watcher.reconcile_interval());
    interval.tick().await;
    info!(
        debounce_ms = config.watcher.debounce_ms,
        interval_secs = config.watcher.reconcile_interval().as_secs(),
        "Reconcile loop running"
    );

    loop {
        tokio::select! {
            batch = watcher.next_batch(debounce) => {
                let Some(batch) = batch else {
                    error!("file watcher stopped");
                    break;
                };
                if batch.facts {
                    store.invalidate_facts();
                }
                debug!(state = batch.state, facts = batch.facts, "inputs changed");
                run_reconcile(&store, "watch").await;
            }
            _ = interval.tick() => {
                store.invalidate_facts();
                run_reconcile(&store, "interval").await;
            }
            // 8. Shut down.
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "cannot listen for Ctrl-C");
                }
                break;
            }
        }
    }

    info!(commits = store.commits(), "town-engine stopped");
    Ok(())
}

/// Queue one best-effort reconcile and log what it did.
async fn run_reconcile(store: &TownStore, trigger: &'static str) {
    let rates = store.settings().rates;
    let source = store.clone();
    let outcome = store
        .mutate_best_effort(move |state| {
            let facts = source.facts().load();
            let mut rng = SmallRng::from_rng(&mut rand::rng());
            reconcile(state, &facts, rates, Utc::now(), &mut rng)
        })
        .await;

    match outcome {
        Ok(Some(ReconcileReport {
            starts_recorded,
            completions_paid,
            changed: true,
        })) => info!(trigger, starts_recorded, completions_paid, "reconciled"),
        Ok(Some(_)) => debug!(trigger, "nothing to reconcile"),
        Ok(None) => {}
        Err(e) => warn!(trigger, error = %e, status = e.status_code(), "reconcile failed"),
    }
}
