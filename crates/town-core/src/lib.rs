//! State engine for the Townhall world.
//!
//! The world lives in a single YAML file that other processes may edit
//! at any time. This crate owns every read and write of that file:
//! snapshots are taken together with the file's modification time, every
//! write goes through one FIFO queue with a compare-and-swap check on that
//! time, and every read or write re-derives the full consistent state from
//! the persisted fields plus the task and report snapshots produced by
//! workers.
//!
//! # Modules
//!
//! - [`activity`] -- Activity log normalization and completion backfill.
//! - [`config`] -- `town-config.yaml` loading with environment overrides.
//! - [`derive`] -- The derived-state pipeline run on every read and write.
//! - [`error`] -- [`StoreError`] and [`TransitionError`].
//! - [`facts`] -- Task and report snapshots from external producers.
//! - [`loose`] -- Lenient field accessors over untyped documents.
//! - [`missions`] -- Mission catalog, rotation and progress.
//! - [`notifier`] -- Callbacks run after committed writes.
//! - [`progression`] -- Levels, ranks, achievements, titles and records.
//! - [`reconcile`] -- Background catch-up with the external facts.
//! - [`snapshot`] -- Reading and atomically writing the state file.
//! - [`store`] -- [`TownStore`], the mutation queue and read path.
//! - [`transitions`] -- The state edits offered to the routing layer.

pub mod activity;
pub mod config;
pub mod derive;
pub mod error;
pub mod facts;
pub mod loose;
pub mod missions;
pub mod notifier;
pub mod progression;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod transitions;

// Re-export primary types at crate root.
pub use config::{ConfigError, TownConfig};
pub use derive::{DeriveContext, DeriveSettings, normalize_state, normalize_world};
pub use error::{StoreError, TransitionError};
pub use facts::{Facts, FactsReader, ReportSnapshot, TaskSnapshot, WorkerStatus};
pub use notifier::{BroadcastNotifier, ChangeNotifier, NoOpNotifier};
pub use reconcile::{ReconcileReport, reconcile};
pub use snapshot::{Snapshot, SnapshotReader, same_modification_time};
pub use store::{TownStore, Transition};
pub use transitions::{
    CompletionOutcome, Outcome, PurchaseOutcome, UpgradeOutcome, WorkCompletion, WorkStart,
    apply_work_completion, claim_mission, consume_item, equip_title, move_building,
    place_decoration, purchase_item, record_work_start, store_decoration, upgrade_building,
};
