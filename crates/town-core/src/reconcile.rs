//! Background reconciliation against the external snapshot feed.
//!
//! Run as a best-effort mutation whenever the watcher sees the task or
//! report directories change, and periodically as a safety net. It
//! records a `work_start` for every active assignment not yet in the log
//! and pays every finished report whose dedupe key is not yet in the
//! ledger. It commits only if that changed anything.

use chrono::{DateTime, Utc};
use rand::Rng;
use town_economy::RewardRates;
use town_types::WorldState;
use tracing::debug;

use crate::activity::{push_entry, start_entry_id};
use crate::facts::Facts;
use crate::store::Transition;
use crate::transitions::{WorkCompletion, WorkStart, pay_completion, start_entry};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `work_start` entries added.
    pub starts_recorded: usize,
    /// Completions paid.
    pub completions_paid: usize,
    /// Whether a write was requested.
    pub changed: bool,
}

/// Bring `state` up to date with `facts`.
pub fn reconcile(
    state: &WorldState,
    facts: &Facts,
    rates: RewardRates,
    now: DateTime<Utc>,
    rng: &mut impl Rng,
) -> Transition<ReconcileReport> {
    let mut next = state.clone();
    let mut report = ReconcileReport::default();

    for task in facts.active_tasks() {
        let id = start_entry_id(&task.worker, &task.task_id);
        if next.activity_log.iter().any(|e| e.id == id) {
            continue;
        }
        let start = WorkStart {
            worker: task.worker.clone(),
            task_id: task.task_id.clone(),
            category: task.category.clone(),
            title: task.title.clone(),
            at: task.assigned_at.unwrap_or(now),
        };
        if push_entry(&mut next.activity_log, start_entry(&start, id)) {
            report.starts_recorded = report.starts_recorded.saturating_add(1);
        }
    }

    for completion in facts.completions() {
        let completion = WorkCompletion::from_report(completion, now);
        if next.has_reward_key(&completion.reward_key()) {
            continue;
        }
        pay_completion(&mut next, &completion, rates, rng);
        report.completions_paid = report.completions_paid.saturating_add(1);
    }

    report.changed = next != *state;
    debug!(
        starts = report.starts_recorded,
        paid = report.completions_paid,
        changed = report.changed,
        "reconciled with external facts"
    );
    if report.changed {
        Transition::commit(next, report)
    } else {
        Transition::skip(report)
    }
}
