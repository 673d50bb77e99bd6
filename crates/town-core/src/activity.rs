//! Activity log normalization and backfill.
//!
//! The log is a ring buffer of at most [`LOG_CAP`] entries, oldest first.
//! Normalization drops entries without an id or a known kind, drops
//! fixture entries left behind by seeding or debugging, keeps the first of
//! any repeated id, and sorts by time.
//!
//! Backfill closes the gap between the external report feed and the log:
//! when a worker's report says a task finished but no `work_complete`
//! entry with reward details exists for it, a `work_start`/`work_complete`
//! pair is synthesized. The start is reused from the nearest preceding
//! `work_start` for that worker when one exists. Entry ids are derived from
//! the completion identity, so repeated backfills and a later real payout
//! land on the same entry instead of duplicating it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use town_economy::{RewardRates, elapsed_minutes, time_reward};
use town_types::{ActivityEntry, ActivityKind, Building, BuildingType, ItemAmount};
use town_world::building_for_category;
use tracing::debug;

use crate::facts::{Facts, ReportSnapshot};
use crate::loose;

/// Most entries kept in the log.
pub const LOG_CAP: usize = 100;

/// Id prefixes of fixture entries.
const SYNTHETIC_PREFIXES: [&str; 4] = ["seed-", "seed_", "debug-", "debug_"];

/// Entry `source` values of fixture entries.
const SYNTHETIC_SOURCES: [&str; 3] = ["seed", "debug", "fixture"];

/// Id of the `work_start` entry for a worker's task.
pub fn start_entry_id(worker: &str, task_id: &str) -> String {
    format!("start:{worker}:{task_id}")
}

/// Id of the `work_complete` entry for a completion dedupe key.
pub fn completion_entry_id(reward_key: &str) -> String {
    format!("complete:{reward_key}")
}

/// Whether a raw entry was planted by seeding or debugging.
pub fn is_synthetic(raw: &Value) -> bool {
    let id_marked = loose::string(raw, &["id"]).is_some_and(|id| {
        let folded = id.to_ascii_lowercase();
        SYNTHETIC_PREFIXES.iter().any(|p| folded.starts_with(p))
    });
    let source_marked = loose::string(raw, &["source"])
        .is_some_and(|s| SYNTHETIC_SOURCES.contains(&s.to_ascii_lowercase().as_str()));
    let flagged = loose::boolean(raw, &["synthetic", "debug"]).unwrap_or(false);
    id_marked || source_marked || flagged
}

/// Parse one raw entry. Returns `None` for malformed entries; a missing or
/// unparseable timestamp becomes `now`.
pub fn parse_entry(raw: &Value, now: DateTime<Utc>) -> Option<ActivityEntry> {
    let id = loose::string(raw, &["id"])?;
    let kind = loose::string(raw, &["kind", "type"]).and_then(|k| ActivityKind::parse(&k))?;
    let at = loose::timestamp(raw, &["timestamp", "at"]).unwrap_or(now);
    let mut entry = ActivityEntry::new(id, kind, at);
    entry.worker = loose::string(raw, &["worker"]);
    entry.task_id = loose::string(raw, &["taskId", "task_id"]);
    entry.category = loose::string(raw, &["category"]);
    entry.message = loose::string(raw, &["message"]);
    entry.gold = loose::unsigned(raw, &["gold"]);
    entry.xp = loose::unsigned(raw, &["xp"]);
    entry.materials = parse_amounts(loose::array(raw, &["materials"]));
    entry.item_id = loose::string(raw, &["itemId", "item_id"]);
    entry.building_type = loose::string(raw, &["buildingType", "building_type"])
        .and_then(|b| BuildingType::parse(&b));
    entry.mission_id = loose::string(raw, &["missionId", "mission_id"]);
    Some(entry)
}

/// Parse `{itemId, quantity}` pairs, dropping malformed or empty ones.
pub fn parse_amounts(raw: &[Value]) -> Vec<ItemAmount> {
    raw.iter()
        .filter_map(|m| {
            let item_id = loose::string(m, &["itemId", "item_id"])?;
            let quantity = u32::try_from(loose::unsigned(m, &["quantity", "count"])?).ok()?;
            (quantity > 0).then_some(ItemAmount { item_id, quantity })
        })
        .collect()
}

/// Parse, filter, dedupe and sort a raw log. Does not cap.
pub fn normalize_log(raw: &[Value], now: DateTime<Utc>) -> Vec<ActivityEntry> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut log: Vec<ActivityEntry> = Vec::with_capacity(raw.len());
    for value in raw {
        if is_synthetic(value) {
            debug!("dropping synthetic activity entry");
            continue;
        }
        let Some(entry) = parse_entry(value, now) else {
            debug!("dropping malformed activity entry");
            continue;
        };
        if seen.insert(entry.id.clone()) {
            log.push(entry);
        }
    }
    sort_log(&mut log);
    log
}

/// Stable sort by timestamp.
pub fn sort_log(log: &mut [ActivityEntry]) {
    log.sort_by_key(|e| e.timestamp);
}

/// Drop the oldest entries beyond [`LOG_CAP`]. Expects a sorted log.
pub fn cap_log(log: &mut Vec<ActivityEntry>) {
    let excess = log.len().saturating_sub(LOG_CAP);
    if excess > 0 {
        log.drain(..excess);
    }
}

/// Append an entry, replacing any entry with the same id, then re-sort and
/// cap. Returns whether the entry is still in the log afterwards; an entry
/// older than everything in a full log is capped straight back out.
pub fn push_entry(log: &mut Vec<ActivityEntry>, entry: ActivityEntry) -> bool {
    let id = entry.id.clone();
    log.retain(|e| e.id != id);
    log.push(entry);
    sort_log(log);
    cap_log(log);
    log.iter().any(|e| e.id == id)
}

/// Whether the log already shows what this report paid.
pub fn has_recorded_reward(log: &[ActivityEntry], report: &ReportSnapshot) -> bool {
    let entry_id = completion_entry_id(&report.dedupe_key());
    log.iter().any(|e| {
        e.kind == ActivityKind::WorkComplete
            && e.has_reward_details()
            && (e.id == entry_id
                || (e.worker.as_deref() == Some(report.worker.as_str())
                    && e.task_id.as_deref() == Some(report.task_id.as_str())))
    })
}

/// Latest `work_start` for `worker` at or before `at`.
pub fn nearest_start<'a>(
    log: &'a [ActivityEntry],
    worker: &str,
    at: DateTime<Utc>,
) -> Option<&'a ActivityEntry> {
    log.iter()
        .filter(|e| {
            e.kind == ActivityKind::WorkStart
                && e.worker.as_deref() == Some(worker)
                && e.timestamp <= at
        })
        .max_by_key(|e| e.timestamp)
}

/// Synthesize missing entries for finished reports. The log is left
/// sorted but uncapped.
pub fn backfill_completions(
    log: &mut Vec<ActivityEntry>,
    facts: &Facts,
    buildings: &[Building],
    rates: RewardRates,
    now: DateTime<Utc>,
) {
    let mut added = 0_usize;
    for report in facts.completions() {
        if has_recorded_reward(log, report) {
            continue;
        }
        let completed_at = report.completed_at.unwrap_or(now);
        let building_type = building_for_category(&report.category);
        let level = buildings
            .iter()
            .find(|b| b.building_type == building_type)
            .map_or(1, |b| b.level);

        let assigned_at = match nearest_start(log, &report.worker, completed_at) {
            Some(start) => Some(start.timestamp),
            None => {
                let at = report.assigned_at.unwrap_or(completed_at);
                let mut start = ActivityEntry::new(
                    start_entry_id(&report.worker, &report.task_id),
                    ActivityKind::WorkStart,
                    at,
                );
                start.worker = Some(report.worker.clone());
                start.task_id = Some(report.task_id.clone());
                start.category = Some(report.category.clone());
                start.building_type = Some(building_type);
                start.message = report.title.clone();
                log.retain(|e| e.id != start.id);
                log.push(start);
                report.assigned_at
            }
        };

        let minutes = elapsed_minutes(assigned_at, Some(completed_at));
        let reward = time_reward(minutes, level, rates);
        let mut complete = ActivityEntry::new(
            completion_entry_id(&report.dedupe_key()),
            ActivityKind::WorkComplete,
            completed_at,
        );
        complete.worker = Some(report.worker.clone());
        complete.task_id = Some(report.task_id.clone());
        complete.category = Some(report.category.clone());
        complete.building_type = Some(building_type);
        complete.message = report.title.clone();
        complete.gold = Some(reward.gold);
        complete.xp = Some(reward.xp);
        log.retain(|e| e.id != complete.id);
        log.push(complete);
        added = added.saturating_add(1);
    }
    if added > 0 {
        debug!(added, "backfilled completions from reports");
        sort_log(log);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use town_types::{Footprint, Position};

    use super::*;
    use crate::facts::WorkerStatus;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).single().unwrap() + Duration::minutes(minute)
    }

    fn report(worker: &str, task: &str, assigned: Option<i64>, completed: i64) -> ReportSnapshot {
        ReportSnapshot {
            worker: worker.to_owned(),
            task_id: task.to_owned(),
            report_id: format!("r-{task}"),
            status: WorkerStatus::Done,
            category: "bugfix".to_owned(),
            title: None,
            assigned_at: assigned.map(t),
            completed_at: Some(t(completed)),
        }
    }

    fn forge(level: u8) -> Vec<Building> {
        vec![Building {
            building_type: BuildingType::Forge,
            level,
            position: Position::new(5, 2),
            footprint: Footprint::new(2, 2),
        }]
    }

    #[test]
    fn malformed_and_synthetic_entries_are_dropped() {
        let raw = json!([
            {"id": "a", "kind": "purchase", "timestamp": "2025-03-05T09:05:00Z"},
            {"id": "seed-1", "kind": "purchase"},
            {"id": "b", "kind": "purchase", "source": "debug"},
            {"id": "c", "kind": "teleport"},
            {"kind": "purchase"},
            {"id": "a", "kind": "work_start"},
            {"id": "d", "kind": "work_start", "timestamp": "2025-03-05T09:01:00Z"},
        ]);
        let log = normalize_log(raw.as_array().unwrap(), t(30));
        let ids: Vec<&str> = log.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[test]
    fn bad_timestamp_becomes_now() {
        let raw = json!([{"id": "x", "kind": "purchase", "timestamp": "soon"}]);
        let log = normalize_log(raw.as_array().unwrap(), t(42));
        assert_eq!(log.first().map(|e| e.timestamp), Some(t(42)));
    }

    #[test]
    fn cap_drops_oldest() {
        let mut log: Vec<ActivityEntry> = (0..130)
            .map(|i| ActivityEntry::new(format!("e{i}"), ActivityKind::Purchase, t(i)))
            .collect();
        cap_log(&mut log);
        assert_eq!(log.len(), LOG_CAP);
        assert_eq!(log.first().map(|e| e.id.as_str()), Some("e30"));
    }

    #[test]
    fn backfill_synthesizes_pair_when_nothing_recorded() {
        let facts = Facts {
            reports: vec![report("ada", "T-1", Some(0), 7)],
            ..Facts::empty()
        };
        let mut log = Vec::new();
        backfill_completions(&mut log, &facts, &forge(3), RewardRates::default(), t(60));

        assert_eq!(log.len(), 2);
        let start = log.first().unwrap();
        assert_eq!(start.kind, ActivityKind::WorkStart);
        assert_eq!(start.timestamp, t(0));
        let complete = log.get(1).unwrap();
        assert_eq!(complete.kind, ActivityKind::WorkComplete);
        assert_eq!((complete.gold, complete.xp), (Some(21), Some(42)));
    }

    #[test]
    fn backfill_reuses_nearest_preceding_start() {
        let facts = Facts {
            reports: vec![report("ada", "T-1", None, 10)],
            ..Facts::empty()
        };
        let mut early = ActivityEntry::new("s1", ActivityKind::WorkStart, t(0));
        early.worker = Some("ada".to_owned());
        let mut late = ActivityEntry::new("s2", ActivityKind::WorkStart, t(8));
        late.worker = Some("ada".to_owned());
        let mut log = vec![early, late];

        backfill_completions(&mut log, &facts, &forge(1), RewardRates::default(), t(60));
        assert_eq!(log.len(), 3);
        let complete = log.last().unwrap();
        assert_eq!(complete.gold, Some(2), "two minutes since the 09:08 start");
    }

    #[test]
    fn backfill_is_stable_across_runs() {
        let facts = Facts {
            reports: vec![report("ada", "T-1", Some(0), 7)],
            ..Facts::empty()
        };
        let mut log = Vec::new();
        backfill_completions(&mut log, &facts, &forge(3), RewardRates::default(), t(60));
        let once = log.clone();
        backfill_completions(&mut log, &facts, &forge(3), RewardRates::default(), t(90));
        assert_eq!(log, once);
    }

    #[test]
    fn recorded_reward_suppresses_backfill() {
        let r = report("ada", "T-1", Some(0), 7);
        let facts = Facts {
            reports: vec![r],
            ..Facts::empty()
        };
        let mut paid = ActivityEntry::new("paid", ActivityKind::WorkComplete, t(7));
        paid.worker = Some("ada".to_owned());
        paid.task_id = Some("T-1".to_owned());
        paid.gold = Some(5);
        let mut log = vec![paid];
        backfill_completions(&mut log, &facts, &forge(1), RewardRates::default(), t(60));
        assert_eq!(log.len(), 1);
    }
}
