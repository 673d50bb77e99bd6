//! Mission catalog, rotation and progress.
//!
//! The town always has between [`MIN_MISSIONS`] and [`MAX_MISSIONS`]
//! missions deployed out of the sixteen in [`MISSIONS`]. Rotation keeps
//! whatever was already deployed, makes sure the always-deployed missions
//! are present, then tops the window up with the *scarcest* missions: those
//! whose task category has been completed least often among the last
//! [`SCARCITY_WINDOW`] completions, ties broken by id. If the window is
//! still short of the minimum it is backfilled in catalog order.
//!
//! Daily missions reset at midnight UTC, weekly missions on Monday.
//! Lifetime missions never reset. When a claimed mission's period rolls
//! over it is retired from the window, which is what makes room for
//! rotation; an unclaimed one resets in place.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Days, NaiveDate};
use serde_json::Value;
use town_types::{
    ActivityEntry, ActivityKind, Mission, MissionGoal, MissionPeriod, Progress, Reward,
};
use town_world::canonical_category;
use tracing::debug;

use crate::config::{MAX_MISSIONS, MIN_MISSIONS};
use crate::loose;

/// How many recent completions feed the scarcity ranking.
pub const SCARCITY_WINDOW: usize = 24;

/// Missions that are deployed no matter what.
pub const ALWAYS_DEPLOYED: [&str; 2] = ["daily_first_task", "weekly_ten_tasks"];

/// Fixed data for a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionDef {
    /// Stable id.
    pub id: &'static str,
    /// Display title.
    pub title: &'static str,
    /// What is counted.
    pub goal: MissionGoal,
    /// Canonical task category, for category-filtered task missions.
    pub category: Option<&'static str>,
    /// Count needed.
    pub target: u32,
    /// Reset cadence.
    pub period: MissionPeriod,
    /// Paid on claim.
    pub reward: Reward,
}

#[allow(clippy::too_many_arguments)]
const fn entry(
    id: &'static str,
    title: &'static str,
    goal: MissionGoal,
    category: Option<&'static str>,
    target: u32,
    period: MissionPeriod,
    gold: u64,
    xp: u64,
) -> MissionDef {
    MissionDef {
        id,
        title,
        goal,
        category,
        target,
        period,
        reward: Reward { gold, xp },
    }
}

use MissionGoal::{CollectMaterials, CompleteTasks, EarnGold, PurchaseItems, UpgradeBuildings};
use MissionPeriod::{Daily, Lifetime, Weekly};

/// The full mission catalog, in backfill order.
#[rustfmt::skip]
pub const MISSIONS: [MissionDef; 16] = [
    entry("daily_first_task", "First Task of the Day", CompleteTasks, None, 1, Daily, 20, 10),
    entry("daily_three_tasks", "Busy Day", CompleteTasks, None, 3, Daily, 50, 30),
    entry("daily_feature_work", "Workshop Shift", CompleteTasks, Some("feature"), 2, Daily, 40, 25),
    entry("daily_bugfix_work", "At the Forge", CompleteTasks, Some("bugfix"), 2, Daily, 40, 25),
    entry("daily_docs_work", "Archivist", CompleteTasks, Some("docs"), 1, Daily, 30, 20),
    entry("daily_review_work", "On Watch", CompleteTasks, Some("review"), 2, Daily, 40, 25),
    entry("daily_test_work", "Drill Practice", CompleteTasks, Some("test"), 2, Daily, 40, 25),
    entry("daily_research_work", "Quiet Study", CompleteTasks, Some("research"), 1, Daily, 30, 20),
    entry("daily_earn_gold", "Full Coffers", EarnGold, None, 100, Daily, 30, 30),
    entry("daily_collect_materials", "Gatherer", CollectMaterials, None, 5, Daily, 35, 20),
    entry("weekly_ten_tasks", "Productive Week", CompleteTasks, None, 10, Weekly, 150, 100),
    entry("weekly_ops_work", "Harbor Master", CompleteTasks, Some("ops"), 3, Weekly, 90, 60),
    entry("weekly_planning_work", "Councillor", CompleteTasks, Some("planning"), 3, Weekly, 90, 60),
    entry("weekly_shopper", "Market Regular", PurchaseItems, None, 3, Weekly, 60, 40),
    entry("weekly_builder", "Builder", UpgradeBuildings, None, 1, Weekly, 120, 80),
    entry("lifetime_hoarder", "Hoarder", CollectMaterials, None, 100, Lifetime, 500, 300),
];

/// Look up a mission by id.
pub fn mission_def(id: &str) -> Option<&'static MissionDef> {
    MISSIONS.iter().find(|m| m.id == id)
}

/// Whether the mission is always deployed.
pub fn is_always_deployed(id: &str) -> bool {
    ALWAYS_DEPLOYED.contains(&id)
}

/// Start of the period containing `today`. Lifetime periods start whenever
/// the mission was first deployed (`deployed_on`).
pub fn current_period_start(
    period: MissionPeriod,
    today: NaiveDate,
    deployed_on: NaiveDate,
) -> NaiveDate {
    match period {
        MissionPeriod::Daily => today,
        MissionPeriod::Weekly => {
            let back = u64::from(today.weekday().num_days_from_monday());
            today.checked_sub_days(Days::new(back)).unwrap_or(today)
        }
        MissionPeriod::Lifetime => deployed_on.min(today),
    }
}

/// A fresh instance of a mission for the period containing `today`.
pub fn deploy(def: &MissionDef, today: NaiveDate) -> Mission {
    Mission {
        id: def.id.to_owned(),
        title: def.title.to_owned(),
        goal: def.goal,
        category: def.category.map(str::to_owned),
        progress: Progress {
            current: 0,
            target: def.target,
        },
        claimed: false,
        period: def.period,
        period_start: current_period_start(def.period, today, today),
        reward: def.reward,
    }
}

/// A mission as found in the persisted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMission {
    /// Mission id.
    pub id: String,
    /// Progress count.
    pub current: u64,
    /// Whether it was claimed.
    pub claimed: bool,
    /// Stored period start.
    pub period_start: Option<NaiveDate>,
}

/// Read the persisted missions. Entries without an id are skipped.
pub fn parse_persisted(raw: &[Value]) -> Vec<PersistedMission> {
    raw.iter()
        .filter_map(|m| {
            let id = loose::string(m, &["id"])?;
            let current = loose::field(m, &["progress"])
                .and_then(|p| {
                    if p.is_object() {
                        loose::unsigned(p, &["current"])
                    } else {
                        loose::as_integer(p).map(|n| u64::try_from(n.max(0)).unwrap_or(0))
                    }
                })
                .unwrap_or(0);
            Some(PersistedMission {
                id,
                current,
                claimed: loose::boolean(m, &["claimed"]).unwrap_or(false),
                period_start: loose::date(m, &["periodStart", "period_start"]),
            })
        })
        .collect()
}

/// How often each canonical category was completed among the last
/// [`SCARCITY_WINDOW`] completions of an oldest-first log.
pub fn recent_category_counts(log: &[ActivityEntry]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for entry in log
        .iter()
        .rev()
        .filter(|e| e.kind == ActivityKind::WorkComplete)
        .take(SCARCITY_WINDOW)
    {
        let category = canonical_category(entry.category.as_deref().unwrap_or("general"));
        let slot = counts.entry(category).or_insert(0_usize);
        *slot = slot.saturating_add(1);
    }
    counts
}

/// Scarcity rank of a mission; lower is scarcer. Missions without a
/// category are never penalized.
fn scarcity(def: &MissionDef, counts: &BTreeMap<&'static str, usize>) -> usize {
    def.category
        .and_then(|c| counts.get(c).copied())
        .unwrap_or(0)
}

/// Choose and normalize the deployed mission window.
pub fn rotate_missions(
    persisted: &[PersistedMission],
    log: &[ActivityEntry],
    today: NaiveDate,
    target: usize,
) -> Vec<Mission> {
    let target = target.clamp(MIN_MISSIONS, MAX_MISSIONS);
    let mut selected: Vec<Mission> = Vec::with_capacity(MAX_MISSIONS);
    let mut seen: BTreeSet<&'static str> = BTreeSet::new();
    let mut retired: BTreeSet<&'static str> = BTreeSet::new();

    // 1. Keep what is already deployed.
    for p in persisted {
        let Some(def) = mission_def(&p.id) else {
            debug!(mission = %p.id, "dropping unknown mission");
            continue;
        };
        if !seen.insert(def.id) {
            continue;
        }
        let stored_start = p.period_start.unwrap_or(today);
        let start = current_period_start(def.period, today, stored_start);
        let rolled_over = stored_start < start;

        if rolled_over && p.claimed && !is_always_deployed(def.id) {
            debug!(mission = def.id, "retiring claimed mission at period end");
            retired.insert(def.id);
            continue;
        }

        let mut mission = deploy(def, today);
        mission.period_start = start;
        if !rolled_over {
            mission.progress.current = clamp_progress(p.current, def.target);
            mission.claimed = p.claimed && mission.progress.is_complete();
        }
        selected.push(mission);
    }

    // 2. Always-deployed missions.
    for id in ALWAYS_DEPLOYED {
        if let Some(def) = mission_def(id) {
            if seen.insert(def.id) {
                selected.push(deploy(def, today));
            }
        }
    }

    // Trim an oversized window from the back, sparing always-deployed ones.
    while selected.len() > MAX_MISSIONS {
        let Some(index) = selected.iter().rposition(|m| !is_always_deployed(&m.id)) else {
            break;
        };
        let removed = selected.remove(index);
        debug!(mission = %removed.id, "mission window over capacity, dropping");
    }

    // 3. Scarcest missions first.
    if selected.len() < target {
        let counts = recent_category_counts(log);
        let mut candidates: Vec<&MissionDef> = MISSIONS
            .iter()
            .filter(|d| !seen.contains(d.id) && !retired.contains(d.id))
            .collect();
        candidates.sort_by(|a, b| {
            scarcity(a, &counts)
                .cmp(&scarcity(b, &counts))
                .then_with(|| a.id.cmp(b.id))
        });
        for def in candidates {
            if selected.len() >= target {
                break;
            }
            seen.insert(def.id);
            selected.push(deploy(def, today));
        }
    }

    // 4. Backfill in catalog order up to the minimum. Retired missions come
    // back fresh if nothing else is left.
    for def in &MISSIONS {
        if selected.len() >= MIN_MISSIONS {
            break;
        }
        if !selected.iter().any(|m| m.id == def.id) {
            if retired.contains(def.id) {
                debug!(mission = def.id, "redeploying retired mission to fill the window");
            }
            selected.push(deploy(def, today));
        }
    }

    selected
}

fn clamp_progress(current: u64, target: u32) -> u32 {
    u32::try_from(current).unwrap_or(u32::MAX).min(target)
}

/// Advance every unclaimed mission counting `goal` by `amount`.
///
/// For [`MissionGoal::CompleteTasks`] missions with a category, only
/// completions in that (canonicalized) category count.
pub fn record_progress(
    missions: &mut [Mission],
    goal: MissionGoal,
    category: Option<&str>,
    amount: u64,
) {
    if amount == 0 {
        return;
    }
    let canonical = category.map(canonical_category);
    for mission in missions.iter_mut().filter(|m| m.goal == goal && !m.claimed) {
        if let Some(required) = mission.category.as_deref() {
            if canonical != Some(required) {
                continue;
            }
        }
        let total = u64::from(mission.progress.current).saturating_add(amount);
        mission.progress.current = clamp_progress(total, mission.progress.target);
    }
}
