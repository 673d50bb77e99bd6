//! Town level, rank, achievements, titles and daily bookkeeping.
//!
//! Level is derived from lifetime xp: level `L` needs `100 * (L - 1)^2`
//! xp. Achievements unlock from lifetime stats and the town level and are
//! never revoked. Each title requires one achievement; the equipped title
//! is cleared if it is not among the unlocked titles.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use town_types::{
    Achievement, DailyRecord, ItemAmount, LifetimeStats, MaterialCount, Rank, Town, WorldState,
};
use town_world::MAX_LEVEL;

use crate::loose;

/// Xp per squared level step.
const XP_PER_LEVEL_STEP: u64 = 100;

/// Most daily records kept.
pub const DAILY_RECORD_CAP: usize = 60;

// ---------------------------------------------------------------------------
// Level and rank
// ---------------------------------------------------------------------------

/// Town level for a lifetime xp total. Always at least 1.
pub fn level_for_xp(xp: u64) -> u32 {
    let steps = (xp / XP_PER_LEVEL_STEP).isqrt();
    u32::try_from(steps.saturating_add(1)).unwrap_or(u32::MAX)
}

/// Total xp at which `level` is reached.
pub fn xp_for_level(level: u32) -> u64 {
    let steps = u64::from(level.saturating_sub(1));
    steps.saturating_mul(steps).saturating_mul(XP_PER_LEVEL_STEP)
}

const RANKS: [(u32, &str); 5] = [
    (1, "Hamlet"),
    (3, "Village"),
    (5, "Town"),
    (8, "City"),
    (12, "Metropolis"),
];

/// Rank for a town level.
pub fn rank_for_level(level: u32) -> Rank {
    let (tier, name) = RANKS
        .iter()
        .enumerate()
        .rev()
        .find(|(_, (min, _))| level >= *min)
        .map_or((0, "Hamlet"), |(i, (_, name))| (i, *name));
    Rank {
        name: name.to_owned(),
        tier: u32::try_from(tier).unwrap_or(0),
        next_level_xp: xp_for_level(level.saturating_add(1)),
    }
}

/// A town record with level and rank derived from `xp`.
pub fn town_for(xp: u64, gold: u64) -> Town {
    let level = level_for_xp(xp);
    Town {
        level,
        xp,
        gold,
        rank: rank_for_level(level),
    }
}

// ---------------------------------------------------------------------------
// Achievements and titles
// ---------------------------------------------------------------------------

/// What unlocks an achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    /// Lifetime completed tasks.
    TasksCompleted(u64),
    /// Lifetime gold earned.
    GoldEarned(u64),
    /// Town level.
    TownLevel(u32),
    /// Lifetime items purchased.
    ItemsPurchased(u64),
    /// Lifetime building upgrades.
    BuildingsUpgraded(u64),
    /// Any building at the maximum level.
    MaxedBuilding,
    /// Lifetime materials collected.
    MaterialsCollected(u64),
    /// Lifetime missions claimed.
    MissionsClaimed(u64),
}

impl Unlock {
    /// Whether the condition holds for `state`.
    pub fn holds(self, state: &WorldState) -> bool {
        let stats = &state.stats;
        match self {
            Self::TasksCompleted(n) => stats.tasks_completed >= n,
            Self::GoldEarned(n) => stats.gold_earned >= n,
            Self::TownLevel(n) => state.town.level >= n,
            Self::ItemsPurchased(n) => stats.items_purchased >= n,
            Self::BuildingsUpgraded(n) => stats.buildings_upgraded >= n,
            Self::MaxedBuilding => state.buildings.iter().any(|b| b.level >= MAX_LEVEL),
            Self::MaterialsCollected(n) => stats.materials_collected >= n,
            Self::MissionsClaimed(n) => stats.missions_claimed >= n,
        }
    }
}

/// Fixed data for an achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementDef {
    /// Stable id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Unlock condition.
    pub unlock: Unlock,
}

const fn achievement(id: &'static str, name: &'static str, unlock: Unlock) -> AchievementDef {
    AchievementDef { id, name, unlock }
}

use Unlock::{
    BuildingsUpgraded, GoldEarned, ItemsPurchased, MaterialsCollected, MaxedBuilding,
    MissionsClaimed, TasksCompleted, TownLevel,
};

/// Every achievement.
pub const ACHIEVEMENTS: [AchievementDef; 13] = [
    achievement("first_task", "First Steps", TasksCompleted(1)),
    achievement("apprentice", "Apprentice", TasksCompleted(10)),
    achievement("journeyman", "Journeyman", TasksCompleted(50)),
    achievement("master", "Master Craftsman", TasksCompleted(200)),
    achievement("first_coin", "First Coin", GoldEarned(100)),
    achievement("treasurer", "Treasurer", GoldEarned(5_000)),
    achievement("village_founder", "Village Founder", TownLevel(3)),
    achievement("city_planner", "City Planner", TownLevel(8)),
    achievement("first_purchase", "Customer", ItemsPurchased(1)),
    achievement("renovator", "Renovator", BuildingsUpgraded(1)),
    achievement("architect", "Architect", MaxedBuilding),
    achievement("collector", "Collector", MaterialsCollected(50)),
    achievement("mission_runner", "Errand Runner", MissionsClaimed(5)),
];

/// A title and the achievement it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleDef {
    /// Stable id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Required achievement id.
    pub requires: &'static str,
}

const fn title(id: &'static str, name: &'static str, requires: &'static str) -> TitleDef {
    TitleDef { id, name, requires }
}

/// Every title.
pub const TITLES: [TitleDef; 6] = [
    title("apprentice", "the Apprentice", "apprentice"),
    title("journeyman", "the Journeyman", "journeyman"),
    title("merchant_prince", "Merchant Prince", "treasurer"),
    title("architect", "the Architect", "architect"),
    title("collector", "the Collector", "collector"),
    title("mayor", "Mayor", "city_planner"),
];

/// Look up an achievement by id.
pub fn achievement_def(id: &str) -> Option<&'static AchievementDef> {
    ACHIEVEMENTS.iter().find(|a| a.id == id)
}

/// Look up a title by id.
pub fn title_def(id: &str) -> Option<&'static TitleDef> {
    TITLES.iter().find(|t| t.id == id)
}

/// Read persisted achievements. Unknown ids are dropped, a missing or bad
/// unlock time becomes `now`, and repeats keep the first.
pub fn parse_achievements(raw: &[Value], now: DateTime<Utc>) -> Vec<Achievement> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .filter_map(|a| {
            let id = match a {
                Value::String(s) => s.trim().to_owned(),
                _ => loose::string(a, &["id"])?,
            };
            let def = achievement_def(&id)?;
            seen.insert(def.id).then(|| Achievement {
                id: def.id.to_owned(),
                unlocked_at: loose::timestamp(a, &["unlockedAt", "unlocked_at"])
                    .unwrap_or(now),
            })
        })
        .collect()
}

/// Add every achievement whose condition now holds. Existing unlocks are
/// kept with their original time.
pub fn unlock_achievements(state: &mut WorldState, now: DateTime<Utc>) {
    for def in &ACHIEVEMENTS {
        let unlocked = state.achievements.iter().any(|a| a.id == def.id);
        if !unlocked && def.unlock.holds(state) {
            state.achievements.push(Achievement {
                id: def.id.to_owned(),
                unlocked_at: now,
            });
        }
    }
}

/// Titles earned by the unlocked achievements, in catalog order.
pub fn earned_titles(achievements: &[Achievement]) -> Vec<String> {
    TITLES
        .iter()
        .filter(|t| achievements.iter().any(|a| a.id == t.requires))
        .map(|t| t.id.to_owned())
        .collect()
}

/// Recompute achievements, titles and the equipped title in place.
pub fn refresh_progression(state: &mut WorldState, now: DateTime<Utc>) {
    unlock_achievements(state, now);
    state.titles = earned_titles(&state.achievements);
    let dangling = state
        .equipped_title
        .as_ref()
        .is_some_and(|t| !state.titles.contains(t));
    if dangling {
        state.equipped_title = None;
    }
}

// ---------------------------------------------------------------------------
// Stats, daily records, materials
// ---------------------------------------------------------------------------

/// Read lifetime counters; missing or malformed counters are zero.
pub fn parse_stats(raw: Option<&Value>) -> LifetimeStats {
    let Some(raw) = raw else {
        return LifetimeStats::default();
    };
    let n = |keys: &[&str]| loose::unsigned(raw, keys).unwrap_or(0);
    LifetimeStats {
        tasks_completed: n(&["tasksCompleted", "tasks_completed"]),
        gold_earned: n(&["goldEarned", "gold_earned"]),
        xp_earned: n(&["xpEarned", "xp_earned"]),
        items_purchased: n(&["itemsPurchased", "items_purchased"]),
        items_consumed: n(&["itemsConsumed", "items_consumed"]),
        buildings_upgraded: n(&["buildingsUpgraded", "buildings_upgraded"]),
        materials_collected: n(&["materialsCollected", "materials_collected"]),
        missions_claimed: n(&["missionsClaimed", "missions_claimed"]),
    }
}

/// Read daily records: one per date (repeats are summed), ascending, at
/// most [`DAILY_RECORD_CAP`] of the most recent.
pub fn parse_daily_records(raw: &[Value]) -> Vec<DailyRecord> {
    let mut by_date: BTreeMap<NaiveDate, DailyRecord> = BTreeMap::new();
    for r in raw {
        let Some(date) = loose::date(r, &["date"]) else {
            continue;
        };
        let tasks =
            loose::unsigned(r, &["tasksCompleted", "tasks_completed"]).unwrap_or(0);
        let record = by_date.entry(date).or_insert_with(|| DailyRecord::empty(date));
        record.tasks_completed = record
            .tasks_completed
            .saturating_add(u32::try_from(tasks).unwrap_or(u32::MAX));
        record.gold_earned = record
            .gold_earned
            .saturating_add(loose::unsigned(r, &["goldEarned", "gold_earned"]).unwrap_or(0));
        record.xp_earned = record
            .xp_earned
            .saturating_add(loose::unsigned(r, &["xpEarned", "xp_earned"]).unwrap_or(0));
    }
    let mut records: Vec<DailyRecord> = by_date.into_values().collect();
    cap_daily_records(&mut records);
    records
}

fn cap_daily_records(records: &mut Vec<DailyRecord>) {
    let excess = records.len().saturating_sub(DAILY_RECORD_CAP);
    if excess > 0 {
        records.drain(..excess);
    }
}

/// Add a completion's totals to the record for `date`.
pub fn record_daily(records: &mut Vec<DailyRecord>, date: NaiveDate, gold: u64, xp: u64) {
    let index = match records.binary_search_by(|r| r.date.cmp(&date)) {
        Ok(i) => i,
        Err(i) => {
            records.insert(i, DailyRecord::empty(date));
            i
        }
    };
    if let Some(record) = records.get_mut(index) {
        record.tasks_completed = record.tasks_completed.saturating_add(1);
        record.gold_earned = record.gold_earned.saturating_add(gold);
        record.xp_earned = record.xp_earned.saturating_add(xp);
    }
    cap_daily_records(records);
}

/// Read lifetime material counts: known materials only, repeats summed,
/// sorted by item id.
pub fn parse_material_collection(raw: &[Value]) -> Vec<MaterialCount> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for m in raw {
        let Some(item_id) = loose::string(m, &["itemId", "item_id", "id"]) else {
            continue;
        };
        if !town_economy::is_material(&item_id) {
            continue;
        }
        let count = loose::unsigned(m, &["count", "quantity"]).unwrap_or(0);
        let slot = counts.entry(item_id).or_insert(0);
        *slot = slot.saturating_add(count);
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(item_id, count)| MaterialCount { item_id, count })
        .collect()
}

/// Add dropped materials to the lifetime collection.
pub fn record_materials(collection: &mut Vec<MaterialCount>, drops: &[ItemAmount]) {
    for drop in drops {
        let amount = u64::from(drop.quantity);
        match collection.binary_search_by(|m| m.item_id.as_str().cmp(drop.item_id.as_str())) {
            Ok(i) => {
                if let Some(m) = collection.get_mut(i) {
                    m.count = m.count.saturating_add(amount);
                }
            }
            Err(i) => collection.insert(
                i,
                MaterialCount {
                    item_id: drop.item_id.clone(),
                    count: amount,
                },
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn level_curve() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(xp_for_level(3), 400);
        assert_eq!(xp_for_level(1), 0);
    }

    #[test]
    fn ranks_by_level() {
        assert_eq!(rank_for_level(1).name, "Hamlet");
        assert_eq!(rank_for_level(4).name, "Village");
        assert_eq!(rank_for_level(8).tier, 3);
        assert_eq!(rank_for_level(30).name, "Metropolis");
        assert_eq!(rank_for_level(2).next_level_xp, 400);
    }

    #[test]
    fn achievements_unlock_and_titles_follow() {
        let now = Utc::now();
        let mut state = WorldState::default();
        state.stats.tasks_completed = 10;
        state.equipped_title = Some("mayor".to_owned());
        refresh_progression(&mut state, now);

        let ids: Vec<&str> = state.achievements.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["first_task", "apprentice"]);
        assert_eq!(state.titles, vec!["apprentice".to_owned()]);
        assert_eq!(state.equipped_title, None, "dangling title cleared");
    }

    #[test]
    fn persisted_unlock_times_survive() {
        let doc = json!([
            {"id": "first_task", "unlockedAt": "2025-01-02T03:04:05Z"},
            {"id": "made_up"},
            "first_task",
        ]);
        let parsed = parse_achievements(doc.as_array().unwrap(), Utc::now());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.first().unwrap().unlocked_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn daily_records_merge_sort_and_cap() {
        let mut raw: Vec<Value> = (0..70)
            .map(|i| {
                let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(i);
                json!({"date": date.to_string(), "tasksCompleted": 1})
            })
            .collect();
        raw.push(json!({"date": "2025-03-11", "tasksCompleted": 2}));
        raw.push(json!({"date": "not a date"}));
        let records = parse_daily_records(&raw);
        assert_eq!(records.len(), DAILY_RECORD_CAP);
        assert!(records.windows(2).all(|w| matches!(w, [a, b] if a.date < b.date)));
        let last = records.last().unwrap();
        assert_eq!(last.date.to_string(), "2025-03-11");
        assert_eq!(last.tasks_completed, 3);
    }

    #[test]
    fn record_daily_inserts_in_order() {
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let mut records = vec![DailyRecord::empty(d2)];
        record_daily(&mut records, d1, 5, 10);
        record_daily(&mut records, d2, 1, 2);
        assert_eq!(records.first().map(|r| r.date), Some(d1));
        assert_eq!(records.get(1).map(|r| r.tasks_completed), Some(1));
    }

    #[test]
    fn material_collection_keeps_known_materials() {
        let raw = json!([
            {"itemId": "coal", "count": 2},
            {"itemId": "coal", "count": 3},
            {"itemId": "xp_scroll", "count": 9},
        ]);
        let mut collection = parse_material_collection(raw.as_array().unwrap());
        assert_eq!(collection.len(), 1);
        record_materials(
            &mut collection,
            &[ItemAmount {
                item_id: "ink".to_owned(),
                quantity: 2,
            }],
        );
        let ids: Vec<&str> = collection.iter().map(|m| m.item_id.as_str()).collect();
        assert_eq!(ids, vec!["coal", "ink"]);
        assert_eq!(collection.first().map(|m| m.count), Some(5));
    }
}
