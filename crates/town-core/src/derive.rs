//! The derived-state pipeline.
//!
//! [`normalize_world`] turns a loosely-shaped persisted document plus the
//! current external facts into a fully consistent [`WorldState`]. It is
//! total: every malformed field degrades to a safe default instead of
//! failing. It runs on every read and, through [`normalize_state`], on
//! every write, so hand edits and partial writes are repaired continuously.
//!
//! Order matters: buildings are laid out before decorations (which must
//! avoid them), and the activity log is complete before missions rank
//! categories by recent completions. Achievements are evaluated last, on
//! the otherwise finished state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use town_economy::{RewardRates, normalize_inventory};
use town_types::{BuildingType, Economy, MaterialDrop, WorldState};
use town_world::{BuildingRequest, DecorationRequest, lay_out_buildings, lay_out_decorations};
use tracing::warn;

use crate::activity::{backfill_completions, cap_log, normalize_log, parse_amounts};
use crate::config::TownConfig;
use crate::facts::Facts;
use crate::loose;
use crate::missions::{parse_persisted, rotate_missions};
use crate::progression::{
    parse_achievements, parse_daily_records, parse_material_collection, parse_stats,
    refresh_progression, town_for,
};

/// Top-level keys with a typed home in [`WorldState`]. Anything else is
/// preserved in [`WorldState::extra`].
const KNOWN_KEYS: [&str; 23] = [
    "town",
    "economy",
    "buildings",
    "decorations",
    "inventory",
    "missions",
    "activityLog",
    "achievements",
    "titles",
    "equippedTitle",
    "dailyRecords",
    "materialCollection",
    "lastMaterialDrop",
    "stats",
    "rewardLedger",
    "updatedAt",
    "activity_log",
    "equipped_title",
    "daily_records",
    "material_collection",
    "last_material_drop",
    "reward_ledger",
    "updated_at",
];

/// Tunables the derivation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DeriveSettings {
    /// Gold in a state created from nothing.
    pub starting_gold: u64,
    /// Preferred mission window size.
    pub mission_target: usize,
    /// Most dedupe keys kept in the reward ledger.
    pub ledger_cap: usize,
    /// Rates used for backfilled completions.
    pub rates: RewardRates,
}

impl DeriveSettings {
    /// Settings from the loaded configuration.
    pub fn from_config(config: &TownConfig) -> Self {
        Self {
            starting_gold: config.economy.starting_gold,
            mission_target: config.missions.target(),
            ledger_cap: config.storage.ledger_cap,
            rates: config.economy.rates(),
        }
    }
}

impl Default for DeriveSettings {
    fn default() -> Self {
        Self::from_config(&TownConfig::default())
    }
}

/// Inputs shared by one derivation.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext<'a> {
    /// External task and report snapshots.
    pub facts: &'a Facts,
    /// The instant the derivation happens.
    pub now: DateTime<Utc>,
    /// Tunables.
    pub settings: &'a DeriveSettings,
}

/// Derive a consistent world state from a persisted document.
///
/// `None` (no file) yields the default state with the starting gold.
/// A document that is not a mapping is treated like an empty one.
#[allow(clippy::too_many_lines)] // Linear pipeline; splitting hides the ordering.
pub fn normalize_world(document: Option<&Value>, ctx: &DeriveContext<'_>) -> WorldState {
    let empty = Value::Object(Map::new());
    let fresh = document.is_none();
    let doc = document.filter(|d| d.is_object()).unwrap_or(&empty);
    let town_raw = loose::field(doc, &["town"]).unwrap_or(&empty);
    let economy_raw = loose::field(doc, &["economy"]).unwrap_or(&empty);

    // Town
    let xp = loose::unsigned(town_raw, &["xp"]).unwrap_or(0);
    let gold = loose::unsigned(town_raw, &["gold"])
        .or_else(|| loose::unsigned(economy_raw, &["gold"]))
        .unwrap_or(if fresh { ctx.settings.starting_gold } else { 0 });
    let town = town_for(xp, gold);

    // Buildings, then decorations around them
    let building_requests: Vec<BuildingRequest> = loose::array(doc, &["buildings"])
        .iter()
        .filter_map(|b| {
            let building_type = loose::string(b, &["type", "buildingType"])
                .and_then(|t| BuildingType::parse(&t))?;
            Some(BuildingRequest {
                building_type,
                level: loose::integer(b, &["level"]),
                position: loose::coordinates(b, &["position"]),
            })
        })
        .collect();
    let (buildings, mut occupancy) = lay_out_buildings(&building_requests);

    let decoration_requests: Vec<DecorationRequest> = loose::array(doc, &["decorations"])
        .iter()
        .filter_map(|d| {
            Some(DecorationRequest {
                id: loose::string(d, &["id"]),
                decoration_type: loose::string(d, &["type", "decorationType"])?,
                level: loose::integer(d, &["level"]),
                position: loose::coordinates(d, &["position"]),
            })
        })
        .collect();
    let decorations = lay_out_decorations(&decoration_requests, &mut occupancy);

    // Inventory
    let raw_inventory: Vec<(String, i64)> = loose::array(doc, &["inventory"])
        .iter()
        .filter_map(|e| {
            let id = loose::string(e, &["itemId", "item_id", "id"])?;
            let quantity = loose::integer(e, &["quantity", "qty", "count"]).unwrap_or(0);
            Some((id, quantity))
        })
        .collect();
    let inventory = normalize_inventory(&raw_inventory);

    // Activity log with backfill
    let raw_log = loose::array(doc, &["activityLog", "activity_log"]);
    let mut activity_log = normalize_log(raw_log, ctx.now);
    backfill_completions(&mut activity_log, ctx.facts, &buildings, ctx.settings.rates, ctx.now);
    cap_log(&mut activity_log);

    // Missions
    let persisted_missions = parse_persisted(loose::array(doc, &["missions"]));
    let missions = rotate_missions(
        &persisted_missions,
        &activity_log,
        ctx.now.date_naive(),
        ctx.settings.mission_target,
    );

    // Ledger: unique keys, newest kept
    let mut reward_ledger: Vec<String> = Vec::new();
    for key in loose::array(doc, &["rewardLedger", "reward_ledger"]) {
        if let Some(key) = key.as_str().map(str::trim).filter(|k| !k.is_empty()) {
            if !reward_ledger.iter().any(|k| k == key) {
                reward_ledger.push(key.to_owned());
            }
        }
    }
    cap_ledger(&mut reward_ledger, ctx.settings.ledger_cap);

    let last_material_drop = loose::field(doc, &["lastMaterialDrop", "last_material_drop"])
        .and_then(|d| parse_material_drop(d, ctx.now));

    let extra: BTreeMap<String, Value> = doc
        .as_object()
        .map(|o| {
            o.iter()
                .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut state = WorldState {
        economy: Economy { gold: town.gold },
        town,
        buildings,
        decorations,
        inventory,
        missions,
        activity_log,
        achievements: parse_achievements(loose::array(doc, &["achievements"]), ctx.now),
        titles: Vec::new(),
        equipped_title: loose::string(doc, &["equippedTitle", "equipped_title"]),
        daily_records: parse_daily_records(loose::array(
            doc,
            &["dailyRecords", "daily_records"],
        )),
        material_collection: parse_material_collection(loose::array(
            doc,
            &["materialCollection", "material_collection"],
        )),
        last_material_drop,
        stats: parse_stats(loose::field(doc, &["stats"])),
        reward_ledger,
        updated_at: loose::timestamp(doc, &["updatedAt", "updated_at"]),
        extra,
    };
    refresh_progression(&mut state, ctx.now);
    state
}

/// Re-derive a state produced by a transition.
///
/// The state is taken through the same document form it will be persisted
/// in, so caps, layout repair and progression apply to writes exactly as
/// they do to reads.
pub fn normalize_state(state: &WorldState, ctx: &DeriveContext<'_>) -> WorldState {
    match serde_json::to_value(state) {
        Ok(document) => normalize_world(Some(&document), ctx),
        Err(error) => {
            warn!(%error, "state could not be converted for normalization, keeping as is");
            state.clone()
        }
    }
}

/// Keep only the newest `cap` ledger keys.
pub fn cap_ledger(ledger: &mut Vec<String>, cap: usize) {
    let excess = ledger.len().saturating_sub(cap);
    if excess > 0 {
        ledger.drain(..excess);
    }
}

fn parse_material_drop(raw: &Value, now: DateTime<Utc>) -> Option<MaterialDrop> {
    let building_type = loose::string(raw, &["buildingType", "building_type"])
        .and_then(|b| BuildingType::parse(&b))?;
    let items = parse_amounts(loose::array(raw, &["items"]));
    if items.is_empty() {
        return None;
    }
    Some(MaterialDrop {
        building_type,
        items,
        at: loose::timestamp(raw, &["at"]).unwrap_or(now),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;
    use town_types::{Footprint, Position};
    use town_world::GRID_WIDTH;

    use super::*;
    use crate::activity::LOG_CAP;
    use crate::config::{MAX_MISSIONS, MIN_MISSIONS};

    fn derive(doc: Option<&Value>) -> WorldState {
        let facts = Facts::empty();
        let settings = DeriveSettings::default();
        let ctx = DeriveContext {
            facts: &facts,
            now: Utc::now(),
            settings: &settings,
        };
        normalize_world(doc, &ctx)
    }

    fn cells(state: &WorldState) -> Vec<Position> {
        let mut out = Vec::new();
        for b in &state.buildings {
            for dx in 0..b.footprint.w {
                for dy in 0..b.footprint.h {
                    out.push(Position::new(b.position.x + dx, b.position.y + dy));
                }
            }
        }
        for d in &state.decorations {
            if let Some(p) = d.position {
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn missing_file_yields_default_state() {
        let state = derive(None);
        assert_eq!(state.town.gold, 100);
        assert_eq!(state.economy.gold, 100);
        assert_eq!(state.town.level, 1);
        assert_eq!(state.buildings.len(), 10);
        assert!((MIN_MISSIONS..=MAX_MISSIONS).contains(&state.missions.len()));
        assert!(state.inventory.is_empty());
    }

    #[test]
    fn existing_file_without_gold_has_none() {
        let state = derive(Some(&json!({"town": {"xp": 450}})));
        assert_eq!(state.town.gold, 0);
        assert_eq!(state.town.level, 3);
        assert_eq!(state.town.rank.name, "Village");
    }

    #[test]
    fn legacy_gold_is_used_when_town_gold_missing() {
        let state = derive(Some(&json!({"economy": {"gold": 42}})));
        assert_eq!(state.town.gold, 42);
        assert_eq!(state.economy.gold, 42);
    }

    #[test]
    fn negative_inventory_quantity_is_dropped() {
        let doc = json!({"inventory": [{"itemId": "stone_block", "quantity": -5}]});
        let state = derive(Some(&doc));
        assert!(state.inventory.is_empty());
    }

    #[test]
    fn colliding_layout_is_repaired_without_overlap() {
        let doc = json!({
            "buildings": [
                {"type": "forge", "level": 9, "position": {"x": 0, "y": 0}},
                {"type": "market", "position": {"x": 0, "y": 0}},
            ],
            "decorations": [
                {"id": "l1", "type": "lantern", "position": {"x": 0, "y": 0}},
                {"id": "l2", "type": "lantern", "position": {"x": 2.5, "y": 1}},
                {"id": "x", "type": "rocket"},
            ],
        });
        let state = derive(Some(&doc));
        let all = cells(&state);
        let unique: BTreeSet<Position> = all.iter().copied().collect();
        assert_eq!(all.len(), unique.len(), "no shared cells");
        assert!(all.iter().all(|p| p.x < GRID_WIDTH));

        let forge = state.building(BuildingType::Forge).unwrap();
        assert_eq!(forge.level, 5);
        assert_eq!(forge.position, Position::new(0, 0));
        assert_eq!(forge.footprint, Footprint::new(2, 2));

        assert_eq!(state.decorations.len(), 2);
        let stored = state.decorations.iter().find(|d| d.id == "l2").unwrap();
        assert!(!stored.is_placed());
    }

    #[test]
    fn oversized_log_is_capped() {
        let entries: Vec<Value> = (0..150_i64)
            .map(|i| {
                json!({
                    "id": format!("e{i}"),
                    "kind": "purchase",
                    "timestamp": 1_740_000_000 + i * 60,
                })
            })
            .collect();
        let state = derive(Some(&json!({"activityLog": entries})));
        assert_eq!(state.activity_log.len(), LOG_CAP);
        assert_eq!(state.activity_log.first().map(|e| e.id.as_str()), Some("e50"));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let state = derive(Some(&json!({"theme": "dusk", "town": {"gold": 1}})));
        assert_eq!(state.extra.get("theme"), Some(&json!("dusk")));
        assert!(!state.extra.contains_key("town"));
    }

    #[test]
    fn derivation_is_stable_on_its_own_output() {
        let doc = json!({
            "town": {"xp": 1200, "gold": 77},
            "buildings": [{"type": "tavern", "position": {"x": 0, "y": 0}}],
            "decorations": [{"type": "fountain", "level": 2, "position": {"x": 9, "y": 9}}],
            "inventory": [{"itemId": "coal", "quantity": 3}],
            "stats": {"tasksCompleted": 12},
            "equippedTitle": "apprentice",
        });
        let facts = Facts::empty();
        let settings = DeriveSettings::default();
        let ctx = DeriveContext {
            facts: &facts,
            now: Utc::now(),
            settings: &settings,
        };
        let once = normalize_world(Some(&doc), &ctx);
        let twice = normalize_state(&once, &ctx);
        assert_eq!(once, twice);
        assert_eq!(once.equipped_title.as_deref(), Some("apprentice"));
    }

    #[test]
    fn ledger_is_deduplicated_and_capped() {
        let keys: Vec<String> = (0..600).map(|i| format!("k{i}")).collect();
        let mut doc = json!({"rewardLedger": keys});
        if let Some(ledger) = doc.get_mut("rewardLedger").and_then(Value::as_array_mut) {
            ledger.push(json!("k599"));
        }
        let state = derive(Some(&doc));
        assert_eq!(state.reward_ledger.len(), 500);
        assert_eq!(state.reward_ledger.first().map(String::as_str), Some("k100"));
    }
}
