//! Core record structs for the Townhall world state.
//!
//! [`WorldState`] is the single persisted root record. It is replaced
//! wholesale on every committed write and re-normalized on every read, so
//! every struct here describes the *normalized* shape: levels are already
//! clamped, positions are already collision-free, and optional fields are
//! either meaningful or absent.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActivityKind, BuildingType, EffectKind, MissionGoal, MissionPeriod};

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A grid cell coordinate (`x` grows right, `y` grows down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl Position {
    /// Construct a position.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The rectangular extent of a placed object, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Footprint {
    /// Width in cells.
    pub w: u32,
    /// Height in cells.
    pub h: u32,
}

impl Footprint {
    /// A single-cell footprint, used by decorations.
    pub const UNIT: Self = Self { w: 1, h: 1 };

    /// Construct a footprint.
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

// ---------------------------------------------------------------------------
// Town
// ---------------------------------------------------------------------------

/// Rank information derived from the town's xp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Rank {
    /// Display name of the rank (e.g. `"Village"`).
    pub name: String,
    /// Zero-based tier index.
    pub tier: u32,
    /// Total xp needed for the next town level.
    pub next_level_xp: u64,
}

impl Default for Rank {
    fn default() -> Self {
        Self {
            name: "Hamlet".to_owned(),
            tier: 0,
            next_level_xp: 100,
        }
    }
}

/// The town's headline numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Town {
    /// Level derived from `xp`. Always at least 1.
    pub level: u32,
    /// Lifetime experience.
    pub xp: u64,
    /// Spendable gold.
    pub gold: u64,
    /// Rank derived from `xp`.
    pub rank: Rank,
}

impl Default for Town {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0,
            gold: 0,
            rank: Rank::default(),
        }
    }
}

/// Legacy economy block. `gold` mirrors [`Town::gold`] after every write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Economy {
    /// Mirror of the town's gold.
    pub gold: u64,
}

// ---------------------------------------------------------------------------
// Buildings and decorations
// ---------------------------------------------------------------------------

/// A placed building. There is exactly one per [`BuildingType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Building {
    /// Which building this is.
    #[serde(rename = "type")]
    pub building_type: BuildingType,
    /// Level, 1 through 5.
    pub level: u8,
    /// Top-left cell of the footprint.
    pub position: Position,
    /// Fixed per type.
    pub footprint: Footprint,
}

/// A passive bonus attached to a decoration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PassiveEffect {
    /// What the bonus scales.
    pub kind: EffectKind,
    /// Fractional bonus contributed per decoration level.
    pub bonus_per_level: f64,
}

/// A decoration owned by the town. Without a position it is in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Decoration {
    /// Unique id.
    pub id: String,
    /// Catalog type (e.g. `"fountain"`).
    #[serde(rename = "type")]
    pub decoration_type: String,
    /// Level, 1 through 5, for upgradable decorations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Passive bonus while placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<PassiveEffect>,
    /// Cell the decoration occupies; `None` means in storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Decoration {
    /// Whether the decoration is placed on the map.
    pub const fn is_placed(&self) -> bool {
        self.position.is_some()
    }
}

// ---------------------------------------------------------------------------
// Inventory and materials
// ---------------------------------------------------------------------------

/// One inventory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct InventoryEntry {
    /// Catalog item id, unique within the inventory.
    pub item_id: String,
    /// Count held. Never zero after normalization.
    pub quantity: u32,
}

/// An item id with a count, used for drops and costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ItemAmount {
    /// Catalog item id.
    pub item_id: String,
    /// Count.
    pub quantity: u32,
}

/// Lifetime count of one material received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct MaterialCount {
    /// Material item id.
    pub item_id: String,
    /// Total ever received.
    pub count: u64,
}

/// The most recent material drop, shown once by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct MaterialDrop {
    /// Building whose candidate list produced the drop.
    pub building_type: BuildingType,
    /// Aggregated items.
    pub items: Vec<ItemAmount>,
    /// When the drop happened.
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Missions
// ---------------------------------------------------------------------------

/// Progress towards a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Progress {
    /// Current count, never above `target`.
    pub current: u32,
    /// Count required to complete.
    pub target: u32,
}

impl Progress {
    /// Whether `current` has reached `target`.
    pub const fn is_complete(&self) -> bool {
        self.current >= self.target
    }
}

/// Gold and xp granted together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Reward {
    /// Gold granted.
    pub gold: u64,
    /// Xp granted.
    pub xp: u64,
}

/// A deployed mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Mission {
    /// Catalog id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// What the mission counts.
    pub goal: MissionGoal,
    /// Task category filter for [`MissionGoal::CompleteTasks`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Progress in the current period.
    pub progress: Progress,
    /// Whether the reward has been collected this period.
    pub claimed: bool,
    /// Reset cadence.
    pub period: MissionPeriod,
    /// First day of the current period.
    pub period_start: NaiveDate,
    /// Reward paid on claim.
    pub reward: Reward,
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// One entry in the activity ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ActivityEntry {
    /// Unique id.
    pub id: String,
    /// Event type.
    pub kind: ActivityKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Worker that produced the event, for work events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// External task id, for work events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Task category, for work events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Gold delta, when the event paid or cost gold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<u64>,
    /// Xp gained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<u64>,
    /// Materials dropped or spent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<ItemAmount>,
    /// Item involved, for purchases and consumption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Building involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_type: Option<BuildingType>,
    /// Mission involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
}

impl ActivityEntry {
    /// A bare entry of the given kind; callers fill in the optional fields.
    pub fn new(id: impl Into<String>, kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp,
            worker: None,
            task_id: None,
            category: None,
            message: None,
            gold: None,
            xp: None,
            materials: Vec::new(),
            item_id: None,
            building_type: None,
            mission_id: None,
        }
    }

    /// Whether the entry records what a completion paid.
    pub const fn has_reward_details(&self) -> bool {
        self.gold.is_some() || self.xp.is_some()
    }
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

/// An unlocked achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Achievement {
    /// Catalog id.
    pub id: String,
    /// First time the unlock condition held.
    pub unlocked_at: DateTime<Utc>,
}

/// Per-day totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DailyRecord {
    /// Calendar date (UTC).
    pub date: NaiveDate,
    /// Tasks completed that day.
    pub tasks_completed: u32,
    /// Gold earned from work that day.
    pub gold_earned: u64,
    /// Xp earned from work that day.
    pub xp_earned: u64,
}

impl DailyRecord {
    /// An empty record for `date`.
    pub const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            tasks_completed: 0,
            gold_earned: 0,
            xp_earned: 0,
        }
    }
}

/// Lifetime counters. None of them ever decrease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export, export_to = "bindings/")]
pub struct LifetimeStats {
    /// Completed tasks that paid out.
    pub tasks_completed: u64,
    /// Gold earned from work and missions.
    pub gold_earned: u64,
    /// Xp earned from work and missions.
    pub xp_earned: u64,
    /// Items bought.
    pub items_purchased: u64,
    /// Items used up.
    pub items_consumed: u64,
    /// Building levels gained.
    pub buildings_upgraded: u64,
    /// Materials received from drops.
    pub materials_collected: u64,
    /// Mission rewards claimed.
    pub missions_claimed: u64,
}

// ---------------------------------------------------------------------------
// Root record
// ---------------------------------------------------------------------------

/// The single persisted root record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct WorldState {
    /// Level, xp, gold and rank.
    pub town: Town,
    /// Legacy gold mirror.
    pub economy: Economy,
    /// One entry per building type, in catalog order.
    pub buildings: Vec<Building>,
    /// Owned decorations, placed or in storage.
    pub decorations: Vec<Decoration>,
    /// Held items.
    pub inventory: Vec<InventoryEntry>,
    /// Deployed missions (8 to 10 after normalization).
    pub missions: Vec<Mission>,
    /// Most recent events, oldest first, at most 100.
    pub activity_log: Vec<ActivityEntry>,
    /// Unlocked achievements.
    pub achievements: Vec<Achievement>,
    /// Unlocked title ids.
    pub titles: Vec<String>,
    /// The title shown next to the town name; always one of `titles`.
    #[serde(default)]
    pub equipped_title: Option<String>,
    /// One record per date, ascending.
    pub daily_records: Vec<DailyRecord>,
    /// Lifetime material counts.
    pub material_collection: Vec<MaterialCount>,
    /// The latest drop notice.
    #[serde(default)]
    pub last_material_drop: Option<MaterialDrop>,
    /// Lifetime counters.
    #[serde(default)]
    pub stats: LifetimeStats,
    /// Dedupe keys of completions that already paid out.
    #[serde(default)]
    pub reward_ledger: Vec<String>,
    /// Time of the last committed write.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Unknown top-level fields, preserved on write and otherwise ignored.
    #[serde(flatten)]
    #[ts(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WorldState {
    /// The building of the given type, if present.
    pub fn building(&self, building_type: BuildingType) -> Option<&Building> {
        self.buildings.iter().find(|b| b.building_type == building_type)
    }

    /// Mutable access to the building of the given type.
    pub fn building_mut(&mut self, building_type: BuildingType) -> Option<&mut Building> {
        self.buildings
            .iter_mut()
            .find(|b| b.building_type == building_type)
    }

    /// Quantity held of an item (0 when absent).
    pub fn item_quantity(&self, item_id: &str) -> u32 {
        self.inventory
            .iter()
            .find(|e| e.item_id == item_id)
            .map_or(0, |e| e.quantity)
    }

    /// Whether a completion with this dedupe key has already paid out.
    pub fn has_reward_key(&self, key: &str) -> bool {
        self.reward_ledger.iter().any(|k| k == key)
    }
}
