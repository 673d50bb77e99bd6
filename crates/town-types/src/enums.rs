//! Enumeration types for the Townhall world state.
//!
//! Every enum here is persisted in `snake_case` and exported to
//! `TypeScript` for the rendering client. Each one offers a lenient
//! `parse` constructor used by normalization, which must accept whatever
//! spelling a hand-edited state file happens to contain.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lowercase a raw tag and fold `-` and spaces into `_`.
fn fold_tag(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Buildings
// ---------------------------------------------------------------------------

/// One of the ten fixed building types in the town.
///
/// The set is closed: every world state carries exactly one building of
/// each type, in [`BuildingType::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum BuildingType {
    /// Seat of the town; planning work happens here.
    TownHall,
    /// Feature development.
    Workshop,
    /// Bug fixing.
    Forge,
    /// Research and investigation.
    Library,
    /// Documentation.
    Archive,
    /// Code review.
    Watchtower,
    /// Testing.
    TrainingGround,
    /// Operations and deployment.
    Harbor,
    /// Data analysis.
    Market,
    /// Everything that fits no other category.
    Tavern,
}

impl BuildingType {
    /// All building types in catalog order.
    pub const ALL: [Self; 10] = [
        Self::TownHall,
        Self::Workshop,
        Self::Forge,
        Self::Library,
        Self::Archive,
        Self::Watchtower,
        Self::TrainingGround,
        Self::Harbor,
        Self::Market,
        Self::Tavern,
    ];

    /// The persisted tag for this building type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TownHall => "town_hall",
            Self::Workshop => "workshop",
            Self::Forge => "forge",
            Self::Library => "library",
            Self::Archive => "archive",
            Self::Watchtower => "watchtower",
            Self::TrainingGround => "training_ground",
            Self::Harbor => "harbor",
            Self::Market => "market",
            Self::Tavern => "tavern",
        }
    }

    /// Parse a persisted tag, tolerating case and `-`/space separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = fold_tag(raw);
        Self::ALL.into_iter().find(|t| t.as_str() == folded)
    }
}

impl core::fmt::Display for BuildingType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// The type of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActivityKind {
    /// A worker picked up a task.
    WorkStart,
    /// A worker finished a task and was paid.
    WorkComplete,
    /// Something was bought from the shop.
    Purchase,
    /// An inventory item was used up.
    ItemConsume,
    /// A building gained a level.
    BuildingUpgrade,
    /// A mission reward was claimed.
    MissionComplete,
}

impl ActivityKind {
    /// All activity kinds.
    pub const ALL: [Self; 6] = [
        Self::WorkStart,
        Self::WorkComplete,
        Self::Purchase,
        Self::ItemConsume,
        Self::BuildingUpgrade,
        Self::MissionComplete,
    ];

    /// The persisted tag for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkStart => "work_start",
            Self::WorkComplete => "work_complete",
            Self::Purchase => "purchase",
            Self::ItemConsume => "item_consume",
            Self::BuildingUpgrade => "building_upgrade",
            Self::MissionComplete => "mission_complete",
        }
    }

    /// Parse a persisted tag, tolerating case and `-`/space separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = fold_tag(raw);
        Self::ALL.into_iter().find(|k| k.as_str() == folded)
    }
}

// ---------------------------------------------------------------------------
// Items and effects
// ---------------------------------------------------------------------------

/// The kind of passive bonus a decoration or charm provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EffectKind {
    /// Scales the number of material drop rolls.
    MaterialDrop,
    /// Scales gold earned from work.
    GoldBonus,
    /// Scales xp earned from work.
    XpBonus,
}

impl EffectKind {
    /// Parse a persisted tag, tolerating case and `-`/space separators.
    pub fn parse(raw: &str) -> Option<Self> {
        match fold_tag(raw).as_str() {
            "material_drop" => Some(Self::MaterialDrop),
            "gold_bonus" => Some(Self::GoldBonus),
            "xp_bonus" => Some(Self::XpBonus),
            _ => None,
        }
    }
}

/// Broad class of an item in the item catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ItemKind {
    /// Dropped by work, spent on upgrades. Stackable.
    Material,
    /// Used up for an immediate effect. Stackable.
    Consumable,
    /// Held for a passive bonus. Not stackable.
    Charm,
    /// Bought into decoration storage instead of the inventory.
    Decoration,
}

// ---------------------------------------------------------------------------
// Missions
// ---------------------------------------------------------------------------

/// How often a mission's progress resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MissionPeriod {
    /// Resets at the start of every UTC day.
    Daily,
    /// Resets every Monday (UTC).
    Weekly,
    /// Never resets.
    Lifetime,
}

/// What a mission counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MissionGoal {
    /// Completed tasks, optionally restricted to one category.
    CompleteTasks,
    /// Gold earned from work.
    EarnGold,
    /// Items bought from the shop.
    PurchaseItems,
    /// Building levels gained.
    UpgradeBuildings,
    /// Materials received from drops.
    CollectMaterials,
}
