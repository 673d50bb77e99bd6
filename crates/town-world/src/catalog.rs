//! Static building and decoration blueprints.
//!
//! - [`blueprint`] returns the fixed footprint, default position, task
//!   category, material candidates and upgrade schedule for each of the ten
//!   [`BuildingType`]s.
//! - [`decoration_blueprint`] looks up a decoration type by tag.
//! - [`building_for_category`] maps an external task category onto the
//!   building where that work happens.

use town_types::{BuildingType, EffectKind, Footprint, ItemAmount, PassiveEffect, Position};

/// Highest level a building or decoration can reach.
pub const MAX_LEVEL: u8 = 5;

/// Lowest level a building or decoration can have.
pub const MIN_LEVEL: u8 = 1;

/// Fixed per-type data for a building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildingBlueprint {
    /// The building type described.
    pub building_type: BuildingType,
    /// Cells occupied.
    pub footprint: Footprint,
    /// Where the building sits when nothing else was requested.
    pub default_position: Position,
    /// Canonical task category handled here.
    pub category: &'static str,
    /// Materials a completion here can drop. Never empty.
    pub material_candidates: &'static [&'static str],
    /// Base gold cost of an upgrade, multiplied by the current level.
    pub upgrade_gold_base: u64,
}

/// Return the canonical blueprint for a given [`BuildingType`].
///
/// Default positions are laid out so that no two default footprints
/// overlap on the 16x16 grid.
#[allow(clippy::too_many_lines)] // One arm per building; the table reads best inline.
pub const fn blueprint(building_type: BuildingType) -> BuildingBlueprint {
    match building_type {
        BuildingType::TownHall => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(3, 3),
            default_position: Position::new(6, 6),
            category: "planning",
            material_candidates: &["stone_block", "timber"],
            upgrade_gold_base: 200,
        },
        BuildingType::Workshop => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 2),
            default_position: Position::new(2, 2),
            category: "feature",
            material_candidates: &["timber", "iron_nail"],
            upgrade_gold_base: 150,
        },
        BuildingType::Forge => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 2),
            default_position: Position::new(5, 2),
            category: "bugfix",
            material_candidates: &["iron_ore", "coal"],
            upgrade_gold_base: 150,
        },
        BuildingType::Library => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 2),
            default_position: Position::new(9, 2),
            category: "research",
            material_candidates: &["parchment", "ink"],
            upgrade_gold_base: 150,
        },
        BuildingType::Archive => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 1),
            default_position: Position::new(12, 2),
            category: "docs",
            material_candidates: &["parchment", "binding_thread"],
            upgrade_gold_base: 120,
        },
        BuildingType::Watchtower => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(1, 2),
            default_position: Position::new(14, 5),
            category: "review",
            material_candidates: &["stone_block", "lens"],
            upgrade_gold_base: 120,
        },
        BuildingType::TrainingGround => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(3, 2),
            default_position: Position::new(1, 11),
            category: "test",
            material_candidates: &["leather", "timber"],
            upgrade_gold_base: 140,
        },
        BuildingType::Harbor => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(3, 2),
            default_position: Position::new(11, 12),
            category: "ops",
            material_candidates: &["rope", "fish"],
            upgrade_gold_base: 140,
        },
        BuildingType::Market => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 2),
            default_position: Position::new(2, 7),
            category: "analysis",
            material_candidates: &["cloth", "spice"],
            upgrade_gold_base: 130,
        },
        BuildingType::Tavern => BuildingBlueprint {
            building_type,
            footprint: Footprint::new(2, 2),
            default_position: Position::new(11, 7),
            category: "general",
            material_candidates: &["grain", "herb"],
            upgrade_gold_base: 100,
        },
    }
}

/// Cost of raising a building from `current_level` to the next level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCost {
    /// Gold debited.
    pub gold: u64,
    /// Materials debited.
    pub materials: Vec<ItemAmount>,
}

/// Compute the upgrade cost for a building at `current_level`.
///
/// Returns `None` when the building is already at [`MAX_LEVEL`]. Gold
/// scales linearly with level; each material candidate costs
/// `2 * level` of the first and `level` of the rest.
pub fn upgrade_cost(building_type: BuildingType, current_level: u8) -> Option<UpgradeCost> {
    if current_level >= MAX_LEVEL {
        return None;
    }
    let bp = blueprint(building_type);
    let level = u32::from(current_level.max(MIN_LEVEL));
    let materials = bp
        .material_candidates
        .iter()
        .enumerate()
        .map(|(i, item)| ItemAmount {
            item_id: (*item).to_owned(),
            quantity: if i == 0 { level.saturating_mul(2) } else { level },
        })
        .collect();
    Some(UpgradeCost {
        gold: bp.upgrade_gold_base.saturating_mul(u64::from(level)),
        materials,
    })
}

/// Map an external task category onto the building where that work happens.
///
/// Matching is case-insensitive and accepts a few common aliases. Anything
/// unrecognized lands in the [`BuildingType::Tavern`].
pub fn building_for_category(category: &str) -> BuildingType {
    let folded = category.trim().to_ascii_lowercase();
    match folded.as_str() {
        "planning" | "plan" | "roadmap" => BuildingType::TownHall,
        "feature" | "feat" | "implementation" | "build" => BuildingType::Workshop,
        "bugfix" | "bug" | "fix" | "hotfix" => BuildingType::Forge,
        "research" | "investigation" | "spike" => BuildingType::Library,
        "docs" | "doc" | "documentation" => BuildingType::Archive,
        "review" | "code_review" | "audit" => BuildingType::Watchtower,
        "test" | "tests" | "testing" | "qa" => BuildingType::TrainingGround,
        "ops" | "deploy" | "infra" | "release" => BuildingType::Harbor,
        "analysis" | "data" | "metrics" => BuildingType::Market,
        _ => BuildingType::Tavern,
    }
}

/// Canonical category for a raw category string.
pub fn canonical_category(category: &str) -> &'static str {
    blueprint(building_for_category(category)).category
}

// ---------------------------------------------------------------------------
// Decorations
// ---------------------------------------------------------------------------

/// Fixed data for a decoration type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecorationBlueprint {
    /// Persisted type tag.
    pub decoration_type: &'static str,
    /// Passive bonus, for decorations that have one. Those are upgradable.
    pub effect: Option<PassiveEffect>,
}

impl DecorationBlueprint {
    /// Decorations with an effect carry a level.
    pub const fn is_upgradable(&self) -> bool {
        self.effect.is_some()
    }
}

const fn effect(kind: EffectKind, bonus_per_level: f64) -> Option<PassiveEffect> {
    Some(PassiveEffect {
        kind,
        bonus_per_level,
    })
}

/// Every decoration type that can exist in the town.
pub const DECORATIONS: [DecorationBlueprint; 8] = [
    DecorationBlueprint {
        decoration_type: "lantern",
        effect: None,
    },
    DecorationBlueprint {
        decoration_type: "flower_bed",
        effect: None,
    },
    DecorationBlueprint {
        decoration_type: "fountain",
        effect: effect(EffectKind::GoldBonus, 0.02),
    },
    DecorationBlueprint {
        decoration_type: "well",
        effect: effect(EffectKind::GoldBonus, 0.01),
    },
    DecorationBlueprint {
        decoration_type: "shrine",
        effect: effect(EffectKind::XpBonus, 0.03),
    },
    DecorationBlueprint {
        decoration_type: "banner",
        effect: effect(EffectKind::XpBonus, 0.01),
    },
    DecorationBlueprint {
        decoration_type: "lucky_cat_statue",
        effect: effect(EffectKind::MaterialDrop, 0.1),
    },
    DecorationBlueprint {
        decoration_type: "windmill",
        effect: effect(EffectKind::MaterialDrop, 0.05),
    },
];

/// Look up a decoration blueprint by its type tag.
pub fn decoration_blueprint(decoration_type: &str) -> Option<&'static DecorationBlueprint> {
    DECORATIONS
        .iter()
        .find(|d| d.decoration_type == decoration_type)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn default_footprints_do_not_overlap() {
        let mut seen = BTreeSet::new();
        for t in BuildingType::ALL {
            let bp = blueprint(t);
            for dx in 0..bp.footprint.w {
                for dy in 0..bp.footprint.h {
                    let cell = (bp.default_position.x + dx, bp.default_position.y + dy);
                    assert!(cell.0 < 16 && cell.1 < 16, "{t} leaves the grid");
                    assert!(seen.insert(cell), "{t} overlaps at {cell:?}");
                }
            }
        }
    }

    #[test]
    fn every_building_has_materials() {
        for t in BuildingType::ALL {
            assert!(!blueprint(t).material_candidates.is_empty());
        }
    }

    #[test]
    fn category_aliases() {
        assert_eq!(building_for_category("Bug"), BuildingType::Forge);
        assert_eq!(building_for_category("QA"), BuildingType::TrainingGround);
        assert_eq!(building_for_category("knitting"), BuildingType::Tavern);
        assert_eq!(canonical_category("feat"), "feature");
    }

    #[test]
    fn upgrade_cost_scales_and_caps() {
        let cost = upgrade_cost(BuildingType::Forge, 2);
        assert_eq!(
            cost,
            Some(UpgradeCost {
                gold: 300,
                materials: vec![
                    ItemAmount {
                        item_id: "iron_ore".to_owned(),
                        quantity: 4
                    },
                    ItemAmount {
                        item_id: "coal".to_owned(),
                        quantity: 2
                    },
                ],
            })
        );
        assert_eq!(upgrade_cost(BuildingType::Forge, MAX_LEVEL), None);
    }

    #[test]
    fn decoration_lookup() {
        assert!(decoration_blueprint("fountain").is_some_and(DecorationBlueprint::is_upgradable));
        assert!(decoration_blueprint("lantern").is_some_and(|d| !d.is_upgradable()));
        assert!(decoration_blueprint("dragon").is_none());
    }
}
