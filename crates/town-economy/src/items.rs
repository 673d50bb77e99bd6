//! The fixed item catalog.
//!
//! Items come in four kinds (see [`ItemKind`]). Materials and consumables
//! stack; charms do not, and are capped at one per inventory. Decorations
//! are sold here too, but buying one creates a decoration entry in
//! storage rather than an inventory slot.

use town_types::{EffectKind, ItemKind};

/// Largest stack a stackable item can reach.
pub const MAX_STACK: u32 = 9_999;

/// What an item does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemEffect {
    /// No effect; crafting or upgrade input.
    None,
    /// Grants gold when consumed.
    GrantGold(u64),
    /// Grants xp when consumed.
    GrantXp(u64),
    /// Passive bonus while held.
    Bonus(EffectKind, f64),
}

/// A catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemDef {
    /// Stable id used in inventories and the shop.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Broad class.
    pub kind: ItemKind,
    /// Shop price in gold; `None` when not sold.
    pub price: Option<u64>,
    /// Use or passive effect.
    pub effect: ItemEffect,
}

impl ItemDef {
    /// Charms are capped at one; everything else stacks.
    pub const fn is_stackable(&self) -> bool {
        !matches!(self.kind, ItemKind::Charm)
    }

    /// Highest quantity an inventory may hold.
    pub const fn max_quantity(&self) -> u32 {
        if self.is_stackable() { MAX_STACK } else { 1 }
    }

    /// Whether consuming the item does something.
    pub const fn is_consumable(&self) -> bool {
        matches!(self.kind, ItemKind::Consumable)
    }
}

const fn material(id: &'static str, name: &'static str, price: u64) -> ItemDef {
    ItemDef {
        id,
        name,
        kind: ItemKind::Material,
        price: Some(price),
        effect: ItemEffect::None,
    }
}

const fn decoration(id: &'static str, name: &'static str, price: u64) -> ItemDef {
    ItemDef {
        id,
        name,
        kind: ItemKind::Decoration,
        price: Some(price),
        effect: ItemEffect::None,
    }
}

/// Every item that can exist.
pub const ITEMS: [ItemDef; 30] = [
    // --- Materials ---
    material("stone_block", "Stone Block", 12),
    material("timber", "Timber", 10),
    material("iron_nail", "Iron Nails", 14),
    material("iron_ore", "Iron Ore", 16),
    material("coal", "Coal", 10),
    material("parchment", "Parchment", 12),
    material("ink", "Ink", 14),
    material("binding_thread", "Binding Thread", 12),
    material("lens", "Lens", 22),
    material("leather", "Leather", 15),
    material("rope", "Rope", 10),
    material("fish", "Fish", 8),
    material("cloth", "Cloth", 12),
    material("spice", "Spice", 20),
    material("grain", "Grain", 6),
    material("herb", "Herb", 8),
    // --- Consumables ---
    ItemDef {
        id: "xp_scroll",
        name: "Scroll of Insight",
        kind: ItemKind::Consumable,
        price: Some(60),
        effect: ItemEffect::GrantXp(50),
    },
    ItemDef {
        id: "gold_pouch",
        name: "Gold Pouch",
        kind: ItemKind::Consumable,
        price: None,
        effect: ItemEffect::GrantGold(75),
    },
    ItemDef {
        id: "festival_cake",
        name: "Festival Cake",
        kind: ItemKind::Consumable,
        price: Some(30),
        effect: ItemEffect::GrantXp(20),
    },
    // --- Charms ---
    ItemDef {
        id: "lucky_clover",
        name: "Lucky Clover",
        kind: ItemKind::Charm,
        price: Some(400),
        effect: ItemEffect::Bonus(EffectKind::MaterialDrop, 0.25),
    },
    ItemDef {
        id: "golden_hammer",
        name: "Golden Hammer",
        kind: ItemKind::Charm,
        price: Some(500),
        effect: ItemEffect::Bonus(EffectKind::GoldBonus, 0.10),
    },
    ItemDef {
        id: "scholar_quill",
        name: "Scholar's Quill",
        kind: ItemKind::Charm,
        price: Some(500),
        effect: ItemEffect::Bonus(EffectKind::XpBonus, 0.10),
    },
    // --- Decorations ---
    decoration("lantern", "Lantern", 40),
    decoration("flower_bed", "Flower Bed", 50),
    decoration("fountain", "Fountain", 300),
    decoration("well", "Well", 180),
    decoration("shrine", "Shrine", 320),
    decoration("banner", "Banner", 120),
    decoration("lucky_cat_statue", "Lucky Cat Statue", 450),
    decoration("windmill", "Windmill", 260),
];

/// Look up an item by id.
pub fn item(id: &str) -> Option<&'static ItemDef> {
    ITEMS.iter().find(|i| i.id == id)
}

/// Whether the id names a material.
pub fn is_material(id: &str) -> bool {
    item(id).is_some_and(|i| i.kind == ItemKind::Material)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use town_types::BuildingType;
    use town_world::blueprint;
    use town_world::catalog::DECORATIONS;

    use super::*;

    #[test]
    fn ids_are_unique() {
        let ids: BTreeSet<&str> = ITEMS.iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), ITEMS.len());
    }

    #[test]
    fn every_building_material_is_cataloged() {
        for t in BuildingType::ALL {
            for m in blueprint(t).material_candidates {
                assert!(is_material(m), "{m} missing from item catalog");
            }
        }
    }

    #[test]
    fn every_decoration_type_is_sold() {
        for d in DECORATIONS {
            let def = item(d.decoration_type);
            assert!(def.is_some_and(|i| i.kind == ItemKind::Decoration));
        }
    }

    #[test]
    fn charms_cap_at_one() {
        assert_eq!(item("lucky_clover").map(ItemDef::max_quantity), Some(1));
        assert_eq!(item("timber").map(ItemDef::max_quantity), Some(MAX_STACK));
    }
}
