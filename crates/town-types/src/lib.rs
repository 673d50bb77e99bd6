//! Shared type definitions for the Townhall world state.
//!
//! This crate is the single source of truth for the shape of the persisted
//! world record. Types defined here flow downstream to `TypeScript` via
//! `ts-rs` for the rendering client.
//!
//! # Modules
//!
//! - [`enums`] -- Building types, activity kinds, effects, mission goals
//! - [`structs`] -- The [`WorldState`] root record and its sub-records

pub mod enums;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ActivityKind, BuildingType, EffectKind, ItemKind, MissionGoal, MissionPeriod};
pub use structs::{
    Achievement, ActivityEntry, Building, DailyRecord, Decoration, Economy, Footprint,
    InventoryEntry, ItemAmount, LifetimeStats, MaterialCount, MaterialDrop, Mission, PassiveEffect,
    Position, Progress, Rank, Reward, Town, WorldState,
};

#[cfg(test)]
mod tests {
    //! Triggers `TypeScript` binding generation for the client-facing types.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::enums::BuildingType::export_all();
        let _ = crate::enums::ActivityKind::export_all();
        let _ = crate::enums::MissionGoal::export_all();
        let _ = crate::structs::WorldState::export_all();
    }
}
