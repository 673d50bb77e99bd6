//! Tile grid, building catalog and layout resolution for the Townhall world.
//!
//! The town is a fixed 16x16 grid holding exactly one building of each of
//! the ten [`BuildingType`]s plus any placed decorations. Nothing may
//! overlap, and everything must stay on the grid.
//!
//! # Modules
//!
//! - [`catalog`] -- Building blueprints (footprint, default position, task
//!   category, material candidates, upgrade costs) and decoration types.
//! - [`error`] -- Rejections of explicit layout edits.
//! - [`grid`] -- [`Occupancy`] and the breadth-first placement resolver.
//! - [`layout`] -- Normalization of requested building and decoration
//!   positions into a collision-free layout.
//!
//! [`BuildingType`]: town_types::BuildingType
//! [`Occupancy`]: grid::Occupancy

pub mod catalog;
pub mod error;
pub mod grid;
pub mod layout;

// Re-export primary types at crate root.
pub use catalog::{
    BuildingBlueprint, DecorationBlueprint, MAX_LEVEL, UpgradeCost, blueprint,
    building_for_category, canonical_category, decoration_blueprint, upgrade_cost,
};
pub use error::WorldError;
pub use grid::{GRID_HEIGHT, GRID_WIDTH, Occupancy, resolve_placement};
pub use layout::{
    BuildingRequest, DecorationRequest, check_placement, lay_out_buildings, lay_out_decorations,
    occupancy_of,
};
