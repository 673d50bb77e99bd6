//! Error types for the `town-world` crate.
//!
//! These are rejections of a requested layout change. They are expected
//! outcomes of user actions, not failures of the store.

use town_types::BuildingType;

/// Errors that can occur when editing the town layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// No building with this tag exists in the catalog.
    #[error("unknown building type: {0}")]
    UnknownBuilding(String),

    /// No decoration with this id is owned.
    #[error("decoration not found: {0}")]
    DecorationNotFound(String),

    /// The footprint would leave the grid.
    #[error("placement at ({x}, {y}) leaves the grid")]
    OutOfBounds {
        /// Requested column.
        x: u32,
        /// Requested row.
        y: u32,
    },

    /// The footprint would overlap something already placed.
    #[error("cell ({x}, {y}) is already occupied")]
    Occupied {
        /// Requested column.
        x: u32,
        /// Requested row.
        y: u32,
    },

    /// The building cannot be upgraded any further.
    #[error("{0} is already at max level")]
    MaxLevel(BuildingType),
}
