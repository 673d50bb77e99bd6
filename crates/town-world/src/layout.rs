//! Layout normalization for buildings and decorations.
//!
//! Normalization takes whatever the persisted record requested and produces
//! a collision-free layout:
//!
//! 1. Buildings are placed in catalog order. A building keeps its requested
//!    origin if the footprint is free there; otherwise the placement
//!    resolver moves it to the nearest free origin. A building with no
//!    usable request starts from its default position.
//! 2. Decorations are placed afterwards at single-cell granularity against
//!    the same occupancy. A decoration whose coordinates are missing,
//!    non-integer or off-grid is put in storage, as is one for which the
//!    grid has no free cell left.
//!
//! [`occupancy_of`] and [`check_placement`] back the explicit move/place
//! transitions, which reject a collision instead of resolving it.

use std::collections::BTreeSet;

use town_types::{Building, BuildingType, Decoration, Footprint, Position, WorldState};
use tracing::{debug, warn};

use crate::catalog::{MAX_LEVEL, MIN_LEVEL, blueprint, decoration_blueprint};
use crate::error::WorldError;
use crate::grid::{
    GRID_HEIGHT, GRID_WIDTH, Occupancy, footprint_cells, in_bounds, resolve_placement,
};

/// A building as the persisted record describes it, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildingRequest {
    /// Which building.
    pub building_type: BuildingType,
    /// Raw level, if any integer was present.
    pub level: Option<i64>,
    /// Raw integer coordinates, if both were present.
    pub position: Option<(i64, i64)>,
}

/// A decoration as the persisted record describes it, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecorationRequest {
    /// Raw id, if a non-empty string was present.
    pub id: Option<String>,
    /// Raw type tag.
    pub decoration_type: String,
    /// Raw level, if any integer was present.
    pub level: Option<i64>,
    /// Raw integer coordinates, if both were present.
    pub position: Option<(i64, i64)>,
}

/// Clamp a raw level into `1..=5`. Missing levels become 1.
pub fn clamp_level(raw: Option<i64>) -> u8 {
    let level = raw.unwrap_or(1).clamp(i64::from(MIN_LEVEL), i64::from(MAX_LEVEL));
    u8::try_from(level).unwrap_or(MIN_LEVEL)
}

/// Convert raw coordinates to a cell, clamping negatives to zero.
fn clamp_cell(x: i64, y: i64) -> Position {
    let cx = u32::try_from(x.max(0)).unwrap_or(u32::MAX);
    let cy = u32::try_from(y.max(0)).unwrap_or(u32::MAX);
    Position::new(cx, cy)
}

/// Convert raw coordinates to a cell only if they lie on the grid.
pub fn grid_cell(x: i64, y: i64) -> Option<Position> {
    let cx = u32::try_from(x).ok()?;
    let cy = u32::try_from(y).ok()?;
    (cx < GRID_WIDTH && cy < GRID_HEIGHT).then_some(Position::new(cx, cy))
}

/// Place all ten buildings and return them with the resulting occupancy.
///
/// The first request for a type wins; later duplicates are ignored.
pub fn lay_out_buildings(requests: &[BuildingRequest]) -> (Vec<Building>, Occupancy) {
    let mut occupancy = Occupancy::new();
    let mut buildings = Vec::with_capacity(BuildingType::ALL.len());

    for building_type in BuildingType::ALL {
        let bp = blueprint(building_type);
        let request = requests.iter().find(|r| r.building_type == building_type);
        let level = clamp_level(request.and_then(|r| r.level));
        let requested = request
            .and_then(|r| r.position)
            .map_or(bp.default_position, |(x, y)| clamp_cell(x, y));

        let position = match resolve_placement(requested, bp.footprint, &occupancy) {
            Some(p) => p,
            None => {
                warn!(building = %building_type, "no free placement, using default position");
                bp.default_position
            }
        };
        if position != requested {
            debug!(
                building = %building_type,
                from_x = requested.x,
                from_y = requested.y,
                to_x = position.x,
                to_y = position.y,
                "building displaced by collision"
            );
        }
        occupancy.mark(position, bp.footprint);
        buildings.push(Building {
            building_type,
            level,
            position,
            footprint: bp.footprint,
        });
    }

    (buildings, occupancy)
}

/// Normalize decorations against an occupancy that already holds the
/// buildings. Placed decorations are marked into `occupancy`.
///
/// Unknown decoration types are dropped. Missing ids become
/// `<type>-<index>`; a repeated id gets a numeric suffix so that no owned
/// decoration is lost.
pub fn lay_out_decorations(
    requests: &[DecorationRequest],
    occupancy: &mut Occupancy,
) -> Vec<Decoration> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut decorations = Vec::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        let Some(bp) = decoration_blueprint(&request.decoration_type) else {
            debug!(decoration_type = %request.decoration_type, "dropping unknown decoration");
            continue;
        };

        let base_id = request
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{index}", bp.decoration_type));
        let id = unique_id(base_id, &seen);
        seen.insert(id.clone());

        let position = request
            .position
            .and_then(|(x, y)| grid_cell(x, y))
            .and_then(|cell| resolve_placement(cell, Footprint::UNIT, occupancy));
        if let Some(p) = position {
            occupancy.mark(p, Footprint::UNIT);
        }

        decorations.push(Decoration {
            id,
            decoration_type: bp.decoration_type.to_owned(),
            level: bp.is_upgradable().then(|| clamp_level(request.level)),
            effect: bp.effect,
            position,
        });
    }

    decorations
}

fn unique_id(base: String, seen: &BTreeSet<String>) -> String {
    if !seen.contains(&base) {
        return base;
    }
    let mut n: u32 = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !seen.contains(&candidate) {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}

/// Occupancy of a normalized state, optionally leaving one building or one
/// decoration out (the one being moved).
pub fn occupancy_of(
    state: &WorldState,
    skip_building: Option<BuildingType>,
    skip_decoration: Option<&str>,
) -> Occupancy {
    let mut occupancy = Occupancy::new();
    for b in &state.buildings {
        if Some(b.building_type) != skip_building {
            occupancy.mark(b.position, b.footprint);
        }
    }
    for d in &state.decorations {
        if Some(d.id.as_str()) == skip_decoration {
            continue;
        }
        if let Some(p) = d.position {
            occupancy.mark(p, Footprint::UNIT);
        }
    }
    occupancy
}

/// Check that a footprint can be placed exactly at `origin`.
///
/// # Errors
///
/// Returns [`WorldError::OutOfBounds`] if the footprint leaves the grid,
/// or [`WorldError::Occupied`] naming the first taken cell.
pub fn check_placement(
    occupancy: &Occupancy,
    origin: Position,
    footprint: Footprint,
) -> Result<(), WorldError> {
    if !in_bounds(origin, footprint) {
        return Err(WorldError::OutOfBounds {
            x: origin.x,
            y: origin.y,
        });
    }
    if let Some(taken) = footprint_cells(origin, footprint).find(|c| occupancy.is_occupied(*c)) {
        return Err(WorldError::Occupied {
            x: taken.x,
            y: taken.y,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(t: BuildingType, level: Option<i64>, pos: Option<(i64, i64)>) -> BuildingRequest {
        BuildingRequest {
            building_type: t,
            level,
            position: pos,
        }
    }

    fn deco(id: &str, t: &str, pos: Option<(i64, i64)>) -> DecorationRequest {
        DecorationRequest {
            id: Some(id.to_owned()),
            decoration_type: t.to_owned(),
            level: None,
            position: pos,
        }
    }

    fn assert_no_overlap(buildings: &[Building], decorations: &[Decoration]) {
        let mut seen = BTreeSet::new();
        for b in buildings {
            for c in footprint_cells(b.position, b.footprint) {
                assert!(seen.insert(c), "building overlap at {c:?}");
            }
        }
        for d in decorations.iter().filter_map(|d| d.position) {
            assert!(seen.insert(d), "decoration overlap at {d:?}");
        }
    }

    #[test]
    fn empty_request_uses_defaults() {
        let (buildings, occ) = lay_out_buildings(&[]);
        assert_eq!(buildings.len(), 10);
        for b in &buildings {
            assert_eq!(b.position, blueprint(b.building_type).default_position);
            assert_eq!(b.level, 1);
        }
        assert_no_overlap(&buildings, &[]);
        assert!(!occ.is_empty());
    }

    #[test]
    fn colliding_requests_are_displaced() {
        let requests = vec![
            request(BuildingType::TownHall, Some(3), Some((0, 0))),
            request(BuildingType::Workshop, Some(9), Some((1, 1))),
            request(BuildingType::Forge, Some(-2), Some((0, 0))),
        ];
        let (buildings, _) = lay_out_buildings(&requests);
        assert_no_overlap(&buildings, &[]);
        let hall = buildings.iter().find(|b| b.building_type == BuildingType::TownHall);
        assert_eq!(hall.map(|b| b.position), Some(Position::new(0, 0)));
        assert_eq!(hall.map(|b| b.level), Some(3));
        let workshop = buildings.iter().find(|b| b.building_type == BuildingType::Workshop);
        assert_eq!(workshop.map(|b| b.level), Some(5));
        assert_ne!(workshop.map(|b| b.position), Some(Position::new(1, 1)));
        let forge = buildings.iter().find(|b| b.building_type == BuildingType::Forge);
        assert_eq!(forge.map(|b| b.level), Some(1));
    }

    #[test]
    fn every_building_requesting_one_cell_still_fits() {
        let requests: Vec<_> = BuildingType::ALL
            .into_iter()
            .map(|t| request(t, None, Some((7, 7))))
            .collect();
        let (buildings, _) = lay_out_buildings(&requests);
        assert_no_overlap(&buildings, &[]);
    }

    #[test]
    fn decorations_avoid_buildings_and_each_other() {
        let (buildings, mut occ) = lay_out_buildings(&[]);
        let hall = blueprint(BuildingType::TownHall).default_position;
        let x = i64::from(hall.x);
        let y = i64::from(hall.y);
        let requests = vec![
            deco("a", "fountain", Some((x, y))),
            deco("b", "lantern", Some((x, y))),
            deco("c", "lantern", Some((0, 0))),
        ];
        let decorations = lay_out_decorations(&requests, &mut occ);
        assert_eq!(decorations.len(), 3);
        assert!(decorations.iter().all(Decoration::is_placed));
        assert_no_overlap(&buildings, &decorations);
    }

    #[test]
    fn off_grid_or_missing_coordinates_go_to_storage() {
        let mut occ = Occupancy::new();
        let requests = vec![
            deco("a", "lantern", Some((16, 3))),
            deco("b", "lantern", Some((-1, 3))),
            deco("c", "lantern", None),
        ];
        let decorations = lay_out_decorations(&requests, &mut occ);
        assert!(decorations.iter().all(|d| !d.is_placed()));
        assert!(occ.is_empty());
    }

    #[test]
    fn unknown_types_dropped_and_ids_made_unique() {
        let mut occ = Occupancy::new();
        let mut requests = vec![
            deco("x", "dragon", None),
            deco("dup", "shrine", None),
            deco("dup", "banner", None),
        ];
        requests.push(DecorationRequest {
            id: None,
            decoration_type: "windmill".to_owned(),
            level: Some(12),
            position: None,
        });
        let decorations = lay_out_decorations(&requests, &mut occ);
        let ids: Vec<&str> = decorations.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dup", "dup-2", "windmill-3"]);
        assert_eq!(decorations.last().and_then(|d| d.level), Some(5));
    }

    #[test]
    fn check_placement_reports_first_conflict() {
        let mut occ = Occupancy::new();
        occ.mark(Position::new(4, 4), Footprint::UNIT);
        assert_eq!(
            check_placement(&occ, Position::new(3, 3), Footprint::new(2, 2)),
            Err(WorldError::Occupied { x: 4, y: 4 })
        );
        assert_eq!(
            check_placement(&occ, Position::new(15, 0), Footprint::new(2, 1)),
            Err(WorldError::OutOfBounds { x: 15, y: 0 })
        );
        assert!(check_placement(&occ, Position::new(0, 0), Footprint::new(2, 2)).is_ok());
    }
}
