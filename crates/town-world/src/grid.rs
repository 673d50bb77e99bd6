//! The bounded tile grid and the placement resolver.
//!
//! [`Occupancy`] tracks which cells are taken. [`resolve_placement`] finds
//! the nearest origin whose whole footprint is free, searching outward from
//! the requested cell breadth-first over 4-directional neighbors. The same
//! resolver is used for multi-cell buildings and single-cell decorations.
//!
//! Neighbor order is fixed (up, right, down, left), so the result is a pure
//! function of its arguments.

use std::collections::{BTreeSet, VecDeque};

use town_types::{Footprint, Position};

/// Grid width in cells.
pub const GRID_WIDTH: u32 = 16;

/// Grid height in cells.
pub const GRID_HEIGHT: u32 = 16;

/// The set of occupied cells on the grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    cells: BTreeSet<Position>,
}

impl Occupancy {
    /// An empty grid.
    pub const fn new() -> Self {
        Self {
            cells: BTreeSet::new(),
        }
    }

    /// Whether a single cell is taken.
    pub fn is_occupied(&self, cell: Position) -> bool {
        self.cells.contains(&cell)
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell is occupied.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether a footprint at `origin` lies inside the grid and touches no
    /// occupied cell.
    pub fn fits(&self, origin: Position, footprint: Footprint) -> bool {
        in_bounds(origin, footprint)
            && footprint_cells(origin, footprint).all(|c| !self.cells.contains(&c))
    }

    /// Mark every cell of a footprint as occupied. Cells outside the grid
    /// are ignored.
    pub fn mark(&mut self, origin: Position, footprint: Footprint) {
        for cell in footprint_cells(origin, footprint) {
            if cell.x < GRID_WIDTH && cell.y < GRID_HEIGHT {
                self.cells.insert(cell);
            }
        }
    }

    /// Release every cell of a footprint.
    pub fn clear(&mut self, origin: Position, footprint: Footprint) {
        for cell in footprint_cells(origin, footprint) {
            self.cells.remove(&cell);
        }
    }
}

/// Iterate over the cells covered by a footprint at `origin`.
pub fn footprint_cells(origin: Position, footprint: Footprint) -> impl Iterator<Item = Position> {
    (0..footprint.h).flat_map(move |dy| {
        (0..footprint.w).map(move |dx| {
            Position::new(origin.x.saturating_add(dx), origin.y.saturating_add(dy))
        })
    })
}

/// Whether a footprint at `origin` lies entirely inside the grid.
pub const fn in_bounds(origin: Position, footprint: Footprint) -> bool {
    footprint.w > 0
        && footprint.h > 0
        && footprint.w <= GRID_WIDTH
        && footprint.h <= GRID_HEIGHT
        && origin.x <= GRID_WIDTH.saturating_sub(footprint.w)
        && origin.y <= GRID_HEIGHT.saturating_sub(footprint.h)
}

/// Clamp a requested origin so that the footprint fits inside the grid.
///
/// Returns `None` if the footprint is larger than the grid itself.
pub fn clamp_origin(requested: Position, footprint: Footprint) -> Option<Position> {
    let max_x = GRID_WIDTH.checked_sub(footprint.w)?;
    let max_y = GRID_HEIGHT.checked_sub(footprint.h)?;
    if footprint.w == 0 || footprint.h == 0 {
        return None;
    }
    Some(Position::new(requested.x.min(max_x), requested.y.min(max_y)))
}

/// Find the nearest collision-free origin for a footprint.
///
/// If the clamped `requested` origin is free it is returned unchanged.
/// Otherwise origins are explored breadth-first from it, and the first one
/// whose full footprint is free wins. Returns `None` when no origin fits
/// (the grid is saturated for this footprint).
pub fn resolve_placement(
    requested: Position,
    footprint: Footprint,
    occupied: &Occupancy,
) -> Option<Position> {
    let start = clamp_origin(requested, footprint)?;
    if occupied.fits(start, footprint) {
        return Some(start);
    }

    let max_x = GRID_WIDTH.saturating_sub(footprint.w);
    let max_y = GRID_HEIGHT.saturating_sub(footprint.h);

    let mut visited: BTreeSet<Position> = BTreeSet::new();
    let mut queue: VecDeque<Position> = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if occupied.fits(current, footprint) {
            return Some(current);
        }
        for next in neighbors(current, max_x, max_y) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }
    None
}

/// The in-range 4-neighbors of an origin, in up/right/down/left order.
fn neighbors(origin: Position, max_x: u32, max_y: u32) -> impl Iterator<Item = Position> {
    let up = origin
        .y
        .checked_sub(1)
        .map(|y| Position::new(origin.x, y));
    let right = (origin.x < max_x).then(|| Position::new(origin.x.saturating_add(1), origin.y));
    let down = (origin.y < max_y).then(|| Position::new(origin.x, origin.y.saturating_add(1)));
    let left = origin
        .x
        .checked_sub(1)
        .map(|x| Position::new(x, origin.y));
    [up, right, down, left].into_iter().flatten()
}
