use crate::error::{MeshError, MeshResult};
use bevy::log::info;
use std::ops::Index;

/// Number of cells along each axis. Node counts are one more per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub count_x: usize,
    pub count_y: usize,
    pub count_z: usize,
}

impl GridSpec {
    pub fn new(count_x: usize, count_y: usize, count_z: usize) -> Self {
        GridSpec {
            count_x,
            count_y,
            count_z,
        }
    }

    pub fn validate(&self) -> MeshResult<()> {
        for (name, count) in [
            ("count_x", self.count_x),
            ("count_y", self.count_y),
            ("count_z", self.count_z),
        ] {
            if count == 0 {
                return Err(MeshError::invalid_argument(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        self.num_points().map(|_| ())
    }

    /// Node counts along `(level, line, column)`.
    pub fn node_counts(&self) -> MeshResult<(usize, usize, usize)> {
        let nodes = |name: &str, count: usize| {
            count.checked_add(1).ok_or_else(|| {
                MeshError::invalid_argument(format!("{name} = {count} is too large"))
            })
        };
        Ok((
            nodes("count_y", self.count_y)?,
            nodes("count_z", self.count_z)?,
            nodes("count_x", self.count_x)?,
        ))
    }

    /// Lattice points: `(count_y+1) * (count_z+1) * (count_x+1)`. Fails when
    /// that many points could not be addressed in memory.
    pub fn num_points(&self) -> MeshResult<usize> {
        let (levels, lines, columns) = self.node_counts()?;
        levels
            .checked_mul(lines)
            .and_then(|n| n.checked_mul(columns))
            .filter(|&n| {
                n.checked_mul(std::mem::size_of::<LatticePoint>())
                    .is_some_and(|bytes| bytes <= isize::MAX as usize)
            })
            .ok_or_else(|| {
                MeshError::invalid_argument(format!(
                    "grid of {}x{}x{} cells has too many points",
                    self.count_x, self.count_y, self.count_z
                ))
            })
    }

    #[inline]
    pub fn num_cells(&self) -> usize {
        self.count_x
            .saturating_mul(self.count_y)
            .saturating_mul(self.count_z)
    }
}

/// Distance between adjacent lattice points along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Spacing {
    pub fn new(dx: f64, dy: f64, dz: f64) -> Self {
        Spacing { dx, dy, dz }
    }

    #[cfg(test)]
    pub fn uniform(d: f64) -> Self {
        Spacing::new(d, d, d)
    }

    pub fn validate(&self) -> MeshResult<()> {
        for (name, d) in [("dx", self.dx), ("dy", self.dy), ("dz", self.dz)] {
            if !d.is_finite() || d <= 0.0 {
                return Err(MeshError::invalid_argument(format!(
                    "spacing {name} must be a positive finite number, got {d}"
                )));
            }
        }
        Ok(())
    }
}

/// Index of a point inside its owning [`Lattice`]. Equal to the traversal index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub usize);

impl PointId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The point that receives the external force and mass.
pub type LoadPoint = PointId;

/// Grid coordinate of a lattice point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub level: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatticePoint {
    pub id: PointId,
    pub coord: GridCoord,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LatticePoint {
    #[inline]
    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

/// Sides of the lattice hull, as bit flags returned by [`Lattice::hull_sides`].
pub mod hull {
    pub const LINE_MIN: u8 = 1 << 0;
    pub const LINE_MAX: u8 = 1 << 1;
    pub const LEVEL_MIN: u8 = 1 << 2;
    pub const LEVEL_MAX: u8 = 1 << 3;
    pub const COLUMN_MIN: u8 = 1 << 4;
    pub const COLUMN_MAX: u8 = 1 << 5;
}

/// Points of the grid, indexed `[level][line][column]` and stored flat in
/// traversal order (level outermost, column innermost).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lattice {
    points: Vec<LatticePoint>,
    levels: usize,
    lines: usize,
    columns: usize,
}

impl Lattice {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Node counts along `(level, line, column)`.
    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.levels, self.lines, self.columns)
    }

    pub fn points(&self) -> &[LatticePoint] {
        &self.points
    }

    pub fn id_at(&self, level: usize, line: usize, column: usize) -> Option<PointId> {
        if level < self.levels && line < self.lines && column < self.columns {
            Some(PointId((level * self.lines + line) * self.columns + column))
        } else {
            None
        }
    }

    pub fn get(&self, id: PointId) -> Option<&LatticePoint> {
        self.points.get(id.0)
    }

    /// Hull sides a grid coordinate lies on, as a mask of [`hull`] flags.
    pub fn hull_sides(&self, coord: GridCoord) -> u8 {
        let mut sides = 0;
        if coord.line == 0 {
            sides |= hull::LINE_MIN;
        }
        if coord.line + 1 == self.lines {
            sides |= hull::LINE_MAX;
        }
        if coord.level == 0 {
            sides |= hull::LEVEL_MIN;
        }
        if coord.level + 1 == self.levels {
            sides |= hull::LEVEL_MAX;
        }
        if coord.column == 0 {
            sides |= hull::COLUMN_MIN;
        }
        if coord.column + 1 == self.columns {
            sides |= hull::COLUMN_MAX;
        }
        sides
    }
}

impl Index<PointId> for Lattice {
    type Output = LatticePoint;

    fn index(&self, id: PointId) -> &LatticePoint {
        &self.points[id.0]
    }
}

/// Points anchored to the wall: every point with `line == 0`, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundarySet {
    points: Vec<PointId>,
}

impl BoundarySet {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PointId> + '_ {
        self.points.iter().copied()
    }
}

/// Builds the lattice of a `grid` with the given `spacing`.
///
/// Grid coordinate `line` maps to world X, `level` to world Y and `column` to
/// world Z, so point `(level, line, column)` sits at
/// `(line*dx, level*dy, column*dz)`. The boundary set collects the `line == 0`
/// face and the load point is the last point visited.
pub fn build_lattice(
    grid: &GridSpec,
    spacing: &Spacing,
) -> MeshResult<(Lattice, BoundarySet, LoadPoint)> {
    grid.validate()?;
    spacing.validate()?;

    let (levels, lines, columns) = grid.node_counts()?;
    let mut points = Vec::with_capacity(grid.num_points()?);
    let mut boundary = Vec::with_capacity(levels * columns);

    for level in 0..levels {
        for line in 0..lines {
            for column in 0..columns {
                let id = PointId(points.len());
                points.push(LatticePoint {
                    id,
                    coord: GridCoord {
                        level,
                        line,
                        column,
                    },
                    x: line as f64 * spacing.dx,
                    y: level as f64 * spacing.dy,
                    z: column as f64 * spacing.dz,
                });
                if line == 0 {
                    boundary.push(id);
                }
            }
        }
    }

    let load_point = points
        .last()
        .map(|p| p.id)
        .ok_or_else(|| MeshError::construction_failure("lattice has no points"))?;

    info!(
        "Generated lattice of {} points ({} anchored)",
        points.len(),
        boundary.len()
    );

    Ok((
        Lattice {
            points,
            levels,
            lines,
            columns,
        },
        BoundarySet { points: boundary },
        load_point,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BEAM_CELLS_HEIGHT, BEAM_CELLS_LENGTH, BEAM_CELLS_WIDTH, BLOCK_SIZE};
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    fn beam() -> (Lattice, BoundarySet, LoadPoint) {
        build_lattice(&GridSpec::new(2, 2, 7), &Spacing::uniform(0.3)).unwrap()
    }

    #[test]
    fn tutorial_beam_counts() {
        let (lattice, boundary, load) = beam();
        assert_eq!(lattice.len(), 72);
        assert_eq!(lattice.dims(), (3, 8, 3));
        assert_eq!(boundary.len(), 9);

        let load = &lattice[load];
        assert_eq!(
            load.coord,
            GridCoord {
                level: 2,
                line: 7,
                column: 2
            }
        );
        // line -> X, level -> Y, column -> Z
        assert_relative_eq!(load.x, 2.1, epsilon = 1e-12);
        assert_relative_eq!(load.y, 0.6, epsilon = 1e-12);
        assert_relative_eq!(load.z, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn point_count_matches_grid() {
        for (cx, cy, cz) in [(1, 1, 1), (3, 1, 2), (1, 4, 1), (2, 3, 5)] {
            let grid = GridSpec::new(cx, cy, cz);
            let (lattice, boundary, _) = build_lattice(&grid, &Spacing::uniform(1.0)).unwrap();
            assert_eq!(lattice.len(), (cx + 1) * (cy + 1) * (cz + 1));
            assert_eq!(lattice.len(), grid.num_points().unwrap());
            assert_eq!(boundary.len(), (cy + 1) * (cx + 1));
        }
    }

    #[test]
    fn positions_follow_axis_permutation() {
        let spacing = Spacing::new(0.5, 0.25, 2.0);
        let (lattice, _, _) = build_lattice(&GridSpec::new(3, 2, 4), &spacing).unwrap();
        for p in lattice.points() {
            assert_eq!(p.x, p.coord.line as f64 * spacing.dx);
            assert_eq!(p.y, p.coord.level as f64 * spacing.dy);
            assert_eq!(p.z, p.coord.column as f64 * spacing.dz);
        }
    }

    #[test]
    fn points_are_unique_and_indexable() {
        let (lattice, _, _) = build_lattice(&GridSpec::new(2, 3, 4), &Spacing::uniform(1.0)).unwrap();
        let coords: HashSet<GridCoord> = lattice.points().iter().map(|p| p.coord).collect();
        assert_eq!(coords.len(), lattice.len());

        for (i, p) in lattice.points().iter().enumerate() {
            assert_eq!(p.id, PointId(i));
            let c = p.coord;
            assert_eq!(lattice.id_at(c.level, c.line, c.column), Some(p.id));
        }
        assert_eq!(lattice.id_at(4, 0, 0), None);
        assert_eq!(lattice.id_at(0, 5, 0), None);
        assert_eq!(lattice.id_at(0, 0, 3), None);
    }

    #[test]
    fn boundary_is_exactly_the_first_line() {
        let (lattice, boundary, _) = build_lattice(&GridSpec::new(3, 2, 2), &Spacing::uniform(0.1)).unwrap();
        let anchored: HashSet<PointId> = boundary.iter().collect();
        for p in lattice.points() {
            assert_eq!(anchored.contains(&p.id), p.coord.line == 0);
        }
        let ids: Vec<PointId> = boundary.iter().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "boundary keeps traversal order");
    }

    #[test]
    fn load_point_is_last_in_traversal() {
        let grid = GridSpec::new(4, 1, 3);
        let (lattice, _, load) = build_lattice(&grid, &Spacing::uniform(1.0)).unwrap();
        assert_eq!(load, PointId(lattice.len() - 1));
        assert_eq!(
            lattice.id_at(grid.count_y, grid.count_z, grid.count_x),
            Some(load)
        );
    }

    #[test]
    fn building_twice_gives_equal_lattices() {
        let grid = GridSpec::new(2, 2, 3);
        let spacing = Spacing::new(0.3, 0.2, 0.1);
        assert_eq!(
            build_lattice(&grid, &spacing).unwrap(),
            build_lattice(&grid, &spacing).unwrap()
        );
    }

    #[test]
    fn zero_count_is_rejected() {
        for grid in [
            GridSpec::new(0, 2, 2),
            GridSpec::new(2, 0, 2),
            GridSpec::new(2, 2, 0),
        ] {
            let err = build_lattice(&grid, &Spacing::uniform(0.3)).unwrap_err();
            assert!(matches!(err, MeshError::InvalidArgument(_)));
        }
    }

    #[test]
    fn oversized_grid_is_rejected() {
        for grid in [
            GridSpec::new(usize::MAX, 1, 1),
            GridSpec::new(1, usize::MAX, 1),
            GridSpec::new(1, 1, usize::MAX),
            GridSpec::new(1 << 22, 1 << 22, 1 << 22),
            GridSpec::new(1 << 20, 1 << 20, 1 << 20),
        ] {
            assert!(matches!(grid.num_points(), Err(MeshError::InvalidArgument(_))));
            let err = build_lattice(&grid, &Spacing::uniform(0.3)).unwrap_err();
            assert!(matches!(err, MeshError::InvalidArgument(_)), "{grid:?}");
        }
    }

    #[test]
    fn default_beam_runs_along_x() {
        let grid = GridSpec::new(BEAM_CELLS_WIDTH, BEAM_CELLS_HEIGHT, BEAM_CELLS_LENGTH);
        let (lattice, _, load) = build_lattice(&grid, &Spacing::uniform(BLOCK_SIZE)).unwrap();
        let tip = &lattice[load];
        assert_relative_eq!(tip.x, BEAM_CELLS_LENGTH as f64 * BLOCK_SIZE, epsilon = 1e-12);
        assert_relative_eq!(tip.y, BEAM_CELLS_HEIGHT as f64 * BLOCK_SIZE, epsilon = 1e-12);
        assert_relative_eq!(tip.z, BEAM_CELLS_WIDTH as f64 * BLOCK_SIZE, epsilon = 1e-12);
    }

    #[test]
    fn bad_spacing_is_rejected() {
        for spacing in [
            Spacing::new(0.0, 1.0, 1.0),
            Spacing::new(1.0, -0.3, 1.0),
            Spacing::new(1.0, 1.0, f64::NAN),
            Spacing::new(f64::INFINITY, 1.0, 1.0),
        ] {
            let err = build_lattice(&GridSpec::new(1, 1, 1), &spacing).unwrap_err();
            assert!(matches!(err, MeshError::InvalidArgument(_)));
        }
    }

    #[test]
    fn hull_sides_of_corners_and_interior() {
        let (lattice, _, load) = build_lattice(&GridSpec::new(2, 2, 2), &Spacing::uniform(1.0)).unwrap();
        assert_eq!(
            lattice.hull_sides(lattice[PointId(0)].coord),
            hull::LINE_MIN | hull::LEVEL_MIN | hull::COLUMN_MIN
        );
        assert_eq!(
            lattice.hull_sides(lattice[load].coord),
            hull::LINE_MAX | hull::LEVEL_MAX | hull::COLUMN_MAX
        );
        let centre = lattice.id_at(1, 1, 1).unwrap();
        assert_eq!(lattice.hull_sides(lattice[centre].coord), 0);
    }
}
