use crate::lattice::{Lattice, PointId};
use bevy::log::{error, info};

/// `(level, line, column)` offsets of the 8 cell corners, in the order the
/// decomposition tables index them.
pub const CELL_CORNER_OFFSETS: [(usize, usize, usize); 8] = [
    (0, 0, 0),
    (0, 1, 0),
    (0, 0, 1),
    (0, 1, 1),
    (1, 0, 0),
    (1, 1, 0),
    (1, 0, 1),
    (1, 1, 1),
];

/// Five-tetrahedron split of a cell: four corner tetrahedra around
/// corners 0, 6, 5 and 3 plus the central tetrahedron `{1, 2, 4, 7}`.
pub const CELL_TETRAHEDRA: [[usize; 4]; 5] = [
    [4, 1, 2, 0],
    [1, 2, 4, 7],
    [6, 7, 4, 2],
    [1, 4, 5, 7],
    [1, 2, 3, 7],
];

/// Mirror image of [`CELL_TETRAHEDRA`]: corner tetrahedra around 1, 2, 4 and 7
/// plus the central tetrahedron `{0, 3, 5, 6}`.
pub const MIRRORED_CELL_TETRAHEDRA: [[usize; 4]; 5] = [
    [1, 0, 3, 5],
    [2, 0, 3, 6],
    [4, 0, 5, 6],
    [7, 3, 5, 6],
    [0, 3, 5, 6],
];

pub const TETRAHEDRA_PER_CELL: usize = 5;

/// How cells are split into tetrahedra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellPattern {
    /// [`CELL_TETRAHEDRA`] in every cell. Neighbouring cells do not agree on
    /// the diagonal of their shared face.
    #[default]
    Uniform,
    /// [`CELL_TETRAHEDRA`] on even cells and [`MIRRORED_CELL_TETRAHEDRA`] on odd
    /// ones (parity of `level + line + column`), giving a conforming mesh.
    Alternating,
}

impl CellPattern {
    pub fn table_for(self, level: usize, line: usize, column: usize) -> &'static [[usize; 4]; 5] {
        match self {
            CellPattern::Uniform => &CELL_TETRAHEDRA,
            CellPattern::Alternating if (level + line + column) % 2 == 1 => {
                &MIRRORED_CELL_TETRAHEDRA
            }
            CellPattern::Alternating => &CELL_TETRAHEDRA,
        }
    }

    /// Split of the cell at `(level, line, column)` under this pattern.
    pub fn decompose(
        self,
        corners: &[PointId; 8],
        level: usize,
        line: usize,
        column: usize,
    ) -> [Tetrahedron; 5] {
        match self {
            CellPattern::Uniform => decompose_cell(corners),
            CellPattern::Alternating => {
                decompose_cell_with(corners, self.table_for(level, line, column))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tetrahedron {
    pub points: [PointId; 4],
}

impl Tetrahedron {
    pub fn positions(&self, lattice: &Lattice) -> [(f64, f64, f64); 4] {
        self.points.map(|id| lattice[id].position())
    }

    /// Signed volume; negative when the vertices are in left-handed order.
    pub fn signed_volume(&self, lattice: &Lattice) -> f64 {
        signed_volume(&self.positions(lattice))
    }

    pub fn volume(&self, lattice: &Lattice) -> f64 {
        self.signed_volume(lattice).abs()
    }

    /// The four triangular faces, each paired with the vertex opposite to it.
    pub fn faces(&self) -> [([PointId; 3], PointId); 4] {
        let [a, b, c, d] = self.points;
        [([b, c, d], a), ([a, c, d], b), ([a, b, d], c), ([a, b, c], d)]
    }
}

/// Signed volume of the tetrahedron spanned by four positions.
pub fn signed_volume(p: &[(f64, f64, f64); 4]) -> f64 {
    let e1 = (p[1].0 - p[0].0, p[1].1 - p[0].1, p[1].2 - p[0].2);
    let e2 = (p[2].0 - p[0].0, p[2].1 - p[0].1, p[2].2 - p[0].2);
    let e3 = (p[3].0 - p[0].0, p[3].1 - p[0].1, p[3].2 - p[0].2);
    let cross = (
        e1.1 * e2.2 - e1.2 * e2.1,
        e1.2 * e2.0 - e1.0 * e2.2,
        e1.0 * e2.1 - e1.1 * e2.0,
    );
    (cross.0 * e3.0 + cross.1 * e3.1 + cross.2 * e3.2) / 6.0
}

/// Splits a cell into 5 tetrahedra using [`CELL_TETRAHEDRA`].
///
/// `corners` must follow [`CELL_CORNER_OFFSETS`].
pub fn decompose_cell(corners: &[PointId; 8]) -> [Tetrahedron; 5] {
    decompose_cell_with(corners, &CELL_TETRAHEDRA)
}

pub fn decompose_cell_with(corners: &[PointId; 8], table: &[[usize; 4]; 5]) -> [Tetrahedron; 5] {
    table.map(|row| Tetrahedron {
        points: row.map(|corner| corners[corner]),
    })
}

/// Corners of the cell whose lowest point is `(level, line, column)`, or
/// `None` if the cell does not fit inside the lattice.
pub fn cell_corners(
    lattice: &Lattice,
    level: usize,
    line: usize,
    column: usize,
) -> Option<[PointId; 8]> {
    let mut corners = [PointId(0); 8];
    for (corner, &(dl, dc, dr)) in corners.iter_mut().zip(CELL_CORNER_OFFSETS.iter()) {
        *corner = lattice.id_at(level + dl, line + dc, column + dr)?;
    }
    Some(corners)
}

/// Tetrahedra covering the whole lattice with the uniform split.
pub fn assemble_mesh(lattice: &Lattice) -> Vec<Tetrahedron> {
    assemble_mesh_with(lattice, CellPattern::Uniform)
}

/// Tetrahedra covering the whole lattice, `5 * cells` of them, in cell
/// traversal order (level, then line, then column).
pub fn assemble_mesh_with(lattice: &Lattice, pattern: CellPattern) -> Vec<Tetrahedron> {
    let (levels, lines, columns) = lattice.dims();
    let cells = levels.saturating_sub(1) * lines.saturating_sub(1) * columns.saturating_sub(1);
    let mut tetrahedra = Vec::with_capacity(cells * TETRAHEDRA_PER_CELL);

    for level in 0..levels.saturating_sub(1) {
        for line in 0..lines.saturating_sub(1) {
            for column in 0..columns.saturating_sub(1) {
                let Some(corners) = cell_corners(lattice, level, line, column) else {
                    error!(
                        "Cell ({}, {}, {}) has corners outside the lattice",
                        level, line, column
                    );
                    continue;
                };
                tetrahedra.extend(pattern.decompose(&corners, level, line, column));
            }
        }
    }
    info!(
        "Assembled {} tetrahedra from {} cells ({:?} pattern)",
        tetrahedra.len(),
        cells,
        pattern
    );
    tetrahedra
}

/// A tetrahedron face lying on the lattice hull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFace {
    pub points: [PointId; 3],
    /// Remaining vertex of the owning tetrahedron, on the inner side of the face.
    pub opposite: PointId,
    /// Index of the owning tetrahedron.
    pub element: usize,
}

/// Faces of `tetrahedra` whose three vertices share a side of the lattice hull.
pub fn surface_faces(lattice: &Lattice, tetrahedra: &[Tetrahedron]) -> Vec<SurfaceFace> {
    let mut faces = Vec::new();
    for (element, tet) in tetrahedra.iter().enumerate() {
        for (points, opposite) in tet.faces() {
            let shared = points
                .iter()
                .fold(u8::MAX, |mask, &id| mask & lattice.hull_sides(lattice[id].coord));
            if shared != 0 {
                faces.push(SurfaceFace {
                    points,
                    opposite,
                    element,
                });
            }
        }
    }
    faces
}
