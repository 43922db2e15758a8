use crate::constants::{ELEMENT_DOFS_TET4, GRAVITY, NUM_DOFS_SOLID, NUM_NODES_TET4, TOLERANCE};
use crate::error::{MeshError, MeshResult};
use crate::lattice::{build_lattice, BoundarySet, GridSpec, Lattice, LoadPoint, Spacing};
use crate::tetra::{assemble_mesh_with, CellPattern, Tetrahedron};
use bevy::log::{error, info};
use std::collections::HashMap;

// FEM Model Code (Structs)
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub youngs_modulus: f64,
    pub poissons_ratio: f64,
    pub density: f64,
}
#[derive(Debug, Clone)]
pub struct Element {
    pub id: usize,
    pub node_ids: [usize; NUM_NODES_TET4],
    pub material: Material,
}
#[derive(Debug, Clone)]
pub struct FemModel {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    pub num_dofs_per_node: usize,
    node_id_to_index: HashMap<usize, usize>,
}
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCondition {
    pub node_id: usize,
    pub dof_index: usize,
}
#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub node_id: usize,
    pub dof_index: usize,
    pub value: f64,
}

/// Force and point mass applied at the load point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLoad {
    pub force: (f64, f64, f64),
    pub mass: f64,
}

impl Material {
    pub fn validate(&self) -> MeshResult<()> {
        if !(self.youngs_modulus.is_finite() && self.youngs_modulus > 0.0) {
            return Err(MeshError::invalid_argument(format!(
                "Young's modulus must be positive, got {}",
                self.youngs_modulus
            )));
        }
        if !(0.0..0.5).contains(&self.poissons_ratio) {
            return Err(MeshError::invalid_argument(format!(
                "Poisson's ratio must lie in [0, 0.5), got {}",
                self.poissons_ratio
            )));
        }
        if !(self.density.is_finite() && self.density >= 0.0) {
            return Err(MeshError::invalid_argument(format!(
                "density must be non-negative, got {}",
                self.density
            )));
        }
        Ok(())
    }
}

impl PointLoad {
    pub fn validate(&self) -> MeshResult<()> {
        let (fx, fy, fz) = self.force;
        if !(fx.is_finite() && fy.is_finite() && fz.is_finite()) {
            return Err(MeshError::invalid_argument("load force must be finite"));
        }
        if !(self.mass.is_finite() && self.mass >= 0.0) {
            return Err(MeshError::invalid_argument(format!(
                "load mass must be non-negative, got {}",
                self.mass
            )));
        }
        Ok(())
    }
}

impl FemModel {
    /// Creates a new FemModel and populates the node ID to index map.
    pub fn new(nodes: Vec<Node>, elements: Vec<Element>, num_dofs_per_node: usize) -> Self {
        let node_id_to_index = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id, idx))
            .collect();
        FemModel {
            nodes,
            elements,
            num_dofs_per_node,
            node_id_to_index,
        }
    }
    /// Calculates the total number of degrees of freedom in the model
    #[inline]
    pub fn total_dofs(&self) -> usize {
        self.nodes.len() * self.num_dofs_per_node
    }
    /// Gets the index of a node in the `nodes` vector using its ID
    #[inline]
    pub fn get_node_index(&self, id: usize) -> Option<usize> {
        self.node_id_to_index.get(&id).copied()
    }
    /// Gets the global DOF indices for a given element index
    pub fn get_element_dof_indices(&self, elem_idx: usize) -> Result<Vec<usize>, String> {
        let element = self
            .elements
            .get(elem_idx)
            .ok_or_else(|| format!("Element index {} out of bounds", elem_idx))?;
        let mut indices = Vec::with_capacity(ELEMENT_DOFS_TET4);
        for node_id in &element.node_ids {
            let node_idx = self.get_node_index(*node_id).ok_or(format!(
                "Node ID {} not found for element {}",
                node_id, element.id
            ))?;
            let start_dof = node_idx * self.num_dofs_per_node;
            indices.extend(start_dof..start_dof + self.num_dofs_per_node);
        }
        Ok(indices)
    }
    /// Gets the global coordinates of the nodes belonging to an element
    pub fn get_element_coords(
        &self,
        element: &Element,
    ) -> Result<[(f64, f64, f64); NUM_NODES_TET4], String> {
        let mut coords = [(0.0, 0.0, 0.0); NUM_NODES_TET4];
        for (coord, node_id) in coords.iter_mut().zip(&element.node_ids) {
            let node_idx = self.get_node_index(*node_id).ok_or_else(|| {
                format!("Node ID {} not found for element {}", node_id, element.id)
            })?;
            let node = &self.nodes[node_idx];
            *coord = (node.x, node.y, node.z);
        }
        Ok(coords)
    }
}

/// Everything the solver and viewer need about one beam.
#[derive(Debug, Clone)]
pub struct BeamModel {
    pub lattice: Lattice,
    pub tetrahedra: Vec<Tetrahedron>,
    pub boundary: BoundarySet,
    pub load_point: LoadPoint,
    pub fem_model: FemModel,
    pub bcs: Vec<BoundaryCondition>,
    pub loads: Vec<Load>,
}

/// Builds the lattice, registers it as a tetrahedral FEM model, anchors the
/// `line == 0` face and applies `point_load` at the load point.
///
/// Failures are logged and handed back as [`MeshError`]; no partial model
/// escapes.
pub fn build_beam_model(
    grid: &GridSpec,
    spacing: &Spacing,
    pattern: CellPattern,
    material: &Material,
    point_load: &PointLoad,
    gravity: bool,
) -> MeshResult<BeamModel> {
    let result = assemble_beam(grid, spacing, pattern, material, point_load, gravity);
    if let Err(e) = &result {
        error!("Beam construction failed: {}", e);
    }
    result
}

fn assemble_beam(
    grid: &GridSpec,
    spacing: &Spacing,
    pattern: CellPattern,
    material: &Material,
    point_load: &PointLoad,
    gravity: bool,
) -> MeshResult<BeamModel> {
    material.validate()?;
    point_load.validate()?;
    let (lattice, boundary, load_point) = build_lattice(grid, spacing)?;
    let tetrahedra = assemble_mesh_with(&lattice, pattern);
    let min_volume = TOLERANCE * spacing.dx * spacing.dy * spacing.dz;
    let fem_model = register_mesh(&lattice, &tetrahedra, material, min_volume)?;
    let bcs = anchor_boundary(&fem_model, &boundary)?;
    let mut loads = apply_point_load(&fem_model, load_point, point_load, gravity)?;
    if gravity {
        loads.extend(self_weight_loads(&fem_model)?);
    }
    info!(
        "FEM Setup: {} anchored DOFs, {} nodal loads",
        bcs.len(),
        loads.len()
    );
    Ok(BeamModel {
        lattice,
        tetrahedra,
        boundary,
        load_point,
        fem_model,
        bcs,
        loads,
    })
}

/// Registers one node per lattice point and one element per tetrahedron.
pub fn register_mesh(
    lattice: &Lattice,
    tetrahedra: &[Tetrahedron],
    material: &Material,
    min_volume: f64,
) -> MeshResult<FemModel> {
    if lattice.is_empty() {
        return Err(MeshError::construction_failure("lattice has no points"));
    }
    let nodes: Vec<Node> = lattice
        .points()
        .iter()
        .map(|p| Node {
            id: p.id.index(),
            x: p.x,
            y: p.y,
            z: p.z,
        })
        .collect();

    let mut elements = Vec::with_capacity(tetrahedra.len());
    for (id, tet) in tetrahedra.iter().enumerate() {
        if tet.points.iter().any(|p| lattice.get(*p).is_none()) {
            return Err(MeshError::construction_failure(format!(
                "element {} references a point outside the lattice",
                id
            )));
        }
        let volume = tet.volume(lattice);
        if !(volume > min_volume) {
            return Err(MeshError::construction_failure(format!(
                "element {} is degenerate (volume {:.3e})",
                id, volume
            )));
        }
        elements.push(Element {
            id,
            node_ids: tet.points.map(|p| p.index()),
            material: *material,
        });
    }
    info!(
        "Registered {} FEM nodes and {} FEM elements",
        nodes.len(),
        elements.len()
    );
    Ok(FemModel::new(nodes, elements, NUM_DOFS_SOLID))
}

/// One fixed condition per DOF of every boundary point.
pub fn anchor_boundary(
    model: &FemModel,
    boundary: &BoundarySet,
) -> MeshResult<Vec<BoundaryCondition>> {
    if boundary.is_empty() {
        return Err(MeshError::construction_failure("no anchored points"));
    }
    let mut bcs = Vec::with_capacity(boundary.len() * model.num_dofs_per_node);
    for point in boundary.iter() {
        let node_id = point.index();
        if model.get_node_index(node_id).is_none() {
            return Err(MeshError::construction_failure(format!(
                "anchor node {} not found",
                node_id
            )));
        }
        bcs.extend((0..model.num_dofs_per_node).map(|dof_index| BoundaryCondition {
            node_id,
            dof_index,
        }));
    }
    Ok(bcs)
}

/// Nodal loads at the load point: the force components and, with gravity,
/// the weight of the point mass along -Y.
pub fn apply_point_load(
    model: &FemModel,
    load_point: LoadPoint,
    point_load: &PointLoad,
    gravity: bool,
) -> MeshResult<Vec<Load>> {
    let node_id = load_point.index();
    if model.get_node_index(node_id).is_none() {
        return Err(MeshError::construction_failure(format!(
            "load node {} not found",
            node_id
        )));
    }
    let (fx, fy, fz) = point_load.force;
    let weight = if gravity { point_load.mass * GRAVITY } else { 0.0 };
    let loads = [fx, fy - weight, fz]
        .into_iter()
        .enumerate()
        .filter(|(_, value)| *value != 0.0)
        .map(|(dof_index, value)| Load {
            node_id,
            dof_index,
            value,
        })
        .collect();
    Ok(loads)
}

/// Element weight lumped equally onto its four nodes, along -Y.
pub fn self_weight_loads(model: &FemModel) -> MeshResult<Vec<Load>> {
    let mut loads = Vec::new();
    for element in &model.elements {
        if element.material.density == 0.0 {
            continue;
        }
        let coords = model
            .get_element_coords(element)
            .map_err(MeshError::construction_failure)?;
        let volume = crate::tetra::signed_volume(&coords).abs();
        let nodal_weight = element.material.density * volume * GRAVITY / NUM_NODES_TET4 as f64;
        loads.extend(element.node_ids.iter().map(|&node_id| Load {
            node_id,
            dof_index: 1,
            value: -nodal_weight,
        }));
    }
    Ok(loads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DENSITY, LOAD_FORCE_Y, LOAD_MASS, POISSONS_RATIO, YOUNG_MODULUS};
    use crate::lattice::PointId;
    use approx::assert_relative_eq;

    fn material() -> Material {
        Material {
            youngs_modulus: YOUNG_MODULUS,
            poissons_ratio: POISSONS_RATIO,
            density: DENSITY,
        }
    }

    fn tutorial_load() -> PointLoad {
        PointLoad {
            force: (0.0, LOAD_FORCE_Y, 0.0),
            mass: LOAD_MASS,
        }
    }

    fn tutorial_beam(gravity: bool) -> BeamModel {
        build_beam_model(
            &GridSpec::new(2, 2, 7),
            &Spacing::uniform(0.3),
            CellPattern::Uniform,
            &material(),
            &tutorial_load(),
            gravity,
        )
        .unwrap()
    }

    #[test]
    fn tutorial_beam_registers_every_point_and_tetrahedron() {
        let beam = tutorial_beam(false);
        let model = &beam.fem_model;
        assert_eq!(model.nodes.len(), 72);
        assert_eq!(model.elements.len(), 140);
        assert_eq!(model.total_dofs(), 216);
        assert_eq!(beam.bcs.len(), 9 * NUM_DOFS_SOLID);
        for (idx, node) in model.nodes.iter().enumerate() {
            assert_eq!(model.get_node_index(node.id), Some(idx));
        }
    }

    #[test]
    fn point_load_without_gravity_is_the_bare_force() {
        let beam = tutorial_beam(false);
        assert_eq!(
            beam.loads,
            vec![Load {
                node_id: 71,
                dof_index: 1,
                value: LOAD_FORCE_Y
            }]
        );
    }

    #[test]
    fn gravity_adds_point_mass_and_self_weight() {
        let beam = tutorial_beam(true);
        assert_eq!(beam.loads[0].node_id, beam.load_point.index());
        assert_eq!(beam.loads[0].dof_index, 1);
        assert_relative_eq!(
            beam.loads[0].value,
            LOAD_FORCE_Y - LOAD_MASS * GRAVITY,
            epsilon = 1e-9
        );

        let beam_volume = 2.1 * 0.6 * 0.6;
        let total_y: f64 = beam.loads.iter().map(|l| l.value).sum();
        assert_relative_eq!(
            total_y,
            LOAD_FORCE_Y - LOAD_MASS * GRAVITY - DENSITY * beam_volume * GRAVITY,
            max_relative = 1e-9
        );
        assert!(beam.loads.iter().all(|l| l.dof_index == 1));
    }

    #[test]
    fn anchors_cover_all_dofs_of_the_wall_face() {
        let beam = tutorial_beam(false);
        for bc in &beam.bcs {
            assert_eq!(beam.lattice[PointId(bc.node_id)].coord.line, 0);
            assert!(bc.dof_index < NUM_DOFS_SOLID);
        }
    }

    #[test]
    fn element_dofs_follow_node_order() {
        let beam = tutorial_beam(false);
        let model = &beam.fem_model;
        let element = &model.elements[0];
        let dofs = model.get_element_dof_indices(0).unwrap();
        assert_eq!(dofs.len(), ELEMENT_DOFS_TET4);
        for (i, node_id) in element.node_ids.iter().enumerate() {
            let base = model.get_node_index(*node_id).unwrap() * NUM_DOFS_SOLID;
            assert_eq!(&dofs[i * 3..i * 3 + 3], &[base, base + 1, base + 2]);
        }
        assert!(model.get_element_dof_indices(140).is_err());
    }

    #[test]
    fn degenerate_element_is_a_construction_failure() {
        let (lattice, _, _) = build_lattice(&GridSpec::new(1, 1, 1), &Spacing::uniform(1.0)).unwrap();
        let flat = Tetrahedron {
            points: [PointId(0), PointId(1), PointId(2), PointId(3)],
        };
        let err = register_mesh(&lattice, &[flat], &material(), 1e-12).unwrap_err();
        assert!(matches!(err, MeshError::ConstructionFailure(_)));

        let stray = Tetrahedron {
            points: [PointId(0), PointId(1), PointId(2), PointId(99)],
        };
        let err = register_mesh(&lattice, &[stray], &material(), 1e-12).unwrap_err();
        assert!(matches!(err, MeshError::ConstructionFailure(_)));
    }

    #[test]
    fn empty_inputs_are_construction_failures() {
        let err = register_mesh(&Lattice::default(), &[], &material(), 1e-12).unwrap_err();
        assert!(matches!(err, MeshError::ConstructionFailure(_)));

        let beam = tutorial_beam(false);
        let err = anchor_boundary(&beam.fem_model, &BoundarySet::default()).unwrap_err();
        assert!(matches!(err, MeshError::ConstructionFailure(_)));
    }

    #[test]
    fn invalid_inputs_are_reported_before_construction() {
        let bad_grid = build_beam_model(
            &GridSpec::new(0, 2, 7),
            &Spacing::uniform(0.3),
            CellPattern::Uniform,
            &material(),
            &tutorial_load(),
            false,
        );
        assert!(matches!(bad_grid, Err(MeshError::InvalidArgument(_))));

        let soft = Material {
            youngs_modulus: 0.0,
            ..material()
        };
        let bad_material = build_beam_model(
            &GridSpec::new(2, 2, 7),
            &Spacing::uniform(0.3),
            CellPattern::Uniform,
            &soft,
            &tutorial_load(),
            false,
        );
        assert!(matches!(bad_material, Err(MeshError::InvalidArgument(_))));

        let negative_mass = PointLoad {
            mass: -1.0,
            ..tutorial_load()
        };
        assert!(negative_mass.validate().is_err());
    }
}
