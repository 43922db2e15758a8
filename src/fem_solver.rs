use crate::constants::*;
use crate::fem_model::{BoundaryCondition, Element, FemModel, Load};
use bevy::log::info;
use faer::{Col, Mat};
use std::error::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

// Solver for Static Analysis
pub struct StaticSolver<'a> {
    model: &'a FemModel,
    bcs: &'a [BoundaryCondition],
    loads: &'a [Load],
}

impl<'a> StaticSolver<'a> {
    /// Creates a new StaticSolver instance
    pub fn new(model: &'a FemModel, bcs: &'a [BoundaryCondition], loads: &'a [Load]) -> Self {
        StaticSolver { model, bcs, loads }
    }

    /// Solves the static problem K*d = P
    pub fn solve(&self) -> Result<Col<f64>, Box<dyn Error>> {
        let total_dofs = self.model.total_dofs();
        info!("Static Solver: Total DOFs = {}", total_dofs);

        #[cfg(not(target_arch = "wasm32"))]
        let start_time = Instant::now();

        // Assemble Global K
        info!("Static Solver: Assembling global stiffness matrix K...");
        let mut k_global = Mat::<f64>::zeros(total_dofs, total_dofs);
        for (elem_idx, element) in self.model.elements.iter().enumerate() {
            let dof_indices = self.model.get_element_dof_indices(elem_idx)?;
            let ke = self.calculate_element_linear_stiffness(element)?;
            Self::assemble_matrix(&mut k_global, &ke, &dof_indices)?;
        }
        let mut nnz = 0;
        for j in 0..k_global.ncols() {
            for i in 0..k_global.nrows() {
                if k_global[(i, j)].abs() > TOLERANCE {
                    nnz += 1;
                }
            }
        }
        info!(
            "Static Solver: Global K assembly complete ({} non-zeros)",
            nnz
        );

        // Assemble Applied Load Vector P
        let mut p_applied_global = Col::<f64>::zeros(total_dofs);
        for load in self.loads {
            let node_idx = self
                .model
                .get_node_index(load.node_id)
                .ok_or(format!("Load node ID {} not found", load.node_id))?;
            let global_dof_index = node_idx * self.model.num_dofs_per_node + load.dof_index;
            if load.dof_index >= self.model.num_dofs_per_node || global_dof_index >= total_dofs {
                return Err(format!(
                    "Load DOF index out of bounds: node {}, dof_idx {}, total {}",
                    load.node_id, load.dof_index, total_dofs
                )
                .into());
            }
            p_applied_global[global_dof_index] += load.value;
        }

        // Apply BCs
        let fixed_dofs = self.get_fixed_dof_indices()?;
        if fixed_dofs.is_empty() {
            return Err("No anchored DOFs: the structure is free to move".into());
        }
        info!(
            "Static Solver: Applying boundary conditions ({} fixed DOFs)...",
            fixed_dofs.len()
        );
        let (k_modified, p_modified) =
            Self::apply_bcs_direct_inplace(k_global, p_applied_global, &fixed_dofs);

        info!("Static Solver: Solving static system K*d = P using dense LU decomposition...");
        let d_global = solve_dense_lu(&k_modified, &p_modified);
        if (0..total_dofs).any(|i| !d_global[i].is_finite()) {
            return Err("Static solve produced non-finite displacements".into());
        }

        #[cfg(not(target_arch = "wasm32"))]
        info!(
            "Static Solver: Analysis complete. Time taken: {:.3} s",
            start_time.elapsed().as_secs_f32()
        );

        #[cfg(target_arch = "wasm32")]
        info!("Static Solver: Analysis complete.");

        Ok(d_global)
    }

    /// Stiffness of a linear (constant strain) tetrahedron: Ke = V * B^T * D * B
    fn calculate_element_linear_stiffness(&self, element: &Element) -> Result<Mat<f64>, String> {
        let coords = self.model.get_element_coords(element)?;
        let d = calculate_elastic_material_matrix(
            element.material.youngs_modulus,
            element.material.poissons_ratio,
        );
        let (b, volume) = calculate_b_matrix_tet4(&coords)?;
        Ok(b.transpose() * &d * &b * volume)
    }

    /// Assembles a dense element matrix into the global matrix
    fn assemble_matrix(
        global_mat: &mut Mat<f64>,
        element_mat: &Mat<f64>,
        dof_indices: &[usize],
    ) -> Result<(), String> {
        let element_dofs = element_mat.nrows();
        if element_mat.ncols() != element_dofs || dof_indices.len() != element_dofs {
            return Err("Dimension mismatch during assembly".to_string());
        }
        for i_local in 0..element_dofs {
            for j_local in 0..element_dofs {
                let value = element_mat[(i_local, j_local)];
                if value.abs() > TOLERANCE {
                    global_mat[(dof_indices[i_local], dof_indices[j_local])] += value;
                }
            }
        }
        Ok(())
    }

    /// Gets a sorted list of global DOF indices that are fixed by BCs
    fn get_fixed_dof_indices(&self) -> Result<Vec<usize>, String> {
        let mut fixed_dofs = Vec::with_capacity(self.bcs.len());
        for bc in self.bcs {
            let node_idx = self
                .model
                .get_node_index(bc.node_id)
                .ok_or(format!("BC node ID {} not found", bc.node_id))?;
            if bc.dof_index >= self.model.num_dofs_per_node {
                return Err(format!(
                    "BC DOF index out of bounds: node {}, dof_idx {}",
                    bc.node_id, bc.dof_index
                ));
            }
            fixed_dofs.push(node_idx * self.model.num_dofs_per_node + bc.dof_index);
        }
        fixed_dofs.sort_unstable();
        fixed_dofs.dedup();
        Ok(fixed_dofs)
    }

    /// Zeroes the rows and columns of fixed DOFs and puts 1 on their diagonal.
    fn apply_bcs_direct_inplace(
        mut k_global: Mat<f64>,
        mut p_global: Col<f64>,
        fixed_dofs: &[usize],
    ) -> (Mat<f64>, Col<f64>) {
        let total_dofs = k_global.nrows();
        for &idx in fixed_dofs {
            for j in 0..total_dofs {
                k_global[(idx, j)] = 0.0;
                k_global[(j, idx)] = 0.0;
            }
            k_global[(idx, idx)] = 1.0;
            p_global[idx] = 0.0;
        }
        (k_global, p_global)
    }
}

/// Displacement `(ux, uy, uz)` of a node, looked up by ID.
pub fn node_displacement(
    model: &FemModel,
    displacement: &Col<f64>,
    node_id: usize,
) -> Option<(f64, f64, f64)> {
    let start = model.get_node_index(node_id)? * model.num_dofs_per_node;
    if start + 2 >= displacement.nrows() {
        return None;
    }
    Some((
        displacement[start],
        displacement[start + 1],
        displacement[start + 2],
    ))
}

/// Equivalent von Mises strain of every element for a solved displacement.
pub fn element_von_mises_strains(
    model: &FemModel,
    displacement: &Col<f64>,
) -> Result<Vec<f64>, String> {
    let mut strains = Vec::with_capacity(model.elements.len());
    for (elem_idx, element) in model.elements.iter().enumerate() {
        let coords = model.get_element_coords(element)?;
        let dof_indices = model.get_element_dof_indices(elem_idx)?;
        let (b, _) = calculate_b_matrix_tet4(&coords)?;
        let mut u_e = Mat::<f64>::zeros(ELEMENT_DOFS_TET4, 1);
        for (local, &global) in dof_indices.iter().enumerate() {
            if global >= displacement.nrows() {
                return Err(format!("DOF {} outside displacement vector", global));
            }
            u_e[(local, 0)] = displacement[global];
        }
        let strain = &b * &u_e;
        strains.push(von_mises_strain(&[
            strain[(0, 0)],
            strain[(1, 0)],
            strain[(2, 0)],
            strain[(3, 0)],
            strain[(4, 0)],
            strain[(5, 0)],
        ]));
    }
    Ok(strains)
}

// --- Helper Functions ---

/// Partial pivoting LU solve of a dense system
fn solve_dense_lu(k: &Mat<f64>, p: &Col<f64>) -> Col<f64> {
    let total_dofs = k.nrows();
    let mut row_perm_fwd = vec![0usize; total_dofs];
    let mut row_perm_bwd = vec![0usize; total_dofs];
    let mut lu_matrix = k.clone();

    let mut mem_buffer = faer::dyn_stack::MemBuffer::new(
        faer::linalg::lu::partial_pivoting::factor::lu_in_place_scratch::<usize, f64>(
            total_dofs,
            total_dofs,
            faer::Par::Seq,
            Default::default(),
        ),
    );
    let mut stack = faer::dyn_stack::MemStack::new(&mut mem_buffer);
    let (_, row_perm) = faer::linalg::lu::partial_pivoting::factor::lu_in_place(
        lu_matrix.as_mut(),
        &mut row_perm_fwd,
        &mut row_perm_bwd,
        faer::Par::Seq,
        &mut stack,
        Default::default(),
    );

    let mut rhs = Mat::<f64>::zeros(total_dofs, 1);
    for i in 0..total_dofs {
        rhs[(i, 0)] = p[i];
    }
    let mut solve_mem_buffer = faer::dyn_stack::MemBuffer::new(
        faer::linalg::lu::partial_pivoting::solve::solve_in_place_scratch::<usize, f64>(
            total_dofs,
            rhs.ncols(),
            faer::Par::Seq,
        ),
    );
    let mut solve_stack = faer::dyn_stack::MemStack::new(&mut solve_mem_buffer);
    faer::linalg::lu::partial_pivoting::solve::solve_in_place_with_conj(
        lu_matrix.as_ref(),
        lu_matrix.as_ref(),
        row_perm,
        faer::Conj::No,
        rhs.as_mut(),
        faer::Par::Seq,
        &mut solve_stack,
    );

    let mut d_global = Col::<f64>::zeros(total_dofs);
    for i in 0..total_dofs {
        d_global[i] = rhs[(i, 0)];
    }
    d_global
}

/// Isotropic linear elastic D matrix, Voigt order [xx, yy, zz, xy, yz, zx]
/// with engineering shear strains.
fn calculate_elastic_material_matrix(e: f64, nu: f64) -> Mat<f64> {
    let mut d_mat = Mat::<f64>::zeros(6, 6);
    let c = e / ((1.0 + nu) * (1.0 - 2.0 * nu));
    for i in 0..3 {
        for j in 0..3 {
            d_mat[(i, j)] = if i == j { c * (1.0 - nu) } else { c * nu };
        }
    }
    let g = e / (2.0 * (1.0 + nu));
    for i in 3..6 {
        d_mat[(i, i)] = g;
    }
    d_mat
}

/// Strain-displacement matrix (6x12) and volume of a linear tetrahedron.
///
/// With `J = [p1-p0 | p2-p0 | p3-p0]`, the gradients of shape functions 1..3
/// are the rows of `J^-1` and shape function 0 takes minus their sum.
fn calculate_b_matrix_tet4(
    coords: &[(f64, f64, f64); NUM_NODES_TET4],
) -> Result<(Mat<f64>, f64), String> {
    let (x0, y0, z0) = coords[0];
    let e = [1, 2, 3].map(|k| {
        let (x, y, z) = coords[k];
        (x - x0, y - y0, z - z0)
    });
    // J[r][c] = component r of edge c
    let (a, b, c) = (e[0].0, e[1].0, e[2].0);
    let (d, f, g) = (e[0].1, e[1].1, e[2].1);
    let (h, i, j) = (e[0].2, e[1].2, e[2].2);

    let det = a * (f * j - g * i) - b * (d * j - g * h) + c * (d * i - f * h);
    let scale = e
        .iter()
        .map(|&(ex, ey, ez)| (ex * ex + ey * ey + ez * ez).sqrt())
        .fold(0.0f64, f64::max);
    if det.abs() <= TOLERANCE * scale.powi(3) {
        return Err("B Matrix: degenerate tetrahedron (zero Jacobian determinant)".to_string());
    }

    let inv = [
        [(f * j - g * i) / det, (c * i - b * j) / det, (b * g - c * f) / det],
        [(g * h - d * j) / det, (a * j - c * h) / det, (c * d - a * g) / det],
        [(d * i - f * h) / det, (b * h - a * i) / det, (a * f - b * d) / det],
    ];
    let mut grads = [[0.0; 3]; NUM_NODES_TET4];
    for k in 0..3 {
        grads[k + 1] = inv[k];
        for axis in 0..3 {
            grads[0][axis] -= inv[k][axis];
        }
    }

    let mut b_matrix = Mat::<f64>::zeros(6, ELEMENT_DOFS_TET4);
    for (node, &[bx, by, bz]) in grads.iter().enumerate() {
        let col = node * NUM_DOFS_SOLID;
        b_matrix[(0, col)] = bx; // exx <- ux
        b_matrix[(1, col + 1)] = by; // eyy <- uy
        b_matrix[(2, col + 2)] = bz; // ezz <- uz
        b_matrix[(3, col)] = by; // gxy
        b_matrix[(3, col + 1)] = bx;
        b_matrix[(4, col + 1)] = bz; // gyz
        b_matrix[(4, col + 2)] = by;
        b_matrix[(5, col)] = bz; // gzx
        b_matrix[(5, col + 2)] = bx;
    }
    Ok((b_matrix, det.abs() / 6.0))
}

/// Equivalent strain sqrt(2/3 e':e') from Voigt strains with engineering shear.
fn von_mises_strain(strain: &[f64; 6]) -> f64 {
    let [exx, eyy, ezz, gxy, gyz, gzx] = *strain;
    let mean = (exx + eyy + ezz) / 3.0;
    let (dxx, dyy, dzz) = (exx - mean, eyy - mean, ezz - mean);
    let shear = (gxy * gxy + gyz * gyz + gzx * gzx) / 4.0;
    (2.0 / 3.0 * (dxx * dxx + dyy * dyy + dzz * dzz + 2.0 * shear)).sqrt()
}
