use crate::{
    constants::*,
    fem_model::{build_beam_model, Material, PointLoad},
    fem_solver::{node_displacement, StaticSolver},
    lattice::{GridSpec, Spacing},
    tetra::CellPattern,
};
use bevy::log::{error, info};
use plotters::prelude::*;
use plotters::style::Color;

// Struct to hold convergence study results
#[derive(Debug, Clone)]
pub struct ConvergenceStudyResults {
    pub element_counts: Vec<usize>,
    pub tip_deflections: Vec<f32>,
    /// Euler-Bernoulli tip deflection of the same beam, for reference
    pub euler_bernoulli: f32,
}

/// Cells along the beam for each refinement step
pub const LENGTH_CELL_COUNTS: [usize; 5] = [4, 7, 14, 21, 28];

/// Refine the beam along its length and record the load point deflection
#[cfg(not(target_arch = "wasm32"))]
pub fn run_convergence_study() -> Result<ConvergenceStudyResults, Box<dyn std::error::Error>> {
    info!("Starting Convergence Study");
    let results = compute_convergence(&LENGTH_CELL_COUNTS, CellPattern::Alternating);
    info!(
        "Convergence Study Complete: {} data points",
        results.element_counts.len()
    );
    create_convergence_plot(&results)?;
    Ok(results)
}

/// Solves the default beam once per entry of `length_cells`, keeping its
/// length and cross-section fixed. Failed refinements are logged and skipped.
pub fn compute_convergence(length_cells: &[usize], pattern: CellPattern) -> ConvergenceStudyResults {
    let material = Material {
        youngs_modulus: YOUNG_MODULUS,
        poissons_ratio: POISSONS_RATIO,
        density: DENSITY,
    };
    let point_load = PointLoad {
        force: (0.0, LOAD_FORCE_Y, 0.0),
        mass: LOAD_MASS,
    };
    let length = BEAM_CELLS_LENGTH as f64 * BLOCK_SIZE;

    let mut element_counts = Vec::new();
    let mut tip_deflections = Vec::new();

    for &count_z in length_cells {
        let grid = GridSpec::new(BEAM_CELLS_WIDTH, BEAM_CELLS_HEIGHT, count_z);
        let spacing = Spacing::new(length / count_z.max(1) as f64, BLOCK_SIZE, BLOCK_SIZE);
        info!(
            "Running convergence study with {} cells along the beam ({} elements)",
            count_z,
            5 * grid.num_cells()
        );

        let beam = match build_beam_model(&grid, &spacing, pattern, &material, &point_load, false) {
            Ok(beam) => beam,
            Err(e) => {
                error!("Failed to build beam for convergence study: {}", e);
                continue;
            }
        };

        let solver = StaticSolver::new(&beam.fem_model, &beam.bcs, &beam.loads);
        match solver.solve() {
            Ok(displacement) => {
                let Some((_, uy, _)) =
                    node_displacement(&beam.fem_model, &displacement, beam.load_point.index())
                else {
                    error!("Load point missing from solved model");
                    continue;
                };
                info!(
                    "Convergence Study: Elements = {}, Tip Deflection = {:.4e}",
                    beam.tetrahedra.len(),
                    uy
                );
                element_counts.push(beam.tetrahedra.len());
                tip_deflections.push(uy.abs() as f32);
            }
            Err(e) => {
                error!("FEM solver failed for convergence study: {}", e);
                continue;
            }
        }
    }

    ConvergenceStudyResults {
        element_counts,
        tip_deflections,
        euler_bernoulli: euler_bernoulli_tip_deflection(LOAD_FORCE_Y.abs(), length) as f32,
    }
}

/// P L^3 / (3 E I) for the default square cross-section
fn euler_bernoulli_tip_deflection(force: f64, length: f64) -> f64 {
    let width = BEAM_CELLS_WIDTH as f64 * BLOCK_SIZE;
    let height = BEAM_CELLS_HEIGHT as f64 * BLOCK_SIZE;
    let inertia = width * height.powi(3) / 12.0;
    force * length.powi(3) / (3.0 * YOUNG_MODULUS * inertia)
}

/// WASM stub for convergence study
#[cfg(target_arch = "wasm32")]
pub fn run_convergence_study() -> Result<ConvergenceStudyResults, Box<dyn std::error::Error>> {
    info!("Convergence study is not supported in WASM");
    Err("Convergence study is not supported in WASM".into())
}

/// Create a plot of the convergence study results using the plotters crate
#[cfg(not(target_arch = "wasm32"))]
fn create_convergence_plot(
    results: &ConvergenceStudyResults,
) -> Result<(), Box<dyn std::error::Error>> {
    if results.element_counts.is_empty() || results.tip_deflections.is_empty() {
        return Err("No data points to plot".into());
    }

    info!("Creating convergence study plots");
    std::fs::create_dir_all("output")?;

    create_plot_with_backend(
        results,
        BitMapBackend::new("output/convergence_study.png", (800, 600)),
    )?;
    create_plot_with_backend(
        results,
        SVGBackend::new("output/convergence_study.svg", (800, 600)),
    )?;

    info!(
        "Convergence study plots saved to output/convergence_study.png and output/convergence_study.svg"
    );
    Ok(())
}

/// Helper function to create a plot with a specific backend
#[cfg(not(target_arch = "wasm32"))]
fn create_plot_with_backend<DB: DrawingBackend>(
    results: &ConvergenceStudyResults,
    backend: DB,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB::ErrorType: 'static + std::error::Error,
{
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;

    let min_elements = *results.element_counts.iter().min().unwrap_or(&0) as f32;
    let max_elements = *results.element_counts.iter().max().unwrap_or(&1000) as f32;
    let max_disp = results
        .tip_deflections
        .iter()
        .copied()
        .fold(results.euler_bernoulli, f32::max);

    let x_padding = (max_elements - min_elements).max(1.0) * 0.1;
    let x_min = (min_elements - x_padding).floor();
    let x_max = (max_elements + x_padding).ceil();
    let y_max = max_disp.max(1e-9) * 1.1;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Convergence Study: Tip Deflection vs. Number of Tetrahedra",
            ("sans-serif", 22).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0f32..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Number of Tetrahedra")
        .y_desc("Tip Deflection (m)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let data_points: Vec<(f32, f32)> = results
        .element_counts
        .iter()
        .zip(results.tip_deflections.iter())
        .map(|(&elements, &deflection)| (elements as f32, deflection))
        .collect();

    chart
        .draw_series(LineSeries::new(data_points.clone(), &RED))?
        .label("Linear tetrahedra")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.stroke_width(3)));

    chart.draw_series(PointSeries::of_element(
        data_points,
        5,
        RED.filled(),
        &|c, s, st| EmptyElement::at(c) + Circle::new((0, 0), s, st),
    ))?;

    chart
        .draw_series(LineSeries::new(
            vec![(x_min, results.euler_bernoulli), (x_max, results.euler_bernoulli)],
            &BLUE,
        ))?
        .label("Euler-Bernoulli")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(3)));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present().map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refinement_softens_the_beam() {
        let results = compute_convergence(&[2, 4, 8], CellPattern::Alternating);
        assert_eq!(results.element_counts, vec![40, 80, 160]);
        assert_eq!(results.tip_deflections.len(), 3);
        assert!(
            results.tip_deflections[2] > results.tip_deflections[0],
            "{:?}",
            results.tip_deflections
        );
        assert!(results.tip_deflections.iter().all(|&d| d < 1.2 * results.euler_bernoulli));
    }

    #[test]
    fn invalid_refinement_is_skipped() {
        let results = compute_convergence(&[0, 4], CellPattern::Uniform);
        assert_eq!(results.element_counts, vec![80]);
    }
}
