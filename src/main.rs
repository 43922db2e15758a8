use bevy::{
    log::{error, info},
    prelude::*,
    render::{
        mesh::{Indices, VertexAttributeValues},
        render_asset::RenderAssetUsages,
        render_resource::PrimitiveTopology,
    },
    window::{PresentMode, Window},
};
use bevy_egui::{egui, EguiContexts, EguiPlugin};
use bevy_panorbit_camera::{PanOrbitCamera, PanOrbitCameraPlugin};
use faer::Col;

mod constants;
mod convergence;
mod error;
mod fem_model;
mod fem_solver;
mod lattice;
mod tetra;

use constants::*;
use fem_model::{build_beam_model, BeamModel, Material, PointLoad};
use fem_solver::{element_von_mises_strains, node_displacement, StaticSolver};
use lattice::{GridSpec, Spacing};
use tetra::{surface_faces, CellPattern};

// Bevy Application Code
#[derive(Debug, Clone)]
struct VisTriangle {
    positions: [Vec3; 3],
    normal: Vec3,
    strain: f32,
}
#[derive(Resource)]
struct FemResult {
    displacement: Col<f64>,
    beam: BeamModel,
    strains: Vec<f64>,
    tip_displacement: (f64, f64, f64),
    max_strain: f32,
}

/// Marks the beam meshes so they can be replaced without touching the wall
#[derive(Component)]
struct BeamMesh;

/// Resource to store the simulation configuration parameters
#[derive(Resource)]
struct SimulationConfig {
    // Grid parameters
    cells_x: usize,
    cells_y: usize,
    cells_z: usize,
    spacing_x: f64,
    spacing_y: f64,
    spacing_z: f64,
    alternating_pattern: bool,

    // Material parameters
    youngs_modulus: f64,
    poissons_ratio: f64,
    density: f64,

    // Load parameters
    force_y: f64,
    load_mass: f64,
    gravity: bool,

    // Visualization parameters
    deformation_scale: f32,
    show_original_mesh: bool,
    show_deformed_mesh: bool,

    // Simulation control
    run_simulation: bool,
    has_results: bool,
    last_error: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cells_x: BEAM_CELLS_WIDTH,
            cells_y: BEAM_CELLS_HEIGHT,
            cells_z: BEAM_CELLS_LENGTH,
            spacing_x: BLOCK_SIZE,
            spacing_y: BLOCK_SIZE,
            spacing_z: BLOCK_SIZE,
            alternating_pattern: false,
            youngs_modulus: YOUNG_MODULUS,
            poissons_ratio: POISSONS_RATIO,
            density: DENSITY,
            force_y: LOAD_FORCE_Y,
            load_mass: LOAD_MASS,
            gravity: false,
            deformation_scale: VIS_DEFORMATION_SCALE,
            show_original_mesh: true,
            show_deformed_mesh: true,
            run_simulation: true,
            has_results: false,
            last_error: None,
        }
    }
}

fn main() {
    // Check if we should run a convergence study
    #[cfg(not(target_arch = "wasm32"))]
    {
        let args: Vec<String> = std::env::args().collect();
        if args.len() > 1 && args[1] == "convergence" {
            info!("Running convergence study mode");
            match convergence::run_convergence_study() {
                Ok(_results) => {
                    info!("Convergence study completed successfully");
                    std::process::exit(0);
                }
                Err(e) => {
                    error!("Convergence study failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Tetrahedral Cantilever Beam".into(),
                present_mode: PresentMode::AutoVsync,
                ..Default::default()
            }),
            ..Default::default()
        }))
        .add_plugins(EguiPlugin)
        .add_plugins(PanOrbitCameraPlugin)
        .init_resource::<SimulationConfig>()
        .add_systems(Startup, setup_scene)
        .add_systems(Update, ui_system)
        .add_systems(Update, (run_fem_solver, setup_visualization).chain())
        .run();
}

/// Builds the beam, runs the static solver and inserts results as a Bevy resource
fn run_fem_solver(mut commands: Commands, mut sim_config: ResMut<SimulationConfig>) {
    if !sim_config.run_simulation {
        return;
    }
    sim_config.run_simulation = false;
    sim_config.has_results = false;
    sim_config.last_error = None;

    info!("Starting FEM Static Analysis");
    let grid = GridSpec::new(sim_config.cells_x, sim_config.cells_y, sim_config.cells_z);
    let spacing = Spacing::new(
        sim_config.spacing_x,
        sim_config.spacing_y,
        sim_config.spacing_z,
    );
    let pattern = if sim_config.alternating_pattern {
        CellPattern::Alternating
    } else {
        CellPattern::Uniform
    };
    let material = Material {
        youngs_modulus: sim_config.youngs_modulus,
        poissons_ratio: sim_config.poissons_ratio,
        density: sim_config.density,
    };
    let point_load = PointLoad {
        force: (0.0, sim_config.force_y, 0.0),
        mass: sim_config.load_mass,
    };

    let beam = match build_beam_model(
        &grid,
        &spacing,
        pattern,
        &material,
        &point_load,
        sim_config.gravity,
    ) {
        Ok(beam) => beam,
        Err(e) => {
            commands.remove_resource::<FemResult>();
            sim_config.last_error = Some(e.to_string());
            return;
        }
    };

    let solver = StaticSolver::new(&beam.fem_model, &beam.bcs, &beam.loads);
    let displacement = match solver.solve() {
        Ok(displacement) => displacement,
        Err(e) => {
            error!("FEM solver failed: {}", e);
            commands.remove_resource::<FemResult>();
            sim_config.last_error = Some(e.to_string());
            return;
        }
    };
    let strains = match element_von_mises_strains(&beam.fem_model, &displacement) {
        Ok(strains) => strains,
        Err(e) => {
            error!("Strain recovery failed: {}", e);
            commands.remove_resource::<FemResult>();
            sim_config.last_error = Some(e);
            return;
        }
    };

    let tip_displacement =
        node_displacement(&beam.fem_model, &displacement, beam.load_point.index())
            .unwrap_or_default();
    let max_strain = strains.iter().copied().fold(0.0f64, f64::max) as f32;
    info!("FEM Static Analysis Complete");
    info!(
        "FEM Result: Load point displacement = ({:.4e}, {:.4e}, {:.4e})",
        tip_displacement.0, tip_displacement.1, tip_displacement.2
    );
    info!("FEM Result: Max von Mises strain = {:.4e}", max_strain);

    commands.insert_resource(FemResult {
        displacement,
        beam,
        strains,
        tip_displacement,
        max_strain,
    });
}

/// Sets up the camera, light and the wall the beam is anchored to
fn setup_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let focus = Vec3::new(
        (BEAM_CELLS_LENGTH as f64 * BLOCK_SIZE) as f32 / 2.0,
        (BEAM_CELLS_HEIGHT as f64 * BLOCK_SIZE) as f32 / 2.0,
        (BEAM_CELLS_WIDTH as f64 * BLOCK_SIZE) as f32 / 2.0,
    );
    commands
        .spawn(Camera3dBundle {
            transform: Transform::from_xyz(3.0, 3.0, 3.0).looking_at(focus, Vec3::Y),
            ..Default::default()
        })
        .insert(PanOrbitCamera {
            focus,
            radius: Some(5.0),
            ..Default::default()
        });

    commands.spawn(PointLightBundle {
        point_light: PointLight {
            intensity: 2_000_000.0,
            shadows_enabled: true,
            range: 100.0,
            ..Default::default()
        },
        transform: Transform::from_xyz(4.0, 6.0, 4.0),
        ..Default::default()
    });

    // Fixed wall in the x = 0 plane, behind the anchored face
    commands.spawn(PbrBundle {
        mesh: meshes.add(Cuboid::new(WALL_THICKNESS, WALL_SIZE, WALL_SIZE)),
        material: materials.add(StandardMaterial {
            base_color: Color::srgb(0.45, 0.4, 0.35),
            perceptual_roughness: 0.9,
            ..Default::default()
        }),
        transform: Transform::from_xyz(-WALL_THICKNESS / 2.0, 0.0, 0.0),
        ..Default::default()
    });
}

/// Sets up Bevy visualization using static FEM results
fn setup_visualization(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    fem_result: Option<Res<FemResult>>,
    mut sim_config: ResMut<SimulationConfig>,
    beam_entities: Query<Entity, With<BeamMesh>>,
) {
    let Some(fem_result) = fem_result else {
        return;
    };
    if sim_config.has_results {
        return;
    }
    sim_config.has_results = true;

    for entity in beam_entities.iter() {
        commands.entity(entity).despawn();
    }

    info!("Setting up Bevy Visualization");
    let (original_triangles, deformed_triangles) = generate_visualization_mesh_data(
        &fem_result.beam,
        &fem_result.displacement,
        &fem_result.strains,
        sim_config.deformation_scale,
    );

    if sim_config.show_original_mesh {
        commands.spawn((
            PbrBundle {
                mesh: meshes.add(create_mesh(&original_triangles, None)),
                material: materials.add(StandardMaterial {
                    base_color: Color::srgb(0.7, 0.7, 0.7).with_alpha(0.3),
                    alpha_mode: AlphaMode::Blend,
                    perceptual_roughness: 0.8,
                    metallic: 0.1,
                    cull_mode: None,
                    ..Default::default()
                }),
                ..Default::default()
            },
            BeamMesh,
        ));
    }

    if sim_config.show_deformed_mesh {
        commands.spawn((
            PbrBundle {
                mesh: meshes.add(create_mesh(
                    &deformed_triangles,
                    Some(fem_result.max_strain),
                )),
                material: materials.add(StandardMaterial {
                    perceptual_roughness: 0.8,
                    metallic: 0.1,
                    cull_mode: None,
                    ..Default::default()
                }),
                ..Default::default()
            },
            BeamMesh,
        ));
    }

    info!("Bevy Visualization Setup Complete");
}

/// Helper function to create a flat shaded triangle mesh, optionally coloured by strain
fn create_mesh(triangles: &[VisTriangle], max_strain: Option<f32>) -> Mesh {
    let num_vertices = triangles.len() * 3;
    let mut positions: Vec<[f32; 3]> = Vec::with_capacity(num_vertices);
    let mut normals: Vec<[f32; 3]> = Vec::with_capacity(num_vertices);
    let mut colors: Vec<[f32; 4]> = Vec::with_capacity(num_vertices);
    let mut indices: Vec<u32> = Vec::with_capacity(num_vertices);

    let color_min = Color::srgb(0.0, 0.0, 1.0).to_linear();
    let color_max = Color::srgb(1.0, 0.0, 0.0).to_linear();
    let default_color = [0.7, 0.7, 0.7, 1.0];

    for triangle in triangles {
        let color = match max_strain {
            Some(max_strain) => {
                let t = (triangle.strain / max_strain.max(1e-12)).clamp(0.0, 1.0);
                [
                    color_min.red * (1.0 - t) + color_max.red * t,
                    color_min.green * (1.0 - t) + color_max.green * t,
                    color_min.blue * (1.0 - t) + color_max.blue * t,
                    1.0,
                ]
            }
            None => default_color,
        };
        let start_index = positions.len() as u32;
        for position in triangle.positions {
            positions.push(position.into());
            normals.push(triangle.normal.into());
            colors.push(color);
        }
        indices.extend_from_slice(&[start_index, start_index + 1, start_index + 2]);
    }

    let mut mesh = Mesh::new(
        PrimitiveTopology::TriangleList,
        RenderAssetUsages::RENDER_WORLD,
    );
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    mesh.insert_attribute(
        Mesh::ATTRIBUTE_COLOR,
        VertexAttributeValues::Float32x4(colors),
    );
    mesh.insert_indices(Indices::U32(indices));
    mesh
}

/// UI system that displays the egui controls
fn ui_system(
    mut contexts: EguiContexts,
    mut sim_config: ResMut<SimulationConfig>,
    fem_result: Option<Res<FemResult>>,
) {
    let Some(ctx) = contexts.try_ctx_mut() else {
        return;
    };

    egui::SidePanel::right("settings_panel")
        .default_width(300.0)
        .show(ctx, |ui| {
            ui.heading("Cantilever Beam Settings");
            ui.add_space(10.0);

            let mut vis_params_changed = false;

            ui.collapsing("Grid", |ui| {
                ui.add(egui::Slider::new(&mut sim_config.cells_z, 1..=30).text("Cells along beam"));
                ui.add(egui::Slider::new(&mut sim_config.cells_y, 1..=6).text("Cells in height"));
                ui.add(egui::Slider::new(&mut sim_config.cells_x, 1..=6).text("Cells in width"));
                ui.add(egui::Slider::new(&mut sim_config.spacing_x, 0.05..=1.0).text("Spacing X (m)"));
                ui.add(egui::Slider::new(&mut sim_config.spacing_y, 0.05..=1.0).text("Spacing Y (m)"));
                ui.add(egui::Slider::new(&mut sim_config.spacing_z, 0.05..=1.0).text("Spacing Z (m)"));
                ui.checkbox(&mut sim_config.alternating_pattern, "Alternate cell split (conforming)");
            });

            ui.collapsing("Material", |ui| {
                ui.add(
                    egui::Slider::new(&mut sim_config.youngs_modulus, 1e6..=300e9)
                        .text("Young's Modulus (Pa)")
                        .logarithmic(true),
                );
                ui.add(
                    egui::Slider::new(&mut sim_config.poissons_ratio, 0.0..=0.49)
                        .text("Poisson's Ratio"),
                );
                ui.add(
                    egui::Slider::new(&mut sim_config.density, 0.0..=8000.0)
                        .text("Density (kg/m^3)"),
                );
            });

            ui.collapsing("Load", |ui| {
                ui.add(
                    egui::Slider::new(&mut sim_config.force_y, -1.0e5..=1.0e5)
                        .text("Load Force Y (N)"),
                );
                ui.add(
                    egui::Slider::new(&mut sim_config.load_mass, 0.0..=1000.0)
                        .text("Load Mass (kg)"),
                );
                ui.checkbox(&mut sim_config.gravity, "Gravity");
            });

            ui.collapsing("Visualization", |ui| {
                vis_params_changed |= ui
                    .add(
                        egui::Slider::new(&mut sim_config.deformation_scale, 0.0..=20.0)
                            .text("Deformation Scale"),
                    )
                    .changed();
                vis_params_changed |= ui
                    .checkbox(&mut sim_config.show_original_mesh, "Show Original Mesh")
                    .changed();
                vis_params_changed |= ui
                    .checkbox(&mut sim_config.show_deformed_mesh, "Show Deformed Mesh")
                    .changed();
            });

            ui.add_space(20.0);

            // Visual-only changes re-render the existing results without solving again
            if vis_params_changed && fem_result.is_some() {
                sim_config.has_results = false;
                info!("Visualization parameters changed - scheduling visualization update");
            }

            if ui.button("Run Simulation").clicked() {
                sim_config.run_simulation = true;
                sim_config.has_results = false;
                info!("Run button clicked - Starting simulation");
            }

            if let Some(message) = &sim_config.last_error {
                ui.add_space(10.0);
                ui.colored_label(egui::Color32::RED, message);
            }

            if let Some(result) = fem_result {
                if sim_config.has_results {
                    let (ux, uy, uz) = result.tip_displacement;
                    ui.add_space(10.0);
                    ui.heading("Results");
                    ui.label(format!("Load Point Displacement: ({:.3e}, {:.3e}, {:.3e}) m", ux, uy, uz));
                    ui.label(format!("Max von Mises Strain: {:.4e}", result.max_strain));
                    ui.label(format!("Total Tetrahedra: {}", result.beam.tetrahedra.len()));
                    ui.label(format!("Total Nodes: {}", result.beam.lattice.len()));
                    ui.label(format!("Anchored Nodes: {}", result.beam.boundary.len()));
                    ui.label(format!("Total DOFs: {}", result.beam.fem_model.total_dofs()));
                }
            }
        });
}

/// Generates surface triangles for both the original and the deformed beam
fn generate_visualization_mesh_data(
    beam: &BeamModel,
    displacement: &Col<f64>,
    strains: &[f64],
    deformation_scale: f32,
) -> (Vec<VisTriangle>, Vec<VisTriangle>) {
    info!("Generating visualization mesh data (original and deformed)...");
    let lattice = &beam.lattice;
    let original: Vec<Vec3> = lattice
        .points()
        .iter()
        .map(|p| Vec3::new(p.x as f32, p.y as f32, p.z as f32))
        .collect();
    let deformed: Vec<Vec3> = lattice
        .points()
        .iter()
        .zip(&original)
        .map(|(p, &position)| {
            let (dx, dy, dz) =
                node_displacement(&beam.fem_model, displacement, p.id.index()).unwrap_or_default();
            position + Vec3::new(dx as f32, dy as f32, dz as f32) * deformation_scale
        })
        .collect();

    let faces = surface_faces(lattice, &beam.tetrahedra);
    let mut original_triangles = Vec::with_capacity(faces.len());
    let mut deformed_triangles = Vec::with_capacity(faces.len());
    for face in &faces {
        let strain = strains.get(face.element).copied().unwrap_or(0.0) as f32;
        let ids = face.points.map(|id| id.index());
        let opposite = face.opposite.index();
        original_triangles.push(oriented_triangle(&original, ids, opposite, 0.0));
        deformed_triangles.push(oriented_triangle(&deformed, ids, opposite, strain));
    }
    (original_triangles, deformed_triangles)
}

/// Triangle whose normal points away from the opposite vertex of its tetrahedron
fn oriented_triangle(positions: &[Vec3], ids: [usize; 3], opposite: usize, strain: f32) -> VisTriangle {
    let [a, mut b, mut c] = ids.map(|i| positions[i]);
    let mut normal = (b - a).cross(c - a);
    if normal.dot(positions[opposite] - a) > 0.0 {
        std::mem::swap(&mut b, &mut c);
        normal = -normal;
    }
    VisTriangle {
        positions: [a, b, c],
        normal: normal.normalize_or_zero(),
        strain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_once(app: &mut App) {
        app.world_mut().resource_mut::<SimulationConfig>().run_simulation = true;
        app.update();
    }

    fn solver_app() -> App {
        let mut app = App::new();
        app.init_resource::<SimulationConfig>();
        app.add_systems(Update, run_fem_solver);
        app
    }

    #[test]
    fn successful_run_stores_results() {
        let mut app = solver_app();
        run_once(&mut app);
        let result = app.world().resource::<FemResult>();
        assert_eq!(result.beam.tetrahedra.len(), 140);
        assert!(result.tip_displacement.1 < 0.0);
        assert!(app.world().resource::<SimulationConfig>().last_error.is_none());
    }

    #[test]
    fn failed_run_drops_previous_results() {
        let mut app = solver_app();
        run_once(&mut app);
        assert!(app.world().get_resource::<FemResult>().is_some());

        app.world_mut().resource_mut::<SimulationConfig>().cells_z = 0;
        run_once(&mut app);
        assert!(app.world().get_resource::<FemResult>().is_none());
        let config = app.world().resource::<SimulationConfig>();
        assert!(config.last_error.is_some());
        assert!(!config.has_results);
    }
}
