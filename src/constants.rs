// Beam configuration
pub const BEAM_CELLS_WIDTH: usize = 2; // Cells across the beam (grid count_x, world Z)
pub const BEAM_CELLS_HEIGHT: usize = 2; // Cells through the height (grid count_y, world Y)
pub const BEAM_CELLS_LENGTH: usize = 7; // Cells along the beam (grid count_z, world X)
pub const BLOCK_SIZE: f64 = 0.3; // Lattice spacing (m)
pub const YOUNG_MODULUS: f64 = 0.005e9; // Soft rubber-like solid (Pa)
pub const POISSONS_RATIO: f64 = 0.3;
pub const DENSITY: f64 = 1000.0; // kg/m^3
pub const LOAD_FORCE_Y: f64 = -10_000.0; // Force at the load point (N)
pub const LOAD_MASS: f64 = 100.0; // Mass lumped at the load point (kg)
pub const GRAVITY: f64 = 9.81; // m/s^2, acting along -Y

// Solid elements
pub const NUM_DOFS_SOLID: usize = 3; // ux, uy, uz
pub const NUM_NODES_TET4: usize = 4;
pub const ELEMENT_DOFS_TET4: usize = NUM_NODES_TET4 * NUM_DOFS_SOLID; // 12

// Visualization Configuration
pub const VIS_DEFORMATION_SCALE: f32 = 1.0;
pub const WALL_THICKNESS: f32 = 0.1;
pub const WALL_SIZE: f32 = 5.0;
pub const TOLERANCE: f64 = 1e-12; // Small number for floating point comparisons
