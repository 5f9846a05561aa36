pub mod cmfd;
pub mod error;
pub mod geom;
pub mod material;
pub mod solver;
pub mod track;
pub mod transient;

// Prelude
pub use cmfd::{Cmfd, CmfdConfig, CoarseMesh};
pub use error::{Result, SolverError};
pub use geom::{BoundaryType, Cell, CellFill, Geometry, Lattice, Point, Surface, Vector};
pub use material::Material;
pub use solver::{MocSolver, SolverConfig, SweepMode};
pub use track::TrackGenerator;
pub use transient::{KineticsData, TransientConfig, TransientMethod, TransientSolver};
