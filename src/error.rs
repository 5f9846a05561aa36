use thiserror::Error;

/// Top-level error type for the moc2d solver core.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Material(#[from] MaterialError),

    #[error(transparent)]
    TrackGeneration(#[from] TrackGenerationError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    LinearSolve(#[from] LinearSolveError),

    #[error(transparent)]
    TransientStep(#[from] TransientStepError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while resolving points against the CSG model or while
/// building the flat source region partition.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("point ({x}, {y}) is not covered by any cell")]
    Gap { x: f64, y: f64 },

    #[error("point ({x}, {y}) is covered by more than one cell")]
    Overlap { x: f64, y: f64 },

    #[error("flat source regions have not been initialized")]
    NotInitialized,

    #[error("geometry is immutable after flat source region initialization")]
    AlreadyInitialized,

    #[error("universe {0} is referenced but was never added")]
    UnknownUniverse(u32),

    #[error("material {0} is referenced but was never added")]
    UnknownMaterial(u32),

    #[error("material {0} was added twice")]
    DuplicateMaterial(u32),

    #[error("universe nesting exceeds {0} levels (circular fill?)")]
    NestingTooDeep(usize),

    #[error("root universe does not define a closed bounding box ({0})")]
    Unbounded(&'static str),
}

/// Errors in multigroup cross-section data.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("material {id}: expected {expected} values for {field}, got {got}")]
    GroupMismatch {
        id: u32,
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("material {id}: {field} is required for total-xs conservation")]
    MissingData { id: u32, field: &'static str },
}

/// Errors raised during characteristic track layout and segmentation.
#[derive(Debug, Error)]
pub enum TrackGenerationError {
    #[error("azimuthal angle count must be a positive multiple of 4, got {0}")]
    InvalidAzimCount(usize),

    #[error("track spacing must be positive, got {0}")]
    InvalidSpacing(f64),

    #[error("polar angle count must be 1, 2 or 3, got {0}")]
    InvalidPolarCount(usize),

    #[error("track endpoint at ({x}, {y}) has no reflective partner")]
    UnpairedTrack { x: f64, y: f64 },

    #[error("track from ({x0}, {y0}) produced more than {limit} segments without closing")]
    UnterminatedTrack { x0: f64, y0: f64, limit: usize },

    #[error("segment lengths sum to {sum} but the chord length is {chord}")]
    ChordMismatch { sum: f64, chord: f64 },

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// The transport sweep failed to converge within its iteration budget.
#[derive(Debug, Error)]
#[error("source iteration did not converge: residual {residual:.3e} after {iterations} iterations")]
pub struct ConvergenceError {
    pub iterations: usize,
    pub residual: f64,
}

/// The coarse-mesh linear or eigenvalue solve failed.
#[derive(Debug, Error)]
pub enum LinearSolveError {
    #[error("SOR did not converge: residual {residual:.3e} after {iterations} iterations")]
    SorDiverged { iterations: usize, residual: f64 },

    #[error("power iteration did not converge after {iterations} iterations")]
    PowerIterationDiverged { iterations: usize },
}

/// A transient outer step failed; the step was rolled back.
#[derive(Debug, Error)]
pub enum TransientStepError {
    #[error("transient solver is in state {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("inner solve failed during transient step at t = {time} s")]
    Inner {
        time: f64,
        #[source]
        source: Box<SolverError>,
    },
}

/// Convenience type alias for results using [`SolverError`].
pub type Result<T> = std::result::Result<T, SolverError>;
