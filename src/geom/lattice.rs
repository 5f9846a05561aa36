use crate::geom::point::Point;

/// Regular rectangular grid of universes.
///
/// A lattice occupies the same id namespace as universes: a cell filled by
/// id `n` resolves to a lattice if one was registered under `n`. Cell
/// (0, 0) is the lower-left position; rows passed to [`Lattice::with_cells`]
/// are given top-to-bottom the way core maps are usually written down.
#[derive(Debug, Clone)]
pub struct Lattice {
    pub nx: usize,
    pub ny: usize,
    pub pitch_x: f64,
    pub pitch_y: f64,
    /// Lower-left corner of the lattice in its parent frame.
    pub x_min: f64,
    pub y_min: f64,
    /// Universe ids, row-major with iy = 0 at the bottom.
    universes: Vec<u32>,
}

impl Lattice {
    /// Creates an empty lattice centered on the origin of its parent frame.
    pub fn new(nx: usize, ny: usize, pitch_x: f64, pitch_y: f64) -> Self {
        Self {
            nx,
            ny,
            pitch_x,
            pitch_y,
            x_min: -(nx as f64) * pitch_x / 2.0,
            y_min: -(ny as f64) * pitch_y / 2.0,
            universes: vec![0; nx * ny],
        }
    }

    /// Moves the lower-left corner to `(x_min, y_min)`.
    pub fn with_origin(mut self, x_min: f64, y_min: f64) -> Self {
        self.x_min = x_min;
        self.y_min = y_min;
        self
    }

    /// Fills the grid from rows written top-to-bottom. Panics if the row
    /// shape does not match `nx` x `ny`; the map is part of the model source.
    pub fn with_cells(mut self, rows: &[Vec<u32>]) -> Self {
        assert_eq!(rows.len(), self.ny, "lattice row count");
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), self.nx, "lattice column count");
            let iy = self.ny - 1 - r;
            for (ix, &u) in row.iter().enumerate() {
                self.universes[iy * self.nx + ix] = u;
            }
        }
        self
    }

    pub fn universe_at(&self, ix: usize, iy: usize) -> u32 {
        self.universes[iy * self.nx + ix]
    }

    /// All universe ids referenced by the grid.
    pub fn universe_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.universes.iter().copied()
    }

    /// O(1) grid lookup by integer division. `None` if `p` is outside.
    pub fn index_of(&self, p: &Point) -> Option<(usize, usize)> {
        let fx = (p.x - self.x_min) / self.pitch_x;
        let fy = (p.y - self.y_min) / self.pitch_y;
        if fx < 0.0 || fy < 0.0 {
            return None;
        }
        let ix = fx as usize;
        let iy = fy as usize;
        if ix >= self.nx || iy >= self.ny {
            return None;
        }
        Some((ix, iy))
    }

    /// Center of grid cell (ix, iy) in the parent frame. Nested universes
    /// are modeled around their local origin, so point resolution
    /// translates by this center when descending.
    pub fn cell_center(&self, ix: usize, iy: usize) -> Point {
        Point::new(
            self.x_min + (ix as f64 + 0.5) * self.pitch_x,
            self.y_min + (iy as f64 + 0.5) * self.pitch_y,
        )
    }

    /// Cell bounds (x_lo, x_hi, y_lo, y_hi) in the parent frame.
    pub fn cell_bounds(&self, ix: usize, iy: usize) -> (f64, f64, f64, f64) {
        (
            self.x_min + ix as f64 * self.pitch_x,
            self.x_min + (ix + 1) as f64 * self.pitch_x,
            self.y_min + iy as f64 * self.pitch_y,
            self.y_min + (iy + 1) as f64 * self.pitch_y,
        )
    }
}
