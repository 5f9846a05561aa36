use crate::geom::point::Point;
use crate::geom::surface::Surface;

/// What a cell is filled with: either a material leaf (a flat source
/// region) or another universe nested inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFill {
    /// Index into the geometry's material arena.
    Material(usize),
    /// Id of the universe (or lattice) filling this cell.
    Universe(u32),
}

/// A region bounded by signed surface half-spaces inside one universe.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Universe this cell belongs to.
    pub universe: u32,
    pub fill: CellFill,
    /// (half-space sign, surface arena index). Sign +1 keeps the
    /// positive side of the surface, -1 the negative side.
    pub surfaces: Vec<(i8, usize)>,
}

impl Cell {
    pub fn new(universe: u32, fill: CellFill) -> Self {
        Self {
            universe,
            fill,
            surfaces: Vec::new(),
        }
    }

    /// Adds a bounding half-space. Chainable during model construction.
    pub fn with_surface(mut self, halfspace: i8, surface: usize) -> Self {
        self.surfaces.push((halfspace, surface));
        self
    }

    /// True if `p` lies strictly inside every bounding half-space.
    pub fn contains(&self, p: &Point, surfaces: &[Surface]) -> bool {
        self.surfaces
            .iter()
            .all(|&(hs, si)| f64::from(hs) * surfaces[si].evaluate(p) > 0.0)
    }
}

/// A flat collection of cells sharing an integer id namespace slot.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    /// Indices into the geometry's cell arena, in insertion order.
    pub cells: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::surface::Surface;

    #[test]
    fn test_contains_box() {
        let surfaces = vec![
            Surface::x_plane(0.0),
            Surface::x_plane(2.0),
            Surface::y_plane(0.0),
            Surface::y_plane(1.0),
        ];
        let cell = Cell::new(0, CellFill::Material(0))
            .with_surface(1, 0)
            .with_surface(-1, 1)
            .with_surface(1, 2)
            .with_surface(-1, 3);
        assert!(cell.contains(&Point::new(1.0, 0.5), &surfaces));
        assert!(!cell.contains(&Point::new(3.0, 0.5), &surfaces));
        assert!(!cell.contains(&Point::new(1.0, -0.5), &surfaces));
    }

    #[test]
    fn test_contains_annulus() {
        let surfaces = vec![Surface::circle(0.0, 0.0, 1.0), Surface::circle(0.0, 0.0, 2.0)];
        let ring = Cell::new(0, CellFill::Material(0))
            .with_surface(1, 0)
            .with_surface(-1, 1);
        assert!(ring.contains(&Point::new(1.5, 0.0), &surfaces));
        assert!(!ring.contains(&Point::new(0.5, 0.0), &surfaces));
        assert!(!ring.contains(&Point::new(2.5, 0.0), &surfaces));
    }
}
