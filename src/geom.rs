pub mod cell;
pub mod lattice;
pub mod point;
pub mod surface;

use std::collections::{BTreeMap, HashMap};

use crate::error::GeometryError;
use crate::material::Material;

pub use cell::{Cell, CellFill};
pub use lattice::Lattice;
pub use point::{Point, Vector};
pub use surface::{BoundaryType, Surface, SurfaceKind};

use cell::Universe;

/// Geometric precision
pub(crate) const EPS: f64 = 1e-10;

/// Universe nesting cap; deeper models are treated as circular fills.
const MAX_NESTING: usize = 32;

/// Axis-aligned bounding box of the root universe, with the boundary
/// behavior of each face. Face order: x_min, x_max, y_min, y_max.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub bc: [BoundaryType; 4],
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// Index structures built by [`Geometry::initialize_flat_source_regions`].
///
/// Flat source regions (FSRs) are identified by the unique containment path
/// of a point: at each lattice level the grid position contributes an offset,
/// at each plain universe the matched cell contributes an offset, and a
/// material leaf terminates the walk. Offsets are prefix sums of per-instance
/// FSR counts, so two points share an FSR id exactly when they share a path.
#[derive(Debug)]
struct FsrIndex {
    num_fsrs: usize,
    /// FSR id -> material arena index.
    fsr_materials: Vec<usize>,
    /// Plain universe id -> per-cell-position FSR offset.
    cell_offsets: HashMap<u32, Vec<usize>>,
    /// Lattice id -> per-grid-position (row-major) FSR offset.
    lattice_offsets: HashMap<u32, Vec<usize>>,
    bounds: Bounds,
}

/// Constructive solid geometry model: arenas of surfaces, cells, materials
/// plus universes and lattices addressed by integer id.
///
/// The model is mutable while it is being built and becomes immutable once
/// [`Geometry::initialize_flat_source_regions`] has run.
#[derive(Debug, Default)]
pub struct Geometry {
    surfaces: Vec<Surface>,
    cells: Vec<Cell>,
    universes: BTreeMap<u32, Universe>,
    lattices: BTreeMap<u32, Lattice>,
    materials: Vec<Material>,
    mat_index: HashMap<u32, usize>,
    root_universe: u32,
    fsr: Option<FsrIndex>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the universe the walk starts from. Defaults to 0.
    pub fn set_root_universe(&mut self, id: u32) -> Result<(), GeometryError> {
        self.check_mutable()?;
        self.root_universe = id;
        Ok(())
    }

    fn check_mutable(&self) -> Result<(), GeometryError> {
        if self.fsr.is_some() {
            Err(GeometryError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    /// Registers a material and returns its arena index for cell fills.
    pub fn add_material(&mut self, material: Material) -> Result<usize, GeometryError> {
        self.check_mutable()?;
        let id = material.id();
        if self.mat_index.contains_key(&id) {
            return Err(GeometryError::DuplicateMaterial(id));
        }
        let idx = self.materials.len();
        self.materials.push(material);
        self.mat_index.insert(id, idx);
        Ok(idx)
    }

    /// Registers a surface and returns its arena index.
    pub fn add_surface(&mut self, surface: Surface) -> Result<usize, GeometryError> {
        self.check_mutable()?;
        self.surfaces.push(surface);
        Ok(self.surfaces.len() - 1)
    }

    /// Registers a cell into the universe it names.
    pub fn add_cell(&mut self, cell: Cell) -> Result<usize, GeometryError> {
        self.check_mutable()?;
        if let CellFill::Material(m) = cell.fill {
            if m >= self.materials.len() {
                return Err(GeometryError::UnknownMaterial(m as u32));
            }
        }
        let universe = cell.universe;
        let idx = self.cells.len();
        self.cells.push(cell);
        self.universes.entry(universe).or_default().cells.push(idx);
        Ok(idx)
    }

    /// Registers a lattice under a universe id.
    pub fn add_lattice(&mut self, id: u32, lattice: Lattice) -> Result<(), GeometryError> {
        self.check_mutable()?;
        self.lattices.insert(id, lattice);
        Ok(())
    }

    /// Arena index of a previously added material, by material id.
    pub fn material_index(&self, id: u32) -> Result<usize, GeometryError> {
        self.mat_index
            .get(&id)
            .copied()
            .ok_or(GeometryError::UnknownMaterial(id))
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Walks the hierarchy to the material-filled leaf cell containing `p`.
    /// Usable before FSR initialization.
    pub fn find_cell(&self, p: &Point) -> Result<&Cell, GeometryError> {
        let mut u = self.root_universe;
        let mut local = *p;
        for _ in 0..MAX_NESTING {
            if let Some(lat) = self.lattices.get(&u) {
                let (ix, iy) = lat
                    .index_of(&local)
                    .ok_or(GeometryError::Gap { x: p.x, y: p.y })?;
                let c = lat.cell_center(ix, iy);
                local = Point::new(local.x - c.x, local.y - c.y);
                u = lat.universe_at(ix, iy);
            } else if let Some(uni) = self.universes.get(&u) {
                let ci = self.match_cell(uni, &local, p)?;
                match self.cells[ci].fill {
                    CellFill::Material(_) => return Ok(&self.cells[ci]),
                    CellFill::Universe(v) => u = v,
                }
            } else {
                return Err(GeometryError::UnknownUniverse(u));
            }
        }
        Err(GeometryError::NestingTooDeep(MAX_NESTING))
    }

    /// Position (within `uni.cells`) of the cell containing `local`.
    /// In debug builds the scan continues past the first match so that
    /// overlapping cells are reported instead of silently shadowed.
    fn match_cell(&self, uni: &Universe, local: &Point, p: &Point) -> Result<usize, GeometryError> {
        let mut found: Option<usize> = None;
        for &ci in &uni.cells {
            if self.cells[ci].contains(local, &self.surfaces) {
                if found.is_some() {
                    return Err(GeometryError::Overlap { x: p.x, y: p.y });
                }
                found = Some(ci);
                if !cfg!(debug_assertions) {
                    break;
                }
            }
        }
        found.ok_or(GeometryError::Gap { x: p.x, y: p.y })
    }

    /// Enumerates flat source regions and freezes the model.
    pub fn initialize_flat_source_regions(&mut self) -> Result<(), GeometryError> {
        self.check_mutable()?;
        let bounds = self.compute_bounds()?;

        let mut counts: HashMap<u32, usize> = HashMap::new();
        let num_fsrs = self.count_fsrs_of(self.root_universe, 0, &mut counts)?;

        let mut cell_offsets = HashMap::new();
        for (&id, uni) in &self.universes {
            let mut offsets = Vec::with_capacity(uni.cells.len());
            let mut acc = 0usize;
            for &ci in &uni.cells {
                offsets.push(acc);
                acc += match self.cells[ci].fill {
                    CellFill::Material(_) => 1,
                    CellFill::Universe(v) => *counts
                        .get(&v)
                        .ok_or(GeometryError::UnknownUniverse(v))?,
                };
            }
            cell_offsets.insert(id, offsets);
        }

        let mut lattice_offsets = HashMap::new();
        for (&id, lat) in &self.lattices {
            let mut offsets = Vec::with_capacity(lat.nx * lat.ny);
            let mut acc = 0usize;
            for u in lat.universe_ids() {
                offsets.push(acc);
                acc += *counts.get(&u).ok_or(GeometryError::UnknownUniverse(u))?;
            }
            lattice_offsets.insert(id, offsets);
        }

        let mut fsr_materials = Vec::with_capacity(num_fsrs);
        self.emit_materials(self.root_universe, 0, &mut fsr_materials)?;

        self.fsr = Some(FsrIndex {
            num_fsrs,
            fsr_materials,
            cell_offsets,
            lattice_offsets,
            bounds,
        });
        Ok(())
    }

    fn count_fsrs_of(
        &self,
        u: u32,
        depth: usize,
        memo: &mut HashMap<u32, usize>,
    ) -> Result<usize, GeometryError> {
        if let Some(&n) = memo.get(&u) {
            return Ok(n);
        }
        if depth > MAX_NESTING {
            return Err(GeometryError::NestingTooDeep(MAX_NESTING));
        }
        let n = if let Some(lat) = self.lattices.get(&u) {
            let ids: Vec<u32> = lat.universe_ids().collect();
            let mut sum = 0;
            for v in ids {
                sum += self.count_fsrs_of(v, depth + 1, memo)?;
            }
            sum
        } else if let Some(uni) = self.universes.get(&u) {
            let cells = uni.cells.clone();
            let mut sum = 0;
            for ci in cells {
                sum += match self.cells[ci].fill {
                    CellFill::Material(_) => 1,
                    CellFill::Universe(v) => self.count_fsrs_of(v, depth + 1, memo)?,
                };
            }
            sum
        } else {
            return Err(GeometryError::UnknownUniverse(u));
        };
        memo.insert(u, n);
        Ok(n)
    }

    /// Emits the material of every FSR in offset order (same traversal
    /// order as the offset prefix sums).
    fn emit_materials(
        &self,
        u: u32,
        depth: usize,
        out: &mut Vec<usize>,
    ) -> Result<(), GeometryError> {
        if depth > MAX_NESTING {
            return Err(GeometryError::NestingTooDeep(MAX_NESTING));
        }
        if let Some(lat) = self.lattices.get(&u) {
            let ids: Vec<u32> = lat.universe_ids().collect();
            for v in ids {
                self.emit_materials(v, depth + 1, out)?;
            }
        } else if let Some(uni) = self.universes.get(&u) {
            for &ci in &uni.cells {
                match self.cells[ci].fill {
                    CellFill::Material(m) => out.push(m),
                    CellFill::Universe(v) => self.emit_materials(v, depth + 1, out)?,
                }
            }
        } else {
            return Err(GeometryError::UnknownUniverse(u));
        }
        Ok(())
    }

    /// Derives the bounding box from the plane surfaces of the root cells.
    fn compute_bounds(&self) -> Result<Bounds, GeometryError> {
        let uni = self
            .universes
            .get(&self.root_universe)
            .ok_or(GeometryError::UnknownUniverse(self.root_universe))?;
        if self.lattices.contains_key(&self.root_universe) {
            return Err(GeometryError::Unbounded("root universe is a lattice"));
        }

        let mut x: Vec<(f64, BoundaryType)> = Vec::new();
        let mut y: Vec<(f64, BoundaryType)> = Vec::new();
        for &ci in &uni.cells {
            for &(_, si) in &self.cells[ci].surfaces {
                let s = &self.surfaces[si];
                match s.kind {
                    SurfaceKind::XPlane { x: v } => x.push((v, s.boundary)),
                    SurfaceKind::YPlane { y: v } => y.push((v, s.boundary)),
                    SurfaceKind::Circle { .. } => {}
                }
            }
        }
        let min = |v: &[(f64, BoundaryType)]| {
            v.iter()
                .cloned()
                .min_by(|a, b| a.0.total_cmp(&b.0))
        };
        let max = |v: &[(f64, BoundaryType)]| {
            v.iter()
                .cloned()
                .max_by(|a, b| a.0.total_cmp(&b.0))
        };
        let (x_min, bc_xmin) = min(&x).ok_or(GeometryError::Unbounded("no x planes"))?;
        let (x_max, bc_xmax) = max(&x).ok_or(GeometryError::Unbounded("no x planes"))?;
        let (y_min, bc_ymin) = min(&y).ok_or(GeometryError::Unbounded("no y planes"))?;
        let (y_max, bc_ymax) = max(&y).ok_or(GeometryError::Unbounded("no y planes"))?;
        if x_max - x_min < EPS || y_max - y_min < EPS {
            return Err(GeometryError::Unbounded("degenerate bounding box"));
        }
        Ok(Bounds {
            x_min,
            x_max,
            y_min,
            y_max,
            bc: [bc_xmin, bc_xmax, bc_ymin, bc_ymax],
        })
    }

    pub fn bounds(&self) -> Result<&Bounds, GeometryError> {
        self.fsr
            .as_ref()
            .map(|f| &f.bounds)
            .ok_or(GeometryError::NotInitialized)
    }

    pub fn num_fsrs(&self) -> Result<usize, GeometryError> {
        self.fsr
            .as_ref()
            .map(|f| f.num_fsrs)
            .ok_or(GeometryError::NotInitialized)
    }

    /// Material arena index backing an FSR.
    pub fn fsr_material_index(&self, fsr: usize) -> Result<usize, GeometryError> {
        self.fsr
            .as_ref()
            .map(|f| f.fsr_materials[fsr])
            .ok_or(GeometryError::NotInitialized)
    }

    pub fn fsr_material(&self, fsr: usize) -> Result<&Material, GeometryError> {
        Ok(&self.materials[self.fsr_material_index(fsr)?])
    }

    /// FSR id of the region containing `p`.
    pub fn fsr_at(&self, p: &Point) -> Result<usize, GeometryError> {
        Ok(self.resolve(p, None)?.0)
    }

    /// FSR at `p` plus the distance along `dir` to the nearest bounding
    /// surface of that region (cell surfaces, lattice walls).
    pub fn trace(&self, p: &Point, dir: &Vector) -> Result<(usize, f64), GeometryError> {
        let (fsr, _, dist) = self.resolve(p, Some(dir))?;
        Ok((fsr, dist))
    }

    fn resolve(
        &self,
        p: &Point,
        dir: Option<&Vector>,
    ) -> Result<(usize, usize, f64), GeometryError> {
        let idx = self.fsr.as_ref().ok_or(GeometryError::NotInitialized)?;
        let mut u = self.root_universe;
        let mut local = *p;
        let mut offset = 0usize;
        let mut min_dist = f64::INFINITY;

        for _ in 0..MAX_NESTING {
            if let Some(lat) = self.lattices.get(&u) {
                let (ix, iy) = lat
                    .index_of(&local)
                    .ok_or(GeometryError::Gap { x: p.x, y: p.y })?;
                offset += idx
                    .lattice_offsets
                    .get(&u)
                    .ok_or(GeometryError::UnknownUniverse(u))?[iy * lat.nx + ix];
                if let Some(d) = dir {
                    let (xlo, xhi, ylo, yhi) = lat.cell_bounds(ix, iy);
                    if d.dx > EPS {
                        min_dist = min_dist.min((xhi - local.x) / d.dx);
                    } else if d.dx < -EPS {
                        min_dist = min_dist.min((xlo - local.x) / d.dx);
                    }
                    if d.dy > EPS {
                        min_dist = min_dist.min((yhi - local.y) / d.dy);
                    } else if d.dy < -EPS {
                        min_dist = min_dist.min((ylo - local.y) / d.dy);
                    }
                }
                let c = lat.cell_center(ix, iy);
                local = Point::new(local.x - c.x, local.y - c.y);
                u = lat.universe_at(ix, iy);
            } else if let Some(uni) = self.universes.get(&u) {
                let ci = self.match_cell(uni, &local, p)?;
                let pos = uni
                    .cells
                    .iter()
                    .position(|&c| c == ci)
                    .ok_or(GeometryError::UnknownUniverse(u))?;
                offset += idx
                    .cell_offsets
                    .get(&u)
                    .ok_or(GeometryError::UnknownUniverse(u))?[pos];
                let cell = &self.cells[ci];
                if let Some(d) = dir {
                    for &(_, si) in &cell.surfaces {
                        if let Some(dd) = self.surfaces[si].distance(&local, d) {
                            min_dist = min_dist.min(dd);
                        }
                    }
                }
                match cell.fill {
                    CellFill::Material(m) => return Ok((offset, m, min_dist)),
                    CellFill::Universe(v) => u = v,
                }
            } else {
                return Err(GeometryError::UnknownUniverse(u));
            }
        }
        Err(GeometryError::NestingTooDeep(MAX_NESTING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;

    fn mat(id: u32) -> Material {
        Material::new(id, 1)
    }

    /// Two-region slab: [0, 2] x [0, 1] split by a plane at x = 1.
    fn slab() -> Geometry {
        let mut g = Geometry::new();
        let m0 = g.add_material(mat(1)).unwrap();
        let m1 = g.add_material(mat(2)).unwrap();
        let left = g
            .add_surface(Surface::x_plane(0.0).with_boundary(BoundaryType::Vacuum))
            .unwrap();
        let mid = g.add_surface(Surface::x_plane(1.0)).unwrap();
        let right = g
            .add_surface(Surface::x_plane(2.0).with_boundary(BoundaryType::Vacuum))
            .unwrap();
        let bottom = g.add_surface(Surface::y_plane(0.0)).unwrap();
        let top = g.add_surface(Surface::y_plane(1.0)).unwrap();

        g.add_cell(
            Cell::new(0, CellFill::Material(m0))
                .with_surface(1, left)
                .with_surface(-1, mid)
                .with_surface(1, bottom)
                .with_surface(-1, top),
        )
        .unwrap();
        g.add_cell(
            Cell::new(0, CellFill::Material(m1))
                .with_surface(1, mid)
                .with_surface(-1, right)
                .with_surface(1, bottom)
                .with_surface(-1, top),
        )
        .unwrap();
        g
    }

    #[test]
    fn test_slab_fsrs() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        assert_eq!(g.num_fsrs().unwrap(), 2);
        assert_eq!(g.fsr_at(&Point::new(0.5, 0.5)).unwrap(), 0);
        assert_eq!(g.fsr_at(&Point::new(1.5, 0.5)).unwrap(), 1);
    }

    #[test]
    fn test_fsr_materials() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        assert_eq!(g.fsr_material(0).unwrap().id(), 1);
        assert_eq!(g.fsr_material(1).unwrap().id(), 2);
    }

    #[test]
    fn test_gap_error() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        assert!(matches!(
            g.fsr_at(&Point::new(5.0, 0.5)),
            Err(GeometryError::Gap { .. })
        ));
    }

    #[test]
    fn test_immutable_after_init() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        assert!(matches!(
            g.add_surface(Surface::x_plane(9.0)),
            Err(GeometryError::AlreadyInitialized)
        ));
        assert!(matches!(
            g.add_material(mat(99)),
            Err(GeometryError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_bounds_and_boundaries() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        let b = g.bounds().unwrap();
        assert_eq!(b.width(), 2.0);
        assert_eq!(b.height(), 1.0);
        assert_eq!(b.bc[0], BoundaryType::Vacuum);
        assert_eq!(b.bc[2], BoundaryType::Reflective);
    }

    /// 2x2 lattice of one-material pin universes inside a root box.
    fn lattice_model() -> Geometry {
        let mut g = Geometry::new();
        let fuel = g.add_material(mat(1)).unwrap();
        let water = g.add_material(mat(2)).unwrap();

        // Pin universe 10: circle of fuel in water, 1 cm pitch frame.
        let circ = g.add_surface(Surface::circle(0.0, 0.0, 0.3)).unwrap();
        g.add_cell(Cell::new(10, CellFill::Material(fuel)).with_surface(-1, circ))
            .unwrap();
        g.add_cell(Cell::new(10, CellFill::Material(water)).with_surface(1, circ))
            .unwrap();

        // Lattice 20 fills the root cell.
        g.add_lattice(
            20,
            Lattice::new(2, 2, 1.0, 1.0).with_cells(&[vec![10, 10], vec![10, 10]]),
        )
        .unwrap();

        let left = g.add_surface(Surface::x_plane(-1.0)).unwrap();
        let right = g.add_surface(Surface::x_plane(1.0)).unwrap();
        let bottom = g.add_surface(Surface::y_plane(-1.0)).unwrap();
        let top = g.add_surface(Surface::y_plane(1.0)).unwrap();
        g.add_cell(
            Cell::new(0, CellFill::Universe(20))
                .with_surface(1, left)
                .with_surface(-1, right)
                .with_surface(1, bottom)
                .with_surface(-1, top),
        )
        .unwrap();
        g
    }

    #[test]
    fn test_lattice_fsr_enumeration() {
        let mut g = lattice_model();
        g.initialize_flat_source_regions().unwrap();
        // 4 lattice positions x 2 cells per pin universe.
        assert_eq!(g.num_fsrs().unwrap(), 8);

        // Fuel center of the lower-left pin is the first FSR of position 0.
        let f00 = g.fsr_at(&Point::new(-0.5, -0.5)).unwrap();
        let w00 = g.fsr_at(&Point::new(-0.1, -0.55)).unwrap();
        assert_eq!(f00, 0);
        assert_eq!(w00, 1);
        assert_eq!(g.fsr_material(f00).unwrap().id(), 1);
        assert_eq!(g.fsr_material(w00).unwrap().id(), 2);

        // Pins at distinct lattice positions get distinct FSR ids.
        let f10 = g.fsr_at(&Point::new(0.5, -0.5)).unwrap();
        let f01 = g.fsr_at(&Point::new(-0.5, 0.5)).unwrap();
        let f11 = g.fsr_at(&Point::new(0.5, 0.5)).unwrap();
        assert_eq!(f10, 2);
        assert_eq!(f01, 4);
        assert_eq!(f11, 6);
    }

    #[test]
    fn test_trace_distance_in_slab() {
        let mut g = slab();
        g.initialize_flat_source_regions().unwrap();
        let (fsr, d) = g
            .trace(&Point::new(0.25, 0.5), &Vector::from_angle(0.0))
            .unwrap();
        assert_eq!(fsr, 0);
        // Nearest surface along +x is the mid plane at x = 1.
        assert!((d - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_trace_distance_in_lattice() {
        let mut g = lattice_model();
        g.initialize_flat_source_regions().unwrap();
        // Water region of the lower-left pin, heading +x: the pin circle
        // (radius 0.3 centered at (-0.5, -0.5)) is 0.1 cm away.
        let (_, d) = g
            .trace(&Point::new(-0.9, -0.5), &Vector::from_angle(0.0))
            .unwrap();
        assert!((d - 0.1).abs() < 1e-9);
    }
}
