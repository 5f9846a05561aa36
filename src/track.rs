pub mod quadrature;

use std::f64::consts::PI;

use crate::cmfd::{CoarseMesh, FaceCrossing};
use crate::error::TrackGenerationError;
use crate::geom::{BoundaryType, Bounds, Geometry, Point, Vector};

pub use quadrature::Quadrature;

/// Traversal sense of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Where the angular flux leaving a track traversal goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// Continue into `track`, traversed in `dir`.
    Reflective { track: usize, dir: Direction },
    /// Leaves the problem; tallied as leakage.
    Vacuum,
}

/// One flat-source interval of a track.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub fsr: usize,
    pub length: f64,
    /// Coarse-mesh face crossed at the segment end (forward traversal).
    pub cmfd_fwd: Option<FaceCrossing>,
    /// Coarse-mesh face crossed at the segment start (backward traversal).
    pub cmfd_bwd: Option<FaceCrossing>,
}

/// A characteristic chord across the domain at one azimuthal angle.
#[derive(Debug, Clone)]
pub struct Track {
    pub start: Point,
    pub end: Point,
    /// Azimuthal angle index into the quadrature.
    pub azim: usize,
    pub segments: Vec<Segment>,
    pub next_fwd: Connection,
    pub next_bwd: Connection,
}

impl Track {
    pub fn chord(&self) -> f64 {
        self.start.distance_to(&self.end)
    }

    /// Unit direction of forward traversal.
    pub fn direction(&self) -> Vector {
        (self.end - self.start).normalize()
    }

    pub fn next(&self, dir: Direction) -> Connection {
        match dir {
            Direction::Forward => self.next_fwd,
            Direction::Backward => self.next_bwd,
        }
    }
}

/// The full track layout over a geometry.
#[derive(Debug, Clone)]
pub struct TrackSet {
    pub tracks: Vec<Track>,
    pub quadrature: Quadrature,
    /// FSR -> coarse-mesh cell; empty when generated without a mesh.
    pub fsr_to_cell: Vec<usize>,
    /// Coarse-mesh face count backing the segment tags (0 without a mesh).
    pub num_faces: usize,
}

impl TrackSet {
    /// FSR areas from the segment tallies: for each angle, chord length
    /// times effective spacing approximates the covered area, weighted by
    /// the azimuthal widths.
    pub fn volumes(&self, num_fsrs: usize) -> Vec<f64> {
        let q = &self.quadrature;
        let mut vol = vec![0.0; num_fsrs];
        for t in &self.tracks {
            let w = q.delta_phi[t.azim] / PI * q.spacing[t.azim];
            for s in &t.segments {
                vol[s.fsr] += w * s.length;
            }
        }
        vol
    }
}

const MAX_SEGMENTS_PER_TRACK: usize = 100_000;

/// Cyclic characteristic track generator.
///
/// Per-angle track counts are rounded to integers so the layout closes on
/// itself: every track endpoint coincides with exactly one endpoint of a
/// track at the complementary angle, which makes reflective boundary
/// conditions exact instead of interpolated. The requested angle and
/// spacing are adjusted to the nearest values compatible with the counts.
#[derive(Debug, Clone)]
pub struct TrackGenerator {
    num_azim: usize,
    spacing: f64,
    num_polar: usize,
}

impl TrackGenerator {
    /// `num_azim` counts angles over the full circle and must be a
    /// multiple of 4; `spacing` is the requested track separation.
    pub fn new(num_azim: usize, spacing: f64) -> Self {
        Self {
            num_azim,
            spacing,
            num_polar: 3,
        }
    }

    pub fn with_num_polar(mut self, num_polar: usize) -> Self {
        self.num_polar = num_polar;
        self
    }

    pub fn generate(
        &self,
        geometry: &Geometry,
        mesh: Option<&CoarseMesh>,
    ) -> Result<TrackSet, TrackGenerationError> {
        if self.num_azim == 0 || self.num_azim % 4 != 0 {
            return Err(TrackGenerationError::InvalidAzimCount(self.num_azim));
        }
        if !(self.spacing > 0.0) {
            return Err(TrackGenerationError::InvalidSpacing(self.spacing));
        }

        let b = *geometry.bounds()?;
        let (w, h) = (b.width(), b.height());
        let na = self.num_azim / 2;

        let mut phi_eff = vec![0.0; na];
        let mut spacing_eff = vec![0.0; na];
        let mut tracks: Vec<Track> = Vec::new();

        for i in 0..na / 2 {
            let phi = PI * (0.5 + i as f64) / na as f64;
            // Integer track counts on the bottom and left edges; the
            // effective angle is whatever makes the layout cyclic.
            let nx = (w / self.spacing * phi.sin()).floor() as usize + 1;
            let ny = (h / self.spacing * phi.cos()).floor() as usize + 1;
            let phi_e = ((h * nx as f64) / (w * ny as f64)).atan();
            let dx = w / nx as f64;
            let dy = h / ny as f64;
            let s_eff = dx * phi_e.sin();

            phi_eff[i] = phi_e;
            spacing_eff[i] = s_eff;
            phi_eff[na - 1 - i] = PI - phi_e;
            spacing_eff[na - 1 - i] = s_eff;

            // Quadrant I: up-right from the bottom and left edges.
            let dir = Vector::from_angle(phi_e);
            for j in 0..nx {
                let start = Point::new(b.x_min + dx * (0.5 + j as f64), b.y_min);
                tracks.push(new_track(start, &dir, &b, i));
            }
            for j in 0..ny {
                let start = Point::new(b.x_min, b.y_min + dy * (0.5 + j as f64));
                tracks.push(new_track(start, &dir, &b, i));
            }

            // Quadrant II: up-left from the bottom and right edges.
            let dir_c = Vector::from_angle(PI - phi_e);
            for j in 0..nx {
                let start = Point::new(b.x_max - dx * (0.5 + j as f64), b.y_min);
                tracks.push(new_track(start, &dir_c, &b, na - 1 - i));
            }
            for j in 0..ny {
                let start = Point::new(b.x_max, b.y_min + dy * (0.5 + j as f64));
                tracks.push(new_track(start, &dir_c, &b, na - 1 - i));
            }
        }

        let quadrature = Quadrature::new(phi_eff, spacing_eff, self.num_polar)?;
        link_reflective(&mut tracks, &b, na)?;

        let num_fsrs = geometry.num_fsrs()?;
        let mut fsr_to_cell = vec![0usize; if mesh.is_some() { num_fsrs } else { 0 }];
        for t in &mut tracks {
            segment_track(t, geometry, mesh, &b, &mut fsr_to_cell)?;
        }

        Ok(TrackSet {
            tracks,
            quadrature,
            fsr_to_cell,
            num_faces: mesh.map_or(0, |m| m.num_faces()),
        })
    }
}

fn new_track(start: Point, dir: &Vector, b: &Bounds, azim: usize) -> Track {
    let tx = if dir.dx > 0.0 {
        (b.x_max - start.x) / dir.dx
    } else if dir.dx < 0.0 {
        (b.x_min - start.x) / dir.dx
    } else {
        f64::INFINITY
    };
    let ty = (b.y_max - start.y) / dir.dy;
    let t = tx.min(ty);
    Track {
        start,
        end: start + dir.scale(t),
        azim,
        segments: Vec::new(),
        next_fwd: Connection::Vacuum,
        next_bwd: Connection::Vacuum,
    }
}

#[derive(Clone, Copy)]
struct EndRef {
    track: usize,
    is_start: bool,
    coord: f64,
    x: f64,
    y: f64,
}

/// Links every track end to its cyclic partner at the complementary
/// angle. Endpoints are grouped per edge and matched by their coordinate
/// along the edge; the half-integer layout guarantees exact pairs.
fn link_reflective(
    tracks: &mut [Track],
    b: &Bounds,
    na: usize,
) -> Result<(), TrackGenerationError> {
    let tol = 1e-6 * (b.width() + b.height());

    for i in 0..na / 2 {
        let ic = na - 1 - i;
        // Edge buckets: left, right, bottom, top.
        let mut edges: [Vec<EndRef>; 4] = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];

        for (ti, t) in tracks.iter().enumerate() {
            if t.azim != i && t.azim != ic {
                continue;
            }
            for (pt, is_start) in [(t.start, true), (t.end, false)] {
                let e = if (pt.x - b.x_min).abs() < tol {
                    0
                } else if (pt.x - b.x_max).abs() < tol {
                    1
                } else if (pt.y - b.y_min).abs() < tol {
                    2
                } else if (pt.y - b.y_max).abs() < tol {
                    3
                } else {
                    return Err(TrackGenerationError::UnpairedTrack { x: pt.x, y: pt.y });
                };
                let coord = if e < 2 { pt.y } else { pt.x };
                edges[e].push(EndRef {
                    track: ti,
                    is_start,
                    coord,
                    x: pt.x,
                    y: pt.y,
                });
            }
        }

        for (e, bucket) in edges.iter_mut().enumerate() {
            bucket.sort_by(|a, b| a.coord.total_cmp(&b.coord));
            if bucket.len() % 2 != 0 {
                let last = bucket[bucket.len() - 1];
                return Err(TrackGenerationError::UnpairedTrack {
                    x: last.x,
                    y: last.y,
                });
            }
            let bc = b.bc[e];
            for pair in bucket.chunks_exact(2) {
                let (a, c) = (pair[0], pair[1]);
                if (a.coord - c.coord).abs() > tol {
                    return Err(TrackGenerationError::UnpairedTrack { x: a.x, y: a.y });
                }
                link_pair(tracks, a, c, bc);
            }
        }
    }
    Ok(())
}

fn link_pair(tracks: &mut [Track], a: EndRef, c: EndRef, bc: BoundaryType) {
    // A traversal exits at its end point going forward, at its start point
    // going backward; it enters through the opposite sense.
    let exit_of = |e: EndRef| if e.is_start { Direction::Backward } else { Direction::Forward };
    let enter_of = |e: EndRef| if e.is_start { Direction::Forward } else { Direction::Backward };

    let conn_a = match bc {
        BoundaryType::Vacuum => Connection::Vacuum,
        BoundaryType::Reflective => Connection::Reflective {
            track: c.track,
            dir: enter_of(c),
        },
    };
    let conn_c = match bc {
        BoundaryType::Vacuum => Connection::Vacuum,
        BoundaryType::Reflective => Connection::Reflective {
            track: a.track,
            dir: enter_of(a),
        },
    };
    set_connection(&mut tracks[a.track], exit_of(a), conn_a);
    set_connection(&mut tracks[c.track], exit_of(c), conn_c);
}

fn set_connection(track: &mut Track, dir: Direction, conn: Connection) {
    match dir {
        Direction::Forward => track.next_fwd = conn,
        Direction::Backward => track.next_bwd = conn,
    }
}

/// Marches one track through the geometry, splitting at region and
/// coarse-mesh boundaries.
fn segment_track(
    track: &mut Track,
    geometry: &Geometry,
    mesh: Option<&CoarseMesh>,
    b: &Bounds,
    fsr_to_cell: &mut [usize],
) -> Result<(), TrackGenerationError> {
    let dir = track.direction();
    let chord = track.chord();
    let nudge = (b.width() + b.height()) * 1e-10;
    let min_len = 10.0 * nudge;

    let mut segments: Vec<Segment> = Vec::new();
    let mut traveled = 0.0;

    while chord - traveled > min_len {
        let q = track.start + dir.scale(traveled + nudge);
        let (fsr, dist) = geometry.trace(&q, &dir)?;
        let remaining = chord - traveled;
        let mut len = if dist.is_finite() {
            (dist + nudge).min(remaining)
        } else {
            remaining
        };

        let mut crossing = None;
        if let Some(m) = mesh {
            if let Some((dg, fc)) = m.next_crossing(&q, &dir) {
                if dg + nudge < len {
                    len = dg + nudge;
                    crossing = Some(fc);
                }
            }
            let mid = track.start + dir.scale(traveled + 0.5 * len);
            fsr_to_cell[fsr] = m.cell_of(&mid);
        }

        segments.push(Segment {
            fsr,
            length: len,
            cmfd_fwd: crossing,
            cmfd_bwd: None,
        });
        traveled += len;

        if segments.len() > MAX_SEGMENTS_PER_TRACK {
            return Err(TrackGenerationError::UnterminatedTrack {
                x0: track.start.x,
                y0: track.start.y,
                limit: MAX_SEGMENTS_PER_TRACK,
            });
        }
    }

    let sum: f64 = segments.iter().map(|s| s.length).sum();
    if (sum - chord).abs() > 1e-6 * chord.max(1.0) {
        return Err(TrackGenerationError::ChordMismatch { sum, chord });
    }

    // Mirror the interior crossings for backward traversal and tag the
    // boundary faces at both track ends.
    let n = segments.len();
    for k in 0..n.saturating_sub(1) {
        if let Some(fc) = segments[k].cmfd_fwd {
            segments[k + 1].cmfd_bwd = Some(FaceCrossing {
                face: fc.face,
                sign: -fc.sign,
            });
        }
    }
    if let Some(m) = mesh {
        if n > 0 {
            segments[n - 1].cmfd_fwd = m.boundary_crossing(&track.end, &dir);
            segments[0].cmfd_bwd = m.boundary_crossing(&track.start, &dir.reverse());
        }
    }

    track.segments = segments;
    Ok(())
}
