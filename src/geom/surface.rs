use std::fmt;

use crate::geom::point::{Point, Vector};
use crate::geom::EPS;

/// Behavior of the problem boundary a surface participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryType {
    Reflective,
    Vacuum,
}

/// Implicit quadratic surface in the 2D plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceKind {
    /// Plane perpendicular to the x axis: f(p) = p.x - x.
    XPlane { x: f64 },
    /// Plane perpendicular to the y axis: f(p) = p.y - y.
    YPlane { y: f64 },
    /// Circle centered at (x0, y0): f(p) = |p - c|^2 - r^2.
    Circle { x0: f64, y0: f64, r: f64 },
}

/// A surface splits the plane into a positive and a negative half-space.
/// Cells reference surfaces together with the half-space sign they keep.
#[derive(Debug, Clone, Copy)]
pub struct Surface {
    pub kind: SurfaceKind,
    pub boundary: BoundaryType,
}

impl Surface {
    pub fn x_plane(x: f64) -> Self {
        Self {
            kind: SurfaceKind::XPlane { x },
            boundary: BoundaryType::Reflective,
        }
    }

    pub fn y_plane(y: f64) -> Self {
        Self {
            kind: SurfaceKind::YPlane { y },
            boundary: BoundaryType::Reflective,
        }
    }

    pub fn circle(x0: f64, y0: f64, r: f64) -> Self {
        Self {
            kind: SurfaceKind::Circle { x0, y0, r },
            boundary: BoundaryType::Reflective,
        }
    }

    pub fn with_boundary(mut self, boundary: BoundaryType) -> Self {
        self.boundary = boundary;
        self
    }

    /// Signed surface function. Positive in the positive half-space.
    pub fn evaluate(&self, p: &Point) -> f64 {
        match self.kind {
            SurfaceKind::XPlane { x } => p.x - x,
            SurfaceKind::YPlane { y } => p.y - y,
            SurfaceKind::Circle { x0, y0, r } => {
                let dx = p.x - x0;
                let dy = p.y - y0;
                dx * dx + dy * dy - r * r
            }
        }
    }

    /// Distance along `dir` from `p` to the nearest crossing of this surface.
    /// Returns `None` if the ray never reaches the surface.
    pub fn distance(&self, p: &Point, dir: &Vector) -> Option<f64> {
        match self.kind {
            SurfaceKind::XPlane { x } => {
                if dir.dx.abs() < EPS {
                    return None;
                }
                let d = (x - p.x) / dir.dx;
                (d > EPS).then_some(d)
            }
            SurfaceKind::YPlane { y } => {
                if dir.dy.abs() < EPS {
                    return None;
                }
                let d = (y - p.y) / dir.dy;
                (d > EPS).then_some(d)
            }
            SurfaceKind::Circle { x0, y0, r } => {
                // Solve |p + t*dir - c|^2 = r^2 for the smallest positive t.
                let fx = p.x - x0;
                let fy = p.y - y0;
                let a = dir.dx * dir.dx + dir.dy * dir.dy;
                let b = 2.0 * (fx * dir.dx + fy * dir.dy);
                let c = fx * fx + fy * fy - r * r;
                let disc = b * b - 4.0 * a * c;
                if disc < 0.0 || a < EPS {
                    return None;
                }
                let sq = disc.sqrt();
                let t0 = (-b - sq) / (2.0 * a);
                let t1 = (-b + sq) / (2.0 * a);
                if t0 > EPS {
                    Some(t0)
                } else if t1 > EPS {
                    Some(t1)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SurfaceKind::XPlane { x } => write!(f, "XPlane(x={x})"),
            SurfaceKind::YPlane { y } => write!(f, "YPlane(y={y})"),
            SurfaceKind::Circle { x0, y0, r } => write!(f, "Circle(({x0}, {y0}), r={r})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_halfspaces() {
        let s = Surface::x_plane(1.0);
        assert!(s.evaluate(&Point::new(2.0, 0.0)) > 0.0);
        assert!(s.evaluate(&Point::new(0.0, 0.0)) < 0.0);
    }

    #[test]
    fn test_plane_distance() {
        let s = Surface::x_plane(3.0);
        let d = s
            .distance(&Point::new(0.0, 0.0), &Vector::from_angle(0.0))
            .unwrap();
        assert!((d - 3.0).abs() < 1e-12);
        // Moving away from the plane.
        assert!(s
            .distance(&Point::new(4.0, 0.0), &Vector::from_angle(0.0))
            .is_none());
        // Parallel to the plane.
        assert!(s
            .distance(
                &Point::new(0.0, 0.0),
                &Vector::from_angle(std::f64::consts::FRAC_PI_2)
            )
            .is_none());
    }

    #[test]
    fn test_circle_distance_from_inside() {
        let s = Surface::circle(0.0, 0.0, 2.0);
        let d = s
            .distance(&Point::new(0.0, 0.0), &Vector::from_angle(0.0))
            .unwrap();
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_circle_distance_from_outside() {
        let s = Surface::circle(0.0, 0.0, 1.0);
        let d = s
            .distance(&Point::new(-3.0, 0.0), &Vector::from_angle(0.0))
            .unwrap();
        assert!((d - 2.0).abs() < 1e-12);
        // Ray missing the circle.
        assert!(s
            .distance(&Point::new(-3.0, 2.0), &Vector::from_angle(0.0))
            .is_none());
    }
}
