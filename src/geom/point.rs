use std::fmt;
use std::ops::{Add, Sub};

use crate::geom::EPS;

/// Point in the 2D transport plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns true if both points are very close to each other.
    pub fn is_close(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < EPS && (self.y - other.y).abs() < EPS
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(2);
        write!(f, "Point({:.prec$}, {:.prec$})", self.x, self.y, prec = prec)
    }
}

impl Add<Vector> for Point {
    type Output = Point;

    fn add(self, v: Vector) -> Point {
        Point::new(self.x + v.dx, self.y + v.dy)
    }
}

impl Sub<Point> for Point {
    type Output = Vector;

    fn sub(self, other: Point) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y)
    }
}

/// Direction in the 2D transport plane. Unit length is only guaranteed for
/// vectors built with [`Vector::from_angle`] or [`Vector::normalize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    pub dx: f64,
    pub dy: f64,
}

impl Vector {
    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Unit vector at angle `phi`, measured counterclockwise from +x.
    pub fn from_angle(phi: f64) -> Self {
        Self {
            dx: phi.cos(),
            dy: phi.sin(),
        }
    }

    pub fn length(&self) -> f64 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len < EPS {
            *self
        } else {
            Self::new(self.dx / len, self.dy / len)
        }
    }

    pub fn scale(&self, s: f64) -> Self {
        Self::new(self.dx * s, self.dy * s)
    }

    pub fn reverse(&self) -> Self {
        Self::new(-self.dx, -self.dy)
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        self.dx * other.dx + self.dy * other.dy
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector({:.4}, {:.4})", self.dx, self.dy)
    }
}
