//! 3D vector data type
//!
//! A point or direction in 3D space. Crosses the script boundary as a bound
//! value class with the full operator surface (component-wise arithmetic,
//! scalar scale, unary negation, equality).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A vector in 3D space with double-precision components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    /// All components one.
    pub const ONE: Vector3 = Vector3::new(1.0, 1.0, 1.0);
    /// Unit X axis.
    pub const X_AXIS: Vector3 = Vector3::new(1.0, 0.0, 0.0);
    /// Unit Y axis.
    pub const Y_AXIS: Vector3 = Vector3::new(0.0, 1.0, 0.0);
    /// Unit Z axis.
    pub const Z_AXIS: Vector3 = Vector3::new(0.0, 0.0, 1.0);

    /// Construct from components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Construct with all components set to `v`.
    pub const fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }

    /// Euclidean length.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction. Zero vector stays zero.
    pub fn unit(&self) -> Vector3 {
        let m = self.magnitude();
        if m == 0.0 {
            Vector3::ZERO
        } else {
            *self / m
        }
    }

    /// Component-wise absolute value.
    pub fn abs(&self) -> Vector3 {
        Vector3::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Component-wise ceiling.
    pub fn ceil(&self) -> Vector3 {
        Vector3::new(self.x.ceil(), self.y.ceil(), self.z.ceil())
    }

    /// Component-wise floor.
    pub fn floor(&self) -> Vector3 {
        Vector3::new(self.x.floor(), self.y.floor(), self.z.floor())
    }

    /// Component-wise sign (-1, 0, or 1).
    pub fn sign(&self) -> Vector3 {
        fn s(v: f64) -> f64 {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        Vector3::new(s(self.x), s(self.y), s(self.z))
    }

    /// Cross product.
    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Dot product.
    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Angle between two vectors, in radians. Optionally signed about `axis`.
    pub fn angle(&self, other: &Vector3, axis: Option<&Vector3>) -> f64 {
        let cross = self.cross(other);
        let angle = cross.magnitude().atan2(self.dot(other));
        match axis {
            Some(axis) if cross.dot(axis) < 0.0 => -angle,
            _ => angle,
        }
    }

    /// Linear interpolation toward `goal` by `alpha`.
    pub fn lerp(&self, goal: &Vector3, alpha: f64) -> Vector3 {
        *self + (*goal - *self) * alpha
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Component-wise minimum.
    pub fn min(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Approximate equality within `epsilon` per component.
    pub fn fuzzy_eq(&self, other: &Vector3, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }
}

impl Div for Vector3 {
    type Output = Vector3;
    fn div(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x / rhs.x, self.y / rhs.y, self.z / rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<Vector3> for f64 {
    type Output = Vector3;
    fn mul(self, rhs: Vector3) -> Vector3 {
        rhs * self
    }
}

impl Div<f64> for Vector3 {
    type Output = Vector3;
    fn div(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = Vector3::new(4.0, 5.0, 6.0);

        assert_eq!(a + b, Vector3::new(5.0, 7.0, 9.0));
        assert_eq!(b - a, Vector3::new(3.0, 3.0, 3.0));
        assert_eq!(a * 2.0, Vector3::new(2.0, 4.0, 6.0));
        assert_eq!(2.0 * a, a * 2.0);
        assert_eq!(-a, Vector3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn test_cross_and_dot() {
        let x = Vector3::X_AXIS;
        let y = Vector3::Y_AXIS;

        assert_eq!(x.cross(&y), Vector3::Z_AXIS);
        assert_eq!(x.dot(&y), 0.0);
    }

    #[test]
    fn test_unit_of_zero_is_zero() {
        assert_eq!(Vector3::ZERO.unit(), Vector3::ZERO);
    }

    #[test]
    fn test_lerp() {
        let a = Vector3::ZERO;
        let b = Vector3::splat(10.0);
        assert_eq!(a.lerp(&b, 0.5), Vector3::splat(5.0));
    }

    #[test]
    fn test_fuzzy_eq() {
        let a = Vector3::new(1.0, 1.0, 1.0);
        let b = Vector3::new(1.0 + 1e-7, 1.0, 1.0);
        assert!(a.fuzzy_eq(&b, 1e-5));
        assert!(!a.fuzzy_eq(&Vector3::splat(1.1), 1e-5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Vector3::new(1.0, 2.5, -3.0).to_string(), "1, 2.5, -3");
    }
}
