//! Vectors on (and around) the unit celestial sphere.
//!
//! Positions use the usual embedding `x = cos ra cos dec`,
//! `y = sin ra cos dec`, `z = sin dec`, with angles in degrees at the API.

use crate::consts::DTR;
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub type Mat3 = [[f64; 3]; 3];

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }

    pub fn from_radec(ra: f64, dec: f64) -> Self {
        let (sra, cra) = (ra * DTR).sin_cos();
        let (sdec, cdec) = (dec * DTR).sin_cos();
        Self::new(cra * cdec, sra * cdec, sdec)
    }

    /// `(ra, dec)` in degrees, ra in `[0, 360)`.
    pub fn to_radec(self) -> (f64, f64) {
        let v = self.normalize();
        let mut ra = v.y.atan2(v.x) / DTR;
        if ra < 0.0 { ra += 360.0; }
        let dec = v.z.clamp(-1.0, 1.0).asin() / DTR;
        (ra, dec)
    }

    #[inline]
    pub fn dot(self, o: Vec3) -> f64 { self.x * o.x + self.y * o.y + self.z * o.z }

    #[inline]
    pub fn cross(self, o: Vec3) -> Vec3 {
        Vec3::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    pub fn norm(self) -> f64 { self.dot(self).sqrt() }

    pub fn is_zero(self) -> bool { self.x == 0.0 && self.y == 0.0 && self.z == 0.0 }

    /// Unit vector along `self`; the zero vector stays zero.
    pub fn normalize(self) -> Vec3 {
        let len = self.norm();
        if len == 0.0 { return self; }
        Vec3::new(self.x / len, self.y / len, self.z / len)
    }

    pub fn rotate(self, m: &Mat3) -> Vec3 {
        Vec3::new(
            m[0][0] * self.x + m[0][1] * self.y + m[0][2] * self.z,
            m[1][0] * self.x + m[1][1] * self.y + m[1][2] * self.z,
            m[2][0] * self.x + m[2][1] * self.y + m[2][2] * self.z,
        )
    }

    pub fn to_array(self) -> [f64; 3] { [self.x, self.y, self.z] }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, o: Vec3) -> Vec3 { Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z) }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, o: Vec3) -> Vec3 { Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z) }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, k: f64) -> Vec3 { Vec3::new(self.x * k, self.y * k, self.z * k) }
}

/// Angular separation in degrees.
pub fn separation(a: Vec3, b: Vec3) -> f64 {
    a.cross(b).norm().atan2(a.dot(b)) / DTR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radec_round_trips_through_xyz() {
        for &(ra, dec) in &[(0.0, 0.0), (10.0, -1.0), (359.5, 89.0), (180.0, -45.0)] {
            let (r, d) = Vec3::from_radec(ra, dec).to_radec();
            assert!((r - ra).abs() < 1e-9, "{ra} -> {r}");
            assert!((d - dec).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_vector_normalizes_to_zero() {
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
        let v = Vec3::new(3.0, 0.0, 4.0).normalize();
        assert!((v.norm() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn separation_of_close_points() {
        let a = Vec3::from_radec(10.0, 0.0);
        let b = Vec3::from_radec(10.0, 1.0 / 3600.0);
        assert!((separation(a, b) * 3600.0 - 1.0).abs() < 1e-6);
    }
}
