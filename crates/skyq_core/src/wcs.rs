//! Image footprints from simple FITS-style WCS keywords.
//!
//! Supports the zenithal projections (TAN, SIN, ARC, STG, ZEA) with
//! `cdelt`/`crota2` scaling, and returns every position as an equatorial
//! J2000 unit vector.

use crate::consts::DTR;
use crate::errors::{Result, SkyqError};
use crate::sphere::{Mat3, Vec3};
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection { Tan, Sin, Arc, Stg, Zea }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkySystem { Equatorial, Galactic, Ecliptic }

/// J2000 mean obliquity of the ecliptic, degrees.
pub const OBLIQUITY_J2000: f64 = 23.439_291_1;

/// Equatorial J2000 → galactic.
const EQ_TO_GAL: Mat3 = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885_0, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

/// Effective equinox. An epoch of 0 means 2000; an equinox of 0 falls back to
/// the epoch when that lies in [1950, 2000], else 2000.
pub fn resolve_equinox(equinox: f64, epoch: f64) -> f64 {
    let epoch = if epoch == 0.0 { 2000.0 } else { epoch };
    if equinox != 0.0 {
        equinox
    } else if (1950.0..=2000.0).contains(&epoch) {
        epoch.trunc()
    } else {
        2000.0
    }
}

fn transpose(m: &Mat3) -> Mat3 {
    let mut t = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, v) in row.iter().enumerate() { t[j][i] = *v; }
    }
    t
}

/// IAU 1976 precession matrix from the mean equinox `from` to J2000.
pub fn precession_to_j2000(from: f64) -> Mat3 {
    let big_t = (from - 2000.0) / 100.0;
    let t = (2000.0 - from) / 100.0;
    let w = 2306.2181 + (1.39656 - 0.000139 * big_t) * big_t;
    let as2r = DTR / 3600.0;
    let zeta = (w + ((0.30188 - 0.000344 * big_t) + 0.017998 * t) * t) * t * as2r;
    let z = (w + ((1.09468 + 0.000066 * big_t) + 0.018203 * t) * t) * t * as2r;
    let theta = ((2004.3109 + (-0.85330 - 0.000217 * big_t) * big_t)
        + ((-0.42665 - 0.000217 * big_t) - 0.041833 * t) * t)
        * t
        * as2r;
    let (s_zeta, c_zeta) = zeta.sin_cos();
    let (s_z, c_z) = z.sin_cos();
    let (st, ct) = theta.sin_cos();
    [
        [c_zeta * ct * c_z - s_zeta * s_z, -s_zeta * ct * c_z - c_zeta * s_z, -st * c_z],
        [c_zeta * ct * s_z + s_zeta * c_z, -s_zeta * ct * s_z + c_zeta * c_z, -st * s_z],
        [c_zeta * st, -s_zeta * st, ct],
    ]
}

/// Converts a unit vector in `system`/`equinox` to equatorial J2000.
pub fn to_j2000(v: Vec3, system: SkySystem, equinox: f64) -> Vec3 {
    let eq = match system {
        SkySystem::Galactic => return v.rotate(&transpose(&EQ_TO_GAL)),
        SkySystem::Equatorial => v,
        SkySystem::Ecliptic => {
            let (s, c) = (OBLIQUITY_J2000 * DTR).sin_cos();
            Vec3::new(v.x, c * v.y - s * v.z, s * v.y + c * v.z)
        }
    };
    if equinox == 2000.0 { eq } else { eq.rotate(&precession_to_j2000(equinox)) }
}

fn parse_ctype(ctype1: &str, ctype2: &str) -> Result<(SkySystem, Projection)> {
    let c1 = ctype1.trim().to_ascii_uppercase();
    let c2 = ctype2.trim().to_ascii_uppercase();
    let system = if c1.starts_with("RA") && c2.starts_with("DEC") {
        SkySystem::Equatorial
    } else if c1.starts_with("GLON") && c2.starts_with("GLAT") {
        SkySystem::Galactic
    } else if c1.starts_with("ELON") && c2.starts_with("ELAT") {
        SkySystem::Ecliptic
    } else {
        return Err(SkyqError::Wcs(format!("unsupported axes {c1}/{c2}")));
    };
    let code = c1.rsplit('-').next().unwrap_or("");
    let proj = match code {
        "TAN" => Projection::Tan,
        "SIN" => Projection::Sin,
        "ARC" => Projection::Arc,
        "STG" => Projection::Stg,
        "ZEA" => Projection::Zea,
        _ => return Err(SkyqError::Wcs(format!("unsupported projection {c1}"))),
    };
    Ok((system, proj))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    pub projection: Projection,
    pub system: SkySystem,
    pub equinox: f64,
    /// `(ns, nl)`
    pub naxis: [f64; 2],
    pub crval: [f64; 2],
    pub crpix: [f64; 2],
    pub cdelt: [f64; 2],
    pub crota2: f64,
}

impl Wcs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctype1: &str,
        ctype2: &str,
        naxis: [f64; 2],
        crval: [f64; 2],
        crpix: [f64; 2],
        cdelt: [f64; 2],
        crota2: f64,
        equinox: f64,
    ) -> Result<Self> {
        let (system, projection) = parse_ctype(ctype1, ctype2)?;
        if cdelt[0] == 0.0 || cdelt[1] == 0.0 {
            return Err(SkyqError::Wcs("zero cdelt".into()));
        }
        Ok(Self { projection, system, equinox, naxis, crval, crpix, cdelt, crota2 })
    }

    /// Native latitude (radians) for a radial distance `r` (radians) from the
    /// reference point in the projection plane.
    fn native_latitude(&self, r: f64) -> Result<f64> {
        let theta = match self.projection {
            Projection::Tan => 1.0f64.atan2(r),
            Projection::Sin => {
                if r > 1.0 { return Err(SkyqError::Wcs("pixel off the SIN disk".into())); }
                r.acos()
            }
            Projection::Arc => FRAC_PI_2 - r,
            Projection::Stg => FRAC_PI_2 - 2.0 * (r / 2.0).atan(),
            Projection::Zea => {
                if r > 2.0 { return Err(SkyqError::Wcs("pixel off the ZEA disk".into())); }
                FRAC_PI_2 - 2.0 * (r / 2.0).asin()
            }
        };
        Ok(theta)
    }

    /// Sky position of a (1-based, FITS-convention) pixel.
    pub fn pix_to_sky(&self, p1: f64, p2: f64) -> Result<Vec3> {
        let dp1 = self.cdelt[0] * (p1 - self.crpix[0]);
        let dp2 = self.cdelt[1] * (p2 - self.crpix[1]);
        let (sr, cr) = (self.crota2 * DTR).sin_cos();
        let x = (dp1 * cr - dp2 * sr) * DTR;
        let y = (dp1 * sr + dp2 * cr) * DTR;

        let r = x.hypot(y);
        let theta = self.native_latitude(r)?;
        let phi = if r == 0.0 { 0.0 } else { x.atan2(-y) };

        // Zenithal: the reference point is the native pole, lonpole = 180°.
        let (a0, d0) = (self.crval[0] * DTR, self.crval[1] * DTR);
        let dphi = phi - std::f64::consts::PI;
        let (st, ct) = theta.sin_cos();
        let (sd0, cd0) = d0.sin_cos();
        let lon = a0 + (-ct * dphi.sin()).atan2(st * cd0 - ct * sd0 * dphi.cos());
        let lat = (st * sd0 + ct * cd0 * dphi.cos()).clamp(-1.0, 1.0).asin();

        let v = Vec3::from_radec(lon / DTR, lat / DTR);
        Ok(to_j2000(v, self.system, self.equinox))
    }

    /// The four outer pixel-edge corners, in pixel order.
    pub fn corners(&self) -> Result<[Vec3; 4]> {
        let [ns, nl] = self.naxis;
        Ok([
            self.pix_to_sky(0.5, 0.5)?,
            self.pix_to_sky(ns + 0.5, 0.5)?,
            self.pix_to_sky(ns + 0.5, nl + 0.5)?,
            self.pix_to_sky(0.5, nl + 0.5)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::separation;

    fn image(ctype: (&str, &str), crval: [f64; 2], crota2: f64) -> Wcs {
        Wcs::new(ctype.0, ctype.1, [100.0, 100.0], crval, [50.5, 50.5], [-0.01, 0.01], crota2, 2000.0)
            .unwrap()
    }

    #[test]
    fn reference_pixel_maps_to_crval() {
        for proj in ["TAN", "SIN", "ARC", "STG", "ZEA"] {
            let c1 = format!("RA---{proj}");
            let w = image((&c1, "DEC--TAN"), [150.0, 30.0], 0.0);
            let (ra, dec) = w.pix_to_sky(50.5, 50.5).unwrap().to_radec();
            assert!((ra - 150.0).abs() < 1e-9 && (dec - 30.0).abs() < 1e-9, "{proj}");
        }
    }

    #[test]
    fn axis_directions_and_scale() {
        let w = image(("RA---TAN", "DEC--TAN"), [10.0, 0.0], 0.0);
        // cdelt1 < 0: ra grows toward lower pixel numbers
        let (ra, _) = w.pix_to_sky(40.5, 50.5).unwrap().to_radec();
        assert!((ra - 10.1).abs() < 1e-4);
        let (_, dec) = w.pix_to_sky(50.5, 60.5).unwrap().to_radec();
        assert!((dec - 0.1).abs() < 1e-4);
    }

    #[test]
    fn footprint_size_matches_pixel_grid() {
        let w = image(("RA---TAN", "DEC--TAN"), [200.0, -40.0], 30.0);
        let c = w.corners().unwrap();
        for i in 0..4 {
            let side = separation(c[i], c[(i + 1) % 4]);
            assert!((side - 1.0).abs() < 1e-3, "side {i} = {side}");
        }
    }

    #[test]
    fn galactic_center_in_equatorial() {
        let (ra, dec) = to_j2000(Vec3::from_radec(0.0, 0.0), SkySystem::Galactic, 2000.0).to_radec();
        assert!((ra - 266.405).abs() < 1e-2 && (dec + 28.936).abs() < 1e-2, "{ra} {dec}");
    }

    #[test]
    fn ecliptic_pole_in_equatorial() {
        let (ra, dec) = to_j2000(Vec3::from_radec(0.0, 90.0), SkySystem::Ecliptic, 2000.0).to_radec();
        assert!((ra - 270.0).abs() < 1e-9 && (dec - (90.0 - OBLIQUITY_J2000)).abs() < 1e-9);
    }

    #[test]
    fn b1950_precesses_by_about_two_thirds_of_a_degree() {
        let v = Vec3::from_radec(0.0, 0.0);
        let moved = to_j2000(v, SkySystem::Equatorial, 1950.0);
        let sep = separation(v, moved);
        assert!(sep > 0.6 && sep < 0.75, "{sep}");
        assert_eq!(to_j2000(v, SkySystem::Equatorial, 2000.0), v);
    }

    #[test]
    fn equinox_defaults() {
        assert_eq!(resolve_equinox(0.0, 0.0), 2000.0);
        assert_eq!(resolve_equinox(0.0, 1950.0), 1950.0);
        assert_eq!(resolve_equinox(0.0, 1900.0), 2000.0);
        assert_eq!(resolve_equinox(1950.0, 2010.0), 1950.0);
    }

    #[test]
    fn unsupported_projection_is_rejected() {
        let err = Wcs::new("RA---CAR", "DEC--CAR", [1.0, 1.0], [0.0; 2], [1.0; 2], [1.0; 2], 0.0, 2000.0);
        assert!(matches!(err, Err(SkyqError::Wcs(_))));
    }
}
