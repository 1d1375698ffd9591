//! Search tolerances.
//!
//! The pad values decide how far a stored bounding box reaches past the
//! footprint it encloses; they are fixed at build time and must not be
//! changed between building an index and attaching to it.

use crate::consts::DTR;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Lower bound for the polygon box padding.
    pub polygon_pad_floor_arcsec: f64,
    /// Half-width of the box around a point entry.
    pub point_pad_arcsec: f64,
    /// Half-width (unit-vector distance) of the box around a point query.
    pub point_query_delta: f64,
    /// Point-vs-point matching is never tighter than this.
    pub min_match_radius_arcsec: f64,
    /// Recompute data-file checksums when attaching.
    pub verify_checksums: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            polygon_pad_floor_arcsec: 0.01,
            point_pad_arcsec: 1.0,
            point_query_delta: 1.0e-4,
            min_match_radius_arcsec: 1.0,
            verify_checksums: false,
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn polygon_pad_floor(&self) -> f64 { (self.polygon_pad_floor_arcsec / 3600.0 * DTR).tan() }
    pub fn point_pad(&self) -> f64 { (self.point_pad_arcsec / 3600.0 * DTR).tan() }

    /// Point-vs-point tolerance for an angular radius in degrees:
    /// `(match_cos, match_delta)`.
    pub fn match_tolerance(&self, radius_deg: f64) -> (f64, f64) {
        let r = radius_deg.abs() * DTR;
        let floor = (self.min_match_radius_arcsec / 3600.0 * DTR).cos();
        (r.cos().min(floor), r.tan())
    }
}
