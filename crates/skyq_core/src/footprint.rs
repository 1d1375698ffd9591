//! Bounding volumes for catalog records.
//!
//! Every record becomes an [`Entry`] (exact shape, used by the predicates)
//! plus a [`BoundingBox`] in the 3-D embedding of the unit sphere (the only
//! thing the index sees). A polygon box is the per-axis extent of the four
//! corners padded by `1 - center·corner0`, which covers the bulge of the
//! great-circle edges; a point box is the point padded by a fixed tolerance.

use crate::sphere::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub const EMPTY: BoundingBox = BoundingBox { min: [f64::INFINITY; 3], max: [f64::NEG_INFINITY; 3] };

    /// Cube of half-width `half` around `c`.
    pub fn around(c: Vec3, half: f64) -> Self {
        let a = c.to_array();
        Self { min: a.map(|v| v - half), max: a.map(|v| v + half) }
    }

    /// Extent of `points`, grown by `pad` on every side.
    pub fn enclosing(points: &[Vec3], pad: f64) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            let a = p.to_array();
            for k in 0..3 {
                b.min[k] = b.min[k].min(a[k]);
                b.max[k] = b.max[k].max(a[k]);
            }
        }
        for k in 0..3 {
            b.min[k] -= pad;
            b.max[k] += pad;
        }
        b
    }

    pub fn is_empty(&self) -> bool { (0..3).any(|k| self.min[k] > self.max[k]) }

    #[inline]
    pub fn overlaps(&self, o: &BoundingBox) -> bool {
        (0..3).all(|k| self.min[k] <= o.max[k] && o.min[k] <= self.max[k])
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        let a = p.to_array();
        (0..3).all(|k| self.min[k] <= a[k] && a[k] <= self.max[k])
    }

    pub fn contains(&self, o: &BoundingBox) -> bool {
        (0..3).all(|k| self.min[k] <= o.min[k] && o.max[k] <= self.max[k])
    }

    pub fn combine(&self, o: &BoundingBox) -> BoundingBox {
        let mut b = *self;
        for k in 0..3 {
            b.min[k] = b.min[k].min(o.min[k]);
            b.max[k] = b.max[k].max(o.max[k]);
        }
        b
    }

    pub fn volume(&self) -> f64 {
        if self.is_empty() { return 0.0; }
        (0..3).map(|k| self.max[k] - self.min[k]).product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape { Point, Polygon }

/// One indexed record. Corners are zero for points and in canonical winding
/// for polygons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub catalog_id: u32,
    pub record_offset: u64,
    pub center: Vec3,
    pub corners: [Vec3; 4],
    pub shape: Shape,
}

/// Puts the corners in the order where `(c[i] × c[i+1]) · p >= 0` for every
/// edge and any interior point `p`; a polygon wound the other way is
/// reversed (`c0 c3 c2 c1`).
pub fn canonical_winding(corners: [Vec3; 4], center: Vec3) -> [Vec3; 4] {
    let turn: f64 = (0..4).map(|i| corners[i].cross(corners[(i + 1) % 4]).dot(center)).sum();
    if turn < 0.0 {
        [corners[0], corners[3], corners[2], corners[1]]
    } else {
        corners
    }
}

pub fn centroid(corners: &[Vec3; 4]) -> Vec3 {
    corners.iter().fold(Vec3::ZERO, |acc, c| acc + *c).normalize()
}

/// Box padding for a polygon with the given corners and center.
pub fn polygon_pad(corners: &[Vec3; 4], center: Vec3, floor: f64) -> f64 {
    (1.0 - corners[0].dot(center)).max(floor)
}

/// Builds a polygon entry and its box from four corners in any winding.
pub fn polygon_entry(catalog_id: u32, record_offset: u64, corners: [Vec3; 4], pad_floor: f64) -> (Entry, BoundingBox) {
    let corners = corners.map(Vec3::normalize);
    let center = centroid(&corners);
    let corners = canonical_winding(corners, center);
    let pad = polygon_pad(&corners, center, pad_floor);
    let bbox = BoundingBox::enclosing(&corners, pad);
    let entry = Entry { catalog_id, record_offset, center, corners, shape: Shape::Polygon };
    (entry, bbox)
}

pub fn point_entry(catalog_id: u32, record_offset: u64, p: Vec3, pad: f64) -> (Entry, BoundingBox) {
    let center = p.normalize();
    let entry = Entry { catalog_id, record_offset, center, corners: [Vec3::ZERO; 4], shape: Shape::Point };
    (entry, BoundingBox::around(center, pad))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> [Vec3; 4] {
        [(9.0, -1.0), (11.0, -1.0), (11.0, 1.0), (9.0, 1.0)].map(|(r, d)| Vec3::from_radec(r, d))
    }

    #[test]
    fn polygon_box_holds_corners_and_center() {
        let (e, b) = polygon_entry(0, 0, square(), 1e-9);
        for c in e.corners {
            assert!(b.contains_point(c));
        }
        assert!(b.contains_point(e.center));
        let (ra, dec) = e.center.to_radec();
        assert!((ra - 10.0).abs() < 1e-9 && dec.abs() < 1e-9);
    }

    #[test]
    fn polygon_box_covers_edge_midpoints() {
        let (e, b) = polygon_entry(0, 0, square(), 0.0);
        for i in 0..4 {
            let mid = (e.corners[i] + e.corners[(i + 1) % 4]).normalize();
            assert!(b.contains_point(mid));
        }
    }

    #[test]
    fn pad_floor_applies_to_tiny_polygons() {
        let tiny = [(10.0, 0.0), (10.0 + 1e-9, 0.0), (10.0 + 1e-9, 1e-9), (10.0, 1e-9)]
            .map(|(r, d)| Vec3::from_radec(r, d));
        let (e, b) = polygon_entry(0, 0, tiny, 1e-6);
        assert!(b.max[0] - b.min[0] >= 2e-6 - 1e-15);
        assert!(b.contains_point(e.center));
    }

    #[test]
    fn point_box_is_centered() {
        let p = Vec3::from_radec(123.0, -45.0);
        let (e, b) = point_entry(3, 7, p, 1e-5);
        assert_eq!(e.shape, Shape::Point);
        assert_eq!(e.corners, [Vec3::ZERO; 4]);
        for k in 0..3 {
            let mid = (b.min[k] + b.max[k]) / 2.0;
            assert!((mid - p.to_array()[k]).abs() < 1e-15);
            assert!(((b.max[k] - b.min[k]) - 2e-5).abs() < 1e-15);
        }
    }

    #[test]
    fn reversed_corners_are_rewound() {
        let sq = square();
        let rev = [sq[0], sq[3], sq[2], sq[1]];
        let (a, _) = polygon_entry(0, 0, sq, 0.0);
        let (b, _) = polygon_entry(0, 0, rev, 0.0);
        for i in 0..4 {
            assert!((a.corners[i] - sq[i]).norm() < 1e-12);
            assert!((b.corners[i] - sq[i]).norm() < 1e-12);
        }
    }

    #[test]
    fn box_overlap_and_combine() {
        let a = BoundingBox::around(Vec3::new(0.0, 0.0, 1.0), 0.1);
        let b = BoundingBox::around(Vec3::new(0.15, 0.0, 1.0), 0.1);
        let c = BoundingBox::around(Vec3::new(0.5, 0.0, 1.0), 0.1);
        assert!(a.overlaps(&b) && !a.overlaps(&c));
        let ab = a.combine(&b);
        assert!(ab.contains(&a) && ab.contains(&b));
        assert!(BoundingBox::EMPTY.is_empty());
        assert_eq!(BoundingBox::EMPTY.combine(&a), a);
    }
}
