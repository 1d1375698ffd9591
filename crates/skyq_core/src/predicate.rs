//! Exact overlap tests between a search region and an indexed entry.
//!
//! The index only compares boxes; every candidate it yields is confirmed or
//! rejected here. Polygons (entries and search boxes alike) are expected in
//! canonical winding, see [`crate::footprint::canonical_winding`].

use crate::config::SearchConfig;
use crate::consts::DTR;
use crate::footprint::{canonical_winding, centroid, polygon_pad, BoundingBox, Entry, Shape};
use crate::sphere::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchRegion {
    Point(Vec3),
    Cone { center: Vec3, radius_deg: f64 },
    Box { corners: [Vec3; 4], center: Vec3 },
    /// One source row of a `table`/`matches` run; behaves like `Point`.
    TableRow(Vec3),
}

impl SearchRegion {
    pub fn point(ra: f64, dec: f64) -> Self { SearchRegion::Point(Vec3::from_radec(ra, dec)) }

    pub fn cone(ra: f64, dec: f64, radius_deg: f64) -> Self {
        SearchRegion::Cone { center: Vec3::from_radec(ra, dec), radius_deg }
    }

    /// Box from four `(ra, dec)` corners in either winding.
    pub fn sky_box(corners: [(f64, f64); 4]) -> Self {
        let corners = corners.map(|(ra, dec)| Vec3::from_radec(ra, dec));
        let center = centroid(&corners);
        SearchRegion::Box { corners: canonical_winding(corners, center), center }
    }

    /// Candidate box handed to the index. `match_delta` widens point-like
    /// regions to the current match radius.
    pub fn query_box(&self, cfg: &SearchConfig, match_delta: f64) -> BoundingBox {
        match *self {
            SearchRegion::Point(p) | SearchRegion::TableRow(p) => {
                BoundingBox::around(p, cfg.point_query_delta + match_delta)
            }
            // Past a hemisphere the cap reaches every axis extreme.
            SearchRegion::Cone { radius_deg, .. } if radius_deg.abs() >= 90.0 => {
                BoundingBox { min: [-1.0; 3], max: [1.0; 3] }
            }
            SearchRegion::Cone { center, radius_deg } => {
                let (s, c) = (radius_deg.abs() * DTR).sin_cos();
                let a = center.to_array();
                BoundingBox {
                    min: a.map(|v| (v * c).min(v) - s),
                    max: a.map(|v| (v * c).max(v) + s),
                }
            }
            SearchRegion::Box { corners, center } => {
                BoundingBox::enclosing(&corners, polygon_pad(&corners, center, 0.0))
            }
        }
    }
}

/// `p` lies inside (or on an edge of) the canonically wound quadrilateral.
pub fn point_in_polygon(p: Vec3, corners: &[Vec3; 4]) -> bool {
    (0..4).all(|i| corners[i].cross(corners[(i + 1) % 4]).dot(p) >= 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    None,
    Colinear,
    EndpointOnly,
    Normal,
}

/// `v` lies strictly between `a` and `b` on their common arc.
fn between(v: Vec3, a: Vec3, b: Vec3) -> bool {
    let ab = a.dot(b);
    a.dot(v) > ab && b.dot(v) > ab
}

/// Classifies the crossing of arcs `p0→p1` and `q0→q1`.
pub fn segment_intersection(p0: Vec3, p1: Vec3, q0: Vec3, q1: Vec3) -> Intersection {
    let p_dot = p0.dot(p1);
    let q_dot = q0.dot(q1);

    let cross = p0.cross(p1).cross(q0.cross(q1));
    if cross.is_zero() {
        let overlap = (between(q0, p0, p1) && between(q1, p0, p1))
            || (between(p0, q0, q1) && between(p1, q0, q1))
            || (between(q0, p0, p1) && between(p1, q0, q1))
            || (between(p0, q0, q1) && between(q1, p0, p1))
            || (between(q1, p0, p1) && between(p1, q0, q1))
            || (between(q0, p0, p1) && between(p0, q0, q1));
        return if overlap { Intersection::Colinear } else { Intersection::None };
    }

    let mut x = cross.normalize();
    if x.dot(p0) < 0.0 {
        x = x * -1.0;
    }

    let (p0x, p1x, q0x, q1x) = (x.dot(p0), x.dot(p1), x.dot(q0), x.dot(q1));
    if p0x < p_dot || p1x < p_dot || q0x < q_dot || q1x < q_dot {
        return Intersection::None;
    }
    if p0x == p_dot || p1x == p_dot || q0x == q_dot || q1x == q_dot {
        return Intersection::EndpointOnly;
    }
    Intersection::Normal
}

fn edges_cross(a: &[Vec3; 4], b: &[Vec3; 4]) -> bool {
    (0..4).any(|i| {
        (0..4).any(|j| {
            segment_intersection(a[i], a[(i + 1) % 4], b[j], b[(j + 1) % 4]) != Intersection::None
        })
    })
}

/// Point on the boundary of the cone closest to `target`, or `None` when
/// `target` is (anti)parallel to the axis.
fn cone_edge_toward(center: Vec3, radius_deg: f64, target: Vec3) -> Option<Vec3> {
    let tangent = (target - center * center.dot(target)).normalize();
    if tangent.is_zero() {
        return None;
    }
    let (s, c) = (radius_deg * DTR).sin_cos();
    Some((center * c + tangent * s).normalize())
}

/// Exact overlap of `region` with `entry`. `match_cos` is the cosine of the
/// point-to-point match radius.
pub fn overlaps(region: &SearchRegion, entry: &Entry, match_cos: f64) -> bool {
    match (*region, entry.shape) {
        (SearchRegion::Point(p) | SearchRegion::TableRow(p), Shape::Point) => p.dot(entry.center) > match_cos,
        (SearchRegion::Point(p) | SearchRegion::TableRow(p), Shape::Polygon) => point_in_polygon(p, &entry.corners),

        (SearchRegion::Cone { center, radius_deg }, Shape::Point) => {
            center.dot(entry.center) > (radius_deg * DTR).cos()
        }
        (SearchRegion::Cone { center, radius_deg }, Shape::Polygon) => {
            let cos_r = (radius_deg * DTR).cos();
            if center.dot(entry.center) > cos_r {
                return true;
            }
            if entry.corners.iter().any(|c| center.dot(*c) > cos_r) {
                return true;
            }
            if point_in_polygon(center, &entry.corners) {
                return true;
            }
            cone_edge_toward(center, radius_deg, entry.center)
                .is_some_and(|x| point_in_polygon(x, &entry.corners))
        }

        (SearchRegion::Box { corners, .. }, Shape::Point) => point_in_polygon(entry.center, &corners),
        (SearchRegion::Box { corners, center }, Shape::Polygon) => {
            // Centers settle coincident outlines, where every corner and edge test sits on a boundary.
            point_in_polygon(entry.center, &corners)
                || point_in_polygon(center, &entry.corners)
                || corners.iter().any(|c| point_in_polygon(*c, &entry.corners))
                || entry.corners.iter().any(|c| point_in_polygon(*c, &corners))
                || edges_cross(&corners, &entry.corners)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::{point_entry, polygon_entry};

    fn square(ra0: f64, dec0: f64, ra1: f64, dec1: f64) -> Entry {
        let c = [(ra0, dec0), (ra1, dec0), (ra1, dec1), (ra0, dec1)].map(|(r, d)| Vec3::from_radec(r, d));
        polygon_entry(0, 0, c, 0.0).0
    }

    fn pt(ra: f64, dec: f64) -> Entry { point_entry(0, 0, Vec3::from_radec(ra, dec), 0.0).0 }

    const ONE_ARCSEC_COS: f64 = 0.999_999_999_988_248_2;

    #[test]
    fn point_in_square() {
        let e = square(9.0, -1.0, 11.0, 1.0);
        assert!(point_in_polygon(Vec3::from_radec(10.0, 0.0), &e.corners));
        assert!(point_in_polygon(Vec3::from_radec(10.9, 0.9), &e.corners));
        assert!(!point_in_polygon(Vec3::from_radec(12.0, 0.0), &e.corners));
        assert!(!point_in_polygon(Vec3::from_radec(190.0, 0.0), &e.corners));
    }

    #[test]
    fn winding_does_not_change_containment() {
        let e = square(9.0, -1.0, 11.0, 1.0);
        let c = e.corners;
        let rewound = canonical_winding([c[0], c[3], c[2], c[1]], e.center);
        for &(ra, dec) in &[(10.0, 0.0), (12.0, 0.0), (9.5, 0.99), (10.0, -1.5)] {
            let p = Vec3::from_radec(ra, dec);
            assert_eq!(point_in_polygon(p, &c), point_in_polygon(p, &rewound));
        }
    }

    #[test]
    fn point_region_against_points_uses_match_radius() {
        let e = pt(10.0, 0.0);
        assert!(overlaps(&SearchRegion::point(10.0, 0.5 / 3600.0), &e, ONE_ARCSEC_COS));
        assert!(!overlaps(&SearchRegion::point(10.0, 2.0 / 3600.0), &e, ONE_ARCSEC_COS));
        let wide = (3.0 / 3600.0 * DTR).cos();
        assert!(overlaps(&SearchRegion::TableRow(Vec3::from_radec(10.0, 2.0 / 3600.0)), &e, wide));
    }

    #[test]
    fn cone_against_square() {
        let e = square(9.0, -1.0, 11.0, 1.0);
        // center inside
        assert!(overlaps(&SearchRegion::cone(10.0, 0.0, 0.01), &e, 1.0));
        // square edge just within reach, no corner or center inside the cone
        assert!(overlaps(&SearchRegion::cone(12.0, 0.0, 1.1), &e, 1.0));
        assert!(!overlaps(&SearchRegion::cone(12.0, 0.0, 0.9), &e, 1.0));
        // corner inside the cone
        assert!(overlaps(&SearchRegion::cone(11.5, 1.5, 0.8), &e, 1.0));
        assert!(!overlaps(&SearchRegion::cone(50.0, 50.0, 2.0), &e, 1.0));
    }

    #[test]
    fn cone_against_point() {
        let e = pt(10.0, 0.0);
        assert!(overlaps(&SearchRegion::cone(10.0, 1.0, 1.5), &e, 1.0));
        assert!(!overlaps(&SearchRegion::cone(10.0, 1.0, 0.5), &e, 1.0));
    }

    #[test]
    fn box_against_square() {
        let e = square(9.0, -1.0, 11.0, 1.0);
        let inner = SearchRegion::sky_box([(9.5, -0.5), (10.5, -0.5), (10.5, 0.5), (9.5, 0.5)]);
        assert!(overlaps(&inner, &e, 1.0));

        let same = SearchRegion::sky_box([(9.0, -1.0), (11.0, -1.0), (11.0, 1.0), (9.0, 1.0)]);
        assert!(overlaps(&same, &e, 1.0));

        // a strip across one side: no corner or center of either inside the other
        let strip = SearchRegion::sky_box([(8.0, 0.5), (16.0, 0.5), (16.0, 0.7), (8.0, 0.7)]);
        assert!(overlaps(&strip, &e, 1.0));

        // enclosing box, reversed winding
        let outer = SearchRegion::sky_box([(5.0, -5.0), (5.0, 5.0), (15.0, 5.0), (15.0, -5.0)]);
        assert!(overlaps(&outer, &e, 1.0));

        let far = SearchRegion::sky_box([(20.0, -1.0), (22.0, -1.0), (22.0, 1.0), (20.0, 1.0)]);
        assert!(!overlaps(&far, &e, 1.0));
    }

    #[test]
    fn box_against_point() {
        let b = SearchRegion::sky_box([(9.0, -1.0), (11.0, -1.0), (11.0, 1.0), (9.0, 1.0)]);
        assert!(overlaps(&b, &pt(10.0, 0.5), 1.0));
        assert!(!overlaps(&b, &pt(12.0, 0.5), 1.0));
    }

    #[test]
    fn segment_classification() {
        let v = |ra, dec| Vec3::from_radec(ra, dec);
        assert_eq!(segment_intersection(v(0.0, 0.0), v(2.0, 0.0), v(1.0, -1.0), v(1.0, 1.0)), Intersection::Normal);
        assert_eq!(segment_intersection(v(0.0, 0.0), v(2.0, 0.0), v(3.0, -1.0), v(3.0, 1.0)), Intersection::None);
        // shared endpoint
        let a = v(0.0, 0.0);
        assert_eq!(segment_intersection(a, v(2.0, 0.0), a, v(0.0, 2.0)), Intersection::EndpointOnly);
        // same great circle, overlapping arcs
        assert_eq!(segment_intersection(v(0.0, 0.0), v(2.0, 0.0), v(1.0, 0.0), v(3.0, 0.0)), Intersection::Colinear);
        assert_eq!(segment_intersection(v(0.0, 0.0), v(1.0, 0.0), v(2.0, 0.0), v(3.0, 0.0)), Intersection::None);
    }

    #[test]
    fn query_boxes_contain_their_regions() {
        let cfg = SearchConfig::default();
        let cone = SearchRegion::cone(10.0, 30.0, 2.0);
        let qb = cone.query_box(&cfg, 0.0);
        for k in 0..36 {
            let pa = k as f64 * 10.0 * DTR;
            let p = Vec3::from_radec(10.0 + 2.0 * pa.cos() / (30.0 * DTR).cos(), 30.0 + 2.0 * pa.sin());
            if overlaps(&cone, &pt_at(p), 1.0) {
                assert!(qb.contains_point(p));
            }
        }
        assert!(qb.contains_point(Vec3::from_radec(10.0, 30.0)));

        let b = SearchRegion::sky_box([(9.0, -1.0), (11.0, -1.0), (11.0, 1.0), (9.0, 1.0)]);
        let bb = b.query_box(&cfg, 0.0);
        assert!(bb.contains_point(Vec3::from_radec(10.0, -1.0)));
        assert!(bb.contains_point(Vec3::from_radec(10.0, 0.0)));
    }

    #[test]
    fn cones_wider_than_a_hemisphere_keep_their_candidates() {
        let cfg = SearchConfig::default();
        let cone = SearchRegion::cone(0.0, 90.0, 120.0);
        let qb = cone.query_box(&cfg, 0.0);
        for &(ra, dec) in &[(10.0, 0.0), (0.0, 89.0), (90.0, 0.0), (200.0, -25.0)] {
            let p = Vec3::from_radec(ra, dec);
            assert!(overlaps(&cone, &pt_at(p), 1.0), "({ra}, {dec}) outside the cone");
            assert!(qb.contains_point(p), "({ra}, {dec}) outside the query box");
        }
        assert!(!overlaps(&cone, &pt(0.0, -45.0), 1.0));
    }

    fn pt_at(p: Vec3) -> Entry { point_entry(0, 0, p, 0.0).0 }
}
