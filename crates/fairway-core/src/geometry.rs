//! Geometry adapter over the `geo` crate.
//!
//! Everything here works in the projected plane (web-mercator meters).
//! The rest of the crate goes through these helpers instead of calling
//! `geo` directly, so hull construction, intersection flattening and
//! containment tolerances live in one place.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::line_measures::Distance;
use geo::{
    Area, BooleanOps, Closest, ClosestPoint, ConcaveHull, ConvexHull, Coord, Euclidean, Geometry,
    LineString, MultiPoint, Point, Polygon,
};

use crate::models::HullType;
use crate::spatial::Projected;

/// Concavity parameter for concave hulls. Larger values approach the
/// convex hull; this matches the shape factor used for lane outlines.
const CONCAVITY: f64 = 0.5;

/// Containment tolerance in meters. Waypoints are placed on polygon
/// boundaries by arc-length interpolation, so exact `contains` checks
/// miss them by float error.
pub const CONTAINMENT_EPS_M: f64 = 1e-3;

/// Interior sample count for the segment-inside-polygon test.
const SEGMENT_SAMPLES: usize = 16;

pub fn to_point(p: Projected) -> Point<f64> {
    Point::new(p.x, p.y)
}

pub fn to_projected(p: Point<f64>) -> Projected {
    Projected { x: p.x(), y: p.y() }
}

/// One connected piece of a pairwise lane intersection.
#[derive(Debug, Clone)]
pub enum IntersectionPart {
    Point(Point<f64>),
    Line(LineString<f64>),
    Region(Polygon<f64>),
}

/// Build the boundary hull of a point set. Returns `None` when the
/// points do not reduce to a positive-area polygon (fewer than three
/// distinct vertices, or all collinear).
pub fn build_hull(points: &[Projected], hull_type: HullType) -> Option<Polygon<f64>> {
    if points.len() < 3 {
        return None;
    }
    let multi: MultiPoint<f64> = points
        .iter()
        .map(|p| Point::new(p.x, p.y))
        .collect::<Vec<_>>()
        .into();
    let hull = match hull_type {
        HullType::ConvexHull => multi.convex_hull(),
        HullType::ConcaveHull => multi.concave_hull(CONCAVITY),
    };
    // A closed ring needs at least 4 coords (first == last).
    if hull.exterior().0.len() < 4 || hull.unsigned_area() <= 0.0 {
        return None;
    }
    Some(hull)
}

/// Recursively flatten a geometry into intersection parts, descending
/// into collections and multi-geometries. Rectangles and triangles are
/// converted to polygons; empty pieces are skipped.
fn flatten_geometry(geom: Geometry<f64>, out: &mut Vec<IntersectionPart>) {
    match geom {
        Geometry::Point(p) => out.push(IntersectionPart::Point(p)),
        Geometry::Line(l) => out.push(IntersectionPart::Line(LineString::from(vec![
            l.start, l.end,
        ]))),
        Geometry::LineString(ls) => {
            if ls.0.len() >= 2 {
                out.push(IntersectionPart::Line(ls));
            } else if let Some(&c) = ls.0.first() {
                out.push(IntersectionPart::Point(Point::from(c)));
            }
        }
        Geometry::Polygon(p) => {
            if p.unsigned_area() > 0.0 {
                out.push(IntersectionPart::Region(p));
            }
        }
        Geometry::MultiPoint(mp) => {
            for p in mp {
                flatten_geometry(Geometry::Point(p), out);
            }
        }
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                flatten_geometry(Geometry::LineString(ls), out);
            }
        }
        Geometry::MultiPolygon(mp) => {
            for p in mp {
                flatten_geometry(Geometry::Polygon(p), out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                flatten_geometry(g, out);
            }
        }
        Geometry::Rect(r) => flatten_geometry(Geometry::Polygon(r.to_polygon()), out),
        Geometry::Triangle(t) => flatten_geometry(Geometry::Polygon(t.to_polygon()), out),
    }
}

/// Pairwise polygon intersection, flattened into parts.
///
/// Boolean ops only report area overlaps; when two hulls touch along a
/// boundary without overlapping, the contact points are recovered from
/// pairwise exterior-segment intersections.
pub fn intersect_polygons(a: &Polygon<f64>, b: &Polygon<f64>) -> Vec<IntersectionPart> {
    let mut parts = Vec::new();
    let overlap = a.intersection(b);
    flatten_geometry(Geometry::MultiPolygon(overlap), &mut parts);
    if parts.is_empty() {
        boundary_touch(a, b, &mut parts);
    }
    parts
}

fn boundary_touch(a: &Polygon<f64>, b: &Polygon<f64>, out: &mut Vec<IntersectionPart>) {
    let mut seen: Vec<(i64, i64)> = Vec::new();
    for sa in a.exterior().lines() {
        for sb in b.exterior().lines() {
            match line_intersection(sa, sb) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    let key = round_key(intersection);
                    if !seen.contains(&key) {
                        seen.push(key);
                        out.push(IntersectionPart::Point(Point::from(intersection)));
                    }
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    out.push(IntersectionPart::Line(LineString::from(vec![
                        intersection.start,
                        intersection.end,
                    ])));
                }
                None => {}
            }
        }
    }
}

fn round_key(c: Coord<f64>) -> (i64, i64) {
    ((c.x * 1000.0).round() as i64, (c.y * 1000.0).round() as i64)
}

/// Point-in-polygon with a boundary tolerance.
pub fn covers(poly: &Polygon<f64>, p: Projected) -> bool {
    let point = to_point(p);
    use geo::Intersects;
    poly.intersects(&point) || Euclidean.distance(&point, poly) <= CONTAINMENT_EPS_M
}

/// Whether the straight segment from `a` to `b` stays inside `poly`,
/// tested by sampling interior points. Endpoints are assumed covered.
pub fn segment_inside(poly: &Polygon<f64>, a: Projected, b: Projected) -> bool {
    for i in 1..SEGMENT_SAMPLES {
        let t = i as f64 / SEGMENT_SAMPLES as f64;
        let sample = Projected {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        };
        if !covers(poly, sample) {
            return false;
        }
    }
    true
}

/// Nearest point on any polygon boundary to `p`, with its distance in
/// meters. `None` when no polygons exist.
pub fn nearest_boundary_point(polys: &[&Polygon<f64>], p: Projected) -> Option<(Projected, f64)> {
    let point = to_point(p);
    let mut best: Option<(Projected, f64)> = None;
    for poly in polys {
        let candidate = match poly.exterior().closest_point(&point) {
            Closest::Intersection(c) | Closest::SinglePoint(c) => c,
            Closest::Indeterminate => continue,
        };
        let dist = Euclidean.distance(&point, &candidate);
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((to_projected(candidate), dist));
        }
    }
    best
}

/// Waypoints along the boundary of an intersection part, spaced every
/// `delta` meters of arc length. Points yield themselves; the first
/// vertex seeds the walk, so even a part shorter than `delta` produces
/// a waypoint.
pub fn boundary_waypoints(part: &IntersectionPart, delta: f64) -> Vec<Projected> {
    match part {
        IntersectionPart::Point(p) => vec![to_projected(*p)],
        IntersectionPart::Line(ls) => walk_line(&ls.0, delta, false),
        IntersectionPart::Region(poly) => walk_line(&poly.exterior().0, delta, true),
    }
}

fn walk_line(coords: &[Coord<f64>], delta: f64, closed: bool) -> Vec<Projected> {
    let mut out = Vec::new();
    if coords.is_empty() {
        return out;
    }
    out.push(Projected {
        x: coords[0].x,
        y: coords[0].y,
    });
    // Arc length still to cover before the next waypoint.
    let mut need = delta;
    for seg in coords.windows(2) {
        let (s, e) = (seg[0], seg[1]);
        let len = ((e.x - s.x).powi(2) + (e.y - s.y).powi(2)).sqrt();
        if len == 0.0 {
            continue;
        }
        let mut offset = 0.0;
        while need <= len - offset {
            offset += need;
            let t = offset / len;
            out.push(Projected {
                x: s.x + (e.x - s.x) * t,
                y: s.y + (e.y - s.y) * t,
            });
            need = delta;
        }
        need -= len - offset;
    }
    if closed {
        // The walk may land back on the start vertex exactly.
        if out.len() > 1 {
            let (first, last) = (out[0], out[out.len() - 1]);
            if (first.x - last.x).abs() < 1e-9 && (first.y - last.y).abs() < 1e-9 {
                out.pop();
            }
        }
    } else if let Some(&last) = coords.last() {
        let tail = Projected {
            x: last.x,
            y: last.y,
        };
        let prev = out[out.len() - 1];
        if (prev.x - tail.x).abs() > 1e-9 || (prev.y - tail.y).abs() > 1e-9 {
            out.push(tail);
        }
    }
    out
}

/// Regular grid of points inside a region, spaced `delta` meters.
pub fn interior_grid(poly: &Polygon<f64>, delta: f64) -> Vec<Projected> {
    use geo::BoundingRect;
    let Some(rect) = poly.bounding_rect() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut y = rect.min().y + delta;
    while y < rect.max().y {
        let mut x = rect.min().x + delta;
        while x < rect.max().x {
            let p = Projected { x, y };
            if covers(poly, p) {
                out.push(p);
            }
            x += delta;
        }
        y += delta;
    }
    out
}
