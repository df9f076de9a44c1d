//! Lane geometry: hulls over cluster members and pairwise
//! intersections between lanes.

use geo::Polygon;

use crate::cluster::ClusterOutput;
use crate::error::FairwayError;
use crate::geometry::{self, IntersectionPart};
use crate::models::{HullType, LaneStats, Position, NOISE_CLUSTER};
use crate::spatial::{self, Projected};

/// One discovered traffic lane: its boundary polygon in the projected
/// plane plus the characteristic course/speed of its members.
#[derive(Debug, Clone)]
pub struct Lane {
    pub cluster_num: i64,
    pub stats: LaneStats,
    pub polygon: Polygon<f64>,
}

/// One connected piece of the intersection between two lanes. A lane
/// pair can touch in several disjoint places; `sub_index` numbers them.
#[derive(Debug, Clone)]
pub struct LaneIntersection {
    pub lanes: (i64, i64),
    pub sub_index: usize,
    pub part: IntersectionPart,
}

/// All lanes plus their pairwise intersections.
#[derive(Debug, Clone)]
pub struct LaneSet {
    pub hull_type: HullType,
    pub lanes: Vec<Lane>,
    pub intersections: Vec<LaneIntersection>,
}

impl LaneSet {
    pub fn lane(&self, cluster_num: i64) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.cluster_num == cluster_num)
    }

    pub fn polygons(&self) -> Vec<&Polygon<f64>> {
        self.lanes.iter().map(|l| &l.polygon).collect()
    }
}

/// Build lane polygons for every non-noise cluster and intersect them
/// pairwise. Clusters that do not reduce to a positive-area polygon
/// are dropped; route planning cannot use a lane without an interior.
pub fn build_lanes(
    positions: &[Position],
    clusters: &ClusterOutput,
    hull_type: HullType,
) -> LaneSet {
    let mut lanes = Vec::new();
    for stats in &clusters.stats {
        if stats.cluster_num == NOISE_CLUSTER {
            continue;
        }
        let members: Vec<Projected> = positions
            .iter()
            .zip(&clusters.labels)
            .filter(|(_, &label)| label == stats.cluster_num)
            .map(|(pos, _)| spatial::project(pos.lat, pos.lon))
            .collect();
        match geometry::build_hull(&members, hull_type) {
            Some(polygon) => lanes.push(Lane {
                cluster_num: stats.cluster_num,
                stats: *stats,
                polygon,
            }),
            None => {
                let dropped = FairwayError::DegenerateGeometry {
                    cluster_num: stats.cluster_num,
                };
                tracing::debug!(cluster = stats.cluster_num, %dropped, "dropping cluster");
            }
        }
    }

    let intersections = intersect_lanes(&lanes);
    tracing::info!(
        lanes = lanes.len(),
        intersections = intersections.len(),
        "lane geometry built"
    );
    LaneSet {
        hull_type,
        lanes,
        intersections,
    }
}

fn intersect_lanes(lanes: &[Lane]) -> Vec<LaneIntersection> {
    let mut out = Vec::new();
    for (i, a) in lanes.iter().enumerate() {
        for b in &lanes[i + 1..] {
            let parts = geometry::intersect_polygons(&a.polygon, &b.polygon);
            for (sub_index, part) in parts.into_iter().enumerate() {
                out.push(LaneIntersection {
                    lanes: (a.cluster_num, b.cluster_num),
                    sub_index,
                    part,
                });
            }
        }
    }
    out
}
