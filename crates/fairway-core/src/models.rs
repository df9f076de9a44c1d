//! Core data models for the fairway pipeline.

use crate::error::FairwayError;
use serde::{Deserialize, Serialize};

/// Cluster id assigned to positions too sparse to join any lane.
pub const NOISE_CLUSTER: i64 = -1;

/// A single historical vessel position. Immutable once ingested; owned
/// by the external position store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground in knots.
    pub speed: f64,
    /// Course over ground in degrees, clockwise from north.
    pub course: f64,
}

/// Cluster membership for one position. `cluster_num == NOISE_CLUSTER`
/// marks noise, which is excluded from all lane processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub position_id: i64,
    pub cluster_num: i64,
}

/// Per-lane characteristic values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LaneStats {
    pub cluster_num: i64,
    /// Mean speed over the lane's members, in knots.
    pub avg_speed: f64,
    /// Circular mean of member courses, normalized to [0, 360).
    pub avg_course: f64,
}

/// Boundary polygon construction method for a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HullType {
    ConvexHull,
    ConcaveHull,
}

/// Shortest-path algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchAlgorithm {
    Dijkstra,
    #[serde(rename = "A*")]
    AStar,
}

/// Clustering stage configuration. Constructed once per request and
/// never mutated mid-pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    pub weight_distance: f64,
    pub weight_speed: f64,
    pub weight_course: f64,
    pub eps: f64,
    pub min_samples: usize,
    pub metric_degree: f64,
    pub hull_type: HullType,
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), FairwayError> {
        for (name, value) in [
            ("weight_distance", self.weight_distance),
            ("weight_speed", self.weight_speed),
            ("weight_course", self.weight_course),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FairwayError::InvalidConfig(format!(
                    "{name} must be a finite value >= 0, got {value}"
                )));
            }
        }
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(FairwayError::InvalidConfig(format!(
                "eps must be > 0, got {}",
                self.eps
            )));
        }
        if self.min_samples < 1 {
            return Err(FairwayError::InvalidConfig(
                "min_samples must be >= 1".to_string(),
            ));
        }
        if !self.metric_degree.is_finite() || self.metric_degree <= 0.0 {
            return Err(FairwayError::InvalidConfig(format!(
                "metric_degree must be > 0, got {}",
                self.metric_degree
            )));
        }
        Ok(())
    }
}

/// Cost-weight parameters of the edge weight function. The only fields
/// a stored graph may be updated with in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeWeightConfig {
    pub weight_time: f64,
    pub weight_course: f64,
    pub weight_func_degree: f64,
}

/// Graph stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Scatter a regular grid of extra waypoints inside intersection
    /// regions in addition to the boundary waypoints.
    pub points_inside: bool,
    /// Waypoint spacing along intersection boundaries, meters in the
    /// projected plane.
    pub distance_delta: f64,
    /// Full cone width in degrees.
    pub angle_of_vision: f64,
    pub weight_time_graph: f64,
    pub weight_course_graph: f64,
    pub weight_func_degree: f64,
    pub search_algorithm: SearchAlgorithm,
}

impl GraphConfig {
    pub fn validate(&self) -> Result<(), FairwayError> {
        if !self.distance_delta.is_finite() || self.distance_delta <= 0.0 {
            return Err(FairwayError::InvalidConfig(format!(
                "distance_delta must be > 0, got {}",
                self.distance_delta
            )));
        }
        if !self.angle_of_vision.is_finite()
            || self.angle_of_vision <= 0.0
            || self.angle_of_vision > 360.0
        {
            return Err(FairwayError::InvalidConfig(format!(
                "angle_of_vision must be in (0, 360], got {}",
                self.angle_of_vision
            )));
        }
        for (name, value) in [
            ("weight_time_graph", self.weight_time_graph),
            ("weight_course_graph", self.weight_course_graph),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FairwayError::InvalidConfig(format!(
                    "{name} must be a finite value >= 0, got {value}"
                )));
            }
        }
        if !self.weight_func_degree.is_finite() || self.weight_func_degree <= 0.0 {
            return Err(FairwayError::InvalidConfig(format!(
                "weight_func_degree must be > 0, got {}",
                self.weight_func_degree
            )));
        }
        Ok(())
    }

    /// The cost-weight subset of this configuration.
    pub fn weights(&self) -> EdgeWeightConfig {
        EdgeWeightConfig {
            weight_time: self.weight_time_graph,
            weight_course: self.weight_course_graph,
            weight_func_degree: self.weight_func_degree,
        }
    }
}

/// Vertex row exported for persistence/presentation collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VertexRecord {
    pub vertex_id: u32,
    pub lat: f64,
    pub lon: f64,
}

/// Edge row exported for persistence/presentation collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub start_vertex_id: u32,
    pub end_vertex_id: u32,
    pub distance_nm: f64,
    /// Lane mean speed divided by 10; anchor edges carry their assumed
    /// transit speed literally.
    pub speed: f64,
    pub angle_deviation: f64,
    pub weight: f64,
    /// Source lane's cluster id, or `ANCHOR_TAG` for anchor edges.
    pub color_tag: i64,
}

/// A successfully planned route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    /// Ordered (lat, lon) waypoints, including the raw endpoints.
    pub waypoints: Vec<(f64, f64)>,
    pub total_distance_nm: f64,
    pub total_time_hours: f64,
    pub mean_deviation_deg: f64,
    pub segment_distances_nm: Vec<f64>,
    pub segment_speeds: Vec<f64>,
    pub segment_deviations: Vec<f64>,
    pub total_weight: f64,
    pub nodes_visited: usize,
    /// Artifact id of the graph the search ran over.
    pub graph_artifact_id: u64,
    /// False when the graph topology was built for this request.
    pub graph_reused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustering_config() -> ClusteringConfig {
        ClusteringConfig {
            weight_distance: 1.0,
            weight_speed: 1.0,
            weight_course: 1.0,
            eps: 0.4,
            min_samples: 10,
            metric_degree: 2.0,
            hull_type: HullType::ConvexHull,
        }
    }

    #[test]
    fn clustering_config_rejects_bad_eps() {
        let mut cfg = clustering_config();
        cfg.eps = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn graph_config_rejects_unknown_fields() {
        let raw = r#"{
            "points_inside": false,
            "distance_delta": 100.0,
            "angle_of_vision": 30.0,
            "weight_time_graph": 1.0,
            "weight_course_graph": 1.0,
            "weight_func_degree": 2.0,
            "search_algorithm": "Dijkstra",
            "bogus": 1
        }"#;
        assert!(serde_json::from_str::<GraphConfig>(raw).is_err());
    }

    #[test]
    fn search_algorithm_round_trips_a_star_name() {
        let json = serde_json::to_string(&SearchAlgorithm::AStar).unwrap();
        assert_eq!(json, "\"A*\"");
        let parsed: SearchAlgorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SearchAlgorithm::AStar);
    }
}
