//! Error taxonomy for the lane-discovery and route-planning pipeline.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FairwayError {
    /// The position dataset is unusable (empty, or carries non-finite
    /// fields). Raised before any cache write.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// A stage configuration failed validation on read.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A cluster's member points do not reduce to a valid polygon.
    /// Absorbed by the lane builder (the cluster is dropped), never
    /// surfaced to callers.
    #[error("cluster {cluster_num} does not form a polygon")]
    DegenerateGeometry { cluster_num: i64 },

    /// No usable route between the requested endpoints. Carries the
    /// attempted endpoints so the caller can retry with different
    /// parameters.
    #[error("no route from ({start_lat}, {start_lon}) to ({end_lat}, {end_lon}): {reason}")]
    NoPathFound {
        start_lat: f64,
        start_lon: f64,
        end_lat: f64,
        end_lon: f64,
        reason: NoPathReason,
    },

    /// A cached graph's stored cost weights differ from the request.
    /// Recovered internally via the weight-only recompute path.
    #[error("cached graph weights are stale")]
    StaleWeights,
}

/// Why a path query produced no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPathReason {
    /// Start and end are the same coordinate.
    IdenticalEndpoints,
    /// The nearest lane boundary is farther than the anchor limit.
    AnchorTooFar,
    /// An endpoint's visit produced no edges (isolated anchor).
    IsolatedEndpoint,
    /// The search exhausted the graph without reaching the target.
    Disconnected,
}

impl std::fmt::Display for NoPathReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NoPathReason::IdenticalEndpoints => "start and end are identical",
            NoPathReason::AnchorTooFar => "endpoint is too far from every lane",
            NoPathReason::IsolatedEndpoint => "endpoint connects to no waypoint",
            NoPathReason::Disconnected => "graph is disconnected between endpoints",
        };
        f.write_str(text)
    }
}
