//! Traffic-lane discovery and route planning over historical vessel
//! positions.
//!
//! The pipeline clusters positions into lanes, reduces each lane to a
//! boundary polygon, builds a directed visibility graph over lane
//! intersections and plans minimum-weight routes through it. The two
//! expensive stages (clustering and graph construction) are memoized
//! in a content-addressable artifact cache.

pub mod cache;
pub mod cluster;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod lanes;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod spatial;

pub use error::{FairwayError, NoPathReason};
pub use models::{
    ClusteringConfig, EdgeWeightConfig, GraphConfig, HullType, Position, RouteSummary,
    SearchAlgorithm,
};
pub use pipeline::LanePlanner;
