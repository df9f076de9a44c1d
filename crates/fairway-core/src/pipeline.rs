//! End-to-end orchestration: cluster, build lanes, build or reuse the
//! graph, then search. Each stage takes its own immutable config; the
//! cache sits around the two expensive stages.

use std::sync::Arc;

use crate::cache::{
    canonical_hash, dataset_fingerprint, lock_graph, ArtifactCache, ClusterArtifact, ClusterKey,
    GraphArtifact, GraphKey,
};
use crate::cluster::cluster_positions;
use crate::error::FairwayError;
use crate::graph::build_graph;
use crate::lanes::{build_lanes, LaneSet};
use crate::models::{ClusteringConfig, EdgeWeightConfig, GraphConfig, Position, RouteSummary};
use crate::planner::plan_route;

#[derive(Default)]
pub struct LanePlanner {
    cache: ArtifactCache,
}

/// Outcome of the clustering stage, with its cache coordinates.
#[derive(Debug)]
pub struct ClusterStage {
    pub artifact: Arc<ClusterArtifact>,
    pub hash: u64,
    pub dataset: u64,
    pub reused: bool,
}

impl LanePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Run (or reuse) clustering for a dataset and config.
    pub fn cluster(
        &self,
        positions: &[Position],
        cfg: &ClusteringConfig,
    ) -> Result<ClusterStage, FairwayError> {
        cfg.validate()?;
        let dataset = dataset_fingerprint(positions)?;
        let hash = canonical_hash(&ClusterKey::new(dataset, cfg))?;
        let (artifact, reused) = self
            .cache
            .get_or_compute_cluster(hash, || cluster_positions(positions, cfg))?;
        Ok(ClusterStage {
            artifact,
            hash,
            dataset,
            reused,
        })
    }

    /// Plan a route through the discovered lanes. Clustering and the
    /// graph topology come from the cache when parameters match; a
    /// cached graph carrying weights from an earlier request is
    /// refreshed in place before the search.
    pub fn plan(
        &self,
        positions: &[Position],
        clustering: &ClusteringConfig,
        graph_cfg: &GraphConfig,
        start: (f64, f64),
        end: (f64, f64),
    ) -> Result<RouteSummary, FairwayError> {
        graph_cfg.validate()?;
        let stage = self.cluster(positions, clustering)?;
        let lanes = build_lanes(positions, &stage.artifact.output, clustering.hull_type);

        let graph_hash = canonical_hash(&GraphKey::new(
            stage.dataset,
            stage.hash,
            clustering.hull_type,
            graph_cfg,
        ))?;
        let (entry, graph_reused) = self.cache.get_or_compute_graph(graph_hash, |id| {
            Ok(GraphArtifact {
                id,
                graph: build_graph(&lanes, graph_cfg),
                weights: graph_cfg.weights(),
                cluster_hash: stage.hash,
                dataset: stage.dataset,
                created_at: chrono::Utc::now(),
            })
        })?;

        let mut artifact = lock_graph(&entry);
        let requested = graph_cfg.weights();
        match check_weights(&artifact, &requested) {
            Ok(()) => {}
            Err(stale) => {
                tracing::debug!(%stale, id = artifact.id, "refreshing cached graph weights");
                artifact.update_edge_weights(&requested);
            }
        }

        let plan = plan_route(&mut artifact.graph, &lanes, graph_cfg, start, end)?;
        Ok(RouteSummary {
            waypoints: plan.waypoints,
            total_distance_nm: plan.total_distance_nm,
            total_time_hours: plan.total_time_hours,
            mean_deviation_deg: plan.mean_deviation_deg,
            segment_distances_nm: plan.segment_distances_nm,
            segment_speeds: plan.segment_speeds,
            segment_deviations: plan.segment_deviations,
            total_weight: plan.total_weight,
            nodes_visited: plan.nodes_visited,
            graph_artifact_id: artifact.id,
            graph_reused,
        })
    }

    /// Lane geometry for a clustered dataset, bypassing the planner.
    /// Used by callers that only want polygons and stats.
    pub fn lanes(
        &self,
        positions: &[Position],
        cfg: &ClusteringConfig,
    ) -> Result<LaneSet, FairwayError> {
        let stage = self.cluster(positions, cfg)?;
        Ok(build_lanes(positions, &stage.artifact.output, cfg.hull_type))
    }
}

fn check_weights(
    artifact: &GraphArtifact,
    requested: &EdgeWeightConfig,
) -> Result<(), FairwayError> {
    if artifact.weights != *requested {
        return Err(FairwayError::StaleWeights);
    }
    Ok(())
}
