//! Content-addressable cache for clustering and graph artifacts.
//!
//! Artifacts are keyed by a seahash over the canonical JSON rendering
//! of the producing parameters. `serde_json::Value` keeps object keys
//! sorted, so two parameter sets that differ only in field order hash
//! identically. The store is append-only: a failed computation writes
//! nothing, and the only sanctioned in-place mutation is the
//! weight-only graph update.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cluster::ClusterOutput;
use crate::error::FairwayError;
use crate::graph::{self, VisibilityGraph};
use crate::models::{ClusteringConfig, EdgeWeightConfig, GraphConfig, HullType, Position};

/// Seahash over the canonical sorted-key JSON rendering of a value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, FairwayError> {
    let json = serde_json::to_value(value)
        .map_err(|e| FairwayError::InvalidConfig(format!("parameter hashing failed: {e}")))?;
    Ok(seahash::hash(json.to_string().as_bytes()))
}

/// Fingerprint of a position dataset, stable across identical row
/// sequences.
pub fn dataset_fingerprint(positions: &[Position]) -> Result<u64, FairwayError> {
    let json = serde_json::to_value(positions)
        .map_err(|e| FairwayError::InvalidDataset(format!("dataset fingerprinting failed: {e}")))?;
    Ok(seahash::hash(json.to_string().as_bytes()))
}

/// Cluster cache key. `hull_type` is deliberately absent: it only
/// shapes lane polygons downstream, so it must not fragment the
/// cluster cache.
#[derive(Debug, Serialize)]
pub struct ClusterKey {
    pub dataset: u64,
    pub weight_distance: f64,
    pub weight_speed: f64,
    pub weight_course: f64,
    pub eps: f64,
    pub min_samples: usize,
    pub metric_degree: f64,
}

impl ClusterKey {
    pub fn new(dataset: u64, cfg: &ClusteringConfig) -> Self {
        ClusterKey {
            dataset,
            weight_distance: cfg.weight_distance,
            weight_speed: cfg.weight_speed,
            weight_course: cfg.weight_course,
            eps: cfg.eps,
            min_samples: cfg.min_samples,
            metric_degree: cfg.metric_degree,
        }
    }
}

/// Graph cache key: structural parameters only. The cost weights and
/// the search algorithm never change topology, so they are excluded;
/// a weight change on a cached graph goes through the recompute path
/// instead of a rebuild.
#[derive(Debug, Serialize)]
pub struct GraphKey {
    pub dataset: u64,
    pub cluster_hash: u64,
    pub hull_type: HullType,
    pub points_inside: bool,
    pub distance_delta: f64,
    pub angle_of_vision: f64,
}

impl GraphKey {
    pub fn new(dataset: u64, cluster_hash: u64, hull_type: HullType, cfg: &GraphConfig) -> Self {
        GraphKey {
            dataset,
            cluster_hash,
            hull_type,
            points_inside: cfg.points_inside,
            distance_delta: cfg.distance_delta,
            angle_of_vision: cfg.angle_of_vision,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterArtifact {
    pub id: u64,
    pub output: ClusterOutput,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct GraphArtifact {
    pub id: u64,
    pub graph: VisibilityGraph,
    /// Weight parameters the stored edge weights were derived with.
    pub weights: EdgeWeightConfig,
    pub cluster_hash: u64,
    pub dataset: u64,
    pub created_at: DateTime<Utc>,
}

impl GraphArtifact {
    /// The one sanctioned in-place mutation: re-derive every edge
    /// weight under new parameters and record them. Topology and the
    /// stored per-edge metrics never change.
    pub fn update_edge_weights(&mut self, weights: &EdgeWeightConfig) {
        graph::recompute_weights(&mut self.graph, weights);
        self.weights = *weights;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ArtifactKind {
    Cluster,
    Graph,
}

/// In-memory artifact store shared across queries.
#[derive(Default)]
pub struct ArtifactCache {
    clusters: DashMap<u64, Arc<ClusterArtifact>>,
    graphs: DashMap<u64, Arc<Mutex<GraphArtifact>>>,
    inflight: DashMap<(ArtifactKind, u64), Arc<Mutex<()>>>,
    next_id: AtomicU64,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn flight_gate(&self, kind: ArtifactKind, hash: u64) -> Arc<Mutex<()>> {
        self.inflight
            .entry((kind, hash))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch the cluster artifact for `hash`, computing and storing it
    /// on a miss. At most one computation runs per hash; concurrent
    /// callers for the same hash block and then read the stored value.
    /// The bool is true on a cache hit.
    pub fn get_or_compute_cluster<F>(
        &self,
        hash: u64,
        compute: F,
    ) -> Result<(Arc<ClusterArtifact>, bool), FairwayError>
    where
        F: FnOnce() -> Result<ClusterOutput, FairwayError>,
    {
        if let Some(hit) = self.clusters.get(&hash) {
            return Ok((hit.clone(), true));
        }
        let gate = self.flight_gate(ArtifactKind::Cluster, hash);
        let _guard = lock_ignoring_poison(&gate);
        if let Some(hit) = self.clusters.get(&hash) {
            return Ok((hit.clone(), true));
        }
        let output = compute()?;
        let artifact = Arc::new(ClusterArtifact {
            id: self.next_id(),
            output,
            created_at: Utc::now(),
        });
        self.clusters.insert(hash, artifact.clone());
        tracing::debug!(hash, id = artifact.id, "cluster artifact stored");
        Ok((artifact, false))
    }

    /// Graph counterpart of [`get_or_compute_cluster`]. Graph
    /// artifacts sit behind a mutex because queries splice transient
    /// endpoint state into the shared topology.
    ///
    /// [`get_or_compute_cluster`]: ArtifactCache::get_or_compute_cluster
    pub fn get_or_compute_graph<F>(
        &self,
        hash: u64,
        compute: F,
    ) -> Result<(Arc<Mutex<GraphArtifact>>, bool), FairwayError>
    where
        F: FnOnce(u64) -> Result<GraphArtifact, FairwayError>,
    {
        if let Some(hit) = self.graphs.get(&hash) {
            return Ok((hit.clone(), true));
        }
        let gate = self.flight_gate(ArtifactKind::Graph, hash);
        let _guard = lock_ignoring_poison(&gate);
        if let Some(hit) = self.graphs.get(&hash) {
            return Ok((hit.clone(), true));
        }
        let artifact = compute(self.next_id())?;
        let id = artifact.id;
        let entry = Arc::new(Mutex::new(artifact));
        self.graphs.insert(hash, entry.clone());
        tracing::debug!(hash, id, "graph artifact stored");
        Ok((entry, false))
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }
}

/// Lock a graph artifact for a query.
pub fn lock_graph(entry: &Arc<Mutex<GraphArtifact>>) -> MutexGuard<'_, GraphArtifact> {
    lock_ignoring_poison(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchAlgorithm;
    use std::sync::atomic::AtomicUsize;

    fn clustering_config(hull_type: HullType) -> ClusteringConfig {
        ClusteringConfig {
            weight_distance: 1.0,
            weight_speed: 1.0,
            weight_course: 1.0,
            eps: 0.4,
            min_samples: 10,
            metric_degree: 2.0,
            hull_type,
        }
    }

    fn graph_config(weight_time: f64, algorithm: SearchAlgorithm) -> GraphConfig {
        GraphConfig {
            points_inside: false,
            distance_delta: 100.0,
            angle_of_vision: 30.0,
            weight_time_graph: weight_time,
            weight_course_graph: 1.0,
            weight_func_degree: 2.0,
            search_algorithm: algorithm,
        }
    }

    fn empty_output() -> ClusterOutput {
        ClusterOutput {
            labels: Vec::new(),
            assignments: Vec::new(),
            stats: Vec::new(),
        }
    }

    #[test]
    fn hull_type_does_not_change_cluster_hash() {
        let a = ClusterKey::new(7, &clustering_config(HullType::ConvexHull));
        let b = ClusterKey::new(7, &clustering_config(HullType::ConcaveHull));
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn eps_changes_cluster_hash() {
        let a = ClusterKey::new(7, &clustering_config(HullType::ConvexHull));
        let mut cfg = clustering_config(HullType::ConvexHull);
        cfg.eps = 0.5;
        let b = ClusterKey::new(7, &cfg);
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn weights_and_algorithm_do_not_change_graph_hash() {
        let a = GraphKey::new(
            7,
            11,
            HullType::ConvexHull,
            &graph_config(1.0, SearchAlgorithm::Dijkstra),
        );
        let b = GraphKey::new(
            7,
            11,
            HullType::ConvexHull,
            &graph_config(5.0, SearchAlgorithm::AStar),
        );
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn structural_parameters_change_graph_hash() {
        let base = graph_config(1.0, SearchAlgorithm::Dijkstra);
        let a = GraphKey::new(7, 11, HullType::ConvexHull, &base);
        let mut wider = graph_config(1.0, SearchAlgorithm::Dijkstra);
        wider.distance_delta = 200.0;
        let b = GraphKey::new(7, 11, HullType::ConvexHull, &wider);
        let c = GraphKey::new(7, 11, HullType::ConcaveHull, &base);
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&c).unwrap());
    }

    #[test]
    fn dataset_fingerprint_is_order_sensitive() {
        let a = Position {
            id: 1,
            lat: 0.0,
            lon: 0.0,
            speed: 10.0,
            course: 90.0,
        };
        let b = Position {
            id: 2,
            lat: 1.0,
            lon: 1.0,
            speed: 12.0,
            course: 180.0,
        };
        let ab = dataset_fingerprint(&[a.clone(), b.clone()]).unwrap();
        let ba = dataset_fingerprint(&[b, a]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn second_lookup_reuses_stored_artifact() {
        let cache = ArtifactCache::new();
        let (first, reused) = cache
            .get_or_compute_cluster(42, || Ok(empty_output()))
            .unwrap();
        assert!(!reused);
        let (second, reused) = cache
            .get_or_compute_cluster(42, || panic!("must not recompute"))
            .unwrap();
        assert!(reused);
        assert_eq!(first.id, second.id);
        assert_eq!(cache.cluster_count(), 1);
    }

    #[test]
    fn failed_computation_writes_nothing() {
        let cache = ArtifactCache::new();
        let err = cache.get_or_compute_cluster(42, || {
            Err(FairwayError::InvalidDataset("boom".to_string()))
        });
        assert!(err.is_err());
        assert_eq!(cache.cluster_count(), 0);
        // A later attempt computes fresh.
        let (_, reused) = cache
            .get_or_compute_cluster(42, || Ok(empty_output()))
            .unwrap();
        assert!(!reused);
    }

    #[test]
    fn concurrent_lookups_compute_once() {
        let cache = ArtifactCache::new();
        let computed = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    cache
                        .get_or_compute_cluster(42, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(empty_output())
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cluster_count(), 1);
    }

    #[test]
    fn artifact_ids_are_unique() {
        let cache = ArtifactCache::new();
        let (a, _) = cache
            .get_or_compute_cluster(1, || Ok(empty_output()))
            .unwrap();
        let (b, _) = cache
            .get_or_compute_cluster(2, || Ok(empty_output()))
            .unwrap();
        assert_ne!(a.id, b.id);
    }
}
