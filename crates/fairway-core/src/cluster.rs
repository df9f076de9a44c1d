//! Density-based lane clustering over historical positions.
//!
//! Positions are embedded as (lat, lon, speed, sin course, cos course),
//! standardized per column, and grouped with DBSCAN under a weighted
//! Minkowski metric. Course enters through its sine and cosine so that
//! headings of 359 and 1 degrees read as close.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::FairwayError;
use crate::models::{ClusterAssignment, ClusteringConfig, LaneStats, Position, NOISE_CLUSTER};
use crate::spatial::circular_mean_deg;

const UNVISITED: i64 = -2;
const FEATURES: usize = 5;

/// Result of one clustering run. `labels` is aligned with the input
/// position order; `assignments` and `stats` are the cache-persisted
/// views of the same data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOutput {
    pub labels: Vec<i64>,
    pub assignments: Vec<ClusterAssignment>,
    pub stats: Vec<LaneStats>,
}

impl ClusterOutput {
    pub fn cluster_count(&self) -> usize {
        self.stats.len()
    }
}

/// Cluster a position set. Deterministic for a fixed input order:
/// neighbor queries run in parallel but label expansion is sequential
/// and index-ordered.
pub fn cluster_positions(
    positions: &[Position],
    cfg: &ClusteringConfig,
) -> Result<ClusterOutput, FairwayError> {
    cfg.validate()?;
    validate_dataset(positions)?;

    let features = standardized_features(positions);
    let weights = metric_weights(cfg);
    let p = cfg.metric_degree;
    let n = positions.len();

    let neighbors: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| minkowski(&features[i], &features[j], &weights, p) <= cfg.eps)
                .collect()
        })
        .collect();

    let mut labels = vec![UNVISITED; n];
    let mut next_cluster: i64 = 0;
    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }
        // The point itself is in its own neighbor list.
        if neighbors[i].len() < cfg.min_samples {
            labels[i] = NOISE_CLUSTER;
            continue;
        }
        labels[i] = next_cluster;
        let mut queue: VecDeque<usize> = neighbors[i].iter().copied().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE_CLUSTER {
                labels[j] = next_cluster;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = next_cluster;
            if neighbors[j].len() >= cfg.min_samples {
                queue.extend(neighbors[j].iter().copied());
            }
        }
        next_cluster += 1;
    }

    let assignments = positions
        .iter()
        .zip(&labels)
        .map(|(pos, &cluster_num)| ClusterAssignment {
            position_id: pos.id,
            cluster_num,
        })
        .collect();
    let stats = lane_stats(positions, &labels, next_cluster);

    tracing::info!(
        positions = n,
        clusters = next_cluster,
        noise = labels.iter().filter(|&&l| l == NOISE_CLUSTER).count(),
        "clustering complete"
    );

    Ok(ClusterOutput {
        labels,
        assignments,
        stats,
    })
}

fn validate_dataset(positions: &[Position]) -> Result<(), FairwayError> {
    if positions.is_empty() {
        return Err(FairwayError::InvalidDataset(
            "position set is empty".to_string(),
        ));
    }
    for pos in positions {
        let fields = [pos.lat, pos.lon, pos.speed, pos.course];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(FairwayError::InvalidDataset(format!(
                "position {} has non-finite fields",
                pos.id
            )));
        }
    }
    Ok(())
}

/// Embed and standardize to zero mean and unit variance per column.
/// Zero-variance columns pass through unscaled.
fn standardized_features(positions: &[Position]) -> Vec<[f64; FEATURES]> {
    let n = positions.len() as f64;
    let mut rows: Vec<[f64; FEATURES]> = positions
        .iter()
        .map(|p| {
            let course = p.course.to_radians();
            [p.lat, p.lon, p.speed, course.sin(), course.cos()]
        })
        .collect();

    for col in 0..FEATURES {
        let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        for row in rows.iter_mut() {
            row[col] = (row[col] - mean) / scale;
        }
    }
    rows
}

/// Per-column metric weights. The two distance columns and the two
/// course columns each split one user weight, scaled so a pair
/// contributes to the metric like a single column would.
fn metric_weights(cfg: &ClusteringConfig) -> [f64; FEATURES] {
    let split = 2.0_f64.powf(1.0 / cfg.metric_degree);
    [
        cfg.weight_distance / split,
        cfg.weight_distance / split,
        cfg.weight_speed,
        cfg.weight_course / split,
        cfg.weight_course / split,
    ]
}

fn minkowski(a: &[f64; FEATURES], b: &[f64; FEATURES], w: &[f64; FEATURES], p: f64) -> f64 {
    let mut sum = 0.0;
    for i in 0..FEATURES {
        sum += w[i] * (a[i] - b[i]).abs().powf(p);
    }
    sum.powf(1.0 / p)
}

fn lane_stats(positions: &[Position], labels: &[i64], clusters: i64) -> Vec<LaneStats> {
    let mut stats = Vec::with_capacity(clusters as usize);
    for cluster_num in 0..clusters {
        let mut speeds = Vec::new();
        let mut courses = Vec::new();
        for (pos, &label) in positions.iter().zip(labels) {
            if label == cluster_num {
                speeds.push(pos.speed);
                courses.push(pos.course);
            }
        }
        if speeds.is_empty() {
            continue;
        }
        stats.push(LaneStats {
            cluster_num,
            avg_speed: speeds.iter().sum::<f64>() / speeds.len() as f64,
            avg_course: circular_mean_deg(&courses),
        });
    }
    stats
}
