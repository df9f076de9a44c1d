//! Directed visibility graph over lane intersections.
//!
//! Waypoints are placed along intersection boundaries and interned into
//! a node arena with stable ids; edges are gated by a cone of vision
//! centered on each covering lane's mean course. Edge weights are
//! re-derivable from the stored distance, speed and deviation, which is
//! what makes the weight-only recompute path possible.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::geometry::{self, IntersectionPart};
use crate::lanes::LaneSet;
use crate::models::{EdgeRecord, EdgeWeightConfig, GraphConfig, HullType, VertexRecord};
use crate::spatial::{self, Projected};

/// Color tag on transient anchor edges, outside the cluster id space.
pub const ANCHOR_TAG: i64 = -1;

/// Assumed transit speed on anchor edges. Stored on the edge literally,
/// unlike lane speeds.
pub const ANCHOR_SPEED_KN: f64 = 30.0;

/// Directed edge payload. `weight` is derived from the other fields
/// plus the current weight parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub distance_nm: f64,
    /// Lane mean speed divided by the fixed scale of 10; anchor edges
    /// carry [`ANCHOR_SPEED_KN`] as-is.
    pub speed: f64,
    pub angle_deviation: f64,
    pub weight: f64,
    pub color_tag: i64,
}

/// Which way a waypoint's cone of vision faces when it is visited.
/// Arrival flips the cone so the selected edges flow into the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitMode {
    Departure,
    Arrival,
}

/// Undo log for a transient endpoint splice. Records the node-arena
/// watermark plus the prior value of every edge slot the splice
/// touched, so removal restores the graph bit-for-bit.
#[derive(Debug, Default)]
pub struct SpliceMark {
    base_nodes: usize,
    touched: Vec<((u32, u32), Option<EdgeData>)>,
    added_keys: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityGraph {
    nodes: Vec<Projected>,
    index: HashMap<(i64, i64), u32>,
    pub edges: HashMap<(u32, u32), EdgeData>,
}

/// Millimeter-rounded interning key; two waypoints closer than a
/// millimeter in the projected plane are the same node.
fn node_key(p: Projected) -> (i64, i64) {
    ((p.x * 1000.0).round() as i64, (p.y * 1000.0).round() as i64)
}

/// Deterministic total order on edge payloads; the smaller edge wins
/// when an ordered pair is produced twice.
fn edge_order(a: &EdgeData, b: &EdgeData) -> Ordering {
    a.weight
        .total_cmp(&b.weight)
        .then(a.distance_nm.total_cmp(&b.distance_nm))
        .then(a.speed.total_cmp(&b.speed))
        .then(a.angle_deviation.total_cmp(&b.angle_deviation))
        .then(a.color_tag.cmp(&b.color_tag))
}

impl VisibilityGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: u32) -> Projected {
        self.nodes[id as usize]
    }

    /// Intern a waypoint, deduplicating by rounded coordinate.
    pub fn intern(&mut self, p: Projected) -> u32 {
        let key = node_key(p);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(p);
        self.index.insert(key, id);
        id
    }

    /// Insert an edge, keeping the better payload if the slot is
    /// already occupied. Commutative and associative, so merge order
    /// never affects the result.
    pub fn merge_edge(&mut self, key: (u32, u32), data: EdgeData) {
        match self.edges.get_mut(&key) {
            Some(existing) => {
                if edge_order(&data, existing) == Ordering::Less {
                    *existing = data;
                }
            }
            None => {
                self.edges.insert(key, data);
            }
        }
    }

    /// Highest speed over all edges, used as the planner's heuristic
    /// divisor. Anchor edges carry the assumed transit speed, which
    /// keeps the bound valid for spliced queries too.
    pub fn max_speed(&self) -> f64 {
        self.edges
            .values()
            .map(|e| e.speed)
            .fold(ANCHOR_SPEED_KN, f64::max)
    }

    pub fn begin_splice(&self) -> SpliceMark {
        SpliceMark {
            base_nodes: self.nodes.len(),
            touched: Vec::new(),
            added_keys: Vec::new(),
        }
    }

    pub fn intern_spliced(&mut self, mark: &mut SpliceMark, p: Projected) -> u32 {
        let key = node_key(p);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.intern(p);
        mark.added_keys.push(key);
        id
    }

    pub fn merge_edge_spliced(&mut self, mark: &mut SpliceMark, key: (u32, u32), data: EdgeData) {
        if !mark.touched.iter().any(|(k, _)| *k == key) {
            mark.touched.push((key, self.edges.get(&key).copied()));
        }
        self.merge_edge(key, data);
    }

    /// Remove a splice, restoring every touched edge slot and dropping
    /// the nodes the splice added.
    pub fn remove_splice(&mut self, mark: SpliceMark) {
        for (key, prior) in mark.touched {
            match prior {
                Some(data) => {
                    self.edges.insert(key, data);
                }
                None => {
                    self.edges.remove(&key);
                }
            }
        }
        for key in mark.added_keys {
            self.index.remove(&key);
        }
        self.nodes.truncate(mark.base_nodes);
    }

    /// Outgoing adjacency lists, rebuilt per query. Entries are sorted
    /// by target id so traversal order is deterministic.
    pub fn adjacency(&self) -> Vec<Vec<(u32, EdgeData)>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for (&(from, to), &data) in &self.edges {
            adj[from as usize].push((to, data));
        }
        for list in adj.iter_mut() {
            list.sort_by_key(|(to, _)| *to);
        }
        adj
    }

    pub fn vertex_records(&self) -> Vec<VertexRecord> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(id, &p)| {
                let (lat, lon) = spatial::unproject(p);
                VertexRecord {
                    vertex_id: id as u32,
                    lat,
                    lon,
                }
            })
            .collect()
    }

    pub fn edge_records(&self) -> Vec<EdgeRecord> {
        let mut records: Vec<EdgeRecord> = self
            .edges
            .iter()
            .map(|(&(from, to), e)| EdgeRecord {
                start_vertex_id: from,
                end_vertex_id: to,
                distance_nm: e.distance_nm,
                speed: e.speed,
                angle_deviation: e.angle_deviation,
                weight: e.weight,
                color_tag: e.color_tag,
            })
            .collect();
        records.sort_by_key(|r| (r.start_vertex_id, r.end_vertex_id));
        records
    }
}

/// Edge cost from the stored (already scaled) speed. Degenerate speeds
/// are clamped rather than dividing by zero.
pub fn edge_weight(distance_nm: f64, speed: f64, deviation_deg: f64, w: &EdgeWeightConfig) -> f64 {
    let s = speed.max(0.1);
    let p = w.weight_func_degree;
    ((distance_nm / s * w.weight_time).abs().powf(p)
        + (deviation_deg * w.weight_course).abs().powf(p))
    .powf(1.0 / p)
}

/// Build the full graph for a lane set: place waypoints, then visit
/// every waypoint in departure mode. Per-waypoint visits run in
/// parallel; the keep-min merge makes worker order irrelevant.
pub fn build_graph(lanes: &LaneSet, cfg: &GraphConfig) -> VisibilityGraph {
    let mut graph = VisibilityGraph::default();
    for inter in &lanes.intersections {
        for p in geometry::boundary_waypoints(&inter.part, cfg.distance_delta) {
            graph.intern(p);
        }
        if cfg.points_inside {
            if let IntersectionPart::Region(poly) = &inter.part {
                for p in geometry::interior_grid(poly, cfg.distance_delta) {
                    graph.intern(p);
                }
            }
        }
    }

    let weights = cfg.weights();
    let per_node: Vec<Vec<((u32, u32), EdgeData)>> = (0..graph.node_count() as u32)
        .into_par_iter()
        .map(|id| {
            visit_edges(
                &graph,
                lanes,
                id,
                VisitMode::Departure,
                cfg.angle_of_vision,
                &weights,
            )
        })
        .collect();
    for list in per_node {
        for (key, data) in list {
            graph.merge_edge(key, data);
        }
    }

    tracing::info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "visibility graph built"
    );
    graph
}

/// Compute the edges one waypoint contributes without mutating the
/// graph. For every lane covering the waypoint, candidate targets
/// inside the same lane are gated by the cone of vision; concave lanes
/// additionally require the straight segment to stay inside.
pub fn visit_edges(
    graph: &VisibilityGraph,
    lanes: &LaneSet,
    node_id: u32,
    mode: VisitMode,
    angle_of_vision: f64,
    weights: &EdgeWeightConfig,
) -> Vec<((u32, u32), EdgeData)> {
    let origin = graph.node(node_id);
    let (origin_lat, origin_lon) = spatial::unproject(origin);
    let half = angle_of_vision / 2.0;
    let mut out = Vec::new();

    for lane in &lanes.lanes {
        if !geometry::covers(&lane.polygon, origin) {
            continue;
        }
        let center = match mode {
            VisitMode::Departure => lane.stats.avg_course,
            VisitMode::Arrival => spatial::normalize_deg(lane.stats.avg_course + 180.0),
        };
        for target in 0..graph.node_count() as u32 {
            if target == node_id {
                continue;
            }
            let tp = graph.node(target);
            if !geometry::covers(&lane.polygon, tp) {
                continue;
            }
            let bearing = spatial::bearing_deg(origin, tp);
            if spatial::angle_diff_deg(bearing, center).abs() > half {
                continue;
            }
            if lanes.hull_type == HullType::ConcaveHull
                && !geometry::segment_inside(&lane.polygon, origin, tp)
            {
                continue;
            }
            let (key, edge_bearing) = match mode {
                VisitMode::Departure => ((node_id, target), bearing),
                VisitMode::Arrival => {
                    ((target, node_id), spatial::normalize_deg(bearing + 180.0))
                }
            };
            let deviation = spatial::angle_diff_deg(edge_bearing, lane.stats.avg_course).abs();
            let (target_lat, target_lon) = spatial::unproject(tp);
            let distance_nm =
                spatial::haversine_nm(origin_lat, origin_lon, target_lat, target_lon);
            let speed = lane.stats.avg_speed / 10.0;
            let weight = edge_weight(distance_nm, speed, deviation, weights);
            out.push((
                key,
                EdgeData {
                    distance_nm,
                    speed,
                    angle_deviation: deviation,
                    weight,
                    color_tag: lane.cluster_num,
                },
            ));
        }
    }
    out
}

/// Re-derive every edge weight from its stored distance, speed and
/// deviation under new weight parameters. Topology and the stored
/// metrics never change; applying the same parameters twice is a
/// bit-for-bit no-op.
pub fn recompute_weights(graph: &mut VisibilityGraph, weights: &EdgeWeightConfig) {
    for edge in graph.edges.values_mut() {
        edge.weight = if edge.color_tag == ANCHOR_TAG {
            0.0
        } else {
            edge_weight(edge.distance_nm, edge.speed, edge.angle_deviation, weights)
        };
    }
    tracing::debug!(edges = graph.edge_count(), "edge weights recomputed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::build_hull;
    use crate::lanes::{Lane, LaneIntersection, LaneSet};
    use crate::models::{LaneStats, SearchAlgorithm};

    fn weights() -> EdgeWeightConfig {
        EdgeWeightConfig {
            weight_time: 1.0,
            weight_course: 1.0,
            weight_func_degree: 2.0,
        }
    }

    fn square_lane(cluster_num: i64, x0: f64, y0: f64, size: f64, course: f64) -> Lane {
        let corners = [
            Projected { x: x0, y: y0 },
            Projected { x: x0 + size, y: y0 },
            Projected {
                x: x0 + size,
                y: y0 + size,
            },
            Projected { x: x0, y: y0 + size },
        ];
        Lane {
            cluster_num,
            stats: LaneStats {
                cluster_num,
                avg_speed: 10.0,
                avg_course: course,
            },
            polygon: build_hull(&corners, HullType::ConvexHull).unwrap(),
        }
    }

    fn edge(weight: f64, color_tag: i64) -> EdgeData {
        EdgeData {
            distance_nm: 1.0,
            speed: 10.0,
            angle_deviation: 5.0,
            weight,
            color_tag,
        }
    }

    #[test]
    fn interning_dedups_by_millimeter() {
        let mut graph = VisibilityGraph::default();
        let a = graph.intern(Projected { x: 1.0, y: 2.0 });
        let b = graph.intern(Projected {
            x: 1.0 + 1e-5,
            y: 2.0,
        });
        let c = graph.intern(Projected { x: 1.1, y: 2.0 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn merge_keeps_lower_weight_in_either_order() {
        let (lo, hi) = (edge(1.0, 0), edge(2.0, 1));
        let mut g1 = VisibilityGraph::default();
        g1.merge_edge((0, 1), lo);
        g1.merge_edge((0, 1), hi);
        let mut g2 = VisibilityGraph::default();
        g2.merge_edge((0, 1), hi);
        g2.merge_edge((0, 1), lo);
        assert_eq!(g1.edges[&(0, 1)], g2.edges[&(0, 1)]);
        assert_eq!(g1.edges[&(0, 1)].weight, 1.0);
    }

    #[test]
    fn merge_tie_break_is_order_independent() {
        // Equal weights resolved by the rest of the total order.
        let a = EdgeData {
            distance_nm: 1.0,
            speed: 10.0,
            angle_deviation: 5.0,
            weight: 1.0,
            color_tag: 2,
        };
        let b = EdgeData { color_tag: 1, ..a };
        let mut g1 = VisibilityGraph::default();
        g1.merge_edge((0, 1), a);
        g1.merge_edge((0, 1), b);
        let mut g2 = VisibilityGraph::default();
        g2.merge_edge((0, 1), b);
        g2.merge_edge((0, 1), a);
        assert_eq!(g1.edges[&(0, 1)], g2.edges[&(0, 1)]);
        assert_eq!(g1.edges[&(0, 1)].color_tag, 1);
    }

    #[test]
    fn cone_gating_respects_wraparound() {
        // Lane heading 350: a target bearing 5 degrees is inside a
        // 30-degree cone, a target due south is not.
        let lane = square_lane(0, -500.0, -500.0, 1000.0, 350.0);
        let lanes = LaneSet {
            hull_type: HullType::ConvexHull,
            lanes: vec![lane],
            intersections: Vec::new(),
        };
        let mut graph = VisibilityGraph::default();
        let origin = graph.intern(Projected { x: 0.0, y: 0.0 });
        // Bearing 0 from origin: 10 degrees inside the wrapped cone.
        let ahead = graph.intern(Projected { x: 0.0, y: 200.0 });
        // Due south.
        let behind = graph.intern(Projected { x: 0.0, y: -200.0 });

        let edges = visit_edges(
            &graph,
            &lanes,
            origin,
            VisitMode::Departure,
            30.0,
            &weights(),
        );
        let keys: Vec<(u32, u32)> = edges.iter().map(|(k, _)| *k).collect();
        assert!(keys.contains(&(origin, ahead)));
        assert!(!keys.contains(&(origin, behind)));
    }

    #[test]
    fn arrival_visit_reverses_edge_direction() {
        let lane = square_lane(0, -500.0, -500.0, 1000.0, 0.0);
        let lanes = LaneSet {
            hull_type: HullType::ConvexHull,
            lanes: vec![lane],
            intersections: Vec::new(),
        };
        let mut graph = VisibilityGraph::default();
        let end = graph.intern(Projected { x: 0.0, y: 100.0 });
        // South of the end point: traffic heading north arrives here.
        let upstream = graph.intern(Projected { x: 0.0, y: -100.0 });

        let edges = visit_edges(&graph, &lanes, end, VisitMode::Arrival, 30.0, &weights());
        assert_eq!(edges.len(), 1);
        let (key, data) = edges[0];
        assert_eq!(key, (upstream, end));
        assert!(data.angle_deviation < 1e-9);
        // 10 kn lane mean, stored scaled.
        assert!((data.speed - 1.0).abs() < 1e-9);
    }

    #[test]
    fn splice_removal_restores_graph() {
        let lane = square_lane(0, -500.0, -500.0, 1000.0, 0.0);
        let lanes = LaneSet {
            hull_type: HullType::ConvexHull,
            lanes: vec![lane],
            intersections: Vec::new(),
        };
        let mut graph = VisibilityGraph::default();
        let a = graph.intern(Projected { x: 0.0, y: -100.0 });
        let b = graph.intern(Projected { x: 0.0, y: 100.0 });
        graph.merge_edge((a, b), edge(1.0, 0));
        let nodes_before = graph.node_count();
        let edges_before = graph.edges.clone();

        let mut mark = graph.begin_splice();
        let anchor = graph.intern_spliced(&mut mark, Projected { x: 50.0, y: 0.0 });
        graph.merge_edge_spliced(&mut mark, (anchor, b), edge(0.5, ANCHOR_TAG));
        // Touch the existing slot with a better payload too.
        graph.merge_edge_spliced(&mut mark, (a, b), edge(0.1, 0));
        assert_eq!(graph.edges[&(a, b)].weight, 0.1);

        graph.remove_splice(mark);
        assert_eq!(graph.node_count(), nodes_before);
        assert_eq!(graph.edges, edges_before);
    }

    #[test]
    fn weight_recompute_is_idempotent() {
        let lane = square_lane(0, -500.0, -500.0, 1000.0, 0.0);
        let lanes = LaneSet {
            hull_type: HullType::ConvexHull,
            lanes: vec![lane],
            intersections: vec![],
        };
        let cfg = GraphConfig {
            points_inside: false,
            distance_delta: 100.0,
            angle_of_vision: 60.0,
            weight_time_graph: 1.0,
            weight_course_graph: 1.0,
            weight_func_degree: 2.0,
            search_algorithm: SearchAlgorithm::Dijkstra,
        };
        let mut graph = VisibilityGraph::default();
        graph.intern(Projected { x: 0.0, y: -100.0 });
        graph.intern(Projected { x: 0.0, y: 100.0 });
        graph.intern(Projected { x: 30.0, y: 0.0 });
        let per_node: Vec<_> = (0..graph.node_count() as u32)
            .map(|id| {
                visit_edges(
                    &graph,
                    &lanes,
                    id,
                    VisitMode::Departure,
                    cfg.angle_of_vision,
                    &weights(),
                )
            })
            .collect();
        for list in per_node {
            for (key, data) in list {
                graph.merge_edge(key, data);
            }
        }
        assert!(graph.edge_count() > 0);

        let new_weights = EdgeWeightConfig {
            weight_time: 2.0,
            weight_course: 0.5,
            weight_func_degree: 2.0,
        };
        recompute_weights(&mut graph, &new_weights);
        let snapshot = graph.edges.clone();
        recompute_weights(&mut graph, &new_weights);
        assert_eq!(graph.edges, snapshot);
    }

    #[test]
    fn merge_order_does_not_change_edge_set() {
        let lane = square_lane(0, -500.0, -500.0, 1000.0, 0.0);
        let lanes = LaneSet {
            hull_type: HullType::ConvexHull,
            lanes: vec![lane],
            intersections: Vec::new(),
        };
        let mut base = VisibilityGraph::default();
        for y in [-300.0, -100.0, 100.0, 300.0] {
            for x in [-50.0, 50.0] {
                base.intern(Projected { x, y });
            }
        }
        let per_node: Vec<Vec<((u32, u32), EdgeData)>> = (0..base.node_count() as u32)
            .map(|id| visit_edges(&base, &lanes, id, VisitMode::Departure, 60.0, &weights()))
            .collect();

        let mut forward = base.clone();
        for list in &per_node {
            for &(key, data) in list {
                forward.merge_edge(key, data);
            }
        }
        let mut reverse = base.clone();
        for list in per_node.iter().rev() {
            for &(key, data) in list.iter().rev() {
                reverse.merge_edge(key, data);
            }
        }
        assert!(forward.edge_count() > 0);
        assert_eq!(forward.edges, reverse.edges);
    }

    #[test]
    fn edge_weight_matches_closed_form() {
        let w = weights();
        // d = 2 nm, scaled speed 2 (a 20 kn lane), dev = 3 deg, p = 2.
        let got = edge_weight(2.0, 2.0, 3.0, &w);
        assert!((got - (1.0_f64 + 9.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn edge_weight_clamps_degenerate_speed() {
        let w = weights();
        let got = edge_weight(1.0, 0.0, 0.0, &w);
        assert!((got - 10.0).abs() < 1e-12);
    }
}
