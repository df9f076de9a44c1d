//! Route planning over the visibility graph.
//!
//! Endpoints are spliced into the graph for the duration of one query:
//! an endpoint inside a lane is visited directly, one outside is tied
//! to the nearest lane-boundary point with zero-weight anchor edges.
//! The splice is always removed before returning, so the shared graph
//! artifact is never left with query-local state.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{FairwayError, NoPathReason};
use crate::geometry;
use crate::graph::{
    self, EdgeData, SpliceMark, VisibilityGraph, VisitMode, ANCHOR_SPEED_KN, ANCHOR_TAG,
};
use crate::lanes::LaneSet;
use crate::models::{GraphConfig, SearchAlgorithm};
use crate::spatial::{self, Projected};

/// Endpoints farther than this from every lane boundary are rejected.
pub const MAX_ANCHOR_DISTANCE_NM: f64 = 2.5;

/// A planned route, before cache bookkeeping is attached.
#[derive(Debug, Clone)]
pub struct PlannedPath {
    pub waypoints: Vec<(f64, f64)>,
    pub total_distance_nm: f64,
    pub total_time_hours: f64,
    pub mean_deviation_deg: f64,
    pub segment_distances_nm: Vec<f64>,
    pub segment_speeds: Vec<f64>,
    pub segment_deviations: Vec<f64>,
    pub nodes_visited: usize,
    pub total_weight: f64,
}

fn no_path(start: (f64, f64), end: (f64, f64), reason: NoPathReason) -> FairwayError {
    FairwayError::NoPathFound {
        start_lat: start.0,
        start_lon: start.1,
        end_lat: end.0,
        end_lon: end.1,
        reason,
    }
}

/// Plan a minimum-weight route between two lat/lon endpoints. The
/// graph is mutated only transiently; on return it is bit-identical to
/// the input whatever the outcome.
pub fn plan_route(
    graph: &mut VisibilityGraph,
    lanes: &LaneSet,
    cfg: &GraphConfig,
    start: (f64, f64),
    end: (f64, f64),
) -> Result<PlannedPath, FairwayError> {
    if start == end {
        return Err(no_path(start, end, NoPathReason::IdenticalEndpoints));
    }

    let mut mark = graph.begin_splice();
    let result = plan_spliced(graph, &mut mark, lanes, cfg, start, end);
    graph.remove_splice(mark);
    result
}

fn plan_spliced(
    graph: &mut VisibilityGraph,
    mark: &mut SpliceMark,
    lanes: &LaneSet,
    cfg: &GraphConfig,
    start: (f64, f64),
    end: (f64, f64),
) -> Result<PlannedPath, FairwayError> {
    let start_node = attach_endpoint(graph, mark, lanes, cfg, start, end, VisitMode::Departure)?.node;
    let attached_end = attach_endpoint(graph, mark, lanes, cfg, start, end, VisitMode::Arrival)?;
    if start_node == attached_end.node {
        return Err(no_path(start, end, NoPathReason::IdenticalEndpoints));
    }

    let searched = match cfg.search_algorithm {
        SearchAlgorithm::Dijkstra => {
            bidirectional_dijkstra(graph, start_node, attached_end.node)
        }
        SearchAlgorithm::AStar => astar(
            graph,
            start_node,
            attached_end.node,
            attached_end.heuristic_target,
            cfg.weight_time_graph,
        ),
    };
    let (path, nodes_visited) =
        searched.ok_or_else(|| no_path(start, end, NoPathReason::Disconnected))?;

    Ok(summarize(graph, &path, nodes_visited))
}

struct AttachedEnd {
    node: u32,
    /// Spatial target for the A* lower bound: the last weighted node
    /// before the goal (the anchor when the endpoint is anchored).
    heuristic_target: Projected,
}

fn attach_endpoint(
    graph: &mut VisibilityGraph,
    mark: &mut SpliceMark,
    lanes: &LaneSet,
    cfg: &GraphConfig,
    start: (f64, f64),
    end: (f64, f64),
    mode: VisitMode,
) -> Result<AttachedEnd, FairwayError> {
    let (lat, lon) = match mode {
        VisitMode::Departure => start,
        VisitMode::Arrival => end,
    };
    let projected = spatial::project(lat, lon);
    let covered = lanes
        .lanes
        .iter()
        .any(|lane| geometry::covers(&lane.polygon, projected));

    let (visit_node, endpoint_node, heuristic_target) = if covered {
        let node = graph.intern_spliced(mark, projected);
        (node, node, projected)
    } else {
        let Some((boundary, _)) = geometry::nearest_boundary_point(&lanes.polygons(), projected)
        else {
            return Err(no_path(start, end, NoPathReason::AnchorTooFar));
        };
        let (blat, blon) = spatial::unproject(boundary);
        let anchor_nm = spatial::haversine_nm(lat, lon, blat, blon);
        if anchor_nm > MAX_ANCHOR_DISTANCE_NM {
            tracing::warn!(lat, lon, anchor_nm, "endpoint too far from every lane");
            return Err(no_path(start, end, NoPathReason::AnchorTooFar));
        }
        let raw = graph.intern_spliced(mark, projected);
        let anchor = graph.intern_spliced(mark, boundary);
        let tie = EdgeData {
            distance_nm: anchor_nm,
            speed: ANCHOR_SPEED_KN,
            angle_deviation: 0.0,
            weight: 0.0,
            color_tag: ANCHOR_TAG,
        };
        graph.merge_edge_spliced(mark, (raw, anchor), tie);
        graph.merge_edge_spliced(mark, (anchor, raw), tie);
        (anchor, raw, boundary)
    };

    let edges = graph::visit_edges(
        graph,
        lanes,
        visit_node,
        mode,
        cfg.angle_of_vision,
        &cfg.weights(),
    );
    if edges.is_empty() {
        return Err(no_path(start, end, NoPathReason::IsolatedEndpoint));
    }
    for (key, data) in edges {
        graph.merge_edge_spliced(mark, key, data);
    }
    Ok(AttachedEnd {
        node: endpoint_node,
        heuristic_target,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenNode {
    cost: f64,
    node: u32,
}

impl Eq for OpenNode {}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bidirectional Dijkstra. Returns the node path and the number of
/// settled nodes, or `None` when the frontiers never meet.
fn bidirectional_dijkstra(
    graph: &VisibilityGraph,
    start: u32,
    goal: u32,
) -> Option<(Vec<u32>, usize)> {
    let forward = graph.adjacency();
    let mut backward: Vec<Vec<(u32, EdgeData)>> = vec![Vec::new(); graph.node_count()];
    for (&(from, to), &data) in &graph.edges {
        backward[to as usize].push((from, data));
    }
    for list in backward.iter_mut() {
        list.sort_by_key(|(from, _)| *from);
    }

    let mut dist_f: HashMap<u32, f64> = HashMap::from([(start, 0.0)]);
    let mut dist_b: HashMap<u32, f64> = HashMap::from([(goal, 0.0)]);
    let mut came_f: HashMap<u32, u32> = HashMap::new();
    let mut came_b: HashMap<u32, u32> = HashMap::new();
    let mut settled_f: HashMap<u32, f64> = HashMap::new();
    let mut settled_b: HashMap<u32, f64> = HashMap::new();
    let mut heap_f = BinaryHeap::from([Reverse(OpenNode {
        cost: 0.0,
        node: start,
    })]);
    let mut heap_b = BinaryHeap::from([Reverse(OpenNode {
        cost: 0.0,
        node: goal,
    })]);

    let mut best = f64::INFINITY;
    let mut meet: Option<u32> = None;
    let mut visited = 0usize;

    loop {
        let top_f = heap_f.peek().map(|Reverse(n)| n.cost);
        let top_b = heap_b.peek().map(|Reverse(n)| n.cost);
        match (top_f, top_b) {
            (Some(f), Some(b)) if f + b >= best => break,
            (None, _) | (_, None) => break,
            _ => {}
        }

        let expand_forward = top_f.unwrap_or(f64::INFINITY) <= top_b.unwrap_or(f64::INFINITY);
        let (heap, adj, dist, came, settled, other_dist) = if expand_forward {
            (
                &mut heap_f,
                &forward,
                &mut dist_f,
                &mut came_f,
                &mut settled_f,
                &dist_b,
            )
        } else {
            (
                &mut heap_b,
                &backward,
                &mut dist_b,
                &mut came_b,
                &mut settled_b,
                &dist_f,
            )
        };

        let Some(Reverse(OpenNode { cost, node })) = heap.pop() else {
            break;
        };
        if settled.contains_key(&node) {
            continue;
        }
        settled.insert(node, cost);
        visited += 1;

        for &(next, edge) in &adj[node as usize] {
            let candidate = cost + edge.weight;
            if dist.get(&next).map_or(true, |&d| candidate < d) {
                dist.insert(next, candidate);
                came.insert(next, node);
                heap.push(Reverse(OpenNode {
                    cost: candidate,
                    node: next,
                }));
            }
            if let Some(&other) = other_dist.get(&next) {
                let total = candidate + other;
                if total < best {
                    best = total;
                    meet = Some(next);
                }
            }
        }
        if let Some(&other) = other_dist.get(&node) {
            let total = cost + other;
            if total < best {
                best = total;
                meet = Some(node);
            }
        }
    }

    let meet = meet?;
    let mut path = Vec::new();
    let mut cursor = meet;
    while cursor != start {
        path.push(cursor);
        cursor = came_f[&cursor];
    }
    path.push(start);
    path.reverse();
    let mut cursor = meet;
    while cursor != goal {
        cursor = came_b[&cursor];
        path.push(cursor);
    }
    Some((path, visited))
}

/// A* with a straight-line lower bound aimed at the last weighted node
/// before the goal, divided by the best speed in the graph. Keeps the
/// bound admissible even though the goal hangs off a zero-weight
/// anchor edge.
fn astar(
    graph: &VisibilityGraph,
    start: u32,
    goal: u32,
    heuristic_target: Projected,
    weight_time: f64,
) -> Option<(Vec<u32>, usize)> {
    let adjacency = graph.adjacency();
    let (target_lat, target_lon) = spatial::unproject(heuristic_target);
    let speed_scale = graph.max_speed().max(0.1);
    let heuristic = |node: u32| -> f64 {
        if node == goal {
            return 0.0;
        }
        let (lat, lon) = spatial::unproject(graph.node(node));
        spatial::haversine_nm(lat, lon, target_lat, target_lon) / speed_scale * weight_time
    };

    let mut dist: HashMap<u32, f64> = HashMap::from([(start, 0.0)]);
    let mut came_from: HashMap<u32, u32> = HashMap::new();
    let mut settled: HashMap<u32, f64> = HashMap::new();
    let mut heap = BinaryHeap::from([Reverse(OpenNode {
        cost: heuristic(start),
        node: start,
    })]);
    let mut visited = 0usize;

    while let Some(Reverse(OpenNode { node, .. })) = heap.pop() {
        if settled.contains_key(&node) {
            continue;
        }
        let g = dist[&node];
        settled.insert(node, g);
        visited += 1;
        if node == goal {
            let mut path = vec![goal];
            let mut cursor = goal;
            while cursor != start {
                cursor = came_from[&cursor];
                path.push(cursor);
            }
            path.reverse();
            return Some((path, visited));
        }
        for &(next, edge) in &adjacency[node as usize] {
            let candidate = g + edge.weight;
            if dist.get(&next).map_or(true, |&d| candidate < d) {
                dist.insert(next, candidate);
                came_from.insert(next, node);
                heap.push(Reverse(OpenNode {
                    cost: candidate + heuristic(next),
                    node: next,
                }));
            }
        }
    }
    None
}

fn summarize(graph: &VisibilityGraph, path: &[u32], nodes_visited: usize) -> PlannedPath {
    let waypoints = path
        .iter()
        .map(|&id| spatial::unproject(graph.node(id)))
        .collect();
    let mut segment_distances_nm = Vec::new();
    let mut segment_speeds = Vec::new();
    let mut segment_deviations = Vec::new();
    let mut total_weight = 0.0;
    for pair in path.windows(2) {
        let edge = graph.edges[&(pair[0], pair[1])];
        segment_distances_nm.push(edge.distance_nm);
        segment_speeds.push(edge.speed);
        segment_deviations.push(edge.angle_deviation);
        total_weight += edge.weight;
    }
    let total_distance_nm: f64 = segment_distances_nm.iter().sum();
    let total_time_hours: f64 = segment_distances_nm
        .iter()
        .zip(&segment_speeds)
        .map(|(d, s)| d / s)
        .sum();
    let mean_deviation_deg = if segment_deviations.is_empty() {
        0.0
    } else {
        segment_deviations.iter().sum::<f64>() / segment_deviations.len() as f64
    };

    PlannedPath {
        waypoints,
        total_distance_nm,
        total_time_hours,
        mean_deviation_deg,
        segment_distances_nm,
        segment_speeds,
        segment_deviations,
        nodes_visited,
        total_weight,
    }
}
