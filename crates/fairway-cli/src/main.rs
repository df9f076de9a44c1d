//! Command-line front end for the fairway pipeline: synthetic dataset
//! generation, standalone clustering, graph export and route planning
//! over a JSON position file.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fairway_core::graph::build_graph;
use fairway_core::models::{
    ClusteringConfig, GraphConfig, HullType, Position, SearchAlgorithm,
};
use fairway_core::pipeline::LanePlanner;
use fairway_core::FairwayError;

#[derive(Parser)]
#[command(name = "fairway", about = "Traffic-lane discovery and route planning")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a synthetic two-lane crossing dataset.
    Synth {
        /// Total position count, split across the two lanes.
        #[arg(long, default_value_t = 500)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Cluster a position file and print a lane summary.
    Cluster {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        clustering: ClusterOpts,
    },
    /// Build the visibility graph and print its vertices and edges.
    Graph {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        clustering: ClusterOpts,
        #[command(flatten)]
        graph: GraphOpts,
    },
    /// Plan a route between two endpoints.
    Plan {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        start_lat: f64,
        #[arg(long)]
        start_lon: f64,
        #[arg(long)]
        end_lat: f64,
        #[arg(long)]
        end_lon: f64,
        #[command(flatten)]
        clustering: ClusterOpts,
        #[command(flatten)]
        graph: GraphOpts,
    },
}

#[derive(Args)]
struct ClusterOpts {
    #[arg(long, default_value_t = 1.0)]
    weight_distance: f64,
    #[arg(long, default_value_t = 1.0)]
    weight_speed: f64,
    #[arg(long, default_value_t = 1.0)]
    weight_course: f64,
    #[arg(long, default_value_t = 0.4)]
    eps: f64,
    #[arg(long, default_value_t = 10)]
    min_samples: usize,
    #[arg(long, default_value_t = 2.0)]
    metric_degree: f64,
    #[arg(long, value_enum, default_value_t = HullArg::Convex)]
    hull: HullArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HullArg {
    Convex,
    Concave,
}

impl ClusterOpts {
    fn to_config(&self) -> ClusteringConfig {
        ClusteringConfig {
            weight_distance: self.weight_distance,
            weight_speed: self.weight_speed,
            weight_course: self.weight_course,
            eps: self.eps,
            min_samples: self.min_samples,
            metric_degree: self.metric_degree,
            hull_type: match self.hull {
                HullArg::Convex => HullType::ConvexHull,
                HullArg::Concave => HullType::ConcaveHull,
            },
        }
    }
}

#[derive(Args)]
struct GraphOpts {
    /// Also scatter waypoints inside intersection regions.
    #[arg(long)]
    points_inside: bool,
    /// Waypoint spacing in meters.
    #[arg(long, default_value_t = 100.0)]
    distance_delta: f64,
    /// Cone-of-vision width in degrees.
    #[arg(long, default_value_t = 30.0)]
    angle_of_vision: f64,
    #[arg(long, default_value_t = 1.0)]
    weight_time: f64,
    #[arg(long, default_value_t = 1.0)]
    weight_deviation: f64,
    #[arg(long, default_value_t = 2.0)]
    weight_func_degree: f64,
    #[arg(long, value_enum, default_value_t = AlgorithmArg::Dijkstra)]
    algorithm: AlgorithmArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Dijkstra,
    Astar,
}

impl GraphOpts {
    fn to_config(&self) -> GraphConfig {
        GraphConfig {
            points_inside: self.points_inside,
            distance_delta: self.distance_delta,
            angle_of_vision: self.angle_of_vision,
            weight_time_graph: self.weight_time,
            weight_course_graph: self.weight_deviation,
            weight_func_degree: self.weight_func_degree,
            search_algorithm: match self.algorithm {
                AlgorithmArg::Dijkstra => SearchAlgorithm::Dijkstra,
                AlgorithmArg::Astar => SearchAlgorithm::AStar,
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Synth {
            count,
            seed,
            output,
        } => synth(count, seed, output),
        Command::Cluster { input, clustering } => cluster(&input, &clustering.to_config()),
        Command::Graph {
            input,
            clustering,
            graph,
        } => export_graph(&input, &clustering.to_config(), &graph.to_config()),
        Command::Plan {
            input,
            start_lat,
            start_lon,
            end_lat,
            end_lon,
            clustering,
            graph,
        } => plan(
            &input,
            &clustering.to_config(),
            &graph.to_config(),
            (start_lat, start_lon),
            (end_lat, end_lon),
        ),
    }
}

fn read_positions(path: &PathBuf) -> anyhow::Result<Vec<Position>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading positions from {}", path.display()))?;
    let positions: Vec<Position> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(positions)
}

/// Two crossing lanes with per-position jitter: one eastbound along
/// the equator, one southbound across it.
fn synth(count: usize, seed: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let half = count / 2;
    let mut positions = Vec::with_capacity(count);
    for i in 0..half {
        let t = i as f64 / half.max(1) as f64;
        positions.push(Position {
            id: i as i64,
            lat: rng.random_range(-0.002..0.002),
            lon: t * 0.25,
            speed: 10.0 + rng.random_range(-1.0..1.0),
            course: 90.0 + rng.random_range(-4.0..4.0),
        });
    }
    for i in half..count {
        let t = (i - half) as f64 / (count - half).max(1) as f64;
        positions.push(Position {
            id: i as i64,
            lat: 0.125 - t * 0.25,
            lon: 0.125 + rng.random_range(-0.002..0.002),
            speed: 10.0 + rng.random_range(-1.0..1.0),
            course: 180.0 + rng.random_range(-4.0..4.0),
        });
    }
    let json = serde_json::to_string_pretty(&positions)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(count, path = %path.display(), "dataset written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cluster(input: &PathBuf, cfg: &ClusteringConfig) -> anyhow::Result<()> {
    let positions = read_positions(input)?;
    let planner = LanePlanner::new();
    let stage = planner.cluster(&positions, cfg)?;
    let output = &stage.artifact.output;
    let noise = output
        .labels
        .iter()
        .filter(|&&l| l == fairway_core::models::NOISE_CLUSTER)
        .count();
    let doc = serde_json::json!({
        "positions": positions.len(),
        "clusters": output.cluster_count(),
        "noise": noise,
        "stats": output.stats,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn export_graph(
    input: &PathBuf,
    clustering: &ClusteringConfig,
    graph_cfg: &GraphConfig,
) -> anyhow::Result<()> {
    graph_cfg.validate()?;
    let positions = read_positions(input)?;
    let planner = LanePlanner::new();
    let lanes = planner.lanes(&positions, clustering)?;
    let graph = build_graph(&lanes, graph_cfg);
    let lane_docs: Vec<serde_json::Value> = lanes
        .lanes
        .iter()
        .map(|lane| {
            let boundary: Vec<(f64, f64)> = lane
                .polygon
                .exterior()
                .coords()
                .map(|c| fairway_core::spatial::unproject(fairway_core::spatial::Projected {
                    x: c.x,
                    y: c.y,
                }))
                .collect();
            serde_json::json!({
                "cluster_num": lane.cluster_num,
                "avg_speed": lane.stats.avg_speed,
                "avg_course": lane.stats.avg_course,
                "boundary": boundary,
            })
        })
        .collect();
    let doc = serde_json::json!({
        "lanes": lane_docs,
        "vertices": graph.vertex_records(),
        "edges": graph.edge_records(),
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn plan(
    input: &PathBuf,
    clustering: &ClusteringConfig,
    graph_cfg: &GraphConfig,
    start: (f64, f64),
    end: (f64, f64),
) -> anyhow::Result<()> {
    let positions = read_positions(input)?;
    let planner = LanePlanner::new();
    match planner.plan(&positions, clustering, graph_cfg, start, end) {
        Ok(route) => println!("{}", serde_json::to_string_pretty(&route)?),
        // No route is a valid outcome with a structured document, not
        // a process failure.
        Err(FairwayError::NoPathFound {
            start_lat,
            start_lon,
            end_lat,
            end_lon,
            reason,
        }) => {
            let doc = serde_json::json!({
                "no_route": {
                    "start": [start_lat, start_lon],
                    "end": [end_lat, end_lon],
                    "reason": reason.to_string(),
                }
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Err(other) => return Err(other.into()),
    }
    Ok(())
}
