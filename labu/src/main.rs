#![warn(clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use labu::controller::Controller;
use labu::docker::{CliRunner, ContainerRuntime};
use labu::results::Writer;
use labu::run::{self, RunConfig};
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "labu",
    about = "Runs containerized conformance simulations against one or more clients"
)]
struct Args {
    /// Simulator name, e.g. devnet/rpc.
    #[arg(long)]
    sim: String,

    /// Comma-separated client names.
    #[arg(long)]
    client: String,

    /// Workspace directory for logs and results.
    #[arg(long, default_value = "./workspace")]
    workspace: PathBuf,

    /// Host directory of test vectors, mounted read-only at /vectors.
    #[arg(long)]
    vectors: Option<PathBuf>,

    /// Regex selecting the tests to run.
    #[arg(long = "sim.limit", default_value = "")]
    sim_limit: String,

    /// Test concurrency hint passed to the simulator.
    #[arg(long = "sim.parallelism", default_value_t = 1)]
    sim_parallelism: u32,

    /// Random seed; 0 picks one from the clock.
    #[arg(long = "sim.randomseed", default_value_t = 0)]
    sim_randomseed: i64,

    /// Simulator log level (0-5).
    #[arg(long = "sim.loglevel", default_value_t = 2)]
    sim_loglevel: u32,

    /// Override the simulator image tag instead of building it.
    #[arg(long = "sim.image")]
    sim_image: Option<String>,

    /// Override client images (name=tag,name=tag).
    #[arg(long = "client.images", default_value = "")]
    client_images: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let clients = split_csv(&args.client);
    if clients.is_empty() {
        error!("no clients provided");
        std::process::exit(2);
    }

    if let Err(err) = std::fs::create_dir_all(&args.workspace) {
        error!(%err, workspace = %args.workspace.display(), "workspace setup failed");
        std::process::exit(1);
    }
    let workspace = std::fs::canonicalize(&args.workspace).unwrap_or(args.workspace);

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(CliRunner::new());
    let controller = Arc::new(Controller::new(workspace.clone(), runtime.clone()));
    let writer = Writer::new(workspace.clone());

    let cfg = RunConfig {
        simulator: args.sim,
        clients,
        simulator_image: args.sim_image,
        client_images: parse_image_overrides(&args.client_images),
        vectors_dir: args.vectors,
        limit_pattern: args.sim_limit,
        parallelism: args.sim_parallelism,
        random_seed: args.sim_randomseed,
        log_level: args.sim_loglevel,
        workspace,
    };

    if let Err(err) = run::run(cfg, controller, writer, runtime).await {
        error!(%err, "simulation failed");
        std::process::exit(1);
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_image_overrides(raw: &str) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((name, tag)) = pair.split_once('=') {
            overrides.insert(name.trim().to_string(), tag.trim().to_string());
        }
    }
    overrides
}
