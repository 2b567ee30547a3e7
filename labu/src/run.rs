//! Drives one harness invocation end to end: overlay network, control-plane
//! server, image builds, the simulator container, and teardown.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::api::{self, ApiState, ServeError};
use crate::controller::{Controller, IMAGE_PREFIX, RUN_NETWORK};
use crate::docker::{ContainerRuntime, RunOptions, RuntimeError};
use crate::results::Writer;

/// Immutable configuration for a single invocation.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub simulator: String,
    pub clients: Vec<String>,
    pub simulator_image: Option<String>,
    pub client_images: HashMap<String, String>,
    pub vectors_dir: Option<PathBuf>,
    pub limit_pattern: String,
    pub parallelism: u32,
    pub random_seed: i64,
    pub log_level: u32,
    pub workspace: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("no client images built successfully")]
    NoClientImages,
    #[error("simulator exited with code {0}")]
    SimulatorExit(i32),
}

pub async fn run(
    cfg: RunConfig,
    controller: Arc<Controller>,
    writer: Writer,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<(), RunError> {
    let seed = if cfg.random_seed != 0 {
        cfg.random_seed
    } else {
        clock_seed()
    };

    runtime.create_network(RUN_NETWORK).await?;
    controller.set_image_overrides(cfg.client_images.clone());

    let state = ApiState {
        controller: controller.clone(),
        writer: writer.clone(),
    };
    let server = api::start(state, SocketAddr::from(([127, 0, 0, 1], 0)))?;
    let api_url = format!("http://{}", server.addr);

    let outcome = drive(&cfg, seed, &api_url, &controller, &writer, runtime.as_ref()).await;

    if let Err(err) = runtime.remove_network(RUN_NETWORK).await {
        warn!(%err, network = RUN_NETWORK, "overlay network remove failed");
    }
    server.shutdown().await;
    outcome
}

async fn drive(
    cfg: &RunConfig,
    seed: i64,
    api_url: &str,
    controller: &Controller,
    writer: &Writer,
    runtime: &dyn ContainerRuntime,
) -> Result<(), RunError> {
    let sim_image = match &cfg.simulator_image {
        Some(tag) if !tag.is_empty() => tag.clone(),
        _ => {
            let tag = format!("{IMAGE_PREFIX}-sim-{}", sanitize(&cfg.simulator));
            let sim_dir = cfg
                .workspace
                .join("..")
                .join("simulators")
                .join(&cfg.simulator);
            let (context, dockerfile) = resolve_build_context(&sim_dir);
            runtime.build(&context, &dockerfile, &tag).await?;
            tag
        }
    };

    let mut available = 0;
    for client in &cfg.clients {
        let overridden = cfg
            .client_images
            .get(client)
            .map(|tag| !tag.is_empty())
            .unwrap_or(false);
        if overridden {
            available += 1;
            continue;
        }
        let dir = cfg.workspace.join("..").join("clients").join(client);
        let tag = format!("{IMAGE_PREFIX}-client-{client}");
        match runtime.build(&dir, &dir.join("Dockerfile"), &tag).await {
            Ok(()) => available += 1,
            Err(err) => warn!(client = %client, %err, "client build failed"),
        }
    }
    if available == 0 {
        return Err(RunError::NoClientImages);
    }
    controller.set_client_versions(&cfg.clients);

    let mut env = BTreeMap::new();
    env.insert("LABU_SIMULATOR".to_string(), api_url.to_string());
    env.insert("LABU_TEST_PATTERN".to_string(), cfg.limit_pattern.clone());
    env.insert("LABU_PARALLELISM".to_string(), cfg.parallelism.to_string());
    env.insert("LABU_RANDOM_SEED".to_string(), seed.to_string());
    env.insert("LABU_LOGLEVEL".to_string(), cfg.log_level.to_string());
    env.insert("LABU_CLIENTS".to_string(), cfg.clients.join(","));

    let mut mounts = Vec::new();
    if let Some(vectors) = &cfg.vectors_dir {
        env.insert("LABU_VECTOR_DIR".to_string(), "/vectors".to_string());
        mounts.push(format!("{}:/vectors:ro", vectors.display()));
    }

    let container = runtime
        .run(&RunOptions {
            image: sim_image,
            name: None,
            env,
            mounts,
            network: Some(RUN_NETWORK.to_string()),
        })
        .await?;
    info!(%container, simulator = %cfg.simulator, "simulator started");

    let waited = runtime.wait(&container).await;

    match runtime.logs(&container).await {
        Ok(logs) => match write_sim_log(&cfg.workspace, &container, &logs) {
            Ok(name) => controller.set_sim_log(&name),
            Err(err) => warn!(%err, "simulator log write failed"),
        },
        Err(err) => warn!(%err, "simulator log capture failed"),
    }
    if let Err(err) = controller.save_results(writer) {
        warn!(%err, "results write error");
    }
    if let Err(err) = runtime.remove(&container).await {
        warn!(%err, %container, "simulator remove failed");
    }

    let code = waited?;
    if code != 0 {
        return Err(RunError::SimulatorExit(code));
    }
    Ok(())
}

/// A `labu_context.txt` file next to the simulator's Dockerfile redirects the
/// build context to the relative path it names; the Dockerfile stays put.
fn resolve_build_context(sim_dir: &Path) -> (PathBuf, PathBuf) {
    let dockerfile = sim_dir.join("Dockerfile");
    match std::fs::read_to_string(sim_dir.join("labu_context.txt")) {
        Ok(content) => {
            let rel = content.trim();
            if rel.is_empty() {
                (sim_dir.to_path_buf(), dockerfile)
            } else {
                (sim_dir.join(rel), dockerfile)
            }
        }
        Err(_) => (sim_dir.to_path_buf(), dockerfile),
    }
}

fn write_sim_log(workspace: &Path, container: &str, logs: &str) -> std::io::Result<String> {
    let dir = workspace.join("logs");
    std::fs::create_dir_all(&dir)?;
    let name = format!("simulator-{container}.log");
    std::fs::write(dir.join(&name), logs)?;
    Ok(name)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' => Some(c),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            '/' => Some('-'),
            _ => None,
        })
        .collect()
}

fn clock_seed() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(1)
}
