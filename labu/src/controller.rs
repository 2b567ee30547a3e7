//! Suite/test/node/network state machine and result assembly.
//!
//! The controller is the sole owner of all live run state. Every map access
//! happens under one coarse mutex; container-runtime calls (builds, starts,
//! exec, inspect) are issued with the lock released, with their inputs copied
//! out first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::docker::{ContainerRuntime, ExecOutput, RunOptions, RuntimeError};
use crate::results::{self, ClientInfo, SuiteResult, SummaryResult, TestCaseResult, Writer, WriterError};

pub type SuiteId = u32;
pub type TestId = u32;

/// Overlay network joining the simulator and its client containers.
pub const RUN_NETWORK: &str = "labu-net";
/// Tag prefix for images built by the harness.
pub const IMAGE_PREFIX: &str = "labu";
/// Per-client descriptor file name.
pub const CLIENT_DESCRIPTOR: &str = "labu.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("suite not found")]
    SuiteNotFound,
    #[error("test not found")]
    TestNotFound,
    #[error("unknown client")]
    UnknownClient,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A client known to this run: its name, build context directory, and the
/// free-form metadata from its descriptor file.
#[derive(Clone, Debug, Serialize)]
pub struct ClientDef {
    pub name: String,
    pub version: String,
    pub meta: HashMap<String, serde_json::Value>,
    #[serde(skip)]
    pub dir: PathBuf,
}

/// The `config` part of a node launch request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientLaunchConfig {
    pub client: String,
    pub networks: Vec<String>,
    pub environment: HashMap<String, String>,
}

/// Returned to the simulator after a node launch.
#[derive(Clone, Debug, Serialize)]
pub struct NodeHandle {
    pub id: String,
    pub ip: String,
}

#[derive(Clone, Debug)]
struct Suite {
    name: String,
    description: String,
    tests: HashMap<TestId, Test>,
}

#[derive(Clone, Debug)]
struct Test {
    name: String,
    description: String,
    start: String,
    /// Keyed by container id.
    nodes: HashMap<String, Node>,
}

#[derive(Clone, Debug)]
struct Node {
    client_name: String,
    ip: String,
    instantiated_at: String,
    log_file: String,
}

#[derive(Default)]
struct Inner {
    suite_seq: SuiteId,
    /// Global across all suites; test ids are unique for the whole run.
    test_seq: TestId,
    suites: HashMap<SuiteId, Suite>,
    clients: HashMap<String, ClientDef>,
    networks: HashSet<String>,
    results: HashMap<SuiteId, SuiteResult>,
    image_overrides: HashMap<String, String>,
    run_clients: Vec<String>,
}

pub struct Controller {
    workspace: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    inner: Mutex<Inner>,
}

impl Controller {
    /// Creates a controller rooted at the given workspace. Client definitions
    /// are read once from the `clients/` directory next to the workspace.
    pub fn new(workspace: impl Into<PathBuf>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let workspace = workspace.into();
        let inner = Inner {
            clients: load_clients(&workspace),
            ..Inner::default()
        };
        Self {
            workspace,
            runtime,
            inner: Mutex::new(inner),
        }
    }

    pub fn list_clients(&self) -> Vec<ClientDef> {
        self.inner.lock().clients.values().cloned().collect()
    }

    pub fn set_image_overrides(&self, overrides: HashMap<String, String>) {
        self.inner.lock().image_overrides.extend(overrides);
    }

    /// Allocates a suite id and its result accumulator. The accumulator gets
    /// an empty version slot for every client named in the run configuration.
    pub fn create_suite(&self, name: &str, description: &str) -> SuiteId {
        let mut inner = self.inner.lock();
        inner.suite_seq += 1;
        let id = inner.suite_seq;
        inner.suites.insert(
            id,
            Suite {
                name: name.to_string(),
                description: description.to_string(),
                tests: HashMap::new(),
            },
        );
        let client_versions = inner
            .run_clients
            .iter()
            .map(|name| (name.clone(), String::new()))
            .collect();
        inner.results.insert(
            id,
            SuiteResult {
                id,
                name: name.to_string(),
                description: description.to_string(),
                client_versions,
                sim_log: String::new(),
                test_cases: HashMap::new(),
            },
        );
        id
    }

    /// Removes the live suite record. Its accumulated result is retained for
    /// flushing.
    pub fn end_suite(&self, id: SuiteId) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock();
        inner
            .suites
            .remove(&id)
            .map(|_| ())
            .ok_or(ControllerError::SuiteNotFound)
    }

    pub fn create_test(
        &self,
        suite_id: SuiteId,
        name: &str,
        description: &str,
    ) -> Result<TestId, ControllerError> {
        let mut inner = self.inner.lock();
        if !inner.suites.contains_key(&suite_id) {
            return Err(ControllerError::SuiteNotFound);
        }
        inner.test_seq += 1;
        let id = inner.test_seq;
        let test = Test {
            name: name.to_string(),
            description: description.to_string(),
            start: results::now_rfc3339(),
            nodes: HashMap::new(),
        };
        if let Some(suite) = inner.suites.get_mut(&suite_id) {
            suite.tests.insert(id, test);
        }
        Ok(id)
    }

    /// Finalizes a test: records the verdict and a snapshot of its nodes in
    /// the suite result, then removes the node containers. Container removal
    /// is best-effort and happens outside the lock.
    pub async fn end_test(
        &self,
        suite_id: SuiteId,
        test_id: TestId,
        verdict: SummaryResult,
    ) -> Result<(), ControllerError> {
        let node_ids: Vec<String>;
        {
            let mut inner = self.inner.lock();
            let suite = inner
                .suites
                .get(&suite_id)
                .ok_or(ControllerError::SuiteNotFound)?;
            let test = suite
                .tests
                .get(&test_id)
                .ok_or(ControllerError::TestNotFound)?;

            let mut client_info = HashMap::new();
            for (id, node) in &test.nodes {
                client_info.insert(
                    id.clone(),
                    ClientInfo {
                        ip: node.ip.clone(),
                        name: node.client_name.clone(),
                        instantiated_at: node.instantiated_at.clone(),
                        log_file: node.log_file.clone(),
                    },
                );
            }
            let case = TestCaseResult {
                name: test.name.clone(),
                description: test.description.clone(),
                start: test.start.clone(),
                end: results::now_rfc3339(),
                summary_result: verdict,
                client_info,
            };
            node_ids = test.nodes.keys().cloned().collect();

            if let Some(result) = inner.results.get_mut(&suite_id) {
                result.test_cases.insert(test_id.to_string(), case);
            }
        }

        for id in node_ids {
            if let Err(err) = self.runtime.remove(&id).await {
                warn!(container = %id, %err, "node teardown failed");
            }
        }
        Ok(())
    }

    /// Launches a client container for a test. Image builds and container
    /// starts run without the lock; the node is registered afterwards.
    pub async fn launch_node(
        &self,
        suite_id: SuiteId,
        test_id: TestId,
        config: ClientLaunchConfig,
        files: &HashMap<String, PathBuf>,
    ) -> Result<NodeHandle, ControllerError> {
        let (client_dir, image_override) = {
            let inner = self.inner.lock();
            let suite = inner
                .suites
                .get(&suite_id)
                .ok_or(ControllerError::SuiteNotFound)?;
            if !suite.tests.contains_key(&test_id) {
                return Err(ControllerError::TestNotFound);
            }
            let def = inner
                .clients
                .get(&config.client)
                .ok_or(ControllerError::UnknownClient)?;
            (
                def.dir.clone(),
                inner.image_overrides.get(&config.client).cloned(),
            )
        };

        let image = match image_override {
            Some(tag) if !tag.is_empty() => tag,
            _ => {
                let tag = format!("{IMAGE_PREFIX}-client-{}", config.client);
                self.runtime
                    .build(&client_dir, &client_dir.join("Dockerfile"), &tag)
                    .await?;
                tag
            }
        };

        let node_dir = self
            .workspace
            .join("nodes")
            .join(format!("suite-{suite_id}"))
            .join(format!("test-{test_id}"));
        tokio::fs::create_dir_all(&node_dir).await?;
        for (name, path) in files {
            let dest = node_dir.join(name);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(path, &dest).await?;
        }

        let mut env: BTreeMap<String, String> = config
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.insert("LABU_FILES_DIR".to_string(), "/labu-files".to_string());
        env.entry("LABU_STATE_DIR".to_string())
            .or_insert_with(|| "/state".to_string());
        env.entry("LABU_NETWORK".to_string()).or_insert_with(|| {
            config
                .networks
                .first()
                .cloned()
                .unwrap_or_else(|| "devnet".to_string())
        });

        let opts = RunOptions {
            image,
            name: None,
            env,
            mounts: vec![format!("{}:/labu-files:ro", node_dir.display())],
            network: Some(RUN_NETWORK.to_string()),
        };
        let container = self.runtime.run(&opts).await?;
        let ip = self
            .runtime
            .container_ip(RUN_NETWORK, &container)
            .await
            .unwrap_or_default();

        let node = Node {
            client_name: config.client.clone(),
            ip: ip.clone(),
            instantiated_at: results::now_rfc3339(),
            log_file: format!("clients/{}/client-{}.log", config.client, container),
        };
        {
            let mut inner = self.inner.lock();
            if let Some(test) = inner
                .suites
                .get_mut(&suite_id)
                .and_then(|suite| suite.tests.get_mut(&test_id))
            {
                test.nodes.insert(container.clone(), node);
            }
        }

        Ok(NodeHandle { id: container, ip })
    }

    pub async fn remove_node(&self, container: &str) -> Result<(), ControllerError> {
        self.runtime.remove(container).await?;
        Ok(())
    }

    /// Diagnostic lookup: scans all suites for the node and returns what it
    /// knows, falling back to a bare `{id}` stub for unknown ids.
    pub fn node_info(&self, container: &str) -> HashMap<String, String> {
        let inner = self.inner.lock();
        for suite in inner.suites.values() {
            for test in suite.tests.values() {
                if let Some(node) = test.nodes.get(container) {
                    return HashMap::from([
                        ("id".to_string(), container.to_string()),
                        ("name".to_string(), node.client_name.clone()),
                    ]);
                }
            }
        }
        HashMap::from([("id".to_string(), container.to_string())])
    }

    pub async fn exec(
        &self,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ControllerError> {
        Ok(self.runtime.exec(container, command).await?)
    }

    /// Idempotent within the run: the adapter is invoked at most once per
    /// active network name.
    pub async fn create_network(&self, name: &str) -> Result<(), ControllerError> {
        {
            let mut inner = self.inner.lock();
            if !inner.networks.insert(name.to_string()) {
                return Ok(());
            }
        }
        self.runtime.create_network(name).await?;
        Ok(())
    }

    /// Removes an active network; names not in the active set are ignored.
    pub async fn remove_network(&self, name: &str) -> Result<(), ControllerError> {
        let known = self.inner.lock().networks.remove(name);
        if !known {
            return Ok(());
        }
        self.runtime.remove_network(name).await?;
        Ok(())
    }

    pub async fn connect_network(
        &self,
        name: &str,
        container: &str,
    ) -> Result<(), ControllerError> {
        self.runtime.connect_network(name, container).await?;
        Ok(())
    }

    pub async fn disconnect_network(
        &self,
        name: &str,
        container: &str,
    ) -> Result<(), ControllerError> {
        self.runtime.disconnect_network(name, container).await?;
        Ok(())
    }

    pub async fn network_ip(
        &self,
        name: &str,
        container: &str,
    ) -> Result<String, ControllerError> {
        Ok(self.runtime.container_ip(name, container).await?)
    }

    /// Writes every held suite result. Snapshots are taken under the lock;
    /// file writes happen outside it.
    pub fn save_results(&self, writer: &Writer) -> Result<(), WriterError> {
        let snapshots: Vec<SuiteResult> = self.inner.lock().results.values().cloned().collect();
        for result in &snapshots {
            writer.write_suite(result)?;
        }
        Ok(())
    }

    pub fn set_sim_log(&self, log_file: &str) {
        let mut inner = self.inner.lock();
        for result in inner.results.values_mut() {
            result.sim_log = log_file.to_string();
        }
    }

    /// Records the run's client roster and ensures every held result has a
    /// version slot for each named client.
    pub fn set_client_versions(&self, names: &[String]) {
        let mut inner = self.inner.lock();
        inner.run_clients = names.to_vec();
        for result in inner.results.values_mut() {
            for name in names {
                result
                    .client_versions
                    .entry(name.clone())
                    .or_insert_with(String::new);
            }
        }
    }
}

fn load_clients(workspace: &Path) -> HashMap<String, ClientDef> {
    let root = workspace.join("..").join("clients");
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(_) => return HashMap::new(),
    };
    let mut clients = HashMap::new();
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = root.join(&name);
        let meta = std::fs::read(dir.join(CLIENT_DESCRIPTOR))
            .ok()
            .and_then(|raw| serde_yaml::from_slice(&raw).ok())
            .unwrap_or_default();
        clients.insert(
            name.clone(),
            ClientDef {
                name,
                version: String::new(),
                meta,
                dir,
            },
        );
    }
    clients
}
