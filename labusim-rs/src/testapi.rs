use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::simulation::{SimError, Simulation};
use crate::types::{ClientSpec, ExecResult, SuiteId, TestId, TestResult};
use crate::utils::extract_test_result;

/// Port the client image contract exposes for HTTP probing.
pub const CLIENT_HTTP_PORT: u16 = 8080;

pub type AsyncTestFunc = fn(&mut Test) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

pub type AsyncClientTestFunc =
    fn(&mut Test, Client) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

/// A named group of tests driven against one simulator run.
#[derive(Clone, Default)]
pub struct Suite {
    pub name: String,
    pub description: String,
    pub tests: Vec<TestSpec>,
    pub client_tests: Vec<ClientTestSpec>,
}

impl Suite {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            tests: Vec::new(),
            client_tests: Vec::new(),
        }
    }

    pub fn add(&mut self, spec: TestSpec) {
        self.tests.push(spec)
    }

    pub fn add_client(&mut self, spec: ClientTestSpec) {
        self.client_tests.push(spec)
    }
}

/// A free-form test.
#[derive(Clone)]
pub struct TestSpec {
    pub name: String,
    pub description: String,
    // Invoked when the test executes.
    pub run: AsyncTestFunc,
}

/// A test that gets a client container launched before its body runs.
#[derive(Clone)]
pub struct ClientTestSpec {
    pub name: String,
    pub description: String,
    pub client: String,
    pub networks: Vec<String>,
    pub environment: HashMap<String, String>,
    /// Destination file name under `/labu-files` -> host path.
    pub files: HashMap<String, PathBuf>,
    pub run: AsyncClientTestFunc,
}

impl ClientTestSpec {
    fn client_spec(&self) -> ClientSpec {
        ClientSpec {
            client: self.client.clone(),
            networks: self.networks.clone(),
            environment: self.environment.clone(),
            files: self.files.clone(),
        }
    }
}

/// A running test. Passed to test bodies; accumulates the verdict that is
/// reported when the body returns.
pub struct Test {
    sim: Simulation,
    pub suite_id: SuiteId,
    pub test_id: TestId,
    result: TestResult,
}

impl Test {
    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    /// Marks the test failed with the given details.
    pub fn fail(&mut self, details: impl Into<String>) {
        self.result.pass = false;
        self.result.details = details.into();
    }

    /// Appends a line to the test's detail output.
    pub fn log(&mut self, line: &str) {
        if self.result.details.is_empty() {
            self.result.details = line.to_string();
        } else {
            self.result.details.push('\n');
            self.result.details.push_str(line);
        }
    }

    /// Launches an additional client container bound to this test.
    pub async fn launch_client(&self, spec: ClientSpec) -> Result<Client, SimError> {
        launch(&self.sim, self.suite_id, self.test_id, spec).await
    }
}

/// A running client container.
#[derive(Clone, Debug)]
pub struct Client {
    pub kind: String,
    pub container: String,
    pub ip: String,
    /// HTTP endpoint of the client per the image contract.
    pub base_url: String,
    sim: Simulation,
    suite_id: SuiteId,
    test_id: TestId,
}

impl Client {
    /// Runs a command inside the client container.
    pub async fn exec(&self, command: &[String]) -> Result<ExecResult, SimError> {
        self.sim
            .exec(self.suite_id, self.test_id, &self.container, command)
            .await
    }
}

async fn launch(
    sim: &Simulation,
    suite_id: SuiteId,
    test_id: TestId,
    spec: ClientSpec,
) -> Result<Client, SimError> {
    let kind = spec.client.clone();
    let node = sim.start_client(suite_id, test_id, spec).await?;
    let base_url = format!("http://{}:{}", node.ip, CLIENT_HTTP_PORT);
    Ok(Client {
        kind,
        container: node.id,
        ip: node.ip,
        base_url,
        sim: sim.clone(),
        suite_id,
        test_id,
    })
}

/// Runs a suite against the harness: creates it, executes each matching test
/// sequentially, and deletes it. The suite is deleted even when a test fails
/// to communicate with the harness mid-way.
pub async fn run_suite(sim: &Simulation, suite: &Suite) -> Result<(), SimError> {
    let suite_id = sim.start_suite(&suite.name, &suite.description).await?;
    let outcome = run_tests(sim, suite_id, suite).await;
    let ended = sim.end_suite(suite_id).await;
    outcome.and(ended)
}

async fn run_tests(sim: &Simulation, suite_id: SuiteId, suite: &Suite) -> Result<(), SimError> {
    for spec in &suite.tests {
        if !matches(sim, &spec.name) {
            continue;
        }
        let test_id = sim
            .start_test(suite_id, &spec.name, &spec.description)
            .await?;
        let result = run_body(sim, suite_id, test_id, spec.run).await;
        sim.end_test(suite_id, test_id, result).await?;
    }

    for spec in &suite.client_tests {
        if !matches(sim, &spec.name) {
            continue;
        }
        let test_id = sim
            .start_test(suite_id, &spec.name, &spec.description)
            .await?;
        let client = match launch(sim, suite_id, test_id, spec.client_spec()).await {
            Ok(client) => client,
            Err(err) => {
                let result = TestResult {
                    pass: false,
                    details: format!("client launch failed: {err}"),
                };
                // Best-effort report; a launch failure must not abort the
                // remaining tests.
                let _ = sim.end_test(suite_id, test_id, result).await;
                continue;
            }
        };
        let result = run_client_body(sim, suite_id, test_id, spec.run, client).await;
        sim.end_test(suite_id, test_id, result).await?;
    }
    Ok(())
}

// Bodies run in a spawned task so a panic is captured as a failure instead
// of tearing down the suite loop.
async fn run_body(
    sim: &Simulation,
    suite_id: SuiteId,
    test_id: TestId,
    run: AsyncTestFunc,
) -> TestResult {
    let task_sim = sim.clone();
    extract_test_result(
        tokio::spawn(async move {
            let mut test = new_test(task_sim, suite_id, test_id);
            (run)(&mut test).await;
            test.result
        })
        .await,
    )
}

async fn run_client_body(
    sim: &Simulation,
    suite_id: SuiteId,
    test_id: TestId,
    run: AsyncClientTestFunc,
    client: Client,
) -> TestResult {
    let task_sim = sim.clone();
    extract_test_result(
        tokio::spawn(async move {
            let mut test = new_test(task_sim, suite_id, test_id);
            (run)(&mut test, client).await;
            test.result
        })
        .await,
    )
}

fn new_test(sim: Simulation, suite_id: SuiteId, test_id: TestId) -> Test {
    Test {
        sim,
        suite_id,
        test_id,
        result: TestResult {
            pass: true,
            details: String::new(),
        },
    }
}

fn matches(sim: &Simulation, name: &str) -> bool {
    sim.test_matcher
        .as_ref()
        .map(|matcher| matcher.matches(name))
        .unwrap_or(true)
}
