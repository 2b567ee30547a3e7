use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::testmatch::TestMatcher;
use crate::types::{
    ClientDefinition, ClientSpec, ExecResult, StartNodeResponse, SuiteId, TestId, TestRequest,
    TestResult,
};
use crate::vectors;

pub const ENV_SIMULATOR: &str = "LABU_SIMULATOR";
pub const ENV_TEST_PATTERN: &str = "LABU_TEST_PATTERN";
pub const ENV_PARALLELISM: &str = "LABU_PARALLELISM";
pub const ENV_CLIENTS: &str = "LABU_CLIENTS";
pub const ENV_VECTOR_DIR: &str = "LABU_VECTOR_DIR";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9000";
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The harness rejected the request; carries the decoded server message.
    #[error("{0}")]
    Server(String),
}

/// Wraps the control-plane HTTP API served by the harness.
#[derive(Clone, Debug)]
pub struct Simulation {
    pub url: String,
    pub test_matcher: Option<TestMatcher>,
    pub parallelism: u32,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

// The JSON shape of the `config` multipart part.
#[derive(Serialize)]
struct LaunchConfig<'a> {
    client: &'a str,
    networks: &'a [String],
    environment: &'a HashMap<String, String>,
}

impl Simulation {
    /// Looks up the harness URL from `LABU_SIMULATOR`, falling back to the
    /// local default when unset. An unparsable test pattern is ignored.
    pub fn new() -> Self {
        let url = env::var(ENV_SIMULATOR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let test_matcher = env::var(ENV_TEST_PATTERN)
            .ok()
            .filter(|pattern| !pattern.is_empty())
            .and_then(|pattern| TestMatcher::new(&pattern).ok());
        let parallelism = env::var(ENV_PARALLELISM)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(1);
        Self {
            url,
            test_matcher,
            parallelism,
        }
    }

    fn http(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }

    pub async fn start_suite(&self, name: &str, description: &str) -> Result<SuiteId, SimError> {
        let url = format!("{}/testsuite", self.url);
        let body = TestRequest {
            name: name.to_string(),
            description: description.to_string(),
        };
        let resp = check(self.http().post(url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn end_suite(&self, suite: SuiteId) -> Result<(), SimError> {
        let url = format!("{}/testsuite/{}", self.url, suite);
        check(self.http().delete(url).send().await?).await?;
        Ok(())
    }

    pub async fn start_test(
        &self,
        suite: SuiteId,
        name: &str,
        description: &str,
    ) -> Result<TestId, SimError> {
        let url = format!("{}/testsuite/{}/test", self.url, suite);
        let body = TestRequest {
            name: name.to_string(),
            description: description.to_string(),
        };
        let resp = check(self.http().post(url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn end_test(
        &self,
        suite: SuiteId,
        test: TestId,
        result: TestResult,
    ) -> Result<(), SimError> {
        let url = format!("{}/testsuite/{}/test/{}", self.url, suite, test);
        check(self.http().post(url).json(&result).send().await?).await?;
        Ok(())
    }

    /// Launches a client container, applying the vector auto-mount defaults
    /// first. Returns the node's container id and overlay-network IP.
    pub async fn start_client(
        &self,
        suite: SuiteId,
        test: TestId,
        mut spec: ClientSpec,
    ) -> Result<StartNodeResponse, SimError> {
        if let Some(dir) = vector_dir() {
            vectors::apply_vector_defaults(&mut spec, &dir);
        }

        let config = serde_json::to_string(&LaunchConfig {
            client: &spec.client,
            networks: &spec.networks,
            environment: &spec.environment,
        })?;
        let mut form = reqwest::multipart::Form::new().text("config", config);
        for (dest, path) in &spec.files {
            let data = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| dest.clone());
            form = form.part(
                dest.clone(),
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );
        }

        let url = format!("{}/testsuite/{}/test/{}/node", self.url, suite, test);
        let resp = check(self.http().post(url).multipart(form).send().await?).await?;
        Ok(resp.json().await?)
    }

    /// Runs a command inside a launched node.
    pub async fn exec(
        &self,
        suite: SuiteId,
        test: TestId,
        node: &str,
        command: &[String],
    ) -> Result<ExecResult, SimError> {
        let url = format!(
            "{}/testsuite/{}/test/{}/node/{}/exec",
            self.url, suite, test, node
        );
        let body = serde_json::json!({ "command": command });
        let resp = check(self.http().post(url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }

    /// All client types available to this run.
    pub async fn client_types(&self) -> Result<Vec<ClientDefinition>, SimError> {
        let url = format!("{}/clients", self.url);
        let resp = check(self.http().get(url).send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// Client names passed by the harness, comma separated.
pub fn client_list() -> Vec<String> {
    env::var(ENV_CLIENTS)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The vectors directory mounted into the simulator container, when present.
pub fn vector_dir() -> Option<PathBuf> {
    env::var(ENV_VECTOR_DIR)
        .ok()
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

#[derive(Deserialize)]
struct ErrorMessage {
    error: String,
}

/// Treats any non-2xx response as a failure, decoding the server's error
/// envelope and falling back to the raw body.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SimError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if body.is_empty() {
        return Err(SimError::Server("request failed".to_string()));
    }
    match serde_json::from_str::<ErrorMessage>(&body) {
        Ok(msg) if !msg.error.is_empty() => Err(SimError::Server(msg.error)),
        _ => Err(SimError::Server(body)),
    }
}
