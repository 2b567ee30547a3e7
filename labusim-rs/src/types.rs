use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type SuiteId = u32;
pub type TestId = u32;

/// Returned by the node startup endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StartNodeResponse {
    /// Container id; doubles as the node id.
    pub id: String,
    /// IP address on the run's overlay network.
    pub ip: String,
}

/// Served by the `/clients` endpoint to list the available clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientDefinition {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRequest {
    pub name: String,
    pub description: String,
}

/// Describes the outcome of a test.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestResult {
    pub pass: bool,
    pub details: String,
}

/// Result of a command executed inside a client container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Launch request for a client container.
#[derive(Clone, Debug, Default)]
pub struct ClientSpec {
    pub client: String,
    pub networks: Vec<String>,
    pub environment: HashMap<String, String>,
    /// Destination file name under `/labu-files` -> host path of the content.
    pub files: HashMap<String, PathBuf>,
}
