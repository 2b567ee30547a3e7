//! In-memory result document for one run and the on-disk writer.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Pass/fail verdict of a single test.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryResult {
    pub pass: bool,
    pub details: String,
}

/// Snapshot of a client container that took part in a test.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip: String,
    pub name: String,
    pub instantiated_at: String,
    pub log_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub name: String,
    pub description: String,
    pub start: String,
    pub end: String,
    pub summary_result: SummaryResult,
    /// Keyed by node (container) id.
    pub client_info: HashMap<String, ClientInfo>,
}

/// Accumulated outcome of one suite. Retained for the life of the run, even
/// after the live suite record is deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub client_versions: HashMap<String, String>,
    pub sim_log: String,
    /// Keyed by the test id rendered as a decimal string.
    pub test_cases: HashMap<String, TestCaseResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Serializes suite results under `<workspace>/results/suite-<id>.json`.
#[derive(Clone, Debug)]
pub struct Writer {
    workspace: PathBuf,
}

impl Writer {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn write_suite(&self, result: &SuiteResult) -> Result<(), WriterError> {
        let dir = self.workspace.join("results");
        std::fs::create_dir_all(&dir)?;
        let data = serde_json::to_vec_pretty(result)?;
        std::fs::write(dir.join(format!("suite-{}.json", result.id)), data)?;
        Ok(())
    }
}

/// Current time as RFC 3339 with nanosecond precision, UTC.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
