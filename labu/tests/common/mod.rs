#![allow(dead_code)]
//! Shared mock container runtime for the integration tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use labu::docker::{ContainerRuntime, ExecOutput, RunOptions, RuntimeError};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Build {
        tag: String,
    },
    Run {
        image: String,
        env: BTreeMap<String, String>,
        mounts: Vec<String>,
        network: Option<String>,
    },
    Exec {
        container: String,
        command: Vec<String>,
    },
    Stop(String),
    Remove(String),
    Wait(String),
    Logs(String),
    CreateNetwork(String),
    RemoveNetwork(String),
    ConnectNetwork(String, String),
    DisconnectNetwork(String, String),
    ContainerIp(String, String),
}

/// Records every adapter invocation and hands out canned responses.
pub struct MockRuntime {
    calls: Mutex<Vec<Call>>,
    next_container: AtomicU32,
    pub wait_code: AtomicI32,
    fail_builds: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_container: AtomicU32::new(1),
            wait_code: AtomicI32::new(0),
            fail_builds: Mutex::new(Vec::new()),
        }
    }

    /// Makes builds of the given tag fail from now on.
    pub fn fail_build(&self, tag: &str) {
        self.fail_builds.lock().unwrap().push(tag.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn build(
        &self,
        _context: &Path,
        _dockerfile: &Path,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        self.record(Call::Build {
            tag: tag.to_string(),
        });
        if self.fail_builds.lock().unwrap().iter().any(|t| t == tag) {
            return Err(RuntimeError::Command {
                command: format!("docker build -t {tag}"),
                stderr: "build refused".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, opts: &RunOptions) -> Result<String, RuntimeError> {
        self.record(Call::Run {
            image: opts.image.clone(),
            env: opts.env.clone(),
            mounts: opts.mounts.clone(),
            network: opts.network.clone(),
        });
        let n = self.next_container.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ctr-{n}"))
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.record(Call::Exec {
            container: container.to_string(),
            command: command.to_vec(),
        });
        let stdout = if command.first().map(String::as_str) == Some("echo") {
            format!("{}\n", command[1..].join(" "))
        } else {
            String::new()
        };
        Ok(ExecOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.record(Call::Stop(container.to_string()));
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        self.record(Call::Remove(container.to_string()));
        Ok(())
    }

    async fn wait(&self, container: &str) -> Result<i32, RuntimeError> {
        self.record(Call::Wait(container.to_string()));
        Ok(self.wait_code.load(Ordering::SeqCst))
    }

    async fn logs(&self, container: &str) -> Result<String, RuntimeError> {
        self.record(Call::Logs(container.to_string()));
        Ok("simulator output\n".to_string())
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(Call::CreateNetwork(name.to_string()));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(Call::RemoveNetwork(name.to_string()));
        Ok(())
    }

    async fn connect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError> {
        self.record(Call::ConnectNetwork(name.to_string(), container.to_string()));
        Ok(())
    }

    async fn disconnect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError> {
        self.record(Call::DisconnectNetwork(
            name.to_string(),
            container.to_string(),
        ));
        Ok(())
    }

    async fn container_ip(&self, network: &str, container: &str) -> Result<String, RuntimeError> {
        self.record(Call::ContainerIp(
            network.to_string(),
            container.to_string(),
        ));
        Ok("172.28.0.2".to_string())
    }
}
