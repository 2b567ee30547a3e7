//! Container runtime adapter.
//!
//! The orchestration core talks to the container engine through the
//! [`ContainerRuntime`] capability set. The reference implementation shells
//! out to the `docker` CLI; anything that satisfies the trait works, and the
//! tests substitute a mock.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

/// Errors surfaced by the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("unexpected output from `{command}`: {output}")]
    Malformed { command: String, output: String },
}

/// Options for starting a detached container.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub image: String,
    pub name: Option<String>,
    /// Ordered so the emitted CLI arguments are deterministic.
    pub env: BTreeMap<String, String>,
    /// `host:container[:opts]` bind specs.
    pub mounts: Vec<String>,
    pub network: Option<String>,
}

/// Output of a command executed inside a container.
#[derive(Clone, Debug, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The capability set the orchestration core needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds an image from a Dockerfile and tags it.
    async fn build(&self, context: &Path, dockerfile: &Path, tag: &str)
        -> Result<(), RuntimeError>;

    /// Starts a detached container and returns its id.
    async fn run(&self, opts: &RunOptions) -> Result<String, RuntimeError>;

    /// Runs a command inside a container. A non-zero command exit is reported
    /// in [`ExecOutput`], not as an error.
    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, RuntimeError>;

    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, container: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container exits and returns its exit code.
    async fn wait(&self, container: &str) -> Result<i32, RuntimeError>;

    async fn logs(&self, container: &str) -> Result<String, RuntimeError>;

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError>;

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    async fn connect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError>;

    async fn disconnect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError>;

    /// The container's IP address on the given network.
    async fn container_ip(&self, network: &str, container: &str) -> Result<String, RuntimeError>;
}

struct CliOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Reference implementation shelling out to the `docker` CLI.
pub struct CliRunner {
    program: String,
}

impl CliRunner {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    async fn command(&self, args: &[String]) -> Result<CliOutput, RuntimeError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                command: self.rendered(args),
                source,
            })?;
        Ok(CliOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs a CLI command and fails on a non-zero exit, returning stdout.
    async fn checked(&self, args: Vec<String>) -> Result<String, RuntimeError> {
        let out = self.command(&args).await?;
        if out.exit_code != 0 {
            return Err(RuntimeError::Command {
                command: self.rendered(&args),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    fn rendered(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }
}

impl Default for CliRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for CliRunner {
    async fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ];
        self.checked(args).await?;
        Ok(())
    }

    async fn run(&self, opts: &RunOptions) -> Result<String, RuntimeError> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if let Some(name) = &opts.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if let Some(network) = &opts.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for mount in &opts.mounts {
            args.push("-v".to_string());
            args.push(mount.clone());
        }
        for (key, value) in &opts.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(opts.image.clone());
        let stdout = self.checked(args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(command.iter().cloned());
        let out = self.command(&args).await?;
        Ok(ExecOutput {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.checked(vec!["stop".to_string(), container.to_string()])
            .await?;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        self.checked(vec![
            "rm".to_string(),
            "-f".to_string(),
            container.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn wait(&self, container: &str) -> Result<i32, RuntimeError> {
        let args = vec!["wait".to_string(), container.to_string()];
        let stdout = self.checked(args.clone()).await?;
        let code = stdout.trim();
        if code.is_empty() {
            return Ok(0);
        }
        code.parse().map_err(|_| RuntimeError::Malformed {
            command: self.rendered(&args),
            output: code.to_string(),
        })
    }

    async fn logs(&self, container: &str) -> Result<String, RuntimeError> {
        self.checked(vec!["logs".to_string(), container.to_string()])
            .await
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.checked(vec![
            "network".to_string(),
            "create".to_string(),
            name.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.checked(vec![
            "network".to_string(),
            "rm".to_string(),
            name.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn connect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError> {
        self.checked(vec![
            "network".to_string(),
            "connect".to_string(),
            name.to_string(),
            container.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn disconnect_network(&self, name: &str, container: &str) -> Result<(), RuntimeError> {
        self.checked(vec![
            "network".to_string(),
            "disconnect".to_string(),
            name.to_string(),
            container.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn container_ip(&self, network: &str, container: &str) -> Result<String, RuntimeError> {
        let format = format!("{{{{.NetworkSettings.Networks.{network}.IPAddress}}}}");
        let stdout = self
            .checked(vec![
                "inspect".to_string(),
                "-f".to_string(),
                format,
                container.to_string(),
            ])
            .await?;
        Ok(stdout.trim().to_string())
    }
}
