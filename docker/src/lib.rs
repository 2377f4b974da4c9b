//! Container backend contract and its Docker CLI implementation.
//!
//! The orchestrator only talks to the [`Backend`] trait; [`Docker`] drives
//! the `docker` binary through [`skiff_cmd::Command`]. Lifecycle state is
//! never cached here: every predicate is a fresh query.

mod inspect;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use skiff_cmd::{Command, CommandError};

pub use crate::inspect::{ContainerConfig, ContainerDetails, MountPoint, NetworkSettings, PortBinding};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to decode inspect record for container {name}: {source}")]
    DecodeInspect {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The narrow contract the orchestrator needs from a container runtime.
///
/// `exists` follows the runtime's own vocabulary where a container "runs"
/// as soon as it is created; `is_started` asks whether the process inside
/// it is actually executing. The two are independent predicates.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Pull `image` unless it is already present locally.
    async fn pull_if_absent(&self, image: &str) -> Result<(), BackendError>;

    /// Create and start a detached container; returns the container id.
    async fn run(
        &self,
        image: &str,
        args: &[String],
        command: &[String],
    ) -> Result<String, BackendError>;

    /// Full inspection record for a known container.
    async fn inspect(&self, name: &str) -> Result<ContainerDetails, BackendError>;

    async fn start(&self, name: &str) -> Result<(), BackendError>;

    async fn stop(&self, name: &str) -> Result<(), BackendError>;

    async fn kill(&self, signal: &str, name: &str) -> Result<(), BackendError>;

    async fn remove(&self, name: &str) -> Result<(), BackendError>;

    /// Does the runtime know a container by this name at all?
    async fn exists(&self, name: &str) -> Result<bool, BackendError>;

    /// Is the container's init process executing right now?
    async fn is_started(&self, name: &str) -> Result<bool, BackendError>;

    /// Run a shell script inside the container.
    async fn exec_script(&self, name: &str, script: &str) -> Result<(), BackendError>;

    /// Write `content` to `dest` inside the container.
    async fn copy_into(&self, name: &str, content: &[u8], dest: &str) -> Result<(), BackendError>;
}

/// Backend implementation over the `docker` command-line client.
#[derive(Debug, Default, Clone)]
pub struct Docker;

#[async_trait]
impl Backend for Docker {
    async fn pull_if_absent(&self, image: &str) -> Result<(), BackendError> {
        let present = Command::new("docker")
            .args(["image", "inspect", image])
            .succeeds()
            .await?;
        if present {
            debug!("Image {image} already present");
            return Ok(());
        }
        Command::new("docker").args(["pull", image]).run().await?;
        Ok(())
    }

    async fn run(
        &self,
        image: &str,
        args: &[String],
        command: &[String],
    ) -> Result<String, BackendError> {
        let mut cmd = Command::new("docker");
        cmd.arg("run").args(args).arg(image).args(command);
        debug!("Running container: {cmd}");
        Ok(cmd.run_text().await?)
    }

    async fn inspect(&self, name: &str) -> Result<ContainerDetails, BackendError> {
        let json = Command::new("docker")
            .args(["inspect", "--format", "{{json .}}", name])
            .run_text()
            .await?;
        serde_json::from_str(&json).map_err(|source| BackendError::DecodeInspect {
            name: name.to_owned(),
            source,
        })
    }

    async fn start(&self, name: &str) -> Result<(), BackendError> {
        Command::new("docker").args(["start", name]).run().await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), BackendError> {
        Command::new("docker").args(["stop", name]).run().await?;
        Ok(())
    }

    async fn kill(&self, signal: &str, name: &str) -> Result<(), BackendError> {
        Command::new("docker")
            .args(["kill", "--signal", signal, name])
            .run()
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), BackendError> {
        Command::new("docker").args(["rm", name]).run().await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, BackendError> {
        Ok(Command::new("docker")
            .args(["inspect", "--type", "container", name])
            .succeeds()
            .await?)
    }

    async fn is_started(&self, name: &str) -> Result<bool, BackendError> {
        let out = Command::new("docker")
            .args(["inspect", "--format", "{{.State.Running}}", name])
            .output()
            .await?;
        if !out.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim() == "true")
    }

    async fn exec_script(&self, name: &str, script: &str) -> Result<(), BackendError> {
        Command::new("docker")
            .args(["exec", name, "/bin/sh", "-c", script])
            .run()
            .await?;
        Ok(())
    }

    async fn copy_into(&self, name: &str, content: &[u8], dest: &str) -> Result<(), BackendError> {
        Command::new("docker")
            .args(["exec", "-i", name])
            .args(["/bin/sh", "-c", &format!("cat > {dest}")])
            .input(content.to_vec())
            .run()
            .await?;
        Ok(())
    }
}
