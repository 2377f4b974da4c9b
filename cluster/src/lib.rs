//! The cluster lifecycle orchestrator: expands the declared machine sets into
//! addressable machine instances, drives each through its lifecycle against
//! the container backend, and establishes SSH sessions to fresh instances.

mod cluster;
mod keys;
mod machine;
mod name;
mod provision;
mod ssh;

use std::path::PathBuf;

use thiserror::Error;

pub use crate::cluster::Cluster;
pub use crate::machine::Machine;
pub use crate::name::{container_name, expand_name};
pub use crate::ssh::{SshSession, ssh_args};

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Config(#[from] skiff_config::ConfigError),

    #[error(transparent)]
    Backend(#[from] skiff_docker::BackendError),

    #[error(transparent)]
    Command(#[from] skiff_cmd::CommandError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}: invalid machine hostname")]
    InvalidHostname(String),

    #[error("machine with name {0} not found")]
    MachineNotFound(String),

    #[error("machine {machine} has no published host port for container port {container_port}")]
    UnknownPort { machine: String, container_port: u16 },

    #[error("machine {machine}: published host port {host_port} is out of range")]
    PortOutOfRange { machine: String, host_port: u32 },

    #[error("could not determine the home directory")]
    HomeDir,

    #[error("failed to read public key {path}: {source}")]
    PublicKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh exited with failure: {command}")]
    SshFailed { command: String },
}
