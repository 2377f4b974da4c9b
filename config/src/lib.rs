//! Declarative cluster description: a named cluster, an SSH key path, and an
//! ordered list of machine sets, each a spec plus a replica count.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read cluster file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize cluster config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("failed to write cluster file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Root of the declarative model. Loaded once; only ever re-saved verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub machines: Vec<MachineSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster name, prefixed onto every container name.
    pub name: String,
    /// Path to the SSH private key; `~/` is expanded by the orchestrator.
    pub private_key: String,
}

/// A machine spec shared by `count` replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSet {
    pub count: usize,
    pub spec: MachineSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Machine name template; a single `%d` slot receives the replica index.
    pub name: String,
    pub image: String,
    /// Override for the container entry command. Defaults to a full init.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Mount type as understood by the backend ("bind", "volume", "tmpfs").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub destination: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    /// Base host port; replica `i` publishes on `host_port + i`. When absent
    /// the backend picks a free port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !value
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        fs::write(path, text)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_owned(),
                source,
            })
    }

    /// A minimal single-machine cluster, used by `skiff init`.
    pub fn sample(name: &str) -> Self {
        Config {
            cluster: ClusterConfig {
                name: name.to_owned(),
                private_key: format!("{name}-key"),
            },
            machines: vec![MachineSet {
                count: 1,
                spec: MachineSpec {
                    name: "node%d".to_owned(),
                    image: "debian:bookworm".to_owned(),
                    cmd: None,
                    privileged: false,
                    volumes: vec![],
                    port_mappings: vec![PortMapping {
                        container_port: 22,
                        host_port: Some(2222),
                        address: None,
                        protocol: None,
                    }],
                },
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER_YAML: &str = "
cluster:
  name: firecrest
  privateKey: firecrest-key
machines:
- count: 2
  spec:
    name: node%d
    image: debian:bookworm
    privileged: true
    volumes:
    - type: bind
      source: /var/lib/data
      destination: /data
      readOnly: true
    - type: volume
      destination: /scratch
    portMappings:
    - containerPort: 22
      hostPort: 2222
    - containerPort: 80
";

    #[test]
    fn test_parse_full_cluster() {
        let config: Config = serde_yaml::from_str(CLUSTER_YAML).expect("parses");
        assert_eq!(config.cluster.name, "firecrest");
        assert_eq!(config.cluster.private_key, "firecrest-key");
        assert_eq!(config.machines.len(), 1);

        let set = &config.machines[0];
        assert_eq!(set.count, 2);
        assert_eq!(set.spec.name, "node%d");
        assert!(set.spec.privileged);
        assert_eq!(set.spec.cmd, None);

        assert_eq!(set.spec.volumes.len(), 2);
        assert_eq!(set.spec.volumes[0].kind, "bind");
        assert_eq!(set.spec.volumes[0].source.as_deref(), Some("/var/lib/data"));
        assert!(set.spec.volumes[0].read_only);
        assert_eq!(set.spec.volumes[1].source, None);
        assert!(!set.spec.volumes[1].read_only);

        assert_eq!(set.spec.port_mappings.len(), 2);
        assert_eq!(set.spec.port_mappings[0].host_port, Some(2222));
        assert_eq!(set.spec.port_mappings[1].container_port, 80);
        assert_eq!(set.spec.port_mappings[1].host_port, None);
    }

    #[test]
    fn test_machines_default_to_empty() {
        let config: Config =
            serde_yaml::from_str("cluster: { name: lone, privateKey: k }").expect("parses");
        assert!(config.machines.is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config: Config = serde_yaml::from_str(CLUSTER_YAML).expect("parses");
        let text = serde_yaml::to_string(&config).expect("serializes");
        let reparsed: Config = serde_yaml::from_str(&text).expect("reparses");
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_sample_declares_ssh_port() {
        let config = Config::sample("demo");
        assert_eq!(config.cluster.name, "demo");
        let ports = &config.machines[0].spec.port_mappings;
        assert_eq!(ports[0].container_port, 22);
        assert_eq!(ports[0].host_port, Some(2222));
    }
}
