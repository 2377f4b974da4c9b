use serde::Serialize;
use skiff_config::{MachineSpec, PortMapping};
use skiff_docker::ContainerDetails;

use crate::ClusterError;

/// One resolved replica of a machine set.
///
/// Always recomputed from the declared config plus the replica index; the
/// only live state it can carry is the inspection overlay applied by
/// [`crate::Cluster::gather`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub name: String,
    pub hostname: String,
    pub index: usize,
    pub spec: MachineSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Machine {
    pub fn port_mapping(&self, container_port: u16) -> Option<&PortMapping> {
        self.spec
            .port_mappings
            .iter()
            .find(|mapping| mapping.container_port == container_port)
    }

    /// Effective published host port for `container_port` on this replica:
    /// the declared base port offset by the replica index. Mappings without
    /// a declared host port are backend-allocated and not addressable from
    /// the declared table.
    pub fn host_port(&self, container_port: u16) -> Result<u16, ClusterError> {
        let base = self
            .port_mapping(container_port)
            .and_then(|mapping| mapping.host_port)
            .ok_or_else(|| ClusterError::UnknownPort {
                machine: self.name.clone(),
                container_port,
            })?;
        let port = base as u32 + self.index as u32;
        u16::try_from(port).map_err(|_| ClusterError::PortOutOfRange {
            machine: self.name.clone(),
            host_port: port,
        })
    }

    /// Overlay live backend inspection data onto the declared record.
    /// Display-only; never written back to the configuration.
    pub fn apply_details(&mut self, details: &ContainerDetails) {
        let mut ports = Vec::new();
        for (key, bindings) in &details.network_settings.ports {
            let Some(bindings) = bindings else { continue };
            let Some(binding) = bindings.first() else { continue };
            let (container_port, protocol) = match key.split_once('/') {
                Some((port, proto)) => (port, Some(proto.to_owned())),
                None => (key.as_str(), None),
            };
            let Ok(container_port) = container_port.parse() else { continue };
            ports.push(PortMapping {
                container_port,
                host_port: binding.host_port.parse().ok(),
                address: (!binding.host_ip.is_empty()).then(|| binding.host_ip.clone()),
                protocol,
            });
        }
        self.spec.port_mappings = ports;

        self.spec.volumes = details
            .mounts
            .iter()
            .map(|mount| skiff_config::Volume {
                kind: mount.kind.clone(),
                source: (!mount.source.is_empty()).then(|| mount.source.clone()),
                destination: mount.destination.clone(),
                read_only: !mount.rw,
            })
            .collect();

        if let Some(cmd) = &details.config.cmd {
            self.spec.cmd = Some(cmd.join(","));
        }

        if !details.network_settings.ip_address.is_empty() {
            self.ip = Some(details.network_settings.ip_address.clone());
        }
    }
}
