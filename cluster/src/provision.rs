//! Backend run arguments and first-boot setup for a fresh machine.

use skiff_config::{PortMapping, Volume};

use crate::machine::Machine;

/// Entry command when the spec declares none: boot a full init so the
/// machine behaves like a host (sshd, journald, ...).
pub const DEFAULT_COMMAND: &str = "/sbin/init";

pub const AUTHORIZED_KEYS_PATH: &str = "/root/.ssh/authorized_keys";

/// First-boot shell sequence: allow logins and prepare the SSH directory
/// with owner-only permissions.
pub const INIT_SCRIPT: &str = "\
set -e
rm -f /run/nologin
sshdir=/root/.ssh
mkdir $sshdir; chmod 700 $sshdir
touch $sshdir/authorized_keys; chmod 600 $sshdir/authorized_keys
";

/// Full backend run-argument list for one machine instance.
pub fn run_args(cluster_name: &str, machine: &Machine) -> Vec<String> {
    let mut args: Vec<String> = [
        "-it",
        "-d",
        "--label",
        "io.skiff.owner=skiff",
        "--label",
        &format!("io.skiff.cluster={cluster_name}"),
        "--name",
        &machine.name,
        "--hostname",
        &machine.hostname,
        "--tmpfs",
        "/run",
        "--tmpfs",
        "/run/lock",
        "--tmpfs",
        "/tmp",
        "-v",
        "/sys/fs/cgroup:/sys/fs/cgroup:ro",
    ]
    .map(str::to_owned)
    .into();

    for volume in &machine.spec.volumes {
        args.push("--mount".to_owned());
        args.push(mount_arg(volume));
    }

    for mapping in &machine.spec.port_mappings {
        args.push("-p".to_owned());
        args.push(publish_arg(mapping, machine.index));
    }

    if machine.spec.privileged {
        args.push("--privileged".to_owned());
    }

    args
}

/// `type=<t>[,src=<s>],dst=<d>[,readonly]`
fn mount_arg(volume: &Volume) -> String {
    let mut arg = format!("type={}", volume.kind);
    if let Some(source) = &volume.source {
        arg.push_str(&format!(",src={source}"));
    }
    arg.push_str(&format!(",dst={}", volume.destination));
    if volume.read_only {
        arg.push_str(",readonly");
    }
    arg
}

/// `[addr:][hostPort+index:]containerPort[/proto]`; the index offset gives
/// every replica of a set its own host port.
fn publish_arg(mapping: &PortMapping, index: usize) -> String {
    let mut arg = String::new();
    if let Some(address) = &mapping.address {
        arg.push_str(&format!("{address}:"));
    }
    if let Some(host_port) = mapping.host_port {
        // Widened so a high base port on a late replica can't wrap; a value
        // past the port range is the backend's to reject.
        arg.push_str(&format!("{}:", host_port as u32 + index as u32));
    }
    arg.push_str(&mapping.container_port.to_string());
    if let Some(protocol) = &mapping.protocol {
        arg.push_str(&format!("/{protocol}"));
    }
    arg
}
