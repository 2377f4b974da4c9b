use std::path::Path;

use skiff_config::{Config, MachineSpec};
use skiff_docker::{Backend, Docker};
use tracing::info;

use crate::machine::Machine;
use crate::name::{container_name, expand_name};
use crate::provision::{AUTHORIZED_KEYS_PATH, DEFAULT_COMMAND, INIT_SCRIPT, run_args};
use crate::ssh::{SshSession, ssh_args};
use crate::{ClusterError, keys};

/// A declared cluster bound to a container backend.
///
/// Holds no lifecycle state of its own: whether a machine exists and whether
/// its init process is executing are re-queried from the backend before
/// every decision, so operations are idempotent and safe to re-run after a
/// partial failure.
pub struct Cluster {
    spec: Config,
    backend: Box<dyn Backend>,
    ssh: SshSession,
}

impl Cluster {
    pub fn new(spec: Config) -> Self {
        Self::with_backend(spec, Box::new(Docker))
    }

    pub fn with_backend(spec: Config, backend: Box<dyn Backend>) -> Self {
        Self {
            spec,
            backend,
            ssh: SshSession::default(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, ClusterError> {
        Ok(Self::new(Config::load(path).await?))
    }

    pub fn spec(&self) -> &Config {
        &self.spec
    }

    /// Re-save the loaded configuration verbatim.
    pub async fn save(&self, path: &Path) -> Result<(), ClusterError> {
        Ok(self.spec.save(path).await?)
    }

    fn resolve(&self, spec: &MachineSpec, index: usize) -> Machine {
        Machine {
            name: container_name(&self.spec.cluster.name, &spec.name, index),
            hostname: expand_name(&spec.name, index),
            index,
            spec: spec.clone(),
            ip: None,
        }
    }

    /// All declared machine instances, in declaration order, replica indices
    /// ascending. Batch operations consume this strictly sequentially and
    /// halt at the first error.
    pub fn machines(&self) -> Vec<Machine> {
        self.spec
            .machines
            .iter()
            .flat_map(|set| (0..set.count).map(|index| self.resolve(&set.spec, index)))
            .collect()
    }

    pub fn machine_from_hostname(&self, hostname: &str) -> Result<Machine, ClusterError> {
        self.machines()
            .into_iter()
            .find(|machine| machine.hostname == hostname)
            .ok_or_else(|| ClusterError::InvalidHostname(hostname.to_owned()))
    }

    /// Create all machines: ensure the cluster key exists, pull each set's
    /// image once, then provision every instance that is absent.
    pub async fn create(&self) -> Result<(), ClusterError> {
        keys::ensure_key_pair(&self.spec.cluster.name, &self.spec.cluster.private_key).await?;
        for set in &self.spec.machines {
            self.backend.pull_if_absent(&set.spec.image).await?;
        }
        let public_key = keys::public_key(&self.spec.cluster.private_key).await?;
        for machine in self.machines() {
            self.create_machine(&machine, &public_key).await?;
        }
        Ok(())
    }

    async fn create_machine(&self, machine: &Machine, public_key: &[u8]) -> Result<(), ClusterError> {
        info!("Creating machine: {} ...", machine.name);
        if self.backend.exists(&machine.name).await? {
            info!("Machine {} is already running...", machine.name);
            return Ok(());
        }

        let args = run_args(&self.spec.cluster.name, machine);
        let command = vec![
            machine
                .spec
                .cmd
                .clone()
                .unwrap_or_else(|| DEFAULT_COMMAND.to_owned()),
        ];
        self.backend
            .run(&machine.spec.image, &args, &command)
            .await?;

        // First-boot setup, then install the cluster public key. A failure
        // here leaves the container behind for the operator to delete.
        self.backend.exec_script(&machine.name, INIT_SCRIPT).await?;
        self.backend
            .copy_into(&machine.name, public_key, AUTHORIZED_KEYS_PATH)
            .await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), ClusterError> {
        for machine in self.machines() {
            self.start_machine(&machine).await?;
        }
        Ok(())
    }

    async fn start_machine(&self, machine: &Machine) -> Result<(), ClusterError> {
        let name = &machine.name;
        // A start never provisions; an absent machine stays absent.
        if !self.backend.exists(name).await? {
            info!("Machine {name} isn't running...");
            return Ok(());
        }
        if self.backend.is_started(name).await? {
            info!("Machine {name} is already started...");
            return Ok(());
        }
        info!("Starting machine: {name} ...");
        Ok(self.backend.start(name).await?)
    }

    pub async fn stop(&self) -> Result<(), ClusterError> {
        for machine in self.machines() {
            self.stop_machine(&machine).await?;
        }
        Ok(())
    }

    async fn stop_machine(&self, machine: &Machine) -> Result<(), ClusterError> {
        let name = &machine.name;
        if !self.backend.exists(name).await? {
            info!("Machine {name} isn't running...");
            return Ok(());
        }
        if !self.backend.is_started(name).await? {
            info!("Machine {name} is already stopped...");
            return Ok(());
        }
        info!("Stopping machine: {name} ...");
        Ok(self.backend.stop(name).await?)
    }

    pub async fn delete(&self) -> Result<(), ClusterError> {
        for machine in self.machines() {
            self.delete_machine(&machine).await?;
        }
        Ok(())
    }

    async fn delete_machine(&self, machine: &Machine) -> Result<(), ClusterError> {
        let name = &machine.name;
        if !self.backend.exists(name).await? {
            info!("Machine {name} isn't running...");
            return Ok(());
        }
        if self.backend.is_started(name).await? {
            info!("Machine {name} is started, stopping and deleting machine...");
            self.backend.kill("KILL", name).await?;
            return Ok(self.backend.remove(name).await?);
        }
        info!("Deleting machine: {name} ...");
        Ok(self.backend.remove(name).await?)
    }

    /// The declared fleet with live inspection data overlaid wherever the
    /// backend knows the container; declared-only records otherwise.
    pub async fn gather(&self) -> Result<Vec<Machine>, ClusterError> {
        let mut machines = self.machines();
        for machine in &mut machines {
            if self.backend.exists(&machine.name).await? {
                let details = self.backend.inspect(&machine.name).await?;
                machine.apply_details(&details);
            }
        }
        Ok(machines)
    }

    /// One machine by container name, with live overlay.
    pub async fn inspect(&self, name: &str) -> Result<Machine, ClusterError> {
        self.gather()
            .await?
            .into_iter()
            .find(|machine| machine.name == name)
            .ok_or_else(|| ClusterError::MachineNotFound(name.to_owned()))
    }

    /// Open an interactive session (or run `remote_args`) on the machine
    /// with this hostname, as `username`.
    pub async fn ssh(
        &self,
        hostname: &str,
        username: &str,
        remote_args: &[String],
    ) -> Result<(), ClusterError> {
        let machine = self.machine_from_hostname(hostname)?;
        let port = machine.host_port(22)?;
        let address = machine
            .port_mapping(22)
            .and_then(|mapping| mapping.address.clone())
            .unwrap_or_else(|| "localhost".to_owned());
        let private_key = keys::expand_home(&self.spec.cluster.private_key)?;

        let args = ssh_args(&private_key, port, &address, username, remote_args);
        self.ssh.connect(&args).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use skiff_cmd::CommandError;
    use skiff_config::{ClusterConfig, MachineSet, PortMapping};
    use skiff_docker::{
        BackendError, ContainerConfig, ContainerDetails, MountPoint, NetworkSettings, PortBinding,
    };

    use super::*;

    /// In-memory backend that records every call and tracks which
    /// containers exist and which are started. Clones share state, so tests
    /// keep one handle and give the cluster another.
    #[derive(Default, Clone)]
    struct FakeBackend {
        state: Arc<FakeState>,
        /// Names whose stop call fails, to exercise batch short-circuiting.
        fail_stop_for: Vec<String>,
    }

    #[derive(Default)]
    struct FakeState {
        calls: Mutex<Vec<String>>,
        existing: Mutex<Vec<String>>,
        started: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn seed(existing: &[&str], started: &[&str]) -> Self {
            let fake = FakeBackend::default();
            *fake.state.existing.lock().unwrap() =
                existing.iter().map(|s| s.to_string()).collect();
            *fake.state.started.lock().unwrap() = started.iter().map(|s| s.to_string()).collect();
            fake
        }

        fn record(&self, call: impl Into<String>) {
            self.state.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.state.calls.lock().unwrap().clone()
        }

        fn calls_named(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|call| call.starts_with(prefix))
                .collect()
        }

        fn contains(list: &Mutex<Vec<String>>, name: &str) -> bool {
            list.lock().unwrap().iter().any(|n| n == name)
        }

        fn failure(what: &str) -> BackendError {
            BackendError::Command(CommandError::Failure {
                command: what.to_owned(),
                stderr: String::new(),
            })
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn pull_if_absent(&self, image: &str) -> Result<(), BackendError> {
            self.record(format!("pull {image}"));
            Ok(())
        }

        async fn run(
            &self,
            image: &str,
            args: &[String],
            _command: &[String],
        ) -> Result<String, BackendError> {
            let name = args
                .windows(2)
                .find(|w| w[0] == "--name")
                .map(|w| w[1].clone())
                .expect("run args carry --name");
            self.record(format!("run {image} {name}"));
            self.state.existing.lock().unwrap().push(name.clone());
            self.state.started.lock().unwrap().push(name.clone());
            Ok(format!("id-{name}"))
        }

        async fn inspect(&self, name: &str) -> Result<ContainerDetails, BackendError> {
            self.record(format!("inspect {name}"));
            let mut ports = BTreeMap::new();
            ports.insert(
                "22/tcp".to_owned(),
                Some(vec![PortBinding {
                    host_ip: "0.0.0.0".to_owned(),
                    host_port: "2222".to_owned(),
                }]),
            );
            Ok(ContainerDetails {
                network_settings: NetworkSettings {
                    ports,
                    ip_address: "172.17.0.9".to_owned(),
                },
                mounts: vec![MountPoint {
                    kind: "bind".to_owned(),
                    source: "/sys/fs/cgroup".to_owned(),
                    destination: "/sys/fs/cgroup".to_owned(),
                    rw: false,
                }],
                config: ContainerConfig {
                    cmd: Some(vec!["/sbin/init".to_owned()]),
                },
            })
        }

        async fn start(&self, name: &str) -> Result<(), BackendError> {
            self.record(format!("start {name}"));
            self.state.started.lock().unwrap().push(name.to_owned());
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<(), BackendError> {
            self.record(format!("stop {name}"));
            if self.fail_stop_for.iter().any(|n| n == name) {
                return Err(Self::failure("stop"));
            }
            self.state.started.lock().unwrap().retain(|n| n != name);
            Ok(())
        }

        async fn kill(&self, signal: &str, name: &str) -> Result<(), BackendError> {
            self.record(format!("kill {signal} {name}"));
            self.state.started.lock().unwrap().retain(|n| n != name);
            Ok(())
        }

        async fn remove(&self, name: &str) -> Result<(), BackendError> {
            self.record(format!("remove {name}"));
            self.state.existing.lock().unwrap().retain(|n| n != name);
            Ok(())
        }

        async fn exists(&self, name: &str) -> Result<bool, BackendError> {
            Ok(Self::contains(&self.state.existing, name))
        }

        async fn is_started(&self, name: &str) -> Result<bool, BackendError> {
            Ok(Self::contains(&self.state.started, name))
        }

        async fn exec_script(&self, name: &str, _script: &str) -> Result<(), BackendError> {
            self.record(format!("exec {name}"));
            Ok(())
        }

        async fn copy_into(
            &self,
            name: &str,
            _content: &[u8],
            dest: &str,
        ) -> Result<(), BackendError> {
            self.record(format!("copy {name} {dest}"));
            Ok(())
        }
    }

    fn spec(name: &str, count: usize) -> MachineSet {
        MachineSet {
            count,
            spec: MachineSpec {
                name: name.to_owned(),
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
        }
    }

    fn cluster_with(backend: FakeBackend, machines: Vec<MachineSet>) -> Cluster {
        Cluster::with_backend(
            Config {
                cluster: ClusterConfig {
                    name: "test".to_owned(),
                    private_key: "test-key".to_owned(),
                },
                machines,
            },
            Box::new(backend),
        )
    }

    #[test]
    fn test_machines_expand_in_declaration_then_index_order() {
        let cluster = cluster_with(
            FakeBackend::default(),
            vec![spec("node%d", 2), spec("db%d", 1)],
        );
        let names: Vec<_> = cluster.machines().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["test-node0", "test-node1", "test-db0"]);
    }

    #[test]
    fn test_machine_from_hostname_round_trips() {
        let cluster = cluster_with(FakeBackend::default(), vec![spec("node%d", 3)]);
        for index in 0..3 {
            let machine = cluster
                .machine_from_hostname(&format!("node{index}"))
                .unwrap();
            assert_eq!(machine.index, index);
            assert_eq!(machine.name, format!("test-node{index}"));
        }
        assert!(matches!(
            cluster.machine_from_hostname("node3"),
            Err(ClusterError::InvalidHostname(_))
        ));
        assert!(matches!(
            cluster.machine_from_hostname("intruder"),
            Err(ClusterError::InvalidHostname(_))
        ));
    }

    #[tokio::test]
    async fn test_create_machine_provisions_once() {
        let fake = FakeBackend::default();
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        let machine = cluster.machine_from_hostname("node0").unwrap();

        cluster
            .create_machine(&machine, b"ssh-rsa AAAA test")
            .await
            .unwrap();
        assert_eq!(
            fake.calls(),
            [
                "run debian:bookworm test-node0",
                "exec test-node0",
                "copy test-node0 /root/.ssh/authorized_keys",
            ]
        );

        // Second create is a no-op: no duplicate container, no error.
        cluster
            .create_machine(&machine, b"ssh-rsa AAAA test")
            .await
            .unwrap();
        assert_eq!(fake.calls_named("run").len(), 1);
    }

    #[tokio::test]
    async fn test_start_never_provisions_an_absent_machine() {
        let fake = FakeBackend::default();
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        cluster.start().await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_skips_already_started_machines() {
        let fake = FakeBackend::seed(&["test-node0", "test-node1"], &["test-node0"]);
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 2)]);
        cluster.start().await.unwrap();
        assert_eq!(fake.calls(), ["start test-node1"]);
    }

    #[tokio::test]
    async fn test_stop_on_absent_machine_issues_no_backend_stop() {
        let fake = FakeBackend::default();
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        cluster.stop().await.unwrap();
        assert!(fake.calls_named("stop").is_empty());
    }

    #[tokio::test]
    async fn test_stop_only_stops_started_machines() {
        let fake = FakeBackend::seed(&["test-node0", "test-node1"], &["test-node1"]);
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 2)]);
        cluster.stop().await.unwrap();
        assert_eq!(fake.calls(), ["stop test-node1"]);
    }

    #[tokio::test]
    async fn test_delete_kills_started_machines_before_removing() {
        let fake = FakeBackend::seed(&["test-node0"], &["test-node0"]);
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        cluster.delete().await.unwrap();
        assert_eq!(fake.calls(), ["kill KILL test-node0", "remove test-node0"]);
    }

    #[tokio::test]
    async fn test_delete_removes_stopped_machines_directly() {
        let fake = FakeBackend::seed(&["test-node0"], &[]);
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        cluster.delete().await.unwrap();
        assert_eq!(fake.calls(), ["remove test-node0"]);
    }

    #[tokio::test]
    async fn test_delete_on_absent_machine_is_a_no_op() {
        let fake = FakeBackend::default();
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 1)]);
        cluster.delete().await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_short_circuits_on_first_failure() {
        // Templates [A(2), B(2)], failure on A/1: exactly two instances are
        // visited and B is never touched.
        let mut fake = FakeBackend::seed(
            &["test-a0", "test-a1", "test-b0", "test-b1"],
            &["test-a0", "test-a1", "test-b0", "test-b1"],
        );
        fake.fail_stop_for = vec!["test-a1".to_owned()];
        let cluster = cluster_with(fake.clone(), vec![spec("a%d", 2), spec("b%d", 2)]);

        cluster.stop().await.expect_err("failure propagates");
        assert_eq!(fake.calls_named("stop"), ["stop test-a0", "stop test-a1"]);
    }

    #[tokio::test]
    async fn test_gather_overlays_only_known_machines() {
        let fake = FakeBackend::seed(&["test-node0"], &["test-node0"]);
        let cluster = cluster_with(fake.clone(), vec![spec("node%d", 2)]);
        let machines = cluster.gather().await.unwrap();

        // node0 exists: live overlay applied.
        assert_eq!(machines[0].ip.as_deref(), Some("172.17.0.9"));
        assert_eq!(machines[0].spec.cmd.as_deref(), Some("/sbin/init"));
        assert_eq!(machines[0].spec.port_mappings[0].host_port, Some(2222));
        assert_eq!(machines[0].spec.volumes[0].destination, "/sys/fs/cgroup");

        // node1 is absent: declared-only record, nothing inspected.
        assert_eq!(machines[1].ip, None);
        assert!(machines[1].spec.volumes.is_empty());
        assert_eq!(fake.calls_named("inspect"), ["inspect test-node0"]);
    }

    #[tokio::test]
    async fn test_save_round_trips_through_a_file() {
        let dir = std::env::temp_dir().join(format!("skiff-save-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.expect("create test dir");
        let path = dir.join("cluster.yaml");

        let cluster = cluster_with(FakeBackend::default(), vec![spec("node%d", 2)]);
        cluster.save(&path).await.expect("save");

        let reloaded = Cluster::from_file(&path).await.expect("reload");
        assert_eq!(reloaded.spec(), cluster.spec());
    }

    #[tokio::test]
    async fn test_inspect_matches_on_container_name() {
        let cluster = cluster_with(
            FakeBackend::seed(&["test-node0"], &[]),
            vec![spec("node%d", 1)],
        );
        let machine = cluster.inspect("test-node0").await.unwrap();
        assert_eq!(machine.hostname, "node0");

        assert!(matches!(
            cluster.inspect("test-node9").await,
            Err(ClusterError::MachineNotFound(_))
        ));
    }
}
