//! In-memory container runtime for tests.
//!
//! [`MockRuntime`] keeps networks, containers, address pools, ephemeral host
//! ports and per-interface `tc` disciplines in memory, and lets tests inject
//! failures into individual calls.
//!
//! Faults keyed by instance name match containers launched from a descriptor
//! of that name (container names have the form `<prefix>-<name>-<short id>`).

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::runtime::{
    ContainerDetails, ContainerSpec, ExecOutput, NetworkEndpoint, NetworkSummary, RuntimeAdapter,
    RuntimeError, RuntimeResult,
};

const FIRST_EPHEMERAL_PORT: u16 = 32768;
const INTERFACES: [&str; 2] = ["eth0", "lo"];
const EPERM: &str = "RTNETLINK answers: Operation not permitted";

#[derive(Debug)]
struct MockNetwork {
    name: String,
    subnet: u8,
    next_host: u8,
}

#[derive(Debug)]
struct MockContainer {
    spec: ContainerSpec,
    network_id: String,
    running: bool,
    address: Option<IpAddr>,
    host_port: Option<u16>,
    qdiscs: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct Faults {
    create: HashSet<String>,
    stall_create: HashSet<String>,
    start: HashSet<String>,
    stall_start: HashSet<String>,
    inspect: HashSet<String>,
    withhold_address: HashSet<String>,
    stop: HashSet<String>,
    stall_stop: HashSet<String>,
    remove: HashSet<String>,
    exec_matching: Vec<String>,
    network_list: bool,
    network_create: bool,
    network_remove: bool,
    image_pull: bool,
    unavailable: bool,
}

#[derive(Debug)]
struct MockState {
    next_id: u64,
    next_host_port: u16,
    networks: HashMap<String, MockNetwork>,
    containers: HashMap<String, MockContainer>,
    images: HashSet<String>,
    faults: Faults,
    calls: Vec<String>,
}

fn targets(set: &HashSet<String>, container_name: &str) -> bool {
    set.iter()
        .any(|instance| container_name.contains(&format!("-{instance}-")))
}

impl MockState {
    fn fresh_id(&mut self, prefix: char) -> String {
        self.next_id += 1;
        format!("{prefix}{:011x}", self.next_id)
    }

    /// Resolves a container ID or name to its ID, like the engine does.
    fn resolve(&self, id_or_name: &str) -> RuntimeResult<String> {
        if self.containers.contains_key(id_or_name) {
            return Ok(id_or_name.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.spec.name == id_or_name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id_or_name}")))
    }

    fn container(&self, id: &str) -> RuntimeResult<&MockContainer> {
        let id = self.resolve(id)?;
        self.containers
            .get(&id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }

    fn container_mut(&mut self, id: &str) -> RuntimeResult<&mut MockContainer> {
        let id = self.resolve(id)?;
        self.containers
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }
}

/// In-memory [`RuntimeAdapter`].
#[derive(Debug)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 0,
                next_host_port: FIRST_EPHEMERAL_PORT,
                networks: HashMap::new(),
                containers: HashMap::new(),
                images: HashSet::new(),
                faults: Faults::default(),
                calls: Vec::new(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Seeding and inspection
    // -------------------------------------------------------------------------

    /// Creates a network as if another process had, returning its ID.
    pub fn seed_network(&self, name: &str) -> String {
        let mut st = self.state.lock();
        insert_network(&mut st, name)
    }

    /// Returns the number of networks with exactly this name.
    #[must_use]
    pub fn networks_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .networks
            .values()
            .filter(|n| n.name == name)
            .count()
    }

    /// Returns the number of networks.
    #[must_use]
    pub fn network_count(&self) -> usize {
        self.state.lock().networks.len()
    }

    /// Returns the number of containers, running or not.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Returns the number of running containers.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .containers
            .values()
            .filter(|c| c.running)
            .count()
    }

    /// Returns true if the container exists.
    #[must_use]
    pub fn has_container(&self, id: &str) -> bool {
        self.state.lock().containers.contains_key(id)
    }

    /// Returns true if the container exists and is running.
    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(id)
            .is_some_and(|c| c.running)
    }

    /// Returns the create request a container was made from.
    #[must_use]
    pub fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.state.lock().containers.get(id).map(|c| c.spec.clone())
    }

    /// Returns the names of all containers, sorted.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the disciplines installed on an interface, root first.
    #[must_use]
    pub fn qdiscs(&self, id: &str, iface: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(id)
            .and_then(|c| c.qdiscs.get(iface).cloned())
            .unwrap_or_default()
    }

    /// Stops a container behind the cluster's back.
    pub fn crash(&self, id: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.running = false;
            c.qdiscs.clear();
        }
    }

    /// Returns every call made so far, e.g. `"start_container c0000000002"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns how many times `operation` was called.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Fails container creation for `instance`.
    pub fn fail_create(&self, instance: &str) {
        self.state.lock().faults.create.insert(instance.to_string());
    }

    /// Makes container creation for `instance` hang forever once the
    /// container exists, as if the engine's reply were lost.
    pub fn stall_create(&self, instance: &str) {
        self.state
            .lock()
            .faults
            .stall_create
            .insert(instance.to_string());
    }

    /// Fails container start for `instance`.
    pub fn fail_start(&self, instance: &str) {
        self.state.lock().faults.start.insert(instance.to_string());
    }

    /// Makes container start for `instance` hang forever.
    pub fn stall_start(&self, instance: &str) {
        self.state
            .lock()
            .faults
            .stall_start
            .insert(instance.to_string());
    }

    /// Fails inspection for `instance`.
    pub fn fail_inspect(&self, instance: &str) {
        self.state.lock().faults.inspect.insert(instance.to_string());
    }

    /// Starts `instance` without giving it a network address.
    pub fn withhold_address(&self, instance: &str) {
        self.state
            .lock()
            .faults
            .withhold_address
            .insert(instance.to_string());
    }

    /// Fails stop for `instance`.
    pub fn fail_stop(&self, instance: &str) {
        self.state.lock().faults.stop.insert(instance.to_string());
    }

    /// Makes stop for `instance` hang forever.
    pub fn stall_stop(&self, instance: &str) {
        self.state
            .lock()
            .faults
            .stall_stop
            .insert(instance.to_string());
    }

    /// Fails removal for `instance`.
    pub fn fail_remove(&self, instance: &str) {
        self.state.lock().faults.remove.insert(instance.to_string());
    }

    /// Makes any exec whose command line contains `needle` exit with
    /// `EPERM`.
    pub fn fail_exec_matching(&self, needle: &str) {
        self.state
            .lock()
            .faults
            .exec_matching
            .push(needle.to_string());
    }

    /// Fails network listing.
    pub fn fail_network_list(&self) {
        self.state.lock().faults.network_list = true;
    }

    /// Fails network creation.
    pub fn fail_network_create(&self) {
        self.state.lock().faults.network_create = true;
    }

    /// Fails network removal.
    pub fn fail_network_remove(&self) {
        self.state.lock().faults.network_remove = true;
    }

    /// Fails image pulls.
    pub fn fail_image_pull(&self) {
        self.state.lock().faults.image_pull = true;
    }

    /// Makes `ping` report the engine unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().faults.unavailable = unavailable;
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

fn insert_network(st: &mut MockState, name: &str) -> String {
    let id = st.fresh_id('n');
    let subnet = u8::try_from(st.networks.len() % 200).unwrap_or(0);
    st.networks.insert(
        id.clone(),
        MockNetwork {
            name: name.to_string(),
            subnet,
            next_host: 2,
        },
    );
    id
}

fn insert_container(st: &mut MockState, spec: &ContainerSpec) -> RuntimeResult<String> {
    if targets(&st.faults.create, &spec.name) {
        return Err(RuntimeError::Other("injected create failure".into()));
    }
    if st.containers.values().any(|c| c.spec.name == spec.name) {
        return Err(RuntimeError::Conflict(format!(
            "container name {} is already in use",
            spec.name
        )));
    }
    let network_id = st
        .networks
        .iter()
        .find(|(_, n)| n.name == spec.network)
        .map(|(id, _)| id.clone())
        .ok_or_else(|| RuntimeError::NotFound(format!("network {} not found", spec.network)))?;

    let id = st.fresh_id('c');
    st.containers.insert(
        id.clone(),
        MockContainer {
            spec: spec.clone(),
            network_id,
            running: false,
            address: None,
            host_port: None,
            qdiscs: HashMap::new(),
        },
    );
    Ok(id)
}

fn exec_result(exit_code: i64, stdout: String, stderr: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code: Some(exit_code),
        stdout,
        stderr: stderr.into(),
    }
}

fn run_tc(container: &mut MockContainer, args: &[String]) -> ExecOutput {
    let arg = |i: usize| args.get(i).map_or("", String::as_str);

    if arg(0) != "qdisc" || arg(2) != "dev" {
        return exec_result(1, String::new(), format!("Command \"{}\" is unknown", arg(0)));
    }
    let iface = arg(3);
    if !INTERFACES.contains(&iface) {
        return exec_result(1, String::new(), format!("Cannot find device \"{iface}\""));
    }
    let privileged = container.spec.cap_add.iter().any(|c| c == "NET_ADMIN");
    let rules = container.qdiscs.entry(iface.to_string()).or_default();
    let tail = args.get(4..).unwrap_or_default().join(" ");

    match (arg(1), arg(4)) {
        ("show", _) => {
            let stdout = if rules.is_empty() {
                "qdisc noqueue 0: root refcnt 2\n".to_string()
            } else {
                rules.iter().map(|r| format!("qdisc {r}\n")).collect()
            };
            exec_result(0, stdout, "")
        }
        (_, _) if !privileged => exec_result(2, String::new(), EPERM),
        ("del", "root") => {
            if rules.is_empty() {
                exec_result(2, String::new(), "Error: Cannot delete qdisc with handle of zero.")
            } else {
                rules.clear();
                exec_result(0, String::new(), "")
            }
        }
        ("add", "root") => {
            if rules.is_empty() {
                rules.push(tail);
                exec_result(0, String::new(), "")
            } else {
                exec_result(2, String::new(), "Error: Exclusivity flag on, cannot modify.")
            }
        }
        ("add", "parent") => {
            if rules.is_empty() {
                exec_result(2, String::new(), "Error: Failed to find specified qdisc.")
            } else {
                rules.push(tail);
                exec_result(0, String::new(), "")
            }
        }
        _ => exec_result(1, String::new(), format!("unsupported tc invocation: {tail}")),
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.record("ping".into());
        if self.state.lock().faults.unavailable {
            return Err(RuntimeError::Unavailable("mock engine offline".into()));
        }
        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        self.record(format!("ensure_image {image}"));
        let mut st = self.state.lock();
        if st.faults.image_pull {
            return Err(RuntimeError::NotFound(format!(
                "pull access denied for {image}"
            )));
        }
        st.images.insert(image.to_string());
        Ok(())
    }

    async fn list_networks(&self, name: &str) -> RuntimeResult<Vec<NetworkSummary>> {
        self.record(format!("list_networks {name}"));
        let st = self.state.lock();
        if st.faults.network_list {
            return Err(RuntimeError::Unavailable("injected list failure".into()));
        }
        Ok(st
            .networks
            .iter()
            .filter(|(_, n)| n.name.contains(name))
            .map(|(id, n)| NetworkSummary {
                id: id.clone(),
                name: n.name.clone(),
            })
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        _driver: &str,
        _labels: &HashMap<String, String>,
    ) -> RuntimeResult<String> {
        self.record(format!("create_network {name}"));
        let mut st = self.state.lock();
        if st.faults.network_create {
            return Err(RuntimeError::Other("injected network create failure".into()));
        }
        if st.networks.values().any(|n| n.name == name) {
            return Err(RuntimeError::Conflict(format!(
                "network with name {name} already exists"
            )));
        }
        Ok(insert_network(&mut st, name))
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("remove_network {id}"));
        let mut st = self.state.lock();
        if !st.networks.contains_key(id) {
            return Err(RuntimeError::NotFound(format!("network {id} not found")));
        }
        if st.faults.network_remove {
            return Err(RuntimeError::Other("injected network remove failure".into()));
        }
        if st.containers.values().any(|c| c.network_id == id) {
            return Err(RuntimeError::Conflict(format!(
                "network {id} has active endpoints"
            )));
        }
        st.networks.remove(id);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.record(format!("create_container {}", spec.name));
        let (id, stall) = {
            let mut st = self.state.lock();
            let id = insert_container(&mut st, spec)?;
            (id, targets(&st.faults.stall_create, &spec.name))
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("start_container {id}"));
        let stall = {
            let mut st = self.state.lock();
            let st = &mut *st;
            let key = st.resolve(id)?;
            let container = st
                .containers
                .get_mut(&key)
                .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
            let name = container.spec.name.clone();

            if targets(&st.faults.stall_start, &name) {
                true
            } else {
                if targets(&st.faults.start, &name) {
                    return Err(RuntimeError::Other("injected start failure".into()));
                }
                if container.running {
                    return Err(RuntimeError::NotModified(format!(
                        "container {id} already started"
                    )));
                }
                if container.address.is_none() && !targets(&st.faults.withhold_address, &name) {
                    let network = st
                        .networks
                        .get_mut(&container.network_id)
                        .ok_or_else(|| RuntimeError::NotFound("network vanished".into()))?;
                    container.address = Some(IpAddr::V4(Ipv4Addr::new(
                        172,
                        18 + network.subnet % 14,
                        network.subnet / 14,
                        network.next_host,
                    )));
                    network.next_host = network.next_host.wrapping_add(1);
                }
                if container.host_port.is_none() {
                    let port = if container.spec.host_port == 0 {
                        let port = st.next_host_port;
                        st.next_host_port = st.next_host_port.wrapping_add(1);
                        port
                    } else {
                        container.spec.host_port
                    };
                    container.host_port = Some(port);
                }
                container.running = true;
                false
            }
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        self.record(format!("inspect_container {id}"));
        let st = self.state.lock();
        let container = st.container(id)?;
        if targets(&st.faults.inspect, &container.spec.name) {
            return Err(RuntimeError::Other("injected inspect failure".into()));
        }

        let mut networks = HashMap::new();
        networks.insert(
            container.spec.network.clone(),
            NetworkEndpoint {
                network_id: container.network_id.clone(),
                ip_address: container.address,
            },
        );
        let mut host_ports = HashMap::new();
        if let (true, Some(port)) = (container.running, container.host_port) {
            host_ports.insert(container.spec.exposed_port, port);
        }

        Ok(ContainerDetails {
            id: id.to_string(),
            running: container.running,
            networks,
            host_ports,
        })
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        self.record(format!("stop_container {id} {}s", grace.as_secs()));
        let stall = {
            let mut st = self.state.lock();
            let st = &mut *st;
            let key = st.resolve(id)?;
            let container = st
                .containers
                .get_mut(&key)
                .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
            if targets(&st.faults.stall_stop, &container.spec.name) {
                true
            } else {
                if targets(&st.faults.stop, &container.spec.name) {
                    return Err(RuntimeError::Other("injected stop failure".into()));
                }
                if !container.running {
                    return Err(RuntimeError::NotModified(format!(
                        "container {id} already stopped"
                    )));
                }
                container.running = false;
                container.qdiscs.clear();
                false
            }
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("remove_container {id}"));
        let mut st = self.state.lock();
        let key = st.resolve(id)?;
        let name = st.container(&key)?.spec.name.clone();
        if targets(&st.faults.remove, &name) {
            return Err(RuntimeError::Other("injected remove failure".into()));
        }
        st.containers.remove(&key);
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> RuntimeResult<ExecOutput> {
        let line = cmd.join(" ");
        self.record(format!("exec {id} {line}"));
        let mut st = self.state.lock();
        let injected = st.faults.exec_matching.iter().any(|n| line.contains(n.as_str()));
        let container = st.container_mut(id)?;
        if !container.running {
            return Err(RuntimeError::Conflict(format!(
                "container {id} is not running"
            )));
        }
        if injected {
            return Ok(exec_result(2, String::new(), EPERM));
        }
        match cmd.split_first() {
            Some((program, args)) if program == "tc" => Ok(run_tc(container, args)),
            Some((program, _)) => Ok(exec_result(
                127,
                String::new(),
                format!("exec: \"{program}\": executable file not found in $PATH"),
            )),
            None => Err(RuntimeError::Other("empty command".into())),
        }
    }
}
