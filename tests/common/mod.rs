//! Shared test utilities
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_console::api::ApiState;
use fleet_console::config::{ConfigStore, Settings};
use fleet_console::db::{self, ActivityRepo, DiscoveryRepo};
use fleet_console::discovery::{DiscoveryEngine, DiscoveryTask, ProbedNode, Prober};
use fleet_console::nodes::{
    Credentials, Fleet, NodeHandle, ProcessInstance, STATE_RUNNING, STATE_STOPPED, SharedNode,
    state_label,
};
use fleet_console::{DbPool, Error, Result};
use secrecy::SecretString;

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Settings store with default values
#[must_use]
pub fn settings_store() -> Arc<ConfigStore<Settings>> {
    Arc::new(ConfigStore::new(Settings::default()))
}

/// Discovery engine over `pool` using `prober`
#[must_use]
pub fn discovery_engine(pool: &DbPool, prober: Arc<dyn Prober>) -> Arc<DiscoveryEngine> {
    Arc::new(DiscoveryEngine::new(
        DiscoveryRepo::new(pool.clone()),
        ActivityRepo::new(pool.clone()),
        prober,
        settings_store(),
    ))
}

/// API state with the given fleet and prober
#[must_use]
pub fn api_state(
    pool: &DbPool,
    fleet: Arc<Fleet>,
    prober: Arc<dyn Prober>,
    api_key: Option<&str>,
) -> Arc<ApiState> {
    let settings = settings_store();
    let discovery = Arc::new(DiscoveryEngine::new(
        DiscoveryRepo::new(pool.clone()),
        ActivityRepo::new(pool.clone()),
        prober,
        settings.clone(),
    ));
    Arc::new(ApiState::new(
        pool.clone(),
        api_key.map(|key| SecretString::from(key.to_string())),
        fleet,
        settings,
        discovery,
    ))
}

/// Poll until a task reaches a terminal status
pub async fn wait_terminal(engine: &DiscoveryEngine, id: &str) -> DiscoveryTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = engine.get(id).expect("task exists");
        if task.status.is_terminal() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} still {} after 10s",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every value in every table, rendered as text
#[must_use]
pub fn dump_database(pool: &DbPool) -> String {
    let conn = pool.get().expect("connection");
    let tables: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    };

    let mut out = String::new();
    for table in tables {
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table}\"")).unwrap();
        let columns = stmt.column_count();
        let mut rows = stmt.query([]).unwrap();
        while let Some(row) = rows.next().unwrap() {
            for i in 0..columns {
                let value: rusqlite::types::Value = row.get(i).unwrap();
                out.push_str(&format!("{value:?}|"));
            }
            out.push('\n');
        }
    }
    out
}

/// Build a process instance as a node would report it
#[must_use]
pub fn instance(node: &str, name: &str, group: &str, state: i32) -> ProcessInstance {
    ProcessInstance {
        node_name: node.to_string(),
        node_host: format!("{node}.local"),
        node_port: 9001,
        name: name.to_string(),
        group: group.to_string(),
        state,
        state_name: state_label(state).to_string(),
        pid: if state == STATE_RUNNING { 4242 } else { 0 },
        uptime_secs: 0,
    }
}

/// Scriptable in-memory supervisor node
///
/// `remote` is what the daemon would report; `snapshot` is only replaced
/// by a successful refresh.
pub struct MockNode {
    name: String,
    environment: Option<String>,
    connected: AtomicBool,
    remote: Mutex<Vec<ProcessInstance>>,
    snapshot: Mutex<Vec<ProcessInstance>>,
    fail_refresh: AtomicBool,
    fail_ping: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    op_delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
}

impl MockNode {
    /// A connected node with no processes
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            environment: None,
            connected: AtomicBool::new(true),
            remote: Mutex::new(Vec::new()),
            snapshot: Mutex::new(Vec::new()),
            fail_refresh: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            op_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.environment = Some(env.to_string());
        self
    }

    #[must_use]
    pub fn process(self, name: &str, state: i32) -> Self {
        self.grouped_process(name, name, state)
    }

    #[must_use]
    pub fn grouped_process(self, name: &str, group: &str, state: i32) -> Self {
        self.remote
            .lock()
            .unwrap()
            .push(instance(&self.name, name, group, state));
        self
    }

    #[must_use]
    pub fn disconnected(self) -> Self {
        self.connected.store(false, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn failing_refresh(self) -> Self {
        self.fail_refresh.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn failing_ping(self) -> Self {
        self.fail_ping.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn slow(self, delay: Duration) -> Self {
        *self.op_delay.lock().unwrap() = delay;
        self
    }

    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Lifecycle calls received, as `start:name` / `stop:name`
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Current state of a process as the daemon sees it
    #[must_use]
    pub fn remote_state(&self, name: &str) -> Option<i32> {
        self.remote
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.state)
    }

    async fn lifecycle(&self, verb: &str, name: &str, fail: bool, state: i32) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{verb}:{name}"));
        let delay = *self.op_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::Node(format!("{verb} {name}: daemon refused")));
        }
        let mut remote = self.remote.lock().unwrap();
        let process = remote
            .iter_mut()
            .find(|p| p.qualified_name() == name)
            .ok_or_else(|| Error::Node(format!("{verb} {name}: no such process")))?;
        process.state = state;
        process.state_name = state_label(state).to_string();
        Ok(())
    }
}

#[async_trait]
impl NodeHandle for MockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        "127.0.0.1"
    }

    fn port(&self) -> u16 {
        9001
    }

    fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn processes(&self) -> Vec<ProcessInstance> {
        self.snapshot.lock().unwrap().clone()
    }

    async fn refresh_processes(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(Error::Node("connection refused".to_string()));
        }
        let remote = self.remote.lock().unwrap().clone();
        *self.snapshot.lock().unwrap() = remote;
        Ok(())
    }

    async fn start_process(&self, name: &str) -> Result<()> {
        let fail = self.fail_start.load(Ordering::SeqCst);
        self.lifecycle("start", name, fail, STATE_RUNNING).await
    }

    async fn stop_process(&self, name: &str) -> Result<()> {
        let fail = self.fail_stop.load(Ordering::SeqCst);
        self.lifecycle("stop", name, fail, STATE_STOPPED).await
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            Err(Error::Node("unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Fleet holding the given nodes, in order
#[must_use]
pub fn fleet_of(nodes: &[Arc<MockNode>]) -> Arc<Fleet> {
    let fleet = Fleet::new();
    for node in nodes {
        fleet
            .register(node.clone() as SharedNode)
            .expect("unique node names");
    }
    Arc::new(fleet)
}

/// Node handles for passing straight to the engines
#[must_use]
pub fn handles(nodes: &[Arc<MockNode>]) -> Vec<SharedNode> {
    nodes.iter().map(|n| n.clone() as SharedNode).collect()
}

/// Prober answering only for a fixed set of addresses
pub struct MockProber {
    live: HashSet<IpAddr>,
    delay: Duration,
    probes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProber {
    #[must_use]
    pub fn new(live: &[&str]) -> Self {
        Self {
            live: live.iter().map(|ip| ip.parse().expect("ip")).collect(),
            delay: Duration::ZERO,
            probes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Highest number of probes observed running at once
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn probe(
        &self,
        ip: IpAddr,
        port: u16,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<ProbedNode> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.live.contains(&ip) {
            Ok(ProbedNode {
                node_name: format!("supervisor-{ip}"),
                version: Some("4.2.5".to_string()),
            })
        } else {
            Err(Error::Node(format!("{ip}:{port}: connection refused")))
        }
    }
}
