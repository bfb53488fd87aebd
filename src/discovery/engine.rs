//! Discovery engine
//!
//! One scan per task: a feeder hands addresses to probes bounded by a
//! semaphore of `max_workers` permits, and a single collector applies
//! probe outcomes to the task store. The collector is the only writer of a
//! running task's counters, so they only ever grow.
//!
//! Cancel and delete take the task's lock, which the collector also holds
//! while applying an outcome. Once a task is cancelled the collector drops
//! further outcomes and its counts stay where they were.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cidr::{self, CidrSummary};
use super::probe::{ProbedNode, Prober};
use super::task::{DiscoveryResult, DiscoveryTask, TaskPage, TaskProgress, TaskStatus};
use super::MAX_WORKERS_LIMIT;
use crate::config::{ConfigStore, Settings};
use crate::db::{ActivityRepo, DiscoveryRepo};
use crate::nodes::Credentials;
use crate::{Error, Result};

/// Default page size for task listings
pub const DEFAULT_PAGE_LIMIT: u64 = 20;

/// Largest page size for task listings
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Largest per-probe timeout a request may ask for
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 60;

/// Error recorded on tasks a previous process left unfinished
pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// A scan submission
///
/// `Debug` is safe: the password is a `SecretString`.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub cidr: String,
    pub port: u16,
    pub credentials: Credentials,
    pub timeout_seconds: Option<u64>,
    pub max_workers: Option<usize>,
    pub created_by: String,
}

/// Handle to a scan in flight
#[derive(Clone)]
struct ActiveScan {
    token: CancellationToken,
    lock: Arc<Mutex<()>>,
}

/// Running counters owned by the collector
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    scanned: u64,
    found: u64,
    failed: u64,
}

/// One finished probe
struct ProbeOutcome {
    ip: IpAddr,
    result: Result<ProbedNode>,
}

/// How a collector loop ended
enum ScanEnd {
    Exhausted,
    Cancelled,
    Failed(Error),
}

/// Owns discovery tasks from submission to a terminal status
pub struct DiscoveryEngine {
    repo: DiscoveryRepo,
    activity: ActivityRepo,
    prober: Arc<dyn Prober>,
    settings: Arc<ConfigStore<Settings>>,
    active: Mutex<HashMap<String, ActiveScan>>,
    submit_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("DiscoveryEngine")
            .field("active_scans", &active)
            .finish_non_exhaustive()
    }
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(
        repo: DiscoveryRepo,
        activity: ActivityRepo,
        prober: Arc<dyn Prober>,
        settings: Arc<ConfigStore<Settings>>,
    ) -> Self {
        Self {
            repo,
            activity,
            prober,
            settings,
            active: Mutex::new(HashMap::new()),
            submit_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fail tasks a previous process left pending or running
    ///
    /// # Errors
    ///
    /// Returns error if the task store cannot be updated
    pub fn recover(&self) -> Result<usize> {
        let count = self.repo.fail_interrupted(INTERRUPTED_REASON)?;
        if count > 0 {
            tracing::warn!(count, "marked interrupted discovery tasks as failed");
        }
        Ok(count)
    }

    /// Stop every scan without changing task status
    ///
    /// Tasks left running are failed by [`Self::recover`] on the next start.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate a range without creating a task
    ///
    /// # Errors
    ///
    /// Returns a validation error if the range is malformed, empty or too large
    pub fn validate_cidr(&self, input: &str) -> Result<CidrSummary> {
        let max_hosts = self.settings.current().value.max_hosts_per_scan;
        cidr::validate_cidr(input, max_hosts)
    }

    /// Submit a scan
    ///
    /// Returns as soon as the task is recorded and scanning has been
    /// started in the background.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, a conflict if the same range
    /// and port is already being scanned or the engine is shutting down, or a
    /// database error if the task cannot be recorded
    pub fn start(self: &Arc<Self>, request: DiscoveryRequest) -> Result<DiscoveryTask> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Conflict("discovery engine is shutting down".to_string()));
        }

        let settings = self.settings.current().value.clone();
        let (net, hosts) = validate_request(&request, &settings)?;

        let cidr = net.to_string();
        let now = Utc::now();
        let task = DiscoveryTask {
            id: Uuid::new_v4().to_string(),
            cidr: cidr.clone(),
            port: request.port,
            timeout_seconds: request
                .timeout_seconds
                .unwrap_or(settings.discovery_timeout_secs),
            max_workers: request
                .max_workers
                .unwrap_or(settings.discovery_max_workers),
            created_by: request.created_by.clone(),
            status: TaskStatus::Pending,
            total_ips: hosts.len() as u64,
            scanned_ips: 0,
            found_nodes: 0,
            failed_ips: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };

        {
            let _guard = self
                .submit_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = self.repo.find_active(&cidr, request.port)? {
                return Err(Error::Conflict(format!(
                    "task {} for {cidr} port {} is already {}",
                    existing.id, request.port, existing.status
                )));
            }
            self.repo.create(&task)?;
        }

        tracing::info!(
            task_id = %task.id,
            cidr = %task.cidr,
            port = task.port,
            total_ips = task.total_ips,
            max_workers = task.max_workers,
            "discovery task created"
        );
        self.activity.record_quietly(
            "discovery.start",
            &task.id,
            &format!(
                "scan {} port {} ({} hosts)",
                task.cidr, task.port, task.total_ips
            ),
            Some(&json!({
                "cidr": task.cidr,
                "port": task.port,
                "total_ips": task.total_ips,
                "timeout_seconds": task.timeout_seconds,
                "max_workers": task.max_workers,
                "username": request.credentials.username,
                "created_by": task.created_by,
            })),
        );

        let scan = ActiveScan {
            token: self.shutdown.child_token(),
            lock: Arc::new(Mutex::new(())),
        };
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), scan.clone());

        match self
            .repo
            .transition(&task.id, &[TaskStatus::Pending], TaskStatus::Running, None)
        {
            Ok(true) => {}
            Ok(false) => {
                // cancelled before it began
                self.forget(&task.id);
                return self.get(&task.id);
            }
            Err(e) => {
                self.forget(&task.id);
                self.fail(&task.id, &e);
                return self.get(&task.id);
            }
        }

        let mut running = task;
        running.status = TaskStatus::Running;

        let engine = Arc::clone(self);
        let scanned = running.clone();
        let credentials = Arc::new(request.credentials);
        tokio::spawn(async move {
            engine.run_scan(scanned, hosts, credentials, scan).await;
        });

        Ok(running)
    }

    /// Cancel a pending or running task
    ///
    /// # Errors
    ///
    /// Returns not found for an unknown task, or a conflict naming the
    /// current status if the task is already terminal
    pub fn cancel(&self, id: &str) -> Result<DiscoveryTask> {
        let task = self.get(id)?;
        let scan = self.active_scan(id);
        {
            let _guard = scan
                .as_ref()
                .map(|s| s.lock.lock().unwrap_or_else(PoisonError::into_inner));

            let moved = self.repo.transition(
                id,
                &TaskStatus::ACTIVE,
                TaskStatus::Cancelled,
                None,
            )?;
            if !moved {
                let status = self.repo.get(id)?.map_or(task.status, |t| t.status);
                return Err(Error::Conflict(format!(
                    "task {id} is {status}; only pending or running tasks can be cancelled"
                )));
            }
            if let Some(scan) = &scan {
                scan.token.cancel();
            }
        }

        let task = self.get(id)?;
        tracing::info!(
            task_id = %id,
            scanned_ips = task.scanned_ips,
            total_ips = task.total_ips,
            "discovery task cancelled"
        );
        self.activity.record_quietly(
            "discovery.cancel",
            id,
            &format!(
                "cancelled scan of {} after {}/{} hosts",
                task.cidr, task.scanned_ips, task.total_ips
            ),
            None,
        );
        Ok(task)
    }

    /// Delete a terminal task and its results
    ///
    /// # Errors
    ///
    /// Returns not found for an unknown task, or a conflict naming the
    /// current status if the task is still pending or running
    pub fn delete(&self, id: &str) -> Result<()> {
        let task = self.get(id)?;
        if !task.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "task {id} is {}; only completed, cancelled or failed tasks can be deleted",
                task.status
            )));
        }

        let scan = self.active_scan(id);
        let deleted = {
            let _guard = scan
                .as_ref()
                .map(|s| s.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.repo.delete_terminal(id)?
        };
        if !deleted {
            return match self.repo.get(id)? {
                Some(current) => Err(Error::Conflict(format!(
                    "task {id} is {}; only completed, cancelled or failed tasks can be deleted",
                    current.status
                ))),
                None => Err(Error::NotFound(format!("discovery task {id}"))),
            };
        }

        tracing::info!(task_id = %id, "discovery task deleted");
        self.activity.record_quietly(
            "discovery.delete",
            id,
            &format!("deleted {} scan of {}", task.status, task.cidr),
            None,
        );
        Ok(())
    }

    /// Get a task
    ///
    /// # Errors
    ///
    /// Returns not found for an unknown task
    pub fn get(&self, id: &str) -> Result<DiscoveryTask> {
        self.repo
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("discovery task {id}")))
    }

    /// Cheap polling view of a task
    ///
    /// # Errors
    ///
    /// Returns not found for an unknown task
    pub fn progress(&self, id: &str) -> Result<TaskProgress> {
        self.get(id).map(|task| TaskProgress::from(&task))
    }

    /// Hosts found by a task
    ///
    /// # Errors
    ///
    /// Returns not found for an unknown task
    pub fn results(&self, id: &str) -> Result<Vec<DiscoveryResult>> {
        self.get(id)?;
        self.repo.results(id)
    }

    /// One page of tasks, newest first
    ///
    /// `page` starts at 1; `limit` defaults to 20 and is capped at 100.
    ///
    /// # Errors
    ///
    /// Returns error if the task store cannot be read
    pub fn list(
        &self,
        page: Option<u64>,
        limit: Option<u64>,
        status: Option<TaskStatus>,
    ) -> Result<TaskPage> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = (page - 1).saturating_mul(limit);

        let (tasks, total) = self.repo.list(status, offset, limit)?;
        Ok(TaskPage {
            tasks,
            total,
            page,
            limit,
        })
    }

    /// Number of scans currently in flight
    #[must_use]
    pub fn active_scans(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn active_scan(&self, id: &str) -> Option<ActiveScan> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn forget(&self, id: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn fail(&self, id: &str, error: &Error) {
        let message = error.to_string();
        tracing::error!(task_id = %id, error = %message, "discovery task failed");
        match self
            .repo
            .transition(id, &TaskStatus::ACTIVE, TaskStatus::Failed, Some(&message))
        {
            Ok(_) => {}
            Err(e) => tracing::error!(task_id = %id, error = %e, "could not mark task failed"),
        }
    }

    async fn run_scan(
        self: Arc<Self>,
        task: DiscoveryTask,
        hosts: Vec<IpAddr>,
        credentials: Arc<Credentials>,
        scan: ActiveScan,
    ) {
        let task_id = task.id.clone();
        let timeout = Duration::from_secs(task.timeout_seconds);
        let (tx, mut rx) = mpsc::channel::<ProbeOutcome>(task.max_workers.max(1));

        let feeder = tokio::spawn(feed(
            hosts,
            task.port,
            credentials,
            Arc::clone(&self.prober),
            task.max_workers,
            timeout,
            tx,
            scan.token.clone(),
        ));

        let mut counters = Counters::default();
        let end = loop {
            tokio::select! {
                biased;
                () = scan.token.cancelled() => break ScanEnd::Cancelled,
                outcome = rx.recv() => match outcome {
                    Some(outcome) => match self.apply(&task, &scan, &mut counters, outcome) {
                        Ok(true) => {}
                        Ok(false) => break ScanEnd::Cancelled,
                        Err(e) => break ScanEnd::Failed(e),
                    },
                    None => break ScanEnd::Exhausted,
                },
            }
        };

        match end {
            ScanEnd::Exhausted => self.complete(&task, &scan, counters),
            ScanEnd::Cancelled => {
                if self.shutdown.is_cancelled() {
                    tracing::info!(task_id = %task_id, "scan stopped by shutdown");
                } else {
                    tracing::debug!(task_id = %task_id, "scan collector stopped after cancel");
                }
            }
            ScanEnd::Failed(e) => {
                scan.token.cancel();
                let _guard = scan.lock.lock().unwrap_or_else(PoisonError::into_inner);
                self.fail(&task_id, &e);
            }
        }

        if let Err(e) = feeder.await {
            tracing::warn!(task_id = %task_id, error = %e, "probe feeder ended abnormally");
        }
        self.forget(&task_id);
    }

    /// Apply one probe outcome; returns false once the task is cancelled
    fn apply(
        &self,
        task: &DiscoveryTask,
        scan: &ActiveScan,
        counters: &mut Counters,
        outcome: ProbeOutcome,
    ) -> Result<bool> {
        let _guard = scan.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if scan.token.is_cancelled() {
            return Ok(false);
        }

        let mut next = *counters;
        next.scanned += 1;
        match outcome.result {
            Ok(node) => {
                next.found += 1;
                tracing::info!(
                    task_id = %task.id,
                    ip = %outcome.ip,
                    node = %node.node_name,
                    "supervisor found"
                );
                self.repo.add_result(
                    &task.id,
                    &outcome.ip.to_string(),
                    task.port,
                    &node.node_name,
                    node.version.as_deref(),
                )?;
            }
            Err(e) => {
                next.failed += 1;
                tracing::debug!(task_id = %task.id, ip = %outcome.ip, error = %e, "probe failed");
            }
        }

        if !self
            .repo
            .update_progress(&task.id, next.scanned, next.found, next.failed)?
        {
            // task left running under us
            return Ok(false);
        }
        *counters = next;
        Ok(true)
    }

    fn complete(&self, task: &DiscoveryTask, scan: &ActiveScan, counters: Counters) {
        let moved = {
            let _guard = scan.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.repo
                .transition(&task.id, &[TaskStatus::Running], TaskStatus::Completed, None)
        };

        match moved {
            Ok(true) => {
                tracing::info!(
                    task_id = %task.id,
                    scanned_ips = counters.scanned,
                    found_nodes = counters.found,
                    failed_ips = counters.failed,
                    "discovery task completed"
                );
                self.activity.record_quietly(
                    "discovery.complete",
                    &task.id,
                    &format!(
                        "scan of {} found {} of {} hosts",
                        task.cidr, counters.found, counters.scanned
                    ),
                    Some(&json!({
                        "scanned_ips": counters.scanned,
                        "found_nodes": counters.found,
                        "failed_ips": counters.failed,
                    })),
                );
            }
            Ok(false) => {}
            Err(e) => self.fail(&task.id, &e),
        }
    }
}

/// Start one probe per address, never more than `workers` at once
#[allow(clippy::too_many_arguments)]
async fn feed(
    hosts: Vec<IpAddr>,
    port: u16,
    credentials: Arc<Credentials>,
    prober: Arc<dyn Prober>,
    workers: usize,
    timeout: Duration,
    tx: mpsc::Sender<ProbeOutcome>,
    token: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    for ip in hosts {
        let permit = tokio::select! {
            biased;
            () = token.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let tx = tx.clone();
        let prober = Arc::clone(&prober);
        let credentials = Arc::clone(&credentials);
        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, prober.probe(ip, port, &credentials, timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "{ip}:{port} after {}s",
                        timeout.as_secs()
                    ))),
                };
            drop(permit);
            // collector is gone once the task stopped
            let _ = tx.send(ProbeOutcome { ip, result }).await;
        });
    }
}

fn validate_request(
    request: &DiscoveryRequest,
    settings: &Settings,
) -> Result<(ipnet::IpNet, Vec<IpAddr>)> {
    if request.port == 0 {
        return Err(Error::Validation(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    if request.credentials.username.trim().is_empty() {
        return Err(Error::Validation("username is required".to_string()));
    }
    if let Some(timeout) = request.timeout_seconds {
        if !(1..=MAX_PROBE_TIMEOUT_SECS).contains(&timeout) {
            return Err(Error::Validation(format!(
                "timeout_seconds must be between 1 and {MAX_PROBE_TIMEOUT_SECS}"
            )));
        }
    }
    if let Some(workers) = request.max_workers {
        if !(1..=MAX_WORKERS_LIMIT).contains(&workers) {
            return Err(Error::Validation(format!(
                "max_workers must be between 1 and {MAX_WORKERS_LIMIT}"
            )));
        }
    }
    cidr::expand_cidr(&request.cidr, settings.max_hosts_per_scan)
}
