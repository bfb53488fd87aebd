//! Process data types shared by nodes, the aggregator and the batch executor

use serde::{Deserialize, Serialize};

/// Supervisor state code for a stopped process
pub const STATE_STOPPED: i32 = 0;
/// Supervisor state code for a process that is starting
pub const STATE_STARTING: i32 = 10;
/// Supervisor state code for a running process
pub const STATE_RUNNING: i32 = 20;
/// Supervisor state code for a process backing off after a failed start
pub const STATE_BACKOFF: i32 = 30;
/// Supervisor state code for a process that is stopping
pub const STATE_STOPPING: i32 = 40;
/// Supervisor state code for a process that exited on its own
pub const STATE_EXITED: i32 = 100;
/// Supervisor state code for a process that could not be started
pub const STATE_FATAL: i32 = 200;
/// Supervisor state code for an unknown state
pub const STATE_UNKNOWN: i32 = 1000;

/// Human label for a supervisor state code
#[must_use]
pub const fn state_label(code: i32) -> &'static str {
    match code {
        STATE_STOPPED => "STOPPED",
        STATE_STARTING => "STARTING",
        STATE_RUNNING => "RUNNING",
        STATE_BACKOFF => "BACKOFF",
        STATE_STOPPING => "STOPPING",
        STATE_EXITED => "EXITED",
        STATE_FATAL => "FATAL",
        _ => "UNKNOWN",
    }
}

/// One process as seen on one node at refresh time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub node_name: String,
    pub node_host: String,
    pub node_port: u16,
    pub name: String,
    pub group: String,
    pub state: i32,
    pub state_name: String,
    pub pid: u32,
    pub uptime_secs: u64,
}

impl ProcessInstance {
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.state == STATE_RUNNING
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.state == STATE_STOPPED
    }

    /// Name used to address this process on its daemon (`group:name`)
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.group.is_empty() || self.group == self.name {
            self.name.clone()
        } else {
            format!("{}:{}", self.group, self.name)
        }
    }
}

/// Process record as reported by the supervisor daemon's HTTP gateway
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProcess {
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub state: i32,
    #[serde(default)]
    pub statename: Option<String>,
    #[serde(default)]
    pub pid: u32,
    /// Unix timestamp the process was started at (0 if never)
    #[serde(default)]
    pub start: i64,
    /// Daemon's clock at the time of the report
    #[serde(default)]
    pub now: i64,
}

impl RemoteProcess {
    /// Attach node identity and derive uptime
    #[must_use]
    pub fn into_instance(self, node_name: &str, node_host: &str, node_port: u16) -> ProcessInstance {
        let uptime_secs = if self.state == STATE_RUNNING && self.start > 0 && self.now >= self.start {
            u64::try_from(self.now - self.start).unwrap_or(0)
        } else {
            0
        };
        let group = if self.group.is_empty() {
            self.name.clone()
        } else {
            self.group
        };

        ProcessInstance {
            node_name: node_name.to_string(),
            node_host: node_host.to_string(),
            node_port,
            state_name: self
                .statename
                .unwrap_or_else(|| state_label(self.state).to_string()),
            name: self.name,
            group,
            state: self.state,
            pid: self.pid,
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_cover_known_codes() {
        assert_eq!(state_label(STATE_RUNNING), "RUNNING");
        assert_eq!(state_label(STATE_STOPPED), "STOPPED");
        assert_eq!(state_label(STATE_FATAL), "FATAL");
        assert_eq!(state_label(42), "UNKNOWN");
    }

    #[test]
    fn remote_process_uptime_only_when_running() {
        let running = RemoteProcess {
            name: "worker".to_string(),
            group: "jobs".to_string(),
            state: STATE_RUNNING,
            statename: None,
            pid: 1234,
            start: 1_000,
            now: 1_060,
        };
        let inst = running.into_instance("n1", "10.0.0.1", 9001);
        assert_eq!(inst.uptime_secs, 60);
        assert_eq!(inst.state_name, "RUNNING");
        assert_eq!(inst.qualified_name(), "jobs:worker");

        let stopped = RemoteProcess {
            name: "worker".to_string(),
            group: String::new(),
            state: STATE_STOPPED,
            statename: Some("STOPPED".to_string()),
            pid: 0,
            start: 1_000,
            now: 1_060,
        };
        let inst = stopped.into_instance("n1", "10.0.0.1", 9001);
        assert_eq!(inst.uptime_secs, 0);
        assert_eq!(inst.group, "worker");
        assert_eq!(inst.qualified_name(), "worker");
    }
}
