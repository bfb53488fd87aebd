//! Probe contract and the supervisor daemon prober

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::nodes::{Credentials, SupervisorClient};

/// Identity of a daemon that answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedNode {
    pub node_name: String,
    pub version: Option<String>,
}

/// Checks one candidate address for a live, authenticating supervisor daemon
#[async_trait]
pub trait Prober: Send + Sync {
    /// Attempt one probe of `ip:port`
    ///
    /// # Errors
    ///
    /// Returns error if nothing answers, the answer is not a supervisor
    /// daemon, or the credentials are rejected
    async fn probe(
        &self,
        ip: IpAddr,
        port: u16,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<ProbedNode>;
}

/// Probes by calling the daemon's identification endpoint with basic auth
#[derive(Debug, Clone, Default)]
pub struct SupervisorProber {
    http: reqwest::Client,
}

impl SupervisorProber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Prober for SupervisorProber {
    async fn probe(
        &self,
        ip: IpAddr,
        port: u16,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<ProbedNode> {
        let client = SupervisorClient::with_http(
            self.http.clone(),
            &ip.to_string(),
            port,
            Some(credentials.clone()),
        );

        let ident = tokio::time::timeout(timeout, client.identification())
            .await
            .map_err(|_| {
                crate::Error::Timeout(format!("{ip}:{port} after {}s", timeout.as_secs()))
            })??;

        let node_name = if ident.identification.trim().is_empty() {
            format!("{ip}:{port}")
        } else {
            ident.identification
        };

        Ok(ProbedNode {
            node_name,
            version: ident.version,
        })
    }
}
