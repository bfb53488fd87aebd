//! HTTP adapter for the supervisor daemon's JSON gateway
//!
//! Endpoints used:
//! - `GET /identification`: daemon identity, used for liveness and discovery probes
//! - `GET /processes`: full process list
//! - `POST /processes/{name}/start` and `/stop`
//!
//! Every request carries HTTP basic auth when credentials are configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::handle::NodeHandle;
use super::types::{ProcessInstance, RemoteProcess};
use crate::config::NodeConfig;
use crate::{Error, Result};

/// Default timeout for one round trip to a configured node
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Username/password pair for a supervisor daemon
///
/// The password is a `SecretString`: its `Debug` output is redacted and it is
/// never serialized.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Identity reported by a supervisor daemon
#[derive(Debug, Clone, Deserialize)]
pub struct Identification {
    pub identification: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Thin request layer shared by nodes and discovery probes
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl SupervisorClient {
    /// Create a client for `host:port` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url(host, port),
            credentials,
        })
    }

    /// Create a client over an existing HTTP client (shares its pool and timeouts)
    #[must_use]
    pub fn with_http(
        http: reqwest::Client,
        host: &str,
        port: u16,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            http,
            base_url: base_url(host, port),
            credentials,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.credentials {
            Some(creds) => {
                builder.basic_auth(&creds.username, Some(creds.password.expose_secret()))
            }
            None => builder,
        }
    }

    /// Fetch the daemon identity
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, rejected credentials, or a bad body
    pub async fn identification(&self) -> Result<Identification> {
        let response = self.request(Method::GET, "/identification").send().await?;
        let response = check_status(response, "identification").await?;
        Ok(response.json().await?)
    }

    /// Fetch the full process list
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-success status
    pub async fn processes(&self) -> Result<Vec<RemoteProcess>> {
        let response = self.request(Method::GET, "/processes").send().await?;
        let response = check_status(response, "processes").await?;
        Ok(response.json().await?)
    }

    /// Start a process
    ///
    /// # Errors
    ///
    /// Returns error if the daemon refuses or cannot be reached
    pub async fn start(&self, name: &str) -> Result<()> {
        self.lifecycle(name, "start").await
    }

    /// Stop a process
    ///
    /// # Errors
    ///
    /// Returns error if the daemon refuses or cannot be reached
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.lifecycle(name, "stop").await
    }

    async fn lifecycle(&self, name: &str, action: &str) -> Result<()> {
        let path = format!("/processes/{}/{action}", urlencoding::encode(name));
        let response = self.request(Method::POST, &path).send().await?;
        check_status(response, action).await?;
        Ok(())
    }
}

/// Turn a non-success status into a node error carrying the daemon's message
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Node(format!("{what}: authentication failed ({status})")));
    }

    let body = response.text().await.unwrap_or_default();
    let detail = body.trim();
    if detail.is_empty() {
        Err(Error::Node(format!("{what}: daemon returned {status}")))
    } else {
        Err(Error::Node(format!("{what}: daemon returned {status}: {detail}")))
    }
}

fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// A supervisor daemon reached over its HTTP gateway
#[derive(Debug)]
pub struct SupervisorNode {
    name: String,
    host: String,
    port: u16,
    environment: Option<String>,
    client: SupervisorClient,
    connected: AtomicBool,
    snapshot: RwLock<Vec<ProcessInstance>>,
}

impl SupervisorNode {
    /// Create a node from explicit parts; starts disconnected until the monitor checks it
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        credentials: Option<Credentials>,
        environment: Option<String>,
    ) -> Result<Self> {
        let host = host.into();
        let client = SupervisorClient::new(&host, port, credentials, REQUEST_TIMEOUT)?;

        Ok(Self {
            name: name.into(),
            host,
            port,
            environment,
            client,
            connected: AtomicBool::new(false),
            snapshot: RwLock::new(Vec::new()),
        })
    }

    /// Create a node from a `[[nodes]]` config entry
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (Some(username), None) => Some(Credentials::new(username.clone(), String::new())),
            _ => None,
        };
        Self::new(
            config.name.clone(),
            config.host.clone(),
            config.port,
            credentials,
            config.environment.clone(),
        )
    }
}

#[async_trait]
impl NodeHandle for SupervisorNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn processes(&self) -> Vec<ProcessInstance> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn refresh_processes(&self) -> Result<()> {
        let remote = self.client.processes().await?;
        let instances: Vec<ProcessInstance> = remote
            .into_iter()
            .map(|p| p.into_instance(&self.name, &self.host, self.port))
            .collect();

        tracing::debug!(node = %self.name, count = instances.len(), "refreshed processes");
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = instances;
        Ok(())
    }

    async fn start_process(&self, name: &str) -> Result<()> {
        tracing::debug!(node = %self.name, process = name, "starting process");
        self.client.start(name).await
    }

    async fn stop_process(&self, name: &str) -> Result<()> {
        tracing::debug!(node = %self.name, process = name, "stopping process");
        self.client.stop(name).await
    }

    async fn ping(&self) -> Result<()> {
        self.client.identification().await.map(|_| ())
    }
}
