//! Fleet registry of supervisor nodes

use std::sync::{Arc, PoisonError, RwLock};

use super::client::SupervisorNode;
use super::handle::NodeHandle;
use crate::config::NodeConfig;
use crate::{Error, Result};

/// Shared node handle
pub type SharedNode = Arc<dyn NodeHandle>;

/// Shared fleet
pub type SharedFleet = Arc<Fleet>;

/// Every node the console knows about, in registration order
///
/// Nodes are never removed; an unreachable node is only marked disconnected.
#[derive(Default)]
pub struct Fleet {
    nodes: RwLock<Vec<SharedNode>>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.list().iter().map(|n| n.name().to_string()).collect();
        f.debug_struct("Fleet").field("nodes", &names).finish()
    }
}

impl Fleet {
    /// Create an empty fleet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fleet of HTTP supervisor nodes from static configuration
    ///
    /// # Errors
    ///
    /// Returns error if a node cannot be constructed or names collide
    pub fn from_config(nodes: &[NodeConfig]) -> Result<Self> {
        let fleet = Self::new();
        for config in nodes {
            fleet.register(Arc::new(SupervisorNode::from_config(config)?))?;
        }
        Ok(fleet)
    }

    /// Register a node
    ///
    /// # Errors
    ///
    /// Returns a conflict if a node with the same name is already registered
    pub fn register(&self, node: SharedNode) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.iter().any(|n| n.name() == node.name()) {
            return Err(Error::Conflict(format!(
                "node '{}' is already registered",
                node.name()
            )));
        }
        tracing::info!(node = %node.name(), host = %node.host(), port = node.port(), "registered node");
        nodes.push(node);
        Ok(())
    }

    /// Get a node by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SharedNode> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| n.name() == name)
            .cloned()
    }

    /// All nodes
    #[must_use]
    pub fn list(&self) -> Vec<SharedNode> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nodes whose connection flag is set
    #[must_use]
    pub fn connected(&self) -> Vec<SharedNode> {
        self.list().into_iter().filter(|n| n.is_connected()).collect()
    }

    /// Number of registered nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the fleet is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
