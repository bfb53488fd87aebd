//! Supervisor nodes
//!
//! A node is one remote supervisor daemon managing a set of long-running
//! processes on one host. The engines only see the `NodeHandle` contract.

pub mod client;
pub mod handle;
pub mod monitor;
pub mod registry;
pub mod types;

pub use client::{Credentials, Identification, SupervisorClient, SupervisorNode};
pub use handle::NodeHandle;
pub use registry::{Fleet, SharedFleet, SharedNode};
pub use types::{ProcessInstance, RemoteProcess, STATE_RUNNING, STATE_STOPPED, state_label};
