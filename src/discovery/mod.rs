//! Network discovery of supervisor daemons
//!
//! Expands a CIDR range, probes every address on a candidate port with the
//! supplied credentials, and records the hosts that answer. Credentials
//! live only in memory for the duration of the scan.

pub mod cidr;
pub mod engine;
pub mod probe;
pub mod task;

/// Upper bound on the worker pool of a single scan
pub const MAX_WORKERS_LIMIT: usize = 1024;

pub use cidr::{CidrSummary, expand_cidr, validate_cidr};
pub use engine::{DiscoveryEngine, DiscoveryRequest};
pub use probe::{ProbedNode, Prober, SupervisorProber};
pub use task::{DiscoveryResult, DiscoveryTask, TaskPage, TaskProgress, TaskStatus};
