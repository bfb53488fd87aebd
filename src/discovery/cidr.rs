//! CIDR parsing and host expansion

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Serialize;

use crate::{Error, Result};

/// Outcome of validating a range without scanning it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CidrSummary {
    /// Canonical network form (host bits cleared)
    pub cidr: String,
    pub host_count: usize,
}

/// Parse a CIDR string, returning the canonical network
///
/// # Errors
///
/// Returns a validation error if the input is not a CIDR range
pub fn parse_cidr(input: &str) -> Result<IpNet> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("cidr is required".to_string()));
    }
    trimmed
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| Error::Validation(format!("invalid CIDR '{trimmed}': {e}")))
}

/// Expand a CIDR into its usable host addresses
///
/// IPv4 network and broadcast addresses are excluded except for /31 and /32.
///
/// # Errors
///
/// Returns a validation error if the range is malformed, empty, or larger
/// than `max_hosts`
pub fn expand_cidr(input: &str, max_hosts: usize) -> Result<(IpNet, Vec<IpAddr>)> {
    let net = parse_cidr(input)?;

    // never materialise more than one address past the cap
    let hosts: Vec<IpAddr> = net.hosts().take(max_hosts.saturating_add(1)).collect();

    if hosts.is_empty() {
        return Err(Error::Validation(format!("{net} contains no usable hosts")));
    }
    if hosts.len() > max_hosts {
        return Err(Error::Validation(format!(
            "{net} covers more than {max_hosts} hosts"
        )));
    }
    Ok((net, hosts))
}

/// Validate a range and count its hosts without creating a task
///
/// # Errors
///
/// Same as [`expand_cidr`]
pub fn validate_cidr(input: &str, max_hosts: usize) -> Result<CidrSummary> {
    let (net, hosts) = expand_cidr(input, max_hosts)?;
    Ok(CidrSummary {
        cidr: net.to_string(),
        host_count: hosts.len(),
    })
}
