//! # Management Registry
//!
//! Every physical node runs a private ovsdb-server listening on its
//! management address. The NAT gateway exposes each of them on a unique
//! external port through a DNAT rule, and this registry is the table of
//! those mappings.
//!
//! ## Port Assignment
//!
//! The external port is `base-port + ordinal`, where the ordinal is the
//! node's position in `physical-nodes`. The same configuration therefore
//! always produces the same ports, and no two nodes share one.
//!
//! ## Registry File
//!
//! `fabricsim run --registry <path>` writes the table so external tools
//! (controllers, test drivers) can find each node's database:
//!
//! ```json
//! {
//!   "mappings": [
//!     {
//!       "node": "n1",
//!       "ordinal": 0,
//!       "external_port": 6641,
//!       "internal_address": "192.168.254.2",
//!       "internal_port": 6640
//!     }
//!   ]
//! }
//! ```
//!
//! The table only grows during a run; DNAT rules are removed at teardown.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

/// External access to one node's ovsdb-server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementMapping {
    pub node: String,
    pub ordinal: usize,
    pub external_port: u16,
    pub internal_address: Ipv4Addr,
    pub internal_port: u16,
}

impl ManagementMapping {
    /// iptables rule on the gateway that installs this mapping
    pub fn dnat_rule(&self) -> Vec<String> {
        self.dnat_args("-A")
    }

    /// iptables rule that removes it again
    pub fn dnat_removal(&self) -> Vec<String> {
        self.dnat_args("-D")
    }

    fn dnat_args(&self, op: &str) -> Vec<String> {
        [
            "iptables",
            "-t",
            "nat",
            op,
            "PREROUTING",
            "-p",
            "tcp",
            "--dport",
            &self.external_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{}:{}", self.internal_address, self.internal_port),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

/// External port of the node at `ordinal`, or `None` past the end of the port range
pub fn external_port(base_port: u16, ordinal: usize) -> Option<u16> {
    u16::try_from(ordinal).ok().and_then(|o| base_port.checked_add(o))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("node '{0}' already has a management mapping")]
    DuplicateNode(String),

    #[error("external port {port} is already mapped to node '{node}'")]
    DuplicatePort { port: u16, node: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementRegistry {
    mappings: Vec<ManagementMapping>,
}

impl ManagementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. Node names and external ports must stay unique.
    pub fn register(&mut self, mapping: ManagementMapping) -> Result<(), RegistryError> {
        if self.get(&mapping.node).is_some() {
            return Err(RegistryError::DuplicateNode(mapping.node));
        }
        if let Some(existing) = self.mappings.iter().find(|m| m.external_port == mapping.external_port) {
            return Err(RegistryError::DuplicatePort {
                port: mapping.external_port,
                node: existing.node.clone(),
            });
        }
        self.mappings.push(mapping);
        Ok(())
    }

    pub fn mappings(&self) -> &[ManagementMapping] {
        &self.mappings
    }

    pub fn get(&self, node: &str) -> Option<&ManagementMapping> {
        self.mappings.iter().find(|m| m.node == node)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}
