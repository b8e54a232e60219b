//! Placement of virtual endpoints onto physical nodes.
//!
//! A virtual net names a placement policy in its `location` field:
//!
//! - **colocated**: all `virtual-nodes` endpoints go to the single node `node`
//! - **custom**: `nodes` maps node names to counts that must add up to
//!   `virtual-nodes`
//!
//! Endpoints are named `<node>-<specIndex>-h<j>` and addressed from the
//! virtual subnet by `j`, so the same configuration always yields the same
//! names and addresses.

use crate::config::VirtualNetSpec;
use crate::ip::AddressAllocator;
use ipnet::Ipv4Net;
use log::debug;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPolicy {
    Colocated,
    Custom,
}

impl PlacementPolicy {
    /// Policy named by a virtual net's `location`, if it is one we know
    pub fn parse(location: &str) -> Option<Self> {
        match location {
            "colocated" => Some(PlacementPolicy::Colocated),
            "custom" => Some(PlacementPolicy::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementPolicy::Colocated => "colocated",
            PlacementPolicy::Custom => "custom",
        }
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved virtual endpoint
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Placement {
    pub node: String,
    pub endpoint: String,
    pub address: Ipv4Net,
}

/// Why a virtual net could not be placed. `spec` is the 1-based position of
/// the virtual net in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("virtual net {spec}: unknown physical node '{node}'")]
    UnknownNode { spec: usize, node: String },

    #[error("virtual net {spec}: per-node counts add up to {placed}, but virtual-nodes is {declared}")]
    Mismatch {
        spec: usize,
        declared: u32,
        placed: u64,
    },

    #[error("virtual net {spec}: unsupported placement '{location}'")]
    Unsupported { spec: usize, location: String },

    #[error("virtual net {spec}: colocated placement needs a target `node`")]
    MissingTarget { spec: usize },

    #[error("virtual net {spec}: custom placement needs a `nodes` mapping")]
    MissingMapping { spec: usize },

    #[error("virtual net {spec}: {count} endpoints on {node} exceed the {capacity} addresses of {subnet}")]
    SubnetExhausted {
        spec: usize,
        node: String,
        count: u32,
        capacity: u32,
        subnet: Ipv4Net,
    },
}

/// Resolves virtual nets against the set of live physical nodes
#[derive(Debug, Clone, Copy)]
pub struct PlacementPlanner<'a> {
    allocator: &'a AddressAllocator,
}

impl<'a> PlacementPlanner<'a> {
    pub fn new(allocator: &'a AddressAllocator) -> Self {
        Self { allocator }
    }

    /// Resolve one virtual net.
    ///
    /// # Arguments
    ///
    /// * `spec_index` - 1-based position of the virtual net in the configuration
    /// * `spec` - The virtual net to place
    /// * `live_nodes` - Physical nodes whose control plane is running
    ///
    /// # Returns
    ///
    /// * Placements ordered by node, then endpoint ordinal. Nothing is
    ///   returned unless the whole virtual net can be placed.
    pub fn resolve(
        &self,
        spec_index: usize,
        spec: &VirtualNetSpec,
        live_nodes: &BTreeSet<String>,
    ) -> Result<Vec<Placement>, PlacementError> {
        let policy = PlacementPolicy::parse(&spec.location).ok_or_else(|| PlacementError::Unsupported {
            spec: spec_index,
            location: spec.location.clone(),
        })?;

        let counts: Vec<(&str, u32)> = match policy {
            PlacementPolicy::Colocated => {
                let node = spec
                    .node
                    .as_deref()
                    .ok_or(PlacementError::MissingTarget { spec: spec_index })?;
                vec![(node, spec.virtual_nodes)]
            }
            PlacementPolicy::Custom => {
                let nodes = spec
                    .nodes
                    .as_ref()
                    .ok_or(PlacementError::MissingMapping { spec: spec_index })?;
                let placed: u64 = nodes.values().map(|&c| u64::from(c)).sum();
                if placed != u64::from(spec.virtual_nodes) {
                    return Err(PlacementError::Mismatch {
                        spec: spec_index,
                        declared: spec.virtual_nodes,
                        placed,
                    });
                }
                nodes.iter().map(|(name, &count)| (name.as_str(), count)).collect()
            }
        };

        let capacity = self.allocator.data_capacity();
        for &(node, count) in &counts {
            if !live_nodes.contains(node) {
                return Err(PlacementError::UnknownNode {
                    spec: spec_index,
                    node: node.to_string(),
                });
            }
            if count > capacity {
                return Err(PlacementError::SubnetExhausted {
                    spec: spec_index,
                    node: node.to_string(),
                    count,
                    capacity,
                    subnet: self.allocator.virtual_subnet(),
                });
            }
        }

        let placements: Vec<Placement> = counts
            .into_iter()
            .flat_map(|(node, count)| {
                (1..=count).map(move |j| Placement {
                    node: node.to_string(),
                    endpoint: endpoint_name(node, spec_index, j),
                    address: self.allocator.data_address(j),
                })
            })
            .collect();
        debug!(
            "Virtual net {} ({}): {} endpoints placed",
            spec_index,
            policy,
            placements.len()
        );
        Ok(placements)
    }
}

/// Name of endpoint `j` (1-based) of virtual net `spec_index` on `node`
pub fn endpoint_name(node: &str, spec_index: usize, j: u32) -> String {
    format!("{}-{}-h{}", node, spec_index, j)
}
