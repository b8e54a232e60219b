//! Two-tier fabric topology.
//!
//! ```text
//!                 [fabric]                   data plane
//!                /   |    \
//!           n1-eth0 n2-eth0 ...
//!             n1     n2     ...              physical nodes (namespaces)
//!            mgmt   mgmt
//!                \   |    /
//!                [mgmtSw] --- nat            management plane, NAT in root ns
//! ```

use crate::config::FabricConfig;
use crate::ip::AddressAllocator;
use crate::nested::NestedNetworkManager;
use crate::topology::types::{Declaration, FailMode, HostDecl, HostKind, LinkDecl, SwitchDecl};
use ipnet::Ipv4Net;
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Data-plane switch every physical node is wired to
pub const FABRIC_SWITCH: &str = "fabric";
/// Management switch, in standalone mode
pub const MANAGEMENT_SWITCH: &str = "mgmtSw";
/// NAT gateway host on the management network
pub const NAT_GATEWAY: &str = "nat";
/// Management interface name inside every physical node
pub const MANAGEMENT_INTF: &str = "mgmt";

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("node '{node}' is attached to fabric segment '{location}', which does not exist")]
    UnknownSegment { node: String, location: String },

    #[error("management subnet {subnet} has room for {capacity} nodes, {requested} declared")]
    ManagementSubnetExhausted {
        subnet: Ipv4Net,
        capacity: usize,
        requested: usize,
    },

    #[error("node name '{0}' is reserved for fabric infrastructure")]
    ReservedName(String),
}

/// A physical compute node and its nested network
#[derive(Debug)]
pub struct PhysicalNode {
    pub name: String,
    /// Position in declaration order; fixes the management address and external port
    pub ordinal: usize,
    pub data_address: Ipv4Net,
    pub management_address: Ipv4Net,
    /// Fabric segment the data-plane interface is attached to
    pub location: String,
    pub nested: NestedNetworkManager,
}

/// Root aggregate of a run: fabric declarations plus the physical nodes
#[derive(Debug)]
pub struct FabricTopology {
    declarations: Vec<Declaration>,
    nodes: Vec<PhysicalNode>,
    allocator: AddressAllocator,
}

impl FabricTopology {
    /// Declarations in the order they are handed to the emulator
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn nodes(&self) -> &[PhysicalNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [PhysicalNode] {
        &mut self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&PhysicalNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut PhysicalNode> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn node_names(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn gateway_address(&self) -> Ipv4Net {
        self.allocator.gateway_address()
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }
}

pub struct FabricTopologyBuilder<'a> {
    config: &'a FabricConfig,
    nested_engine: PathBuf,
}

impl<'a> FabricTopologyBuilder<'a> {
    pub fn new(config: &'a FabricConfig) -> Self {
        let nested_engine = config
            .management
            .nested_engine
            .clone()
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_PKG_NAME")));
        Self { config, nested_engine }
    }

    /// Executable each node spawns as its nested engine
    pub fn nested_engine(mut self, path: PathBuf) -> Self {
        self.nested_engine = path;
        self
    }

    pub fn build(self) -> Result<FabricTopology, TopologyError> {
        let config = self.config;
        let mgmt = &config.management;
        let allocator = AddressAllocator::new(mgmt.subnet, config.virtual_subnet);

        let requested = config.physical_nodes.len();
        if requested > allocator.management_capacity() {
            return Err(TopologyError::ManagementSubnetExhausted {
                subnet: allocator.management_subnet(),
                capacity: allocator.management_capacity(),
                requested,
            });
        }

        let segments: BTreeSet<&str> = [FABRIC_SWITCH].into_iter().collect();
        let mut declarations = vec![
            Declaration::Switch(SwitchDecl {
                name: FABRIC_SWITCH.to_string(),
                dpid: mgmt.fabric_dpid.clone(),
                fail_mode: None,
            }),
            Declaration::Switch(SwitchDecl {
                name: MANAGEMENT_SWITCH.to_string(),
                dpid: mgmt.management_dpid.clone(),
                fail_mode: Some(FailMode::Standalone),
            }),
            Declaration::Host(HostDecl {
                name: NAT_GATEWAY.to_string(),
                ip: Some(allocator.gateway_address()),
                kind: HostKind::NatGateway {
                    subnet: allocator.management_subnet(),
                },
                in_namespace: false,
            }),
            Declaration::Link(LinkDecl::new(NAT_GATEWAY, MANAGEMENT_SWITCH)),
        ];

        let mut nodes = Vec::with_capacity(requested);
        for (ordinal, node) in config.physical_nodes.iter().enumerate() {
            if [FABRIC_SWITCH, MANAGEMENT_SWITCH, NAT_GATEWAY].contains(&node.name.as_str()) {
                return Err(TopologyError::ReservedName(node.name.clone()));
            }
            if !segments.contains(node.location.as_str()) {
                return Err(TopologyError::UnknownSegment {
                    node: node.name.clone(),
                    location: node.location.clone(),
                });
            }

            let management_address = allocator.management_address(ordinal);
            declarations.push(Declaration::Host(HostDecl {
                name: node.name.clone(),
                ip: Some(node.ip),
                kind: HostKind::ComputeNode,
                in_namespace: true,
            }));
            declarations.push(Declaration::Link(
                LinkDecl::new(&node.name, &node.location).with_intf(format!("{}-eth0", node.name)),
            ));
            declarations.push(Declaration::Link(
                LinkDecl::new(&node.name, MANAGEMENT_SWITCH)
                    .with_intf(MANAGEMENT_INTF)
                    .with_ip(management_address),
            ));
            debug!(
                "Node {} (ordinal {}): data {} on {}, management {}",
                node.name, ordinal, node.ip, node.location, management_address
            );

            nodes.push(PhysicalNode {
                name: node.name.clone(),
                ordinal,
                data_address: node.ip,
                management_address,
                location: node.location.clone(),
                nested: NestedNetworkManager::new(
                    &node.name,
                    ordinal,
                    &mgmt.runtime_dir,
                    self.nested_engine.clone(),
                ),
            });
        }

        info!(
            "Built fabric topology: {} physical nodes, {} declarations",
            nodes.len(),
            declarations.len()
        );
        Ok(FabricTopology { declarations, nodes, allocator })
    }
}
