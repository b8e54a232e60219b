//! Fabric configuration structures.
//!
//! The configuration keeps the key names of existing `fabric.json`
//! files (`physical-nodes`, `virtual-nets`, ...). It is read as YAML, which
//! accepts those JSON files unchanged.

use crate::controller::ControllerSpec;
use crate::ip::{DEFAULT_MANAGEMENT_SUBNET, DEFAULT_VIRTUAL_SUBNET};
use ipnet::Ipv4Net;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level fabric configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FabricConfig {
    /// `"none"` or `"host:port"`
    #[serde(default)]
    pub controller: ControllerSpec,
    /// Physical nodes in declaration order; the order fixes management ordinals
    #[serde(
        deserialize_with = "deserialize_ordered_nodes",
        serialize_with = "serialize_ordered_nodes"
    )]
    pub physical_nodes: Vec<PhysicalNodeConfig>,
    #[serde(default)]
    pub virtual_nets: Vec<VirtualNetSpec>,
    /// Subnet used by virtual endpoints inside every nested network
    #[serde(default = "default_virtual_subnet")]
    pub virtual_subnet: Ipv4Net,
    #[serde(default)]
    pub management: ManagementConfig,
}

/// One physical compute node
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalNodeConfig {
    pub name: String,
    /// Data-plane address on the fabric
    pub ip: Ipv4Net,
    /// Fabric segment the data-plane interface is wired to
    pub location: String,
}

/// The value side of a `physical-nodes` entry
#[derive(Debug, Serialize, Deserialize)]
struct NodeEntry {
    #[serde(deserialize_with = "deserialize_node_ip")]
    ip: Ipv4Net,
    location: String,
}

/// Declarative request for virtual endpoints.
///
/// `location` stays a free string here: an unknown placement policy only
/// invalidates its own spec when placement is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VirtualNetSpec {
    pub location: String,
    pub virtual_nodes: u32,
    /// Target node for `colocated` placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Per-node endpoint counts for `custom` placement, iterated by node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<BTreeMap<String, u32>>,
}

/// Management network and runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ManagementConfig {
    /// Management subnet; `.1` is the NAT gateway
    pub subnet: Ipv4Net,
    /// External port for the node at ordinal 0; node `i` gets `base-port + i`
    pub base_port: u16,
    /// ovsdb-server port each node listens on behind the gateway
    pub control_port: u16,
    pub fabric_dpid: String,
    pub management_dpid: String,
    /// Root of the per-node private runtime directories
    pub runtime_dir: PathBuf,
    /// How long to wait for a control socket to appear
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    /// Executable spawned as the nested network engine (defaults to this binary)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_engine: Option<PathBuf>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            subnet: DEFAULT_MANAGEMENT_SUBNET,
            base_port: 6641,
            control_port: 6640,
            fabric_dpid: "0000000000000001".to_string(),
            management_dpid: "0000000000000002".to_string(),
            runtime_dir: PathBuf::from("/tmp/fabricsim"),
            ready_timeout: Duration::from_secs(10),
            nested_engine: None,
        }
    }
}

fn default_virtual_subnet() -> Ipv4Net {
    DEFAULT_VIRTUAL_SUBNET
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no physical nodes declared")]
    NoPhysicalNodes,

    #[error("physical node names cannot be empty")]
    EmptyNodeName,

    #[error("physical node '{0}' is declared twice")]
    DuplicateNode(String),

    #[error("invalid datapath id '{dpid}' for {switch}: expected 16 hex digits")]
    InvalidDpid { switch: &'static str, dpid: String },

    #[error("external ports {base}..{base}+{nodes} overflow the TCP port range")]
    PortRangeOverflow { base: u16, nodes: usize },
}

impl FabricConfig {
    /// Validate the configuration.
    ///
    /// Only checks that make the whole run meaningless live here. Problems
    /// confined to a single virtual net are reported during placement.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.physical_nodes.is_empty() {
            return Err(ConfigError::NoPhysicalNodes);
        }

        let mut seen = HashSet::new();
        for node in &self.physical_nodes {
            if node.name.trim().is_empty() {
                return Err(ConfigError::EmptyNodeName);
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }

        for (switch, dpid) in [
            ("fabric switch", &self.management.fabric_dpid),
            ("management switch", &self.management.management_dpid),
        ] {
            if dpid.len() != 16 || !dpid.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::InvalidDpid { switch, dpid: dpid.clone() });
            }
        }

        let last_port = usize::from(self.management.base_port) + self.physical_nodes.len() - 1;
        if last_port > usize::from(u16::MAX) {
            return Err(ConfigError::PortRangeOverflow {
                base: self.management.base_port,
                nodes: self.physical_nodes.len(),
            });
        }

        Ok(())
    }

    /// Names of all declared physical nodes, in declaration order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.physical_nodes.iter().map(|n| n.name.as_str())
    }
}

/// Prefix length given to node addresses written without one
const LEGACY_NODE_PREFIX: u8 = 8;

/// Deserialize a node's data-plane address, reading a bare address as `/8`
fn deserialize_node_ip<'de, D>(deserializer: D) -> Result<Ipv4Net, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if raw.contains('/') {
        return raw.parse::<Ipv4Net>().map_err(de::Error::custom);
    }
    let addr = raw.parse::<Ipv4Addr>().map_err(de::Error::custom)?;
    Ipv4Net::new(addr, LEGACY_NODE_PREFIX).map_err(de::Error::custom)
}

/// Deserialize `physical-nodes` keeping the order in which entries appear
fn deserialize_ordered_nodes<'de, D>(deserializer: D) -> Result<Vec<PhysicalNodeConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedNodes;

    impl<'de> Visitor<'de> for OrderedNodes {
        type Value = Vec<PhysicalNodeConfig>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping from node name to {ip, location}")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut nodes = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, entry)) = map.next_entry::<String, NodeEntry>()? {
                nodes.push(PhysicalNodeConfig {
                    name,
                    ip: entry.ip,
                    location: entry.location,
                });
            }
            Ok(nodes)
        }
    }

    deserializer.deserialize_map(OrderedNodes)
}

fn serialize_ordered_nodes<S>(nodes: &[PhysicalNodeConfig], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(nodes.len()))?;
    for node in nodes {
        let entry = NodeEntry { ip: node.ip, location: node.location.clone() };
        map.serialize_entry(&node.name, &entry)?;
    }
    map.end()
}
