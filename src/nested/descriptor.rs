//! In-memory description of a nested network.

use crate::topology::{Declaration, HostDecl, LinkDecl, SwitchDecl};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the single switch inside every nested network
pub const NESTED_SWITCH: &str = "s1";

/// Declarations for one node's nested network.
///
/// Starts with the node's private switch; every endpoint adds one host and
/// one link to that switch, so the descriptor never holds a link without
/// its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedDescriptor {
    pub node: String,
    /// Touched by the nested engine once the network is up
    pub ready_file: PathBuf,
    declarations: Vec<Declaration>,
}

impl NestedDescriptor {
    pub fn new(node: impl Into<String>, dpid: impl Into<String>, ready_file: PathBuf) -> Self {
        let switch = SwitchDecl {
            name: NESTED_SWITCH.to_string(),
            dpid: dpid.into(),
            fail_mode: None,
        };
        Self {
            node: node.into(),
            ready_file,
            declarations: vec![Declaration::Switch(switch)],
        }
    }

    /// Datapath id used for a node's nested switch
    pub fn dpid_for(ordinal: usize) -> String {
        format!("{:016x}", 0x1000 + ordinal)
    }

    pub fn add_endpoint(&mut self, name: &str, address: Ipv4Net) {
        self.declarations.push(Declaration::Host(HostDecl::plain(name, address)));
        self.declarations.push(Declaration::Link(LinkDecl::new(NESTED_SWITCH, name)));
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Host(h) => Some(h),
            _ => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Link(l) => Some(l),
            _ => None,
        })
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.hosts().any(|h| h.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts().next().is_none()
    }

    /// JSON form handed to the nested engine
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }
}
