//! Topology declaration types.
//!
//! A topology is an ordered list of switch, host and link declarations.
//! The same vocabulary describes the top-level fabric and each node's nested
//! network, and it is what an [`Emulator`](crate::engine::Emulator)
//! materialises.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Behaviour of a switch while no controller is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Drop traffic until a controller installs flows
    Secure,
    /// Fall back to learning-switch forwarding
    Standalone,
}

impl FailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailMode::Secure => "secure",
            FailMode::Standalone => "standalone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchDecl {
    pub name: String,
    /// 16 hex digit datapath id
    pub dpid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_mode: Option<FailMode>,
}

/// What kind of host a declaration stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HostKind {
    /// Ordinary host (virtual endpoints)
    Plain,
    /// Physical compute node that runs its own virtual switch and nested network
    ComputeNode,
    /// Gateway in the root namespace that masquerades `subnet`
    NatGateway { subnet: Ipv4Net },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDecl {
    pub name: String,
    /// Address of the host's first interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Net>,
    pub kind: HostKind,
    /// Hosts outside a namespace share the root network stack
    #[serde(default = "default_true")]
    pub in_namespace: bool,
}

fn default_true() -> bool {
    true
}

impl HostDecl {
    pub fn plain(name: impl Into<String>, ip: Ipv4Net) -> Self {
        Self {
            name: name.into(),
            ip: Some(ip),
            kind: HostKind::Plain,
            in_namespace: true,
        }
    }
}

/// A point-to-point link. Endpoint `a` may carry an explicit interface name
/// and address; otherwise the emulator names interfaces `<node>-eth<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDecl {
    pub a: String,
    pub b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intf_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_a: Option<Ipv4Net>,
}

impl LinkDecl {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            intf_a: None,
            ip_a: None,
        }
    }

    pub fn with_intf(mut self, intf: impl Into<String>) -> Self {
        self.intf_a = Some(intf.into());
        self
    }

    pub fn with_ip(mut self, ip: Ipv4Net) -> Self {
        self.ip_a = Some(ip);
        self
    }

    pub fn touches(&self, node: &str) -> bool {
        self.a == node || self.b == node
    }
}

/// One entry of a topology description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Declaration {
    Switch(SwitchDecl),
    Host(HostDecl),
    Link(LinkDecl),
}

impl Declaration {
    /// Name of the declared switch or host; links have none
    pub fn name(&self) -> Option<&str> {
        match self {
            Declaration::Switch(s) => Some(&s.name),
            Declaration::Host(h) => Some(&h.name),
            Declaration::Link(_) => None,
        }
    }
}
