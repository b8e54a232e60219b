//! Process type definitions.

/// Long-lived processes started inside a physical node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Open vSwitch configuration database
    OvsdbServer,
    /// Open vSwitch forwarding daemon
    Vswitchd,
    /// Nested network engine running the node's virtual endpoints
    NestedEngine,
}

impl ProcessType {
    /// Get the string representation of the process type
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::OvsdbServer => "ovsdb-server",
            ProcessType::Vswitchd => "ovs-vswitchd",
            ProcessType::NestedEngine => "nested-engine",
        }
    }
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
