//! Process configuration module.
//!
//! This module builds the command lines for the long-lived processes each
//! physical node runs: its private ovsdb-server and ovs-vswitchd, and the
//! nested network engine.

pub mod ovs;
pub mod types;

// Re-export commonly used types for convenience
pub use ovs::OvsRuntime;
pub use types::ProcessType;
