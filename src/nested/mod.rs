//! Nested networks running inside physical nodes.
//!
//! Each physical node runs its own Open vSwitch instance and a nested
//! network engine. The orchestrator first declares the nested topology
//! endpoint by endpoint, then launches it once.

pub mod descriptor;
pub mod manager;
pub mod runner;

pub use descriptor::NestedDescriptor;
pub use manager::{NestedError, NestedNetworkManager, NestedState};
pub use runner::run_nested;
