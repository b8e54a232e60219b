//! Network topology module.
//!
//! This module contains the declaration vocabulary shared by the fabric and
//! the nested networks, the builder for the two-tier fabric, and placement
//! of virtual endpoints onto physical nodes.

pub mod builder;
pub mod placement;
pub mod types;

// Re-export key types and functions for easier access
pub use builder::{FabricTopology, FabricTopologyBuilder, PhysicalNode, TopologyError};
pub use placement::{Placement, PlacementError, PlacementPlanner, PlacementPolicy};
pub use types::{Declaration, FailMode, HostDecl, HostKind, LinkDecl, SwitchDecl};
