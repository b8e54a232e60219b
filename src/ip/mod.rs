//! IP address allocation and management module.
//!
//! This module handles address assignment for the two-tier fabric: the
//! management network that reaches every physical node's control socket,
//! and the virtual subnet used by endpoints inside each nested network.
//! Prefixes are [`ipnet::Ipv4Net`] values throughout.

pub mod allocator;

// Re-export commonly used types
pub use allocator::{AddressAllocator, DEFAULT_MANAGEMENT_SUBNET, DEFAULT_VIRTUAL_SUBNET};
