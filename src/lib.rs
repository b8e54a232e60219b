//! # Fabricsim - Two-tier SDN test fabric emulator
//!
//! This library builds and runs an emulated data-center fabric for testing
//! SDN controllers and virtual switching.
//!
//! ## Overview
//!
//! A set of physical compute nodes is attached to a shared fabric switch
//! (data plane) and to a management switch behind a NAT gateway (management
//! plane). Every physical node runs its own private Open vSwitch instance
//! and, inside it, a nested network of virtual endpoints placed there by a
//! declarative placement policy.
//!
//! ## Key Features
//!
//! - **Two-tier topology**: fabric and management networks with deterministic addressing
//! - **Per-node control planes**: private ovsdb-server and ovs-vswitchd per node
//! - **External access**: each node's ovsdb reachable on `base-port + ordinal`
//! - **Placement policies**: `colocated` and `custom` virtual endpoint placement
//! - **Dry runs**: every command can be recorded instead of executed
//!
//! ## Architecture
//!
//! - `config`, `config_loader`: configuration structures and file loading
//! - `controller`: controller selection and switch forwarding mode
//! - `ip`: IPv4 prefixes and the address plan
//! - `topology`: declarations, the fabric builder and endpoint placement
//! - `engine`: the emulator seam and its namespace and recording implementations
//! - `process`: Open vSwitch daemon command lines and runtime paths
//! - `nested`: per-node lifecycle and the nested network engine
//! - `registry`: external port mappings to each node's ovsdb
//! - `orchestrator`: sequencing of a whole run
//! - `plan`: resolving a run without executing it
//! - `session`: the interactive operator shell
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fabricsim::config_loader;
//! use fabricsim::engine::NetnsEmulator;
//! use fabricsim::orchestrator::FabricOrchestrator;
//! use std::path::Path;
//!
//! let config = config_loader::load_config(Path::new("fabric.yaml"))?;
//! let mut orch = FabricOrchestrator::new(config, NetnsEmulator::new())?;
//! orch.bring_up()?;
//! for mapping in orch.registry().mappings() {
//!     println!("{} -> :{}", mapping.node, mapping.external_port);
//! }
//! orch.shutdown()?;
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! controller: "none"            # or "host:port"
//! physical-nodes:
//!   n1: {ip: 10.0.1.1/24, location: fabric}
//!   n2: {ip: 10.0.1.2/24, location: fabric}
//! virtual-nets:
//!   - {location: colocated, virtual-nodes: 2, node: n1}
//!   - {location: custom, virtual-nodes: 3, nodes: {n1: 1, n2: 2}}
//! management:                   # optional
//!   base-port: 6641
//!   ready-timeout: 10s
//! ```
//!
//! ## Error Handling
//!
//! Library modules return typed errors built with `thiserror`, collected in
//! [`error::FabricError`]. The binary reports them through `color_eyre`.

pub mod config;
pub mod config_loader;
pub mod controller;
pub mod engine;
pub mod error;
pub mod ip;
pub mod nested;
pub mod orchestrator;
pub mod plan;
pub mod process;
pub mod registry;
pub mod session;
pub mod topology;

pub use error::{ErrorKind, FabricError};
