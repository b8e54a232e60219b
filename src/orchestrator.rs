//! Fabric orchestrator.
//!
//! This module drives a whole run: it builds the two-tier topology, brings
//! it up through an [`Emulator`], starts every node's control plane and
//! management mapping, places virtual endpoints and launches the nested
//! networks. Teardown runs the same steps in reverse.

use crate::config::FabricConfig;
use crate::controller::configure_forwarding;
use crate::engine::{materialize, CommandOutput, Emulator, EngineError};
use crate::error::FabricError;
use crate::registry::{external_port, ManagementMapping, ManagementRegistry};
use crate::topology::builder::{FABRIC_SWITCH, MANAGEMENT_INTF, NAT_GATEWAY};
use crate::topology::{FabricTopology, FabricTopologyBuilder, Placement, PlacementError, PlacementPlanner};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::env;

/// A virtual net that could not be placed and was left out of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSpec {
    /// 1-based position in `virtual-nets`
    pub spec: usize,
    pub error: PlacementError,
}

pub struct FabricOrchestrator<E: Emulator> {
    config: FabricConfig,
    topology: FabricTopology,
    emulator: E,
    registry: ManagementRegistry,
    placements: Vec<Placement>,
    skipped: Vec<SkippedSpec>,
    // DNAT rules present on the gateway, removed at shutdown
    dnat_rules: Vec<ManagementMapping>,
    materialized: bool,
}

/// `ip route` command pointing a node's default route at the gateway
pub fn default_route_args(gateway: &str) -> Vec<String> {
    ["ip", "route", "replace", "default", "via", gateway, "dev", MANAGEMENT_INTF]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl<E: Emulator> FabricOrchestrator<E> {
    /// Validate `config` and build its topology. Nothing runs yet.
    pub fn new(config: FabricConfig, emulator: E) -> Result<Self, FabricError> {
        config.validate()?;
        let mut builder = FabricTopologyBuilder::new(&config);
        if config.management.nested_engine.is_none() {
            if let Ok(exe) = env::current_exe() {
                builder = builder.nested_engine(exe);
            }
        }
        let topology = builder.build()?;
        Ok(Self {
            config,
            topology,
            emulator,
            registry: ManagementRegistry::new(),
            placements: Vec::new(),
            skipped: Vec::new(),
            dnat_rules: Vec::new(),
            materialized: false,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn topology(&self) -> &FabricTopology {
        &self.topology
    }

    pub fn registry(&self) -> &ManagementRegistry {
        &self.registry
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Placements applied to the nested networks
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn skipped(&self) -> &[SkippedSpec] {
        &self.skipped
    }

    /// Bring the whole fabric up.
    ///
    /// On any fatal error everything started so far is torn down before the
    /// error is returned. Virtual nets that cannot be placed are skipped.
    pub fn bring_up(&mut self) -> Result<(), FabricError> {
        let result = self.try_bring_up();
        if let Err(e) = &result {
            error!("Bring-up failed: {}", e);
            if let Err(teardown) = self.shutdown() {
                warn!("Teardown after failed bring-up was incomplete: {}", teardown);
            }
        }
        result
    }

    fn try_bring_up(&mut self) -> Result<(), FabricError> {
        info!("Materializing fabric with {} physical nodes", self.topology.nodes().len());
        self.materialized = true;
        materialize(&mut self.emulator, self.topology.declarations())?;
        configure_forwarding(&mut self.emulator, FABRIC_SWITCH, &self.config.controller)?;

        self.start_control_planes()?;
        self.provision()?;
        self.launch_all()?;
        info!(
            "Fabric is up: {} nodes, {} virtual endpoints, {} virtual nets skipped",
            self.topology.nodes().len(),
            self.placements.len(),
            self.skipped.len()
        );
        Ok(())
    }

    fn start_control_planes(&mut self) -> Result<(), FabricError> {
        let mgmt = &self.config.management;
        let gateway = self.topology.gateway_address().addr().to_string();

        for node in self.topology.nodes_mut() {
            node.nested.start_control_plane(&mut self.emulator, mgmt.ready_timeout)?;
            self.emulator.check(&node.name, &default_route_args(&gateway))?;

            let address = node.management_address.addr();
            self.emulator.check(
                &node.name,
                &node.nested.runtime().add_remote_args(&address.to_string(), mgmt.control_port),
            )?;

            let port = external_port(mgmt.base_port, node.ordinal).ok_or_else(|| {
                FabricError::PortOutOfRange {
                    node: node.name.clone(),
                    base: mgmt.base_port,
                    ordinal: node.ordinal,
                }
            })?;
            let mapping = ManagementMapping {
                node: node.name.clone(),
                ordinal: node.ordinal,
                external_port: port,
                internal_address: address,
                internal_port: mgmt.control_port,
            };
            // register only once the port actually forwards
            self.emulator.check(NAT_GATEWAY, &mapping.dnat_rule())?;
            self.dnat_rules.push(mapping.clone());
            self.registry.register(mapping)?;
            info!("Node {} has ovsdb on external port {}", node.name, port);
        }
        Ok(())
    }

    /// Resolve every virtual net against the nodes whose control plane is up
    fn provision(&mut self) -> Result<(), FabricError> {
        let live: BTreeSet<String> = self
            .topology
            .nodes()
            .iter()
            .filter(|n| n.nested.accepts_endpoints())
            .map(|n| n.name.clone())
            .collect();
        let allocator = self.topology.allocator().clone();
        let planner = PlacementPlanner::new(&allocator);

        for (i, spec) in self.config.virtual_nets.iter().enumerate() {
            let index = i + 1;
            let placements = match planner.resolve(index, spec, &live) {
                Ok(placements) => placements,
                Err(e) => {
                    error!("Skipping virtual net {}: {}", index, e);
                    self.skipped.push(SkippedSpec { spec: index, error: e });
                    continue;
                }
            };
            for placement in placements {
                // resolve only returns live nodes
                let node = self
                    .topology
                    .node_mut(&placement.node)
                    .ok_or_else(|| EngineError::UnknownNode(placement.node.clone()))?;
                node.nested.add_endpoint(&placement.endpoint, placement.address)?;
                self.placements.push(placement);
            }
        }
        Ok(())
    }

    fn launch_all(&mut self) -> Result<(), FabricError> {
        let timeout = self.config.management.ready_timeout;
        for node in self.topology.nodes_mut() {
            node.nested.launch(&mut self.emulator, &self.config.controller, timeout)?;
        }
        Ok(())
    }

    /// Tear everything down: nested networks first, then the DNAT rules,
    /// then the fabric. Every step is attempted; the first error is returned.
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<(), FabricError> {
        let mut first_error: Option<FabricError> = None;

        for node in self.topology.nodes_mut().iter_mut().rev() {
            if let Err(e) = node.nested.terminate(&mut self.emulator) {
                first_error.get_or_insert(e.into());
            }
        }
        for mapping in self.dnat_rules.drain(..).rev() {
            if let Err(e) = self.emulator.check(NAT_GATEWAY, &mapping.dnat_removal()) {
                warn!("Failed to remove DNAT rule for {}: {}", mapping.node, e);
                first_error.get_or_insert(e.into());
            }
        }
        if self.materialized {
            self.materialized = false;
            if let Err(e) = self.emulator.stop() {
                first_error.get_or_insert(e.into());
            }
            info!("Fabric stopped");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run a command on a physical node (or any other emulated node)
    pub fn run_on(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
        self.emulator.run(node, argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Event, RecordingEmulator};
    use crate::nested::NestedState;

    fn config(dir: &std::path::Path, nets: &str) -> FabricConfig {
        let yaml = format!(
            r#"
controller: none
physical-nodes:
  n1: {{ip: 10.0.1.1/24, location: fabric}}
  n2: {{ip: 10.0.1.2/24, location: fabric}}
virtual-nets: {}
management:
  runtime-dir: {}
  ready-timeout: 100ms
"#,
            nets,
            dir.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_bring_up_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "[{location: colocated, virtual-nodes: 1, node: n2}]");
        let mut orch = FabricOrchestrator::new(config, RecordingEmulator::new()).unwrap();
        orch.bring_up().unwrap();
        for node in orch.topology().nodes() {
            assert_eq!(node.nested.state(), NestedState::NestedNetworkRunning);
        }
        assert_eq!(orch.placements().len(), 1);
        assert_eq!(orch.registry().len(), 2);

        orch.shutdown().unwrap();
        for node in orch.topology().nodes() {
            assert_eq!(node.nested.state(), NestedState::Terminated);
        }
        assert_eq!(orch.emulator().log().snapshot().last(), Some(&Event::Stop));
    }

    #[test]
    fn test_default_route_precedes_dnat() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = FabricOrchestrator::new(config(dir.path(), "[]"), RecordingEmulator::new()).unwrap();
        orch.bring_up().unwrap();
        let log = orch.emulator().log();
        let route = log
            .position(|e| matches!(e, Event::Run { node, argv } if node == "n1" && argv[1] == "route"))
            .unwrap();
        let dnat = log
            .position(|e| matches!(e, Event::Run { node, argv } if node == NAT_GATEWAY && argv.contains(&"6641".to_string())))
            .unwrap();
        assert!(route < dnat);
    }

    #[test]
    fn test_shutdown_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = FabricOrchestrator::new(config(dir.path(), "[]"), RecordingEmulator::new()).unwrap();
        orch.bring_up().unwrap();
        orch.shutdown().unwrap();
        let len = orch.emulator().log().len();
        orch.shutdown().unwrap();
        assert_eq!(orch.emulator().log().len(), len);
    }

    #[test]
    fn test_failed_control_plane_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut emu = RecordingEmulator::new();
        emu.fail_program("ovs-vswitchd");
        let mut orch = FabricOrchestrator::new(config(dir.path(), "[]"), emu).unwrap();
        let err = orch.bring_up().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProcessSpawn);
        assert_eq!(orch.emulator().log().snapshot().last(), Some(&Event::Stop));
        assert!(orch.registry().is_empty());
    }

    #[test]
    fn test_failed_dnat_leaves_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut emu = RecordingEmulator::new();
        emu.fail_program("DNAT");
        let mut orch = FabricOrchestrator::new(config(dir.path(), "[]"), emu).unwrap();
        assert!(orch.bring_up().is_err());
        assert!(orch.registry().get("n1").is_none());
        assert!(orch.registry().is_empty());

        let removals = orch
            .emulator()
            .log()
            .commands_on(NAT_GATEWAY)
            .into_iter()
            .filter(|argv| argv.iter().any(|a| a == "-D"))
            .count();
        assert_eq!(removals, 0);
    }
}
