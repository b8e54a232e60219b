//! Dry planning of a fabric run.
//!
//! `fabricsim plan` resolves everything a run would do (declarations,
//! addresses, external ports, endpoint placement) without touching the host,
//! and writes it as YAML for review.

use crate::config::FabricConfig;
use crate::error::FabricError;
use crate::nested::NestedDescriptor;
use crate::registry::{external_port, ManagementMapping};
use crate::topology::{Declaration, FabricTopologyBuilder, Placement, PlacementPlanner};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct FabricPlan {
    pub controller: String,
    pub declarations: Vec<Declaration>,
    pub nodes: Vec<NodePlan>,
    pub management: Vec<ManagementMapping>,
    pub placements: Vec<Placement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedPlan>,
}

#[derive(Debug, Serialize)]
pub struct NodePlan {
    pub name: String,
    pub ordinal: usize,
    pub data_address: Ipv4Net,
    pub management_address: Ipv4Net,
    pub nested_dpid: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SkippedPlan {
    pub spec: usize,
    pub reason: String,
}

impl FabricPlan {
    /// Plan a run of `config`, assuming every node's control plane comes up
    pub fn build(config: &FabricConfig) -> Result<Self, FabricError> {
        config.validate()?;
        let topology = FabricTopologyBuilder::new(config).build()?;
        let mgmt = &config.management;

        let mut management = Vec::with_capacity(topology.nodes().len());
        for node in topology.nodes() {
            let port = external_port(mgmt.base_port, node.ordinal).ok_or_else(|| {
                FabricError::PortOutOfRange {
                    node: node.name.clone(),
                    base: mgmt.base_port,
                    ordinal: node.ordinal,
                }
            })?;
            management.push(ManagementMapping {
                node: node.name.clone(),
                ordinal: node.ordinal,
                external_port: port,
                internal_address: node.management_address.addr(),
                internal_port: mgmt.control_port,
            });
        }

        let live = topology.node_names();
        let planner = PlacementPlanner::new(topology.allocator());
        let mut placements = Vec::new();
        let mut skipped = Vec::new();
        for (i, spec) in config.virtual_nets.iter().enumerate() {
            match planner.resolve(i + 1, spec, &live) {
                Ok(resolved) => placements.extend(resolved),
                Err(e) => skipped.push(SkippedPlan { spec: i + 1, reason: e.to_string() }),
            }
        }

        let mut endpoints: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for p in &placements {
            endpoints.entry(p.node.as_str()).or_default().push(p.endpoint.clone());
        }
        let nodes = topology
            .nodes()
            .iter()
            .map(|node| NodePlan {
                name: node.name.clone(),
                ordinal: node.ordinal,
                data_address: node.data_address,
                management_address: node.management_address,
                nested_dpid: NestedDescriptor::dpid_for(node.ordinal),
                endpoints: endpoints.remove(node.name.as_str()).unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            controller: config.controller.to_string(),
            declarations: topology.declarations().to_vec(),
            nodes,
            management,
            placements,
            skipped,
        })
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
controller: none
physical-nodes:
  n1: {ip: 10.0.1.1/24, location: fabric}
  n2: {ip: 10.0.1.2/24, location: fabric}
virtual-nets:
  - {location: colocated, virtual-nodes: 2, node: n1}
  - {location: custom, virtual-nodes: 3, nodes: {n1: 1, n2: 1}}
"#;

    #[test]
    fn test_plan_contents() {
        let config: FabricConfig = serde_yaml::from_str(CONFIG).unwrap();
        let plan = FabricPlan::build(&config).unwrap();
        assert_eq!(plan.nodes[0].endpoints, vec!["n1-1-h1", "n1-1-h2"]);
        assert!(plan.nodes[1].endpoints.is_empty());
        let ports: Vec<u16> = plan.management.iter().map(|m| m.external_port).collect();
        assert_eq!(ports, vec![6641, 6642]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].spec, 2);
    }

    #[test]
    fn test_plan_yaml() {
        let config: FabricConfig = serde_yaml::from_str(CONFIG).unwrap();
        let yaml = FabricPlan::build(&config).unwrap().to_yaml().unwrap();
        assert!(yaml.contains("n1-1-h2"));
        assert!(yaml.contains("external_port: 6642"));
        assert!(yaml.contains("type: switch"));
    }
}
