#[cfg(test)]
mod fabric_scenarios {
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    use fabricsim::config::FabricConfig;
    use fabricsim::engine::{Event, RecordingEmulator};
    use fabricsim::nested::{NestedDescriptor, NestedState};
    use fabricsim::orchestrator::FabricOrchestrator;
    use fabricsim::topology::builder::{FABRIC_SWITCH, NAT_GATEWAY};
    use fabricsim::topology::PlacementError;

    fn config(runtime: &Path, nodes: &[&str], nets: &str) -> FabricConfig {
        config_with_controller(runtime, "none", nodes, nets)
    }

    fn config_with_controller(runtime: &Path, controller: &str, nodes: &[&str], nets: &str) -> FabricConfig {
        let mut yaml = format!("controller: \"{}\"\nphysical-nodes:\n", controller);
        for (i, node) in nodes.iter().enumerate() {
            yaml.push_str(&format!("  {}: {{ip: 10.0.1.{}/24, location: fabric}}\n", node, i + 1));
        }
        yaml.push_str(&format!("virtual-nets: {}\n", nets));
        yaml.push_str(&format!("management:\n  runtime-dir: {}\n  ready-timeout: 100ms\n", runtime.display()));
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn bring_up(nodes: &[&str], nets: &str) -> (FabricOrchestrator<RecordingEmulator>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = FabricOrchestrator::new(config(dir.path(), nodes, nets), RecordingEmulator::new()).unwrap();
        orch.bring_up().unwrap();
        (orch, dir)
    }

    fn dnat_ports(orch: &FabricOrchestrator<RecordingEmulator>) -> Vec<String> {
        orch.emulator()
            .log()
            .commands_on(NAT_GATEWAY)
            .into_iter()
            .filter(|argv| argv.iter().any(|a| a == "DNAT") && argv.iter().any(|a| a == "-A"))
            .filter_map(|argv| {
                let i = argv.iter().position(|a| a == "--dport")?;
                argv.get(i + 1).cloned()
            })
            .collect()
    }

    /// Two nodes, two colocated endpoints on n1
    #[test]
    fn test_scenario_colocated() {
        let (orch, _dir) = bring_up(&["n1", "n2"], "[{location: colocated, virtual-nodes: 2, node: n1}]");

        let n1 = orch.topology().node("n1").unwrap();
        let hosts: Vec<&str> = n1.nested.descriptor().hosts().map(|h| h.name.as_str()).collect();
        assert_eq!(hosts, vec!["n1-1-h1", "n1-1-h2"]);
        assert_eq!(n1.nested.descriptor().links().count(), 2);

        let n2 = orch.topology().node("n2").unwrap();
        assert!(n2.nested.descriptor().is_empty());
        assert_eq!(n2.nested.descriptor().links().count(), 0);

        assert_eq!(dnat_ports(&orch), vec!["6641", "6642"]);
        assert!(orch.skipped().is_empty());
    }

    /// Custom counts that do not add up touch neither node
    #[test]
    fn test_scenario_custom_mismatch() {
        let (orch, _dir) = bring_up(
            &["n1", "n2"],
            "[{location: custom, virtual-nodes: 3, nodes: {n1: 1, n2: 1}}]",
        );

        assert_eq!(orch.skipped().len(), 1);
        assert!(matches!(
            orch.skipped()[0].error,
            PlacementError::Mismatch { declared: 3, placed: 2, .. }
        ));
        for node in orch.topology().nodes() {
            assert!(node.nested.descriptor().is_empty(), "{} got endpoints", node.name);
        }
        assert!(orch.placements().is_empty());
    }

    /// An unknown node skips its spec while later specs are still provisioned
    #[test]
    fn test_scenario_unknown_node_continues() {
        let (orch, _dir) = bring_up(
            &["n1", "n2"],
            "[{location: colocated, virtual-nodes: 1, node: n3}, {location: colocated, virtual-nodes: 1, node: n2}]",
        );

        assert_eq!(orch.skipped().len(), 1);
        assert_eq!(
            orch.skipped()[0].error,
            PlacementError::UnknownNode { spec: 1, node: "n3".to_string() }
        );
        let n2 = orch.topology().node("n2").unwrap();
        assert!(n2.nested.descriptor().has_endpoint("n2-2-h1"));
        assert_eq!(n2.nested.state(), NestedState::NestedNetworkRunning);
    }

    /// Unknown placement policies are skipped too
    #[test]
    fn test_unsupported_policy_is_skipped() {
        let (orch, _dir) = bring_up(&["n1"], "[{location: spread, virtual-nodes: 2}]");
        assert!(matches!(orch.skipped()[0].error, PlacementError::Unsupported { .. }));
    }

    /// External ports are base-port + ordinal, one per node
    #[test]
    fn test_external_ports_follow_ordinals() {
        let (orch, _dir) = bring_up(&["c3", "a1", "b2", "d4"], "[]");
        let mappings = orch.registry().mappings();
        let pairs: Vec<(&str, u16)> = mappings.iter().map(|m| (m.node.as_str(), m.external_port)).collect();
        assert_eq!(pairs, vec![("c3", 6641), ("a1", 6642), ("b2", 6643), ("d4", 6644)]);

        let addresses: HashSet<_> = mappings.iter().map(|m| m.internal_address).collect();
        assert_eq!(addresses.len(), mappings.len());
        let ports: HashSet<u16> = mappings.iter().map(|m| m.external_port).collect();
        assert_eq!(ports.len(), mappings.len());
        let gateway = orch.topology().gateway_address().addr();
        assert!(addresses.iter().all(|a| *a != gateway));
    }

    /// Every node's control plane starts before any endpoint is launched
    #[test]
    fn test_control_planes_precede_launches() {
        let (orch, _dir) = bring_up(&["n1", "n2"], "[{location: colocated, virtual-nodes: 1, node: n1}]");
        let log = orch.emulator().log();
        let last_dnat = log
            .snapshot()
            .iter()
            .rposition(|e| matches!(e, Event::Run { node, argv } if node == NAT_GATEWAY && argv.iter().any(|a| a == "DNAT")))
            .unwrap();
        let first_spawn = log.position(|e| matches!(e, Event::Spawn { .. })).unwrap();
        assert!(last_dnat < first_spawn);
    }

    /// Teardown stops nested engines first and the fabric last
    #[test]
    fn test_teardown_order() {
        let (mut orch, _dir) = bring_up(&["n1", "n2"], "[{location: colocated, virtual-nodes: 2, node: n1}]");
        let log = orch.emulator().log();
        let before = log.len();
        orch.shutdown().unwrap();

        let events = log.snapshot();
        let teardown = &events[before..];
        let first_exit = teardown
            .iter()
            .position(|e| matches!(e, Event::Run { argv, .. } if argv.iter().any(|a| a == "exit")))
            .unwrap();
        let last_terminate = teardown
            .iter()
            .rposition(|e| matches!(e, Event::Terminate { .. }))
            .unwrap();
        let dnat_removal = teardown
            .iter()
            .position(|e| matches!(e, Event::Run { argv, .. } if argv.iter().any(|a| a == "-D")))
            .unwrap();

        // n2 is torn down before n1, each nested engine before its daemons
        assert!(matches!(teardown[0], Event::Terminate { ref node, .. } if node == "n2"));
        assert!(first_exit > 0);
        assert!(last_terminate < dnat_removal);
        assert_eq!(teardown.last(), Some(&Event::Stop));
        for node in orch.topology().nodes() {
            assert_eq!(node.nested.state(), NestedState::Terminated);
        }
    }

    /// The descriptor handed to the nested engine reproduces the endpoints
    #[test]
    fn test_descriptor_written_for_nested_engine() {
        let (orch, _dir) = bring_up(&["n1"], "[{location: colocated, virtual-nodes: 2, node: n1}]");
        let n1 = orch.topology().node("n1").unwrap();
        let path = n1.nested.runtime().descriptor_file();
        let written = orch.emulator().log().written(&path).unwrap();
        let saved = NestedDescriptor::from_json(&written).unwrap();
        assert_eq!(&saved, n1.nested.descriptor());
    }

    /// A recorded run leaves nothing behind in the runtime directory
    #[test]
    fn test_recorded_run_writes_nothing_to_disk() {
        let (orch, dir) = bring_up(&["n1", "n2"], "[{location: colocated, virtual-nodes: 1, node: n1}]");
        for node in orch.topology().nodes() {
            assert!(!node.nested.runtime().descriptor_file().exists());
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// A virtual net asking for no endpoints places nothing and the run goes on
    #[test]
    fn test_zero_endpoint_net_is_accepted() {
        let (orch, _dir) = bring_up(
            &["n1", "n2"],
            "[{location: colocated, virtual-nodes: 0, node: n1}, {location: colocated, virtual-nodes: 2, node: n2}]",
        );

        assert!(orch.skipped().is_empty());
        let n1 = orch.topology().node("n1").unwrap();
        assert!(n1.nested.descriptor().is_empty());
        assert_eq!(n1.nested.state(), NestedState::NestedNetworkRunning);

        let n2 = orch.topology().node("n2").unwrap();
        let hosts: Vec<&str> = n2.nested.descriptor().hosts().map(|h| h.name.as_str()).collect();
        assert_eq!(hosts, vec!["n2-2-h1", "n2-2-h2"]);
        assert_eq!(orch.placements().len(), 2);
    }

    /// With a remote controller the fabric and every nested engine point at it
    #[test]
    fn test_remote_controller_reaches_fabric_and_engines() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_controller(
            dir.path(),
            "10.0.3.1:6633",
            &["n1", "n2"],
            "[{location: colocated, virtual-nodes: 1, node: n1}]",
        );
        let mut orch = FabricOrchestrator::new(config, RecordingEmulator::new()).unwrap();
        orch.bring_up().unwrap();
        let log = orch.emulator().log();

        let fabric = log.commands_on(FABRIC_SWITCH);
        let expected: Vec<String> = ["ovs-vsctl", "set-controller", FABRIC_SWITCH, "tcp:10.0.3.1:6633"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(fabric.contains(&expected));
        assert!(!fabric.iter().any(|argv| argv.iter().any(|a| a == "actions=normal")));

        let spawned: Vec<(String, Vec<String>)> = log
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawn { node, argv, .. } => Some((node, argv)),
                _ => None,
            })
            .collect();
        let nodes: Vec<&str> = spawned.iter().map(|(node, _)| node.as_str()).collect();
        assert_eq!(nodes, vec!["n1", "n2"]);
        for (node, argv) in &spawned {
            assert_eq!(argv.last().map(String::as_str), Some("10.0.3.1:6633"), "engine on {}", node);
        }
    }
}
