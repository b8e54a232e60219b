//! Namespace-based emulator.
//!
//! Hosts become named network namespaces, switches become Open vSwitch
//! bridges in the root namespace, links become veth pairs. A NAT gateway
//! host lives in the root namespace and masquerades its subnet.
//!
//! A trace of the commands issued for one physical node and its links:
//!
//! ```text
//! > ovs-vsctl --may-exist add-br fabric -- set bridge fabric other-config:datapath-id=0000000000000001
//! > ip netns add n1
//! > ip netns exec n1 ip link set lo up
//! > ip link add n1-eth0 type veth peer name fabric-eth1
//! > ip link set n1-eth0 netns n1
//! > ip netns exec n1 ip addr add 10.0.1.1/24 dev n1-eth0
//! > ip netns exec n1 ip link set n1-eth0 up
//! > ovs-vsctl add-port fabric fabric-eth1
//! > ip link set fabric-eth1 up
//! ```
//!
//! Should a run abort before `stop`, remove leftovers with
//! `ip netns delete <node>` and `ovs-vsctl del-br <switch>`.

use super::{Background, CommandOutput, Emulator, EngineError};
use crate::topology::{HostDecl, HostKind, LinkDecl, SwitchDecl};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const IFNAMSIZ: usize = 15;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Interface names chosen for one link
struct LinkPlan {
    intf_a: String,
    intf_b: String,
    first_a: bool,
    first_b: bool,
}

/// Which side of the veth pair is being wired up
enum Endpoint<'a> {
    Switch(&'a SwitchDecl),
    Host(&'a HostDecl),
}

#[derive(Debug, Default)]
pub struct NetnsEmulator {
    switches: Vec<SwitchDecl>,
    hosts: Vec<HostDecl>,
    links: Vec<LinkDecl>,
    // created resources, for teardown
    bridges: Vec<String>,
    namespaces: Vec<String>,
    root_links: Vec<String>,
    nat_rules: Vec<Vec<String>>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn execute(node: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| EngineError::EmptyCommand(node.to_string()))?;
    debug!("{}> {}", node, argv.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EngineError::Spawn {
            node: node.to_string(),
            command: argv.join(" "),
            source,
        })?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

fn ensure(node: &str, argv: Vec<String>) -> Result<(), EngineError> {
    let output = execute(node, &argv)?;
    if !output.success() {
        return Err(EngineError::CommandFailed {
            node: node.to_string(),
            command: argv.join(" "),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

fn in_netns(ns: &str, rest: &[&str]) -> Vec<String> {
    let mut full = argv(&["ip", "netns", "exec", ns]);
    full.extend(rest.iter().map(|s| s.to_string()));
    full
}

impl NetnsEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn switch(&self, name: &str) -> Option<&SwitchDecl> {
        self.switches.iter().find(|s| s.name == name)
    }

    fn host(&self, name: &str) -> Option<&HostDecl> {
        self.hosts.iter().find(|h| h.name == name)
    }

    fn endpoint(&self, name: &str) -> Result<Endpoint<'_>, EngineError> {
        if let Some(s) = self.switch(name) {
            return Ok(Endpoint::Switch(s));
        }
        self.host(name)
            .map(Endpoint::Host)
            .ok_or_else(|| EngineError::UnknownNode(name.to_string()))
    }

    /// Full argv for running `argv` on `node`
    fn command_for(&self, node: &str, argv: &[String]) -> Result<Vec<String>, EngineError> {
        match self.endpoint(node)? {
            Endpoint::Host(h) if h.in_namespace => {
                let mut full = in_netns(node, &[]);
                full.extend(argv.iter().cloned());
                Ok(full)
            }
            _ => Ok(argv.to_vec()),
        }
    }

    fn create_switch(&mut self, switch: &SwitchDecl) -> Result<(), EngineError> {
        let name = switch.name.as_str();
        ensure(
            name,
            argv(&[
                "ovs-vsctl", "--may-exist", "add-br", name, "--", "set", "bridge", name,
                &format!("other-config:datapath-id={}", switch.dpid),
            ]),
        )?;
        self.bridges.push(name.to_string());
        if let Some(mode) = switch.fail_mode {
            ensure(name, argv(&["ovs-vsctl", "set-fail-mode", name, mode.as_str()]))?;
        }
        Ok(())
    }

    fn create_namespace(&mut self, host: &HostDecl) -> Result<(), EngineError> {
        let name = host.name.as_str();
        ensure(name, argv(&["ip", "netns", "add", name]))?;
        self.namespaces.push(name.to_string());
        ensure(name, in_netns(name, &["ip", "link", "set", "lo", "up"]))
    }

    fn attach(
        &self,
        end: &Endpoint<'_>,
        intf: &str,
        ip: Option<String>,
    ) -> Result<(), EngineError> {
        match end {
            Endpoint::Switch(s) => {
                ensure(&s.name, argv(&["ovs-vsctl", "add-port", &s.name, intf]))?;
                ensure(&s.name, argv(&["ip", "link", "set", intf, "up"]))
            }
            Endpoint::Host(h) if h.in_namespace => {
                let ns = h.name.as_str();
                ensure(ns, argv(&["ip", "link", "set", intf, "netns", ns]))?;
                if let Some(ip) = ip {
                    ensure(ns, in_netns(ns, &["ip", "addr", "add", &ip, "dev", intf]))?;
                }
                ensure(ns, in_netns(ns, &["ip", "link", "set", intf, "up"]))
            }
            Endpoint::Host(h) => {
                if let Some(ip) = ip {
                    ensure(&h.name, argv(&["ip", "addr", "add", &ip, "dev", intf]))?;
                }
                ensure(&h.name, argv(&["ip", "link", "set", intf, "up"]))
            }
        }
    }

    fn next_intf(&self, counters: &mut HashMap<String, usize>, node: &str) -> (String, bool) {
        // mininet numbering: host ports from 0, switch ports from 1
        let first = if self.switch(node).is_some() { 1 } else { 0 };
        let n = counters.entry(node.to_string()).or_insert(first);
        let current = *n;
        *n += 1;
        (format!("{}-eth{}", node, current), current == first)
    }

    fn plan_links(&self) -> Vec<LinkPlan> {
        let mut counters = HashMap::new();
        let mut plans = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let (default_a, first_a) = self.next_intf(&mut counters, &link.a);
            let (intf_b, first_b) = self.next_intf(&mut counters, &link.b);
            plans.push(LinkPlan {
                intf_a: link.intf_a.clone().unwrap_or(default_a),
                intf_b,
                first_a,
                first_b,
            });
        }
        plans
    }

    /// veths with an end in a namespace disappear with it; links between
    /// root-namespace endpoints must be removed explicitly
    fn root_link_names(&self, plans: &[LinkPlan]) -> Vec<String> {
        let in_root = |name: &str| self.host(name).map_or(true, |h| !h.in_namespace);
        self.links
            .iter()
            .zip(plans)
            .filter(|(link, _)| in_root(&link.a) && in_root(&link.b))
            .map(|(_, plan)| plan.intf_a.clone())
            .collect()
    }

    fn create_links(&self, plans: &[LinkPlan]) -> Result<(), EngineError> {
        for (link, plan) in self.links.iter().zip(plans) {
            let a = self.endpoint(&link.a)?;
            let b = self.endpoint(&link.b)?;
            for name in [&plan.intf_a, &plan.intf_b] {
                if name.len() > IFNAMSIZ {
                    return Err(EngineError::InterfaceName(name.clone()));
                }
            }

            ensure(
                &link.a,
                argv(&["ip", "link", "add", &plan.intf_a, "type", "veth", "peer", "name", &plan.intf_b]),
            )?;

            // an explicit link address wins; otherwise a host's first interface
            // carries the host address
            let ip_a = link.ip_a.map(|ip| ip.to_string()).or_else(|| match &a {
                Endpoint::Host(h) if plan.first_a => h.ip.map(|ip| ip.to_string()),
                _ => None,
            });
            let ip_b = match &b {
                Endpoint::Host(h) if plan.first_b => h.ip.map(|ip| ip.to_string()),
                _ => None,
            };

            self.attach(&a, &plan.intf_a, ip_a)?;
            self.attach(&b, &plan.intf_b, ip_b)?;
        }
        Ok(())
    }
}

impl Emulator for NetnsEmulator {
    fn add_switch(&mut self, switch: &SwitchDecl) -> Result<(), EngineError> {
        self.switches.push(switch.clone());
        Ok(())
    }

    fn add_host(&mut self, host: &HostDecl) -> Result<(), EngineError> {
        self.hosts.push(host.clone());
        Ok(())
    }

    fn add_link(&mut self, link: &LinkDecl) -> Result<(), EngineError> {
        self.endpoint(&link.a)?;
        self.endpoint(&link.b)?;
        self.links.push(link.clone());
        Ok(())
    }

    fn build(&mut self) -> Result<(), EngineError> {
        for switch in self.switches.clone() {
            self.create_switch(&switch)?;
        }
        for host in self.hosts.clone() {
            if host.in_namespace {
                self.create_namespace(&host)?;
            }
        }
        let plans = self.plan_links();
        let root_links = self.root_link_names(&plans);
        self.root_links.extend(root_links);
        self.create_links(&plans)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        for host in self.hosts.clone() {
            if let HostKind::NatGateway { subnet } = host.kind {
                let subnet = subnet.trunc().to_string();
                ensure(&host.name, argv(&["sysctl", "-w", "net.ipv4.ip_forward=1"]))?;
                let rule = argv(&[
                    "iptables", "-t", "nat", "-A", "POSTROUTING", "-s", &subnet, "!", "-d",
                    &subnet, "-j", "MASQUERADE",
                ]);
                ensure(&host.name, rule.clone())?;
                self.nat_rules.push(rule);
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let mut teardown: Vec<Vec<String>> = Vec::new();
        for mut rule in self.nat_rules.drain(..) {
            if let Some(op) = rule.iter_mut().find(|arg| *arg == "-A") {
                *op = "-D".to_string();
            }
            teardown.push(rule);
        }
        for ns in self.namespaces.drain(..).rev() {
            teardown.push(argv(&["ip", "netns", "delete", &ns]));
        }
        for intf in self.root_links.drain(..) {
            teardown.push(argv(&["ip", "link", "delete", &intf]));
        }
        for bridge in self.bridges.drain(..).rev() {
            teardown.push(argv(&["ovs-vsctl", "--if-exists", "del-br", &bridge]));
        }
        for cmd in teardown {
            if let Err(e) = ensure("root", cmd) {
                warn!("Teardown step failed: {}", e);
            }
        }
        Ok(())
    }

    fn run(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
        if argv.is_empty() {
            return Err(EngineError::EmptyCommand(node.to_string()));
        }
        let full = self.command_for(node, argv)?;
        execute(node, &full)
    }

    fn spawn(&mut self, node: &str, argv: &[String]) -> Result<Box<dyn Background>, EngineError> {
        let full = self.command_for(node, argv)?;
        let (program, args) = full
            .split_first()
            .ok_or_else(|| EngineError::EmptyCommand(node.to_string()))?;
        debug!("{}> {} &", node, full.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                node: node.to_string(),
                command: full.join(" "),
                source,
            })?;
        Ok(Box::new(ChildProcess { node: node.to_string(), child }))
    }

    fn wait_for_path(&mut self, node: &str, path: &Path, timeout: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        while !path.exists() {
            if Instant::now() >= deadline {
                return Err(EngineError::NotReady {
                    node: node.to_string(),
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    // namespaces share the mount table, so the root view of `path` is the node's
    fn write_file(&mut self, node: &str, path: &Path, contents: &str) -> Result<(), EngineError> {
        let write_err = |source| EngineError::Write {
            node: node.to_string(),
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, contents).map_err(write_err)?;
        debug!("{}> wrote {}", node, path.display());
        Ok(())
    }
}

#[derive(Debug)]
struct ChildProcess {
    node: String,
    child: Child,
}

impl Background for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn stop(mut self: Box<Self>) -> Result<(), EngineError> {
        let pid = self.child.id();
        // closing stdin tells the child to shut down
        drop(self.child.stdin.take());
        let status = self.child.wait().map_err(|source| EngineError::Stop {
            node: self.node.clone(),
            pid,
            source,
        })?;
        if !status.success() {
            warn!("Background process {} on {} exited with {}", pid, self.node, status);
        }
        Ok(())
    }
}
