//! Interactive control session.
//!
//! Once the fabric is up the operator gets a small line-oriented shell:
//!
//! ```text
//! fabric> nodes
//! fabric> ports
//! fabric> vhosts n1
//! fabric> sh n1 ip addr
//! fabric> vm n1 n1-1-h1 ping -c1 10.0.0.2
//! fabric> exit
//! ```
//!
//! A failing command prints its error and the session continues. The
//! session ends on `exit`, `quit` or end of input.

use crate::engine::Emulator;
use crate::orchestrator::FabricOrchestrator;
use std::io::{self, BufRead, Write};

const PROMPT: &str = "fabric> ";

const HELP: &str = "\
commands:
  help                       show this help
  nodes                      list physical nodes and their addresses
  ports                      list external ovsdb ports
  vhosts [node]              list virtual endpoints
  sh <node> <cmd..>          run a command on a physical node
  vm <node> <vhost> <cmd..>  run a command inside a virtual endpoint
  exit | quit                tear down the fabric and leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Help,
    Nodes,
    Ports,
    Vhosts(Option<String>),
    Sh { node: String, argv: Vec<String> },
    Vm { node: String, vhost: String, argv: Vec<String> },
    Exit,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl SessionCommand {
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(command) = words.next() else {
            return Ok(SessionCommand::Empty);
        };
        let rest: Vec<String> = words.collect();
        match command.as_str() {
            "help" | "?" => Ok(SessionCommand::Help),
            "nodes" => Ok(SessionCommand::Nodes),
            "ports" => Ok(SessionCommand::Ports),
            "vhosts" => match rest.as_slice() {
                [] => Ok(SessionCommand::Vhosts(None)),
                [node] => Ok(SessionCommand::Vhosts(Some(node.clone()))),
                _ => Err(SessionError::Usage("vhosts [node]")),
            },
            "sh" => match rest.split_first() {
                Some((node, argv)) if !argv.is_empty() => Ok(SessionCommand::Sh {
                    node: node.clone(),
                    argv: argv.to_vec(),
                }),
                _ => Err(SessionError::Usage("sh <node> <cmd..>")),
            },
            "vm" => match rest.as_slice() {
                [node, vhost, argv @ ..] if !argv.is_empty() => Ok(SessionCommand::Vm {
                    node: node.clone(),
                    vhost: vhost.clone(),
                    argv: argv.to_vec(),
                }),
                _ => Err(SessionError::Usage("vm <node> <vhost> <cmd..>")),
            },
            "exit" | "quit" => Ok(SessionCommand::Exit),
            other => Err(SessionError::Unknown(other.to_string())),
        }
    }
}

/// Read commands from `input` until `exit` or end of input
pub fn run<E, R, W>(orch: &mut FabricOrchestrator<E>, input: R, mut out: W) -> io::Result<()>
where
    E: Emulator,
    R: BufRead,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;
        let Some(line) = lines.next() else {
            writeln!(out)?;
            return Ok(());
        };
        match SessionCommand::parse(&line?) {
            Ok(SessionCommand::Exit) => return Ok(()),
            Ok(command) => execute(orch, command, &mut out)?,
            Err(e) => writeln!(out, "{}", e)?,
        }
    }
}

fn execute<E: Emulator, W: Write>(
    orch: &mut FabricOrchestrator<E>,
    command: SessionCommand,
    out: &mut W,
) -> io::Result<()> {
    match command {
        SessionCommand::Help => writeln!(out, "{}", HELP),
        SessionCommand::Nodes => {
            for node in orch.topology().nodes() {
                writeln!(
                    out,
                    "{:<10} data {:<18} mgmt {:<18} {}",
                    node.name,
                    node.data_address.to_string(),
                    node.management_address.to_string(),
                    node.nested.state()
                )?;
            }
            Ok(())
        }
        SessionCommand::Ports => {
            for m in orch.registry().mappings() {
                writeln!(
                    out,
                    "{:<10} :{} -> {}:{}",
                    m.node, m.external_port, m.internal_address, m.internal_port
                )?;
            }
            Ok(())
        }
        SessionCommand::Vhosts(filter) => {
            if let Some(name) = &filter {
                if orch.topology().node(name).is_none() {
                    return writeln!(out, "unknown node '{}'", name);
                }
            }
            let nodes = orch
                .topology()
                .nodes()
                .iter()
                .filter(|n| filter.as_deref().map_or(true, |f| f == n.name));
            for node in nodes {
                for host in node.nested.descriptor().hosts() {
                    let ip = host.ip.map(|ip| ip.to_string()).unwrap_or_default();
                    writeln!(out, "{:<10} {:<16} {}", node.name, host.name, ip)?;
                }
            }
            Ok(())
        }
        SessionCommand::Sh { node, argv } => run_and_print(orch, &node, &argv, out),
        SessionCommand::Vm { node, vhost, argv } => {
            let known = orch
                .topology()
                .node(&node)
                .map(|n| n.nested.descriptor().has_endpoint(&vhost));
            match known {
                None => writeln!(out, "unknown node '{}'", node),
                Some(false) => writeln!(out, "node {} has no virtual endpoint '{}'", node, vhost),
                Some(true) => {
                    let mut full: Vec<String> =
                        ["ip", "netns", "exec", vhost.as_str()].iter().map(|s| s.to_string()).collect();
                    full.extend(argv);
                    run_and_print(orch, &node, &full, out)
                }
            }
        }
        SessionCommand::Empty | SessionCommand::Exit => Ok(()),
    }
}

fn run_and_print<E: Emulator, W: Write>(
    orch: &mut FabricOrchestrator<E>,
    node: &str,
    argv: &[String],
    out: &mut W,
) -> io::Result<()> {
    match orch.run_on(node, argv) {
        Ok(output) => {
            write!(out, "{}", output.stdout)?;
            write!(out, "{}", output.stderr)?;
            if !output.success() {
                writeln!(out, "(exit status {})", output.exit_code)?;
            }
            Ok(())
        }
        Err(e) => writeln!(out, "{}", e),
    }
}
