//! Network emulation engine interface.
//!
//! The orchestrator never touches namespaces, bridges or processes directly.
//! It declares switches, hosts and links, then drives per-node commands
//! through an [`Emulator`]. Two implementations exist:
//!
//! - [`NetnsEmulator`]: named network namespaces, veth pairs and Open vSwitch
//!   bridges on the local machine
//! - [`RecordingEmulator`]: records every call and succeeds, for dry runs and tests

pub mod netns;
pub mod recording;

pub use netns::NetnsEmulator;
pub use recording::{Event, EventLog, RecordingEmulator};

use crate::topology::{Declaration, HostDecl, LinkDecl, SwitchDecl};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of a command executed on an emulated node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors raised by an emulation engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn `{command}` on {node}: {source}")]
    Spawn {
        node: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` on {node} exited with status {code}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{} did not appear on {node} within {timeout:?}", path.display())]
    NotReady {
        node: String,
        path: PathBuf,
        timeout: Duration,
    },

    #[error("failed to stop background process {pid} on {node}: {source}")]
    Stop {
        node: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {} for {node}: {source}", path.display())]
    Write {
        node: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interface name '{0}' exceeds 15 characters")]
    InterfaceName(String),

    #[error("unknown emulated node '{0}'")]
    UnknownNode(String),

    #[error("empty command for {0}")]
    EmptyCommand(String),
}

/// A process running in the background on an emulated node
pub trait Background: fmt::Debug {
    fn id(&self) -> u32;

    /// Close the process's stdin and wait for it to exit
    fn stop(self: Box<Self>) -> Result<(), EngineError>;
}

/// Primitives the fabric is built from
pub trait Emulator {
    fn add_switch(&mut self, switch: &SwitchDecl) -> Result<(), EngineError>;
    fn add_host(&mut self, host: &HostDecl) -> Result<(), EngineError>;
    fn add_link(&mut self, link: &LinkDecl) -> Result<(), EngineError>;

    /// Create everything declared so far
    fn build(&mut self) -> Result<(), EngineError>;
    fn start(&mut self) -> Result<(), EngineError>;
    /// Tear down everything `build` created. Best effort.
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Run a command to completion on `node`. Switches and hosts outside a
    /// namespace run in the root namespace.
    fn run(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, EngineError>;

    /// Start a long-lived process on `node` with its stdin held open
    fn spawn(&mut self, node: &str, argv: &[String]) -> Result<Box<dyn Background>, EngineError>;

    /// Block until `path` exists or `timeout` elapses
    fn wait_for_path(&mut self, node: &str, path: &Path, timeout: Duration) -> Result<(), EngineError>;

    /// Write a file that processes on `node` will read, creating parent directories
    fn write_file(&mut self, node: &str, path: &Path, contents: &str) -> Result<(), EngineError>;

    fn declare(&mut self, decl: &Declaration) -> Result<(), EngineError> {
        match decl {
            Declaration::Switch(s) => self.add_switch(s),
            Declaration::Host(h) => self.add_host(h),
            Declaration::Link(l) => self.add_link(l),
        }
    }

    /// Run a command and turn a non-zero exit into an error
    fn check(&mut self, node: &str, argv: &[String]) -> Result<String, EngineError> {
        let output = self.run(node, argv)?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                node: node.to_string(),
                command: argv.join(" "),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Declare, build and start a whole topology
pub fn materialize<E: Emulator + ?Sized>(
    emulator: &mut E,
    declarations: &[Declaration],
) -> Result<(), EngineError> {
    for decl in declarations {
        emulator.declare(decl)?;
    }
    emulator.build()?;
    emulator.start()
}
