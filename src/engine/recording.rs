//! Recording emulator.
//!
//! Accepts every declaration, records every command and reports success.
//! `fabricsim run --dry-run` prints the recorded trace; the test suite
//! inspects it. Failures can be injected per program name, and readiness
//! waits can be made to time out per file name. Nothing touches the disk.

use super::{Background, CommandOutput, Emulator, EngineError};
use crate::topology::{Declaration, HostDecl, LinkDecl, SwitchDecl};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

/// One recorded emulator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Declare(Declaration),
    Build,
    Start,
    Stop,
    Run { node: String, argv: Vec<String> },
    Spawn { node: String, argv: Vec<String>, id: u32 },
    Wait { node: String, path: PathBuf },
    Write { node: String, path: PathBuf, contents: String },
    Terminate { node: String, id: u32 },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Declare(Declaration::Switch(s)) => write!(f, "switch {} dpid={}", s.name, s.dpid),
            Event::Declare(Declaration::Host(h)) => match &h.ip {
                Some(ip) => write!(f, "host {} ip={}", h.name, ip),
                None => write!(f, "host {}", h.name),
            },
            Event::Declare(Declaration::Link(l)) => write!(f, "link {} <-> {}", l.a, l.b),
            Event::Build => write!(f, "build"),
            Event::Start => write!(f, "start"),
            Event::Stop => write!(f, "stop"),
            Event::Run { node, argv } => write!(f, "{}> {}", node, argv.join(" ")),
            Event::Spawn { node, argv, id } => write!(f, "{}> [{}] {} &", node, id, argv.join(" ")),
            Event::Wait { node, path } => write!(f, "{}> wait for {}", node, path.display()),
            Event::Write { node, path, contents } => {
                write!(f, "{}> write {} ({} bytes)", node, path.display(), contents.len())
            }
            Event::Terminate { node, id } => write!(f, "{}> [{}] terminated", node, id),
        }
    }
}

/// Shared, append-only event log
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    /// Commands run on `node`, in order
    pub fn commands_on(&self, node: &str) -> Vec<Vec<String>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Run { node: n, argv } if n == node => Some(argv.clone()),
                _ => None,
            })
            .collect()
    }

    /// Contents last written to `path`, if any
    pub fn written(&self, path: &Path) -> Option<String> {
        self.0.borrow().iter().rev().find_map(|e| match e {
            Event::Write { path: p, contents, .. } if p == path => Some(contents.clone()),
            _ => None,
        })
    }

    /// Position of the first event matching `pred`
    pub fn position<F: Fn(&Event) -> bool>(&self, pred: F) -> Option<usize> {
        self.0.borrow().iter().position(pred)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

#[derive(Debug)]
struct RecordedProcess {
    node: String,
    id: u32,
    log: EventLog,
}

impl Background for RecordedProcess {
    fn id(&self) -> u32 {
        self.id
    }

    fn stop(self: Box<Self>) -> Result<(), EngineError> {
        self.log.push(Event::Terminate { node: self.node, id: self.id });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEmulator {
    log: EventLog,
    nodes: HashSet<String>,
    failing: HashSet<String>,
    never_ready: HashSet<String>,
    next_id: u32,
}

impl RecordingEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the event log that stays valid after the emulator moves
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    /// Make every command or spawn whose argv mentions `program` fail
    pub fn fail_program(&mut self, program: impl Into<String>) {
        self.failing.insert(program.into());
    }

    /// Make every wait for a path whose file name is `file_name` time out
    pub fn never_ready(&mut self, file_name: impl Into<String>) {
        self.never_ready.insert(file_name.into());
    }

    fn known(&self, node: &str) -> Result<(), EngineError> {
        if self.nodes.contains(node) {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(node.to_string()))
        }
    }

    fn should_fail(&self, argv: &[String]) -> bool {
        argv.iter().any(|arg| self.failing.contains(arg))
    }
}

impl Emulator for RecordingEmulator {
    fn add_switch(&mut self, switch: &SwitchDecl) -> Result<(), EngineError> {
        self.nodes.insert(switch.name.clone());
        self.log.push(Event::Declare(Declaration::Switch(switch.clone())));
        Ok(())
    }

    fn add_host(&mut self, host: &HostDecl) -> Result<(), EngineError> {
        self.nodes.insert(host.name.clone());
        self.log.push(Event::Declare(Declaration::Host(host.clone())));
        Ok(())
    }

    fn add_link(&mut self, link: &LinkDecl) -> Result<(), EngineError> {
        self.known(&link.a)?;
        self.known(&link.b)?;
        self.log.push(Event::Declare(Declaration::Link(link.clone())));
        Ok(())
    }

    fn build(&mut self) -> Result<(), EngineError> {
        self.log.push(Event::Build);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.log.push(Event::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.log.push(Event::Stop);
        Ok(())
    }

    fn run(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
        self.known(node)?;
        if argv.is_empty() {
            return Err(EngineError::EmptyCommand(node.to_string()));
        }
        self.log.push(Event::Run { node: node.to_string(), argv: argv.to_vec() });
        if self.should_fail(argv) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: "injected failure".to_string(),
                exit_code: 1,
            });
        }
        Ok(CommandOutput::default())
    }

    fn spawn(&mut self, node: &str, argv: &[String]) -> Result<Box<dyn Background>, EngineError> {
        self.known(node)?;
        if argv.is_empty() {
            return Err(EngineError::EmptyCommand(node.to_string()));
        }
        if self.should_fail(argv) {
            return Err(EngineError::Spawn {
                node: node.to_string(),
                command: argv.join(" "),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "injected failure"),
            });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.log.push(Event::Spawn { node: node.to_string(), argv: argv.to_vec(), id });
        Ok(Box::new(RecordedProcess {
            node: node.to_string(),
            id,
            log: self.log.clone(),
        }))
    }

    fn wait_for_path(&mut self, node: &str, path: &Path, timeout: Duration) -> Result<(), EngineError> {
        self.known(node)?;
        self.log.push(Event::Wait { node: node.to_string(), path: path.to_path_buf() });
        let stalled = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.never_ready.contains(name));
        if stalled {
            return Err(EngineError::NotReady {
                node: node.to_string(),
                path: path.to_path_buf(),
                timeout,
            });
        }
        Ok(())
    }

    fn write_file(&mut self, node: &str, path: &Path, contents: &str) -> Result<(), EngineError> {
        self.known(node)?;
        self.log.push(Event::Write {
            node: node.to_string(),
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        Ok(())
    }
}
