//! Lifecycle of one physical node's control plane and nested network.
//!
//! ```text
//! Uninitialized -> ControlPlaneRunning -> TopologyPopulated -> NestedNetworkRunning
//!        \________________ terminate() ______________________________/
//!                                   v
//!                              Terminated
//! ```
//!
//! `start_control_plane` is accepted again from `Terminated`, which gives the
//! node a fresh, empty descriptor.

use super::descriptor::NestedDescriptor;
use crate::controller::ControllerSpec;
use crate::engine::{Background, Emulator, EngineError};
use crate::process::{OvsRuntime, ProcessType};
use ipnet::Ipv4Net;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedState {
    Uninitialized,
    ControlPlaneRunning,
    TopologyPopulated,
    NestedNetworkRunning,
    Terminated,
}

impl fmt::Display for NestedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NestedState::Uninitialized => "uninitialized",
            NestedState::ControlPlaneRunning => "control plane running",
            NestedState::TopologyPopulated => "topology populated",
            NestedState::NestedNetworkRunning => "nested network running",
            NestedState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NestedError {
    #[error("{node}: cannot {operation} while {state}")]
    Lifecycle {
        node: String,
        operation: &'static str,
        state: NestedState,
    },

    #[error("{node}: {process} failed to start: {source}")]
    ProcessStart {
        node: String,
        process: ProcessType,
        #[source]
        source: EngineError,
    },

    #[error("{node}: cannot write nested descriptor {}: {source}", path.display())]
    Descriptor {
        node: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Owns one node's ovsdb-server, ovs-vswitchd and nested engine
#[derive(Debug)]
pub struct NestedNetworkManager {
    node: String,
    runtime: OvsRuntime,
    engine: PathBuf,
    dpid: String,
    descriptor: NestedDescriptor,
    state: NestedState,
    nested: Option<Box<dyn Background>>,
}

impl NestedNetworkManager {
    pub fn new(node: &str, ordinal: usize, runtime_dir: &Path, engine: PathBuf) -> Self {
        let runtime = OvsRuntime::new(runtime_dir, node);
        let dpid = NestedDescriptor::dpid_for(ordinal);
        let descriptor = NestedDescriptor::new(node, dpid.clone(), runtime.ready_file());
        Self {
            node: node.to_string(),
            runtime,
            engine,
            dpid,
            descriptor,
            state: NestedState::Uninitialized,
            nested: None,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> NestedState {
        self.state
    }

    pub fn descriptor(&self) -> &NestedDescriptor {
        &self.descriptor
    }

    pub fn runtime(&self) -> &OvsRuntime {
        &self.runtime
    }

    /// True once the control plane is up and endpoints may be added
    pub fn accepts_endpoints(&self) -> bool {
        matches!(
            self.state,
            NestedState::ControlPlaneRunning | NestedState::TopologyPopulated
        )
    }

    fn violation(&self, operation: &'static str) -> NestedError {
        NestedError::Lifecycle {
            node: self.node.clone(),
            operation,
            state: self.state,
        }
    }

    fn start_failed(&self, process: ProcessType) -> impl FnOnce(EngineError) -> NestedError + '_ {
        move |source| NestedError::ProcessStart {
            node: self.node.clone(),
            process,
            source,
        }
    }

    /// Start the node's private ovsdb-server and ovs-vswitchd.
    ///
    /// If any step fails, daemons already launched are stopped again in
    /// reverse order and the state is left unchanged.
    pub fn start_control_plane<E: Emulator + ?Sized>(
        &mut self,
        emulator: &mut E,
        ready_timeout: Duration,
    ) -> Result<(), NestedError> {
        match self.state {
            NestedState::Uninitialized | NestedState::Terminated => {}
            _ => return Err(self.violation("start the control plane")),
        }

        let mut launched = Vec::new();
        if let Err(e) = self.start_daemons(emulator, ready_timeout, &mut launched) {
            for process in launched.into_iter().rev() {
                if let Err(stop) = emulator.check(&self.node, &self.runtime.stop_args(process)) {
                    warn!("{}: could not stop {} after failed start: {}", self.node, process, stop);
                }
            }
            return Err(e);
        }

        self.descriptor = NestedDescriptor::new(&self.node, self.dpid.clone(), self.runtime.ready_file());
        self.state = NestedState::ControlPlaneRunning;
        info!("{}: control plane running", self.node);
        Ok(())
    }

    /// Launch both daemons, recording each one in `launched` as soon as its
    /// detached process exists
    fn start_daemons<E: Emulator + ?Sized>(
        &self,
        emulator: &mut E,
        ready_timeout: Duration,
        launched: &mut Vec<ProcessType>,
    ) -> Result<(), NestedError> {
        let node = self.node.as_str();
        let db = ProcessType::OvsdbServer;
        let switchd = ProcessType::Vswitchd;

        emulator.check(node, &self.runtime.mkdir_args()).map_err(self.start_failed(db))?;
        emulator.check(node, &self.runtime.clean_args()).map_err(self.start_failed(db))?;
        emulator.check(node, &self.runtime.create_db_args()).map_err(self.start_failed(db))?;

        emulator.check(node, &self.runtime.ovsdb_server_args()).map_err(self.start_failed(db))?;
        launched.push(db);
        emulator
            .wait_for_path(node, &self.runtime.db_socket(), ready_timeout)
            .map_err(self.start_failed(db))?;
        debug!("{}: ovsdb-server listening on {}", node, self.runtime.db_socket().display());

        emulator.check(node, &self.runtime.vswitchd_args()).map_err(self.start_failed(switchd))?;
        launched.push(switchd);
        emulator
            .wait_for_path(node, &self.runtime.pidfile(switchd), ready_timeout)
            .map_err(self.start_failed(switchd))?;
        Ok(())
    }

    /// Declare a virtual endpoint; nothing is created until `launch`
    pub fn add_endpoint(&mut self, name: &str, address: Ipv4Net) -> Result<(), NestedError> {
        if !self.accepts_endpoints() {
            return Err(self.violation("add an endpoint"));
        }
        self.descriptor.add_endpoint(name, address);
        self.state = NestedState::TopologyPopulated;
        debug!("{}: declared endpoint {} ({})", self.node, name, address);
        Ok(())
    }

    /// Hand the accumulated descriptor to a nested engine process.
    ///
    /// The descriptor is single-use: a second launch fails until the node is
    /// terminated and its control plane started again.
    pub fn launch<E: Emulator + ?Sized>(
        &mut self,
        emulator: &mut E,
        controller: &ControllerSpec,
        ready_timeout: Duration,
    ) -> Result<(), NestedError> {
        if !self.accepts_endpoints() {
            return Err(self.violation("launch the nested network"));
        }
        let node = self.node.clone();
        let path = self.runtime.descriptor_file();
        let json = self.descriptor.to_json().map_err(|e| NestedError::Descriptor {
            node: node.clone(),
            path: path.clone(),
            source: e.into(),
        })?;
        emulator.write_file(&node, &path, &json)?;

        let argv = self.runtime.nested_engine_args(&self.engine, &controller.to_string());
        let handle = emulator
            .spawn(&node, &argv)
            .map_err(self.start_failed(ProcessType::NestedEngine))?;
        self.nested = Some(handle);
        self.state = NestedState::NestedNetworkRunning;

        emulator
            .wait_for_path(&node, &self.descriptor.ready_file, ready_timeout)
            .map_err(self.start_failed(ProcessType::NestedEngine))?;
        info!(
            "{}: nested network running with {} endpoints",
            node,
            self.descriptor.hosts().count()
        );
        Ok(())
    }

    /// Stop the nested engine, then vswitchd, then ovsdb-server.
    ///
    /// Every step is attempted even if an earlier one fails; the first error
    /// is returned. A no-op when nothing was started or already terminated.
    pub fn terminate<E: Emulator + ?Sized>(&mut self, emulator: &mut E) -> Result<(), NestedError> {
        match self.state {
            NestedState::Uninitialized | NestedState::Terminated => return Ok(()),
            _ => {}
        }
        let mut first_error: Option<NestedError> = None;

        if let Some(handle) = self.nested.take() {
            if let Err(e) = handle.stop() {
                warn!("{}: nested engine did not stop cleanly: {}", self.node, e);
                first_error.get_or_insert(e.into());
            }
        }
        for process in [ProcessType::Vswitchd, ProcessType::OvsdbServer] {
            if let Err(e) = emulator.check(&self.node, &self.runtime.stop_args(process)) {
                warn!("{}: failed to stop {}: {}", self.node, process, e);
                first_error.get_or_insert(e.into());
            }
        }

        self.state = NestedState::Terminated;
        info!("{}: terminated", self.node);
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Event, RecordingEmulator};
    use crate::topology::HostDecl;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn setup() -> (RecordingEmulator, NestedNetworkManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut emu = RecordingEmulator::new();
        emu.add_host(&HostDecl::plain("n1", "10.0.1.1/24".parse().unwrap())).unwrap();
        let manager = NestedNetworkManager::new("n1", 0, dir.path(), PathBuf::from("fabricsim"));
        (emu, manager, dir)
    }

    fn is_lifecycle(err: &NestedError) -> bool {
        matches!(err, NestedError::Lifecycle { .. })
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        assert_eq!(mgr.state(), NestedState::Uninitialized);
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        assert_eq!(mgr.state(), NestedState::ControlPlaneRunning);
        mgr.add_endpoint("n1-1-h1", "10.0.0.1/24".parse().unwrap()).unwrap();
        assert_eq!(mgr.state(), NestedState::TopologyPopulated);
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
        assert_eq!(mgr.state(), NestedState::NestedNetworkRunning);
        let written = log.written(&mgr.runtime().descriptor_file()).unwrap();
        assert_eq!(&NestedDescriptor::from_json(&written).unwrap(), mgr.descriptor());
        assert!(!mgr.runtime().descriptor_file().exists());
        mgr.terminate(&mut emu).unwrap();
        assert_eq!(mgr.state(), NestedState::Terminated);
    }

    #[test]
    fn test_launch_twice_is_violation() {
        let (mut emu, mut mgr, _dir) = setup();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
        let err = mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap_err();
        assert!(is_lifecycle(&err));
    }

    #[test]
    fn test_relaunch_after_restart() {
        let (mut emu, mut mgr, _dir) = setup();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        mgr.add_endpoint("n1-1-h1", "10.0.0.1/24".parse().unwrap()).unwrap();
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
        mgr.terminate(&mut emu).unwrap();
        assert!(is_lifecycle(&mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap_err()));
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        assert!(mgr.descriptor().is_empty());
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
    }

    #[test]
    fn test_add_endpoint_before_start_is_violation() {
        let (_emu, mut mgr, _dir) = setup();
        let err = mgr.add_endpoint("n1-1-h1", "10.0.0.1/24".parse().unwrap()).unwrap_err();
        assert!(is_lifecycle(&err));
        assert!(mgr.descriptor().is_empty());
    }

    #[test]
    fn test_add_endpoint_after_launch_is_violation() {
        let (mut emu, mut mgr, _dir) = setup();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
        let err = mgr.add_endpoint("n1-1-h1", "10.0.0.1/24".parse().unwrap()).unwrap_err();
        assert!(is_lifecycle(&err));
    }

    #[test]
    fn test_start_twice_is_violation() {
        let (mut emu, mut mgr, _dir) = setup();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        assert!(is_lifecycle(&mgr.start_control_plane(&mut emu, TIMEOUT).unwrap_err()));
    }

    #[test]
    fn test_terminate_uninitialized_is_noop() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        mgr.terminate(&mut emu).unwrap();
        assert_eq!(mgr.state(), NestedState::Uninitialized);
        assert!(log.commands_on("n1").is_empty());
    }

    #[test]
    fn test_terminate_is_reentrant() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        mgr.terminate(&mut emu).unwrap();
        let after_first = log.len();
        mgr.terminate(&mut emu).unwrap();
        assert_eq!(log.len(), after_first);
    }

    #[test]
    fn test_terminate_order_is_reverse_of_startup() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        mgr.launch(&mut emu, &ControllerSpec::None, TIMEOUT).unwrap();
        mgr.terminate(&mut emu).unwrap();

        let nested = log.position(|e| matches!(e, Event::Terminate { .. })).unwrap();
        let stop = |process: &'static str| {
            log.position(move |e| match e {
                Event::Run { argv, .. } => {
                    argv.iter().any(|a| a.ends_with(&format!("{}.ctl", process)))
                        && argv.iter().any(|a| a == "exit")
                }
                _ => false,
            })
            .unwrap()
        };
        let vswitchd = stop("ovs-vswitchd");
        let ovsdb = stop("ovsdb-server");
        assert!(nested < vswitchd);
        assert!(vswitchd < ovsdb);
    }

    #[test]
    fn test_vswitchd_failure_is_process_start_error() {
        let (mut emu, mut mgr, _dir) = setup();
        emu.fail_program("ovs-vswitchd");
        let err = mgr.start_control_plane(&mut emu, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            NestedError::ProcessStart { process: ProcessType::Vswitchd, .. }
        ));
        assert_eq!(mgr.state(), NestedState::Uninitialized);
    }

    fn stopped(log: &crate::engine::EventLog, runtime: &OvsRuntime) -> Vec<ProcessType> {
        let commands = log.commands_on("n1");
        [ProcessType::Vswitchd, ProcessType::OvsdbServer]
            .into_iter()
            .filter(|&p| commands.contains(&runtime.stop_args(p)))
            .collect()
    }

    #[test]
    fn test_failed_vswitchd_launch_stops_ovsdb() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        emu.fail_program("ovs-vswitchd");
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap_err();
        assert_eq!(stopped(&log, mgr.runtime()), vec![ProcessType::OvsdbServer]);
    }

    #[test]
    fn test_ovsdb_never_ready_stops_ovsdb() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        emu.never_ready("db.sock");
        let err = mgr.start_control_plane(&mut emu, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            NestedError::ProcessStart {
                process: ProcessType::OvsdbServer,
                source: EngineError::NotReady { .. },
                ..
            }
        ));
        assert_eq!(mgr.state(), NestedState::Uninitialized);
        assert_eq!(stopped(&log, mgr.runtime()), vec![ProcessType::OvsdbServer]);
        let vswitchd = mgr.runtime().vswitchd_args();
        assert!(!log.commands_on("n1").contains(&vswitchd));
    }

    #[test]
    fn test_vswitchd_never_ready_stops_both_in_reverse() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        let pidfile = mgr.runtime().pidfile(ProcessType::Vswitchd);
        emu.never_ready(pidfile.file_name().unwrap().to_str().unwrap());
        let err = mgr.start_control_plane(&mut emu, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            NestedError::ProcessStart { process: ProcessType::Vswitchd, .. }
        ));
        assert_eq!(
            stopped(&log, mgr.runtime()),
            vec![ProcessType::Vswitchd, ProcessType::OvsdbServer]
        );
        let commands = log.commands_on("n1");
        let at = |p| commands.iter().position(|c| *c == mgr.runtime().stop_args(p)).unwrap();
        assert!(at(ProcessType::Vswitchd) < at(ProcessType::OvsdbServer));

        // the node can be started again once the cause is gone
        let mut retry = RecordingEmulator::new();
        retry.add_host(&HostDecl::plain("n1", "10.0.1.1/24".parse().unwrap())).unwrap();
        mgr.start_control_plane(&mut retry, TIMEOUT).unwrap();
        assert_eq!(mgr.state(), NestedState::ControlPlaneRunning);
    }

    #[test]
    fn test_launch_spawns_engine_with_controller() {
        let (mut emu, mut mgr, _dir) = setup();
        let log = emu.log();
        mgr.start_control_plane(&mut emu, TIMEOUT).unwrap();
        let remote = ControllerSpec::Remote { host: "10.0.3.1".to_string(), port: 6633 };
        mgr.launch(&mut emu, &remote, TIMEOUT).unwrap();
        let spawned = log
            .snapshot()
            .into_iter()
            .find_map(|e| match e {
                Event::Spawn { argv, .. } => Some(argv),
                _ => None,
            })
            .unwrap();
        assert!(spawned.contains(&"nested".to_string()));
        assert_eq!(spawned.last().unwrap(), "10.0.3.1:6633");
    }
}
