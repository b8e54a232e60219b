//! Open vSwitch process configuration for a physical node.
//!
//! Every node gets a private runtime tree so that several vswitchd
//! instances never share sockets, pid files or logs:
//!
//! ```text
//! <runtime-dir>/<node>/
//! |-- etc/conf.db             # ovsdb database
//! |-- run/db.sock             # ovsdb-server socket
//! |-- run/*.pid, run/*.ctl    # pid files and unixctl sockets
//! |-- run/nested.json         # nested topology handed to the nested engine
//! \-- log/*.log
//! ```
//!
//! Commands are prefixed with `env OVS_RUNDIR=... OVS_DBDIR=...` so the OVS
//! tools (and the nested engine, which inherits the environment) resolve
//! the node's private paths by default.

use super::types::ProcessType;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct OvsRuntime {
    root: PathBuf,
}

fn s(path: &Path) -> String {
    path.display().to_string()
}

impl OvsRuntime {
    pub fn new(runtime_dir: &Path, node: &str) -> Self {
        Self { root: runtime_dir.join(node) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn db_file(&self) -> PathBuf {
        self.etc_dir().join("conf.db")
    }

    pub fn db_socket(&self) -> PathBuf {
        self.run_dir().join("db.sock")
    }

    pub fn pidfile(&self, process: ProcessType) -> PathBuf {
        self.run_dir().join(format!("{}.pid", process.as_str()))
    }

    pub fn ctl_socket(&self, process: ProcessType) -> PathBuf {
        self.run_dir().join(format!("{}.ctl", process.as_str()))
    }

    pub fn log_file(&self, process: ProcessType) -> PathBuf {
        self.log_dir().join(format!("{}.log", process.as_str()))
    }

    /// Nested topology file handed to the nested engine
    pub fn descriptor_file(&self) -> PathBuf {
        self.run_dir().join("nested.json")
    }

    /// Touched by the nested engine once its network is up
    pub fn ready_file(&self) -> PathBuf {
        self.run_dir().join("nested.ready")
    }

    /// `env` prefix pointing the OVS tools at the private directories
    pub fn env_prefix(&self) -> Vec<String> {
        vec![
            "env".to_string(),
            format!("OVS_RUNDIR={}", self.run_dir().display()),
            format!("OVS_DBDIR={}", self.etc_dir().display()),
            format!("OVS_SYSCONFDIR={}", self.etc_dir().display()),
            format!("OVS_LOGDIR={}", self.log_dir().display()),
        ]
    }

    fn with_env(&self, argv: Vec<String>) -> Vec<String> {
        let mut full = self.env_prefix();
        full.extend(argv);
        full
    }

    pub fn mkdir_args(&self) -> Vec<String> {
        vec![
            "mkdir".to_string(),
            "-p".to_string(),
            s(&self.etc_dir()),
            s(&self.run_dir()),
            s(&self.log_dir()),
        ]
    }

    /// Remove state left over from a previous run
    pub fn clean_args(&self) -> Vec<String> {
        vec![
            "rm".to_string(),
            "-f".to_string(),
            s(&self.db_file()),
            s(&self.db_socket()),
            s(&self.ready_file()),
        ]
    }

    pub fn create_db_args(&self) -> Vec<String> {
        vec!["ovsdb-tool".to_string(), "create".to_string(), s(&self.db_file())]
    }

    pub fn ovsdb_server_args(&self) -> Vec<String> {
        let p = ProcessType::OvsdbServer;
        self.with_env(vec![
            "ovsdb-server".to_string(),
            s(&self.db_file()),
            "-vfile:emer".to_string(),
            "-vfile:err".to_string(),
            "-vfile:info".to_string(),
            format!("--remote=punix:{}", self.db_socket().display()),
            format!("--log-file={}", self.log_file(p).display()),
            format!("--pidfile={}", self.pidfile(p).display()),
            format!("--unixctl={}", self.ctl_socket(p).display()),
            "--no-chdir".to_string(),
            "--detach".to_string(),
        ])
    }

    pub fn vswitchd_args(&self) -> Vec<String> {
        let p = ProcessType::Vswitchd;
        self.with_env(vec![
            "ovs-vswitchd".to_string(),
            format!("unix:{}", self.db_socket().display()),
            "-vfile:emer".to_string(),
            "-vfile:err".to_string(),
            "-vfile:info".to_string(),
            "--mlockall".to_string(),
            format!("--log-file={}", self.log_file(p).display()),
            format!("--pidfile={}", self.pidfile(p).display()),
            format!("--unixctl={}", self.ctl_socket(p).display()),
            "--no-chdir".to_string(),
            "--detach".to_string(),
        ])
    }

    /// Expose the database on `address:port` in addition to the unix socket
    pub fn add_remote_args(&self, address: &str, port: u16) -> Vec<String> {
        vec![
            "ovs-appctl".to_string(),
            "-t".to_string(),
            s(&self.ctl_socket(ProcessType::OvsdbServer)),
            "ovsdb-server/add-remote".to_string(),
            format!("ptcp:{}:{}", port, address),
        ]
    }

    /// Ask a detached daemon to exit through its control socket
    pub fn stop_args(&self, process: ProcessType) -> Vec<String> {
        let mut argv = vec![
            "ovs-appctl".to_string(),
            "-t".to_string(),
            s(&self.ctl_socket(process)),
            "exit".to_string(),
        ];
        if process == ProcessType::Vswitchd {
            argv.push("--cleanup".to_string());
        }
        argv
    }

    /// Command line of the nested engine for this node
    pub fn nested_engine_args(&self, engine: &Path, controller: &str) -> Vec<String> {
        self.with_env(vec![
            s(engine),
            "nested".to_string(),
            "--descriptor".to_string(),
            s(&self.descriptor_file()),
            "--controller".to_string(),
            controller.to_string(),
        ])
    }
}
