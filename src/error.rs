//! Crate-level error type.
//!
//! Each module reports its own error enum; [`FabricError`] collects them so
//! the orchestrator can propagate any of them with `?`. [`FabricError::kind`]
//! sorts an error into one of three categories:
//!
//! - **Configuration**: bad input. Placement problems only skip their virtual net.
//! - **ProcessSpawn**: a command or daemon could not be started, or never
//!   became ready
//! - **LifecycleViolation**: an operation invoked out of order

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::nested::NestedError;
use crate::registry::RegistryError;
use crate::topology::{PlacementError, TopologyError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ProcessSpawn,
    LifecycleViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::ProcessSpawn => "process spawn error",
            ErrorKind::LifecycleViolation => "lifecycle violation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Nested(#[from] NestedError),

    #[error("node {node}: external port {base}+{ordinal} is out of range")]
    PortOutOfRange { node: String, base: u16, ordinal: usize },
}

impl FabricError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FabricError::Config(_)
            | FabricError::Topology(_)
            | FabricError::Placement(_)
            | FabricError::Registry(_)
            | FabricError::PortOutOfRange { .. } => ErrorKind::Configuration,
            FabricError::Engine(EngineError::UnknownNode(_)) => ErrorKind::Configuration,
            FabricError::Engine(_) => ErrorKind::ProcessSpawn,
            FabricError::Nested(NestedError::Lifecycle { .. }) => ErrorKind::LifecycleViolation,
            FabricError::Nested(_) => ErrorKind::ProcessSpawn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nested::NestedState;
    use crate::process::ProcessType;

    #[test]
    fn test_kinds() {
        let placement = FabricError::from(PlacementError::MissingTarget { spec: 1 });
        assert_eq!(placement.kind(), ErrorKind::Configuration);

        let lifecycle = FabricError::from(NestedError::Lifecycle {
            node: "n1".to_string(),
            operation: "launch the nested network",
            state: NestedState::NestedNetworkRunning,
        });
        assert_eq!(lifecycle.kind(), ErrorKind::LifecycleViolation);

        let spawn = FabricError::from(NestedError::ProcessStart {
            node: "n1".to_string(),
            process: ProcessType::Vswitchd,
            source: EngineError::EmptyCommand("n1".to_string()),
        });
        assert_eq!(spawn.kind(), ErrorKind::ProcessSpawn);
    }

    #[test]
    fn test_message_names_the_node() {
        let err = FabricError::from(NestedError::Lifecycle {
            node: "n2".to_string(),
            operation: "add an endpoint",
            state: NestedState::Uninitialized,
        });
        assert_eq!(err.to_string(), "n2: cannot add an endpoint while uninitialized");
    }
}
