//! SDN controller selection.
//!
//! A switch either runs standalone with a single "forward normally" flow or
//! is attached to a remote OpenFlow controller. The same specification is
//! applied to the fabric switch and passed through to every nested network.

use crate::engine::{Emulator, EngineError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Controller attachment requested by the configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ControllerSpec {
    /// No controller: switches forward with `actions=normal`
    #[default]
    None,
    /// Remote OpenFlow controller reachable over TCP
    Remote { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid controller '{0}': expected \"none\" or \"host:port\"")]
pub struct ControllerParseError(String);

impl ControllerSpec {
    /// OVS controller target string, e.g. `tcp:10.0.3.1:6633`
    pub fn ovs_target(&self) -> Option<String> {
        match self {
            ControllerSpec::None => None,
            ControllerSpec::Remote { host, port } => Some(format!("tcp:{}:{}", host, port)),
        }
    }
}

impl FromStr for ControllerSpec {
    type Err = ControllerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(ControllerSpec::None);
        }
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| ControllerParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(ControllerParseError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ControllerParseError(s.to_string()))?;
        Ok(ControllerSpec::Remote { host: host.to_string(), port })
    }
}

impl fmt::Display for ControllerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerSpec::None => write!(f, "none"),
            ControllerSpec::Remote { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

impl TryFrom<String> for ControllerSpec {
    type Error = ControllerParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ControllerSpec> for String {
    fn from(value: ControllerSpec) -> Self {
        value.to_string()
    }
}

/// Put `switch` into the forwarding mode selected by `controller`.
///
/// Standalone mode installs a single `actions=normal` flow so traffic moves
/// without any controller; remote mode points the bridge at the controller.
pub fn configure_forwarding<E: Emulator + ?Sized>(
    emulator: &mut E,
    switch: &str,
    controller: &ControllerSpec,
) -> Result<(), EngineError> {
    let argv: Vec<String> = match controller.ovs_target() {
        None => vec!["ovs-ofctl".into(), "add-flow".into(), switch.into(), "actions=normal".into()],
        Some(target) => vec!["ovs-vsctl".into(), "set-controller".into(), switch.into(), target],
    };
    debug!("Configuring forwarding on {} ({})", switch, controller);
    emulator.check(switch, &argv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_none_case_insensitive() {
        assert_eq!("none".parse::<ControllerSpec>().unwrap(), ControllerSpec::None);
        assert_eq!("None".parse::<ControllerSpec>().unwrap(), ControllerSpec::None);
    }

    #[test]
    fn test_parse_remote() {
        let spec: ControllerSpec = "10.0.3.1:6633".parse().unwrap();
        assert_eq!(
            spec,
            ControllerSpec::Remote { host: "10.0.3.1".to_string(), port: 6633 }
        );
        assert_eq!(spec.ovs_target().as_deref(), Some("tcp:10.0.3.1:6633"));
        assert_eq!(spec.to_string(), "10.0.3.1:6633");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("onos".parse::<ControllerSpec>().is_err());
        assert!(":6633".parse::<ControllerSpec>().is_err());
        assert!("10.0.3.1:http".parse::<ControllerSpec>().is_err());
        assert!("10.0.3.1:70000".parse::<ControllerSpec>().is_err());
    }
}
