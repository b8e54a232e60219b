use crate::config::FabricConfig;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use std::fs::File;
use std::path::Path;

/// Load and parse configuration from a YAML (or JSON) file
pub fn load_config(config_path: &Path) -> Result<FabricConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;

    let config: FabricConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    info!(
        "Fabric with {} physical nodes and {} virtual nets, controller {}",
        config.physical_nodes.len(),
        config.virtual_nets.len(),
        config.controller
    );

    config.validate()?;

    Ok(config)
}

/// Warn about configuration quirks carried over from older fabric files
pub fn check_config_compatibility(config_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(config_path)?;

    if content.trim_start().starts_with('{') {
        info!("Configuration is in JSON form; it will be read with the YAML parser");
    }

    let per_node_dpid = content.contains("\"dpid\"")
        || content.lines().any(|line| line.trim_start().starts_with("dpid:"));
    if per_node_dpid {
        warn!("Per-node 'dpid' keys are ignored; datapath ids are set under 'management'");
    }

    if content.contains("\"ctrl\"") {
        warn!("Controller name 'ctrl' is not an address; use \"none\" or \"host:port\"");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerSpec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_yaml_config() {
        let yaml = r#"
controller: none
physical-nodes:
  n1: {ip: 10.0.1.1/24, location: fabric}
  n2: {ip: 10.0.1.2/24, location: fabric}
virtual-nets:
  - location: colocated
    virtual-nodes: 2
    node: n1
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.controller, ControllerSpec::None);
        assert_eq!(config.physical_nodes[1].name, "n2");
        check_config_compatibility(temp_file.path()).unwrap();
    }

    #[test]
    fn test_load_json_config() {
        let json = r#"{"controller": "127.0.0.1:6653",
            "physical-nodes": {"c1": {"ip": "10.0.1.1", "location": "fabric"}},
            "virtual-nets": []}"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", json).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.physical_nodes[0].ip.to_string(), "10.0.1.1/8");
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "physical-nodes: {{}}\n").unwrap();
        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/fabric.yaml")).is_err());
    }
}
