// Configuration management for the AODV mesh CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/aodv-mesh/config.json
// - Linux: ~/.config/aodv-mesh/config.json
// - Windows: %APPDATA%\aodv-mesh\config.json

use anyhow::{Context, Result};
use aodv_mesh_core::{NodeAddress, ProtocolConfig, UdpConfig};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node's id; also the last octet of its IP address
    pub address: NodeAddress,

    /// Subnet and ports of the UDP mesh
    pub udp: UdpConfig,

    /// Directory for daily log files (stderr only when unset)
    pub log_dir: Option<String>,

    /// Protocol timers and limits
    pub protocol: ProtocolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: 1,
            udp: UdpConfig::default(),
            log_dir: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("aodv-mesh");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .protocol
                .validate()
                .context("Config file holds invalid protocol settings")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value in memory; the caller saves.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "address" => {
                self.address = value.parse().context("Invalid node address")?;
                if !aodv_mesh_core::constants::is_valid_node_address(self.address) {
                    anyhow::bail!("Node address must be between 0 and 254");
                }
            }
            "subnet" => self.udp.subnet = parse_subnet(value)?,
            "unicast_port" => {
                self.udp.unicast_port = value.parse().context("Invalid port number")?;
            }
            "broadcast_port" => {
                self.udp.broadcast_port = value.parse().context("Invalid port number")?;
            }
            "send_port" => {
                self.udp.send_port = value.parse().context("Invalid port number")?;
            }
            "bind_address" => {
                self.udp.bind_address = value.parse().context("Invalid IPv4 address")?;
            }
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "route_alive_time_ms" => {
                self.protocol.route_alive_time_ms = value.parse().context("Invalid number")?;
            }
            "path_discovery_time_ms" => {
                self.protocol.path_discovery_time_ms = value.parse().context("Invalid number")?;
            }
            "hello_interval_ms" => {
                self.protocol.hello_interval_ms = value.parse().context("Invalid number")?;
            }
            "max_rreq_retries" => {
                self.protocol.max_rreq_retries = value.parse().context("Invalid number")?;
            }
            "max_payload_size" => {
                self.protocol.max_payload_size = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.protocol.validate()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let [a, b, c] = self.udp.subnet;
        vec![
            ("address".to_string(), self.address.to_string()),
            ("subnet".to_string(), format!("{}.{}.{}", a, b, c)),
            ("unicast_port".to_string(), self.udp.unicast_port.to_string()),
            ("broadcast_port".to_string(), self.udp.broadcast_port.to_string()),
            ("send_port".to_string(), self.udp.send_port.to_string()),
            ("bind_address".to_string(), self.udp.bind_address.to_string()),
            (
                "log_dir".to_string(),
                self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string()),
            ),
            (
                "route_alive_time_ms".to_string(),
                self.protocol.route_alive_time_ms.to_string(),
            ),
            (
                "path_discovery_time_ms".to_string(),
                self.protocol.path_discovery_time_ms.to_string(),
            ),
            (
                "hello_interval_ms".to_string(),
                self.protocol.hello_interval_ms.to_string(),
            ),
            (
                "max_rreq_retries".to_string(),
                self.protocol.max_rreq_retries.to_string(),
            ),
            (
                "max_payload_size".to_string(),
                self.protocol.max_payload_size.to_string(),
            ),
        ]
    }
}

/// Parses the first three octets of an IPv4 subnet, e.g. `192.168.2`.
pub fn parse_subnet(value: &str) -> Result<[u8; 3]> {
    let full: Ipv4Addr = format!("{}.0", value.trim_end_matches('.'))
        .parse()
        .with_context(|| format!("Invalid subnet: {}", value))?;
    let [a, b, c, _] = full.octets();
    Ok([a, b, c])
}
