use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "atalkd.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration: a list of ports, each optionally seeded with a
/// network and zone.
///
/// ```toml
/// [[port]]
/// kind = "ltoudp"
/// network = 1
/// zone = "Machine Room"
///
/// [[port]]
/// kind = "tashtalk"
/// device = "/dev/ttyUSB0"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Tracing filter, overridden by `--verbose`.
    pub log_filter: Option<String>,

    #[serde(default, rename = "port")]
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PortEntry {
    Ltoudp {
        /// Local interface address to join the multicast group on.
        #[serde(default = "unspecified")]
        interface: Ipv4Addr,
        network: Option<u16>,
        zone: Option<String>,
    },
    Tashtalk {
        /// Serial device the packet modem sits on, already configured for
        /// the right line speed.
        device: PathBuf,
        network: Option<u16>,
        zone: Option<String>,
    },
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Config {
    pub fn read(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
