use std::net::SocketAddr;
use std::path::PathBuf;

use common_config::{env_override, ServiceConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutotestConfig {
    pub bind_address: String,
    pub port: u16,
    /// YAML document declaring the static authentication sources.
    pub sources_path: PathBuf,
}

impl Default for AutotestConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            sources_path: PathBuf::from("configs/authsources.yaml"),
        }
    }
}

impl AutotestConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

impl ServiceConfig for AutotestConfig {
    const PREFIX: &'static str = "AUTOTEST_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        if let Some(address) = env_override(prefix, "BIND_ADDRESS") {
            self.bind_address = address;
        }
        if let Some(port) = env_override(prefix, "PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(error) => {
                    tracing::warn!(%port, %error, "invalid port override, keeping configured port")
                }
            }
        }
        if let Some(path) = env_override(prefix, "SOURCES_PATH") {
            self.sources_path = PathBuf::from(path);
        }
    }
}
