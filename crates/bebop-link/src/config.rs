//! Link configuration.
//!
//! Every field has a default, so an empty (or missing) TOML file yields a
//! controller that talks to a drone on its own access point.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use bebop_protocol::handshake::HandshakeRequest;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_drone_address")]
    pub drone_address: IpAddr,
    #[serde(default = "default_handshake_port")]
    pub handshake_port: u16,
    /// Local UDP port the drone sends to (announced as `d2c_port`)
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long the receive loop waits for a datagram before noting an idle peer
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_controller_type")]
    pub controller_type: String,
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_stream_control_port")]
    pub stream_control_port: u16,
}

fn default_drone_address() -> IpAddr { IpAddr::V4(bebop_protocol::DEFAULT_DRONE_ADDRESS) }
fn default_handshake_port() -> u16 { bebop_protocol::DEFAULT_HANDSHAKE_PORT }
fn default_local_port() -> u16 { bebop_protocol::DEFAULT_D2C_PORT }
fn default_handshake_timeout_ms() -> u64 { 5000 }
fn default_receive_timeout_ms() -> u64 { 500 }
fn default_controller_type() -> String { bebop_protocol::DEFAULT_CONTROLLER_TYPE.to_string() }
fn default_controller_name() -> String { bebop_protocol::DEFAULT_CONTROLLER_NAME.to_string() }
fn default_stream_port() -> u16 { bebop_protocol::DEFAULT_STREAM_PORT }
fn default_stream_control_port() -> u16 { bebop_protocol::DEFAULT_STREAM_CONTROL_PORT }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            drone_address: default_drone_address(),
            handshake_port: default_handshake_port(),
            local_port: default_local_port(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            controller_type: default_controller_type(),
            controller_name: default_controller_name(),
            stream_port: default_stream_port(),
            stream_control_port: default_stream_control_port(),
        }
    }
}

impl LinkConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn handshake_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.drone_address, self.handshake_port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            d2c_port: self.local_port,
            controller_type: self.controller_type.clone(),
            controller_name: self.controller_name.clone(),
            stream_port: self.stream_port,
            stream_control_port: self.stream_control_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = LinkConfig::from_toml("").unwrap();
        assert_eq!(config.handshake_endpoint(), "192.168.42.1:44444".parse::<SocketAddr>().unwrap());
        assert_eq!(config.local_port, 43210);
        assert_eq!(config.receive_timeout(), Duration::from_millis(500));
        assert_eq!(config.handshake_request(), HandshakeRequest::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = LinkConfig::from_toml(
            r#"
            drone_address = "10.0.0.7"
            local_port = 40000
            controller_name = "ground-station"
            handshake_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.drone_address, "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(config.handshake_timeout(), Duration::from_millis(1500));
        let request = config.handshake_request();
        assert_eq!(request.d2c_port, 40000);
        assert_eq!(request.controller_name, "ground-station");
        assert_eq!(request.controller_type, "computer");
    }

    #[test]
    fn invalid_address_is_rejected() {
        assert!(LinkConfig::from_toml(r#"drone_address = "not-an-ip""#).is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = LinkConfig::load(Path::new("/nonexistent/bebop.toml")).unwrap();
        assert_eq!(config.handshake_port, 44444);
    }
}
