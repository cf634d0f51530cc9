//! JSON documents exchanged over TCP to negotiate the UDP ports.
//!
//! The controller sends one `HandshakeRequest`; the drone answers with one
//! `HandshakeResponse`, terminated by a NUL byte. Neither side length-prefixes
//! its document.

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_CONTROLLER_NAME, DEFAULT_CONTROLLER_TYPE, DEFAULT_D2C_PORT, DEFAULT_STREAM_CONTROL_PORT,
    DEFAULT_STREAM_PORT,
};

/// Status reported by the drone when it accepts the controller.
pub const STATUS_SUCCESS: i32 = 0;

/// Status used locally when no usable response was obtained.
pub const STATUS_LOCAL_FAILURE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// UDP port the controller listens on for drone-to-controller data
    pub d2c_port: u16,
    pub controller_type: String,
    pub controller_name: String,
    #[serde(rename = "arstream2_client_stream_port")]
    pub stream_port: u16,
    #[serde(rename = "arstream2_client_control_port")]
    pub stream_control_port: u16,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            d2c_port: DEFAULT_D2C_PORT,
            controller_type: DEFAULT_CONTROLLER_TYPE.to_string(),
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            stream_port: DEFAULT_STREAM_PORT,
            stream_control_port: DEFAULT_STREAM_CONTROL_PORT,
        }
    }
}

impl HandshakeRequest {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The drone's answer. Only `status` is required; a rejecting drone may omit
/// the port fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub status: i32,
    /// Port the controller sends commands (and pongs) to
    #[serde(default)]
    pub c2d_port: u16,
    #[serde(default)]
    pub c2d_update_port: u16,
    #[serde(default)]
    pub c2d_user_port: u16,
    #[serde(default)]
    pub qos_mode: i32,
    #[serde(default, rename = "arstream2_server_stream_port")]
    pub stream_port: u16,
    #[serde(default, rename = "arstream2_server_control_port")]
    pub stream_control_port: u16,
}

impl HandshakeResponse {
    /// A response carrying only a status, every port zeroed.
    pub fn failed(status: i32) -> Self {
        Self {
            status,
            c2d_port: 0,
            c2d_update_port: 0,
            c2d_user_port: 0,
            qos_mode: 0,
            stream_port: 0,
            stream_control_port: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Parse an accumulated response buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds only a prefix of the
    /// document, so callers can keep reading.
    pub fn parse(data: &[u8]) -> serde_json::Result<Option<Self>> {
        let trimmed = trim_trailing(data);
        if trimmed.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        match serde_json::from_slice::<Self>(trimmed) {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.is_eof() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Strip the NUL terminator and any trailing whitespace.
fn trim_trailing(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &data[..end]
}
