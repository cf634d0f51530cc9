use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use bebop_protocol::frame::FramingError;
use bebop_protocol::handshake::{HandshakeResponse, STATUS_LOCAL_FAILURE};
use bebop_protocol::sequence::SequenceError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything that can go wrong while negotiating ports over TCP.
///
/// `PeerRejected` is the only variant where the drone actually answered;
/// every other variant means no usable response was obtained.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: SocketAddr,
        source: io::Error,
    },

    #[error("failed to encode handshake request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to send handshake request: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read handshake response: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed after {received} bytes without a complete response")]
    Closed { received: usize },

    #[error("handshake response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("malformed handshake response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("handshake response accepted the controller but carried no c2d_port")]
    MissingCommandPort,

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("drone rejected handshake with status {}", .response.status)]
    PeerRejected { response: HandshakeResponse },
}

impl HandshakeError {
    /// Status a caller branching on `status != 0` should see.
    pub fn status(&self) -> i32 {
        match self {
            Self::PeerRejected { response } => response.status,
            _ => STATUS_LOCAL_FAILURE,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::PeerRejected { .. })
    }

    pub fn into_response(self) -> HandshakeResponse {
        match self {
            Self::PeerRejected { response } => response,
            _ => HandshakeResponse::failed(STATUS_LOCAL_FAILURE),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to bind UDP port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("link is already running")]
    AlreadyRunning,

    #[error("link has been stopped; create a new link to reconnect")]
    Stopped,

    #[error("receive socket failed: {0}")]
    Fatal(#[source] io::Error),

    #[error("receive task ended abnormally: {0}")]
    TaskFailed(#[source] tokio::task::JoinError),

    #[error("failed to send to {dest}: {source}")]
    Send { dest: SocketAddr, source: io::Error },

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Link(#[from] LinkError),
}
