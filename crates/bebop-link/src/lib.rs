//! Controller-side link to a Bebop-class drone over Wi-Fi.
//!
//! A [`HandshakeClient`] negotiates UDP ports over TCP, then a
//! [`KeepAliveLink`] keeps the drone's link watchdog fed by answering its
//! pings, routing every other frame to the caller.

pub mod config;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod stats;

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bebop_protocol::frame::Frame;
use bebop_protocol::handshake::HandshakeResponse;

pub use config::LinkConfig;
pub use error::{ConnectError, HandshakeError, LinkError};
pub use handshake::HandshakeClient;
pub use keepalive::{KeepAliveLink, LinkState};

/// A negotiated, running link.
pub struct Connection {
    pub response: HandshakeResponse,
    pub link: KeepAliveLink,
}

/// Handshake with the drone at `config.drone_address`, then start a
/// keep-alive link aimed at the negotiated command port.
///
/// Non-ping frames go to `sink` when one is given, and are discarded otherwise.
pub async fn connect(
    config: &LinkConfig,
    sink: Option<mpsc::Sender<Frame>>,
    cancel: CancellationToken,
) -> Result<Connection, ConnectError> {
    let response = HandshakeClient::from_config(config).handshake().await?;

    let remote = SocketAddr::new(config.drone_address, response.c2d_port);
    let mut link = KeepAliveLink::new(remote, config);
    if let Some(sink) = sink {
        link = link.with_frame_sink(sink);
    }
    link.start(cancel)?;

    info!(remote = %remote, "Connected to drone");
    Ok(Connection { response, link })
}
