//! TCP handshake that negotiates the UDP ports.
//!
//! One request, one response, then the connection is closed. The response is
//! read until a complete JSON document has arrived rather than trusting a
//! single read, bounded by both a size limit and the handshake timeout.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use bebop_protocol::handshake::{HandshakeRequest, HandshakeResponse};

use crate::config::LinkConfig;
use crate::error::HandshakeError;

/// Size of each read from the handshake connection.
const READ_CHUNK: usize = 4096;

/// Upper bound on an accumulated response before giving up.
pub const MAX_HANDSHAKE_RESPONSE: usize = 64 * 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HandshakeClient {
    endpoint: SocketAddr,
    request: HandshakeRequest,
    timeout: Duration,
}

impl HandshakeClient {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            request: HandshakeRequest::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            endpoint: config.handshake_endpoint(),
            request: config.handshake_request(),
            timeout: config.handshake_timeout(),
        }
    }

    pub fn with_request(mut self, request: HandshakeRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Perform the handshake. Never retries; retry policy belongs to the caller.
    pub async fn handshake(&self) -> Result<HandshakeResponse, HandshakeError> {
        info!(endpoint = %self.endpoint, "Starting handshake");

        let response = match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(result) => result?,
            Err(_) => return Err(HandshakeError::Timeout(self.timeout)),
        };

        if !response.is_success() {
            warn!(status = response.status, "Drone rejected handshake");
            return Err(HandshakeError::PeerRejected { response });
        }
        if response.c2d_port == 0 {
            return Err(HandshakeError::MissingCommandPort);
        }

        info!(
            c2d_port = response.c2d_port,
            c2d_update_port = response.c2d_update_port,
            c2d_user_port = response.c2d_user_port,
            qos_mode = response.qos_mode,
            "Handshake complete"
        );
        Ok(response)
    }

    /// Like [`handshake`](Self::handshake), but folds every failure into the
    /// response status: the drone's code when it rejected us, `-1` otherwise.
    pub async fn handshake_or_status(&self) -> HandshakeResponse {
        match self.handshake().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, status = e.status(), "Handshake failed");
                e.into_response()
            }
        }
    }

    async fn exchange(&self) -> Result<HandshakeResponse, HandshakeError> {
        let mut stream = TcpStream::connect(self.endpoint)
            .await
            .map_err(|source| HandshakeError::Connect {
                endpoint: self.endpoint,
                source,
            })?;

        let json = self.request.to_json().map_err(HandshakeError::Encode)?;
        debug!(request = %json, "Sending handshake request");

        stream
            .write_all(json.as_bytes())
            .await
            .map_err(HandshakeError::Write)?;
        stream.flush().await.map_err(HandshakeError::Write)?;

        read_response(&mut stream).await
    }
}

/// Read until the buffered bytes form a complete response document.
async fn read_response<R>(reader: &mut R) -> Result<HandshakeResponse, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await.map_err(HandshakeError::Read)?;
        if n == 0 {
            return Err(HandshakeError::Closed { received: buf.len() });
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(response) = HandshakeResponse::parse(&buf).map_err(HandshakeError::Parse)? {
            debug!(bytes = buf.len(), "Handshake response received");
            return Ok(response);
        }
        if buf.len() >= MAX_HANDSHAKE_RESPONSE {
            return Err(HandshakeError::ResponseTooLarge {
                limit: MAX_HANDSHAKE_RESPONSE,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_across_partial_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            server.write_all(br#"{"status": 0, "#).await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(br#""c2d_port": 54321}"#).await.unwrap();
            server.write_all(&[0]).await.unwrap();
        });

        let response = read_response(&mut client).await.unwrap();
        assert_eq!(response.c2d_port, 54321);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_before_complete_document() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(br#"{"status": 0"#).await.unwrap();
        drop(server);

        let err = read_response(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Closed { received: 12 }));
    }

    #[tokio::test]
    async fn oversized_response_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(READ_CHUNK);
        tokio::spawn(async move {
            let _ = server.write_all(br#"{"status": 0, "pad": ""#).await;
            let filler = vec![b'x'; READ_CHUNK];
            loop {
                if server.write_all(&filler).await.is_err() {
                    break;
                }
            }
        });

        let err = read_response(&mut client).await.unwrap_err();
        assert!(matches!(err, HandshakeError::ResponseTooLarge { .. }));
    }

    #[test]
    fn error_status_mapping() {
        let rejected = HandshakeError::PeerRejected {
            response: HandshakeResponse::failed(3),
        };
        assert_eq!(rejected.status(), 3);
        assert!(rejected.is_rejection());

        let closed = HandshakeError::Closed { received: 0 };
        assert_eq!(closed.status(), -1);
        assert_eq!(closed.into_response().status, -1);
    }
}
