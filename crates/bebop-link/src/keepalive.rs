//! UDP keep-alive link.
//!
//! Owns the receive socket on the controller's d2c port and a background task
//! that splits each inbound datagram into frames. Pings are answered with a
//! pong echoing the ping payload; every other frame is handed to an optional
//! sink untouched.
//!
//! Lifecycle: `Idle -> Running -> Stopped`. A link whose task died on a socket
//! error reports `Failed` and may be started again; a stopped link may not.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};

use bebop_protocol::frame::{self, BufferId, DataType, Frame};
use bebop_protocol::sequence::SequenceRegistry;
use bebop_protocol::MAX_DATAGRAM_SIZE;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::stats::{LinkStats, LinkStatsSnapshot};

/// Floor for the idle receive timeout, so a zero in the config can't spin.
const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Created, no socket bound
    Idle,
    /// Receive task is alive
    Running,
    /// Receive task exited on a socket error; `start` may be called again
    Failed,
    /// Stopped by the caller (or its cancellation token); terminal
    Stopped,
}

/// Where the receive task leaves the error it died on.
type FaultSlot = Arc<Mutex<Option<LinkError>>>;

enum Lifecycle {
    Idle,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
        fault: FaultSlot,
        local_addr: SocketAddr,
    },
    Stopped,
}

pub struct KeepAliveLink {
    local_port: u16,
    receive_timeout: Duration,
    dispatcher: Dispatcher,
    lifecycle: Lifecycle,
}

impl KeepAliveLink {
    /// `remote` is the drone address at the negotiated `c2d_port`.
    pub fn new(remote: SocketAddr, config: &LinkConfig) -> Self {
        Self {
            local_port: config.local_port,
            receive_timeout: config.receive_timeout().max(MIN_RECEIVE_TIMEOUT),
            dispatcher: Dispatcher {
                remote,
                sequences: Arc::new(SequenceRegistry::controller()),
                stats: Arc::new(LinkStats::default()),
                sink: None,
            },
            lifecycle: Lifecycle::Idle,
        }
    }

    /// Route every non-ping frame to `sink`. Frames are dropped when the sink
    /// is full; the receive loop never waits on it.
    pub fn with_frame_sink(mut self, sink: mpsc::Sender<Frame>) -> Self {
        self.dispatcher.sink = Some(sink);
        self
    }

    pub fn remote(&self) -> SocketAddr {
        self.dispatcher.remote
    }

    pub fn sequences(&self) -> &SequenceRegistry {
        &self.dispatcher.sequences
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.dispatcher.stats.snapshot()
    }

    /// Address of the bound receive socket while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.lifecycle {
            Lifecycle::Running { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn state(&self) -> LinkState {
        match &self.lifecycle {
            Lifecycle::Idle => LinkState::Idle,
            Lifecycle::Running {
                cancel,
                handle,
                fault,
                ..
            } if handle.is_finished() => {
                // A clean exit only happens on cancellation
                if has_fault(fault) || !cancel.is_cancelled() {
                    LinkState::Failed
                } else {
                    LinkState::Stopped
                }
            }
            Lifecycle::Running { .. } => LinkState::Running,
            Lifecycle::Stopped => LinkState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LinkState::Running
    }

    /// Bind the receive socket and spawn the receive task.
    ///
    /// Must be called from within a Tokio runtime. Cancelling `cancel` (or
    /// calling [`stop`](Self::stop)) ends the task.
    pub fn start(&mut self, cancel: CancellationToken) -> Result<(), LinkError> {
        match self.state() {
            LinkState::Idle => {}
            LinkState::Failed => info!("Restarting keep-alive link after receive failure"),
            LinkState::Running => return Err(LinkError::AlreadyRunning),
            LinkState::Stopped => return Err(LinkError::Stopped),
        }

        let std_socket = create_receive_socket(self.dispatcher.remote, self.local_port)
            .map_err(|source| LinkError::Bind {
                port: self.local_port,
                source,
            })?;
        let socket = UdpSocket::from_std(std_socket).map_err(|source| LinkError::Bind {
            port: self.local_port,
            source,
        })?;
        let local_addr = socket.local_addr().map_err(|source| LinkError::Bind {
            port: self.local_port,
            source,
        })?;

        info!(
            local = %local_addr,
            remote = %self.dispatcher.remote,
            "Keep-alive link listening"
        );

        if let Lifecycle::Running { fault, .. } = &self.lifecycle {
            if let Some(e) = take_fault(fault) {
                warn!(error = %e, "Discarding failure of previous receive task");
            }
        }

        let cancel = cancel.child_token();
        let (handle, fault) = spawn_recorded(receive_loop(
            socket,
            self.dispatcher.clone(),
            self.receive_timeout,
            cancel.clone(),
        ));

        self.lifecycle = Lifecycle::Running {
            cancel,
            handle,
            fault,
            local_addr,
        };
        Ok(())
    }

    /// Cancel the receive task and wait for it to exit.
    ///
    /// The receive socket is released before this returns. If the task had
    /// already died on a socket error, that error is returned; the link is
    /// `Stopped` either way.
    pub async fn stop(&mut self) -> Result<(), LinkError> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running {
                cancel,
                handle,
                fault,
                ..
            } => {
                cancel.cancel();
                handle.await.map_err(LinkError::TaskFailed)?;
                info!(stats = ?self.stats(), "Keep-alive link stopped");
                match take_fault(&fault) {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            Lifecycle::Idle | Lifecycle::Stopped => Ok(()),
        }
    }

    /// Frame `payload` on `buffer` with the channel's next sequence id and
    /// send it to the drone. Returns the sequence id used.
    pub async fn send(
        &self,
        buffer: BufferId,
        data_type: DataType,
        payload: &[u8],
    ) -> Result<u8, LinkError> {
        if self.state() == LinkState::Stopped {
            return Err(LinkError::Stopped);
        }
        self.dispatcher.send(buffer, data_type, payload.to_vec()).await
    }
}

impl Drop for KeepAliveLink {
    fn drop(&mut self) {
        if let Lifecycle::Running { cancel, .. } = &self.lifecycle {
            cancel.cancel();
        }
    }
}

/// Spawn `task`, keeping its error in the returned slot once it finishes.
fn spawn_recorded<F>(task: F) -> (JoinHandle<()>, FaultSlot)
where
    F: Future<Output = Result<(), LinkError>> + Send + 'static,
{
    let fault = FaultSlot::default();
    let slot = fault.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = task.await {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
        }
    });
    (handle, fault)
}

fn has_fault(fault: &FaultSlot) -> bool {
    fault.lock().unwrap_or_else(PoisonError::into_inner).is_some()
}

fn take_fault(fault: &FaultSlot) -> Option<LinkError> {
    fault.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Receive socket bound to the d2c port on every interface of the remote's family.
fn create_receive_socket(remote: SocketAddr, port: u16) -> io::Result<std::net::UdpSocket> {
    let bind_addr: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, port).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, port).into(),
    };

    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Errors a UDP receive can report without the socket being broken,
/// e.g. ICMP port-unreachable surfacing as a reset.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

async fn receive_loop(
    socket: UdpSocket,
    dispatcher: Dispatcher,
    receive_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), LinkError> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(receive_timeout, socket.recv_from(&mut buf)) => r,
        };

        let (len, from) = match received {
            Err(_) => {
                trace!("No datagram within receive timeout");
                continue;
            }
            Ok(Ok(received)) => received,
            Ok(Err(e)) if is_transient(&e) => {
                debug!(error = %e, "Transient receive error");
                continue;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Receive socket failed, closing link");
                return Err(LinkError::Fatal(e));
            }
        };

        dispatcher.handle_datagram(&buf[..len], from).await;
    }

    debug!("Receive loop cancelled");
    Ok(())
}

#[derive(Clone)]
struct Dispatcher {
    remote: SocketAddr,
    sequences: Arc<SequenceRegistry>,
    stats: Arc<LinkStats>,
    sink: Option<mpsc::Sender<Frame>>,
}

impl Dispatcher {
    async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        LinkStats::bump(&self.stats.datagrams_received);
        if tracing::enabled!(Level::TRACE) {
            trace!(from = %from, bytes = datagram.len(), data = %hex(datagram), "Datagram received");
        }

        for result in frame::decode(datagram) {
            match result {
                Ok(frame) => self.dispatch(frame).await,
                Err(e) => {
                    LinkStats::bump(&self.stats.malformed_datagrams);
                    warn!(from = %from, error = %e, "Malformed datagram, dropping remainder");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, frame: Frame) {
        LinkStats::bump(&self.stats.frames_received);

        if frame.is_ping() {
            self.answer_ping(frame).await;
            return;
        }

        let Some(sink) = &self.sink else {
            return;
        };
        match sink.try_send(frame) {
            Ok(()) => LinkStats::bump(&self.stats.frames_forwarded),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                LinkStats::bump(&self.stats.frames_dropped);
                debug!(buffer_id = frame.buffer_id, "Frame sink full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(frame)) => {
                LinkStats::bump(&self.stats.frames_dropped);
                debug!(buffer_id = frame.buffer_id, "Frame sink closed, dropping frame");
            }
        }
    }

    /// Echo the ping payload back on the pong channel.
    async fn answer_ping(&self, ping: Frame) {
        let ping_seq = ping.sequence_id;
        match self.send(BufferId::Pong, DataType::DataNoAck, ping.payload).await {
            Ok(seq) => {
                LinkStats::bump(&self.stats.pings_answered);
                debug!(ping_seq = ping_seq, pong_seq = seq, "Answered ping");
            }
            Err(e) => {
                LinkStats::bump(&self.stats.send_failures);
                warn!(error = %e, "Failed to send pong");
            }
        }
    }

    async fn send(
        &self,
        buffer: BufferId,
        data_type: DataType,
        payload: Vec<u8>,
    ) -> Result<u8, LinkError> {
        // Reject before taking a sequence id so the channel's numbering has no gap
        if payload.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(frame::FramingError::PayloadTooLarge(payload.len()).into());
        }
        let seq = self.sequences.next(buffer)?;
        let datagram = Frame::new(data_type, buffer, seq, payload).encode()?;

        send_datagram(self.remote, &datagram)
            .await
            .map_err(|source| LinkError::Send {
                dest: self.remote,
                source,
            })?;
        Ok(seq)
    }
}

/// Send over a fresh ephemeral socket, closed when this returns.
async fn send_datagram(dest: SocketAddr, datagram: &[u8]) -> io::Result<()> {
    let bind_addr: SocketAddr = match dest {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.send_to(datagram, dest).await?;
    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(",")
}
