//! Channel transport: three independent duplex message streams to a kernel.
//!
//! The trait hides whether the kernel sits behind local ZeroMQ sockets or an
//! in-memory fake. Messages are decoded/encoded at this boundary, so
//! everything above works with typed [`Message`] values. A malformed inbound
//! message is logged and dropped here; it never surfaces as an error to the
//! listener loops.

use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex;
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

use mercury_wire::{codec, Channel, ConnectionInfo, Message};

use crate::error::SessionError;

/// A connected set of shell/iopub/stdin channels.
///
/// `recv` with a timeout returns `Ok(None)` when no message arrived in time,
/// so listener loops can poll their shutdown flag instead of blocking
/// forever. A closed connection surfaces as [`SessionError::TransportClosed`]
/// on every channel. Delivery is FIFO per channel; no ordering holds across
/// channels.
#[async_trait]
pub trait KernelTransport: Send + Sync {
    async fn send(&self, channel: Channel, message: Message) -> Result<(), SessionError>;

    async fn recv(
        &self,
        channel: Channel,
        timeout: Duration,
    ) -> Result<Option<Message>, SessionError>;

    /// Shut down all channels; subsequent calls fail with `TransportClosed`.
    /// Callable from any task.
    async fn close(&self);
}

enum ChannelSocket {
    Dealer(zeromq::DealerSocket),
    Sub(zeromq::SubSocket),
}

impl ChannelSocket {
    async fn send(&mut self, message: ZmqMessage) -> Result<(), zeromq::ZmqError> {
        match self {
            ChannelSocket::Dealer(socket) => socket.send(message).await,
            ChannelSocket::Sub(_) => Err(zeromq::ZmqError::Other("iopub is receive-only")),
        }
    }

    async fn recv(&mut self) -> Result<ZmqMessage, zeromq::ZmqError> {
        match self {
            ChannelSocket::Dealer(socket) => socket.recv().await,
            ChannelSocket::Sub(socket) => socket.recv().await,
        }
    }
}

/// ZeroMQ transport to a local or remote kernel: DEALER sockets for shell
/// and stdin, a SUB socket for iopub.
pub struct ZmqTransport {
    key: String,
    shell: Mutex<Option<ChannelSocket>>,
    iopub: Mutex<Option<ChannelSocket>>,
    stdin: Mutex<Option<ChannelSocket>>,
}

impl ZmqTransport {
    /// Connect all three channels described by a connection file.
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, SessionError> {
        let mut shell = zeromq::DealerSocket::new();
        shell
            .connect(&info.endpoint(Channel::Shell))
            .await
            .map_err(|e| SessionError::KernelStart(format!("shell connect: {e}")))?;

        let mut stdin = zeromq::DealerSocket::new();
        stdin
            .connect(&info.endpoint(Channel::Stdin))
            .await
            .map_err(|e| SessionError::KernelStart(format!("stdin connect: {e}")))?;

        let mut iopub = zeromq::SubSocket::new();
        iopub
            .connect(&info.endpoint(Channel::IoPub))
            .await
            .map_err(|e| SessionError::KernelStart(format!("iopub connect: {e}")))?;
        iopub
            .subscribe("")
            .await
            .map_err(|e| SessionError::KernelStart(format!("iopub subscribe: {e}")))?;

        Ok(Self {
            key: info.key.clone(),
            shell: Mutex::new(Some(ChannelSocket::Dealer(shell))),
            iopub: Mutex::new(Some(ChannelSocket::Sub(iopub))),
            stdin: Mutex::new(Some(ChannelSocket::Dealer(stdin))),
        })
    }

    fn socket(&self, channel: Channel) -> Result<&Mutex<Option<ChannelSocket>>, SessionError> {
        match channel {
            Channel::Shell => Ok(&self.shell),
            Channel::IoPub => Ok(&self.iopub),
            Channel::Stdin => Ok(&self.stdin),
            // Control and heartbeat traffic belongs to the kernel handle,
            // not the session transport.
            Channel::Control | Channel::Heartbeat => Err(SessionError::TransportClosed),
        }
    }
}

#[async_trait]
impl KernelTransport for ZmqTransport {
    async fn send(&self, channel: Channel, message: Message) -> Result<(), SessionError> {
        let frames = codec::encode(&message, &self.key)?;
        let zmq_message =
            ZmqMessage::try_from(frames).map_err(|_| SessionError::TransportClosed)?;

        let mut guard = self.socket(channel)?.lock().await;
        let socket = guard.as_mut().ok_or(SessionError::TransportClosed)?;
        socket
            .send(zmq_message)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn recv(
        &self,
        channel: Channel,
        timeout: Duration,
    ) -> Result<Option<Message>, SessionError> {
        // The socket mutex is held for the whole poll: a concurrent send on
        // the same channel can wait up to `timeout` (one recv_poll interval)
        // for the listener to release it. The zeromq socket types have no
        // separable send/recv halves, so the bound cannot be removed, only
        // shortened via `SessionConfig::recv_poll_ms`.
        let mut guard = self.socket(channel)?.lock().await;
        let socket = guard.as_mut().ok_or(SessionError::TransportClosed)?;

        let received = match tokio::time::timeout(timeout, socket.recv()).await {
            Ok(Ok(zmq_message)) => zmq_message,
            Ok(Err(_)) => return Err(SessionError::TransportClosed),
            Err(_elapsed) => return Ok(None),
        };

        match codec::decode(&received.into_vec(), &self.key) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                // Drop the message, keep the channel alive.
                warn!("[transport] dropping malformed {channel} message: {e}");
                Ok(None)
            }
        }
    }

    async fn close(&self) {
        self.shell.lock().await.take();
        self.iopub.lock().await.take();
        self.stdin.lock().await.take();
    }
}
