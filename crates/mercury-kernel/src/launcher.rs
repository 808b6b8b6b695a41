//! Kernel lifecycle collaborator: spawning, attaching, and process control.
//!
//! Session code never touches processes or lifecycle sockets directly; it
//! goes through [`KernelHandle`]. The ZeroMQ implementation here spawns a
//! kernel command with a generated connection file, or attaches to an
//! already-running kernel from its connection info. Kernelspec discovery is
//! out of scope: callers supply the argv.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeromq::{Socket, SocketSend, ZmqMessage};

use mercury_wire::{codec, Channel, ConnectionInfo, Content, Message, ShutdownRequest};

use crate::error::SessionError;
use crate::heartbeat;
use crate::transport::{KernelTransport, ZmqTransport};

/// How to start a kernel: the command line and a human-readable type name.
/// `{connection_file}` in any argv element is replaced with the path of the
/// generated connection file.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub kernel_name: String,
    pub argv: Vec<String>,
}

/// Launches or attaches to kernels.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn spawn(
        &self,
        spec: &KernelSpec,
        cwd: Option<&Path>,
    ) -> Result<Arc<dyn KernelHandle>, SessionError>;

    async fn attach(&self, info: ConnectionInfo) -> Result<Arc<dyn KernelHandle>, SessionError>;
}

/// A live kernel process or remote connection.
#[async_trait]
pub trait KernelHandle: Send + Sync {
    /// Kernel type name, e.g. `python3`.
    fn kernel_name(&self) -> &str;

    /// Open the shell/iopub/stdin channels toward this kernel.
    async fn open_channels(&self) -> Result<Arc<dyn KernelTransport>, SessionError>;

    async fn interrupt(&self) -> Result<(), SessionError>;

    async fn restart(&self) -> Result<(), SessionError>;

    async fn shutdown(&self) -> Result<(), SessionError>;

    /// Heartbeat-driven aliveness. Cheap; callable under locks.
    fn is_alive(&self) -> bool;
}

/// The default launcher: local kernels over ZeroMQ sockets.
#[derive(Debug, Default)]
pub struct ZmqLauncher {
    /// Directory for generated connection files; the system temp dir when
    /// unset.
    pub runtime_dir: Option<PathBuf>,
}

impl ZmqLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection_file_path(&self, kernel_id: &str) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("mercury-kernel-{kernel_id}.json"))
    }
}

#[async_trait]
impl KernelLauncher for ZmqLauncher {
    async fn spawn(
        &self,
        spec: &KernelSpec,
        cwd: Option<&Path>,
    ) -> Result<Arc<dyn KernelHandle>, SessionError> {
        let ports = reserve_ports(5).await?;
        let info = ConnectionInfo {
            transport: "tcp".to_string(),
            ip: "127.0.0.1".to_string(),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            key: Uuid::new_v4().to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: Some(spec.kernel_name.clone()),
        };

        let kernel_id = Uuid::new_v4().to_string();
        let connection_file = self.connection_file_path(&kernel_id);
        let contents = serde_json::to_string_pretty(&info)
            .map_err(|e| SessionError::KernelStart(e.to_string()))?;
        tokio::fs::write(&connection_file, contents)
            .await
            .map_err(|e| SessionError::KernelStart(format!("connection file: {e}")))?;

        let child = spawn_process(spec, cwd, &connection_file)?;
        info!(
            "[launcher] spawned {} kernel {} at {:?}",
            spec.kernel_name, kernel_id, connection_file
        );

        // Give the kernel a moment to bind its sockets before anyone
        // connects.
        tokio::time::sleep(Duration::from_millis(500)).await;

        Ok(Arc::new(ZmqKernelHandle::new(
            info,
            Some(child),
            Some(connection_file),
            Some((spec.clone(), cwd.map(Path::to_path_buf))),
        )))
    }

    async fn attach(&self, info: ConnectionInfo) -> Result<Arc<dyn KernelHandle>, SessionError> {
        Ok(Arc::new(ZmqKernelHandle::new(info, None, None, None)))
    }
}

fn spawn_process(
    spec: &KernelSpec,
    cwd: Option<&Path>,
    connection_file: &Path,
) -> Result<tokio::process::Child, SessionError> {
    if spec.argv.is_empty() {
        return Err(SessionError::KernelStart("empty kernel argv".to_string()));
    }
    let argv: Vec<String> = spec
        .argv
        .iter()
        .map(|arg| arg.replace("{connection_file}", &connection_file.to_string_lossy()))
        .collect();

    let mut command = tokio::process::Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command
        .spawn()
        .map_err(|e| SessionError::KernelStart(format!("spawn {}: {e}", argv[0])))
}

/// Reserve distinct ephemeral TCP ports by binding and immediately releasing
/// listeners. The listeners are held until all ports are gathered so the
/// same port is not handed out twice.
async fn reserve_ports(count: usize) -> Result<Vec<u16>, SessionError> {
    let mut listeners = Vec::with_capacity(count);
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| SessionError::KernelStart(format!("port reservation: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| SessionError::KernelStart(format!("port reservation: {e}")))?
            .port();
        ports.push(port);
        listeners.push(listener);
    }
    drop(listeners);
    Ok(ports)
}

/// Handle to a kernel reached over ZeroMQ, optionally owning its process.
pub struct ZmqKernelHandle {
    info: ConnectionInfo,
    kernel_name: String,
    /// Session id used on the control channel.
    control_session: String,
    child: Mutex<Option<tokio::process::Child>>,
    connection_file: Option<PathBuf>,
    /// Spawn parameters, kept for restart. Absent for attached kernels.
    respawn: Option<(KernelSpec, Option<PathBuf>)>,
    control: Mutex<Option<zeromq::DealerSocket>>,
    alive: Arc<AtomicBool>,
    hb_shutdown: CancellationToken,
}

impl ZmqKernelHandle {
    fn new(
        info: ConnectionInfo,
        child: Option<tokio::process::Child>,
        connection_file: Option<PathBuf>,
        respawn: Option<(KernelSpec, Option<PathBuf>)>,
    ) -> Self {
        let kernel_name = info
            .kernel_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let alive = Arc::new(AtomicBool::new(true));
        let hb_shutdown = CancellationToken::new();
        heartbeat::spawn_monitor(
            info.endpoint(Channel::Heartbeat),
            alive.clone(),
            hb_shutdown.clone(),
        );
        Self {
            info,
            kernel_name,
            control_session: Uuid::new_v4().to_string(),
            child: Mutex::new(child),
            connection_file,
            respawn,
            control: Mutex::new(None),
            alive,
            hb_shutdown,
        }
    }

    /// Fire-and-forget a message on the control channel, connecting lazily.
    async fn send_control(&self, content: Content) -> Result<(), SessionError> {
        let mut guard = self.control.lock().await;
        if guard.is_none() {
            let mut socket = zeromq::DealerSocket::new();
            socket
                .connect(&self.info.endpoint(Channel::Control))
                .await
                .map_err(|_| SessionError::TransportClosed)?;
            *guard = Some(socket);
        }
        let message = Message::new(content, &self.control_session);
        let frames = codec::encode(&message, &self.info.key)?;
        let zmq_message =
            ZmqMessage::try_from(frames).map_err(|_| SessionError::TransportClosed)?;
        guard
            .as_mut()
            .expect("control socket just connected")
            .send(zmq_message)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn kill_child(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.start_kill() {
                warn!("[launcher] failed to kill kernel process: {e}");
            }
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
impl KernelHandle for ZmqKernelHandle {
    fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    async fn open_channels(&self) -> Result<Arc<dyn KernelTransport>, SessionError> {
        let transport = ZmqTransport::connect(&self.info).await?;
        Ok(Arc::new(transport))
    }

    async fn interrupt(&self) -> Result<(), SessionError> {
        info!("[launcher] interrupting kernel {}", self.kernel_name);
        self.send_control(Content::InterruptRequest).await
    }

    async fn restart(&self) -> Result<(), SessionError> {
        let _ = self
            .send_control(Content::ShutdownRequest(ShutdownRequest { restart: true }))
            .await;

        match &self.respawn {
            Some((spec, cwd)) => {
                self.kill_child().await;
                let connection_file = self
                    .connection_file
                    .as_deref()
                    .ok_or_else(|| SessionError::KernelStart("no connection file".to_string()))?;
                let child = spawn_process(spec, cwd.as_deref(), connection_file)?;
                *self.child.lock().await = Some(child);
                info!("[launcher] restarted kernel {}", self.kernel_name);
                Ok(())
            }
            None => {
                // Attached kernels are restarted by whoever manages them.
                warn!(
                    "[launcher] restart of attached kernel {} requested; relying on remote manager",
                    self.kernel_name
                );
                Ok(())
            }
        }
    }

    async fn shutdown(&self) -> Result<(), SessionError> {
        self.hb_shutdown.cancel();
        let _ = self
            .send_control(Content::ShutdownRequest(ShutdownRequest { restart: false }))
            .await;
        self.kill_child().await;
        self.control.lock().await.take();
        if let Some(path) = &self.connection_file {
            let _ = tokio::fs::remove_file(path).await;
        }
        self.alive.store(false, Ordering::SeqCst);
        info!("[launcher] kernel {} shut down", self.kernel_name);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for ZmqKernelHandle {
    fn drop(&mut self) {
        self.hb_shutdown.cancel();
        if let Some(path) = &self.connection_file {
            let _ = std::fs::remove_file(path);
        }
        // The child process itself is kill_on_drop.
    }
}
