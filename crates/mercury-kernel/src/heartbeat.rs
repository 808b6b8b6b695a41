//! Heartbeat monitor: periodic ping over the kernel's REQ/REP channel.
//!
//! Drives the aliveness flag consulted by `is_alive()`. A kernel that stops
//! echoing pings for a few intervals is considered dead; the flag flips back
//! if it recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

const PING_INTERVAL: Duration = Duration::from_secs(3);
const PONG_TIMEOUT: Duration = Duration::from_secs(3);
const MISSES_BEFORE_DEAD: u32 = 3;

/// Spawn the monitor task. The returned handle is aborted on shutdown; the
/// task also exits on its own when `shutdown` is cancelled.
pub(crate) fn spawn_monitor(
    endpoint: String,
    alive: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut misses = 0u32;
        let mut socket = connect(&endpoint).await;

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let beating = match socket.as_mut() {
                Some(sock) => ping(sock).await,
                None => false,
            };

            if beating {
                misses = 0;
                alive.store(true, Ordering::SeqCst);
            } else {
                misses += 1;
                debug!("[heartbeat] missed pong {misses}/{MISSES_BEFORE_DEAD} from {endpoint}");
                if misses >= MISSES_BEFORE_DEAD && alive.swap(false, Ordering::SeqCst) {
                    info!("[heartbeat] kernel at {endpoint} stopped beating");
                }
                // A REQ socket that missed its reply is stuck in the wrong
                // state; reconnect before the next ping.
                socket = connect(&endpoint).await;
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(PING_INTERVAL) => {}
            }
        }
    })
}

async fn connect(endpoint: &str) -> Option<zeromq::ReqSocket> {
    let mut socket = zeromq::ReqSocket::new();
    match socket.connect(endpoint).await {
        Ok(()) => Some(socket),
        Err(e) => {
            debug!("[heartbeat] connect to {endpoint} failed: {e}");
            None
        }
    }
}

async fn ping(socket: &mut zeromq::ReqSocket) -> bool {
    if socket.send(ZmqMessage::from("ping")).await.is_err() {
        return false;
    }
    matches!(
        tokio::time::timeout(PONG_TIMEOUT, socket.recv()).await,
        Ok(Ok(_))
    )
}
