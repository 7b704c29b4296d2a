//! Browser refresh broker.
//!
//! Runs an embedded WebSocket endpoint on an ephemeral loopback port.
//! Accepted channels stay open for the whole session so the server can push
//! at any time: `Wait` before a restart, `Reload` once the new process is
//! confirmed running, or structured JSON for richer events.
//!
//! Fan-out is best effort: a send failure on one client closes that client
//! only and never aborts delivery to the rest. The accept path appends to
//! the client set while broadcast/receive iterate it; the set is guarded by
//! one mutex, so a connection accepted mid-broadcast simply catches the next
//! broadcast.

mod client;
mod message;
mod tls;

pub use message::{ClientReport, RELOAD_SIGNAL, RefreshMessage, WAIT_SIGNAL};

use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rustls::{ServerConnection, StreamOwned};
use serde::Serialize;

use crate::config::RefreshConfig;
use client::{ClientConnection, ClientState, ClientStream};

/// Accept thread poll interval while the listener has nothing pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// The session's refresh endpoint.
///
/// One instance per watch session, constructed by the session setup and
/// injected into the loop; shut down on session teardown.
pub struct RefreshBroker {
    clients: Arc<Mutex<Vec<ClientConnection>>>,
    endpoint: String,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RefreshBroker {
    /// Bind an ephemeral loopback port and start accepting clients.
    ///
    /// The advertised scheme follows the development-certificate probe:
    /// `wss://` when one is verified available, `ws://` otherwise. The
    /// advertised host is `localhost` unless `DEVLOOP_WS_HOSTNAME` or the
    /// config overrides it.
    pub fn start(config: &RefreshConfig) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .context("failed to bind refresh endpoint")?;
        let port = listener.local_addr()?.port();

        let tls_config = tls::probe_dev_certificate(tls::PROBE_TIMEOUT);
        let scheme = if tls_config.is_some() { "wss" } else { "ws" };
        let endpoint = format!("{scheme}://{}:{port}", config.effective_hostname());

        listener.set_nonblocking(true)?;

        let clients: Arc<Mutex<Vec<ClientConnection>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_clients = Arc::clone(&clients);
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, accept_clients, tls_config, accept_shutdown);
        });

        crate::log!("refresh"; "listening on {}", endpoint);
        Ok(Self {
            clients,
            endpoint,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address for the child's environment (`DEVLOOP_REFRESH_URL`).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of currently open client channels.
    pub fn client_count(&self) -> usize {
        self.clients.lock().iter().filter(|c| c.is_open()).count()
    }

    /// Deliver one text frame to every open client, isolating per-client
    /// failures. A no-op without error when no clients are connected.
    pub fn broadcast_text(&self, text: &str) {
        let mut clients = self.clients.lock();
        if clients.is_empty() {
            crate::debug!("refresh"; "no clients connected");
            return;
        }

        let count = clients.len();
        for client in clients.iter_mut() {
            if !client.is_open() {
                continue;
            }
            client.send_text(text);
        }
        clients.retain(|c| c.state() != ClientState::Closed);
        crate::debug!("refresh"; "broadcast to {} client(s)", count);
    }

    /// Signal a full page reload.
    pub fn send_reload(&self) {
        self.broadcast_text(RELOAD_SIGNAL);
    }

    /// Signal a building/stale state ahead of a restart.
    pub fn send_wait(&self) {
        self.broadcast_text(WAIT_SIGNAL);
    }

    /// Broadcast an arbitrary structured payload.
    pub fn send_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.broadcast_text(&json),
            Err(e) => crate::warn!("refresh"; "payload serialization failed: {}", e),
        }
    }

    /// Scan clients for pending inbound data and return the first frame.
    ///
    /// Not a multiplexed read; typical sessions have at most one page.
    pub fn receive(&self) -> Option<String> {
        let mut clients = self.clients.lock();
        let mut result = None;
        for client in clients.iter_mut() {
            if !client.is_open() {
                continue;
            }
            if let Some(text) = client.poll_read() {
                result = Some(text);
                break;
            }
        }
        clients.retain(|c| c.state() != ClientState::Closed);
        result
    }

    /// Close every client with a normal-closure frame, stop the accept
    /// thread, and release the listener.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }

        let mut clients = self.clients.lock();
        for client in clients.iter_mut() {
            client.close();
        }
        clients.clear();
        crate::debug!("refresh"; "endpoint closed");
    }
}

/// Long-running accept path: upgrade each inbound request and append it to
/// the client set. Runs for the whole session regardless of loop state.
fn accept_loop(
    listener: TcpListener,
    clients: Arc<Mutex<Vec<ClientConnection>>>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                crate::debug!("refresh"; "client connected: {}", addr);
                match upgrade(stream, tls_config.as_ref()) {
                    Ok(connection) => {
                        let mut clients = clients.lock();
                        clients.push(connection);
                        crate::debug!("refresh"; "clients: {}", clients.len());
                    }
                    Err(e) => crate::debug!("refresh"; "handshake failed: {}", e),
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                crate::warn!("refresh"; "accept error: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Perform the TLS wrap (when configured) and the WebSocket upgrade.
/// Handshakes run blocking; the socket switches to non-blocking afterward
/// for polled reads.
fn upgrade(
    stream: TcpStream,
    tls_config: Option<&Arc<rustls::ServerConfig>>,
) -> Result<ClientConnection> {
    // Accepted sockets do not inherit the listener's non-blocking flag on
    // every platform; pin the handshake to blocking mode explicitly.
    stream.set_nonblocking(false)?;

    let stream = match tls_config {
        Some(config) => {
            let conn = ServerConnection::new(Arc::clone(config))
                .context("TLS session setup failed")?;
            ClientStream::Tls(Box::new(StreamOwned::new(conn, stream)))
        }
        None => ClientStream::Plain(stream),
    };

    let ws = tungstenite::accept(stream)
        .map_err(|e| anyhow::anyhow!("websocket upgrade failed: {e}"))?;
    ws.get_ref().set_nonblocking(true)?;
    Ok(ClientConnection::new(ws))
}

// ============================================================================
// Tests
// ============================================================================

/// Serializes every test that starts a broker: the hostname override test
/// mutates the environment all of them read at start().
#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: Mutex<()> = Mutex::new(());
