//! Client connection lifecycle.
//!
//! A `ClientConnection` is a long-lived channel: accepted once, then kept
//! until the broker shuts down or the peer goes away. Exclusively owned by
//! `RefreshBroker`; no other component holds or mutates one.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use rustls::{ServerConnection, StreamOwned};
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

/// Connection state. Only Open clients participate in broadcast/receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Open,
    Closing,
    Closed,
}

/// Transport under one client channel: plain TCP or the TLS wrap chosen by
/// the certificate probe at broker start.
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl ClientStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => &stream.sock,
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.tcp().set_nonblocking(nonblocking)
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// One accepted browser channel.
pub struct ClientConnection {
    ws: WebSocket<ClientStream>,
    state: ClientState,
}

impl ClientConnection {
    pub fn new(ws: WebSocket<ClientStream>) -> Self {
        Self {
            ws,
            state: ClientState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ClientState::Open
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Send one text frame. A transport failure closes this client only;
    /// the caller keeps iterating the rest.
    pub fn send_text(&mut self, text: &str) -> bool {
        match self.ws.send(Message::Text(text.into())) {
            Ok(()) => true,
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                // Frame is buffered; tungstenite flushes on the next call
                true
            }
            Err(e) => {
                crate::debug!("refresh"; "client send failed: {}", e);
                self.state = ClientState::Closed;
                false
            }
        }
    }

    /// Non-blocking read of one inbound text frame, if any is pending.
    pub fn poll_read(&mut self) -> Option<String> {
        match self.ws.read() {
            Ok(Message::Text(text)) => Some(text.to_string()),
            Ok(Message::Close(_)) => {
                self.state = ClientState::Closed;
                None
            }
            Ok(_) => None,
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(_) => {
                self.state = ClientState::Closed;
                None
            }
        }
    }

    /// Initiate a normal closure. The channel is disposed by the broker
    /// right after, so the close frame is best effort.
    pub fn close(&mut self) {
        if self.state == ClientState::Open {
            self.state = ClientState::Closing;
            let _ = self.ws.close(None);
            let _ = self.ws.flush();
        }
        self.state = ClientState::Closed;
    }
}
