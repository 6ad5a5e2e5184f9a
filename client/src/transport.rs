//! Duplex transport to the game server.
//!
//! The session layer never touches sockets. It talks to a [`Transport`],
//! whose operations are fire-and-forget, and hears back through
//! [`SocketEvent`]s delivered on an unbounded channel. Every connection
//! attempt carries the [`ConnectionId`] the session gave it, so events from a
//! socket that has since been replaced can be told apart from the live one.
//! [`WsTransport`] is the WebSocket implementation used in production.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("socket is not connected")]
    NotConnected,

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("websocket protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Fatal errors mean the link is gone and the session must be torn down.
    /// Everything else is reported and the session carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkUnreachable
                | TransportError::ConnectionReset
                | TransportError::NotConnected
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NetworkUnreachable => TransportError::NetworkUnreachable,
            io::ErrorKind::ConnectionReset => TransportError::ConnectionReset,
            io::ErrorKind::NotConnected => TransportError::NotConnected,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => io.into(),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::NotConnected
            }
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Identifies one connection attempt.
pub type ConnectionId = u64;

/// Callbacks from the transport, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed(Option<TransportError>),
    Errored(TransportError),
    Text(String),
    Binary(Vec<u8>),
}

/// A [`TransportEvent`] and the connection attempt it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// A duplex channel to the server. None of these calls block; outcomes
/// arrive later as [`SocketEvent`]s.
pub trait Transport: Send {
    /// Opens a new socket for `connection`, replacing any previous one.
    fn connect(&mut self, connection: ConnectionId);
    /// Closes the current socket, if any.
    fn disconnect(&mut self);
    fn send_text(&mut self, text: String);
    fn send_binary(&mut self, bytes: Vec<u8>);
}

/// WebSocket transport on tokio-tungstenite.
///
/// One spawned task owns the socket for each connection attempt; outbound
/// frames reach it through a channel so `send_*` never waits on the network.
/// A replaced task keeps running until its socket has closed, reporting under
/// its own [`ConnectionId`].
pub struct WsTransport {
    url: String,
    events: mpsc::UnboundedSender<SocketEvent>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self {
            url: url.into(),
            events,
            outbound: None,
            task: None,
        }
    }

    fn queue(&mut self, message: Message) {
        match &self.outbound {
            Some(outbound) => {
                if outbound.send(message).is_err() {
                    debug!("Socket task has exited; dropping outbound frame");
                    self.outbound = None;
                }
            }
            None => debug!("Not connected; dropping outbound frame"),
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, connection: ConnectionId) {
        if self.outbound.take().is_some() {
            debug!("Replacing the previous socket with connection {}", connection);
        }
        // The old task, if still running, sees its outbound channel close and
        // shuts its socket down on its own.
        self.task = None;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        self.task = Some(tokio::spawn(run_socket(
            self.url.clone(),
            connection,
            outbound_rx,
            self.events.clone(),
        )));
    }

    fn disconnect(&mut self) {
        // Dropping the sender makes the socket task send a close frame and
        // exit on its own.
        self.outbound = None;
    }

    fn send_text(&mut self, text: String) {
        self.queue(Message::text(text));
    }

    fn send_binary(&mut self, bytes: Vec<u8>) {
        self.queue(Message::binary(bytes));
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    connection: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send(SocketEvent { connection, event });
    };

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", url, e);
            report(TransportEvent::Closed(Some(e.into())));
            return;
        }
    };

    info!("WebSocket open: {} (connection {})", url, connection);
    report(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();
    let mut close_error = None;

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        let error = TransportError::from(e);
                        let fatal = error.is_fatal();
                        report(TransportEvent::Errored(error));
                        if fatal {
                            break;
                        }
                    }
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },

            frame = read.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => {
                    report(TransportEvent::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Text(text))) => {
                    report(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the socket: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    close_error = Some(TransportError::from(e));
                    break;
                }
                None => break,
            },
        }
    }

    info!("WebSocket closed: {} (connection {})", url, connection);
    report(TransportEvent::Closed(close_error));
}
