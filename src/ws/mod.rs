//! Streaming transport used by the monitor.
//!
//! A [`Transport`] opens connections; each connection reports what happens
//! to it as [`TransportEvent`]s on its own channel and is driven through a
//! [`TransportHandle`]. No retry logic lives here.

pub mod socket;

pub use socket::WsTransport;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("websocket connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

/// Something that happened on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    /// One text frame.
    Message(String),
    Error(String),
    /// Close code, if the peer sent one.
    Close(Option<u16>),
}

/// Control side of one connection.
pub trait TransportHandle: Send + Sync {
    fn send(&self, text: String) -> Result<(), WsError>;

    /// Idempotent; safe in any state.
    fn close(&self);
}

/// A connection that is being (or has been) opened.
pub struct Connection {
    pub handle: Box<dyn TransportHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub trait Transport: Send + Sync {
    /// Start opening a connection to `url`. Returns immediately; progress
    /// arrives as events.
    fn open(&self, url: &str) -> Connection;
}
