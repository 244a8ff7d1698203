//! tokio-tungstenite transport.
//!
//! Each connection runs on its own task: connect, then multiplex reads,
//! outbound frames and keepalive pings until either side closes.

use crate::ws::{Connection, Transport, TransportEvent, TransportHandle, WsError};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

enum Outbound {
    Text(String),
    Close,
}

/// WebSocket transport with keepalive pings.
#[derive(Debug, Clone)]
pub struct WsTransport {
    ping_interval: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL)
    }
}

impl WsTransport {
    pub fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str) -> Connection {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let url = url.to_string();
        let ping_interval = self.ping_interval;
        tokio::spawn(async move {
            run_socket(url, ping_interval, out_rx, event_tx).await;
        });

        Connection {
            handle: Box::new(WsHandle { out_tx }),
            events: event_rx,
        }
    }
}

struct WsHandle {
    out_tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for WsHandle {
    fn send(&self, text: String) -> Result<(), WsError> {
        self.out_tx
            .send(Outbound::Text(text))
            .map_err(|_| WsError::Closed)
    }

    fn close(&self) {
        let _ = self.out_tx.send(Outbound::Close);
    }
}

async fn run_socket(
    url: String,
    ping_interval: Duration,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    // Closing while still connecting abandons the attempt silently.
    let ws_stream = loop {
        tokio::select! {
            res = &mut connect => match res {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    let e = WsError::from(e);
                    error!(url = %url, error = %e, "websocket connect failed");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    let _ = event_tx.send(TransportEvent::Close(None));
                    return;
                }
            },
            cmd = out_rx.recv() => match cmd {
                Some(Outbound::Text(_)) => {
                    debug!("dropping frame queued before websocket open");
                }
                Some(Outbound::Close) | None => {
                    debug!(url = %url, "websocket closed before open");
                    return;
                }
            },
        }
    };

    info!(url = %url, "websocket connected");
    let _ = event_tx.send(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();
    let mut ping = interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = event_tx.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        let _ = event_tx.send(TransportEvent::Message(text));
                    }
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!(error = %e, "failed to send websocket pong");
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!("websocket pong received");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "websocket received close frame");
                    let code = frame.map(|f| u16::from(f.code));
                    let _ = event_tx.send(TransportEvent::Close(code));
                    return;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    let e = WsError::from(e);
                    error!(error = %e, "websocket read error");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    let _ = event_tx.send(TransportEvent::Close(None));
                    return;
                }
                None => {
                    info!("websocket stream ended");
                    let _ = event_tx.send(TransportEvent::Close(None));
                    return;
                }
            },
            cmd = out_rx.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "failed to send websocket frame");
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = write.close().await {
                        debug!(error = %e, "websocket close handshake failed");
                    }
                    let _ = event_tx.send(TransportEvent::Close(Some(1000)));
                    return;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    warn!(error = %e, "failed to send websocket ping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_open_echo_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(format!("echo:{}", text))).await.unwrap();
            }
            // Drain until the client closes.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let transport = WsTransport::default();
        let Connection { handle, mut events } = transport.open(&format!("ws://{}", addr));

        assert_eq!(next_event(&mut events).await, TransportEvent::Open);
        handle.send("hello".to_string()).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Message("echo:hello".to_string())
        );

        handle.close();
        handle.close();
        assert_eq!(next_event(&mut events).await, TransportEvent::Close(Some(1000)));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_close() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let Connection { handle: _handle, mut events } =
            WsTransport::default().open(&format!("ws://{}", addr));

        assert!(matches!(next_event(&mut events).await, TransportEvent::Error(_)));
        assert_eq!(next_event(&mut events).await, TransportEvent::Close(None));
    }
}
