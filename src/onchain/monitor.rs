//! Core transaction monitor.
//!
//! Keeps one streaming connection to a Solana node, subscribes to
//! transactions touching the registered launchpad and AMM programs,
//! classifies each notification and fans the resulting events out to
//! listeners.
//!
//! Features:
//! - Exponential backoff reconnection, bounded by an attempt count
//! - Identical re-subscription after every reconnect
//! - In-order processing: a notification is classified and dispatched
//!   before the next one is read
//! - Observable connection state via a `watch` channel

use crate::config::{Config, ConfigError};
use crate::onchain::backoff::{BackoffPolicy, Reconnect, ReconnectController};
use crate::onchain::classifier::Classifier;
use crate::onchain::decode::{decode_frame, Inbound};
use crate::onchain::dispatcher::{EventDispatcher, Listener, EVENT_TOPIC};
use crate::onchain::registry::ProgramRegistry;
use crate::onchain::subscription::SubscribeRequest;
use crate::onchain::types::ConnectionState;
use crate::ws::{Connection, Transport, TransportEvent, TransportHandle, WsTransport};

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to the monitor. Cheap to clone; all clones drive the same
/// connection and listener registry.
#[derive(Clone)]
pub struct ProtocolMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    transport: Arc<dyn Transport>,
    classifier: Classifier,
    dispatcher: EventDispatcher,
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Control {
    controller: ReconnectController,
    /// Bumped on every connect/disconnect; a session whose generation no
    /// longer matches must not touch shared state.
    generation: u64,
    session: Option<JoinHandle<()>>,
    current: Option<Arc<dyn TransportHandle>>,
}

impl ProtocolMonitor {
    pub fn new(
        url: impl Into<String>,
        registry: ProgramRegistry,
        policy: BackoffPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                transport,
                classifier: Classifier::new(Arc::new(registry)),
                dispatcher: EventDispatcher::new(),
                control: Mutex::new(Control {
                    controller: ReconnectController::new(policy),
                    generation: 0,
                    session: None,
                    current: None,
                }),
                state_tx,
            }),
        }
    }

    /// Build a monitor over the WebSocket transport from config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let url = config.ws_url()?;
        let registry = config.registry()?;
        let transport = Arc::new(WsTransport::new(config.ping_interval()));
        Ok(Self::new(url, registry, config.backoff_policy(), transport))
    }

    /// Start connecting. No-op while a connection is pending, up, or
    /// scheduled. Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut control = self.inner.lock();
        if !control.controller.connect() {
            debug!(state = %control.controller.state(), "connect ignored");
            return;
        }

        control.generation += 1;
        let generation = control.generation;
        if let Some(old) = control.session.take() {
            old.abort();
        }
        self.inner.publish(&control);

        let inner = self.inner.clone();
        control.session = Some(tokio::spawn(async move {
            inner.run_session(generation).await;
        }));
    }

    /// Close the connection and cancel any pending reconnect. Listeners
    /// stay registered, so the same monitor can `connect()` again.
    pub fn disconnect(&self) {
        let mut control = self.inner.lock();
        control.controller.disconnect();
        control.generation += 1;
        if let Some(handle) = control.current.take() {
            handle.close();
        }
        if let Some(session) = control.session.take() {
            session.abort();
        }
        self.inner.publish(&control);
        info!("transaction monitor disconnected");
    }

    pub fn on(&self, topic: &str, listener: Listener) {
        self.inner.dispatcher.on(topic, listener);
    }

    pub fn off(&self, topic: &str, listener: &Listener) -> bool {
        self.inner.dispatcher.off(topic, listener)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().controller.state()
    }

    /// Observe every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn registry(&self) -> &ProgramRegistry {
        self.inner.classifier.registry()
    }
}

impl std::fmt::Debug for ProtocolMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolMonitor")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, control: &Control) {
        let state = control.controller.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Run `f` against the shared state if `generation` is still current.
    fn with_control<R>(&self, generation: u64, f: impl FnOnce(&mut Control) -> R) -> Option<R> {
        let mut control = self.lock();
        if control.generation != generation {
            return None;
        }
        let out = f(&mut control);
        self.publish(&control);
        Some(out)
    }

    /// Connect, stream, and reconnect until disconnected or out of attempts.
    async fn run_session(&self, generation: u64) {
        loop {
            info!(url = %self.url, "connecting to transaction stream");
            let Connection { handle, mut events } = self.transport.open(&self.url);
            let handle: Arc<dyn TransportHandle> = Arc::from(handle);

            let registered = self.with_control(generation, |c| {
                c.current = Some(handle.clone());
            });
            if registered.is_none() {
                handle.close();
                return;
            }

            self.stream(generation, handle.as_ref(), &mut events).await;
            handle.close();

            let next = self.with_control(generation, |c| {
                c.current = None;
                c.controller.lost()
            });

            match next {
                Some(Reconnect::After { attempt, delay }) => {
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transaction stream lost, scheduling reconnect"
                    );
                    tokio::time::sleep(delay).await;
                    let fired = self.with_control(generation, |c| c.controller.timer_elapsed());
                    if fired != Some(true) {
                        return;
                    }
                }
                Some(Reconnect::GiveUp) => {
                    error!(url = %self.url, "reconnect attempts exhausted, monitor failed");
                    return;
                }
                Some(Reconnect::Idle) | None => return,
            }
        }
    }

    /// Pump one connection's events until it closes or errors.
    async fn stream(
        &self,
        generation: u64,
        handle: &dyn TransportHandle,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if self.with_control(generation, |_| ()).is_none() {
                return;
            }

            match event {
                TransportEvent::Open => {
                    // Subscribe before reporting Connected.
                    self.subscribe(handle);
                    self.with_control(generation, |c| c.controller.opened());
                }
                TransportEvent::Message(text) => self.handle_frame(&text),
                TransportEvent::Error(e) => {
                    warn!(error = %e, "transaction stream error");
                    return;
                }
                TransportEvent::Close(code) => {
                    info!(code = ?code, "transaction stream closed");
                    return;
                }
            }
        }
        debug!("transport event channel ended");
    }

    fn subscribe(&self, handle: &dyn TransportHandle) {
        let registry = self.classifier.registry();
        let text = match SubscribeRequest::for_registry(registry).to_text() {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "failed to encode subscription");
                return;
            }
        };
        match handle.send(text) {
            Ok(()) => info!(
                programs = registry.entries().len(),
                "subscribed to program transactions"
            ),
            Err(e) => warn!(error = %e, "failed to send subscription"),
        }
    }

    fn handle_frame(&self, text: &str) {
        match decode_frame(text) {
            Ok(Inbound::Notification(notification)) => {
                match self.classifier.classify(&notification, Utc::now()) {
                    Some(event) => {
                        info!(
                            platform = %event.platform,
                            event_type = %event.event_type,
                            signature = %event.signature,
                            token_mint = ?event.token_mint,
                            pool_address = ?event.pool_address,
                            "protocol event"
                        );
                        self.dispatcher.dispatch(EVENT_TOPIC, &event);
                    }
                    None => {
                        debug!(signature = %notification.signature, "no rule matched");
                    }
                }
            }
            Ok(Inbound::SubscriptionAck(id)) => {
                info!(subscription = id, "subscription confirmed");
            }
            Ok(Inbound::RpcError(message)) => {
                warn!(error = %message, "node returned an error");
            }
            Ok(Inbound::Ignored) => {
                debug!("ignoring non-notification frame");
            }
            Err(e) => {
                warn!(error = %e, "failed to decode frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::dispatcher::listener;
    use crate::onchain::registry::MOONSHOT_PROGRAM;
    use crate::onchain::types::{EventType, ProtocolEvent};
    use crate::ws::WsError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Clone, Copy)]
    enum Script {
        /// Every open fails immediately.
        Refuse,
        /// Every open succeeds immediately.
        Accept,
        /// The test drives events by hand.
        Manual,
    }

    struct MockConn {
        events: mpsc::UnboundedSender<TransportEvent>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    struct MockTransport {
        script: Script,
        /// Handles refuse every send.
        reject_sends: bool,
        opens: Mutex<Vec<Instant>>,
        conns: Mutex<Vec<MockConn>>,
    }

    impl MockTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                reject_sends: false,
                opens: Mutex::new(Vec::new()),
                conns: Mutex::new(Vec::new()),
            })
        }

        fn rejecting_sends(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                reject_sends: true,
                opens: Mutex::new(Vec::new()),
                conns: Mutex::new(Vec::new()),
            })
        }

        fn open_count(&self) -> usize {
            self.opens.lock().unwrap().len()
        }

        fn gaps(&self) -> Vec<Duration> {
            let opens = self.opens.lock().unwrap();
            opens.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn emit(&self, conn: usize, event: TransportEvent) {
            let _ = self.conns.lock().unwrap()[conn].events.send(event);
        }

        fn sent(&self, conn: usize) -> Vec<String> {
            self.conns.lock().unwrap()[conn].sent.lock().unwrap().clone()
        }

        fn closed(&self, conn: usize) -> bool {
            self.conns.lock().unwrap()[conn].closed.load(Ordering::SeqCst)
        }
    }

    struct MockHandle {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        reject: bool,
    }

    impl TransportHandle for MockHandle {
        fn send(&self, text: String) -> Result<(), WsError> {
            if self.reject || self.closed.load(Ordering::SeqCst) {
                return Err(WsError::Closed);
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl Transport for MockTransport {
        fn open(&self, _url: &str) -> Connection {
            let (tx, rx) = mpsc::unbounded_channel();
            match self.script {
                Script::Refuse => {
                    let _ = tx.send(TransportEvent::Error("connection refused".to_string()));
                    let _ = tx.send(TransportEvent::Close(None));
                }
                Script::Accept => {
                    let _ = tx.send(TransportEvent::Open);
                }
                Script::Manual => {}
            }

            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            self.opens.lock().unwrap().push(Instant::now());
            self.conns.lock().unwrap().push(MockConn {
                events: tx,
                sent: sent.clone(),
                closed: closed.clone(),
            });

            Connection {
                handle: Box::new(MockHandle {
                    sent,
                    closed,
                    reject: self.reject_sends,
                }),
                events: rx,
            }
        }
    }

    fn monitor(transport: Arc<MockTransport>) -> ProtocolMonitor {
        ProtocolMonitor::new(
            "wss://node.test",
            ProgramRegistry::mainnet(),
            BackoffPolicy::default(),
            transport,
        )
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn moonshot_launch(signature: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "transactionNotification",
            "params": {
                "subscription": 1,
                "result": {
                    "signature": signature,
                    "transaction": {
                        "meta": {
                            "logMessages": [
                                format!("Program {} invoke [1]", MOONSHOT_PROGRAM),
                                "Program log: Instruction: tokenMint",
                                format!("Program {} success", MOONSHOT_PROGRAM)
                            ]
                        },
                        "transaction": {
                            "message": {
                                "accountKeys": [
                                    { "pubkey": MOONSHOT_PROGRAM },
                                    { "pubkey": "MintMoon111" }
                                ]
                            }
                        }
                    }
                }
            }
        })
        .to_string()
    }

    fn collector(monitor: &ProtocolMonitor) -> Arc<Mutex<Vec<ProtocolEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        monitor.on(
            EVENT_TOPIC,
            listener(move |e| {
                s.lock().unwrap().push(e.clone());
                Ok(())
            }),
        );
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_then_failed() {
        let transport = MockTransport::new(Script::Refuse);
        let m = monitor(transport.clone());

        m.connect();
        tokio::time::sleep(Duration::from_secs(200)).await;

        assert_eq!(transport.open_count(), 6);
        assert_eq!(
            transport.gaps(),
            vec![
                Duration::from_millis(3000),
                Duration::from_millis(6000),
                Duration::from_millis(12000),
                Duration::from_millis(24000),
                Duration::from_millis(48000),
            ]
        );
        assert_eq!(m.state(), ConnectionState::Failed);

        // No further automatic attempts.
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(transport.open_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_timer_and_resets_backoff() {
        let transport = MockTransport::new(Script::Refuse);
        let m = monitor(transport.clone());

        m.connect();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        m.disconnect();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(transport.open_count(), 2);

        m.connect();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.open_count(), 4);
        assert_eq!(transport.gaps()[2], Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_pending() {
        let transport = MockTransport::new(Script::Manual);
        let m = monitor(transport.clone());

        m.connect();
        m.connect();
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(m.state(), ConnectionState::Connecting);

        transport.emit(0, TransportEvent::Open);
        settle().await;
        assert_eq!(m.state(), ConnectionState::Connected);

        m.connect();
        settle().await;
        assert_eq!(transport.open_count(), 1);

        let sent = transport.sent(0);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("transactionSubscribe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_are_classified_and_dispatched() {
        let transport = MockTransport::new(Script::Manual);
        let m = monitor(transport.clone());
        let seen = collector(&m);

        m.connect();
        settle().await;
        transport.emit(0, TransportEvent::Open);
        transport.emit(0, TransportEvent::Message(r#"{"jsonrpc":"2.0","result":99,"id":1}"#.to_string()));
        transport.emit(0, TransportEvent::Message("{not json".to_string()));
        transport.emit(0, TransportEvent::Message(moonshot_launch("sigA")));
        transport.emit(
            0,
            TransportEvent::Message(
                json!({ "params": { "result": {
                    "signature": "sigB",
                    "transaction": {
                        "meta": { "logMessages": ["Program log: nothing to see"] },
                        "transaction": { "message": { "accountKeys": [] } }
                    }
                } } })
                .to_string(),
            ),
        );
        settle().await;

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].platform, "moonshot");
        assert_eq!(events[0].event_type, EventType::NewToken);
        assert_eq!(events[0].signature, "sigA");
        assert_eq!(events[0].token_mint.as_deref(), Some("MintMoon111"));
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscribe_send_keeps_connection() {
        let transport = MockTransport::rejecting_sends(Script::Manual);
        let m = monitor(transport.clone());
        let seen = collector(&m);

        m.connect();
        settle().await;
        transport.emit(0, TransportEvent::Open);
        settle().await;

        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(transport.sent(0).is_empty());
        assert!(!transport.closed(0));

        transport.emit(0, TransportEvent::Message(moonshot_launch("sigAfter")));
        settle().await;

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature, "sigAfter");
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_identically() {
        let transport = MockTransport::new(Script::Accept);
        let m = monitor(transport.clone());

        m.connect();
        settle().await;
        assert_eq!(m.state(), ConnectionState::Connected);

        transport.emit(0, TransportEvent::Close(Some(1006)));
        settle().await;
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert!(transport.closed(0));

        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(transport.sent(0), transport.sent(1));
        assert_eq!(transport.sent(1).len(), 1);

        // A successful open resets the counter: the next drop waits the base delay again.
        transport.emit(1, TransportEvent::Error("reset by peer".to_string()));
        settle().await;
        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 3);
        assert_eq!(transport.gaps()[1], Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_survive_disconnect() {
        let transport = MockTransport::new(Script::Accept);
        let m = monitor(transport.clone());
        let seen = collector(&m);

        m.connect();
        settle().await;
        m.disconnect();
        assert!(transport.closed(0));
        assert_eq!(m.state(), ConnectionState::Disconnected);

        // Frames on the dropped connection go nowhere.
        transport.emit(0, TransportEvent::Message(moonshot_launch("stale")));
        settle().await;
        assert!(seen.lock().unwrap().is_empty());

        m.connect();
        settle().await;
        transport.emit(1, TransportEvent::Message(moonshot_launch("fresh")));
        settle().await;

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_state_sees_transitions() {
        let transport = MockTransport::new(Script::Manual);
        let m = monitor(transport.clone());
        let mut rx = m.watch_state();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        m.connect();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        settle().await;
        transport.emit(0, TransportEvent::Open);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        m.disconnect();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);
    }
}
