//! Realtime sync client.
//!
//! Keeps one WebSocket open to the push endpoint and fans every parsed
//! `{ "type": ..., ... }` frame out to subscribers. The connection is
//! re-established with capped exponential backoff until [`RealtimeSyncClient::disconnect`]
//! is called. Failures never surface to the owner: malformed frames are
//! logged and dropped, transport errors close the socket and schedule a
//! reconnect. Health is observable through [`RealtimeSyncClient::watch_state`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffConfig;
use crate::config::Config;
use crate::errors::{Result, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down by `disconnect()`; never reconnects.
    Stopped,
}

/// An inbound push event. Only `type` is interpreted here.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub kind: String,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(text)?;
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { kind, payload })
    }

    /// Events that can change the approval queue.
    pub fn touches_queue(&self) -> bool {
        let kind = self.kind.to_ascii_lowercase();
        kind.contains("approval") || kind.contains("workflow")
    }
}

type Handler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

struct Inner {
    url: Option<String>,
    backoff: BackoffConfig,
    stopped: AtomicBool,
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_handler_id: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        if self.stopped.load(Ordering::SeqCst) && state != ConnectionState::Stopped {
            return;
        }
        self.state_tx.send_replace(state);
    }

    fn dispatch(&self, text: &str) {
        let event = match RealtimeEvent::parse(text) {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed realtime frame");
                return;
            }
        };
        // Snapshot so handlers may unsubscribe while being called.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        tracing::debug!(kind = %event.kind, subscribers = handlers.len(), "realtime event");
        for handler in handlers {
            handler(&event);
        }
    }

    /// `None` once stopped. Checked before every reconnect is scheduled.
    fn reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.backoff.delay(attempt))
    }

    fn remove_handler(&self, id: u64) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(hid, _)| *hid != id);
    }
}

/// Removes its handler on [`Subscription::unsubscribe`] or drop.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.remove_handler(self.id);
    }
}

/// Async receiver of realtime events, backed by a handler subscription.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    _subscription: Subscription,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct RealtimeSyncClient {
    inner: Arc<Inner>,
}

impl RealtimeSyncClient {
    pub fn new(url: Option<String>, backoff: BackoffConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url: url.filter(|u| !u.trim().is_empty()),
                backoff,
                stopped: AtomicBool::new(false),
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                state_tx,
                outbound: Mutex::new(None),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.realtime_url.clone(), cfg.reconnect)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.url.is_some()
    }

    /// Start the connection loop. No-op without a URL, after `disconnect()`,
    /// or while a loop is already running.
    pub fn connect(&self) {
        let Some(url) = self.inner.url.clone() else {
            tracing::debug!("realtime url not configured, sync disabled");
            return;
        };
        if self.inner.stopped.load(Ordering::SeqCst) {
            tracing::debug!("realtime client was disconnected, ignoring connect");
            return;
        }

        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run(inner, url)));
    }

    /// Stop permanently. The stop flag is set before the socket is closed, so
    /// the resulting close never schedules a reconnect.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner.set_state(ConnectionState::Stopped);
        tracing::info!("realtime client disconnected");
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            inner: self.inner.clone(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.on_message(move |ev| {
            let _ = tx.send(ev.clone());
        });
        EventReceiver {
            rx,
            _subscription: subscription,
        }
    }

    /// Best-effort send. Returns `false` (and drops the payload) unless the
    /// socket is currently open.
    pub fn send(&self, payload: &Value) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::debug!("realtime not connected, dropping outbound frame");
            return false;
        }
        let text = match serde_json::to_string(payload) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound frame");
                return false;
            }
        };
        let guard = self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Delay the loop would wait before reconnect attempt `attempt`, or `None`
    /// when the client has been stopped.
    pub fn reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        self.inner.reconnect_delay(attempt)
    }

    /// Feed a raw frame through the same path as socket input.
    pub fn inject_frame(&self, text: &str) {
        self.inner.dispatch(text);
    }
}

async fn run(inner: Arc<Inner>, url: String) {
    let mut attempt: u32 = 0;

    loop {
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        inner.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = connect_async(url.as_str()) => res,
        };

        match connected {
            Ok((ws, _resp)) => {
                attempt = 0;
                tracing::info!(url = %url, "realtime connected");
                if let Err(e) = session(&inner, ws).await {
                    tracing::warn!(url = %url, error = %e, "realtime connection error");
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "realtime connect failed");
            }
        }

        inner.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        inner.set_state(ConnectionState::Disconnected);

        attempt = attempt.saturating_add(1);
        let Some(delay) = inner.reconnect_delay(attempt) else {
            break;
        };
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling realtime reconnect");

        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_state(ConnectionState::Stopped);
    tracing::debug!("realtime loop exited");
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Pump one open socket until it closes, errors or the client is stopped.
async fn session(inner: &Inner, ws: WsStream) -> Result<()> {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *inner.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    inner.set_state(ConnectionState::Connected);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            Some(out) = rx.recv() => {
                sink.send(out)
                    .await
                    .map_err(|e| WorkflowError::Transport(e.to_string()))?;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(reason = ?frame, "realtime connection closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = sink.close().await;
                    return Err(WorkflowError::Transport(e.to_string()));
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig { base_ms: 20, max_ms: 100, jitter_ms: 0 }
    }

    async fn wait_state(client: &RealtimeSyncClient, want: ConnectionState) {
        let mut rx = client.watch_state();
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[test]
    fn test_event_parse_and_relevance() {
        let ev = RealtimeEvent::parse(r#"{"type":"workflow.updated","id":3}"#).unwrap();
        assert_eq!(ev.kind, "workflow.updated");
        assert!(ev.touches_queue());
        assert_eq!(ev.payload["id"], 3);

        let ev = RealtimeEvent::parse(r#"{"type":"APPROVAL_CREATED"}"#).unwrap();
        assert!(ev.touches_queue());

        let ev = RealtimeEvent::parse(r#"{"type":"chat.message"}"#).unwrap();
        assert!(!ev.touches_queue());

        let ev = RealtimeEvent::parse("[1,2]").unwrap();
        assert_eq!(ev.kind, "");

        assert!(RealtimeEvent::parse("{not json").is_err());
    }

    #[tokio::test]
    async fn test_handlers_receive_parsed_frames_and_unsubscribe() {
        let client = RealtimeSyncClient::new(None, fast_backoff());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = a.clone();
        let sub_a = client.on_message(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let b2 = b.clone();
        let _sub_b = client.on_message(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        client.inject_frame(r#"{"type":"workflow.updated"}"#);
        client.inject_frame("garbage");
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);

        sub_a.unsubscribe();
        client.inject_frame(r#"{"type":"approval.created"}"#);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_without_url_is_noop() {
        let client = RealtimeSyncClient::new(None, fast_backoff());
        assert!(!client.is_enabled());
        client.connect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.send(&json!({"type": "ping"})));
    }

    #[tokio::test]
    async fn test_disconnect_blocks_reconnect() {
        let client = RealtimeSyncClient::new(Some("ws://127.0.0.1:1".into()), fast_backoff());
        assert!(client.reconnect_delay(1).is_some());
        client.disconnect();
        assert_eq!(client.reconnect_delay(1), None);
        assert_eq!(client.state(), ConnectionState::Stopped);
        client.connect();
        assert_eq!(client.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_live_socket_delivers_events_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (server_rx_tx, mut server_rx) = mpsc::unbounded_channel::<String>();

        let accepted2 = accepted.clone();
        tokio::spawn(async move {
            // first connection: push frames then drop the socket
            let (stream, _) = listener.accept().await.unwrap();
            accepted2.fetch_add(1, Ordering::SeqCst);
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("{broken".into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"workflow.updated","id":7}"#.into()))
                .await
                .unwrap();
            if let Some(Ok(Message::Text(t))) = ws.next().await {
                let _ = server_rx_tx.send(t);
            }
            drop(ws);

            // second connection proves the client reconnected
            let (stream, _) = listener.accept().await.unwrap();
            accepted2.fetch_add(1, Ordering::SeqCst);
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = RealtimeSyncClient::new(Some(format!("ws://{}", addr)), fast_backoff());
        let mut events = client.subscribe();
        client.connect();

        let ev = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
            .expect("receiver closed");
        assert_eq!(ev.kind, "workflow.updated");
        assert_eq!(ev.payload["id"], 7);

        wait_state(&client, ConnectionState::Connected).await;
        assert!(client.send(&json!({"type": "hello"})));
        let echoed = timeout(Duration::from_secs(5), server_rx.recv()).await.unwrap().unwrap();
        assert_eq!(echoed, r#"{"type":"hello"}"#);

        timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client did not reconnect");

        client.disconnect();
        wait_state(&client, ConnectionState::Stopped).await;
        assert!(!client.send(&json!({"type": "late"})));
    }

    #[tokio::test]
    async fn test_no_reconnect_after_disconnect_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let accepted2 = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                accepted2.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        let client = RealtimeSyncClient::new(Some(format!("ws://{}", addr)), fast_backoff());
        client.connect();
        wait_state(&client, ConnectionState::Connected).await;

        client.disconnect();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Stopped);
    }
}
