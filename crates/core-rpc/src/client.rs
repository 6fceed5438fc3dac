//! Request/response correlation and event fanout over a [`Transport`].
//!
//! One reader task drains the transport and classifies every inbound frame:
//! frames with an `id` resolve the matching pending call, frames with only a
//! `method` are offered to the installed interceptor and then fanned out to
//! subscribers. The reader never blocks on a slow subscriber; fanout uses a
//! bounded broadcast queue that drops the oldest event and surfaces the lag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use core_events::{EVENTS_DROPPED, RPC_TIMEOUTS, WireEvent};

use crate::error::RpcError;
use crate::transport::{Transport, TransportWriter, WireFrame};

/// Default per-call deadline. Cancels only the local wait; the remote
/// operation keeps running and its late response is retired on arrival.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the subscriber fanout queue.
const EVENT_QUEUE_CAP: usize = 256;

/// Pending-call count at which the outbound path reports saturation.
const SATURATION_THRESHOLD: usize = 32;

type PendingMap = Mutex<HashMap<u32, oneshot::Sender<Result<Value, RpcError>>>>;

enum Outbound {
    Frame(String),
    Close,
}

/// Cheap handle for fire-and-forget sends from contexts that must never
/// suspend (screencast acks issued on the reader path).
#[derive(Clone)]
pub struct Poster {
    next_id: Arc<AtomicU32>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Poster {
    /// Queue a command without registering a waiter. The eventual response
    /// carries an id with no pending entry and is retired by the reader.
    pub fn post(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<(), RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(id, method, params, session_id);
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| RpcError::TransportClosed)
    }
}

/// Hook inspecting unsolicited events on the reader path before fanout.
///
/// Installed once at session construction (no mutable module state). Must
/// not block; heavy consumers hand work to their own storage and return.
pub trait EventInterceptor: Send + Sync + 'static {
    /// Return `true` to consume the event (no subscriber fanout).
    fn intercept(&self, event: &WireEvent) -> bool;
}

/// Bounded event subscription filtered by method-name prefixes.
pub struct EventStream {
    rx: broadcast::Receiver<WireEvent>,
    prefixes: Vec<String>,
}

impl EventStream {
    /// Next matching event, or `None` once the session ends. A lagged
    /// receiver records the dropped count and keeps going.
    pub async fn next(&mut self) -> Option<WireEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => {
                    if self.matches(&ev.method) {
                        return Some(ev);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    EVENTS_DROPPED.fetch_add(n, Ordering::Relaxed);
                    tracing::warn!(target: "rpc.events", dropped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, method: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| method.starts_with(p.as_str()))
    }
}

/// JSON-RPC client over a duplex frame transport.
pub struct RpcClient {
    next_id: Arc<AtomicU32>,
    pending: Arc<PendingMap>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events_tx: broadcast::Sender<WireEvent>,
    interceptor: Arc<OnceLock<Box<dyn EventInterceptor>>>,
    closing: Arc<AtomicBool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Take ownership of the transport and spawn the reader and writer tasks.
    pub fn new(transport: Transport) -> Arc<Self> {
        let (writer, reader) = transport.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_QUEUE_CAP);

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let interceptor: Arc<OnceLock<Box<dyn EventInterceptor>>> = Arc::new(OnceLock::new());
        let closing = Arc::new(AtomicBool::new(false));

        let writer_task = tokio::spawn(writer_loop(writer, outbound_rx));
        let reader_task = tokio::spawn(reader_loop(
            reader,
            Arc::clone(&pending),
            events_tx.clone(),
            Arc::clone(&interceptor),
            Arc::clone(&closing),
        ));

        Arc::new(Self {
            next_id: Arc::new(AtomicU32::new(1)),
            pending,
            outbound: outbound_tx,
            events_tx,
            interceptor,
            closing,
            reader_task: Mutex::new(Some(reader_task)),
            writer_task: Mutex::new(Some(writer_task)),
        })
    }

    /// Install the reader-path interceptor. Returns `Err` if one is already
    /// installed; installation happens exactly once at session construction.
    pub fn install_interceptor(&self, hook: Box<dyn EventInterceptor>) -> Result<(), RpcError> {
        self.interceptor
            .set(hook)
            .map_err(|_| RpcError::Parse("interceptor already installed".into()))
    }

    /// Fire-and-forget handle sharing this client's id space.
    pub fn poster(&self) -> Poster {
        Poster {
            next_id: Arc::clone(&self.next_id),
            outbound: self.outbound.clone(),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_inner(None, method, params, DEFAULT_CALL_TIMEOUT)
            .await
    }

    pub async fn call_session(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.call_inner(Some(session_id), method, params, DEFAULT_CALL_TIMEOUT)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.call_inner(session_id, method, params, timeout).await
    }

    /// Subscribe to unsolicited events whose method starts with any of
    /// `prefixes` (empty = all events).
    pub fn subscribe(&self, prefixes: &[&str]) -> EventStream {
        EventStream {
            rx: self.events_tx.subscribe(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Number of calls awaiting a response; the event bus consults this to
    /// decide whether to skip coalesced deliveries.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }

    pub fn is_saturated(&self) -> bool {
        self.pending_calls() >= SATURATION_THRESHOLD
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Orderly shutdown: outstanding waiters fail with `SessionClosing`, the
    /// transport is closed, and both tasks are awaited.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.outbound.send(Outbound::Close);
        let reader = self.reader_task.lock().expect("task slot poisoned").take();
        let writer = self.writer_task.lock().expect("task slot poisoned").take();
        for task in [reader, writer].into_iter().flatten() {
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                tracing::warn!(target: "rpc.client", "io task did not stop in time");
            }
        }
    }

    async fn call_inner(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(RpcError::SessionClosing);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table poisoned")
            .insert(id, tx);

        let frame = encode_request(id, method, params, session_id);
        tracing::trace!(target: "rpc.client", id, method, "send");
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            self.pending
                .lock()
                .expect("pending table poisoned")
                .remove(&id);
            return Err(RpcError::TransportClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Waiter slot dropped without a value: the reader tore down.
            Ok(Err(_)) => Err(if self.is_closing() {
                RpcError::SessionClosing
            } else {
                RpcError::TransportClosed
            }),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&id);
                RPC_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: "rpc.client", id, method, ?timeout, "call timed out");
                Err(RpcError::Timeout(timeout))
            }
        }
    }
}

fn encode_request(id: u32, method: &str, params: Value, session_id: Option<&str>) -> String {
    let mut frame = json!({ "id": id, "method": method, "params": params });
    if let Some(sid) = session_id {
        frame["sessionId"] = Value::String(sid.to_string());
    }
    frame.to_string()
}

async fn writer_loop(mut writer: TransportWriter, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let result = match out {
            Outbound::Frame(frame) => writer.send_text(frame).await,
            Outbound::Close => {
                let _ = writer.close().await;
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(target: "rpc.client", error = %e, "writer stopped");
            break;
        }
    }
}

async fn reader_loop(
    mut reader: crate::transport::TransportReader,
    pending: Arc<PendingMap>,
    events_tx: broadcast::Sender<WireEvent>,
    interceptor: Arc<OnceLock<Box<dyn EventInterceptor>>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match reader.recv().await {
            Ok(WireFrame::Text(text)) => {
                classify_frame(&text, &pending, &events_tx, &interceptor);
            }
            Ok(WireFrame::Binary(b)) => {
                tracing::trace!(target: "rpc.client", len = b.len(), "binary frame ignored");
            }
            Ok(WireFrame::Close) => break,
            Err(e) => {
                tracing::debug!(target: "rpc.client", error = %e, "reader stopped");
                break;
            }
        }
    }

    // Fail every outstanding waiter with one terminal error.
    let orderly = closing.load(Ordering::Acquire);
    let mut table = pending.lock().expect("pending table poisoned");
    let n = table.len();
    for (_, waiter) in table.drain() {
        let err = if orderly {
            RpcError::SessionClosing
        } else {
            RpcError::TransportClosed
        };
        let _ = waiter.send(Err(err));
    }
    if n > 0 {
        tracing::debug!(target: "rpc.client", failed_waiters = n, orderly, "session ended");
    }
}

fn classify_frame(
    text: &str,
    pending: &PendingMap,
    events_tx: &broadcast::Sender<WireEvent>,
    interceptor: &OnceLock<Box<dyn EventInterceptor>>,
) {
    let mut value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(target: "rpc.client", error = %e, len = text.len(), "unparseable frame dropped");
            return;
        }
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = if let Some(err) = value.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Err(RpcError::Rpc { code, message })
        } else {
            Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null))
        };
        let waiter = pending
            .lock()
            .expect("pending table poisoned")
            .remove(&(id as u32));
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            // Local wait already cancelled; the id is retired here.
            None => {
                tracing::trace!(target: "rpc.client", id, "late response retired")
            }
        }
        return;
    }

    let Some(method) = value.get("method").and_then(Value::as_str).map(String::from) else {
        tracing::debug!(target: "rpc.client", "frame without id or method dropped");
        return;
    };
    let session_id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(String::from);
    let params = value.get_mut("params").map(Value::take).unwrap_or(Value::Null);
    let event = WireEvent {
        method,
        params,
        session_id,
    };

    if let Some(hook) = interceptor.get()
        && hook.intercept(&event)
    {
        return;
    }
    // A full queue overwrites the oldest entry; receivers observe the lag.
    let _ = events_tx.send(event);
}
