//! Screencast frame interception on the RPC reader path.
//!
//! `Page.screencastFrame` events never reach the subscriber fanout: the
//! payload is decoded straight into a frame-pool slot and the mandatory ack
//! is queued through the fire-and-forget poster. The reader path stays
//! non-blocking throughout; a full pool drops the frame but still acks so
//! the stream keeps producing.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use core_events::WireEvent;
use core_frame::{FrameInfo, FramePool, PoolError};
use core_rpc::{EventInterceptor, Poster};

pub struct ScreencastSink {
    pool: Arc<FramePool>,
    poster: Poster,
}

impl ScreencastSink {
    pub fn new(pool: Arc<FramePool>, poster: Poster) -> Self {
        Self { pool, poster }
    }

    fn handle_frame(&self, event: &WireEvent) {
        let params = &event.params;
        let Some(session_id) = params.get("sessionId").and_then(Value::as_u64) else {
            tracing::debug!(target: "chrome.screencast", "frame without ack session id");
            return;
        };

        if let Some(data) = params.get("data").and_then(Value::as_str) {
            match BASE64.decode(data) {
                Ok(bytes) => {
                    let info = frame_info(params, session_id as u32);
                    match self.pool.push_frame(&bytes, info) {
                        Ok(generation) => {
                            tracing::trace!(
                                target: "chrome.screencast",
                                generation,
                                len = bytes.len(),
                                "frame stored"
                            );
                        }
                        Err(PoolError::Full) => {
                            tracing::debug!(target: "chrome.screencast", "pool full; frame dropped");
                        }
                        Err(e) => {
                            tracing::debug!(target: "chrome.screencast", error = %e, "frame rejected");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(target: "chrome.screencast", error = %e, "payload decode failed");
                }
            }
        }

        // The stream stalls without the echo, so ack unconditionally.
        if let Err(e) = self.poster.post(
            "Page.screencastFrameAck",
            json!({ "sessionId": session_id }),
            event.session_id.as_deref(),
        ) {
            tracing::debug!(target: "chrome.screencast", error = %e, "ack not queued");
        }
    }
}

impl EventInterceptor for ScreencastSink {
    fn intercept(&self, event: &WireEvent) -> bool {
        if event.method != "Page.screencastFrame" {
            return false;
        }
        self.handle_frame(event);
        true
    }
}

fn frame_info(params: &Value, session_id: u32) -> FrameInfo {
    let metadata = params.get("metadata");
    let get = |key: &str| -> u32 {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_f64)
            .map(|v| v.max(0.0) as u32)
            .unwrap_or(0)
    };
    let browser_ts_ms = metadata
        .and_then(|m| m.get("timestamp"))
        .and_then(Value::as_f64)
        .map(|seconds| (seconds * 1000.0) as u64)
        .unwrap_or(0);
    FrameInfo {
        session_id,
        device_width: get("deviceWidth"),
        device_height: get("deviceHeight"),
        browser_ts_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_rpc::{RpcClient, Transport};
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    fn frame_event(session_id: u32, payload: &[u8]) -> WireEvent {
        WireEvent {
            method: "Page.screencastFrame".into(),
            params: json!({
                "data": BASE64.encode(payload),
                "sessionId": session_id,
                "metadata": {
                    "deviceWidth": 1280.0,
                    "deviceHeight": 720.0,
                    "timestamp": 1_700_000_000.5,
                }
            }),
            session_id: Some("page-session".into()),
        }
    }

    /// Client whose outbound frames are captured by a scripted peer.
    async fn capture_pair() -> (Arc<RpcClient>, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let v: Value = serde_json::from_str(text.as_str()).expect("json");
                    if tx.send(v).is_err() {
                        break;
                    }
                }
            }
        });
        let transport = Transport::connect(&format!("ws://{addr}"))
            .await
            .expect("connect");
        (RpcClient::new(transport), rx)
    }

    #[tokio::test]
    async fn frame_lands_in_pool_and_acks() {
        let (client, mut outbound) = capture_pair().await;
        let pool = FramePool::heap_with_geometry(4, 4096).expect("pool");
        let sink = ScreencastSink::new(Arc::clone(&pool), client.poster());

        let consumed = sink.intercept(&frame_event(42, b"jpeg bytes"));
        assert!(consumed);

        let frame = pool.acquire_latest().expect("frame stored");
        assert_eq!(frame.data(), b"jpeg bytes");
        assert_eq!(frame.session_id, 42);
        assert_eq!(frame.device_width, 1280);
        assert_eq!(frame.device_height, 720);

        let ack = tokio::time::timeout(std::time::Duration::from_secs(2), outbound.recv())
            .await
            .expect("ack within deadline")
            .expect("ack frame");
        assert_eq!(ack["method"], "Page.screencastFrameAck");
        assert_eq!(ack["params"]["sessionId"], 42);
        assert_eq!(ack["sessionId"], "page-session");
    }

    #[tokio::test]
    async fn pool_full_still_acks() {
        let (client, mut outbound) = capture_pair().await;
        let pool = FramePool::heap_with_geometry(2, 64).expect("pool");
        let sink = ScreencastSink::new(Arc::clone(&pool), client.poster());

        // Pin both slots so the next frame has nowhere to go.
        sink.intercept(&frame_event(1, b"a"));
        let _h1 = pool.acquire_latest().expect("frame");
        sink.intercept(&frame_event(2, b"b"));
        let _h2 = pool.acquire_latest().expect("frame");

        sink.intercept(&frame_event(3, b"dropped"));
        let mut acks = 0;
        while let Ok(Some(msg)) =
            tokio::time::timeout(std::time::Duration::from_secs(2), outbound.recv()).await
        {
            if msg["method"] == "Page.screencastFrameAck" {
                acks += 1;
                if msg["params"]["sessionId"] == 3 {
                    break;
                }
            }
        }
        assert_eq!(acks, 3, "every frame acks, dropped or not");
    }

    #[tokio::test]
    async fn non_screencast_events_pass_through() {
        let (client, _outbound) = capture_pair().await;
        let pool = FramePool::heap_with_geometry(2, 64).expect("pool");
        let sink = ScreencastSink::new(pool, client.poster());
        let ev = WireEvent {
            method: "Page.loadEventFired".into(),
            params: json!({}),
            session_id: None,
        };
        assert!(!sink.intercept(&ev));
    }
}
