//! Duplex frame transport over a WebSocket connection.
//!
//! The transport owns the upgrade handshake and presents whole, reassembled
//! frames; fragmentation and ping/pong bookkeeping stay inside the WebSocket
//! layer. A close frame is surfaced once as [`WireFrame::Close`], after which
//! every call fails with [`RpcError::TransportClosed`].

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::RpcError;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One reassembled frame from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// A connected duplex channel, ready to be split into its two halves.
pub struct Transport {
    inner: Ws,
}

impl Transport {
    /// Perform the protocol upgrade handshake against `ws_url` and return
    /// once the channel is ready for bidirectional frames.
    pub async fn connect(ws_url: &str) -> Result<Self, RpcError> {
        let (inner, response) = connect_async(ws_url).await?;
        tracing::debug!(
            target: "rpc.transport",
            status = %response.status(),
            "websocket upgrade complete"
        );
        Ok(Self { inner })
    }

    /// Split into independently owned writer and reader halves. The reader
    /// half belongs to exactly one task; writes from distinct senders must be
    /// serialized in front of the writer half.
    pub fn split(self) -> (TransportWriter, TransportReader) {
        let (sink, stream) = self.inner.split();
        (
            TransportWriter { sink, closed: false },
            TransportReader {
                stream,
                closed: false,
            },
        )
    }
}

pub struct TransportWriter {
    sink: SplitSink<Ws, Message>,
    closed: bool,
}

impl TransportWriter {
    /// Write one text frame atomically.
    pub async fn send_text(&mut self, payload: String) -> Result<(), RpcError> {
        if self.closed {
            return Err(RpcError::TransportClosed);
        }
        self.sink.send(Message::text(payload)).await.map_err(|e| {
            self.closed = true;
            RpcError::from(e)
        })
    }

    /// Write one binary frame atomically.
    pub async fn send_binary(&mut self, payload: Vec<u8>) -> Result<(), RpcError> {
        if self.closed {
            return Err(RpcError::TransportClosed);
        }
        self.sink
            .send(Message::binary(payload))
            .await
            .map_err(|e| {
                self.closed = true;
                RpcError::from(e)
            })
    }

    /// Initiate an orderly close. Further sends fail with `TransportClosed`.
    pub async fn close(&mut self) -> Result<(), RpcError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(RpcError::from)
    }
}

pub struct TransportReader {
    stream: SplitStream<Ws>,
    closed: bool,
}

impl TransportReader {
    /// Block until one frame is available. Control frames are handled
    /// internally; only text, binary, and the terminal close surface here.
    pub async fn recv(&mut self) -> Result<WireFrame, RpcError> {
        if self.closed {
            return Err(RpcError::TransportClosed);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(t))) => return Ok(WireFrame::Text(t.to_string())),
                Some(Ok(Message::Binary(b))) => return Ok(WireFrame::Binary(b.to_vec())),
                Some(Ok(Message::Close(_))) => {
                    self.closed = true;
                    return Ok(WireFrame::Close);
                }
                // Pong replies are queued by the websocket layer itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    self.closed = true;
                    return Err(RpcError::from(e));
                }
                None => {
                    self.closed = true;
                    return Ok(WireFrame::Close);
                }
            }
        }
    }
}
