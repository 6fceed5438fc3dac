use std::time::Duration;

/// Failure kinds surfaced by the browser control channel.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The browser disconnected; every outstanding waiter fails with this.
    #[error("transport closed")]
    TransportClosed,
    /// Orderly viewer shutdown; outstanding waiters fail with this instead
    /// of `TransportClosed` so callers can tell teardown from a crash.
    #[error("session closing")]
    SessionClosing,
    /// The local wait expired. The remote operation is not cancelled; a late
    /// response retires the id when it eventually arrives.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The browser reported a domain-level failure.
    #[error("browser error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// A protocol frame could not be decoded. Logged and dropped by the
    /// reader; surfaced only from explicit decode entry points.
    #[error("unparseable protocol frame: {0}")]
    Parse(String),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl RpcError {
    /// True for errors that end the session as a whole.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RpcError::TransportClosed | RpcError::SessionClosing)
    }
}
