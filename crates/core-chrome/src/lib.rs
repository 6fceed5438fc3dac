//! Headless browser integration: process launch, domain-call session
//! wrappers, and the screencast frame sink.

mod launch;
mod screencast;
mod session;

pub use launch::{ChromeProcess, LaunchOptions, find_binary};
pub use screencast::ScreencastSink;
pub use session::{BrowserSession, HistoryState, KeyTransition, ScreencastParams, ViewportSpec};

/// Launch-time failures; everything after launch surfaces as
/// [`core_rpc::RpcError`].
#[derive(Debug, thiserror::Error)]
pub enum ChromeError {
    #[error("no browser binary found (set CHROME_BIN or install chromium)")]
    BinaryNotFound,
    #[error("browser did not announce a debugging endpoint in time")]
    HandshakeTimeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
