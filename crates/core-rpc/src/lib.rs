//! Browser control channel: duplex frame transport plus a JSON-RPC client
//! with request correlation and unsolicited-event fanout.

mod client;
mod error;
mod transport;

pub use client::{
    DEFAULT_CALL_TIMEOUT, EventInterceptor, EventStream, Poster, RpcClient,
};
pub use error::RpcError;
pub use transport::{Transport, TransportReader, TransportWriter, WireFrame};
