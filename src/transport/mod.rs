//! # Transport
//!
//! Narrow interface between the connection driver and the wire.
//!
//! The driver consumes a pull-style stream: one call yields the parsed
//! request head, a second pulls the body under the route's size limit,
//! and writes take raw bytes. Deadlines map onto socket timeouts so a
//! fired timer surfaces as [`TransportError::Timeout`] on the blocked
//! call.
//!
//! [`tcp::TcpHttpStream`] is the built-in implementation over
//! `may::net::TcpStream`, optionally wrapped in `rustls`; tests and
//! embedders with exotic transports can provide their own
//! [`HttpStream`].

pub mod tcp;

use std::io;
use std::time::Duration;

use http::{HeaderMap, Method};
use thiserror::Error;

/// Head of an incoming request: everything before the body.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    /// Minor HTTP version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version_minor: u8,
    pub headers: HeaderMap,
}

/// Failure of a transport operation. Every variant closes the
/// connection; none of them produce a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(io::Error),
    #[error("read or write deadline expired")]
    Timeout,
    #[error("malformed http message")]
    BadMessage,
    #[error("request body exceeds the route limit")]
    BodyTooLarge,
    #[error("peer closed the stream")]
    Closed,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }
}

/// One HTTP/1.1 stream as the driver sees it.
///
/// Implementations own the parse buffer, so pipelined bytes left over
/// from one request are visible to the next `read_head` call.
pub trait HttpStream: Send {
    /// Block until a full request head has been parsed.
    fn read_head(&mut self) -> Result<RequestHead, TransportError>;

    /// Block until the body of `head` has been read. `limit` is the
    /// effective max body size; exceeding it fails with
    /// [`TransportError::BodyTooLarge`]. Both `Content-Length` and
    /// chunked framing are handled here; a request with neither has an
    /// empty body.
    fn read_body(&mut self, head: &RequestHead, limit: usize) -> Result<Vec<u8>, TransportError>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Deadline applied to subsequent reads; `None` removes it.
    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()>;

    /// Deadline applied to subsequent writes; `None` removes it.
    fn set_write_deadline(&mut self, deadline: Option<Duration>) -> io::Result<()>;

    /// Tear the stream down. Must be idempotent.
    fn shutdown(&mut self);
}
