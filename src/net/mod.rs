//! Blocking HTTP plumbing for the vote exchange.
//!
//! One short-lived connection per poll: the voter opens a socket, POSTs a
//! signed vote, reads the signed response, and closes. The server side is a
//! thread-per-connection accept loop. There is no TLS layer; authenticity is
//! carried by the body MAC, not the transport.

pub mod http;

mod client;
mod server;
mod vote_server;

pub(crate) use client::VoteTransport;
pub use vote_server::{VoteHttpServer, VoteHttpServerConfig, VoteServerHandle};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed while reading headers")]
    ConnectionClosedBeforeHeaders,
    #[error("missing HTTP header terminator")]
    MissingHeaderTerminator,
    #[error("HTTP headers exceed limit")]
    HeadersTooLarge,
    #[error("partial HTTP request received")]
    PartialRequest,
    #[error("HTTP request timed out")]
    RequestTimeout,
    #[error("HTTP request parse error: {0:?}")]
    RequestParse(httparse::Error),
    #[error("HTTP method missing")]
    MissingMethod,
    #[error("HTTP path missing")]
    MissingPath,
    #[error("invalid header value for {name}")]
    InvalidHeaderValue { name: String },
    #[error("invalid Content-Length header value")]
    InvalidContentLengthValue,
    #[error("HTTP body exceeds limit")]
    BodyTooLarge,
    #[error("connection closed before HTTP body completed")]
    ConnectionClosedBeforeBody,
    #[error("JSON serialization error: {0}")]
    JsonSerialize(#[from] serde_json::Error),
    #[error("response formatting failed")]
    ResponseFormat,
    #[error("HTTP response write timed out")]
    ResponseTimeout,
    #[error("HTTP response parse error: {0:?}")]
    ResponseParse(httparse::Error),
    #[error("partial HTTP response received")]
    PartialResponse,
    #[error("HTTP status code missing from response")]
    MissingStatusCode,
    #[error("vote transport requires http scheme (found {scheme})")]
    UnsupportedScheme { scheme: String },
    #[error("vote server URL missing host")]
    MissingHost,
    #[error("no addresses resolved for vote server")]
    NoAddressesResolved,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("service lock poisoned ({context})")]
    Poisoned { context: &'static str },
    #[error("{context} server shutdown timed out")]
    ShutdownTimeout { context: &'static str },
}
