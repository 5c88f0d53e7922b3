//! Error handling.
//!
//! This module defines:
//! - [`Error`]: the main error type for ICAP operations.
//! - [`IcapResult<T>`]: a convenient alias for `Result<T, Error>`.
//!
//! It covers network errors, framing errors raised while decoding an ICAP
//! message, embedded HTTP parse failures, and configuration/handler issues.

use http::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

/// Errors raised while reading, routing, or answering ICAP requests.
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level error (TCP connection, deadline expiry, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream in the middle of an ICAP message.
    #[error("unexpected EOF while reading ICAP message")]
    UnexpectedEof,

    /// The request line did not carry method, URL, and protocol tokens.
    #[error("malformed ICAP request line: {0:?}")]
    MalformedRequestLine(String),

    /// The request-line URL failed to parse.
    #[error("invalid ICAP URI: {0}")]
    InvalidUri(String),

    /// A message with an encapsulation region lacked the `Encapsulated` header.
    #[error("missing Encapsulated header")]
    MissingEncapsulated,

    /// The `Encapsulated` header value violates the manifest grammar.
    #[error("malformed Encapsulated header: {0}")]
    MalformedEncapsulated(String),

    /// The `Encapsulated` header named an unknown section key.
    #[error("invalid key for Encapsulated header: {0:?}")]
    InvalidEncapsulatedKey(String),

    /// Failed to parse an ICAP message.
    #[error("ICAP parsing error: {0}")]
    Parse(String),

    /// Failed to parse an embedded HTTP message.
    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    /// Error while handling a message body.
    #[error("body error: {0}")]
    Body(String),

    /// Configuration error (bad routing pattern, double registration, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Application handler error.
    #[error("handler error: {0}")]
    Handler(String),

    /// Unexpected/unclassified error.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Create a parsing error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an HTTP parsing error.
    pub fn http_parse(message: impl Into<String>) -> Self {
        Self::HttpParse(message.into())
    }

    /// Create a body error.
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body(message.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Unexpected(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Unexpected(err.to_string())
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(e: http::uri::InvalidUri) -> Self {
        Error::InvalidUri(e.to_string())
    }
}

impl From<InvalidHeaderName> for Error {
    fn from(e: InvalidHeaderName) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(e: InvalidHeaderValue) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Convenient alias for results in the ICAP library.
pub type IcapResult<T> = Result<T, Error>;
