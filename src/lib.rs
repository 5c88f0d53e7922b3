#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod error;
pub mod mux;
mod parser;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use bridge::{
    BridgedResponseWriter, HttpHandler, HttpHandlerFunc, HttpHandlerFuture, handle_http,
    serve_locally,
};
pub use error::{Error, IcapResult};
pub use mux::{ServeMux, handle, handle_func};
pub use parser::http_embed::ReasonPhrase;
pub use request::{Body, EmbeddedRequest, EmbeddedResponse, Request, read_request};
pub use response::{EmbeddedHttp, ResponseWriter};
pub use server::{
    Handler, HandlerFunc, HandlerFuture, Server, ServerBuilder, listen_and_serve, serve,
};
pub use status::status_text;

/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
/// Default listen address when none is configured.
pub const DEFAULT_ADDR: &str = ":1344";
/// Upper bound on the ICAP header block of a single request.
pub const MAX_HDR_BYTES: usize = 64 * 1024;
