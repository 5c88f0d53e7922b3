//! Wire-format internals.
//!
//! - [`icap`]: decoding of the `Encapsulated:` section manifest.
//! - [`wire`]: HTTP/1.1 chunked transfer coding over the live connection.
//! - [`http_embed`]: parsing and serialization of the embedded HTTP heads.

pub(crate) mod http_embed;
pub(crate) mod icap;
pub(crate) mod wire;
