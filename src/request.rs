//! Reading and parsing of ICAP requests.

use std::fmt;
use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::MAX_HDR_BYTES;
use crate::error::{Error, IcapResult};
use crate::parser::http_embed;
use crate::parser::icap::parse_encapsulated;
use crate::parser::wire::{BodyStream, ChunkedReader};

/// A parsed ICAP request.
///
/// Created by [`read_request`] from one connection, consumed by one handler,
/// and discarded when the handler returns.
#[derive(Debug)]
pub struct Request {
    /// `REQMOD`, `RESPMOD`, `OPTIONS`, or any other uppercase method token.
    pub method: String,
    /// The URL exactly as it appeared on the request line.
    pub raw_url: String,
    /// Parsed form of the request-line URL.
    pub url: Uri,
    /// Protocol version token, normally `ICAP/1.0`.
    pub proto: String,
    /// The ICAP headers.
    pub header: HeaderMap,
    /// Peer address, filled in by the connection server.
    pub remote_addr: Option<SocketAddr>,
    /// Embedded HTTP request (`REQMOD`, and the request context of `RESPMOD`).
    pub http_request: Option<EmbeddedRequest>,
    /// Embedded HTTP response (`RESPMOD`).
    pub http_response: Option<EmbeddedResponse>,
}

impl Request {
    pub fn is_reqmod(&self) -> bool {
        self.method == "REQMOD"
    }

    pub fn is_respmod(&self) -> bool {
        self.method == "RESPMOD"
    }

    pub fn is_options(&self) -> bool {
        self.method == "OPTIONS"
    }

    /// Whether the client advertised `Allow: 204`, permitting a
    /// `204 No Content` reply when no modification is needed.
    pub fn allows_204(&self) -> bool {
        self.header.get_all("allow").iter().any(|v| {
            v.to_str()
                .map(|s| s.split(',').any(|p| p.trim() == "204"))
                .unwrap_or(false)
        })
    }
}

/// An embedded HTTP request: parsed head plus its entity body.
#[derive(Debug)]
pub struct EmbeddedRequest {
    pub head: http::Request<()>,
    pub body: Body,
}

impl EmbeddedRequest {
    /// Target host: the request-target authority first, `Host` header second.
    pub fn host(&self) -> Option<&str> {
        if let Some(h) = self.head.uri().host() {
            return Some(h);
        }
        self.head
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
    }
}

/// An embedded HTTP response: parsed head plus its entity body.
#[derive(Debug)]
pub struct EmbeddedResponse {
    pub head: http::Response<()>,
    pub body: Body,
}

/// Entity body of an embedded HTTP message.
///
/// A body is single-pass and reads straight off the connection, so it is only
/// valid while the connection is open. Handlers that need the content before
/// replying must drain it themselves; an undrained body is simply abandoned
/// when the connection closes after the request.
pub struct Body(BodyKind);

enum BodyKind {
    Empty,
    Chunked(ChunkedReader),
}

impl Body {
    pub(crate) fn empty() -> Self {
        Body(BodyKind::Empty)
    }

    pub(crate) fn chunked(stream: BodyStream) -> Self {
        Body(BodyKind::Chunked(ChunkedReader::new(stream)))
    }

    /// Next decoded chunk in wire order, or `None` at end of body.
    pub async fn next_chunk(&mut self) -> IcapResult<Option<Vec<u8>>> {
        match &mut self.0 {
            BodyKind::Empty => Ok(None),
            BodyKind::Chunked(r) => r.next_chunk().await,
        }
    }

    /// Drain the remaining body into a single buffer.
    pub async fn read_to_end(&mut self) -> IcapResult<Vec<u8>> {
        let mut out = Vec::new();
        if let BodyKind::Chunked(r) = &mut self.0 {
            r.read_to_end(&mut out).await?;
        }
        Ok(out)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BodyKind::Empty => f.write_str("Body::Empty"),
            BodyKind::Chunked(_) => f.write_str("Body::Chunked(..)"),
        }
    }
}

/// Read and parse one ICAP request from `b`.
///
/// Consumes exactly the request framing: the request line, the ICAP headers,
/// and the embedded HTTP header blocks named by the `Encapsulated` manifest.
/// When the manifest announces a body the reader moves into the embedded
/// message's [`Body`] so the chunked payload is decoded lazily, in wire
/// order, as the handler pulls it.
pub async fn read_request<R>(b: R) -> IcapResult<Request>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    let mut b = b;
    let mut limit = MAX_HDR_BYTES;

    let line = read_header_line(&mut b, &mut limit).await?;
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(raw_url), Some(proto)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedRequestLine(line.clone()));
    };
    let method = method.to_string();
    let raw_url = raw_url.to_string();
    let proto = proto.to_string();
    let url: Uri = raw_url.parse()?;
    trace!("read request: {method} {raw_url}");

    let mut header = HeaderMap::new();
    loop {
        let line = read_header_line(&mut b, &mut limit).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::parse(format!("malformed ICAP header line: {line:?}")));
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())?;
        let value = HeaderValue::from_str(value.trim())?;
        header.append(name, value);
    }

    let Some(encap) = header.get("encapsulated") else {
        return Err(Error::MissingEncapsulated);
    };
    let encap = encap.to_str().map_err(|e| Error::parse(e.to_string()))?;
    let enc = parse_encapsulated(encap)?;

    // Optional junk before the first header block is discarded.
    if enc.initial_skip > 0 {
        read_exact_buf(&mut b, enc.initial_skip).await?;
    }
    let raw_req_hdr = if enc.req_hdr_len > 0 {
        Some(read_exact_buf(&mut b, enc.req_hdr_len).await?)
    } else {
        None
    };
    let raw_res_hdr = if enc.res_hdr_len > 0 {
        Some(read_exact_buf(&mut b, enc.res_hdr_len).await?)
    } else {
        None
    };

    let mut http_request = match raw_req_hdr {
        Some(raw) => Some(EmbeddedRequest {
            head: http_embed::parse_request(&raw)?,
            body: Body::empty(),
        }),
        None => None,
    };
    let mut http_response = match raw_res_hdr {
        Some(raw) => Some(EmbeddedResponse {
            head: http_embed::parse_response(&raw)?,
            body: Body::empty(),
        }),
        None => None,
    };

    // The chunked payload belongs to the message being modified; anything
    // else (e.g. opt-body) stays unread in the stream.
    if enc.has_body {
        if method == "REQMOD" {
            if let Some(req) = http_request.as_mut() {
                req.body = Body::chunked(Box::new(b));
            }
        } else if method == "RESPMOD"
            && let Some(resp) = http_response.as_mut()
        {
            resp.body = Body::chunked(Box::new(b));
        }
    }

    Ok(Request {
        method,
        raw_url,
        url,
        proto,
        header,
        remote_addr: None,
        http_request,
        http_response,
    })
}

/// Read one CRLF-terminated header line, enforcing the header-block cap.
async fn read_header_line<R>(b: &mut R, limit: &mut usize) -> IcapResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let buf = b.fill_buf().await?;
        if buf.is_empty() {
            return Err(Error::UnexpectedEof);
        }
        let (used, done) = match buf.iter().position(|&c| c == b'\n') {
            Some(i) => (i + 1, true),
            None => (buf.len(), false),
        };
        *limit = limit.checked_sub(used).ok_or_else(|| {
            Error::parse(format!("ICAP header block larger than {MAX_HDR_BYTES} bytes"))
        })?;
        raw.extend_from_slice(&buf[..used]);
        b.consume(used);
        if done {
            break;
        }
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|e| Error::parse(e.to_string()))
}

/// Read exactly `n` bytes; a short read is a framing error.
async fn read_exact_buf<R>(b: &mut R, n: usize) -> IcapResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = vec![0u8; n];
    b.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}
