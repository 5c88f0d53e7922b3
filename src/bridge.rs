//! A bridge between ICAP and HTTP.
//!
//! It allows answering a `REQMOD` request with an HTTP response generated
//! locally: [`BridgedResponseWriter`] looks like an ordinary HTTP response
//! writer but re-encapsulates everything written to it inside an ICAP
//! `200 OK` reply, and [`serve_locally`] routes the embedded HTTP request
//! through handlers registered with [`handle_http`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, RwLock};

use http::{HeaderMap, HeaderValue, Response as HttpResponse, Version};
use tracing::warn;

use crate::error::{Error, IcapResult};
use crate::mux::path_match;
use crate::request::Request;
use crate::response::{EmbeddedHttp, ResponseWriter, http_date_now};

/// HTTP response writer backed by an ICAP [`ResponseWriter`].
pub struct BridgedResponseWriter<'a> {
    irw: &'a mut ResponseWriter,
    header: HeaderMap,
    wrote_header: bool,
}

impl<'a> BridgedResponseWriter<'a> {
    /// Wrap `w` so that a standard HTTP handler can answer through it.
    pub fn new(w: &'a mut ResponseWriter) -> Self {
        Self {
            irw: w,
            header: HeaderMap::new(),
            wrote_header: false,
        }
    }

    /// Headers of the synthesized HTTP response.
    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.header
    }

    /// Send the HTTP response head with status `code`.
    ///
    /// Defaults `Content-Type` to HTML in UTF-8 and `Date` to now, then
    /// commits the underlying ICAP response as `200 OK` carrying the
    /// synthesized HTTP response and a body. Calling this twice is reported
    /// and ignored.
    pub async fn write_header(&mut self, code: u16) -> IcapResult<()> {
        if self.wrote_header {
            warn!("write_header called twice on a bridged HTTP response");
            return Ok(());
        }
        self.wrote_header = true;

        if !self.header.contains_key("content-type") {
            self.header.insert(
                "content-type",
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        }
        if !self.header.contains_key("date") {
            self.header
                .insert("date", HeaderValue::try_from(http_date_now())?);
        }

        let mut resp = HttpResponse::builder()
            .status(code)
            .version(Version::HTTP_11)
            .body(())
            .map_err(|e| Error::http_parse(e.to_string()))?;
        *resp.headers_mut() = self.header.clone();

        self.irw
            .write_header(200, EmbeddedHttp::Resp(&resp), true)
            .await
    }

    /// Write HTTP body data, committing with status `200` first if needed.
    pub async fn write(&mut self, p: &[u8]) -> IcapResult<usize> {
        if !self.wrote_header {
            self.write_header(200).await?;
        }
        self.irw.write(p).await
    }
}

/// Boxed future returned by [`HttpHandler::serve_http`].
pub type HttpHandlerFuture<'a> = Pin<Box<dyn Future<Output = IcapResult<()>> + Send + 'a>>;

/// An HTTP handler serving locally generated pages through the bridge.
pub trait HttpHandler: Send + Sync {
    fn serve_http<'a, 'b>(
        &'a self,
        w: &'a mut BridgedResponseWriter<'b>,
        req: &'a http::Request<()>,
    ) -> HttpHandlerFuture<'a>;
}

/// Adapter to use a plain function as an [`HttpHandler`].
pub struct HttpHandlerFunc<F>(pub F);

impl<F> HttpHandler for HttpHandlerFunc<F>
where
    F: for<'a, 'b> Fn(&'a mut BridgedResponseWriter<'b>, &'a http::Request<()>) -> HttpHandlerFuture<'a>
        + Send
        + Sync,
{
    fn serve_http<'a, 'b>(
        &'a self,
        w: &'a mut BridgedResponseWriter<'b>,
        req: &'a http::Request<()>,
    ) -> HttpHandlerFuture<'a> {
        (self.0)(w, req)
    }
}

static HTTP_MUX: LazyLock<RwLock<HashMap<String, Arc<dyn HttpHandler>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register an HTTP handler consulted by [`serve_locally`]. Patterns follow
/// the same rules as the ICAP mux: exact path, or subtree with a trailing
/// slash, longest match winning.
pub fn handle_http(pattern: &str, handler: Arc<dyn HttpHandler>) -> IcapResult<()> {
    if pattern.is_empty() {
        return Err(Error::configuration("empty routing pattern"));
    }
    let mut m = HTTP_MUX
        .write()
        .map_err(|_| Error::configuration("HTTP mux lock poisoned"))?;
    if m.contains_key(pattern) {
        return Err(Error::configuration(format!(
            "pattern {pattern:?} registered twice"
        )));
    }
    m.insert(pattern.to_string(), handler);
    Ok(())
}

fn matched_http(path: &str) -> Option<Arc<dyn HttpHandler>> {
    let m = HTTP_MUX.read().ok()?;
    let mut best: Option<&str> = None;
    for pattern in m.keys() {
        if !path_match(pattern, path) {
            continue;
        }
        if best.is_none_or(|b| pattern.len() > b.len()) {
            best = Some(pattern);
        }
    }
    best.and_then(|p| m.get(p).cloned())
}

/// Use the local HTTP handlers to generate the response for an ICAP request.
///
/// Routes the embedded HTTP request by path through the [`handle_http`]
/// registry; an unroutable path gets a plain-text 404 page.
pub async fn serve_locally(w: &mut ResponseWriter, req: &Request) -> IcapResult<()> {
    let Some(embedded) = req.http_request.as_ref() else {
        return Err(Error::handler(
            "REQMOD request carries no embedded HTTP request",
        ));
    };
    let head = &embedded.head;

    let mut bw = BridgedResponseWriter::new(w);
    match matched_http(head.uri().path()) {
        Some(h) => h.serve_http(&mut bw, head).await,
        None => {
            warn!("no local HTTP handler for path {:?}", head.uri().path());
            bw.header_mut().insert(
                "content-type",
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            bw.write_header(404).await?;
            bw.write(b"404 page not found\n").await?;
            Ok(())
        }
    }
}
