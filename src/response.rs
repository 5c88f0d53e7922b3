//! Responding to ICAP requests.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use http::HeaderMap;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::warn;

use crate::ICAP_VERSION;
use crate::error::{Error, IcapResult};
use crate::parser::http_embed;
use crate::parser::wire;
use crate::status::status_text;

/// The embedded HTTP message re-encapsulated by a committed ICAP response.
#[derive(Clone, Copy)]
pub enum EmbeddedHttp<'a> {
    /// An adapted HTTP request head (`REQMOD` replies).
    Req(&'a http::Request<()>),
    /// An adapted or synthesized HTTP response head (`RESPMOD` replies, bridge).
    Resp(&'a http::Response<()>),
    /// No embedded HTTP message.
    None,
}

/// Streaming writer for one ICAP response.
///
/// The header block is committed at most once, either explicitly through
/// [`write_header`](Self::write_header) or implicitly by the first
/// [`write`](Self::write). After a commit with a body, writes stream out as
/// chunked data; [`finish`](Self::finish) terminates the body and flushes.
pub struct ResponseWriter {
    w: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
    req_method: String,
    header: HeaderMap,
    wrote_header: bool,
    has_body: bool,
}

impl ResponseWriter {
    /// Writer over `w`, answering a request made with `req_method`.
    pub fn new<W>(w: W, req_method: &str) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            w: BufWriter::new(Box::new(w)),
            req_method: req_method.to_string(),
            header: HeaderMap::new(),
            wrote_header: false,
            has_body: false,
        }
    }

    /// ICAP headers that [`write_header`](Self::write_header) will send.
    /// Mutations after the header has been written have no effect.
    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.header
    }

    /// Write `p` to the response body.
    ///
    /// If the header has not been written yet, commits `200 OK` with a body
    /// and no embedded message first. Fails if the response was committed
    /// without a body.
    pub async fn write(&mut self, p: &[u8]) -> IcapResult<usize> {
        if !self.wrote_header {
            self.write_header(200, EmbeddedHttp::None, true).await?;
        }
        if !self.has_body {
            return Err(Error::body(
                "write on an ICAP response committed without a body",
            ));
        }
        wire::write_chunk(&mut self.w, p).await?;
        Ok(p.len())
    }

    /// Send the ICAP status line and headers, then the embedded HTTP header
    /// block if `http_message` carries one.
    ///
    /// The `Encapsulated` manifest is computed here: the serialized length of
    /// the embedded head becomes the offset of the body marker (`*-body` when
    /// `has_body`, `null-body` otherwise). Calling this twice is reported and
    /// ignored.
    pub async fn write_header(
        &mut self,
        code: u16,
        http_message: EmbeddedHttp<'_>,
        has_body: bool,
    ) -> IcapResult<()> {
        if self.wrote_header {
            warn!("write_header called twice for one ICAP response");
            return Ok(());
        }

        let (http_header, encap) = match http_message {
            EmbeddedHttp::Req(req) => {
                let hdr = http_embed::request_header(req)?;
                let marker = if has_body { "req-body" } else { "null-body" };
                let encap = format!("req-hdr=0, {marker}={}", hdr.len());
                (Some(hdr), encap)
            }
            EmbeddedHttp::Resp(resp) => {
                let hdr = http_embed::response_header(resp)?;
                let marker = if has_body { "res-body" } else { "null-body" };
                let encap = format!("res-hdr=0, {marker}={}", hdr.len());
                (Some(hdr), encap)
            }
            EmbeddedHttp::None => {
                let encap = if has_body {
                    let mut m = self.req_method.to_ascii_lowercase();
                    m.truncate(3);
                    format!("{m}-body=0")
                } else {
                    "null-body=0".to_string()
                };
                (None, encap)
            }
        };

        self.header
            .insert("encapsulated", http::HeaderValue::try_from(encap)?);
        if !self.header.contains_key("date") {
            self.header
                .insert("date", http::HeaderValue::try_from(http_date_now())?);
        }
        self.header
            .insert("connection", http::HeaderValue::from_static("close"));

        let text = status_text(code);
        let reason = if text.is_empty() {
            Cow::Owned(format!("status code {code}"))
        } else {
            Cow::Borrowed(text)
        };

        let mut head = String::new();
        write!(&mut head, "{ICAP_VERSION} {code} {reason}\r\n").unwrap();

        // Stable output: canonical names in sorted order, values in arrival
        // order within a name.
        let mut lines: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.header {
            lines
                .entry(canonical_icap_header(name.as_str()).into_owned())
                .or_default()
                .push(value.to_str().unwrap_or_default().to_string());
        }
        for (name, values) in &lines {
            for v in values {
                write!(&mut head, "{name}: {v}\r\n").unwrap();
            }
        }
        head.push_str("\r\n");

        self.w.write_all(head.as_bytes()).await?;
        if let Some(hdr) = http_header {
            self.w.write_all(&hdr).await?;
        }
        self.wrote_header = true;
        self.has_body = has_body;
        Ok(())
    }

    /// Complete the response.
    ///
    /// Commits `200 OK` with no body if nothing was committed, terminates the
    /// chunked body if one was open, and flushes the connection.
    pub async fn finish(&mut self) -> IcapResult<()> {
        if !self.wrote_header {
            self.write_header(200, EmbeddedHttp::None, false).await?;
        }
        if self.has_body {
            wire::write_final_chunk(&mut self.w).await?;
            self.w.write_all(b"\r\n").await?;
            self.has_body = false;
        }
        self.w.flush().await?;
        Ok(())
    }
}

/// Current time in IMF-fixdate form, as used by `Date:` headers.
pub(crate) fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Canonical ICAP capitalization for a lowercased header name.
fn canonical_icap_header(name: &str) -> Cow<'_, str> {
    match name {
        "istag" => Cow::Borrowed("ISTag"),
        "encapsulated" => Cow::Borrowed("Encapsulated"),
        "methods" => Cow::Borrowed("Methods"),
        "service" => Cow::Borrowed("Service"),
        "service-id" => Cow::Borrowed("Service-ID"),
        "max-connections" => Cow::Borrowed("Max-Connections"),
        "options-ttl" => Cow::Borrowed("Options-TTL"),
        "preview" => Cow::Borrowed("Preview"),
        "allow" => Cow::Borrowed("Allow"),
        "transfer-preview" => Cow::Borrowed("Transfer-Preview"),
        "transfer-ignore" => Cow::Borrowed("Transfer-Ignore"),
        "transfer-complete" => Cow::Borrowed("Transfer-Complete"),
        _ => Cow::Owned(http_embed::title_case(name)),
    }
}
