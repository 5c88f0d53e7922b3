use std::collections::BTreeMap;
use std::fmt::Write as _;

use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request as HttpRequest, Response as HttpResponse,
    StatusCode, Uri, Version,
};

use crate::error::{Error, IcapResult};

/// Headers one embedded HTTP head may carry.
const MAX_EMBEDDED_HEADERS: usize = 64;

/// Original reason phrase of a parsed HTTP response.
///
/// `http::Response` has no slot for a non-canonical phrase, so it rides in
/// the response extensions and is restored on re-serialization.
#[derive(Debug, Clone)]
pub struct ReasonPhrase(pub String);

pub(crate) fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn parsed_version(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn copy_headers(src: &[httparse::Header<'_>], dst: &mut HeaderMap) -> IcapResult<()> {
    for h in src {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::http_parse(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|e| Error::http_parse(e.to_string()))?;
        dst.append(name, value);
    }
    Ok(())
}

/// Parse an embedded HTTP request head.
pub(crate) fn parse_request(raw: &[u8]) -> IcapResult<HttpRequest<()>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_EMBEDDED_HEADERS];
    let mut preq = httparse::Request::new(&mut headers);
    match preq.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::http_parse("truncated embedded HTTP request"));
        }
        Err(e) => {
            return Err(Error::http_parse(format!(
                "error while parsing HTTP request: {e}"
            )));
        }
    }

    let method = preq
        .method
        .ok_or_else(|| Error::http_parse("missing HTTP method"))?;
    let target = preq
        .path
        .ok_or_else(|| Error::http_parse("missing HTTP request target"))?;

    let mut builder = HttpRequest::builder()
        .method(
            Method::from_bytes(method.as_bytes()).map_err(|e| Error::http_parse(e.to_string()))?,
        )
        .uri(
            target
                .parse::<Uri>()
                .map_err(|e| Error::http_parse(e.to_string()))?,
        )
        .version(parsed_version(preq.version));
    if let Some(h) = builder.headers_mut() {
        copy_headers(preq.headers, h)?;
    }
    builder
        .body(())
        .map_err(|e| Error::http_parse(e.to_string()))
}

/// Parse an embedded HTTP response head.
pub(crate) fn parse_response(raw: &[u8]) -> IcapResult<HttpResponse<()>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_EMBEDDED_HEADERS];
    let mut pres = httparse::Response::new(&mut headers);
    match pres.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::http_parse("truncated embedded HTTP response"));
        }
        Err(e) => {
            return Err(Error::http_parse(format!(
                "error while parsing HTTP response: {e}"
            )));
        }
    }

    let code = pres
        .code
        .ok_or_else(|| Error::http_parse("missing HTTP status code"))?;
    let status =
        StatusCode::from_u16(code).map_err(|e| Error::http_parse(e.to_string()))?;

    let mut builder = HttpResponse::builder()
        .status(status)
        .version(parsed_version(pres.version));
    if let Some(h) = builder.headers_mut() {
        copy_headers(pres.headers, h)?;
    }
    let mut resp = builder
        .body(())
        .map_err(|e| Error::http_parse(e.to_string()))?;
    if let Some(reason) = pres.reason
        && !reason.is_empty()
    {
        resp.extensions_mut().insert(ReasonPhrase(reason.to_string()));
    }
    Ok(resp)
}

/// Serialize the head of an embedded HTTP request for an ICAP message.
///
/// `Transfer-Encoding` and `Content-Length` are omitted (ICAP chunking
/// replaces the original body framing) and `Host` is forced from the
/// request-target authority, falling back to the `Host` header.
pub(crate) fn request_header(req: &HttpRequest<()>) -> IcapResult<Vec<u8>> {
    let mut host = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();
    if host.is_empty()
        && let Some(v) = req.headers().get(http::header::HOST)
    {
        host = v.to_str().unwrap_or_default().to_string();
    }

    let mut out = String::new();
    write!(
        &mut out,
        "{} {} {}\r\n",
        req.method(),
        req.uri(),
        http_version_str(req.version())
    )
    .unwrap();

    let mut lines = header_lines(req.headers());
    lines.insert("Host".to_string(), vec![host]);
    write_header_lines(&mut out, &lines);
    out.push_str("\r\n");
    Ok(out.into_bytes())
}

/// Serialize the head of an embedded HTTP response for an ICAP message.
pub(crate) fn response_header(resp: &HttpResponse<()>) -> IcapResult<Vec<u8>> {
    let status = resp.status();
    let reason = resp
        .extensions()
        .get::<ReasonPhrase>()
        .map(|r| r.0.clone())
        .or_else(|| status.canonical_reason().map(str::to_owned))
        .unwrap_or_else(|| format!("status code {}", status.as_u16()));

    let mut out = String::new();
    write!(
        &mut out,
        "{} {} {}\r\n",
        http_version_str(resp.version()),
        status.as_u16(),
        reason
    )
    .unwrap();

    let lines = header_lines(resp.headers());
    write_header_lines(&mut out, &lines);
    out.push_str("\r\n");
    Ok(out.into_bytes())
}

/// Collect headers under their canonical names, sorted, minus the body
/// framing fields.
fn header_lines(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut lines: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if name == http::header::TRANSFER_ENCODING || name == http::header::CONTENT_LENGTH {
            continue;
        }
        lines
            .entry(title_case(name.as_str()))
            .or_default()
            .push(value.to_str().unwrap_or_default().to_string());
    }
    lines
}

fn write_header_lines(out: &mut String, lines: &BTreeMap<String, Vec<String>>) {
    for (name, values) in lines {
        for v in values {
            write!(out, "{name}: {v}\r\n").unwrap();
        }
    }
}

/// Title-Case each hyphen-separated token of a header name.
pub(crate) fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, seg) in name.split('-').enumerate() {
        if i > 0 {
            out.push('-');
        }
        let mut chars = seg.chars();
        if let Some(c0) = chars.next() {
            out.extend(c0.to_uppercase());
            for c in chars {
                out.extend(c.to_lowercase());
            }
        }
    }
    out
}
