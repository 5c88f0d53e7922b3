use icap_server::{EmbeddedHttp, Error, ResponseWriter, read_request};
use tokio::io::{AsyncReadExt, DuplexStream, duplex};

async fn collect(mut rx: DuplexStream) -> String {
    let mut out = Vec::new();
    rx.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

// RFC 3507 section 4.3.2, request side.
const REQMOD_POST: &str = "REQMOD icap://icap-server.net/server?arg=87 ICAP/1.0\r\n\
     Host: icap-server.net\r\n\
     Encapsulated: req-hdr=0, req-body=154\r\n\
     \r\n\
     POST /origin-resource/form.pl HTTP/1.1\r\n\
     Host: www.origin-server.com\r\n\
     Accept: text/html, text/plain\r\n\
     Accept-Encoding: compress\r\n\
     Cache-Control: no-cache\r\n\
     \r\n\
     1e\r\n\
     I am posting this information.\r\n\
     0\r\n\
     \r\n";

// RFC 3507 section 4.3.2, response side (headers in canonical sorted order).
const REQMOD_POST_REPLY: &str = "ICAP/1.0 200 OK\r\n\
     Connection: close\r\n\
     Date: Mon, 10 Jan 2000  09:55:21 GMT\r\n\
     Encapsulated: req-hdr=0, req-body=231\r\n\
     ISTag: \"W3E4R7U9-L2E4-2\"\r\n\
     Server: ICAP-Server-Software/1.0\r\n\
     \r\n\
     POST /origin-resource/form.pl HTTP/1.1\r\n\
     Accept: text/html, text/plain, image/gif\r\n\
     Accept-Encoding: gzip, compress\r\n\
     Cache-Control: no-cache\r\n\
     Host: www.origin-server.com\r\n\
     Via: 1.0 icap-server.net (ICAP Example ReqMod Service 1.1)\r\n\
     \r\n\
     2d\r\n\
     I am posting this information.  ICAP powered!\r\n\
     0\r\n\
     \r\n";

#[tokio::test]
async fn reqmod_round_trip_with_body_mutation() {
    let mut req = read_request(REQMOD_POST.as_bytes()).await.unwrap();

    let embedded = req.http_request.as_mut().unwrap();
    let mut body = embedded.body.read_to_end().await.unwrap();
    assert_eq!(body, b"I am posting this information.");
    body.extend_from_slice(b"  ICAP powered!");

    let headers = embedded.head.headers_mut();
    headers.insert(
        "via",
        "1.0 icap-server.net (ICAP Example ReqMod Service 1.1)"
            .parse()
            .unwrap(),
    );
    headers.insert("accept", "text/html, text/plain, image/gif".parse().unwrap());
    headers.insert("accept-encoding", "gzip, compress".parse().unwrap());

    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, &req.method);
    w.header_mut()
        .insert("date", "Mon, 10 Jan 2000  09:55:21 GMT".parse().unwrap());
    w.header_mut()
        .insert("server", "ICAP-Server-Software/1.0".parse().unwrap());
    w.header_mut()
        .insert("istag", "\"W3E4R7U9-L2E4-2\"".parse().unwrap());

    w.write_header(
        200,
        EmbeddedHttp::Req(&req.http_request.as_ref().unwrap().head),
        true,
    )
    .await
    .unwrap();
    w.write(&body).await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    assert_eq!(collect(rx).await, REQMOD_POST_REPLY);
}

#[tokio::test]
async fn options_without_body_yields_null_body_manifest() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "OPTIONS");
    w.header_mut().insert("istag", "\"opt-1\"".parse().unwrap());
    w.header_mut().insert("methods", "REQMOD, RESPMOD".parse().unwrap());
    w.write_header(200, EmbeddedHttp::None, false).await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(out.contains("Encapsulated: null-body=0\r\n"));
    assert!(out.contains("Connection: close\r\n"));
    assert!(out.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn first_write_commits_implicitly() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "RESPMOD");
    w.write(b"data").await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(out.contains("Encapsulated: res-body=0\r\n"));
    assert!(out.ends_with("\r\n\r\n4\r\ndata\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn body_marker_prefix_follows_request_method() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "OPTIONS");
    w.write(b"x").await.unwrap();
    w.finish().await.unwrap();
    drop(w);
    assert!(collect(rx).await.contains("Encapsulated: opt-body=0\r\n"));
}

#[tokio::test]
async fn write_after_bodyless_commit_fails() {
    let (tx, _rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "REQMOD");
    w.write_header(204, EmbeddedHttp::None, false).await.unwrap();
    let err = w.write(b"nope").await.unwrap_err();
    assert!(matches!(err, Error::Body(_)));
}

#[tokio::test]
async fn second_write_header_is_ignored() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "REQMOD");
    w.header_mut().insert("istag", "\"a\"".parse().unwrap());
    w.write_header(204, EmbeddedHttp::None, false).await.unwrap();
    w.write_header(500, EmbeddedHttp::None, false).await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.starts_with("ICAP/1.0 204 No Content\r\n"));
    assert!(!out.contains("500"));
}

#[tokio::test]
async fn unknown_status_code_gets_synthetic_reason() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "REQMOD");
    w.write_header(299, EmbeddedHttp::None, false).await.unwrap();
    w.finish().await.unwrap();
    drop(w);
    assert!(collect(rx).await.starts_with("ICAP/1.0 299 status code 299\r\n"));
}

#[tokio::test]
async fn finish_commits_bare_200_when_handler_wrote_nothing() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "REQMOD");
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.starts_with("ICAP/1.0 200 OK\r\n"));
    assert!(out.contains("Encapsulated: null-body=0\r\n"));
}

#[tokio::test]
async fn date_defaults_when_unset() {
    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, "REQMOD");
    w.write_header(204, EmbeddedHttp::None, false).await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.contains("Date: "));
    assert!(out.contains(" GMT\r\n"));
}

#[tokio::test]
async fn embedded_response_without_body_uses_null_body() {
    let respmod = "RESPMOD icap://icap.example.org/satisf ICAP/1.0\r\n\
         Host: icap.example.org\r\n\
         Encapsulated: req-hdr=0, res-hdr=137, res-body=296\r\n\
         \r\n\
         GET /origin-resource HTTP/1.1\r\n\
         Host: www.origin-server.com\r\n\
         Accept: text/html, text/plain, image/gif\r\n\
         Accept-Encoding: gzip, compress\r\n\
         \r\n\
         HTTP/1.1 200 OK\r\n\
         Date: Mon, 10 Jan 2000 09:52:22 GMT\r\n\
         Server: Apache/1.3.6 (Unix)\r\n\
         ETag: \"63840-1ab7-378d415b\"\r\n\
         Content-Type: text/html\r\n\
         Content-Length: 51\r\n\
         \r\n\
         33\r\n\
         This is data that was returned by an origin server.\r\n\
         0\r\n\
         \r\n";
    let mut req = read_request(respmod.as_bytes()).await.unwrap();
    let response = req.http_response.as_mut().unwrap();
    response.body.read_to_end().await.unwrap();

    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, &req.method);
    w.write_header(
        200,
        EmbeddedHttp::Resp(&req.http_response.as_ref().unwrap().head),
        false,
    )
    .await
    .unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    assert!(out.contains("Encapsulated: res-hdr=0, null-body="));
    assert!(out.contains("HTTP/1.1 200 OK\r\n"));
    // ICAP framing replaces the original body framing.
    assert!(!out.contains("Content-Length"));
}

// The manifest offset must equal the serialized length of the embedded head.
#[tokio::test]
async fn manifest_offset_matches_embedded_header_length() {
    let mut req = read_request(REQMOD_POST.as_bytes()).await.unwrap();
    req.http_request
        .as_mut()
        .unwrap()
        .body
        .read_to_end()
        .await
        .unwrap();

    let (tx, rx) = duplex(65536);
    let mut w = ResponseWriter::new(tx, &req.method);
    w.write_header(
        200,
        EmbeddedHttp::Req(&req.http_request.as_ref().unwrap().head),
        true,
    )
    .await
    .unwrap();
    w.write(b"payload").await.unwrap();
    w.finish().await.unwrap();
    drop(w);

    let out = collect(rx).await;
    let manifest_len: usize = out
        .lines()
        .find_map(|l| l.strip_prefix("Encapsulated: req-hdr=0, req-body="))
        .unwrap()
        .parse()
        .unwrap();

    let icap_end = out.find("\r\n\r\n").unwrap() + 4;
    let http_end = out[icap_end..].find("\r\n\r\n").unwrap() + 4;
    assert_eq!(manifest_len, http_end);
}
