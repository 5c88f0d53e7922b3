use std::io::Write as _;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, IcapResult};

/// Longest size/trailer line the chunk decoder will accept.
const MAX_CHUNK_LINE: usize = 1024;

/// Type-erased read half of a connection, handed to a body reader.
pub(crate) type BodyStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Streaming decoder for an HTTP/1.1 chunked entity body.
///
/// Owns the connection's read half. Chunks are decoded one at a time; after
/// the zero-length terminator (optional trailer lines included) the reader
/// reports end of body and stops touching the stream.
pub(crate) struct ChunkedReader {
    r: BodyStream,
    done: bool,
}

impl ChunkedReader {
    pub(crate) fn new(r: BodyStream) -> Self {
        Self { r, done: false }
    }

    /// Next chunk payload in wire order, or `None` once the body is complete.
    pub(crate) async fn next_chunk(&mut self) -> IcapResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }

        let line = read_wire_line(&mut self.r).await?;
        let size = chunk_size(&line)?;

        if size == 0 {
            // Zero chunk: swallow trailer lines up to the blank terminator.
            loop {
                let trailer = read_wire_line(&mut self.r).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            self.done = true;
            return Ok(None);
        }

        let mut data = vec![0u8; size];
        self.r.read_exact(&mut data).await.map_err(map_eof)?;
        let mut crlf = [0u8; 2];
        self.r.read_exact(&mut crlf).await.map_err(map_eof)?;
        if &crlf != b"\r\n" {
            return Err(Error::body("chunk data not terminated by CRLF"));
        }
        Ok(Some(data))
    }

    /// Drain the remaining chunks into `out`; returns the bytes appended.
    pub(crate) async fn read_to_end(&mut self, out: &mut Vec<u8>) -> IcapResult<usize> {
        let start = out.len();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.len() - start)
    }
}

/// Parse a chunk-size line, ignoring any `;ext` chunk extensions.
fn chunk_size(line: &str) -> IcapResult<usize> {
    let hex = line.split(';').next().unwrap_or(line).trim();
    usize::from_str_radix(hex, 16)
        .map_err(|_| Error::body(format!("invalid chunk size line: {line:?}")))
}

/// Read one CRLF-terminated line, without the terminator.
async fn read_wire_line(r: &mut BodyStream) -> IcapResult<String> {
    let mut raw = Vec::new();
    loop {
        let buf = r.fill_buf().await?;
        if buf.is_empty() {
            return Err(Error::UnexpectedEof);
        }
        let (used, done) = match buf.iter().position(|&c| c == b'\n') {
            Some(i) => (i + 1, true),
            None => (buf.len(), false),
        };
        raw.extend_from_slice(&buf[..used]);
        r.consume(used);
        if raw.len() > MAX_CHUNK_LINE {
            return Err(Error::body("chunk line too long"));
        }
        if done {
            break;
        }
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|e| Error::body(e.to_string()))
}

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof
    } else {
        Error::Io(e)
    }
}

/// Write one chunk; empty input writes nothing so the body stays open.
pub(crate) async fn write_chunk<W>(w: &mut W, data: &[u8]) -> IcapResult<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::with_capacity(data.len() + 16);
    write!(&mut buf, "{:x}\r\n", data.len())?;
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    w.write_all(&buf).await?;
    Ok(())
}

/// Write the zero-length chunk that terminates a body.
pub(crate) async fn write_final_chunk<W>(w: &mut W) -> IcapResult<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(b"0\r\n").await?;
    Ok(())
}
