//! Network connections and request dispatch for the ICAP server.
//!
//! Each accepted connection serves exactly one request: read and parse the
//! framing, hand the request and a [`ResponseWriter`] to the handler, finish
//! the response, close. Handler panics are caught at the connection boundary
//! and logged; the accept loop is never taken down by one connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, trace, warn};

use crate::error::{Error, IcapResult};
use crate::mux::DefaultServeMux;
use crate::request::{Request, read_request};
use crate::response::ResponseWriter;

/// Boxed future returned by [`Handler::serve_icap`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = IcapResult<()>> + Send + 'a>>;

/// An ICAP request handler.
///
/// `serve_icap` should write reply headers and data to the
/// [`ResponseWriter`] and then return; anything left uncommitted when it
/// returns degrades to a bare `200 OK` with no body.
pub trait Handler: Send + Sync {
    fn serve_icap<'a>(&'a self, w: &'a mut ResponseWriter, req: &'a mut Request)
    -> HandlerFuture<'a>;
}

/// Adapter to use a plain function as a [`Handler`].
///
/// ```
/// use icap_server::{EmbeddedHttp, HandlerFunc, HandlerFuture, Request, ResponseWriter};
///
/// fn pass<'a>(w: &'a mut ResponseWriter, _req: &'a mut Request) -> HandlerFuture<'a> {
///     Box::pin(async move { w.write_header(204, EmbeddedHttp::None, false).await })
/// }
///
/// let handler = HandlerFunc(pass);
/// ```
pub struct HandlerFunc<F>(pub F);

impl<F> Handler for HandlerFunc<F>
where
    F: for<'a> Fn(&'a mut ResponseWriter, &'a mut Request) -> HandlerFuture<'a> + Send + Sync,
{
    fn serve_icap<'a>(
        &'a self,
        w: &'a mut ResponseWriter,
        req: &'a mut Request,
    ) -> HandlerFuture<'a> {
        (self.0)(w, req)
    }
}

/// Serve one accepted connection to completion.
async fn serve_conn(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn Handler>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
) {
    let (rd, wr) = stream.into_split();

    let read = read_request(BufReader::new(rd));
    let req = match read_timeout {
        Some(t) => match timeout(t, read).await {
            Ok(r) => r,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "read deadline expired",
            ))),
        },
        None => read.await,
    };
    let mut req = match req {
        Ok(r) => r,
        Err(e) => {
            warn!("error while reading request from {peer}: {e}");
            return;
        }
    };
    req.remote_addr = Some(peer);
    trace!("{} {} from {peer}", req.method, req.raw_url);

    let mut w = ResponseWriter::new(wr, &req.method);
    if let Err(e) = handler.serve_icap(&mut w, &mut req).await {
        error!("handler error serving {peer}: {e}");
    }

    let finish = w.finish();
    let finished = match write_timeout {
        Some(t) => match timeout(t, finish).await {
            Ok(r) => r,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "write deadline expired",
            ))),
        },
        None => finish.await,
    };
    if let Err(e) = finished {
        warn!("error finishing response to {peer}: {e}");
    }
}

/// An ICAP server bound to a listener.
pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Server {
    /// New builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> IcapResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Each connection is served on its own task; temporary
    /// accept errors are logged and retried, fatal ones are returned.
    pub async fn run(self) -> IcapResult<()> {
        let local = self.listener.local_addr()?;
        trace!("ICAP server listening on {local}");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) if is_temporary(&e) => {
                    warn!("accept error: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            trace!("new connection from {peer}");

            let handler = Arc::clone(&self.handler);
            let (rt, wt) = (self.read_timeout, self.write_timeout);
            tokio::spawn(async move {
                let conn = tokio::spawn(serve_conn(stream, peer, handler, rt, wt));
                if let Err(e) = conn.await
                    && e.is_panic()
                {
                    error!("panic serving {peer}: {}", panic_message(e.into_panic()));
                }
            });
        }
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    bind_addr: Option<String>,
    handler: Option<Arc<dyn Handler>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: None,
            handler: None,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// TCP address to listen on; `:1344` when empty or unset.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    /// Handler to invoke; the default mux when unset.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Deadline for reading a request's framing off a new connection.
    pub fn read_timeout(mut self, t: Duration) -> Self {
        self.read_timeout = Some(t);
        self
    }

    /// Deadline for completing and flushing a response.
    pub fn write_timeout(mut self, t: Duration) -> Self {
        self.write_timeout = Some(t);
        self
    }

    pub async fn build(self) -> IcapResult<Server> {
        let addr = resolve_addr(self.bind_addr.as_deref());
        let listener = TcpListener::bind(&addr).await?;
        Ok(Server {
            listener,
            handler: self.handler.unwrap_or_else(|| Arc::new(DefaultServeMux)),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Listen on the TCP address `addr` and serve ICAP requests with `handler`.
/// An empty `addr` means `:1344`.
pub async fn listen_and_serve<H>(addr: &str, handler: H) -> IcapResult<()>
where
    H: Handler + 'static,
{
    Server::builder()
        .bind(addr)
        .handler(Arc::new(handler))
        .build()
        .await?
        .run()
        .await
}

/// Serve ICAP requests on an already-bound listener.
pub async fn serve<H>(listener: TcpListener, handler: H) -> IcapResult<()>
where
    H: Handler + 'static,
{
    let server = Server {
        listener,
        handler: Arc::new(handler),
        read_timeout: None,
        write_timeout: None,
    };
    server.run().await
}

fn resolve_addr(addr: Option<&str>) -> String {
    match addr {
        None | Some("") => format!("0.0.0.0{}", crate::DEFAULT_ADDR),
        Some(a) if a.starts_with(':') => format!("0.0.0.0{a}"),
        Some(a) => a.to_string(),
    }
}

fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
