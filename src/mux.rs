//! ICAP request routing.
//!
//! A [`ServeMux`] maps URL path patterns to handlers. A pattern not ending in
//! `/` matches only that exact path; a pattern ending in `/` matches every
//! path it prefixes. The longest matching pattern wins. Registration is
//! write-once per pattern and expected to happen before serving begins.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use tracing::warn;

use crate::error::{Error, IcapResult};
use crate::request::Request;
use crate::response::{EmbeddedHttp, ResponseWriter};
use crate::server::{Handler, HandlerFunc, HandlerFuture};

/// Registry mapping URL path patterns to ICAP handlers.
#[derive(Default)]
pub struct ServeMux {
    m: HashMap<String, Arc<dyn Handler>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self { m: HashMap::new() }
    }

    /// Register `handler` for `pattern`. Registering an already-registered
    /// or empty pattern is an error.
    pub fn handle(&mut self, pattern: &str, handler: Arc<dyn Handler>) -> IcapResult<()> {
        if pattern.is_empty() {
            return Err(Error::configuration("empty routing pattern"));
        }
        if self.m.contains_key(pattern) {
            return Err(Error::configuration(format!(
                "pattern {pattern:?} registered twice"
            )));
        }
        self.m.insert(pattern.to_string(), handler);
        Ok(())
    }

    /// Register a plain function for `pattern`.
    pub fn handle_func<F>(&mut self, pattern: &str, f: F) -> IcapResult<()>
    where
        F: for<'a> Fn(&'a mut ResponseWriter, &'a mut Request) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.handle(pattern, Arc::new(HandlerFunc(f)))
    }

    /// Longest registered pattern matching `path`.
    fn best_pattern(&self, path: &str) -> Option<&str> {
        let mut best: Option<&str> = None;
        for pattern in self.m.keys() {
            if !path_match(pattern, path) {
                continue;
            }
            if best.is_none_or(|b| pattern.len() > b.len()) {
                best = Some(pattern);
            }
        }
        best
    }

    fn matched(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.best_pattern(path).and_then(|p| self.m.get(p).cloned())
    }
}

impl Handler for ServeMux {
    fn serve_icap<'a>(
        &'a self,
        w: &'a mut ResponseWriter,
        req: &'a mut Request,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            match self.matched(req.url.path()) {
                Some(h) => h.serve_icap(w, req).await,
                None => not_found(w, req).await,
            }
        })
    }
}

/// Exact match for plain patterns, prefix match for `.../` subtree patterns.
pub(crate) fn path_match(pattern: &str, path: &str) -> bool {
    if !pattern.ends_with('/') {
        return pattern == path;
    }
    path.starts_with(pattern)
}

async fn not_found(w: &mut ResponseWriter, req: &mut Request) -> IcapResult<()> {
    warn!("no ICAP handler for path {:?}", req.url.path());
    w.write_header(404, EmbeddedHttp::None, false).await
}

static DEFAULT_SERVE_MUX: LazyLock<RwLock<ServeMux>> =
    LazyLock::new(|| RwLock::new(ServeMux::new()));

/// Register `handler` for `pattern` in the default mux.
pub fn handle(pattern: &str, handler: Arc<dyn Handler>) -> IcapResult<()> {
    DEFAULT_SERVE_MUX
        .write()
        .map_err(|_| Error::configuration("default mux lock poisoned"))?
        .handle(pattern, handler)
}

/// Register a plain function for `pattern` in the default mux.
pub fn handle_func<F>(pattern: &str, f: F) -> IcapResult<()>
where
    F: for<'a> Fn(&'a mut ResponseWriter, &'a mut Request) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    handle(pattern, Arc::new(HandlerFunc(f)))
}

/// Handler view of the default mux, used when a server is built without an
/// explicit handler.
pub(crate) struct DefaultServeMux;

impl Handler for DefaultServeMux {
    fn serve_icap<'a>(
        &'a self,
        w: &'a mut ResponseWriter,
        req: &'a mut Request,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let matched = match DEFAULT_SERVE_MUX.read() {
                Ok(mux) => mux.matched(req.url.path()),
                Err(_) => None,
            };
            match matched {
                Some(h) => h.serve_icap(w, req).await,
                None => not_found(w, req).await,
            }
        })
    }
}
