//! The per-exchange context and the state it wraps.
//!
//! # Layout
//!
//! One [`Exchange`] is allocated per HTTP request/response cycle and shared
//! behind an `Arc`. [`Context`], [`Request`] and [`Response`] are three thin
//! handles over that same allocation, so each of them reaches the other two
//! and the raw handles without any reference cycle:
//!
//! ```text
//!            ┌──────────── Arc<Exchange> ────────────┐
//!  Context ──┤ app · original url · accepts · jar    │
//!  Request ──┤ Mutex<RequestState>   (raw request)   │
//! Response ──┤ Mutex<ResponseState> + RawResponse    │
//!            └───────────────────────────────────────┘
//! ```
//!
//! Cloning any handle is one atomic increment. Every lock is held only for
//! the duration of a single accessor call, never across an `.await`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::accepts::Accepts;
use crate::application::Shared;
use crate::body::{self, Body, RequestBody, ResponseBody};
use crate::cookies::{CookieJar, Cookies};
use crate::error::Error;
use crate::prototype::Delegate;
use crate::request::Request;
use crate::response::Response;
use crate::settings::Settings;

// ── Raw handles ───────────────────────────────────────────────────────────────

/// The writable side of one exchange.
///
/// Holds the channel the finished `http::Response` is delivered through.
/// Exactly one response can ever be sent; after that (or after the client
/// goes away) the handle is no longer writable.
pub struct RawResponse {
    outlet: Mutex<Option<oneshot::Sender<http::Response<ResponseBody>>>>,
    headers_sent: AtomicBool,
    aborted: AtomicBool,
}

impl RawResponse {
    /// A fresh handle plus the receiving end the transport waits on.
    pub fn channel() -> (Self, oneshot::Receiver<http::Response<ResponseBody>>) {
        let (tx, rx) = oneshot::channel();
        let raw = Self {
            outlet: Mutex::new(Some(tx)),
            headers_sent: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        };
        (raw, rx)
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent.load(Ordering::Acquire)
    }

    /// `false` once a response went out, the client left, or the transport
    /// stopped listening.
    pub fn writable(&self) -> bool {
        if self.headers_sent() || self.aborted.load(Ordering::Acquire) {
            return false;
        }
        self.outlet.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Delivers `response`. Returns `false` if something was already sent.
    pub(crate) fn send(&self, response: http::Response<ResponseBody>) -> bool {
        let Some(tx) = self.outlet.lock().take() else {
            return false;
        };
        self.headers_sent.store(true, Ordering::Release);
        tx.send(response).is_ok()
    }

    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Drops the outlet unused so the transport stops waiting.
    pub(crate) fn close(&self) {
        self.outlet.lock().take();
    }
}

// ── Exchange state ────────────────────────────────────────────────────────────

pub(crate) struct RequestState {
    pub(crate) parts: http::request::Parts,
    pub(crate) body: Option<RequestBody>,
    pub(crate) props: Delegate,
}

pub(crate) struct ResponseState {
    pub(crate) status: StatusCode,
    pub(crate) message: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) explicit_status: bool,
    pub(crate) respond: bool,
    pub(crate) props: Delegate,
}

pub(crate) struct Exchange {
    pub(crate) app: Arc<Shared>,
    pub(crate) original_url: String,
    pub(crate) accepts: Accepts,
    pub(crate) jar: CookieJar,
    pub(crate) request: Mutex<RequestState>,
    pub(crate) response: Mutex<ResponseState>,
    pub(crate) raw: RawResponse,
    props: Mutex<Delegate>,
    state: Mutex<Map<String, Value>>,
    errored: AtomicBool,
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything one middleware needs to know about the current exchange.
///
/// `Context` is a cheap, cloneable handle. Common request and response
/// accessors are available directly on it; the full surfaces live on
/// [`Context::request`] and [`Context::response`].
#[derive(Clone)]
pub struct Context {
    pub(crate) exchange: Arc<Exchange>,
}

impl Context {
    /// Builds the context for one exchange.
    ///
    /// Wires the views to one shared allocation, records the original URL,
    /// parses cookies and `Accept*` headers, and starts with an empty state
    /// bag and a `404` response. Nothing is written to the wire.
    pub(crate) fn new(app: Arc<Shared>, request: http::Request<RequestBody>, raw: RawResponse) -> Self {
        let (parts, body) = request.into_parts();
        let original_url = request_target(&parts.uri);
        let accepts = Accepts::from_headers(&parts.headers);
        let jar = CookieJar::from_headers(&parts.headers, app.keys.clone());

        let exchange = Exchange {
            request: Mutex::new(RequestState {
                parts,
                body: Some(body),
                props: Delegate::new(app.request.clone()),
            }),
            response: Mutex::new(ResponseState {
                status: StatusCode::NOT_FOUND,
                message: None,
                headers: HeaderMap::new(),
                body: Body::Empty,
                explicit_status: false,
                respond: true,
                props: Delegate::new(app.response.clone()),
            }),
            props: Mutex::new(Delegate::new(app.context.clone())),
            state: Mutex::new(Map::new()),
            errored: AtomicBool::new(false),
            original_url,
            accepts,
            jar,
            raw,
            app,
        };
        Self { exchange: Arc::new(exchange) }
    }

    pub fn request(&self) -> Request {
        Request { exchange: Arc::clone(&self.exchange) }
    }

    pub fn response(&self) -> Response {
        Response { exchange: Arc::clone(&self.exchange) }
    }

    pub fn settings(&self) -> &Settings {
        &self.exchange.app.settings
    }

    /// The request target as it arrived, unaffected by later rewrites.
    pub fn original_url(&self) -> &str {
        &self.exchange.original_url
    }

    pub fn accepts(&self) -> &Accepts {
        &self.exchange.accepts
    }

    pub fn cookies(&self) -> Cookies<'_> {
        Cookies::new(self)
    }

    // ── State bag ─────────────────────────────────────────────────────────────

    /// Reads one entry of the free-form state bag.
    pub fn state(&self, key: &str) -> Option<Value> {
        self.exchange.state.lock().get(key).cloned()
    }

    pub fn set_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.exchange.state.lock().insert(key.into(), value.into());
    }

    /// Runs `f` with the whole state bag borrowed mutably.
    ///
    /// The bag is detached while `f` runs, so `f` may use the context
    /// freely. Entries written through the context meanwhile are merged back
    /// on top of `f`'s edits.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut bag = std::mem::take(&mut *self.exchange.state.lock());
        let result = f(&mut bag);

        let mut state = self.exchange.state.lock();
        let written = std::mem::replace(&mut *state, bag);
        state.extend(written);
        result
    }

    // ── Properties (delegating to the application's context prototype) ────────

    pub fn property<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.exchange.props.lock().get::<T>()
    }

    pub fn set_property<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.exchange.props.lock().insert(value)
    }

    pub fn remove_property<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.exchange.props.lock().remove::<T>()
    }

    // ── Request delegation ────────────────────────────────────────────────────

    pub fn method(&self) -> Method {
        self.request().method()
    }

    pub fn url(&self) -> String {
        self.request().url()
    }

    pub fn path(&self) -> String {
        self.request().path()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.request().header(name)
    }

    // ── Response delegation ───────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.response().status()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.response().set_status(status);
    }

    pub fn set_body(&self, body: impl Into<Body>) {
        self.response().set_body(body);
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), Error> {
        self.response().set_header(name, value)
    }

    pub fn writable(&self) -> bool {
        self.exchange.raw.writable()
    }

    /// Pass `false` when a middleware sends the response itself through
    /// [`Context::send_raw`]; the finalizer then leaves the exchange alone.
    pub fn set_respond(&self, respond: bool) {
        self.exchange.response.lock().respond = respond;
    }

    /// Sends a fully built response, bypassing the finalizer.
    pub fn send_raw(&self, response: http::Response<ResponseBody>) -> Result<(), Error> {
        self.set_respond(false);
        if self.exchange.raw.send(response) { Ok(()) } else { Err(Error::HeadersSent) }
    }

    /// `Ok(())` when `condition` holds, otherwise an [`Error`] with `status`.
    pub fn assert(&self, condition: bool, status: StatusCode, message: &str) -> Result<(), Error> {
        if condition { Ok(()) } else { Err(Error::new(status, message)) }
    }

    // ── Error handling ────────────────────────────────────────────────────────

    /// The error handler bound to this exchange.
    ///
    /// Hands `err` to the application's error listener, then answers the
    /// client with a plain-text error response if the response is still
    /// writable. Every error reaches the listener; only the first one is
    /// written.
    pub fn on_error(&self, err: Error) {
        (self.exchange.app.on_error)(&err, self);

        if self.exchange.errored.swap(true, Ordering::AcqRel) {
            debug!(error = %err, "error response already handled for this exchange");
            return;
        }

        let raw = &self.exchange.raw;
        if raw.headers_sent() || !raw.writable() {
            return;
        }

        let status = err.status();
        let message = if err.expose() { err.to_string() } else { crate::status::message(status) };
        let response = http::Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(http::header::CONTENT_LENGTH, message.len())
            .body(body::full(message));

        match response {
            Ok(response) => {
                {
                    let mut res = self.exchange.response.lock();
                    res.status = status;
                    res.headers.clear();
                    res.body = Body::Empty;
                }
                raw.send(response);
            }
            Err(e) => debug!(error = %e, "could not build error response"),
        }
    }
}

/// Path plus query, the way it appeared on the request line.
pub(crate) fn request_target(uri: &http::Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| uri.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::application::Application;

    /// A context over `GET uri` with its raw response channel.
    pub(crate) fn context_for(
        app: &Application,
        request: http::Request<Full<Bytes>>,
    ) -> (Context, oneshot::Receiver<http::Response<ResponseBody>>) {
        let (raw, rx) = RawResponse::channel();
        let ctx = app.callback().create_context(request, raw);
        (ctx, rx)
    }

    fn get(uri: &str) -> http::Request<Full<Bytes>> {
        http::Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn views_share_one_exchange() {
        let app = Application::new();
        let (ctx, _rx) = context_for(&app, get("/a?b=1"));

        ctx.response().set_status(StatusCode::CREATED);
        assert_eq!(ctx.request().response().status(), StatusCode::CREATED);
        assert_eq!(ctx.response().request().url(), "/a?b=1");
        assert_eq!(ctx.request().ctx().original_url(), "/a?b=1");
    }

    #[test]
    fn starts_as_404_with_an_empty_state_bag() {
        let app = Application::new();
        let (ctx, _rx) = context_for(&app, get("/"));
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        assert!(ctx.with_state(|s| s.is_empty()));
        assert!(ctx.writable());
        assert!(!ctx.response().headers_sent());
    }

    #[test]
    fn original_url_survives_rewrites() {
        let app = Application::new();
        let (ctx, _rx) = context_for(&app, get("/old?x=1"));
        ctx.request().set_url("/new").unwrap();
        assert_eq!(ctx.url(), "/new");
        assert_eq!(ctx.original_url(), "/old?x=1");
    }

    #[test]
    fn state_bag_round_trips_values() {
        let app = Application::new();
        let (ctx, _rx) = context_for(&app, get("/"));
        ctx.set_state("user", serde_json::json!({"id": 7}));
        assert_eq!(ctx.state("user").unwrap()["id"], 7);
        assert_eq!(ctx.state("missing"), None);
    }

    #[test]
    fn with_state_lets_the_closure_use_the_context() {
        let app = Application::new();
        let (ctx, _rx) = context_for(&app, get("/"));
        ctx.set_state("a", 1);

        let len = ctx.with_state(|bag| {
            bag.insert("b".to_owned(), Value::from(2));
            ctx.set_state("c", 3);
            assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
            bag.len()
        });

        assert_eq!(len, 2);
        assert_eq!(ctx.state("a"), Some(Value::from(1)));
        assert_eq!(ctx.state("b"), Some(Value::from(2)));
        assert_eq!(ctx.state("c"), Some(Value::from(3)));
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn prototype_properties_reach_new_contexts() {
        let app = Application::new();
        let (before, _rx) = context_for(&app, get("/"));
        app.context().insert(Tenant("acme"));
        let (after, _rx2) = context_for(&app, get("/"));

        assert_eq!(after.property::<Tenant>(), Some(Tenant("acme")));
        // delegation, not copying: older contexts see it too
        assert_eq!(before.property::<Tenant>(), Some(Tenant("acme")));

        after.set_property(Tenant("shadow"));
        assert_eq!(after.property::<Tenant>(), Some(Tenant("shadow")));
        assert_eq!(before.property::<Tenant>(), Some(Tenant("acme")));
    }

    #[tokio::test]
    async fn error_handler_reports_every_error_but_writes_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let app = Application::new().on_error(move |err, _ctx| sink.lock().push(err.to_string()));
        let (ctx, rx) = context_for(&app, get("/"));

        ctx.on_error(Error::new(StatusCode::FORBIDDEN, "members only"));
        ctx.on_error(Error::other("second failure"));

        assert_eq!(*seen.lock(), ["members only", "second failure"]);
        let res = rx.await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
        assert_eq!(res.headers()["content-length"], "12");
        assert!(ctx.response().headers_sent());
        assert!(!ctx.writable());
    }

    #[tokio::test]
    async fn hidden_errors_answer_with_the_reason_phrase() {
        use http_body_util::BodyExt;

        let app = Application::new().silent(true);
        let (ctx, rx) = context_for(&app, get("/"));
        ctx.on_error(Error::other("database password is hunter2"));

        let res = rx.await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, "Internal Server Error");
    }

    #[test]
    fn raw_response_stops_being_writable_after_abort() {
        let (raw, _rx) = RawResponse::channel();
        assert!(raw.writable());
        raw.abort();
        assert!(!raw.writable());
    }

    #[test]
    fn raw_response_is_not_writable_once_the_receiver_is_gone() {
        let (raw, rx) = RawResponse::channel();
        drop(rx);
        assert!(!raw.writable());
    }
}
