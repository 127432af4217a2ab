//! The application: middleware registration, settings, prototypes, and the
//! per-exchange executor.

use std::any::Any;
use std::error::Error as _;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::StatusCode;
use tracing::{debug, error};

use crate::body::{self, ResponseBody};
use crate::context::{Context, RawResponse};
use crate::cookies::Keys;
use crate::error::{BoxError, Error};
use crate::middleware::{BoxedMiddleware, Compose, Middleware, compose};
use crate::prototype::Prototype;
use crate::respond::respond;
use crate::server::Server;
use crate::settings::Settings;

/// Receives every error an exchange fails with.
pub type ErrorListener = Arc<dyn Fn(&Error, &Context) + Send + Sync + 'static>;

/// Application-wide state every exchange reads.
pub(crate) struct Shared {
    pub(crate) settings: Settings,
    pub(crate) keys: Keys,
    pub(crate) context: Prototype,
    pub(crate) request: Prototype,
    pub(crate) response: Prototype,
    pub(crate) on_error: ErrorListener,
}

// ── Application ───────────────────────────────────────────────────────────────

/// A middleware application.
///
/// Register middleware in order with [`Application::with`], then either
/// [`listen`](Application::listen) or hand [`Application::callback`] to your
/// own hyper server.
///
/// ```rust,no_run
/// use strata::{Application, Context, Error, Next};
///
/// async fn hello(ctx: Context, _next: Next) -> Result<(), Error> {
///     ctx.set_body("hello");
///     Ok(())
/// }
///
/// # async fn run() -> Result<(), Error> {
/// Application::new()
///     .with(strata::middleware::trace)
///     .with(hello)
///     .listen("0.0.0.0:3000")
///     .await
/// # }
/// ```
pub struct Application {
    settings: Settings,
    keys: Keys,
    middleware: Vec<BoxedMiddleware>,
    context: Prototype,
    request: Prototype,
    response: Prototype,
    listener: Option<ErrorListener>,
}

impl Application {
    /// A new application configured from the environment (see
    /// [`Settings::from_env`]).
    pub fn new() -> Self {
        Self::with_settings(Settings::from_env())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            keys: Keys::default(),
            middleware: Vec::new(),
            context: Prototype::new(),
            request: Prototype::new(),
            response: Prototype::new(),
            listener: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.settings.env = env.into();
        self
    }

    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.settings.subdomain_offset = offset;
        self
    }

    /// Silences the default error listener.
    pub fn silent(mut self, silent: bool) -> Self {
        self.settings.silent = silent;
        self
    }

    /// Keys for signed cookies. The first key signs; all keys verify.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        self.keys = Keys::new(keys);
        self
    }

    /// Appends a middleware. Returns `self` so registrations chain.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.push(middleware);
        self
    }

    /// Appends a middleware through a mutable borrow.
    pub fn push<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        debug!(middleware = std::any::type_name::<M>(), "use");
        self.middleware.push(middleware.into_boxed());
        self
    }

    /// The context prototype. Properties inserted here show up on every
    /// [`Context`], including contexts created before the insertion.
    pub fn context(&self) -> &Prototype {
        &self.context
    }

    /// The prototype behind every [`Request`](crate::Request) view.
    pub fn request(&self) -> &Prototype {
        &self.request
    }

    /// The prototype behind every [`Response`](crate::Response) view.
    pub fn response(&self) -> &Prototype {
        &self.response
    }

    /// Replaces the default error listener ([`report`]).
    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Error, &Context) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// The public settings, as JSON. Keys and the silent flag are left out.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    /// Freezes the current middleware into a request handler.
    ///
    /// Middleware registered afterwards only affect later callbacks.
    /// Prototypes stay shared, so properties added later are still seen.
    pub fn callback(&self) -> Callback {
        let on_error = self
            .listener
            .clone()
            .unwrap_or_else(|| Arc::new(|err: &Error, ctx: &Context| report(err, ctx.settings())));
        let shared = Shared {
            settings: self.settings.clone(),
            keys: self.keys.clone(),
            context: self.context.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
            on_error,
        };
        Callback {
            shared: Arc::new(shared),
            pipeline: compose(self.middleware.iter().cloned()),
        }
    }

    /// Shorthand for `Server::bind(addr).serve(self.callback())`.
    pub async fn listen(&self, addr: &str) -> Result<(), Error> {
        debug!(addr, "listen");
        Server::bind(addr).serve(self.callback()).await
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// ── Callback ──────────────────────────────────────────────────────────────────

/// An immutable request handler produced by [`Application::callback`].
///
/// Cheap to clone; every clone shares one composed pipeline.
#[derive(Clone)]
pub struct Callback {
    shared: Arc<Shared>,
    pipeline: Compose,
}

impl Callback {
    /// Builds the [`Context`] for one exchange without running anything.
    pub fn create_context<B>(&self, request: http::Request<B>, raw: RawResponse) -> Context
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Context::new(Arc::clone(&self.shared), request.map(body::erase), raw)
    }

    /// Runs one exchange on its own task and returns its context right away.
    ///
    /// The response starts as `404`. When the pipeline completes, the
    /// finalizer writes the response; when it fails or panics, the context
    /// error handler does instead. Never both.
    pub fn handle_exchange<B>(&self, request: http::Request<B>, raw: RawResponse) -> Context
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let ctx = self.create_context(request, raw);
        tokio::spawn(run(self.pipeline.clone(), ctx.clone()));
        ctx
    }

    /// Handles one request end to end. Suitable for hyper's `service_fn`.
    ///
    /// If this future is dropped before the response is ready (the client
    /// went away), the exchange is marked unwritable and its error handler
    /// runs. The pipeline itself keeps running to completion.
    pub async fn handle<B>(&self, request: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (raw, rx) = RawResponse::channel();
        let ctx = self.handle_exchange(request, raw);
        let mut finished = OnFinished(Some(ctx.clone()));

        let sent = rx.await;
        finished.disarm();

        match sent {
            Ok(response) => response,
            Err(_) => {
                // respond(false) and nothing sent: fall back to an empty body
                debug!(status = %ctx.status(), "no response written by middleware");
                let mut response = http::Response::new(body::empty());
                *response.status_mut() = ctx.status();
                response
            }
        }
    }
}

async fn run(pipeline: Compose, ctx: Context) {
    let outcome = AssertUnwindSafe(pipeline.run(ctx.clone())).catch_unwind().await;
    let result = match outcome {
        Ok(Ok(())) => respond(&ctx),
        Ok(Err(err)) => Err(err),
        Err(panic) => Err(Error::Panicked(panic_message(panic))),
    };
    if let Err(err) = result {
        ctx.on_error(err);
    }
    ctx.exchange.raw.close();
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// Fires the context error handler if the transport stops waiting early.
struct OnFinished(Option<Context>);

impl OnFinished {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for OnFinished {
    fn drop(&mut self) {
        if let Some(ctx) = self.0.take() {
            debug!("connection closed before the response was sent");
            ctx.exchange.raw.abort();
            ctx.on_error(Error::ClientAborted);
        }
    }
}

// ── Default error listener ────────────────────────────────────────────────────

/// The default error listener.
///
/// Panics are always reported. Other errors are skipped when their status
/// is `404`, when they are exposed, when the application is silent, or when
/// `env` is `"test"`. Reports go to `tracing::error!`, formatted by
/// [`format_report`].
pub fn report(err: &Error, settings: &Settings) {
    if should_report(err, settings) {
        error!("{}", format_report(err));
    }
}

pub(crate) fn should_report(err: &Error, settings: &Settings) -> bool {
    if err.is_panic() {
        return true;
    }
    !(err.status() == StatusCode::NOT_FOUND || err.expose() || settings.silent || settings.env == "test")
}

/// The error and its sources, one per line, each indented by two spaces and
/// the whole block framed by blank lines. A source whose message is already
/// part of the text above it is not repeated.
pub fn format_report(err: &Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !text.contains(&message) {
            text.push_str(&format!("\ncaused by: {message}"));
        }
        source = cause.source();
    }
    let indented: Vec<String> = text.lines().map(|line| format!("  {line}")).collect();
    format!("\n{}\n", indented.join("\n"))
}
