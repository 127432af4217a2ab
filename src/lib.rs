//! # strata
//!
//! A small middleware-composition web framework on hyper and tokio.
//!
//! An [`Application`] holds an ordered list of middleware. Every request
//! gets one [`Context`], and the middleware run as an onion around it: each
//! one does some work, awaits [`Next`] to run everything below it, and then
//! does more work on the way back up. When the pipeline unwinds, the response
//! intent left on the context is written out exactly once.
//!
//! What strata deliberately leaves to other crates or to the proxy in front:
//! routing, body parsing, static files, sessions, TLS.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Instant;
//!
//! use strata::{Application, Context, Error, Next};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     Application::new()
//!         .with(response_time)
//!         .with(hello)
//!         .listen("0.0.0.0:3000")
//!         .await
//! }
//!
//! async fn response_time(ctx: Context, next: Next) -> Result<(), Error> {
//!     let started = Instant::now();
//!     next.await?;
//!     let ms = started.elapsed().as_millis().to_string();
//!     ctx.set_header("x-response-time", &format!("{ms}ms"))
//! }
//!
//! async fn hello(ctx: Context, _next: Next) -> Result<(), Error> {
//!     ctx.set_body("Hello World");
//!     Ok(())
//! }
//! ```

mod accepts;
mod application;
mod body;
mod context;
mod cookies;
mod error;
mod prototype;
mod request;
mod respond;
mod response;
mod server;
mod settings;

pub mod middleware;
pub mod status;

pub use accepts::Accepts;
pub use application::{Application, Callback, ErrorListener, format_report, report};
pub use body::{Body, BodyStream, JsonBody, RequestBody, ResponseBody};
pub use context::{Context, RawResponse};
pub use cookies::{CookieOptions, Cookies, Keys, SameSite};
pub use error::{BoxError, Error};
pub use middleware::{Compose, Middleware, Next, compose};
pub use prototype::Prototype;
pub use request::{RemoteAddr, Request};
pub use response::{ContentType, Response};
pub use server::Server;
pub use settings::Settings;
