//! Middleware trait and type erasure.
//!
//! A middleware is any async function of the shape
//!
//! ```text
//! async fn name(ctx: Context, next: Next) -> Result<(), Error>
//! ```
//!
//! Code before `next.await` runs on the way down, code after it runs on the
//! way back up. Not awaiting `next` at all ends the downstream pass at this
//! layer.
//!
//! # How middleware are stored
//!
//! The application holds middleware of many concrete types in one `Vec`, so
//! each is erased behind a trait object:
//!
//! ```text
//! async fn logger(ctx, next) -> Result<(), Error>   ← user writes this
//!        ↓ app.with(logger)
//! logger.into_boxed()                               ← Middleware blanket impl
//!        ↓
//! Arc::new(logger)  as  Arc<dyn Middleware>         ← BoxedMiddleware
//!        ↓
//! mw.call(ctx, next)  per layer, per request        ← one vtable dispatch
//! ```
//!
//! Built-in middleware:
//! - [`trace`]: a per-request span carrying method and path, closed with the status and latency

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

mod compose;
mod trace;

pub use compose::{Compose, Next, compose};
pub use trace::trace;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio run each exchange on any worker thread.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A type-erased middleware shared by every concurrent exchange.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// One layer of the onion.
///
/// Implemented automatically for every
/// `Fn(Context, Next) -> impl Future<Output = Result<(), Error>>`, and by
/// [`Compose`], so whole pipelines nest inside other pipelines.
///
/// The bound is the registration contract: something that is not shaped
/// like a middleware cannot be handed to
/// [`Application::with`](crate::Application::with) at all.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>>;

    fn into_boxed(self) -> BoxedMiddleware
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        Box::pin((self)(ctx, next))
    }
}
