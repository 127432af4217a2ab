//! Per-request tracing span.

use std::future::IntoFuture;
use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use super::Next;
use crate::context::Context;
use crate::error::Error;

/// Wraps everything downstream in an `http.request` span carrying the
/// method and path, then logs the final status and latency.
///
/// Register it first so the span covers every other layer:
///
/// ```rust,no_run
/// use strata::{Application, middleware};
///
/// let app = Application::new().with(middleware::trace);
/// ```
pub async fn trace(ctx: Context, next: Next) -> Result<(), Error> {
    let span = info_span!("http.request", method = %ctx.method(), path = %ctx.path());
    let started = Instant::now();

    let result = next.into_future().instrument(span.clone()).await;

    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    match &result {
        Ok(()) => info!(parent: &span, status = ctx.status().as_u16(), latency_ms, "request completed"),
        Err(err) => warn!(parent: &span, status = err.status().as_u16(), latency_ms, error = %err, "request failed"),
    }
    result
}
