//! Onion composition.
//!
//! [`compose`] folds an ordered list of middleware into one [`Compose`]
//! value. Running it against a [`Context`] calls middleware 0 with a [`Next`]
//! that runs middleware 1, whose `Next` runs middleware 2, and so on. The
//! `Next` handed to the last middleware resolves immediately, or continues
//! into the enclosing pipeline when this one is nested.
//!
//! ```text
//!   A before ─▶ B before ─▶ C before
//!                                  │
//!   A after  ◀─ B after  ◀─ C after
//! ```
//!
//! `Compose` itself holds no per-exchange state. Each run allocates one small
//! cursor shared by the `Next` handles of that run; it records the deepest
//! layer dispatched so far, which is what catches a `Next` awaited twice.

use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{BoxFuture, BoxedMiddleware, Middleware};
use crate::context::Context;
use crate::error::Error;

/// Composes `middleware` into a single pipeline, in iteration order.
pub fn compose<I>(middleware: I) -> Compose
where
    I: IntoIterator<Item = BoxedMiddleware>,
{
    Compose { stack: middleware.into_iter().collect() }
}

/// A composed, immutable middleware pipeline.
#[derive(Clone)]
pub struct Compose {
    stack: Arc<[BoxedMiddleware]>,
}

impl Compose {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Runs the whole pipeline against `ctx`.
    pub fn run(&self, ctx: Context) -> BoxFuture<Result<(), Error>> {
        self.start(ctx, None)
    }

    /// Runs the pipeline, continuing into `next` once the last layer awaits
    /// its own `Next`.
    pub fn run_with(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        self.start(ctx, Some(next))
    }

    fn start(&self, ctx: Context, tail: Option<Next>) -> BoxFuture<Result<(), Error>> {
        let cursor = Arc::new(Cursor {
            stack: Arc::clone(&self.stack),
            tail,
            dispatched: AtomicUsize::new(0),
        });
        dispatch(cursor, ctx, 0)
    }
}

impl Middleware for Compose {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        self.run_with(ctx, next)
    }
}

/// Per-run dispatch state.
struct Cursor {
    stack: Arc<[BoxedMiddleware]>,
    tail: Option<Next>,
    /// One past the highest index dispatched so far (0 = nothing yet).
    dispatched: AtomicUsize,
}

/// The rest of the pipeline below the current middleware.
///
/// Await it (`next.await?`) to run every deeper layer; control returns once
/// they have all unwound. [`Next::run`] does the same through `&self`.
/// Running the same `Next` twice fails with
/// [`Error::NextCalledMultipleTimes`] without touching the deeper layers.
#[derive(Clone)]
pub struct Next {
    cursor: Arc<Cursor>,
    ctx: Context,
    index: usize,
}

impl Next {
    pub fn run(&self) -> BoxFuture<Result<(), Error>> {
        dispatch(Arc::clone(&self.cursor), self.ctx.clone(), self.index)
    }
}

impl IntoFuture for Next {
    type Output = Result<(), Error>;
    type IntoFuture = BoxFuture<Result<(), Error>>;

    fn into_future(self) -> Self::IntoFuture {
        dispatch(self.cursor, self.ctx, self.index)
    }
}

fn dispatch(cursor: Arc<Cursor>, ctx: Context, index: usize) -> BoxFuture<Result<(), Error>> {
    // Layers are entered strictly deeper each time; re-entering at or above
    // the deepest layer reached means some `Next` ran twice.
    if cursor.dispatched.fetch_max(index + 1, Ordering::AcqRel) > index {
        return Box::pin(async { Err(Error::NextCalledMultipleTimes) });
    }

    match cursor.stack.get(index) {
        Some(mw) => {
            let mw = Arc::clone(mw);
            let next = Next { cursor: Arc::clone(&cursor), ctx: ctx.clone(), index: index + 1 };
            mw.call(ctx, next)
        }
        None => match &cursor.tail {
            Some(outer) => outer.run(),
            None => Box::pin(async { Ok(()) }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    use super::*;
    use crate::application::Application;
    use crate::context::tests::context_for;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn ctx() -> (Context, impl Sized) {
        let app = Application::new();
        let req = http::Request::builder().uri("/").body(Full::new(Bytes::new())).unwrap();
        context_for(&app, req)
    }

    fn recorder(name: &'static str, trace: &Trace) -> BoxedMiddleware {
        let trace = Arc::clone(trace);
        (move |_ctx: Context, next: Next| {
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().unwrap().push(format!("{name}-before"));
                next.await?;
                trace.lock().unwrap().push(format!("{name}-after"));
                Ok::<_, Error>(())
            }
        })
        .into_boxed()
    }

    #[tokio::test]
    async fn onion_order() {
        let trace = Trace::default();
        let pipeline = compose([
            recorder("A", &trace),
            recorder("B", &trace),
            recorder("C", &trace),
        ]);

        let (ctx, _rx) = ctx();
        pipeline.run(ctx).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            ["A-before", "B-before", "C-before", "C-after", "B-after", "A-after"]
        );
    }

    #[tokio::test]
    async fn empty_pipeline_completes() {
        let (ctx, _rx) = ctx();
        let pipeline = compose(Vec::<BoxedMiddleware>::new());
        assert!(pipeline.is_empty());
        pipeline.run(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn next_twice_is_rejected() {
        let downstream_runs = Arc::new(AtomicUsize::new(0));
        let runs = Arc::clone(&downstream_runs);

        let twice = |_ctx: Context, next: Next| async move {
            next.run().await?;
            next.run().await
        };
        let counter = move |_ctx: Context, _next: Next| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
        };

        let (ctx, _rx) = ctx();
        let err = compose([twice.into_boxed(), counter.into_boxed()]).run(ctx).await.unwrap_err();

        assert!(matches!(err, Error::NextCalledMultipleTimes));
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_propagate_through_unguarded_layers() {
        let trace = Trace::default();
        let failing = |_ctx: Context, _next: Next| async {
            Err::<(), _>(Error::new(StatusCode::IM_A_TEAPOT, "short and stout"))
        };

        let (ctx, _rx) = ctx();
        let err = compose([recorder("A", &trace), failing.into_boxed()])
            .run(ctx)
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::IM_A_TEAPOT);
        // A never reached its upstream half
        assert_eq!(*trace.lock().unwrap(), ["A-before"]);
    }

    #[tokio::test]
    async fn a_layer_can_recover_from_downstream_errors() {
        let guard = |ctx: Context, next: Next| async move {
            if let Err(err) = next.await {
                ctx.set_status(err.status());
                ctx.set_body(err.to_string());
            }
            Ok::<_, Error>(())
        };
        let failing = |_ctx: Context, _next: Next| async {
            Err::<(), _>(Error::new(StatusCode::CONFLICT, "taken"))
        };

        let (ctx, _rx) = ctx();
        compose([guard.into_boxed(), failing.into_boxed()]).run(ctx.clone()).await.unwrap();
        assert_eq!(ctx.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn short_circuit_skips_deeper_layers() {
        let trace = Trace::default();
        let stop = |ctx: Context, _next: Next| async move {
            ctx.set_body("stopped");
            Ok::<_, Error>(())
        };

        let (ctx, _rx) = ctx();
        compose([stop.into_boxed(), recorder("B", &trace)]).run(ctx).await.unwrap();
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nested_pipelines_continue_into_the_outer_next() {
        let trace = Trace::default();
        let inner = compose([recorder("X", &trace), recorder("Y", &trace)]);
        let outer = compose([recorder("A", &trace), inner.into_boxed(), recorder("B", &trace)]);

        let (ctx, _rx) = ctx();
        outer.run(ctx).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            [
                "A-before", "X-before", "Y-before", "B-before",
                "B-after", "Y-after", "X-after", "A-after",
            ]
        );
    }

    #[tokio::test]
    async fn one_pipeline_serves_many_exchanges() {
        let trace = Trace::default();
        let pipeline = compose([recorder("A", &trace)]);
        for _ in 0..3 {
            let (ctx, _rx) = ctx();
            pipeline.run(ctx).await.unwrap();
        }
        assert_eq!(trace.lock().unwrap().len(), 6);
    }
}
