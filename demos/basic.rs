//! Minimal strata example: a logger, a response timer, and a few endpoints
//! dispatched by hand.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/echo -d 'hello'
//!   curl -i http://localhost:3000/private
//!   curl -I http://localhost:3000/

use std::time::Instant;

use http::{Method, StatusCode};
use serde::Serialize;
use strata::{Application, Context, Error, Next, middleware};

#[derive(Serialize)]
struct User {
    id: String,
    name: &'static str,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    Application::new()
        .with(middleware::trace)
        .with(response_time)
        .with(endpoints)
        .listen("0.0.0.0:3000")
        .await
}

// X-Response-Time, set on the way back up
async fn response_time(ctx: Context, next: Next) -> Result<(), Error> {
    let started = Instant::now();
    next.await?;
    let elapsed = started.elapsed().as_micros();
    ctx.set_header("x-response-time", &format!("{elapsed}us"))
}

async fn endpoints(ctx: Context, _next: Next) -> Result<(), Error> {
    let path = ctx.path();
    match (ctx.method(), path.as_str()) {
        (Method::GET | Method::HEAD, "/") => ctx.set_body("Hello World"),
        (Method::GET, p) if p.starts_with("/users/") => {
            let id = p.trim_start_matches("/users/").to_owned();
            ctx.response().set_json(User { id, name: "alice" });
        }
        (Method::POST, "/echo") => {
            let body = ctx.request().bytes().await?;
            ctx.set_body(body);
        }
        (Method::GET, "/private") => {
            ctx.assert(ctx.header("authorization").is_some(), StatusCode::UNAUTHORIZED, "login first")?;
            ctx.set_body("welcome back");
        }
        // anything else keeps the default 404
        _ => {}
    }
    Ok(())
}
