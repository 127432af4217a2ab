//! Response finalization.
//!
//! Runs once, after the pipeline unwound successfully, and turns the
//! response intent left on the context into exactly one `http::Response`:
//!
//! 1. bypassed (`respond == false`, not writable, already sent) → nothing
//! 2. empty status (204, 205, 304) → no body, entity headers stripped
//! 3. `HEAD` → no body; JSON still gets its `content-length`
//! 4. no body → the status message as `text/plain`
//! 5. text, bytes → verbatim; streams → piped chunk by chunk
//! 6. JSON → serialized, with `content-length`

use futures_util::TryStreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::body::{self, Body, ResponseBody};
use crate::context::Context;
use crate::error::Error;
use crate::response::{ContentType, clear_body};
use crate::status;

pub(crate) fn respond(ctx: &Context) -> Result<(), Error> {
    let exchange = &ctx.exchange;
    let raw = &exchange.raw;

    if !exchange.response.lock().respond {
        debug!("respond disabled, leaving the exchange to the middleware");
        return Ok(());
    }
    if raw.headers_sent() || !raw.writable() {
        return Ok(());
    }

    let method = exchange.request.lock().parts.method.clone();
    let mut res = exchange.response.lock();
    let code = res.status;

    if status::is_empty(code) {
        clear_body(&mut res);
        let headers = std::mem::take(&mut res.headers);
        drop(res);
        return send(ctx, code, headers, body::empty());
    }

    if method == Method::HEAD {
        if let Body::Json(value) = &res.body {
            let len = value.to_json()?.len();
            res.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        let headers = std::mem::take(&mut res.headers);
        drop(res);
        return send(ctx, code, headers, body::empty());
    }

    let payload = match std::mem::take(&mut res.body) {
        Body::Empty => {
            let text = res.message.clone().unwrap_or_else(|| status::message(code));
            res.headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
            res.headers.insert(CONTENT_LENGTH, HeaderValue::from(text.len()));
            body::full(text)
        }
        Body::Bytes(bytes) => body::full(bytes),
        Body::Text(text) => body::full(text),
        Body::Stream(stream) => {
            // the context is no longer writable once headers are out, so the
            // error handler only reports a failing stream
            let ctx = ctx.clone();
            body::streaming(Box::pin(stream.inspect_err(move |e| {
                ctx.on_error(Error::Other(e.to_string().into()));
            })))
        }
        Body::Json(value) => {
            let json = value.to_json()?;
            res.headers.insert(CONTENT_LENGTH, HeaderValue::from(json.len()));
            body::full(json)
        }
    };

    let headers = std::mem::take(&mut res.headers);
    drop(res);
    send(ctx, code, headers, payload)
}

fn send(ctx: &Context, status: StatusCode, headers: HeaderMap, payload: ResponseBody) -> Result<(), Error> {
    let mut response = http::Response::new(payload);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    if !ctx.exchange.raw.send(response) {
        debug!("transport stopped waiting before the response was sent");
    }
    Ok(())
}
