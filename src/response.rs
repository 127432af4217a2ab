//! The response view of an exchange.
//!
//! Middleware never builds an `http::Response` by hand. It leaves a status,
//! headers and a [`Body`] on the response view, and the finalizer turns that
//! intent into bytes once the whole pipeline has unwound.

use std::sync::Arc;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, LOCATION, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::body::Body;
use crate::context::{Context, Exchange, ResponseState};
use crate::error::Error;
use crate::request::Request;
use crate::status;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Response::set_content_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

/// Full header value for a shorthand or media type, adding a UTF-8 charset
/// to textual types that do not name one.
fn content_type_for(value: &str) -> String {
    let full = crate::accepts::expand_type(value);
    let textual = full.starts_with("text/") || full == "application/json" || full == "application/javascript";
    if textual && !full.contains("charset") {
        format!("{full}; charset=utf-8")
    } else {
        full
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Read/write access to the outgoing response.
///
/// Mutations after the response was committed are ignored, except
/// [`Response::set_header`], which reports [`Error::HeadersSent`].
#[derive(Clone)]
pub struct Response {
    pub(crate) exchange: Arc<Exchange>,
}

impl Response {
    pub fn ctx(&self) -> Context {
        Context { exchange: Arc::clone(&self.exchange) }
    }

    pub fn request(&self) -> Request {
        Request { exchange: Arc::clone(&self.exchange) }
    }

    pub fn headers_sent(&self) -> bool {
        self.exchange.raw.headers_sent()
    }

    pub fn writable(&self) -> bool {
        self.exchange.raw.writable()
    }

    /// Runs `f` on the response state unless the response is already out.
    fn update<R>(&self, f: impl FnOnce(&mut ResponseState) -> R) -> Option<R> {
        if self.headers_sent() {
            debug!("response already sent, ignoring update");
            return None;
        }
        Some(f(&mut self.exchange.response.lock()))
    }

    // ── Status ────────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.exchange.response.lock().status
    }

    /// Sets the status explicitly. An empty status (204, 205, 304) also
    /// drops any body already set.
    pub fn set_status(&self, code: StatusCode) {
        self.update(|res| {
            res.status = code;
            res.explicit_status = true;
            res.message = None;
            if status::is_empty(code) && !res.body.is_empty() {
                clear_body(res);
            }
        });
    }

    /// Custom status message, or the reason phrase of the current status.
    pub fn message(&self) -> String {
        let res = self.exchange.response.lock();
        res.message.clone().unwrap_or_else(|| status::message(res.status))
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|res| res.message = Some(message));
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    /// Replaces the body.
    ///
    /// Unless a status was set explicitly, a body switches the status to
    /// `200` and an empty body switches it to `204`. The content type is
    /// inferred when none is set: `text/html` for strings starting with `<`,
    /// `text/plain` for other strings, `application/octet-stream` for bytes
    /// and streams, `application/json` for JSON values. Text and byte bodies
    /// also set `content-length`.
    pub fn set_body(&self, body: impl Into<Body>) {
        let body = body.into();
        self.update(|res| {
            if body.is_empty() {
                if !status::is_empty(res.status) {
                    res.status = StatusCode::NO_CONTENT;
                    res.explicit_status = true;
                    res.message = None;
                }
                clear_body(res);
                return;
            }

            if !res.explicit_status {
                res.status = StatusCode::OK;
                res.message = None;
            }
            let set_type = !res.headers.contains_key(CONTENT_TYPE);
            let inferred = match &body {
                Body::Text(s) if s.trim_start().starts_with('<') => ContentType::Html,
                Body::Text(_) | Body::Empty => ContentType::Text,
                Body::Bytes(_) | Body::Stream(_) => ContentType::OctetStream,
                Body::Json(_) => ContentType::Json,
            };
            match body.len() {
                Some(len) => {
                    res.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                }
                None => {
                    res.headers.remove(CONTENT_LENGTH);
                }
            }
            if set_type || matches!(body, Body::Json(_)) {
                res.headers.insert(CONTENT_TYPE, HeaderValue::from_static(inferred.as_str()));
            }
            res.body = body;
        });
    }

    /// Shorthand for `set_body(Body::json(value))`.
    pub fn set_json<T: Serialize + Send + 'static>(&self, value: T) {
        self.set_body(Body::json(value));
    }

    pub fn has_body(&self) -> bool {
        !self.exchange.response.lock().body.is_empty()
    }

    /// Takes the body out, leaving [`Body::Empty`] without touching status
    /// or headers. Pair with [`Response::set_body`] to transform a body on
    /// the way upstream.
    pub fn take_body(&self) -> Body {
        std::mem::take(&mut self.exchange.response.lock().body)
    }

    /// Runs `f` with the body borrowed.
    ///
    /// The body is detached while `f` runs, so `f` may use the context
    /// freely. It is put back afterwards unless `f` set a new body or an
    /// empty status in the meantime.
    pub fn with_body<R>(&self, f: impl FnOnce(&Body) -> R) -> R {
        let body = std::mem::take(&mut self.exchange.response.lock().body);
        let result = f(&body);

        let mut res = self.exchange.response.lock();
        if res.body.is_empty() && !status::is_empty(res.status) {
            res.body = body;
        }
        result
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    pub fn header(&self, name: &str) -> Option<String> {
        self.exchange
            .response
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn headers(&self) -> HeaderMap {
        self.exchange.response.lock().headers.clone()
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.update(|res| {
            res.headers.insert(name, value);
        })
        .ok_or(Error::HeadersSent)
    }

    pub fn append_header(&self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.update(|res| {
            res.headers.append(name, value);
        })
        .ok_or(Error::HeadersSent)
    }

    pub fn remove_header(&self, name: &str) {
        self.update(|res| res.headers.remove(name));
    }

    // ── Entity helpers ────────────────────────────────────────────────────────

    pub fn content_type(&self) -> Option<String> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Sets `content-type` from a shorthand (`"json"`, `"html"`, `".png"`)
    /// or a full media type.
    pub fn set_type(&self, value: &str) -> Result<(), Error> {
        self.set_header(CONTENT_TYPE.as_str(), &content_type_for(value))
    }

    pub fn set_content_type(&self, content_type: ContentType) {
        self.update(|res| {
            res.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        });
    }

    pub fn length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok())
    }

    pub fn set_length(&self, length: u64) {
        self.update(|res| {
            res.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        });
    }

    /// Redirects to `url` with `302 Found` unless a redirect status is
    /// already set, leaving a short text body for clients that show it.
    pub fn redirect(&self, url: &str) -> Result<(), Error> {
        self.set_header(LOCATION.as_str(), url)?;
        if !status::is_redirect(self.status()) {
            self.set_status(StatusCode::FOUND);
        }
        self.set_body(format!("Redirecting to {url}."));
        Ok(())
    }

    // ── Properties (delegating to the application's response prototype) ───────

    pub fn property<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.exchange.response.lock().props.get::<T>()
    }

    pub fn set_property<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.exchange.response.lock().props.insert(value)
    }
}

/// Drops the body together with the headers that described it.
pub(crate) fn clear_body(res: &mut ResponseState) {
    res.body = Body::Empty;
    res.headers.remove(CONTENT_TYPE);
    res.headers.remove(CONTENT_LENGTH);
    res.headers.remove(TRANSFER_ENCODING);
}
