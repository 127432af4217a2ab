//! The request view of an exchange.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};

use crate::accepts::Accepts;
use crate::body::RequestBody;
use crate::context::{Context, Exchange, request_target};
use crate::error::{BoxError, Error};
use crate::response::Response;

/// The peer address of the connection, attached to requests by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Read access to the incoming request, plus URL rewriting.
///
/// A handle onto the same exchange as its [`Context`]; cheap to clone.
#[derive(Clone)]
pub struct Request {
    pub(crate) exchange: Arc<Exchange>,
}

impl Request {
    pub fn ctx(&self) -> Context {
        Context { exchange: Arc::clone(&self.exchange) }
    }

    pub fn response(&self) -> Response {
        Response { exchange: Arc::clone(&self.exchange) }
    }

    pub fn method(&self) -> Method {
        self.exchange.request.lock().parts.method.clone()
    }

    pub fn uri(&self) -> Uri {
        self.exchange.request.lock().parts.uri.clone()
    }

    /// Path and query of the (possibly rewritten) request target.
    pub fn url(&self) -> String {
        request_target(&self.exchange.request.lock().parts.uri)
    }

    /// Rewrites the request target. [`Request::original_url`] is unaffected.
    pub fn set_url(&self, url: &str) -> Result<(), Error> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            Error::new(http::StatusCode::BAD_REQUEST, e.to_string())
        })?;
        self.exchange.request.lock().parts.uri = uri;
        Ok(())
    }

    pub fn original_url(&self) -> &str {
        &self.exchange.original_url
    }

    pub fn path(&self) -> String {
        self.exchange.request.lock().parts.uri.path().to_owned()
    }

    /// The raw query string, without the leading `?`.
    pub fn query_string(&self) -> String {
        self.exchange.request.lock().parts.uri.query().unwrap_or_default().to_owned()
    }

    /// Decoded query pairs in order of appearance.
    pub fn query(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query_string().as_bytes())
            .into_owned()
            .collect()
    }

    /// First decoded value for `key` in the query string.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Case-insensitive header lookup. Non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<String> {
        self.exchange
            .request
            .lock()
            .parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn headers(&self) -> HeaderMap {
        self.exchange.request.lock().parts.headers.clone()
    }

    /// `Host` header, or the authority of an absolute-form target (HTTP/2).
    pub fn host(&self) -> Option<String> {
        let req = self.exchange.request.lock();
        req.parts
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .or_else(|| req.parts.uri.authority().map(|a| a.as_str().to_owned()))
    }

    /// [`Request::host`] without the port.
    pub fn hostname(&self) -> Option<String> {
        let host = self.host()?;
        if let Some(rest) = host.strip_prefix('[') {
            // IPv6 literal
            return rest.split(']').next().map(str::to_owned);
        }
        Some(host.split(':').next().unwrap_or_default().to_owned())
    }

    /// Host labels left of the root domain, nearest first.
    ///
    /// With the default offset of 2, `tobi.ferrets.example.com` yields
    /// `["ferrets", "tobi"]`. IP hosts have no subdomains.
    pub fn subdomains(&self) -> Vec<String> {
        let Some(hostname) = self.hostname() else {
            return Vec::new();
        };
        if hostname.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        let offset = self.exchange.app.settings.subdomain_offset;
        hostname.split('.').rev().skip(offset).map(str::to_owned).collect()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.extension::<RemoteAddr>().map(|RemoteAddr(addr)| addr)
    }

    /// A typed value the transport or an earlier layer attached to the request.
    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.exchange.request.lock().parts.extensions.get::<T>().cloned()
    }

    /// Takes the request body. Returns `None` once it was taken.
    pub fn take_body(&self) -> Option<RequestBody> {
        self.exchange.request.lock().body.take()
    }

    /// Reads the whole request body into memory.
    pub async fn bytes(&self) -> Result<bytes::Bytes, Error> {
        use http_body_util::BodyExt;

        let Some(body) = self.take_body() else {
            return Ok(bytes::Bytes::new());
        };
        let collected = body.collect().await.map_err(|e: BoxError| Error::Other(e))?;
        Ok(collected.to_bytes())
    }

    pub fn accepts(&self) -> &Accepts {
        &self.exchange.accepts
    }

    pub fn property<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.exchange.request.lock().props.get::<T>()
    }

    pub fn set_property<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.exchange.request.lock().props.insert(value)
    }
}
