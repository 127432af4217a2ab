//! Body values a middleware can leave on the response, and the wire body
//! types handed to hyper.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;

use crate::error::BoxError;

/// The body sent to hyper.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// The incoming request body, type-erased so any transport body fits.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// A boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + 'static>>;

/// A value that serializes to JSON when the response is finalized.
///
/// Serialization is deferred on purpose: a failure surfaces as an exchange
/// failure instead of at assignment time.
pub trait JsonBody: Send + 'static {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send + 'static> JsonBody for T {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// What the response will carry once the pipeline finishes.
pub enum Body {
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
    Json(Box<dyn JsonBody>),
}

impl Body {
    pub fn json<T: Serialize + Send + 'static>(value: T) -> Self {
        Self::Json(Box::new(value))
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Stream(Box::pin(stream.map_err(|e| -> BoxError { e.into() })))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Byte length when known without consuming the body.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Text(s) => Some(s.len()),
            Self::Bytes(b) => Some(b.len()),
            Self::Stream(_) | Self::Json(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Empty
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Json(_) => f.write_str("Json(..)"),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        Self::json(v)
    }
}

impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Empty, Into::into)
    }
}

// ── Wire bodies ──────────────────────────────────────────────────────────────

pub(crate) fn empty() -> ResponseBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn streaming(stream: BodyStream) -> ResponseBody {
    StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync()
}

/// Erases any transport body into a [`RequestBody`].
pub(crate) fn erase<B>(body: B) -> RequestBody
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(|e| -> BoxError { e.into() }).boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_are_known_for_buffered_bodies() {
        assert_eq!(Body::from("hello").len(), Some(5));
        assert_eq!(Body::from(vec![1u8, 2, 3]).len(), Some(3));
        assert_eq!(Body::json(serde_json::json!({"a": 1})).len(), None);
        assert_eq!(Body::Empty.len(), Some(0));
    }

    #[test]
    fn none_becomes_empty() {
        assert!(Body::from(None::<String>).is_empty());
        assert!(!Body::from(Some("x")).is_empty());
    }

    #[test]
    fn json_bodies_serialize_lazily() {
        let Body::Json(value) = Body::json(serde_json::json!({"a": 1})) else {
            panic!("expected json body");
        };
        assert_eq!(value.to_json().unwrap(), br#"{"a":1}"#);
    }
}
