//! Unified error type.

use http::StatusCode;

/// A boxed, thread-safe error coming from user code or from a body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by middleware and by strata's fallible operations.
///
/// Every error maps to an HTTP status ([`Error::status`]) and carries an
/// `expose` flag ([`Error::expose`]). Exposed errors are safe to show to the
/// client: the context error handler writes their message as the response
/// body and the default listener does not log them. Hidden errors are
/// answered with the reason phrase of their status only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error raised on purpose by middleware with a chosen status.
    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        expose: bool,
    },

    /// A middleware awaited its `next` more than once.
    #[error("next() called multiple times")]
    NextCalledMultipleTimes,

    /// The response body could not be serialized.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("invalid cookie: {0}")]
    Cookie(String),

    /// The response was already committed; nothing more can be written.
    #[error("headers already sent")]
    HeadersSent,

    /// The client went away before the response was committed.
    #[error("client closed the connection")]
    ClientAborted,

    /// A middleware panicked instead of returning an error.
    #[error("non-error thrown: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// An error with an explicit status and message.
    ///
    /// Client errors (4xx) are exposed by default, everything else is not.
    ///
    /// ```rust
    /// use strata::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::new(StatusCode::FORBIDDEN, "members only");
    /// assert!(err.expose());
    /// assert_eq!(err.status(), StatusCode::FORBIDDEN);
    /// ```
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            expose: status.is_client_error(),
        }
    }

    /// An error whose message is the reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, crate::status::message(status))
    }

    /// Wraps any foreign error. Reported as a hidden `500`.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// Overrides the `expose` flag of an [`Error::Http`]. No-op on other variants.
    pub fn with_expose(mut self, value: bool) -> Self {
        if let Self::Http { expose, .. } = &mut self {
            *expose = value;
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            Self::ClientAborted => client_closed_request(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn expose(&self) -> bool {
        match self {
            Self::Http { expose, .. } => *expose,
            Self::ClientAborted => true,
            _ => false,
        }
    }

    /// `true` for failures that are not errors at all: a panicking middleware.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

// nginx's non-standard "499 Client Closed Request".
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}
