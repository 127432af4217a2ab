//! Status code classification.
//!
//! `http::StatusCode` already knows every registered code and its reason
//! phrase. This module only adds the groupings the finalizer cares about.

use http::StatusCode;

/// Statuses that must never carry a body: 204, 205 and 304.
pub fn is_empty(status: StatusCode) -> bool {
    matches!(status.as_u16(), 204 | 205 | 304)
}

/// Statuses that redirect the client.
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 300 | 301 | 302 | 303 | 305 | 307 | 308)
}

/// The reason phrase for `status`, or the numeric code when none is known.
pub fn message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| status.as_u16().to_string())
}
