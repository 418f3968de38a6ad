//! Client-side HTTP/1.1 types and parsing.
//!
//! This module provides the wire primitives the default transport needs to
//! fetch an image: [`StatusCode`], [`Headers`], an outgoing [`Request`], a
//! parsed [`ResponseHead`], and [`ChunkedBody`] for `Transfer-Encoding: chunked`.

use std::fmt;

pub mod body;
pub mod headers;
pub mod request;
pub mod response;

pub use body::{ChunkedBody, LimitedBody, SizedBody};
pub use headers::Headers;
pub use request::Request;
pub use response::{ResponseError, ResponseHead};

/// An HTTP response status code as received from a server.
///
/// Servers may send any three-digit code, so this wraps the raw number and
/// only names the reasons we are likely to log.
///
/// # Examples
///
/// ```
/// use urlimage::http::StatusCode;
///
/// let status = StatusCode::from_u16(200);
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(status.canonical_reason(), "OK");
/// assert!(status.is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const NOT_FOUND: Self = Self(404);

    /// Wraps a numeric status code.
    pub fn from_u16(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` for any 2xx code.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Returns `true` for any 3xx code. Redirects are never followed.
    pub fn is_redirection(self) -> bool {
        (300..400).contains(&self.0)
    }

    /// Returns the canonical reason phrase, or `"Unknown"` for codes we don't name.
    pub fn canonical_reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            410 => "Gone",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ranges() {
        assert!(StatusCode::from_u16(204).is_success());
        assert!(!StatusCode::from_u16(304).is_success());
        assert!(StatusCode::from_u16(302).is_redirection());
        assert!(!StatusCode::NOT_FOUND.is_success());
    }

    #[test]
    fn display_includes_reason() {
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
        assert_eq!(StatusCode::from_u16(599).to_string(), "599 Unknown");
    }
}
