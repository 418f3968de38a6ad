//! HTTP/1.1 response head parsing using the [`httparse`] crate.

use thiserror::Error;

use super::{Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response head.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response head is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// The status line and headers of an HTTP/1.1 response.
///
/// Created by [`ResponseHead::parse`] from a raw byte buffer. The body is
/// not copied; the caller gets back the offset where it starts.
///
/// # Examples
///
/// ```
/// use urlimage::http::ResponseHead;
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 3\r\n\r\nabc";
/// let (head, offset) = ResponseHead::parse(raw).unwrap();
///
/// assert!(head.status().is_success());
/// assert_eq!(head.headers().get("content-type"), Some("image/png"));
/// assert_eq!(&raw[offset..], b"abc");
/// ```
#[derive(Debug)]
pub struct ResponseHead {
    status: StatusCode,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl ResponseHead {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Parse a response head from the start of `buf`.
    ///
    /// Returns the parsed head and the byte offset at which the body begins.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the blank line ending the head has not arrived yet.
    /// - [`ResponseError::Parse`] — the data is not a valid HTTP/1.x response.
    /// - [`ResponseError::MissingField`] — status code or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;
        let version = raw
            .version
            .ok_or(ResponseError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                status: StatusCode::from_u16(code),
                version,
                headers: header_map,
            },
            body_offset,
        ))
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}
