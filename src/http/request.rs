//! Outgoing HTTP/1.1 `GET` request builder.
//!
//! Provides a small fluent builder for the single request shape the loader
//! sends and serializes it to a byte buffer for transmission over TCP.

use bytes::{BufMut, BytesMut};
use url::Url;

use super::Headers;

/// Default `User-Agent` sent with every image request.
pub const DEFAULT_USER_AGENT: &str = concat!("urlimage/", env!("CARGO_PKG_VERSION"));

/// An HTTP/1.1 `GET` request, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use urlimage::http::Request;
///
/// let url = Url::parse("http://example.com:8080/img.png?size=2").unwrap();
/// let bytes = Request::get(&url).use_caches(false).into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
///
/// assert!(text.starts_with("GET /img.png?size=2 HTTP/1.1\r\n"));
/// assert!(text.contains("Host: example.com:8080\r\n"));
/// assert!(text.contains("Cache-Control: no-cache\r\n"));
/// ```
#[derive(Debug)]
pub struct Request {
    target: String,
    headers: Headers,
    use_caches: bool,
}

impl Request {
    /// Creates a `GET` for `url` with `Host`, `Accept`, `User-Agent` and
    /// `Connection: close` already set.
    pub fn get(url: &Url) -> Self {
        let mut target = url.path().to_owned();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let host = url.host_str().unwrap_or_default();
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let mut headers = Headers::with_capacity(6);
        headers.insert("Host", host);
        headers.insert("Accept", "image/*");
        headers.insert("User-Agent", DEFAULT_USER_AGENT);
        headers.insert("Connection", "close");

        Self {
            target,
            headers,
            use_caches: true,
        }
    }

    /// Replaces the `User-Agent` header value.
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        let mut headers = Headers::with_capacity(self.headers.len());
        for (name, value) in self.headers.iter() {
            if !name.eq_ignore_ascii_case("user-agent") {
                headers.insert(name, value);
            }
        }
        headers.insert("User-Agent", agent);
        self.headers = headers;
        self
    }

    /// Allows (`true`) or forbids (`false`) intermediaries from answering
    /// with a cached copy.
    #[must_use]
    pub fn use_caches(mut self, use_caches: bool) -> Self {
        self.use_caches = use_caches;
        self
    }

    /// Returns the request target (path plus query).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the headers that will be written.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Serializes the request using HTTP/1.1 wire format.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.use_caches {
            self.headers.insert("Cache-Control", "no-cache");
            self.headers.insert("Pragma", "no-cache");
        }

        let mut buf = BytesMut::with_capacity(64 + self.target.len() + self.headers.len() * 48);
        buf.put(format!("GET {} HTTP/1.1\r\n", self.target).as_bytes());
        buf.put(self.headers.to_string().as_bytes());
        buf.put(&b"\r\n"[..]);
        buf
    }
}
