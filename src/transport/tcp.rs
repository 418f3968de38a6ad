//! Plain HTTP/1.1 transport over Tokio TCP.

use std::io::{self, Cursor};
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::{Host, Url};

use super::tls::TlsTransport;
use super::{BodyStream, OpenFuture, Transport};
use crate::http::body::{ChunkedBody, LimitedBody, SizedBody};
use crate::http::request::{DEFAULT_USER_AGENT, Request};
use crate::http::{ResponseError, ResponseHead};

/// Largest response body accepted by default (32 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

/// Maximum size of a response head we will buffer before giving up (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The default [`Transport`]: one `GET` per connection, `Connection: close`.
///
/// Supports `Content-Length`, chunked, and close-delimited bodies. Redirects
/// are not followed and any non-2xx status is an error. `https` URLs are
/// handed to an inner [`TlsTransport`] configured the same way.
///
/// # Examples
///
/// ```
/// use urlimage::transport::HttpTransport;
///
/// let transport = HttpTransport::new()
///     .use_caches(false)
///     .max_body_size(4 * 1024 * 1024)
///     .user_agent("gallery/1.0");
/// assert!(!transport.uses_caches());
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    use_caches: bool,
    max_body_size: usize,
    user_agent: String,
    tls: TlsTransport,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport with caching allowed and a 32 MiB body ceiling.
    pub fn new() -> Self {
        Self {
            use_caches: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            tls: TlsTransport::new(),
        }
    }

    /// Allows or forbids intermediaries from serving cached responses.
    #[must_use]
    pub fn use_caches(mut self, use_caches: bool) -> Self {
        self.use_caches = use_caches;
        self.tls = self.tls.use_caches(use_caches);
        self
    }

    /// Sets the largest body, in bytes, that will be read.
    #[must_use]
    pub fn max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self.tls = self.tls.max_body_size(max);
        self
    }

    /// Sets the `User-Agent` header value.
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self.tls = self.tls.user_agent(self.user_agent.as_str());
        self
    }

    /// Returns `true` if transport-level caching is allowed.
    pub fn uses_caches(&self) -> bool {
        self.use_caches
    }

    async fn connect(&self, url: &Url) -> io::Result<BodyStream> {
        match url.scheme() {
            "http" => {}
            "https" => return self.tls.open(url).await,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("scheme {other} is not supported by HttpTransport"),
                ));
            }
        }
        let port = url.port_or_known_default().unwrap_or(80);

        let mut stream = match url.host() {
            Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await?,
            Some(Host::Ipv4(ip)) => TcpStream::connect(SocketAddr::from((ip, port))).await?,
            Some(Host::Ipv6(ip)) => TcpStream::connect(SocketAddr::from((ip, port))).await?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "URL has no host",
                ));
            }
        };
        debug!(peer = ?stream.peer_addr().ok(), "connected");

        let request = Request::get(url)
            .user_agent(self.user_agent.as_str())
            .use_caches(self.use_caches);
        stream.write_all(&request.into_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        let (head, body_offset) = loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            match ResponseHead::parse(&buf) {
                Ok(pair) => break pair,
                Err(ResponseError::Incomplete) => {
                    if bytes_read == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed before the response head",
                        ));
                    }
                    if buf.len() > MAX_HEAD_SIZE {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "response head too large",
                        ));
                    }
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        };

        let status = head.status();
        debug!(%url, %status, "response head received");
        if !status.is_success() {
            return Err(io::Error::other(format!("unexpected status {status}")));
        }

        let prefix = buf.split_off(body_offset).freeze();
        let headers = head.headers();

        if headers.is_chunked() {
            return Ok(Box::new(LimitedBody::new(
                ChunkedBody::new(stream, &prefix),
                self.max_body_size,
            )));
        }

        match headers.content_length() {
            Some(len) if len > self.max_body_size => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "declared body of {len} bytes exceeds limit of {}",
                    self.max_body_size
                ),
            )),
            Some(len) => Ok(Box::new(SizedBody::new(
                Cursor::new(prefix).chain(stream),
                len as u64,
            ))),
            None => Ok(Box::new(LimitedBody::new(
                Cursor::new(prefix).chain(stream),
                self.max_body_size,
            ))),
        }
    }
}

impl Transport for HttpTransport {
    fn open<'a>(&'a self, url: &'a Url) -> OpenFuture<'a> {
        Box::pin(self.connect(url))
    }
}
