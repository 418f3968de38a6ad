//! HTTPS (and plain HTTP) transport backed by `reqwest` with rustls.

use std::io;

use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, PRAGMA};
use tokio::sync::OnceCell;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::tcp::DEFAULT_MAX_BODY_SIZE;
use super::{BodyStream, OpenFuture, Transport};
use crate::http::LimitedBody;
use crate::http::request::DEFAULT_USER_AGENT;

/// A [`Transport`] that speaks TLS through a shared `reqwest::Client`.
///
/// Behaves like [`HttpTransport`](super::HttpTransport): redirects are not
/// followed, any non-2xx status is an error, and bodies are capped at
/// `max_body_size`. The client is built on first use and then reused, so
/// connections are pooled across fetches.
///
/// # Examples
///
/// ```
/// use urlimage::transport::TlsTransport;
///
/// let transport = TlsTransport::new().use_caches(false).user_agent("gallery/1.0");
/// assert!(!transport.uses_caches());
/// ```
#[derive(Debug, Clone)]
pub struct TlsTransport {
    use_caches: bool,
    max_body_size: usize,
    user_agent: String,
    client: OnceCell<reqwest::Client>,
}

impl Default for TlsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsTransport {
    pub fn new() -> Self {
        Self {
            use_caches: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            client: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn use_caches(mut self, use_caches: bool) -> Self {
        self.use_caches = use_caches;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    /// Sets the `User-Agent` header value. Takes effect before the first fetch.
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self.client = OnceCell::new();
        self
    }

    pub fn uses_caches(&self) -> bool {
        self.use_caches
    }

    async fn client(&self) -> io::Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .user_agent(self.user_agent.as_str())
                    .redirect(reqwest::redirect::Policy::none())
                    .build()
                    .map_err(io::Error::other)
            })
            .await
    }

    async fn fetch(&self, url: &Url) -> io::Result<BodyStream> {
        let client = self.client().await?;

        let mut request = client.get(url.as_str()).header(ACCEPT, "image/*");
        if !self.use_caches {
            request = request
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let response = request.send().await.map_err(io::Error::other)?;
        let status = response.status();
        debug!(%url, %status, "response head received");
        if !status.is_success() {
            return Err(io::Error::other(format!("unexpected status {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_size as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "declared body of {len} bytes exceeds limit of {}",
                        self.max_body_size
                    ),
                ));
            }
        }

        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(LimitedBody::new(
            StreamReader::new(body),
            self.max_body_size,
        )))
    }
}

impl Transport for TlsTransport {
    fn open<'a>(&'a self, url: &'a Url) -> OpenFuture<'a> {
        Box::pin(self.fetch(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` to the first connection over plain HTTP.
    async fn serve_once(response: &'static [u8]) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut scratch = [0u8; 2048];
            let _ = socket.read(&mut scratch).await;
            socket.write_all(response).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/img.png")).unwrap()
    }

    async fn read_body(transport: &TlsTransport, url: &Url) -> io::Result<Vec<u8>> {
        let mut body = transport.open(url).await?;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn streams_body_through_client() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nPNG!").await;
        assert_eq!(read_body(&TlsTransport::new(), &url).await.unwrap(), b"PNG!");
    }

    #[tokio::test]
    async fn error_status_fails_open() {
        let url = serve_once(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n").await;
        let err = TlsTransport::new().open(&url).await.err().unwrap();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhalf").await;
        assert!(read_body(&TlsTransport::new(), &url).await.is_err());
    }

    #[tokio::test]
    async fn declared_length_over_limit_fails_open() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n").await;
        let transport = TlsTransport::new().max_body_size(10);
        let err = transport.open(&url).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
