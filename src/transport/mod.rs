//! Transports — how a fetch turns a URL into a readable response stream.
//!
//! The [`Transport`] trait is the only thing the fetcher knows about the
//! network. [`HttpTransport`] is the default: plain HTTP/1.1 over TCP, with
//! `https` URLs passed on to the `reqwest`-backed [`TlsTransport`]. Anything
//! else (in-memory fixtures, a proxy) plugs in behind the same trait.
//!
//! URL validation lives here too: [`parse_url`] is the gate every request
//! passes before a transport is ever asked to open anything.

use std::future::Future;
use std::io;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::AsyncRead;
use url::Url;

pub mod tcp;
pub mod tls;

#[cfg(test)]
pub(crate) mod mock;

pub use tcp::HttpTransport;
pub use tls::TlsTransport;

/// A response body being streamed from a transport.
///
/// Dropping the stream closes it.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed future returned by [`Transport::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BodyStream>> + Send + 'a>>;

/// Opens a response stream for a URL.
///
/// # Contract
///
/// - Any connection, protocol, or status failure is reported as an
///   [`io::Error`]; the fetcher does not look at the error beyond logging it.
/// - The returned stream yields only the response payload (no framing).
/// - Implementations must be `Send + Sync` because one transport is shared by
///   every fetch a controller starts.
pub trait Transport: Send + Sync {
    /// Connects to `url` and returns its body stream.
    fn open<'a>(&'a self, url: &'a Url) -> OpenFuture<'a>;
}

/// Reasons a URL string is rejected before any fetch begins.
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("malformed URL: {0}")]
    Malformed(#[from] url::ParseError),

    #[error("unsupported URL scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("URL has no host")]
    MissingHost,
}

/// Validates `input` as a fetchable image URL.
///
/// Only `http` and `https` URLs with a host are accepted.
///
/// # Errors
///
/// Returns a [`UrlError`] describing why the URL cannot be fetched.
///
/// # Examples
///
/// ```
/// use urlimage::transport::{UrlError, parse_url};
///
/// assert!(parse_url("http://x/img.png").is_ok());
/// assert!(matches!(parse_url("not a url"), Err(UrlError::Malformed(_))));
/// assert!(matches!(parse_url("ftp://x/a.png"), Err(UrlError::UnsupportedScheme { .. })));
/// ```
pub fn parse_url(input: &str) -> Result<Url, UrlError> {
    let url = Url::parse(input)?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(UrlError::UnsupportedScheme {
                scheme: other.to_owned(),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::MissingHost);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            parse_url("http://x/img.png").unwrap().as_str(),
            "http://x/img.png"
        );
        assert!(parse_url("https://cdn.example.com/a/b.jpg?w=10").is_ok());
    }

    #[test]
    fn rejects_relative_and_garbage() {
        assert!(matches!(parse_url("/img.png"), Err(UrlError::Malformed(_))));
        assert!(matches!(parse_url(""), Err(UrlError::Malformed(_))));
    }

    #[test]
    fn international_hosts_become_punycode() {
        let url = parse_url("http://bücher.example/cover.png").unwrap();
        assert_eq!(url.host_str(), Some("xn--bcher-kva.example"));
    }

    #[test]
    fn ipv6_literal_hosts_are_accepted() {
        let url = parse_url("http://[::1]:8080/a.png").unwrap();
        assert!(matches!(url.host(), Some(url::Host::Ipv6(_))));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn rejects_other_schemes() {
        match parse_url("file:///tmp/a.png") {
            Err(UrlError::UnsupportedScheme { scheme }) => assert_eq!(scheme, "file"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
