//! In-memory transport for unit tests.

use std::collections::HashMap;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use url::Url;

use super::{BodyStream, OpenFuture, Transport};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Stream these bytes, then EOF.
    Body(Vec<u8>),
    /// Fail the connection.
    Refuse,
    /// Open a stream that never produces data.
    Hang,
    /// Panic inside `open`.
    Panic,
}

/// Counts drops so tests can assert the stream was closed.
struct Tracked<R> {
    inner: R,
    closed: Arc<AtomicUsize>,
}

impl<R: AsyncRead + Unpin> AsyncRead for Tracked<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<R> Drop for Tracked<R> {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<HashMap<String, Reply>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    // Keeps the write half of hanging streams alive so reads stay pending.
    hanging: Mutex<Vec<DuplexStream>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, url: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(Url::parse(url).unwrap().to_string(), reply);
        self
    }

    /// Number of `open` calls so far.
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of body streams dropped so far.
    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn open<'a>(&'a self, url: &'a Url) -> OpenFuture<'a> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().get(url.as_str()).cloned();
            let closed = Arc::clone(&self.closed);
            let stream: BodyStream = match reply {
                Some(Reply::Body(bytes)) => Box::new(Tracked {
                    inner: Cursor::new(bytes),
                    closed,
                }),
                Some(Reply::Hang) => {
                    let (client, server) = tokio::io::duplex(64);
                    self.hanging.lock().unwrap().push(server);
                    Box::new(Tracked {
                        inner: client,
                        closed,
                    })
                }
                Some(Reply::Panic) => panic!("transport blew up opening {url}"),
                Some(Reply::Refuse) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ));
                }
                None => return Err(io::Error::new(io::ErrorKind::NotFound, "no reply scripted")),
            };
            Ok(stream)
        })
    }
}
