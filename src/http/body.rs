//! Response body framing readers.
//!
//! [`ChunkedBody`] strips `Transfer-Encoding: chunked` framing,
//! [`SizedBody`] reads exactly a declared `Content-Length`, and
//! [`LimitedBody`] fails a read once a body grows past a byte ceiling. They
//! wrap any [`AsyncRead`], so bytes already buffered while the response head
//! was parsed can be chained in front of the socket.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};

/// Bytes pulled from the inner reader per fill.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Decodes a chunked transfer-coded body into its payload bytes.
///
/// Chunk extensions and trailer fields are read and discarded.
///
/// # Examples
///
/// ```
/// use tokio::io::AsyncReadExt;
/// use urlimage::http::ChunkedBody;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let wire: &[u8] = b"3\r\nabc\r\n2;ext=1\r\nde\r\n0\r\n\r\n";
/// let mut body = ChunkedBody::new(wire, &b""[..]);
/// let mut out = Vec::new();
/// body.read_to_end(&mut out).await?;
/// assert_eq!(out, b"abcde");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkedBody<R> {
    inner: R,
    buf: BytesMut,
    state: ChunkState,
}

impl<R: AsyncRead + Unpin> ChunkedBody<R> {
    /// Wraps `inner`, treating `prefix` as bytes that precede it on the wire.
    pub fn new(inner: R, prefix: &[u8]) -> Self {
        Self {
            inner,
            buf: BytesMut::from(prefix),
            state: ChunkState::Size,
        }
    }

    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut read_buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
        let filled = read_buf.filled();
        if filled.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a chunked body",
            )));
        }
        self.buf.extend_from_slice(filled);
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedBody<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match this.state {
                ChunkState::Done => return Poll::Ready(Ok(())),
                ChunkState::Size => match httparse::parse_chunk_size(&this.buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        this.buf.advance(consumed);
                        this.state = if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        };
                    }
                    Ok(httparse::Status::Partial) => ready!(this.poll_fill(cx))?,
                    Err(_) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "invalid chunk size line",
                        )));
                    }
                },
                ChunkState::Data(remaining) => {
                    if this.buf.is_empty() {
                        ready!(this.poll_fill(cx))?;
                        continue;
                    }
                    let n = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(this.buf.len())
                        .min(out.remaining());
                    out.put_slice(&this.buf[..n]);
                    this.buf.advance(n);
                    let left = remaining - n as u64;
                    this.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Poll::Ready(Ok(()));
                }
                ChunkState::DataEnd => {
                    if this.buf.len() < 2 {
                        ready!(this.poll_fill(cx))?;
                        continue;
                    }
                    if &this.buf[..2] != b"\r\n" {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "chunk data not terminated by CRLF",
                        )));
                    }
                    this.buf.advance(2);
                    this.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(pos) = this.buf.windows(2).position(|w| w == b"\r\n") else {
                        ready!(this.poll_fill(cx))?;
                        continue;
                    };
                    this.buf.advance(pos + 2);
                    if pos == 0 {
                        this.state = ChunkState::Done;
                    }
                }
            }
        }
    }
}

/// Yields exactly `len` bytes of `inner`, then EOF.
///
/// A connection that closes before `len` bytes arrived is an
/// [`io::ErrorKind::UnexpectedEof`] error, not a short body.
#[derive(Debug)]
pub struct SizedBody<R> {
    inner: R,
    remaining: u64,
}

impl<R: AsyncRead + Unpin> SizedBody<R> {
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SizedBody<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 || out.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let want = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(out.remaining())
            .min(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        let mut read_buf = ReadBuf::new(&mut chunk[..want]);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
        let filled = read_buf.filled();
        if filled.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed with {} body bytes missing", this.remaining),
            )));
        }
        out.put_slice(filled);
        this.remaining -= filled.len() as u64;
        Poll::Ready(Ok(()))
    }
}

/// Fails with [`io::ErrorKind::InvalidData`] once more than `limit` bytes
/// have been read through it.
#[derive(Debug)]
pub struct LimitedBody<R> {
    inner: R,
    remaining: usize,
}

impl<R: AsyncRead + Unpin> LimitedBody<R> {
    /// Wraps `inner` with a ceiling of `limit` bytes.
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedBody<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = out.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, out))?;
        let read = out.filled().len() - before;
        if read > this.remaining {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response body exceeds maximum allowed size",
            )));
        }
        this.remaining -= read;
        Poll::Ready(Ok(()))
    }
}
