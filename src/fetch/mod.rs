//! Background fetch-and-decode of a single image.
//!
//! [`Fetcher::start`] spawns one Tokio task per call. The task opens the
//! response stream through a [`Transport`], reads it to the end, decodes the
//! bytes on the blocking pool, and reports exactly one [`FetchOutcome`] to the
//! completion callback, or nothing at all if it was cancelled first.
//!
//! ## Cancellation
//!
//! [`FetchHandle::cancel`] is cooperative: it flips the request to
//! [`FetchState::Cancelled`] and fires a [`CancellationToken`]. The task
//! watches the token while connecting and while reading, so a blocked read is
//! abandoned and its stream dropped (closed) straight away. The terminal state
//! transition and the callback happen under the same lock `cancel` takes, so
//! once `cancel` returns `true` the callback can never run.

use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::decode::{DecodedImage, decode};
use crate::transport::Transport;

/// Message carried by every [`FetchOutcome::Failed`].
pub const FAILURE_MESSAGE: &str = "Failed to load image";

/// Lifecycle of one fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchState {
    /// Created, background task not yet running.
    Pending,
    /// Connecting, reading, or decoding.
    Running,
    /// Produced a payload (possibly empty) and delivered it.
    Completed,
    /// Hit a transport error and delivered the failure.
    Failed,
    /// Cancelled before delivering anything.
    Cancelled,
}

impl FetchState {
    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The single notification a fetch delivers.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The stream was read fully. `image` is `None` when the bytes did not
    /// decode as an image.
    Loaded {
        url: String,
        image: Option<Arc<DecodedImage>>,
    },
    /// The connection or stream failed. The underlying error is logged, not carried.
    Failed { message: &'static str },
}

/// Owner's handle to a running fetch.
///
/// Dropping the handle does not cancel the fetch; call [`cancel`](Self::cancel).
pub struct FetchHandle {
    id: u64,
    url: Url,
    token: CancellationToken,
    state: Arc<Mutex<FetchState>>,
}

impl FetchHandle {
    /// Identifier unique within the [`Fetcher`] that started this fetch.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FetchState {
        *lock_state(&self.state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FetchState::Cancelled
    }

    /// Cancels the fetch and closes its stream.
    ///
    /// Returns `true` if this call cancelled it. Returns `false` if the fetch
    /// had already reached a terminal state, in which case its outcome has
    /// already been delivered.
    pub fn cancel(&self) -> bool {
        let mut state = lock_state(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = FetchState::Cancelled;
        drop(state);

        self.token.cancel();
        debug!(id = self.id, url = %self.url, "fetch cancelled");
        true
    }
}

impl fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

fn lock_state(state: &Mutex<FetchState>) -> MutexGuard<'_, FetchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the background work ended, before delivery.
enum Completion {
    Cancelled,
    Decoded(Option<DecodedImage>),
    Failed(io::Error),
}

/// Starts cancellable background fetches over a shared [`Transport`].
///
/// Cloning a `Fetcher` shares its transport and spawn counter.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    started: Arc<AtomicU64>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of fetches spawned so far.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawns a fetch of `url` and returns its handle.
    ///
    /// `on_complete` runs at most once, on the fetch task, with the outcome.
    /// It never runs if the fetch is cancelled first. It should be cheap:
    /// [`FetchHandle::cancel`] waits for it if the two race.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(&self, url: Url, on_complete: F) -> FetchHandle
    where
        F: FnOnce(FetchOutcome) + Send + 'static,
    {
        let id = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(FetchState::Pending));

        let handle = FetchHandle {
            id,
            url: url.clone(),
            token: token.clone(),
            state: Arc::clone(&state),
        };

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            {
                let mut current = lock_state(&state);
                if *current != FetchState::Pending {
                    return;
                }
                *current = FetchState::Running;
            }
            debug!(id, url = %url, "fetch running");

            // A panic anywhere in the work settles the fetch as failed.
            let completion = AssertUnwindSafe(run(transport.as_ref(), &url, &token))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(id, url = %url, "fetch panicked");
                    Completion::Failed(io::Error::other("fetch panicked"))
                });

            let (terminal, outcome) = match completion {
                Completion::Cancelled => return,
                Completion::Decoded(image) => (
                    FetchState::Completed,
                    FetchOutcome::Loaded {
                        url: url.as_str().to_owned(),
                        image: image.map(Arc::new),
                    },
                ),
                Completion::Failed(e) => {
                    warn!(id, url = %url, error = %e, "image fetch failed");
                    (
                        FetchState::Failed,
                        FetchOutcome::Failed {
                            message: FAILURE_MESSAGE,
                        },
                    )
                }
            };

            let mut current = lock_state(&state);
            if *current != FetchState::Running {
                debug!(id, url = %url, "outcome suppressed after cancellation");
                return;
            }
            *current = terminal;
            on_complete(outcome);
        });

        handle
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("started", &self.started())
            .finish_non_exhaustive()
    }
}

/// Connects, reads the whole body, and decodes it.
///
/// The body stream is owned here and dropped exactly once on every path.
async fn run(transport: &dyn Transport, url: &Url, token: &CancellationToken) -> Completion {
    let mut stream = tokio::select! {
        biased;
        () = token.cancelled() => return Completion::Cancelled,
        opened = transport.open(url) => match opened {
            Ok(stream) => stream,
            Err(e) => return Completion::Failed(e),
        },
    };

    let mut bytes = Vec::new();
    let read = tokio::select! {
        biased;
        () = token.cancelled() => None,
        read = stream.read_to_end(&mut bytes) => Some(read),
    };
    drop(stream);

    match read {
        None => Completion::Cancelled,
        Some(Err(e)) => Completion::Failed(e),
        Some(Ok(_)) if token.is_cancelled() => Completion::Cancelled,
        Some(Ok(len)) => {
            debug!(url = %url, len, "body read, decoding");
            match tokio::task::spawn_blocking(move || decode(&bytes)).await {
                Ok(image) => Completion::Decoded(image),
                Err(e) => Completion::Failed(io::Error::other(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::png_bytes;
    use crate::transport::mock::{MockTransport, Reply};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const URL: &str = "http://x/img.png";

    fn setup(reply: Reply) -> (Arc<MockTransport>, Fetcher) {
        let transport = Arc::new(MockTransport::new().reply(URL, reply));
        let fetcher = Fetcher::new(transport.clone());
        (transport, fetcher)
    }

    fn start(
        fetcher: &Fetcher,
    ) -> (FetchHandle, mpsc::UnboundedReceiver<FetchOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = fetcher.start(Url::parse(URL).unwrap(), move |outcome| {
            let _ = tx.send(outcome);
        });
        (handle, rx)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn success_delivers_decoded_image() {
        let (transport, fetcher) = setup(Reply::Body(png_bytes(2, 1)));
        let (handle, mut rx) = start(&fetcher);

        match rx.recv().await.unwrap() {
            FetchOutcome::Loaded { url, image } => {
                assert_eq!(url, URL);
                assert_eq!(image.unwrap().byte_size(), 8);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(handle.state(), FetchState::Completed);
        assert_eq!(transport.closed(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_delivers_generic_failure() {
        let (_transport, fetcher) = setup(Reply::Refuse);
        let (handle, mut rx) = start(&fetcher);

        match rx.recv().await.unwrap() {
            FetchOutcome::Failed { message } => assert_eq!(message, "Failed to load image"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(handle.state(), FetchState::Failed);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_bytes_still_count_as_loaded() {
        let (transport, fetcher) = setup(Reply::Body(b"not an image".to_vec()));
        let (handle, mut rx) = start(&fetcher);

        match rx.recv().await.unwrap() {
            FetchOutcome::Loaded { image, .. } => assert!(image.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(handle.state(), FetchState::Completed);
        assert_eq!(transport.closed(), 1);
    }

    #[tokio::test]
    async fn cancel_closes_hanging_stream_and_stays_silent() {
        let (transport, fetcher) = setup(Reply::Hang);
        let (handle, mut rx) = start(&fetcher);

        wait_for(|| transport.opened() == 1).await;
        assert_eq!(handle.state(), FetchState::Running);
        assert!(handle.cancel());

        wait_for(|| transport.closed() == 1).await;
        assert!(handle.is_cancelled());
        // The callback (and its sender) is dropped without being called.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_before_task_runs() {
        let (transport, fetcher) = setup(Reply::Body(png_bytes(1, 1)));
        let (handle, mut rx) = start(&fetcher);
        assert!(handle.cancel());

        assert!(rx.recv().await.is_none());
        assert_eq!(handle.state(), FetchState::Cancelled);
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn cancel_after_delivery_reports_too_late() {
        let (_transport, fetcher) = setup(Reply::Body(png_bytes(1, 1)));
        let (handle, mut rx) = start(&fetcher);

        assert!(rx.recv().await.is_some());
        assert!(!handle.cancel());
        assert_eq!(handle.state(), FetchState::Completed);
    }

    #[tokio::test]
    async fn panicking_transport_reports_failure() {
        let (_transport, fetcher) = setup(Reply::Panic);
        let (handle, mut rx) = start(&fetcher);

        assert!(matches!(
            rx.recv().await.unwrap(),
            FetchOutcome::Failed { .. }
        ));
        assert_eq!(handle.state(), FetchState::Failed);
    }

    #[tokio::test]
    async fn ids_and_spawn_counter() {
        let (_transport, fetcher) = setup(Reply::Hang);
        let (a, _rx_a) = start(&fetcher);
        let (b, _rx_b) = start(&fetcher);
        assert_eq!((a.id(), b.id()), (1, 2));
        assert_eq!(fetcher.started(), 2);
        a.cancel();
        b.cancel();
    }
}
