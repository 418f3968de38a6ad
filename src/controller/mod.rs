//! Per-surface load orchestration.
//!
//! A [`Controller`] sits between one display surface (an [`ImageTarget`]) and
//! the shared cache. It owns at most one in-flight fetch and enforces
//! supersession: anything that changes what the surface shows first cancels
//! that fetch, and a cancelled or superseded fetch never reaches the target.
//!
//! ```text
//!            request(url)
//!   Idle ───────────────────▶ Loading ──▶ Loaded ─┐
//!    ▲                          │    └──▶ Failed ─┤
//!    │     cancel_loading()     ▼                 │
//!    └──────────────────── Cancelled              │
//!    └────────────────────────────────────────────┘
//! ```
//!
//! Fetch outcomes are queued on a channel and applied only when the owner
//! calls [`Controller::process_next`] or [`Controller::process_pending`], so
//! target callbacks always run on the owner's task, never concurrently with
//! `request` or `cancel_loading`.

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};
use url::Url;

use crate::cache::ImageCache;
use crate::decode::DecodedImage;
use crate::fetch::{FetchHandle, FetchOutcome, FetchState, Fetcher};
use crate::transport::parse_url;

/// The display collaborator a [`Controller`] reports to.
pub trait ImageTarget {
    /// A load finished. `image` is `None` when the fetched bytes did not decode.
    fn on_loaded(&mut self, url: &str, image: Option<Arc<DecodedImage>>);

    /// A load failed. `cause` is always `None`; details go to the log.
    fn on_failure(&mut self, message: &str, cause: Option<&(dyn Error + 'static)>);

    /// An explicit image replaced whatever was loading or shown.
    fn on_image_set(&mut self, image: Option<Arc<DecodedImage>>) {
        let _ = image;
    }
}

/// Where a controller is in its load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed,
    /// Transient: reported in logs on the way back to `Idle`.
    Cancelled,
}

#[derive(Debug)]
struct FetchEvent {
    seq: u64,
    outcome: FetchOutcome,
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    /// The caller's URL string, reported back verbatim.
    requested: String,
    handle: FetchHandle,
}

/// Cache-first image loading for a single display surface.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use urlimage::{Controller, DecodedImage, Fetcher, ImageCache, ImageTarget};
/// use urlimage::transport::HttpTransport;
///
/// struct Surface;
///
/// impl ImageTarget for Surface {
///     fn on_loaded(&mut self, url: &str, image: Option<Arc<DecodedImage>>) {
///         println!("{url}: {image:?}");
///     }
///     fn on_failure(&mut self, message: &str, _cause: Option<&(dyn std::error::Error + 'static)>) {
///         eprintln!("{message}");
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let cache = Arc::new(ImageCache::with_default_capacity());
///     let fetcher = Fetcher::new(Arc::new(HttpTransport::new()));
///     let mut controller = Controller::new(Surface, fetcher).with_cache(cache);
///
///     controller.request("http://127.0.0.1:8080/logo.png");
///     controller.process_next().await;
/// }
/// ```
pub struct Controller<T> {
    target: T,
    fetcher: Fetcher,
    cache: Option<Arc<ImageCache>>,
    use_cache: bool,
    current: Option<InFlight>,
    state: LoadState,
    next_seq: u64,
    events_tx: mpsc::UnboundedSender<FetchEvent>,
    events_rx: mpsc::UnboundedReceiver<FetchEvent>,
}

impl<T: ImageTarget> Controller<T> {
    /// Creates an idle controller with cache lookups enabled but no cache attached.
    pub fn new(target: T, fetcher: Fetcher) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            target,
            fetcher,
            cache: None,
            use_cache: true,
            current: None,
            state: LoadState::Idle,
            next_seq: 0,
            events_tx,
            events_rx,
        }
    }

    /// Attaches a (possibly shared) cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_cache(&mut self, cache: Option<Arc<ImageCache>>) {
        self.cache = cache;
    }

    pub fn cache(&self) -> Option<&Arc<ImageCache>> {
        self.cache.as_ref()
    }

    /// Enables or disables cache lookups for [`request`](Self::request).
    ///
    /// Successful loads are written to an attached cache either way.
    pub fn set_use_cache(&mut self, use_cache: bool) {
        self.use_cache = use_cache;
    }

    pub fn uses_cache(&self) -> bool {
        self.use_cache
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// URL of the fetch in flight, if any.
    pub fn current_url(&self) -> Option<&Url> {
        self.current.as_ref().map(|f| f.handle.url())
    }

    /// State of the fetch in flight, if any.
    pub fn current_fetch_state(&self) -> Option<FetchState> {
        self.current.as_ref().map(|f| f.handle.state())
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Shows the image at `url`, from the cache when possible.
    ///
    /// A cache hit is delivered to the target before this returns and starts
    /// no fetch. A miss cancels any fetch in flight and starts a new one whose
    /// outcome is applied by [`process_next`](Self::process_next).
    ///
    /// The target is told about `url` exactly as passed in; the cache is keyed
    /// by its normalized form, so `http://X` and `http://x/` share an entry.
    ///
    /// A malformed URL is logged and ignored: nothing is cancelled, the target
    /// is not notified, and the state does not change.
    pub fn request(&mut self, url: &str) {
        let requested = url;
        let url = match parse_url(requested) {
            Ok(url) => url,
            Err(e) => {
                error!(url = requested, error = %e, "wrong URL format, request ignored");
                return;
            }
        };

        if self.use_cache {
            if let Some(image) = self.cache.as_ref().and_then(|c| c.get(url.as_str())) {
                debug!(url = %url, "cache hit");
                self.cancel_current();
                self.transition(LoadState::Loaded);
                self.target.on_loaded(requested, Some(image));
                return;
            }
        }

        self.cancel_current();

        self.next_seq += 1;
        let seq = self.next_seq;
        let events = self.events_tx.clone();
        let handle = self.fetcher.start(url, move |outcome| {
            let _ = events.send(FetchEvent { seq, outcome });
        });
        debug!(seq, fetch = handle.id(), url = %handle.url(), "fetch started");

        self.current = Some(InFlight {
            seq,
            requested: requested.to_owned(),
            handle,
        });
        self.transition(LoadState::Loading);
    }

    /// Replaces the displayed image with an explicit value, cancelling any load.
    pub fn set_image(&mut self, image: Option<Arc<DecodedImage>>) {
        self.cancel_current();
        self.transition(LoadState::Idle);
        self.target.on_image_set(image);
    }

    /// Cancels the fetch in flight, if any.
    ///
    /// Returns without waiting for the fetch's stream to close. The cancelled
    /// fetch's outcome is never delivered, even if it had already completed.
    pub fn cancel_loading(&mut self) {
        if self.cancel_current() {
            self.transition(LoadState::Cancelled);
            self.transition(LoadState::Idle);
        }
    }

    /// Waits for the in-flight fetch to finish and applies its outcome.
    ///
    /// Returns the resulting state, or `None` without waiting when nothing is
    /// in flight. Outcomes of superseded fetches are discarded along the way.
    pub async fn process_next(&mut self) -> Option<LoadState> {
        loop {
            if self.current.is_none() {
                self.process_pending();
                return None;
            }
            let event = self.events_rx.recv().await?;
            if self.apply(event) {
                return Some(self.state);
            }
        }
    }

    /// Applies every outcome that is already queued, without waiting.
    ///
    /// Returns how many outcomes reached the target.
    pub fn process_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply(event) {
                delivered += 1;
            }
        }
        delivered
    }

    fn apply(&mut self, event: FetchEvent) -> bool {
        let requested = match self.current.take() {
            Some(in_flight) if in_flight.seq == event.seq => in_flight.requested,
            other => {
                self.current = other;
                debug!(seq = event.seq, "discarding outcome of superseded fetch");
                return false;
            }
        };

        match event.outcome {
            FetchOutcome::Loaded { url, image } => {
                if let (Some(cache), Some(image)) = (&self.cache, &image) {
                    cache.put(url, Arc::clone(image));
                }
                self.transition(LoadState::Loaded);
                self.target.on_loaded(&requested, image);
            }
            FetchOutcome::Failed { message } => {
                self.transition(LoadState::Failed);
                self.target.on_failure(message, None);
            }
        }
        true
    }

    fn transition(&mut self, next: LoadState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "load state");
            self.state = next;
        }
    }
}

impl<T> Controller<T> {
    fn cancel_current(&mut self) -> bool {
        match self.current.take() {
            Some(in_flight) => {
                in_flight.handle.cancel();
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for Controller<T> {
    fn drop(&mut self) {
        self.cancel_current();
    }
}
