//! # urlimage
//!
//! Background image loading from URLs for display surfaces, with a shared,
//! byte-bounded LRU cache.
//!
//! A [`Controller`] per surface looks an image up in the [`ImageCache`] and,
//! on a miss, starts a cancellable [`Fetcher`] task that streams the response
//! and decodes it. Starting another load, setting an image explicitly, or
//! calling [`Controller::cancel_loading`] silences the previous fetch: its
//! outcome never reaches the surface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use urlimage::{Controller, DecodedImage, ImageTarget, config::LoaderConfig};
//!
//! struct Thumbnail;
//!
//! impl ImageTarget for Thumbnail {
//!     fn on_loaded(&mut self, url: &str, image: Option<Arc<DecodedImage>>) {
//!         println!("loaded {url}: {image:?}");
//!     }
//!     fn on_failure(&mut self, message: &str, _cause: Option<&(dyn std::error::Error + 'static)>) {
//!         eprintln!("{message}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoaderConfig::from_env()?;
//!     let cache = Arc::new(config.build_cache());
//!     let mut thumb = config.build_controller(Thumbnail, Some(cache));
//!
//!     thumb.request("http://127.0.0.1:8080/cat.png");
//!     thumb.process_next().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod controller;
pub mod decode;
pub mod fetch;
pub mod http;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{ByteSize, ImageCache, MemoryCache};
pub use controller::{Controller, ImageTarget, LoadState};
pub use decode::DecodedImage;
pub use fetch::{FAILURE_MESSAGE, FetchHandle, FetchOutcome, FetchState, Fetcher};
pub use transport::{HttpTransport, TlsTransport, Transport};
