//! Progress-callback trait for image-embedding events.
//!
//! Every pass of the conversion is synchronous and fast except image
//! embedding, which fetches over the network in batches. Inject an
//! [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_wiki2md::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     embedded: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, bytes: usize) {
//!         self.embedded.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("image {}/{} embedded ({} bytes)", index + 1, total, bytes);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .embed_images(true)
//!     .progress_callback(Arc::new(CountingCallback { embedded: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the embedder as it processes each image.
///
/// Images within a batch are fetched concurrently, so `on_image_*` calls may
/// arrive out of document order. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first batch, with the number of images to embed.
    fn on_embed_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when an image was inlined.
    ///
    /// # Arguments
    /// * `index` — 0-based position of the image in document order
    /// * `total` — number of images being embedded
    /// * `bytes` — length of the produced data URI
    fn on_image_complete(&self, index: usize, total: usize, bytes: usize) {
        let _ = (index, total, bytes);
    }

    /// Called when both strategies failed and the image stays linked.
    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every batch has settled.
    fn on_embed_complete(&self, total_images: usize, embedded: usize) {
        let _ = (total_images, embedded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
