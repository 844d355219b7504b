//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each page. Callers can forward them
//! to a channel, a job record, or a terminal progress bar; the library knows
//! nothing about the host application.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct WordTally {
//!     words: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for WordTally {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, word_count: usize) {
//!         self.words.fetch_add(word_count, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} words", page_num, total_pages, word_count);
//!     }
//! }
//!
//! let tally = Arc::new(WordTally { words: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(tally as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// Pages are processed concurrently, so `on_page_start`, `on_page_complete`
/// and `on_page_error` may be called from different threads and out of page
/// order. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after the document has been split into pages.
    ///
    /// `total_pages` is the number of pages that will be recognised, after
    /// the page cap has been applied.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is preprocessed. `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was recognised.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, word_count: usize) {
        let _ = (page_num, total_pages, word_count);
    }

    /// Called when a page failed or timed out.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has settled.
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
