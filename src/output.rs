//! Result types returned by an extraction.
//!
//! [`ExtractionResult`] is the record handed back to the request-handling
//! layer and serialised as the response payload. It is built once per
//! request and never persisted.

use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// Text and statistics extracted from one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Page texts in page order, joined by the configured page separator.
    pub text: String,

    /// Mean confidence of all scored words, 0–100, one decimal place.
    /// 0 when no word carried a confidence.
    pub confidence: f64,

    /// Non-empty words across all successfully recognised pages.
    pub word_count: usize,

    /// Pages accounted for in this result, failed ones included.
    pub page_count: usize,

    /// Recognition language code.
    pub language: String,

    /// Sanitised upload filename.
    pub original_filename: String,

    /// True when the document had more pages than `max_pages` allows.
    pub truncated: bool,

    /// Pages in the source document before the page cap was applied.
    pub source_page_count: usize,

    /// Per-page results, ordered by page index.
    pub pages: Vec<PageResult>,

    /// Timing and counters.
    pub stats: ExtractionStats,
}

impl ExtractionResult {
    /// Pages that failed recognition.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| p.error.is_some())
    }
}

/// Outcome for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based page index.
    pub index: usize,

    /// Recognised text, lines separated by `\n`. Empty when the page failed.
    pub text: String,

    /// Non-empty words on this page.
    pub word_count: usize,

    /// Mean confidence of scored words on this page, if any were scored.
    pub confidence: Option<f64>,

    /// Wall-clock time spent preprocessing and recognising this page.
    pub duration_ms: u64,

    /// Set when the page failed; the page then contributes no text.
    pub error: Option<PageError>,
}

/// Counters and timings for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub processed_pages: usize,
    pub failed_pages: usize,
    /// Pages dropped by the page cap.
    pub skipped_pages: usize,
    /// Tokens that carried no confidence.
    pub unscored_words: usize,
    pub total_duration_ms: u64,
    pub page_extraction_ms: u64,
    /// Wall-clock time of preprocessing and recognition across all pages.
    pub recognition_ms: u64,
}
