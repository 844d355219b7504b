//! Recognition adapter: run the engine on one normalised page.
//!
//! The engine is a capability behind the [`RecognitionEngine`] trait: given a
//! page and a language it returns words with confidences. Production uses
//! [`crate::pipeline::tesseract::TesseractEngine`]; tests plug in scripted
//! fakes so pipeline behaviour does not depend on an installed engine.
//!
//! ## Failure model
//!
//! Every call is made exactly once. Engine errors, worker panics and
//! timeouts become a [`PageError`] for that page only; [`recognize_page`]
//! never returns a fatal error, so one bad page cannot sink its siblings.
//!
//! Engine calls are blocking and not cancellable. On timeout the blocking
//! task is detached: the page is reported failed immediately and whatever
//! the engine eventually returns is discarded.

use crate::error::PageError;
use crate::pipeline::preprocess::NormalizedPage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Confidence engines report for words they could not score.
pub const NO_CONFIDENCE: f32 = -1.0;

/// A word exactly as the engine reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineWord {
    pub text: String,
    /// 0–100, or negative when the engine has no score.
    pub confidence: f32,
    /// Reading-order line ordinal within the page.
    pub line: u32,
}

impl EngineWord {
    pub fn new(text: impl Into<String>, confidence: f32, line: u32) -> Self {
        Self {
            text: text.into(),
            confidence,
            line,
        }
    }
}

/// A recognised word ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct WordToken {
    /// Never empty.
    pub text: String,
    /// `None` when the engine reported no score. Never coerced to 0.
    pub confidence: Option<f32>,
    pub line: u32,
}

/// Errors an engine implementation may return.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary or its language data is missing.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran and reported failure.
    #[error("engine failed: {0}")]
    Failed(String),

    /// The engine's output could not be parsed.
    #[error("malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A text-recognition capability.
///
/// Implementations are called from Tokio's blocking pool and may block for
/// as long as they need. `workdir` is a request-scoped scratch directory the
/// engine may write intermediate files into; it can disappear once the
/// request is over, including while a detached call is still running.
pub trait RecognitionEngine: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Language codes this engine can actually recognise, or `None` when it
    /// cannot tell. Queried once when an [`crate::Extractor`] is built.
    fn available_languages(&self) -> Option<Vec<String>> {
        None
    }

    /// Recognise the words on one page, in reading order.
    fn recognize(
        &self,
        page: &NormalizedPage,
        language: &str,
        workdir: &Path,
    ) -> Result<Vec<EngineWord>, EngineError>;
}

/// Drop empty words and turn sentinel confidences into `None`.
///
/// Zero-width and other invisible characters are removed first, so a word
/// made only of them counts as empty. Negative or non-finite confidences
/// mean "not scored". Scores above 100 are clamped so averages stay in
/// range. Order is preserved.
pub fn normalize_words(words: Vec<EngineWord>) -> Vec<WordToken> {
    words
        .into_iter()
        .filter_map(|w| {
            let text = remove_invisible_chars(&w.text);
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let confidence = if w.confidence.is_finite() && w.confidence >= 0.0 {
                Some(w.confidence.min(100.0))
            } else {
                None
            };
            Some(WordToken {
                text: text.to_string(),
                confidence,
                line: w.line,
            })
        })
        .collect()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

/// Recognise one page on the blocking pool under a timeout.
pub async fn recognize_page(
    engine: Arc<dyn RecognitionEngine>,
    page: NormalizedPage,
    language: Arc<str>,
    workdir: PathBuf,
    timeout: Duration,
) -> Result<Vec<WordToken>, PageError> {
    let page_num = page.index + 1;
    let start = Instant::now();

    let handle =
        tokio::task::spawn_blocking(move || engine.recognize(&page, &language, &workdir));

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(words))) => {
            let tokens = normalize_words(words);
            debug!(
                "Page {}: {} words in {}ms",
                page_num,
                tokens.len(),
                start.elapsed().as_millis()
            );
            Ok(tokens)
        }
        Ok(Ok(Err(e))) => {
            warn!("Page {}: recognition failed: {}", page_num, e);
            Err(PageError::RecognitionEngineError {
                page: page_num,
                detail: e.to_string(),
            })
        }
        Ok(Err(join_err)) => {
            warn!("Page {}: recognition worker failed: {}", page_num, join_err);
            Err(PageError::InternalPipelineError {
                page: page_num,
                detail: join_err.to_string(),
            })
        }
        Err(_) => {
            // The JoinHandle was dropped by `timeout`, detaching the call.
            warn!(
                "Page {}: recognition timed out after {:?}; abandoning engine call",
                page_num, timeout
            );
            Err(PageError::RecognitionTimeout {
                page: page_num,
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}
