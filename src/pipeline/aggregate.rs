//! Result aggregation: fold per-page outcomes into one [`ExtractionResult`].
//!
//! Pages arrive in completion order from the concurrent stage; they are
//! sorted by index here so the assembled text always follows document order.
//! A failed page keeps its slot in `pages` and in `page_count` but adds no
//! text and no words.

use crate::config::PageSeparator;
use crate::error::PageError;
use crate::output::{ExtractionResult, ExtractionStats, PageResult};
use crate::pipeline::recognize::WordToken;

/// What happened to one page.
#[derive(Debug)]
pub struct PageRun {
    /// 0-based page index.
    pub index: usize,
    pub outcome: Result<Vec<WordToken>, PageError>,
    pub duration_ms: u64,
}

/// Document-level facts carried into the result.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub original_filename: String,
    pub language: String,
    pub source_page_count: usize,
    pub truncated: bool,
}

/// Build the extraction result from every page's outcome.
///
/// Request-level timings in `stats` are left at zero for the caller, which
/// knows the wall-clock time of each stage. Per-page durations are carried
/// in each [`PageResult`].
pub fn aggregate(
    mut runs: Vec<PageRun>,
    info: DocumentInfo,
    separator: &PageSeparator,
) -> ExtractionResult {
    runs.sort_by_key(|r| r.index);

    let mut confidence_sum = 0.0f64;
    let mut scored = 0usize;
    let mut stats = ExtractionStats::default();
    let mut pages = Vec::with_capacity(runs.len());

    for run in runs {
        match run.outcome {
            Ok(tokens) => {
                stats.processed_pages += 1;
                let mut page_sum = 0.0f64;
                let mut page_scored = 0usize;
                for c in tokens.iter().filter_map(|t| t.confidence) {
                    page_sum += c as f64;
                    page_scored += 1;
                }
                stats.unscored_words += tokens.len() - page_scored;
                confidence_sum += page_sum;
                scored += page_scored;

                pages.push(PageResult {
                    index: run.index,
                    text: page_text(&tokens),
                    word_count: tokens.len(),
                    confidence: (page_scored > 0).then(|| round_confidence(page_sum / page_scored as f64)),
                    duration_ms: run.duration_ms,
                    error: None,
                });
            }
            Err(error) => {
                stats.failed_pages += 1;
                pages.push(PageResult {
                    index: run.index,
                    text: String::new(),
                    word_count: 0,
                    confidence: None,
                    duration_ms: run.duration_ms,
                    error: Some(error),
                });
            }
        }
    }
    stats.skipped_pages = info.source_page_count.saturating_sub(pages.len());

    let texts: Vec<(usize, &str)> = pages
        .iter()
        .filter(|p| p.error.is_none() && !p.text.is_empty())
        .map(|p| (p.index + 1, p.text.as_str()))
        .collect();
    let text = separator.join(&texts);

    let confidence = if scored == 0 {
        0.0
    } else {
        round_confidence(confidence_sum / scored as f64)
    };

    ExtractionResult {
        text,
        confidence,
        word_count: pages.iter().map(|p| p.word_count).sum(),
        page_count: pages.len(),
        language: info.language,
        original_filename: info.original_filename,
        truncated: info.truncated,
        source_page_count: info.source_page_count,
        pages,
        stats,
    }
}

/// Words on the same line joined by spaces, lines by newlines.
pub fn page_text(tokens: &[WordToken]) -> String {
    let mut out = String::new();
    let mut prev_line = None;
    for token in tokens {
        match prev_line {
            None => {}
            Some(line) if line == token.line => out.push(' '),
            Some(_) => out.push('\n'),
        }
        out.push_str(&token.text);
        prev_line = Some(token.line);
    }
    out
}

/// One decimal place, kept within 0–100.
fn round_confidence(mean: f64) -> f64 {
    ((mean * 10.0).round() / 10.0).clamp(0.0, 100.0)
}
