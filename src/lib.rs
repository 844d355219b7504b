//! # edgequake-ocr
//!
//! Extract machine-readable text from uploaded images and PDFs.
//!
//! ## Why this crate?
//!
//! OCR accuracy is decided before the engine ever runs. Feeding Tesseract a
//! raw phone photo gives it colour noise, uneven lighting and the wrong
//! scale. This crate puts every page through a fixed, deterministic
//! preprocessing pipeline first, then runs the engine one page at a time
//! under a timeout and folds per-word confidence into a document score.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate    size, extension, magic bytes, filename (nothing written yet)
//!  ├─ 2. Pages       decode image, or rasterise PDF via pdfium (spawn_blocking)
//!  ├─ 3. Preprocess  grayscale → DPI/size fit → smooth → adaptive threshold
//!  ├─ 4. Recognise   Tesseract per page, concurrent, per-page timeout
//!  └─ 5. Aggregate   ordered text, word count, mean confidence
//! ```
//!
//! A page that fails recognition leaves a gap, not an error; the request
//! fails only when every page does. Scratch files live in a per-request
//! temporary directory that is removed on every exit path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ocr::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = Extractor::new(ExtractionConfig::default());
//!     let bytes = std::fs::read("invoice.pdf")?;
//!     let result = extractor.process(&bytes, "invoice.pdf", Some("eng")).await?;
//!     println!("{}", result.text);
//!     eprintln!("{} words, {:.1}% confidence", result.word_count, result.confidence);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr2text` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ocr = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! | Input | Needs |
//! |-------|-------|
//! | PNG / JPEG / TIFF | `tesseract` with the requested language packs |
//! | PDF | the above plus the pdfium shared library |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSeparator, DEFAULT_LANGUAGES};
pub use error::{OcrError, PageError};
pub use extract::{process, process_sync, Extractor};
pub use output::{ExtractionResult, ExtractionStats, PageResult};
pub use pipeline::pages::{PdfRasterizer, PdfiumRasterizer, RasterLimits, RasterPage, RasterizedPdf};
pub use pipeline::preprocess::NormalizedPage;
pub use pipeline::recognize::{EngineError, EngineWord, RecognitionEngine, WordToken, NO_CONFIDENCE};
pub use pipeline::tesseract::TesseractEngine;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
