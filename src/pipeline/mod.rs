//! Pipeline stages for document-to-text extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the recognition backend can be swapped without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ validate ──▶ pages ──▶ preprocess ──▶ recognize ──▶ aggregate
//!          (gatekeeper) (decode/   (grayscale,    (engine,      (text,
//!                        pdfium)    fit, binarise) per page)     confidence)
//! ```
//!
//! 1. [`validate`]   size, extension and magic-byte checks; filename
//!    sanitisation. Runs before anything touches disk.
//! 2. [`pages`]      decode images or rasterise PDFs; `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`preprocess`] deterministic pixel pipeline tuned for OCR
//! 4. [`recognize`]  one engine call per page under a timeout;
//!    [`tesseract`] is the default engine
//! 5. [`aggregate`]  ordered reassembly and confidence averaging
//!
//! [`scratch`] owns the per-request temporary directory the engine writes
//! page images into.

pub mod aggregate;
pub mod pages;
pub mod preprocess;
pub mod recognize;
pub mod scratch;
pub mod tesseract;
pub mod validate;
