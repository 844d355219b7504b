//! Error types for the edgequake-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`]: **fatal**, the request cannot produce a result at all
//!   (file rejected by validation, unreadable document, every page failed).
//!   Returned as `Err(OcrError)` from [`crate::Extractor::process`].
//!
//! * [`PageError`]: **non-fatal**, a single page failed recognition (engine
//!   crash, timeout) but its siblings are fine. Stored inside
//!   [`crate::output::PageResult`] so callers can inspect partial success.
//!
//! Every `OcrError` carries a stable [`OcrError::code`] so an HTTP layer can
//! map it to a status without matching on display strings.

use thiserror::Error;

/// All fatal errors returned by the edgequake-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The file extension is not in the configured allow-list.
    #[error("File type '{extension}' is not supported. Allowed: {allowed}")]
    UnsupportedType { extension: String, allowed: String },

    /// Declared or actual size exceeds the configured maximum.
    #[error("File is {size} bytes, exceeding the maximum of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// Byte signature does not match a supported format or the claimed extension.
    #[error("File '{filename}' is corrupt or not the type its name claims: {detail}")]
    CorruptOrSpoofedFile { filename: String, detail: String },

    /// Filename was empty after sanitisation or contained a null byte.
    #[error("Invalid filename: {reason}")]
    InvalidFilename { reason: String },

    /// Requested recognition language is malformed or not installed.
    #[error("Language '{code}' is not supported")]
    UnsupportedLanguage { code: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// Signature was valid but the document could not be decoded or rasterised.
    #[error("Document could not be read: {detail}")]
    CorruptDocument { detail: String },

    // ── Recognition errors ────────────────────────────────────────────────
    /// Every page failed recognition.
    #[error("Text recognition failed on all {total} pages. First error: {first_error}")]
    RecognitionEngineError { total: usize, first_error: String },

    /// The whole request exceeded its time budget and was abandoned.
    #[error("Request timed out after {secs}s")]
    RequestTimeout { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected failure: scratch storage, task panic, resource exhaustion.
    #[error("Internal pipeline error: {0}")]
    InternalPipelineError(String),
}

impl OcrError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            OcrError::UnsupportedType { .. } => "unsupported_type",
            OcrError::FileTooLarge { .. } => "file_too_large",
            OcrError::CorruptOrSpoofedFile { .. } => "corrupt_or_spoofed_file",
            OcrError::InvalidFilename { .. } => "invalid_filename",
            OcrError::UnsupportedLanguage { .. } => "unsupported_language",
            OcrError::CorruptDocument { .. } => "corrupt_document",
            OcrError::RecognitionEngineError { .. } => "recognition_engine_error",
            OcrError::RequestTimeout { .. } => "request_timeout",
            OcrError::InvalidConfig(_) => "invalid_config",
            OcrError::InternalPipelineError(_) => "internal_pipeline_error",
        }
    }

    /// True when the caller sent something we refuse to process.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OcrError::UnsupportedType { .. }
                | OcrError::FileTooLarge { .. }
                | OcrError::CorruptOrSpoofedFile { .. }
                | OcrError::InvalidFilename { .. }
                | OcrError::UnsupportedLanguage { .. }
                | OcrError::CorruptDocument { .. }
        )
    }

    /// Suggested HTTP status for the request-handling layer.
    pub fn http_status(&self) -> u16 {
        match self {
            OcrError::FileTooLarge { .. } => 413,
            OcrError::UnsupportedType { .. }
            | OcrError::CorruptOrSpoofedFile { .. }
            | OcrError::InvalidFilename { .. }
            | OcrError::UnsupportedLanguage { .. } => 400,
            OcrError::CorruptDocument { .. } => 422,
            OcrError::RequestTimeout { .. } => 504,
            OcrError::RecognitionEngineError { .. }
            | OcrError::InvalidConfig(_)
            | OcrError::InternalPipelineError(_) => 500,
        }
    }

    /// Message safe to show an end user.
    ///
    /// Validation and document errors are specific and actionable; engine and
    /// infrastructure errors never leak diagnostics.
    pub fn user_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Processing failed. Please try again later.".to_string()
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The request continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The engine crashed, was missing, or returned unparseable output.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionEngineError { page: usize, detail: String },

    /// The engine did not answer within the per-page timeout.
    #[error("Page {page}: recognition timed out after {elapsed_ms}ms")]
    RecognitionTimeout { page: usize, elapsed_ms: u64 },

    /// The worker running this page panicked or was cancelled.
    #[error("Page {page}: worker failed: {detail}")]
    InternalPipelineError { page: usize, detail: String },
}

impl PageError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PageError::RecognitionEngineError { .. } => "recognition_engine_error",
            PageError::RecognitionTimeout { .. } => "recognition_timeout",
            PageError::InternalPipelineError { .. } => "internal_pipeline_error",
        }
    }

    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RecognitionEngineError { page, .. }
            | PageError::RecognitionTimeout { page, .. }
            | PageError::InternalPipelineError { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_maps_to_413() {
        let e = OcrError::FileTooLarge {
            size: 11,
            max: 10,
        };
        assert_eq!(e.http_status(), 413);
        assert_eq!(e.code(), "file_too_large");
        assert!(e.is_client_error());
    }

    #[test]
    fn engine_error_hides_diagnostics() {
        let e = OcrError::RecognitionEngineError {
            total: 2,
            first_error: "tesseract: Error opening data file /usr/share/tessdata".into(),
        };
        assert!(!e.is_client_error());
        assert_eq!(e.http_status(), 500);
        assert!(!e.user_message().contains("tessdata"));
    }

    #[test]
    fn validation_message_is_specific() {
        let e = OcrError::UnsupportedType {
            extension: ".gif".into(),
            allowed: ".png, .pdf".into(),
        };
        assert!(e.user_message().contains(".gif"));
    }

    #[test]
    fn page_timeout_display() {
        let e = PageError::RecognitionTimeout {
            page: 3,
            elapsed_ms: 5000,
        };
        assert!(e.to_string().contains("5000ms"));
        assert!(e.to_string().contains("Page 3"));
        assert_eq!(e.code(), "recognition_timeout");
        assert_eq!(e.page(), 3);
    }

    #[test]
    fn request_timeout_is_a_server_error() {
        let e = OcrError::RequestTimeout { secs: 30 };
        assert_eq!(e.http_status(), 504);
        assert!(!e.is_client_error());
    }
}
