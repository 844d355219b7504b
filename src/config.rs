//! Configuration types for OCR extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is loaded once at startup
//! and shared read-only by every request; nothing in it is derived per image,
//! which is what keeps preprocessing deterministic.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on the
//! defaults below for the rest.

use crate::error::OcrError;
use crate::pipeline::pages::PdfRasterizer;
use crate::pipeline::recognize::RecognitionEngine;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Languages offered to clients when none are configured explicitly.
pub const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("eng", "English"),
    ("spa", "Spanish"),
    ("fra", "French"),
    ("deu", "German"),
    ("ita", "Italian"),
    ("por", "Portuguese"),
    ("rus", "Russian"),
    ("ara", "Arabic"),
    ("chi_sim", "Chinese (Simplified)"),
    ("jpn", "Japanese"),
];

/// Configuration for an OCR extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ocr::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .target_dpi(300)
///     .max_pages(20)
///     .language("deu")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Largest accepted upload in bytes. Default: 10 MiB.
    pub max_file_size: u64,

    /// Accepted file extensions, lower-case with leading dot.
    /// Default: `.png`, `.jpg`, `.jpeg`, `.pdf`.
    pub allowed_extensions: Vec<String>,

    /// Resolution the engine should see, in dots per inch. Range: 72–600. Default: 300.
    ///
    /// PDF pages are rasterised at this density. Images whose nominal density
    /// is lower are upscaled toward it during preprocessing; Tesseract's
    /// accuracy drops sharply on glyphs below roughly 20 px cap height.
    pub target_dpi: u32,

    /// Density assumed for images that carry no DPI metadata. Default: 300.
    pub assumed_image_dpi: u32,

    /// Hard ceiling on either page dimension in pixels. Default: 4000.
    ///
    /// Wins over DPI normalisation. Recognition cost grows with pixel count
    /// while accuracy stops improving well below this size.
    pub max_image_dimension: u32,

    /// Side of the square smoothing kernel (odd). Default: 5.
    pub blur_kernel_size: u32,

    /// Side of the adaptive-threshold neighbourhood (odd). Default: 11.
    pub threshold_block_size: u32,

    /// Amount subtracted from the neighbourhood mean before thresholding. Default: 2.
    pub threshold_offset: i32,

    /// Recognition language used when the caller does not pick one. Default: "eng".
    pub language: String,

    /// Languages a caller may request. Empty means any well-formed code.
    pub supported_languages: Vec<String>,

    /// Extra engine arguments. Default: "--oem 3 --psm 3".
    pub engine_config: String,

    /// Path to the `tesseract` executable. Default: looked up on `PATH`.
    pub tesseract_path: Option<PathBuf>,

    /// Pre-constructed recognition engine. Takes precedence over `tesseract_path`.
    pub engine: Option<Arc<dyn RecognitionEngine>>,

    /// Pre-constructed PDF rasteriser. Default: pdfium.
    pub rasterizer: Option<Arc<dyn PdfRasterizer>>,

    /// Per-page recognition budget. Default: 60 s.
    pub page_timeout: Duration,

    /// Whole-request budget, covering decoding through aggregation. Default: 300 s.
    pub request_timeout: Duration,

    /// Pages beyond this count are dropped and the result flagged truncated. Default: 50.
    pub max_pages: usize,

    /// Pages of one request preprocessed and recognised at once. Default: 4.
    pub page_concurrency: usize,

    /// Requests an [`crate::Extractor`] runs at once. Default: available parallelism.
    pub max_concurrent_requests: usize,

    /// Parent of the per-request scratch directories. Default: `$TMPDIR/edgequake-ocr`.
    pub scratch_root: Option<PathBuf>,

    /// Longest sanitised filename kept, in characters. Default: 255.
    pub max_filename_len: usize,

    /// Page separator in the assembled text. Default: blank line.
    pub page_separator: PageSeparator,

    /// Optional per-page progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: [".png", ".jpg", ".jpeg", ".pdf"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            target_dpi: 300,
            assumed_image_dpi: 300,
            max_image_dimension: 4000,
            blur_kernel_size: 5,
            threshold_block_size: 11,
            threshold_offset: 2,
            language: "eng".to_string(),
            supported_languages: DEFAULT_LANGUAGES
                .iter()
                .map(|(code, _)| code.to_string())
                .collect(),
            engine_config: "--oem 3 --psm 3".to_string(),
            tesseract_path: None,
            engine: None,
            rasterizer: None,
            page_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            max_pages: 50,
            page_concurrency: 4,
            max_concurrent_requests: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            scratch_root: None,
            max_filename_len: 255,
            page_separator: PageSeparator::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_file_size", &self.max_file_size)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("target_dpi", &self.target_dpi)
            .field("assumed_image_dpi", &self.assumed_image_dpi)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("blur_kernel_size", &self.blur_kernel_size)
            .field("threshold_block_size", &self.threshold_block_size)
            .field("threshold_offset", &self.threshold_offset)
            .field("language", &self.language)
            .field("engine_config", &self.engine_config)
            .field("tesseract_path", &self.tesseract_path)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn PdfRasterizer>"))
            .field("page_timeout", &self.page_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_pages", &self.max_pages)
            .field("page_concurrency", &self.page_concurrency)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("scratch_root", &self.scratch_root)
            .field("page_separator", &self.page_separator)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory under which request scratch directories are created.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("edgequake-ocr"))
    }

    /// `(code, display name)` for every supported language. Codes without a
    /// known name are shown as their own name.
    pub fn supported_language_names(&self) -> Vec<(String, String)> {
        self.supported_languages
            .iter()
            .map(|code| {
                let name = DEFAULT_LANGUAGES
                    .iter()
                    .find(|(c, _)| c == code)
                    .map(|(_, n)| n.to_string())
                    .unwrap_or_else(|| code.clone());
                (code.clone(), name)
            })
            .collect()
    }

    /// Comma-separated allow-list, for error messages.
    pub fn allowed_extensions_display(&self) -> String {
        self.allowed_extensions.join(", ")
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    /// Replace the extension allow-list. Entries are normalised to `.ext`.
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| normalise_extension(e.as_ref()))
            .filter(|e| e.len() > 1)
            .collect();
        self
    }

    pub fn target_dpi(mut self, dpi: u32) -> Self {
        self.config.target_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn assumed_image_dpi(mut self, dpi: u32) -> Self {
        self.config.assumed_image_dpi = dpi.clamp(1, 1200);
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(100);
        self
    }

    /// Smoothing kernel side; even values are rounded up to the next odd one.
    pub fn blur_kernel_size(mut self, k: u32) -> Self {
        self.config.blur_kernel_size = make_odd(k.clamp(1, 15));
        self
    }

    /// Threshold neighbourhood side; even values are rounded up to the next odd one.
    pub fn threshold_block_size(mut self, b: u32) -> Self {
        self.config.threshold_block_size = make_odd(b.clamp(3, 255));
        self
    }

    pub fn threshold_offset(mut self, c: i32) -> Self {
        self.config.threshold_offset = c.clamp(-255, 255);
        self
    }

    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.config.language = code.into();
        self
    }

    pub fn supported_languages<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_languages = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn engine_config(mut self, tuning: impl Into<String>) -> Self {
        self.config.engine_config = tuning.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = Some(path.into());
        self
    }

    pub fn engine(mut self, engine: Arc<dyn RecognitionEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.config.page_timeout = timeout;
        self
    }

    pub fn page_timeout_secs(self, secs: u64) -> Self {
        self.page_timeout(Duration::from_secs(secs))
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn max_concurrent_requests(mut self, n: usize) -> Self {
        self.config.max_concurrent_requests = n.max(1);
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn max_filename_len(mut self, n: usize) -> Self {
        self.config.max_filename_len = n.max(8);
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, OcrError> {
        let c = &self.config;
        if c.max_file_size == 0 {
            return Err(OcrError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(OcrError::InvalidConfig(
                "At least one allowed extension is required".into(),
            ));
        }
        if c.page_timeout.is_zero() || c.request_timeout.is_zero() {
            return Err(OcrError::InvalidConfig("Timeouts must be > 0".into()));
        }
        if c.language.trim().is_empty() {
            return Err(OcrError::InvalidConfig(
                "Default language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

fn make_odd(n: u32) -> u32 {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Lower-case an extension and ensure it has a leading dot.
pub fn normalise_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the assembled text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined by a single blank line. (default)
    #[default]
    BlankLine,
    /// Every page prefixed with a `--- Page N ---` header line.
    PageHeader,
    /// Custom line inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Join already-rendered page texts. `pages` holds `(page_num, text)`
    /// with 1-indexed page numbers, in page order.
    pub fn join(&self, pages: &[(usize, &str)]) -> String {
        let mut out = String::new();
        for (i, (page_num, text)) in pages.iter().enumerate() {
            if i > 0 {
                match self {
                    PageSeparator::BlankLine | PageSeparator::PageHeader => out.push_str("\n\n"),
                    PageSeparator::Custom(s) => {
                        out.push_str("\n\n");
                        out.push_str(s);
                        out.push_str("\n\n");
                    }
                }
            }
            if let PageSeparator::PageHeader = self {
                out.push_str(&format!("--- Page {} ---\n", page_num));
            }
            out.push_str(text);
        }
        out
    }
}
