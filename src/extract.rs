//! Extraction entry points.
//!
//! [`Extractor`] is the long-lived handle a request-handling layer keeps:
//! it owns the read-only configuration, the recognition engine and the PDF
//! rasteriser, and bounds how many requests run at once. The free functions
//! [`process`] and [`process_sync`] build a one-off extractor for scripts
//! and tests.
//!
//! ## Request lifecycle
//!
//! ```text
//! validate ─▶ permit ─▶ scratch dir ─▶ pages ─▶ [preprocess ─▶ recognize] × N ─▶ aggregate
//! ```
//!
//! Validation runs first and touches nothing on disk, so a rejected upload
//! costs no page work and leaves no files. Everything after the permit runs
//! under the request timeout. The scratch directory is owned by the request
//! future: it disappears on success, on error and when the future is
//! dropped by the timeout or by the caller.

use crate::config::ExtractionConfig;
use crate::error::{OcrError, PageError};
use crate::output::ExtractionResult;
use crate::pipeline::aggregate::{aggregate, DocumentInfo, PageRun};
use crate::pipeline::pages::{extract_pages, PdfRasterizer, PdfiumRasterizer, RasterPage};
use crate::pipeline::preprocess::{preprocess, PreprocessSettings};
use crate::pipeline::recognize::{recognize_page, RecognitionEngine};
use crate::pipeline::scratch::ScratchSpace;
use crate::pipeline::tesseract::TesseractEngine;
use crate::pipeline::validate::{
    ensure_installed, validate, validate_language, ValidatedDocument,
};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Long-lived OCR pipeline shared by all requests.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_ocr::{ExtractionConfig, Extractor};
///
/// # async fn run() -> Result<(), edgequake_ocr::OcrError> {
/// let extractor = Extractor::new(ExtractionConfig::default());
/// let bytes = std::fs::read("receipt.jpg").unwrap();
/// let result = extractor.process(&bytes, "receipt.jpg", Some("eng")).await?;
/// println!("{} words, {:.1}% confidence", result.word_count, result.confidence);
/// # Ok(())
/// # }
/// ```
pub struct Extractor {
    config: Arc<ExtractionConfig>,
    engine: Arc<dyn RecognitionEngine>,
    rasterizer: Arc<dyn PdfRasterizer>,
    permits: Arc<Semaphore>,
    /// Packs reported by the engine at construction; `None` skips the check.
    installed_languages: Option<Vec<String>>,
}

impl Extractor {
    /// Build an extractor, resolving the engine and rasteriser from `config`.
    ///
    /// Engine resolution:
    /// 1. `config.engine`, when set
    /// 2. [`TesseractEngine`] at `config.tesseract_path`, else `tesseract` on `PATH`
    ///
    /// The engine is asked once for its installed languages (for Tesseract a
    /// short `--list-langs` run). Requests for a language it lacks are then
    /// rejected as [`OcrError::UnsupportedLanguage`] before any page work.
    pub fn new(config: ExtractionConfig) -> Self {
        let engine = resolve_engine(&config);
        let installed_languages = engine.available_languages();
        if let Some(ref langs) = installed_languages {
            debug!("{} languages installed: {}", engine.name(), langs.join(", "));
        }
        let rasterizer = config
            .rasterizer
            .clone()
            .unwrap_or_else(|| Arc::new(PdfiumRasterizer));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            config: Arc::new(config),
            engine,
            rasterizer,
            permits,
            installed_languages,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Name of the recognition engine in use.
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Extract text from an uploaded document.
    ///
    /// `language` falls back to the configured default when `None`.
    ///
    /// # Errors
    /// Returns `Err(OcrError)` only when no result can be produced: the
    /// upload was rejected, the document could not be read, every page
    /// failed, or the request ran out of time. Individual page failures are
    /// reported in [`ExtractionResult::pages`].
    pub async fn process(
        &self,
        bytes: &[u8],
        filename: &str,
        language: Option<&str>,
    ) -> Result<ExtractionResult, OcrError> {
        self.process_declared(bytes, filename, bytes.len() as u64, language)
            .await
    }

    /// Like [`Extractor::process`], with the size the client declared.
    ///
    /// The larger of `declared_size` and `bytes.len()` is checked against the
    /// size limit.
    pub async fn process_declared(
        &self,
        bytes: &[u8],
        filename: &str,
        declared_size: u64,
        language: Option<&str>,
    ) -> Result<ExtractionResult, OcrError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("extract", request_id = %request_id);

        async move {
            let doc = validate(bytes, filename, declared_size, &self.config)?;
            let language =
                validate_language(language.unwrap_or(self.config.language.as_str()), &self.config)?;
            if let Some(ref installed) = self.installed_languages {
                ensure_installed(&language, installed)?;
            }

            let _permit = self.permits.acquire().await.map_err(|_| {
                OcrError::InternalPipelineError("Extractor has been shut down".into())
            })?;

            let budget = self.config.request_timeout;
            match tokio::time::timeout(budget, self.run(request_id, doc, language)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Request exceeded {:?}; abandoning remaining work", budget);
                    Err(OcrError::RequestTimeout {
                        secs: budget.as_secs(),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        doc: ValidatedDocument,
        language: String,
    ) -> Result<ExtractionResult, OcrError> {
        let total_start = Instant::now();
        info!(
            "Extracting {} ({}, {} bytes, lang={})",
            doc.filename,
            doc.format,
            doc.bytes.len(),
            language
        );

        // ── Step 1: Scratch space ────────────────────────────────────────────
        let scratch = ScratchSpace::create(&self.config.scratch_root(), request_id)?;

        // ── Step 2: Pages ────────────────────────────────────────────────────
        let extract_start = Instant::now();
        let extracted = extract_pages(&doc, &self.config, Arc::clone(&self.rasterizer)).await?;
        let page_extraction_ms = extract_start.elapsed().as_millis() as u64;
        let total_pages = extracted.pages.len();

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(total_pages);
        }

        // ── Step 3: Preprocess + recognise ───────────────────────────────────
        let recognize_start = Instant::now();
        let runs = self
            .recognize_pages(extracted.pages, &language, scratch.path_buf())
            .await;
        let recognition_wall_ms = recognize_start.elapsed().as_millis() as u64;

        let succeeded = runs.iter().filter(|r| r.outcome.is_ok()).count();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(total_pages, succeeded);
        }

        if succeeded == 0 {
            let first_error = runs
                .iter()
                .find_map(|r| r.outcome.as_ref().err())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no pages were recognised".to_string());
            return Err(OcrError::RecognitionEngineError {
                total: total_pages,
                first_error,
            });
        }

        // ── Step 4: Aggregate ────────────────────────────────────────────────
        let mut result = aggregate(
            runs,
            DocumentInfo {
                original_filename: doc.filename.clone(),
                language,
                source_page_count: extracted.source_page_count,
                truncated: extracted.truncated,
            },
            &self.config.page_separator,
        );
        result.stats.page_extraction_ms = page_extraction_ms;
        result.stats.recognition_ms = recognition_wall_ms;
        result.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        scratch.close();

        info!(
            "Extraction complete: {}/{} pages, {} words, {:.1}% confidence, {}ms",
            result.stats.processed_pages,
            result.page_count,
            result.word_count,
            result.confidence,
            result.stats.total_duration_ms
        );
        Ok(result)
    }

    /// Preprocess and recognise pages on a bounded sub-pool.
    ///
    /// Results are written into a slot per page index, so the returned runs
    /// are in page order whatever order the pages finished in.
    async fn recognize_pages(
        &self,
        pages: Vec<RasterPage>,
        language: &str,
        workdir: PathBuf,
    ) -> Vec<PageRun> {
        let total_pages = pages.len();
        let settings = PreprocessSettings::from(self.config.as_ref());
        let language: Arc<str> = Arc::from(language);
        let mut slots: Vec<Option<PageRun>> = (0..total_pages).map(|_| None).collect();

        let mut runs = stream::iter(pages.into_iter().map(|page| {
            let engine = Arc::clone(&self.engine);
            let language = Arc::clone(&language);
            let workdir = workdir.clone();
            let callback = self.config.progress_callback.clone();
            let timeout = self.config.page_timeout;
            async move {
                let index = page.index;
                let page_num = index + 1;
                if let Some(ref cb) = callback {
                    cb.on_page_start(page_num, total_pages);
                }

                let start = Instant::now();
                let outcome =
                    match tokio::task::spawn_blocking(move || preprocess(&page, &settings)).await {
                        Ok(normalized) => {
                            recognize_page(engine, normalized, language, workdir, timeout).await
                        }
                        Err(e) => Err(PageError::InternalPipelineError {
                            page: page_num,
                            detail: format!("preprocessing failed: {}", e),
                        }),
                    };

                if let Some(ref cb) = callback {
                    match &outcome {
                        Ok(tokens) => cb.on_page_complete(page_num, total_pages, tokens.len()),
                        Err(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
                    }
                }

                PageRun {
                    index,
                    outcome,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }))
        .buffer_unordered(self.config.page_concurrency.max(1));

        while let Some(run) = runs.next().await {
            if let Some(slot) = slots.get_mut(run.index) {
                *slot = Some(run);
            }
        }

        slots.into_iter().flatten().collect()
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("engine", &self.engine.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Extract text from an uploaded document with a one-off [`Extractor`].
///
/// Prefer keeping an [`Extractor`] around when serving many requests; it
/// bounds concurrency across them.
pub async fn process(
    bytes: &[u8],
    filename: &str,
    language: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, OcrError> {
    Extractor::new(config.clone())
        .process(bytes, filename, language)
        .await
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    bytes: &[u8],
    filename: &str,
    language: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, OcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| {
            OcrError::InternalPipelineError(format!("Failed to create tokio runtime: {}", e))
        })?
        .block_on(process(bytes, filename, language, config))
}

fn resolve_engine(config: &ExtractionConfig) -> Arc<dyn RecognitionEngine> {
    if let Some(ref engine) = config.engine {
        return Arc::clone(engine);
    }
    let binary = config
        .tesseract_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("tesseract"));
    Arc::new(TesseractEngine::new(binary, &config.engine_config))
}
