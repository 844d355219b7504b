//! Pipeline integration tests with a scripted engine and rasteriser.
//!
//! Nothing here needs Tesseract or pdfium: the engine and the PDF
//! rasteriser are replaced by fakes that record how they were called, so
//! ordering, failure isolation and cleanup can be checked deterministically.

use edgequake_ocr::{
    EngineError, EngineWord, ExtractionConfig, ExtractionConfigBuilder,
    ExtractionProgressCallback, Extractor, NormalizedPage, OcrError, PageError, PageSeparator,
    PdfRasterizer, RasterLimits, RasterPage, RasterizedPdf, RecognitionEngine, NO_CONFIDENCE,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiff::encoder::{colortype, TiffEncoder};
use tracing_subscriber::EnvFilter;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Engine returning `page<N> text` for page N, with per-page slowdowns,
/// failures and word overrides.
#[derive(Default)]
struct FakeEngine {
    calls: AtomicUsize,
    slow: Vec<(usize, Duration)>,
    failing: Vec<usize>,
    words: Option<Vec<EngineWord>>,
    languages: Option<Vec<String>>,
    seen: Mutex<Vec<SeenCall>>,
}

#[derive(Debug, Clone)]
struct SeenCall {
    index: usize,
    bilevel: bool,
    language: String,
    workdir: PathBuf,
}

impl FakeEngine {
    fn new() -> Self {
        Self::default()
    }

    fn slow_on(mut self, index: usize, delay: Duration) -> Self {
        self.slow.push((index, delay));
        self
    }

    fn fail_on(mut self, index: usize) -> Self {
        self.failing.push(index);
        self
    }

    fn with_words(mut self, words: Vec<EngineWord>) -> Self {
        self.words = Some(words);
        self
    }

    fn with_languages(mut self, langs: &[&str]) -> Self {
        self.languages = Some(langs.iter().map(|l| l.to_string()).collect());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<SeenCall> {
        self.seen.lock().unwrap().clone()
    }
}

impl RecognitionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn available_languages(&self) -> Option<Vec<String>> {
        self.languages.clone()
    }

    fn recognize(
        &self,
        page: &NormalizedPage,
        language: &str,
        workdir: &Path,
    ) -> Result<Vec<EngineWord>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(SeenCall {
            index: page.index,
            bilevel: page.image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255),
            language: language.to_string(),
            workdir: workdir.to_path_buf(),
        });

        if let Some((_, delay)) = self.slow.iter().find(|(i, _)| *i == page.index) {
            std::thread::sleep(*delay);
        }
        if self.failing.contains(&page.index) {
            return Err(EngineError::Failed(format!(
                "simulated crash on page {}",
                page.index + 1
            )));
        }
        if let Some(ref words) = self.words {
            return Ok(words.clone());
        }
        Ok(vec![
            EngineWord::new(format!("page{}", page.index + 1), 90.0, 0),
            EngineWord::new("", 40.0, 0),
            EngineWord::new("text", NO_CONFIDENCE, 1),
        ])
    }
}

/// Rasteriser producing `pages` synthetic scans.
struct FakeRasterizer {
    pages: usize,
    calls: AtomicUsize,
    corrupt: bool,
}

impl FakeRasterizer {
    fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
            corrupt: false,
        }
    }

    fn corrupt() -> Self {
        Self {
            pages: 0,
            calls: AtomicUsize::new(0),
            corrupt: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PdfRasterizer for FakeRasterizer {
    fn rasterize(&self, _pdf: &[u8], limits: &RasterLimits) -> Result<RasterizedPdf, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.corrupt {
            return Err(OcrError::CorruptDocument {
                detail: "xref table missing".into(),
            });
        }
        let pages = (0..self.pages.min(limits.max_pages))
            .map(|index| RasterPage {
                index,
                dpi: limits.dpi,
                image: scan(64, 48),
            })
            .collect();
        Ok(RasterizedPdf {
            pages,
            total_pages: self.pages,
        })
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    finished_ok: AtomicUsize,
}

impl ExtractionProgressCallback for CountingProgress {
    fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _word_count: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_extraction_complete(&self, _total_pages: usize, success_count: usize) {
        self.finished_ok.store(success_count, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A grey page with a few dark strokes.
fn scan(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        if x % 13 < 2 || y == h / 2 {
            Rgb([20, 20, 30])
        } else {
            Rgb([200, 205, 210])
        }
    }))
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    scan(80, 60)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Grey TIFF with one frame per entry of `shades`.
fn tiff_bytes(shades: &[u8]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut buf).unwrap();
    for &shade in shades {
        let pixels: Vec<u8> = (0..40 * 30)
            .map(|i| if i % 7 == 0 { 0 } else { shade })
            .collect();
        encoder
            .write_image::<colortype::Gray8>(40, 30, &pixels)
            .unwrap();
    }
    buf.into_inner()
}

/// Route pipeline logs to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n".to_vec()
}

struct Harness {
    engine: Arc<FakeEngine>,
    rasterizer: Arc<FakeRasterizer>,
    _tmp: tempfile::TempDir,
    scratch_root: PathBuf,
}

impl Harness {
    fn new(engine: FakeEngine, rasterizer: FakeRasterizer) -> Self {
        init_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let scratch_root = tmp.path().join("scratch");
        Self {
            engine: Arc::new(engine),
            rasterizer: Arc::new(rasterizer),
            _tmp: tmp,
            scratch_root,
        }
    }

    fn builder(&self) -> ExtractionConfigBuilder {
        ExtractionConfig::builder()
            .engine(self.engine.clone())
            .rasterizer(self.rasterizer.clone())
            .scratch_root(&self.scratch_root)
    }

    fn extractor(&self) -> Extractor {
        Extractor::new(self.builder().build().unwrap())
    }

    /// No request directory is left under the scratch root.
    fn assert_scratch_clean(&self) {
        if self.scratch_root.exists() {
            let leftovers: Vec<_> = std::fs::read_dir(&self.scratch_root)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            assert!(leftovers.is_empty(), "scratch not cleaned: {leftovers:?}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_image_yields_one_page() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(0));
    let result = h
        .extractor()
        .process(&png_bytes(), "photo.png", None)
        .await
        .unwrap();

    assert_eq!(result.page_count, 1);
    assert_eq!(result.text, "page1\ntext");
    assert_eq!(result.word_count, 2);
    assert_eq!(result.confidence, 90.0);
    assert_eq!(result.language, "eng");
    assert_eq!(result.original_filename, "photo.png");
    assert!(!result.truncated);
    assert_eq!(h.rasterizer.calls(), 0);
    h.assert_scratch_clean();
}

#[tokio::test]
async fn engine_sees_bilevel_page_language_and_request_scratch() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(2));
    h.extractor()
        .process(&pdf_bytes(), "doc.pdf", Some("deu"))
        .await
        .unwrap();

    let seen = h.engine.seen();
    assert_eq!(seen.len(), 2);
    for call in &seen {
        assert!(call.bilevel, "page {} was not binarised", call.index);
        assert_eq!(call.language, "deu");
        assert!(call.workdir.starts_with(&h.scratch_root));
        assert!(!call.workdir.exists(), "scratch dir survived the request");
    }
    assert_eq!(seen[0].workdir, seen[1].workdir);
}

#[tokio::test]
async fn page_two_timeout_leaves_pages_one_and_three() {
    let h = Harness::new(
        FakeEngine::new().slow_on(1, Duration::from_millis(1000)),
        FakeRasterizer::with_pages(3),
    );
    let extractor = Extractor::new(
        h.builder()
            .page_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    );

    let result = extractor
        .process(&pdf_bytes(), "three.pdf", None)
        .await
        .unwrap();

    assert_eq!(result.page_count, 3);
    assert!(result.text.contains("page1"));
    assert!(result.text.contains("page3"));
    assert!(!result.text.contains("page2"));
    assert_eq!(result.text, "page1\ntext\n\npage3\ntext");

    assert!(matches!(
        result.pages[1].error,
        Some(PageError::RecognitionTimeout { page: 2, .. })
    ));
    assert!(result.pages[1].text.is_empty());
    assert!(result.pages[0].error.is_none());
    assert!(result.pages[2].error.is_none());
    assert_eq!(result.stats.failed_pages, 1);
    assert_eq!(result.word_count, 4);
    assert!(result.stats.recognition_ms <= result.stats.total_duration_ms);
    h.assert_scratch_clean();
}

#[tokio::test]
async fn every_tiff_frame_is_recognised() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(0));
    let extractor = Extractor::new(
        h.builder()
            .allowed_extensions([".png", ".tif"])
            .build()
            .unwrap(),
    );

    let result = extractor
        .process(&tiff_bytes(&[200, 180, 220]), "fax.tif", None)
        .await
        .unwrap();

    assert_eq!(result.page_count, 3);
    assert_eq!(result.source_page_count, 3);
    assert!(!result.truncated);
    assert_eq!(result.text, "page1\ntext\n\npage2\ntext\n\npage3\ntext");
    assert_eq!(h.engine.calls(), 3);
    assert_eq!(h.rasterizer.calls(), 0);
}

#[tokio::test]
async fn long_tiff_is_truncated_at_page_cap() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(0));
    let extractor = Extractor::new(
        h.builder()
            .allowed_extensions([".tiff"])
            .max_pages(2)
            .build()
            .unwrap(),
    );

    let result = extractor
        .process(&tiff_bytes(&[200; 4]), "batch.tiff", None)
        .await
        .unwrap();

    assert!(result.truncated);
    assert_eq!(result.page_count, 2);
    assert_eq!(result.source_page_count, 4);
    assert_eq!(result.stats.skipped_pages, 2);
}

#[tokio::test]
async fn language_missing_from_engine_rejected_before_work() {
    let h = Harness::new(
        FakeEngine::new().with_languages(&["eng", "osd"]),
        FakeRasterizer::with_pages(1),
    );
    let extractor = h.extractor();

    let err = extractor
        .process(&pdf_bytes(), "brief.pdf", Some("deu"))
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::UnsupportedLanguage { .. }));
    assert_eq!(err.http_status(), 400);
    assert_eq!(h.engine.calls(), 0);
    assert_eq!(h.rasterizer.calls(), 0);
    assert!(!h.scratch_root.exists());

    let result = extractor
        .process(&pdf_bytes(), "brief.pdf", Some("eng"))
        .await
        .unwrap();
    assert_eq!(result.page_count, 1);
}

#[tokio::test]
async fn oversized_file_never_reaches_extractor_or_engine() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(3));
    let extractor = Extractor::new(h.builder().max_file_size(32).build().unwrap());

    let err = extractor
        .process(&pdf_bytes(), "big.pdf", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::FileTooLarge { .. }));
    assert_eq!(h.rasterizer.calls(), 0);
    assert_eq!(h.engine.calls(), 0);
    assert!(!h.scratch_root.exists(), "validation must not touch disk");
}

#[tokio::test]
async fn declared_size_over_limit_is_rejected() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(1));
    let extractor = Extractor::new(h.builder().max_file_size(1024).build().unwrap());

    let err = extractor
        .process_declared(&png_bytes(), "photo.png", 50 * 1024 * 1024, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "file_too_large");
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn spoofed_png_is_corrupt_not_unsupported() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(1));
    let err = h
        .extractor()
        .process(b"MZ\x90\x00 definitely not an image", "cat.png", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::CorruptOrSpoofedFile { .. }));
    assert_eq!(err.http_status(), 400);
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn pdf_named_as_png_is_spoofed() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(1));
    let err = h
        .extractor()
        .process(&pdf_bytes(), "scan.png", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "corrupt_or_spoofed_file");
    assert_eq!(h.rasterizer.calls(), 0);
}

#[tokio::test]
async fn disallowed_extension_is_unsupported_type() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(1));
    let err = h
        .extractor()
        .process(&png_bytes(), "anim.gif", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::UnsupportedType { .. }));
}

#[tokio::test]
async fn corrupt_pdf_is_corrupt_document() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::corrupt());
    let err = h
        .extractor()
        .process(&pdf_bytes(), "broken.pdf", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::CorruptDocument { .. }));
    assert_eq!(err.http_status(), 422);
    assert_eq!(h.engine.calls(), 0);
    h.assert_scratch_clean();
}

#[tokio::test]
async fn pages_beyond_cap_are_truncated_not_rejected() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(5));
    let extractor = Extractor::new(h.builder().max_pages(2).build().unwrap());

    let result = extractor
        .process(&pdf_bytes(), "long.pdf", None)
        .await
        .unwrap();

    assert!(result.truncated);
    assert_eq!(result.page_count, 2);
    assert_eq!(result.source_page_count, 5);
    assert_eq!(result.stats.skipped_pages, 3);
    assert_eq!(h.engine.calls(), 2);
}

#[tokio::test]
async fn every_page_failing_is_engine_error() {
    let h = Harness::new(
        FakeEngine::new().fail_on(0).fail_on(1),
        FakeRasterizer::with_pages(2),
    );
    let err = h
        .extractor()
        .process(&pdf_bytes(), "dead.pdf", None)
        .await
        .unwrap_err();

    match &err {
        OcrError::RecognitionEngineError { total, first_error } => {
            assert_eq!(*total, 2);
            assert!(first_error.contains("simulated crash"));
        }
        other => panic!("expected RecognitionEngineError, got {other:?}"),
    }
    assert_eq!(err.http_status(), 500);
    assert!(!err.user_message().contains("simulated crash"));
    h.assert_scratch_clean();
}

#[tokio::test]
async fn every_page_timing_out_is_engine_error() {
    let h = Harness::new(
        FakeEngine::new().slow_on(0, Duration::from_millis(400)),
        FakeRasterizer::with_pages(0),
    );
    let extractor = Extractor::new(
        h.builder()
            .page_timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
    );
    let err = extractor
        .process(&png_bytes(), "slow.png", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "recognition_engine_error");
    h.assert_scratch_clean();
}

#[tokio::test]
async fn request_timeout_abandons_work_and_cleans_up() {
    let h = Harness::new(
        FakeEngine::new().slow_on(0, Duration::from_millis(500)),
        FakeRasterizer::with_pages(0),
    );
    let extractor = Extractor::new(
        h.builder()
            .request_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    );

    let err = extractor
        .process(&png_bytes(), "slow.png", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::RequestTimeout { .. }));
    assert_eq!(err.http_status(), 504);
    h.assert_scratch_clean();
}

#[tokio::test]
async fn sentinel_and_out_of_range_confidences_stay_in_bounds() {
    let h = Harness::new(
        FakeEngine::new().with_words(vec![
            EngineWord::new("a", 150.0, 0),
            EngineWord::new("b", NO_CONFIDENCE, 0),
            EngineWord::new("c", f32::NAN, 0),
            EngineWord::new("d", 50.0, 1),
            EngineWord::new("   ", 99.0, 1),
        ]),
        FakeRasterizer::with_pages(3),
    );
    let result = h
        .extractor()
        .process(&pdf_bytes(), "odd.pdf", None)
        .await
        .unwrap();

    assert!((0.0..=100.0).contains(&result.confidence));
    assert_eq!(result.confidence, 75.0);
    assert_eq!(result.word_count, 12);
    let per_page: usize = result.pages.iter().map(|p| p.word_count).sum();
    assert_eq!(result.word_count, per_page);
}

#[tokio::test]
async fn no_recognised_words_reports_zero_confidence() {
    let h = Harness::new(
        FakeEngine::new().with_words(vec![]),
        FakeRasterizer::with_pages(0),
    );
    let result = h
        .extractor()
        .process(&png_bytes(), "blank.png", None)
        .await
        .unwrap();
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.word_count, 0);
    assert_eq!(result.page_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_early_pages_do_not_reorder_text() {
    let h = Harness::new(
        FakeEngine::new()
            .slow_on(0, Duration::from_millis(150))
            .slow_on(1, Duration::from_millis(75)),
        FakeRasterizer::with_pages(4),
    );
    let result = h
        .extractor()
        .process(&pdf_bytes(), "order.pdf", None)
        .await
        .unwrap();

    let firsts: Vec<&str> = result
        .text
        .split("\n\n")
        .map(|p| p.lines().next().unwrap_or(""))
        .collect();
    assert_eq!(firsts, vec!["page1", "page2", "page3", "page4"]);
    let indices: Vec<usize> = result.pages.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn page_headers_number_pages_from_one() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(2));
    let extractor = Extractor::new(
        h.builder()
            .page_separator(PageSeparator::PageHeader)
            .build()
            .unwrap(),
    );
    let result = extractor
        .process(&pdf_bytes(), "doc.pdf", None)
        .await
        .unwrap();
    assert_eq!(
        result.text,
        "--- Page 1 ---\npage1\ntext\n\n--- Page 2 ---\npage2\ntext"
    );
}

#[tokio::test]
async fn progress_reports_every_page() {
    let progress = Arc::new(CountingProgress::default());
    let h = Harness::new(FakeEngine::new().fail_on(2), FakeRasterizer::with_pages(3));
    let extractor = Extractor::new(
        h.builder()
            .progress_callback(progress.clone())
            .build()
            .unwrap(),
    );
    extractor
        .process(&pdf_bytes(), "doc.pdf", None)
        .await
        .unwrap();

    assert_eq!(progress.started.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 2);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(progress.finished_ok.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn filename_is_sanitised_in_result() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(0));
    let result = h
        .extractor()
        .process(&png_bytes(), "../../etc/Scan 01.png", None)
        .await
        .unwrap();
    assert_eq!(result.original_filename, "Scan 01.png");
}

#[tokio::test]
async fn concurrent_requests_use_separate_scratch_dirs() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(1));
    let extractor = Arc::new(h.extractor());
    let png = png_bytes();

    let (a, b) = tokio::join!(
        extractor.process(&png, "a.png", None),
        extractor.process(&png, "b.png", None)
    );
    a.unwrap();
    b.unwrap();

    let dirs: std::collections::HashSet<PathBuf> =
        h.engine.seen().into_iter().map(|c| c.workdir).collect();
    assert_eq!(dirs.len(), 2);
    h.assert_scratch_clean();
}

#[test]
fn sync_wrapper_runs_pipeline() {
    let h = Harness::new(FakeEngine::new(), FakeRasterizer::with_pages(0));
    let config = h.builder().build().unwrap();
    let result = edgequake_ocr::process_sync(&png_bytes(), "s.png", Some("eng"), &config).unwrap();
    assert_eq!(result.page_count, 1);
}
