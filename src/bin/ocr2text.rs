//! CLI binary for edgequake-ocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one extraction and prints the text.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocr::{
    ExtractionConfig, ExtractionProgressCallback, ExtractionResult, Extractor, PageSeparator,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Terminal progress ────────────────────────────────────────────────────────

/// One bar for the document plus one line per recognised page. With
/// `--concurrency` above 1 the lines arrive out of page order.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<HashMap<usize, Instant>>,
    words: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_message("decoding document");
        bar.enable_steady_tick(Duration::from_millis(100));
        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
            words: AtomicUsize::new(0),
        })
    }

    /// Seconds since `on_page_start` for this page, forgetting the entry.
    fn take_elapsed(&self, page_num: usize) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner} ocr [{bar:36.cyan/blue}] {pos}/{len} pages, {msg} ({elapsed})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        self.bar.set_style(style);
        self.bar.set_length(total_pages as u64);
        self.bar.set_message("0 words");
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut m) = self.started.lock() {
            m.insert(page_num, Instant::now());
        }
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, word_count: usize) {
        let secs = self.take_elapsed(page_num);
        let words = self.words.fetch_add(word_count, Ordering::SeqCst) + word_count;
        self.bar.println(format!(
            "  {} page {page_num}/{total_pages}: {word_count} words {}",
            green("ok"),
            dim(&format!("in {secs:.1}s")),
        ));
        self.bar.set_message(format!("{words} words"));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.take_elapsed(page_num);
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!(
            "  {} page {page_num}/{total_pages}: {} {}",
            red("failed"),
            first_line,
            dim(&format!("after {secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        if success_count < total_pages {
            eprintln!(
                "{} of {} pages could not be recognised",
                bold(&(total_pages - success_count).to_string()),
                total_pages
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract text to stdout
  ocr2text receipt.jpg

  # German scan, written to a file
  ocr2text -l deu brief.pdf -o brief.txt

  # Full result with per-page confidence as JSON
  ocr2text --json scan.png > scan.json

  # Page headers between pages, at most 10 pages
  ocr2text --separator header --max-pages 10 report.pdf

  # Languages accepted by --lang
  ocr2text --list-languages

ENVIRONMENT VARIABLES:
  Every flag can be set through the OCR_* variable shown in --help.
  RUST_LOG            Overrides the log filter (e.g. edgequake_ocr=debug)
  PDFIUM_LIB_PATH     Path to libpdfium, if not next to the binary or installed

SETUP:
  Tesseract with the language packs you need must be installed, e.g.
    apt install tesseract-ocr tesseract-ocr-deu
  PDF input additionally needs the pdfium library.
"#;

/// Extract text from images and PDFs with Tesseract OCR.
#[derive(Parser, Debug)]
#[command(
    name = "ocr2text",
    version,
    about = "Extract text from images and PDFs with Tesseract OCR",
    long_about = "Extract text from PNG, JPEG and PDF files. Pages are converted to grayscale, \
normalised to a target DPI, denoised and binarised before recognition, and per-word confidence \
is averaged into a document score.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image or PDF to read.
    #[arg(required_unless_present = "list_languages")]
    input: Option<PathBuf>,

    /// Write text (or JSON) to this file instead of stdout.
    #[arg(short, long, env = "OCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Recognition language, e.g. eng, deu, eng+fra.
    #[arg(short, long, env = "OCR_LANGUAGE", default_value = "eng")]
    lang: String,

    /// Target DPI for recognition (72–600).
    #[arg(long, env = "OCR_TARGET_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Longest page side in pixels after preprocessing.
    #[arg(long, env = "OCR_MAX_DIMENSION", default_value_t = 4000)]
    max_dimension: u32,

    /// Maximum pages read from a PDF; later pages are skipped.
    #[arg(long, env = "OCR_MAX_PAGES", default_value_t = 50)]
    max_pages: usize,

    /// Largest accepted input in megabytes.
    #[arg(long, env = "OCR_MAX_FILE_SIZE_MB", default_value_t = 10)]
    max_file_size_mb: u64,

    /// Extra Tesseract arguments.
    #[arg(long, env = "OCR_ENGINE_CONFIG", default_value = "--oem 3 --psm 3",
          allow_hyphen_values = true)]
    engine_config: String,

    /// Path to the tesseract executable.
    #[arg(long, env = "OCR_TESSERACT_PATH")]
    tesseract: Option<PathBuf>,

    /// Pages recognised at once.
    #[arg(short, long, env = "OCR_PAGE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-page recognition timeout in seconds.
    #[arg(long, env = "OCR_PAGE_TIMEOUT", default_value_t = 60)]
    page_timeout: u64,

    /// Whole-document timeout in seconds.
    #[arg(long, env = "OCR_REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// Page separator: blank, header, or a custom line.
    #[arg(long, env = "OCR_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Output the full result as JSON.
    #[arg(long, env = "OCR_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Print the accepted language codes and exit.
    #[arg(long)]
    list_languages: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list_languages;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Language listing ─────────────────────────────────────────────────
    if cli.list_languages {
        let config = ExtractionConfig::default();
        for (code, name) in config.supported_language_names() {
            println!("{code:<10} {name}");
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input file is required")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let extractor = Extractor::new(config);

    // ── Run extraction ───────────────────────────────────────────────────
    let bytes = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let result = extractor
        .process(&bytes, &filename, Some(cli.lang.as_str()))
        .await
        .with_context(|| format!("Extraction failed for {}", input.display()))?;

    let rendered = if cli.json {
        serde_json::to_string_pretty(&result).context("Failed to serialise result")?
    } else {
        result.text.clone()
    };

    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, &rendered).await?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        print_summary(&result, cli.output.as_deref(), show_progress);
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let separator = match cli.separator.as_str() {
        "blank" => PageSeparator::BlankLine,
        "header" => PageSeparator::PageHeader,
        custom => PageSeparator::Custom(custom.to_string()),
    };

    let mut builder = ExtractionConfig::builder()
        .language(cli.lang.clone())
        .target_dpi(cli.dpi)
        .max_image_dimension(cli.max_dimension)
        .max_pages(cli.max_pages)
        .max_file_size(cli.max_file_size_mb.saturating_mul(1024 * 1024))
        .engine_config(cli.engine_config.clone())
        .page_concurrency(cli.concurrency)
        .page_timeout_secs(cli.page_timeout)
        .request_timeout_secs(cli.request_timeout)
        .page_separator(separator);

    if let Some(ref path) = cli.tesseract {
        builder = builder.tesseract_path(path.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write via a temporary sibling and rename, so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}

fn print_summary(result: &ExtractionResult, output: Option<&Path>, progress_shown: bool) {
    let stats = &result.stats;
    let mark = if stats.failed_pages == 0 {
        green("✔")
    } else {
        red("warning:")
    };

    if let Some(path) = output {
        eprintln!(
            "{}  {}/{} pages  {} words  {:.1}% confidence  {}ms  →  {}",
            mark,
            stats.processed_pages,
            result.page_count,
            result.word_count,
            result.confidence,
            stats.total_duration_ms,
            bold(&path.display().to_string()),
        );
    } else if !progress_shown {
        eprintln!(
            "Recognised {}/{} pages, {} words, {:.1}% confidence in {}ms",
            stats.processed_pages,
            result.page_count,
            result.word_count,
            result.confidence,
            stats.total_duration_ms
        );
    } else {
        eprintln!(
            "   {} words  /  {:.1}% confidence  /  {}ms total",
            dim(&result.word_count.to_string()),
            result.confidence,
            stats.total_duration_ms,
        );
    }

    if result.truncated {
        eprintln!(
            "{} only the first {} of {} pages were read (--max-pages)",
            red("warning:"),
            result.page_count,
            result.source_page_count
        );
    }
}
