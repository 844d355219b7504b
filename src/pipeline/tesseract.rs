//! [`RecognitionEngine`] backed by the `tesseract` command-line tool.
//!
//! The page is written as PNG into the request's scratch directory and
//! Tesseract is asked for TSV output, which carries one row per word with
//! its confidence and its block/paragraph/line position:
//!
//! ```text
//! tesseract <page.png> stdout -l <lang> --dpi <dpi> --oem 3 --psm 3 tsv
//! ```
//!
//! Arguments are passed directly to the process, never through a shell.

use crate::pipeline::preprocess::NormalizedPage;
use crate::pipeline::recognize::{EngineError, EngineWord, RecognitionEngine};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Level of word rows in Tesseract's TSV output.
const TSV_WORD_LEVEL: u32 = 5;

/// Runs the Tesseract CLI once per page.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    tuning: Vec<String>,
}

impl TesseractEngine {
    /// `tuning` is a whitespace-separated argument string such as
    /// `"--oem 3 --psm 3"`.
    pub fn new(binary: impl Into<PathBuf>, tuning: &str) -> Self {
        Self {
            binary: binary.into(),
            tuning: tuning.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Language packs installed for this binary (`tesseract --list-langs`).
    pub fn installed_languages(&self) -> Result<Vec<String>, EngineError> {
        let output = self.command().arg("--list-langs").output().map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(EngineError::Failed(stderr_tail(&output.stderr)));
        }
        // Newer releases print the header on stdout, older ones on stderr.
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
            .map(str::to_string)
            .collect())
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::Unavailable(format!(
                "'{}' not found (install tesseract-ocr or set the tesseract path)",
                self.binary.display()
            ))
        } else {
            EngineError::Io(e)
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract", "--oem 3 --psm 3")
    }
}

impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn available_languages(&self) -> Option<Vec<String>> {
        match self.installed_languages() {
            Ok(langs) => Some(langs),
            Err(e) => {
                warn!("Could not list installed tesseract languages: {}", e);
                None
            }
        }
    }

    fn recognize(
        &self,
        page: &NormalizedPage,
        language: &str,
        workdir: &Path,
    ) -> Result<Vec<EngineWord>, EngineError> {
        let image_path = workdir.join(format!("page-{:04}.png", page.index));
        page.image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|e| EngineError::Failed(format!("could not write page image: {}", e)))?;

        let output = self
            .command()
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", language])
            .args(["--dpi", &page.dpi.to_string()])
            .args(&self.tuning)
            .arg("tsv")
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout))?;
        debug!(
            "tesseract: page {} → {} words",
            page.index + 1,
            words.len()
        );
        Ok(words)
    }
}

/// Parse Tesseract TSV output into words in reading order.
///
/// Only level-5 (word) rows are kept. Lines are numbered 0, 1, 2… in the
/// order their `(block, paragraph, line)` key first appears.
pub fn parse_tsv(tsv: &str) -> Result<Vec<EngineWord>, EngineError> {
    let mut rows = tsv.lines();
    match rows.next() {
        Some(header) if header.starts_with("level") => {}
        _ => {
            return Err(EngineError::MalformedOutput(
                "missing TSV header".to_string(),
            ))
        }
    }

    let mut words = Vec::new();
    let mut current_line: Option<(u32, u32, u32)> = None;
    let mut line_ordinal = 0u32;

    for (n, row) in rows.enumerate() {
        if row.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = row.split('\t').collect();
        let malformed = || EngineError::MalformedOutput(format!("row {}: '{}'", n + 2, row));

        if fields.len() < 11 {
            return Err(malformed());
        }
        let level: u32 = fields[0].parse().map_err(|_| malformed())?;
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let key = (
            fields[2].parse().map_err(|_| malformed())?,
            fields[3].parse().map_err(|_| malformed())?,
            fields[4].parse().map_err(|_| malformed())?,
        );
        let confidence: f32 = fields[10].trim().parse().map_err(|_| malformed())?;
        let text = fields.get(11).copied().unwrap_or("");

        match current_line {
            Some(prev) if prev != key => line_ordinal += 1,
            _ => {}
        }
        current_line = Some(key);

        words.push(EngineWord::new(text, confidence, line_ordinal));
    }

    Ok(words)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut s = HEADER.to_string();
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn word_rows_parsed_in_order() {
        let out = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t",
            "4\t1\t1\t1\t1\t0\t5\t5\t80\t10\t-1\t",
            "5\t1\t1\t1\t1\t1\t5\t5\t30\t10\t96.5\tHello",
            "5\t1\t1\t1\t1\t2\t40\t5\t40\t10\t91\tworld",
            "5\t1\t1\t1\t2\t1\t5\t20\t30\t10\t88.25\tnext",
            "5\t1\t2\t1\t1\t1\t5\t40\t30\t10\t-1\tblock",
        ]);
        let words = parse_tsv(&out).unwrap();
        assert_eq!(
            words,
            vec![
                EngineWord::new("Hello", 96.5, 0),
                EngineWord::new("world", 91.0, 0),
                EngineWord::new("next", 88.25, 1),
                EngineWord::new("block", -1.0, 2),
            ]
        );
    }

    #[test]
    fn blank_page_has_no_words() {
        let out = tsv(&["1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t"]);
        assert!(parse_tsv(&out).unwrap().is_empty());
    }

    #[test]
    fn word_row_without_text_column_is_empty_word() {
        let out = tsv(&["5\t1\t1\t1\t1\t1\t5\t5\t30\t10\t95"]);
        let words = parse_tsv(&out).unwrap();
        assert_eq!(words[0].text, "");
    }

    #[test]
    fn missing_header_is_malformed() {
        let err = parse_tsv("Hello world\n").unwrap_err();
        assert!(matches!(err, EngineError::MalformedOutput(_)));
        assert!(parse_tsv("").is_err());
    }

    #[test]
    fn garbage_confidence_is_malformed() {
        let out = tsv(&["5\t1\t1\t1\t1\t1\t5\t5\t30\t10\thigh\tword"]);
        assert!(matches!(
            parse_tsv(&out).unwrap_err(),
            EngineError::MalformedOutput(_)
        ));
    }

    #[test]
    fn tuning_string_split_into_args() {
        let engine = TesseractEngine::new("/usr/bin/tesseract", " --oem 1   --psm 6 ");
        assert_eq!(engine.tuning, vec!["--oem", "1", "--psm", "6"]);
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractEngine::new("/nonexistent/tesseract-binary", "");
        let dir = tempfile::tempdir().unwrap();
        let page = NormalizedPage {
            index: 0,
            dpi: 300,
            image: image::GrayImage::new(8, 8),
        };
        let err = engine.recognize(&page, "eng", dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
