//! Upload validation: size, extension, magic bytes, filename, language.
//!
//! Nothing here touches the filesystem. Every check runs before any page is
//! decoded or any scratch directory exists, so a rejected upload costs no more
//! than a few byte comparisons.
//!
//! Checks run in this order: size, filename, extension, signature. A file
//! named `scan.png` whose bytes are not a PNG is reported as spoofed rather
//! than unsupported: the extension is on the allow-list, the content is not.

use crate::config::{normalise_extension, ExtractionConfig};
use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Formats the pipeline can turn into raster pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Png,
    Jpeg,
    Tiff,
    Pdf,
}

impl DocumentFormat {
    /// Identify a format from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(DocumentFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(DocumentFormat::Jpeg),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => {
                Some(DocumentFormat::Tiff)
            }
            _ if bytes.starts_with(b"%PDF-") => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    /// Format a (normalised, dotted) extension claims to be.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".png" => Some(DocumentFormat::Png),
            ".jpg" | ".jpeg" => Some(DocumentFormat::Jpeg),
            ".tif" | ".tiff" => Some(DocumentFormat::Tiff),
            ".pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    /// True for formats that may hold more than one page.
    pub fn is_paginated(self) -> bool {
        matches!(self, DocumentFormat::Pdf | DocumentFormat::Tiff)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Tiff => "image/tiff",
            DocumentFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// An upload that passed every check. Immutable.
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    /// Raw upload bytes, shared with blocking workers without copying.
    pub bytes: Arc<[u8]>,
    /// Filename as the client declared it.
    pub declared_filename: String,
    /// Filename safe for download naming.
    pub filename: String,
    /// Size the client declared.
    pub declared_size: u64,
    /// Format identified from the byte signature.
    pub format: DocumentFormat,
}

/// Validate an upload without processing it.
///
/// The larger of `declared_size` and the actual buffer length is compared
/// against the limit, so a client cannot understate its upload.
pub fn validate(
    bytes: &[u8],
    declared_filename: &str,
    declared_size: u64,
    config: &ExtractionConfig,
) -> Result<ValidatedDocument, OcrError> {
    let size = declared_size.max(bytes.len() as u64);
    if size > config.max_file_size {
        return Err(OcrError::FileTooLarge {
            size,
            max: config.max_file_size,
        });
    }

    let filename = sanitize_filename(declared_filename, config.max_filename_len)?;

    let extension = extension_of(&filename);
    if !config.allowed_extensions.iter().any(|e| *e == extension) {
        return Err(OcrError::UnsupportedType {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            allowed: config.allowed_extensions_display(),
        });
    }

    let sniffed = DocumentFormat::sniff(bytes).ok_or_else(|| OcrError::CorruptOrSpoofedFile {
        filename: filename.clone(),
        detail: if bytes.is_empty() {
            "file is empty".to_string()
        } else {
            "content is not a supported image or PDF".to_string()
        },
    })?;

    match DocumentFormat::from_extension(&extension) {
        Some(claimed) if claimed == sniffed => {}
        Some(claimed) => {
            return Err(OcrError::CorruptOrSpoofedFile {
                filename,
                detail: format!("named as {claimed} but content is {sniffed}"),
            });
        }
        None => {
            return Err(OcrError::UnsupportedType {
                extension,
                allowed: config.allowed_extensions_display(),
            });
        }
    }

    debug!(
        filename = %filename,
        format = %sniffed,
        size,
        "Upload validated"
    );

    Ok(ValidatedDocument {
        bytes: Arc::from(bytes),
        declared_filename: declared_filename.to_string(),
        filename,
        declared_size,
        format: sniffed,
    })
}

/// Reduce a client-supplied filename to a bare, safe name.
///
/// Directory components (either separator style) and `..` segments are
/// dropped, characters outside `[A-Za-z0-9._- ]` removed, leading dots
/// stripped, and the result truncated to `max_len` characters keeping the
/// extension. Null bytes are rejected outright.
pub fn sanitize_filename(name: &str, max_len: usize) -> Result<String, OcrError> {
    if name.contains('\0') {
        return Err(OcrError::InvalidFilename {
            reason: "filename contains a null byte".into(),
        });
    }

    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        return Err(OcrError::InvalidFilename {
            reason: format!("'{}' has no usable characters", name.escape_default()),
        });
    }

    Ok(truncate_keeping_extension(cleaned, max_len))
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() + 1 < max_len => {
            let keep = max_len - ext.len() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => name.chars().take(max_len).collect(),
    }
}

/// Lower-case dotted extension of a sanitised filename, or empty.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => normalise_extension(ext),
        _ => String::new(),
    }
}

/// Check a recognition language request such as `eng` or `eng+fra`.
///
/// Codes go to the engine as a single argument, never through a shell, but
/// are still restricted to `[A-Za-z0-9_]` parts joined by `+`. When the
/// config lists supported languages every part must be among them.
pub fn validate_language(code: &str, config: &ExtractionConfig) -> Result<String, OcrError> {
    let code = code.trim();
    let unsupported = || OcrError::UnsupportedLanguage {
        code: code.to_string(),
    };

    if code.is_empty() {
        return Err(unsupported());
    }

    for part in code.split('+') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(unsupported());
        }
        if !config.supported_languages.is_empty()
            && !config.supported_languages.iter().any(|l| l == part)
        {
            return Err(unsupported());
        }
    }

    Ok(code.to_string())
}

/// Check a validated language request against the packs the engine has.
///
/// Every `+`-joined part must be installed. Run after [`validate_language`],
/// so a listed-but-missing pack is rejected up front instead of failing each
/// page inside the engine.
pub fn ensure_installed(code: &str, installed: &[String]) -> Result<(), OcrError> {
    match code.split('+').find(|part| !installed.iter().any(|l| l == part)) {
        Some(missing) => {
            debug!(language = %code, missing, "Language pack not installed");
            Err(OcrError::UnsupportedLanguage {
                code: code.to_string(),
            })
        }
        None => Ok(()),
    }
}
