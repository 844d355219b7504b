//! Page extraction: turn a validated upload into ordered raster pages.
//!
//! PNG and JPEG images become exactly one page at native resolution. TIFF
//! files yield one page per frame, also at native resolution. PDFs are
//! rasterised page by page at the target DPI through a [`PdfRasterizer`],
//! pdfium by default.
//!
//! ## Why spawn_blocking?
//!
//! Image decoding is CPU-bound and pdfium keeps thread-local state that is
//! not safe to drive from async contexts. Both run on Tokio's blocking pool
//! so request intake never stalls behind a large scan.
//!
//! ## Why cap pages instead of failing?
//!
//! A 400-page upload would hold a worker for many minutes. Pages beyond
//! `max_pages` are dropped and the result is flagged `truncated`, letting the
//! caller tell the user that only part of the document was read.

use crate::config::ExtractionConfig;
use crate::error::OcrError;
use crate::pipeline::validate::{DocumentFormat, ValidatedDocument};
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, ImageFormat, RgbImage, RgbaImage,
};
use pdfium_render::prelude::*;
use std::io::{Cursor, Read, Seek};
use std::sync::Arc;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, info, warn};

/// PDF page size unit: 72 points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// One page as decoded or rasterised, before preprocessing.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 0-based page index in document order.
    pub index: usize,
    /// Nominal or assumed resolution of `image`.
    pub dpi: u32,
    pub image: DynamicImage,
}

/// Result of page extraction.
#[derive(Debug)]
pub struct ExtractedPages {
    /// Pages `0..pages.len()`, in order.
    pub pages: Vec<RasterPage>,
    /// Pages in the source document.
    pub source_page_count: usize,
    /// True when pages were dropped by the cap.
    pub truncated: bool,
}

/// Rendering limits handed to a [`PdfRasterizer`].
#[derive(Debug, Clone, Copy)]
pub struct RasterLimits {
    pub dpi: u32,
    pub max_dimension: u32,
    pub max_pages: usize,
}

/// Pages a rasteriser produced plus the document's real page count.
#[derive(Debug)]
pub struct RasterizedPdf {
    pub pages: Vec<RasterPage>,
    pub total_pages: usize,
}

/// Turns PDF bytes into raster pages. Called on the blocking pool.
///
/// Implementations render pages `0..min(total_pages, limits.max_pages)` in
/// order and fail with [`OcrError::CorruptDocument`] when the document
/// cannot be opened.
pub trait PdfRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8], limits: &RasterLimits) -> Result<RasterizedPdf, OcrError>;
}

/// Split a validated upload into raster pages.
pub async fn extract_pages(
    doc: &ValidatedDocument,
    config: &ExtractionConfig,
    rasterizer: Arc<dyn PdfRasterizer>,
) -> Result<ExtractedPages, OcrError> {
    let bytes = Arc::clone(&doc.bytes);
    let format = doc.format;
    let limits = RasterLimits {
        dpi: config.target_dpi,
        max_dimension: config.max_image_dimension,
        max_pages: config.max_pages,
    };
    let assumed_dpi = config.assumed_image_dpi;

    let extracted = tokio::task::spawn_blocking(move || {
        match format {
            DocumentFormat::Pdf => rasterize_document(&bytes, rasterizer.as_ref(), &limits),
            DocumentFormat::Tiff => decode_tiff(&bytes, limits.max_pages, assumed_dpi),
            DocumentFormat::Png | DocumentFormat::Jpeg => {
                decode_image(&bytes, format, assumed_dpi)
            }
        }
    })
    .await
    .map_err(|e| OcrError::InternalPipelineError(format!("Page extraction task failed: {}", e)))??;

    if extracted.truncated {
        warn!(
            "Document has {} pages; only the first {} will be processed",
            extracted.source_page_count,
            extracted.pages.len()
        );
    }
    info!(
        "Extracted {} page(s) from {}",
        extracted.pages.len(),
        format
    );
    Ok(extracted)
}

/// Decode a single-page image at native resolution.
fn decode_image(
    bytes: &[u8],
    format: DocumentFormat,
    assumed_dpi: u32,
) -> Result<ExtractedPages, OcrError> {
    let image_format = match format {
        DocumentFormat::Png => ImageFormat::Png,
        DocumentFormat::Jpeg => ImageFormat::Jpeg,
        DocumentFormat::Tiff | DocumentFormat::Pdf => {
            return Err(OcrError::InternalPipelineError(format!(
                "{format} routed to the single-image decoder"
            )))
        }
    };

    let image = image::load_from_memory_with_format(bytes, image_format).map_err(|e| {
        OcrError::CorruptDocument {
            detail: format!("Image could not be decoded: {}", e),
        }
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(OcrError::CorruptDocument {
            detail: "Image has no pixels".into(),
        });
    }

    let dpi = sniff_density(bytes, format).unwrap_or(assumed_dpi);
    debug!(
        "Decoded image {}x{} px at {} dpi",
        image.width(),
        image.height(),
        dpi
    );

    Ok(ExtractedPages {
        pages: vec![RasterPage {
            index: 0,
            dpi,
            image,
        }],
        source_page_count: 1,
        truncated: false,
    })
}

/// Decode the frames of a (possibly multi-page) TIFF.
///
/// Frames past `max_pages` are walked only to count them; their pixel data
/// is never decoded.
fn decode_tiff(
    bytes: &[u8],
    max_pages: usize,
    assumed_dpi: u32,
) -> Result<ExtractedPages, OcrError> {
    let corrupt = |e: tiff::TiffError| OcrError::CorruptDocument {
        detail: format!("TIFF could not be decoded: {}", e),
    };

    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(corrupt)?;
    let mut pages = Vec::new();
    let mut total = 0usize;

    loop {
        if total < max_pages {
            let dpi = tiff_density(&mut decoder).unwrap_or(assumed_dpi);
            let image = tiff_frame(&mut decoder).map_err(|detail| OcrError::CorruptDocument {
                detail: format!("TIFF page {}: {}", total + 1, detail),
            })?;
            debug!(
                "Decoded TIFF page {} {}x{} px at {} dpi",
                total + 1,
                image.width(),
                image.height(),
                dpi
            );
            pages.push(RasterPage {
                index: total,
                dpi,
                image,
            });
        }
        total += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(corrupt)?;
    }

    Ok(ExtractedPages {
        truncated: total > pages.len(),
        source_page_count: total,
        pages,
    })
}

/// Pixels of the decoder's current frame.
fn tiff_frame<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<DynamicImage, String> {
    let (w, h) = decoder.dimensions().map_err(|e| e.to_string())?;
    let color = decoder.colortype().map_err(|e| e.to_string())?;
    // PhotometricInterpretation 0: the scanner wrote ink as high values.
    let white_is_zero = decoder
        .find_tag(Tag::PhotometricInterpretation)
        .ok()
        .flatten()
        .and_then(|v| v.into_u16().ok())
        == Some(0);
    let data = decoder.read_image().map_err(|e| e.to_string())?;

    let image = match (color, data) {
        (ColorType::Gray(8), DecodingResult::U8(mut buf)) => {
            if white_is_zero {
                buf.iter_mut().for_each(|v| *v = 255 - *v);
            }
            GrayImage::from_raw(w, h, buf).map(DynamicImage::ImageLuma8)
        }
        (ColorType::GrayA(8), DecodingResult::U8(buf)) => {
            GrayAlphaImage::from_raw(w, h, buf).map(DynamicImage::ImageLumaA8)
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) => {
            RgbImage::from_raw(w, h, buf).map(DynamicImage::ImageRgb8)
        }
        (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
            RgbaImage::from_raw(w, h, buf).map(DynamicImage::ImageRgba8)
        }
        (ColorType::Gray(16), DecodingResult::U16(buf)) => {
            ImageBuffer::from_raw(w, h, buf).map(DynamicImage::ImageLuma16)
        }
        (ColorType::RGB(16), DecodingResult::U16(buf)) => {
            ImageBuffer::from_raw(w, h, buf).map(DynamicImage::ImageRgb16)
        }
        (ColorType::RGBA(16), DecodingResult::U16(buf)) => {
            ImageBuffer::from_raw(w, h, buf).map(DynamicImage::ImageRgba16)
        }
        (other, _) => return Err(format!("unsupported colour type {:?}", other)),
    };

    image
        .filter(|i| i.width() > 0 && i.height() > 0)
        .ok_or_else(|| "pixel data does not match the frame size".to_string())
}

/// `XResolution` of the current frame in dots per inch. A missing or
/// unit-less resolution yields `None`.
fn tiff_density<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let x = match decoder.find_tag(Tag::XResolution).ok()?? {
        Value::Rational(n, d) if d > 0 => n as f64 / d as f64,
        _ => return None,
    };
    let unit = decoder
        .find_tag(Tag::ResolutionUnit)
        .ok()
        .flatten()
        .and_then(|v| v.into_u16().ok())
        .unwrap_or(2);
    match unit {
        2 => positive_dpi(x),
        3 => positive_dpi(x * 2.54),
        _ => None,
    }
}

/// Rasterise a paginated document and enforce the page contract.
fn rasterize_document(
    bytes: &[u8],
    rasterizer: &dyn PdfRasterizer,
    limits: &RasterLimits,
) -> Result<ExtractedPages, OcrError> {
    let rasterized = rasterizer.rasterize(bytes, limits)?;

    if rasterized.total_pages == 0 {
        return Err(OcrError::CorruptDocument {
            detail: "Document has no pages".into(),
        });
    }

    let expected = rasterized.total_pages.min(limits.max_pages);
    if rasterized.pages.len() != expected
        || rasterized.pages.iter().enumerate().any(|(i, p)| p.index != i)
    {
        return Err(OcrError::InternalPipelineError(format!(
            "Rasteriser returned {} pages, expected indices 0..{}",
            rasterized.pages.len(),
            expected
        )));
    }

    Ok(ExtractedPages {
        truncated: rasterized.total_pages > expected,
        source_page_count: rasterized.total_pages,
        pages: rasterized.pages,
    })
}

/// Nominal density recorded in the image header, if any.
///
/// Reads the PNG `pHYs` chunk (pixels per metre) and the JPEG JFIF `APP0`
/// density (dots per inch or per centimetre). Aspect-ratio-only values and
/// densities that round to zero are ignored.
pub fn sniff_density(bytes: &[u8], format: DocumentFormat) -> Option<u32> {
    match format {
        DocumentFormat::Png => png_density(bytes),
        DocumentFormat::Jpeg => jfif_density(bytes),
        _ => None,
    }
}

fn png_density(bytes: &[u8]) -> Option<u32> {
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().ok()?) as usize;
        let kind = &bytes[pos + 4..pos + 8];
        let data_start = pos + 8;
        if kind == b"IDAT" || kind == b"IEND" {
            return None;
        }
        if kind == b"pHYs" && len >= 9 && data_start + 9 <= bytes.len() {
            let data = &bytes[data_start..data_start + 9];
            let ppm_x = u32::from_be_bytes(data[0..4].try_into().ok()?);
            let unit = data[8];
            if unit == 1 && ppm_x > 0 {
                return positive_dpi(ppm_x as f64 * 0.0254);
            }
            return None;
        }
        pos = data_start.checked_add(len)?.checked_add(4)?;
    }
    None
}

fn jfif_density(bytes: &[u8]) -> Option<u32> {
    // FF D8, FF E0, len(2), "JFIF\0", version(2), units, Xdensity(2), Ydensity(2)
    if bytes.len() < 18 || bytes[2..4] != [0xFF, 0xE0] || &bytes[6..11] != b"JFIF\0" {
        return None;
    }
    let units = bytes[13];
    let x_density = u16::from_be_bytes([bytes[14], bytes[15]]) as f64;
    if x_density == 0.0 {
        return None;
    }
    match units {
        1 => positive_dpi(x_density),
        2 => positive_dpi(x_density * 2.54),
        _ => None,
    }
}

fn positive_dpi(dpi: f64) -> Option<u32> {
    let dpi = dpi.round();
    (dpi.is_finite() && dpi >= 1.0).then_some(dpi as u32)
}

/// Pixel size of a page rendered at `dpi`, capped so neither side exceeds
/// `max_dimension`. Returns `(width, height, effective_dpi)`.
pub fn compute_render_dimensions(
    width_points: f32,
    height_points: f32,
    dpi: u32,
    max_dimension: u32,
) -> (u32, u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let longest = raw_w.max(raw_h);
    if longest > max_dimension as f32 {
        let ratio = max_dimension as f32 / longest;
        let w = ((raw_w * ratio).round() as u32).clamp(1, max_dimension);
        let h = ((raw_h * ratio).round() as u32).clamp(1, max_dimension);
        let effective_dpi = ((dpi as f32 * ratio).round() as u32).max(1);
        (w, h, effective_dpi)
    } else {
        (raw_w.round() as u32, raw_h.round() as u32, dpi)
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Default [`PdfRasterizer`] backed by the pdfium library.
///
/// Library discovery order:
/// 1. `PDFIUM_LIB_PATH` (path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    fn bind() -> Result<Pdfium, OcrError> {
        if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
            debug!("Loading pdfium from PDFIUM_LIB_PATH={}", path);
            let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
                OcrError::InternalPipelineError(format!("Failed to load pdfium from {path}: {e}"))
            })?;
            return Ok(Pdfium::new(bindings));
        }

        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                return Ok(Pdfium::new(bindings));
            }
        }

        let bindings = Pdfium::bind_to_system_library().map_err(|e| {
            OcrError::InternalPipelineError(format!(
                "pdfium library not found. Set PDFIUM_LIB_PATH or install pdfium: {e}"
            ))
        })?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &[u8], limits: &RasterLimits) -> Result<RasterizedPdf, OcrError> {
        let pdfium = Self::bind()?;

        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(|e| {
            let msg = format!("{:?}", e);
            let detail = if msg.to_lowercase().contains("password") {
                "Document is encrypted".to_string()
            } else {
                format!("PDF could not be opened: {msg}")
            };
            OcrError::CorruptDocument { detail }
        })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let wanted = total_pages.min(limits.max_pages);
        info!("PDF loaded: {} pages, rendering {}", total_pages, wanted);

        let mut out = Vec::with_capacity(wanted);
        for idx in 0..wanted {
            let page = pages
                .get(idx as u16)
                .map_err(|e| OcrError::CorruptDocument {
                    detail: format!("Page {} could not be loaded: {:?}", idx + 1, e),
                })?;

            let (w, h, dpi) = compute_render_dimensions(
                page.width().value,
                page.height().value,
                limits.dpi,
                limits.max_dimension,
            );

            let render_config = PdfRenderConfig::new()
                .set_target_width(w as i32)
                .set_maximum_height(h as i32);

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                OcrError::CorruptDocument {
                    detail: format!("Page {} could not be rasterised: {:?}", idx + 1, e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px at {} dpi",
                idx + 1,
                image.width(),
                image.height(),
                dpi
            );

            out.push(RasterPage {
                index: idx,
                dpi,
                image,
            });
        }

        Ok(RasterizedPdf {
            pages: out,
            total_pages,
        })
    }
}
