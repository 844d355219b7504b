//! Deterministic image preprocessing ahead of recognition.
//!
//! Every page goes through the same fixed sequence:
//!
//! ```text
//!  RasterPage ──► grayscale ──► fit (DPI up, ceiling down) ──► smooth ──► binarise ──► NormalizedPage
//! ```
//!
//! All parameters come from [`ExtractionConfig`]; nothing is derived from
//! the image itself, so identical input pixels always give identical output.
//! Arithmetic is integer-only apart from the resize, whose filter weights
//! depend solely on the source and target sizes.
//!
//! ## Why adaptive thresholding?
//!
//! Phone photos and flatbed scans are unevenly lit. A single global cutoff
//! turns a shadowed corner solid black and washes out faint text elsewhere.
//! Comparing each pixel against the mean of its own neighbourhood follows
//! the lighting instead.
//!
//! ## Fixed point
//!
//! An image that is already bilevel after fitting skips smoothing and
//! thresholding. A page's own output therefore passes through unchanged: it
//! is bilevel, its size is within the ceiling, and its DPI was already
//! brought to target or pinned by the ceiling.

use crate::config::ExtractionConfig;
use crate::pipeline::pages::RasterPage;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use tracing::debug;

/// The subset of configuration preprocessing depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSettings {
    pub target_dpi: u32,
    pub max_dimension: u32,
    pub blur_kernel_size: u32,
    pub threshold_block_size: u32,
    pub threshold_offset: i32,
}

impl From<&ExtractionConfig> for PreprocessSettings {
    fn from(c: &ExtractionConfig) -> Self {
        Self {
            target_dpi: c.target_dpi,
            max_dimension: c.max_image_dimension,
            blur_kernel_size: c.blur_kernel_size,
            threshold_block_size: c.threshold_block_size,
            threshold_offset: c.threshold_offset,
        }
    }
}

/// A page ready for the recognition engine: single channel, pixels 0 or 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPage {
    pub index: usize,
    pub dpi: u32,
    pub image: GrayImage,
}

/// Run the full preprocessing sequence on one page.
pub fn preprocess(page: &RasterPage, settings: &PreprocessSettings) -> NormalizedPage {
    let gray = to_grayscale(&page.image);
    let (src_w, src_h) = gray.dimensions();

    let (w, h, dpi) = fit_dimensions(
        src_w,
        src_h,
        page.dpi,
        settings.target_dpi,
        settings.max_dimension,
    );
    let gray = if (w, h) == (src_w, src_h) {
        gray
    } else {
        imageops::resize(&gray, w, h, FilterType::CatmullRom)
    };

    let image = if is_bilevel(&gray) {
        gray
    } else {
        let smoothed = smooth(&gray, settings.blur_kernel_size);
        binarize(
            &smoothed,
            settings.threshold_block_size,
            settings.threshold_offset,
        )
    };

    debug!(
        "Page {}: {}x{} @ {} dpi → {}x{} @ {} dpi",
        page.index + 1,
        src_w,
        src_h,
        page.dpi,
        w,
        h,
        dpi
    );

    NormalizedPage {
        index: page.index,
        dpi,
        image,
    }
}

/// Single-channel luminance using ITU-R BT.601 weights.
///
/// Transparent pixels are composited over white first; a transparent
/// background is paper, not ink. Pixels are converted straight from the
/// source buffer, so no full-size colour copy of the page is made.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let (w, h) = (image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(img) => GrayImage::from_fn(w, h, |x, y| {
            let [l, a] = img.get_pixel(x, y).0;
            Luma([over_white(l as u32, a)])
        }),
        DynamicImage::ImageRgb8(img) => GrayImage::from_fn(w, h, |x, y| {
            let [r, g, b] = img.get_pixel(x, y).0;
            Luma([bt601(r, g, b) as u8])
        }),
        DynamicImage::ImageRgba8(img) => GrayImage::from_fn(w, h, |x, y| {
            let [r, g, b, a] = img.get_pixel(x, y).0;
            Luma([over_white(bt601(r, g, b), a)])
        }),
        // 16-bit and float pages, converted one pixel at a time
        other => GrayImage::from_fn(w, h, |x, y| {
            let [r, g, b, a] = other.get_pixel(x, y).0;
            Luma([over_white(bt601(r, g, b), a)])
        }),
    }
}

fn bt601(r: u8, g: u8, b: u8) -> u32 {
    (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000
}

fn over_white(luma: u32, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((luma * a + 255 * (255 - a) + 127) / 255) as u8
}

/// Output size and DPI after DPI normalisation and the dimension ceiling.
///
/// Pages below `target_dpi` are scaled up toward it. If that, or the source
/// itself, would push the larger side past `max_dimension`, the ceiling wins
/// and the larger side becomes exactly `max_dimension`. Aspect ratio is kept
/// to within rounding. Returns `(width, height, dpi)`.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    dpi: u32,
    target_dpi: u32,
    max_dimension: u32,
) -> (u32, u32, u32) {
    let larger = width.max(height);
    if larger == 0 {
        return (width, height, dpi);
    }

    let mut scale = if dpi > 0 && dpi < target_dpi {
        target_dpi as f64 / dpi as f64
    } else {
        1.0
    };
    let capped = larger as f64 * scale > max_dimension as f64;
    if capped {
        scale = max_dimension as f64 / larger as f64;
    }
    if scale == 1.0 {
        return (width, height, dpi);
    }

    let scale_side = |side: u32| -> u32 {
        if capped && side == larger {
            max_dimension
        } else {
            ((side as f64 * scale).round() as u32).max(1)
        }
    };
    let new_dpi = ((dpi as f64 * scale).round() as u32).max(1);
    (scale_side(width), scale_side(height), new_dpi)
}

/// True when every pixel is pure black or pure white.
pub fn is_bilevel(image: &GrayImage) -> bool {
    image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255)
}

/// Separable binomial smoothing with a `kernel`×`kernel` window.
///
/// Binomial weights approximate a Gaussian with integer coefficients, so the
/// result is exact and platform independent. Edges replicate the border pixel.
pub fn smooth(image: &GrayImage, kernel: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if kernel <= 1 || w == 0 || h == 0 {
        return image.clone();
    }

    // Wider kernels overflow the u64 accumulator.
    let weights = binomial_row(kernel.min(15) as usize);
    let radius = (weights.len() / 2) as i64;
    let norm: u64 = weights.iter().sum::<u64>().pow(2);
    let (wi, hi) = (w as i64, h as i64);

    let mut horizontal = vec![0u64; (w * h) as usize];
    for y in 0..h {
        for x in 0..wi {
            let mut acc = 0u64;
            for (k, weight) in weights.iter().enumerate() {
                let sx = (x + k as i64 - radius).clamp(0, wi - 1) as u32;
                acc += weight * image.get_pixel(sx, y).0[0] as u64;
            }
            horizontal[(y * w) as usize + x as usize] = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..hi {
        for x in 0..w {
            let mut acc = 0u64;
            for (k, weight) in weights.iter().enumerate() {
                let sy = (y + k as i64 - radius).clamp(0, hi - 1) as u32;
                acc += weight * horizontal[(sy * w + x) as usize];
            }
            let value = (acc + norm / 2) / norm;
            out.put_pixel(x, y as u32, Luma([value.min(255) as u8]));
        }
    }
    out
}

/// Row `n - 1` of Pascal's triangle.
fn binomial_row(n: usize) -> Vec<u64> {
    let mut row = vec![1u64; n];
    for i in 1..n.saturating_sub(1) {
        row[i] = row[i - 1] * (n - i) as u64 / i as u64;
    }
    row
}

/// Adaptive mean thresholding.
///
/// A pixel becomes white when it is brighter than the mean of its
/// `block`×`block` neighbourhood minus `offset`, black otherwise. The
/// neighbourhood is clipped at the image border. Means come from an integral
/// image, so cost does not grow with `block`.
pub fn binarize(image: &GrayImage, block: u32, offset: i32) -> GrayImage {
    let (w, h) = image.dimensions();
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h as usize {
        let mut row_sum = 0u64;
        for x in 0..w as usize {
            row_sum += image.get_pixel(x as u32, y as u32).0[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let radius = (block / 2) as i64;
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        let y0 = (y - radius).max(0) as usize;
        let y1 = (y + radius + 1).min(h as i64) as usize;
        for x in 0..w as i64 {
            let x0 = (x - radius).max(0) as usize;
            let x1 = (x + radius + 1).min(w as i64) as usize;

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let n = ((x1 - x0) * (y1 - y0)) as i64;
            let p = image.get_pixel(x as u32, y as u32).0[0] as i64;

            let value = if (p + offset as i64) * n > sum as i64 {
                255
            } else {
                0
            };
            out.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    out
}
