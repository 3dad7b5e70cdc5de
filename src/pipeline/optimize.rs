//! Payload sizing: shrink a page image until its base64 form fits the
//! completion service's per-image ceiling.
//!
//! The first attempt is the image exactly as supplied. If that is over
//! budget the image is decoded and repeatedly downscaled with Lanczos3 and
//! re-encoded in its original format each time. The scale factor for the next
//! attempt is
//!
//! ```text
//! r     = budget / current_size
//! scale = sqrt(r) * r
//! ```
//!
//! which shrinks harder the further over budget the image is, so most images
//! converge in one or two attempts. The loop is capped at
//! [`SizeBudget::max_attempts`]; running out is a hard error for the whole
//! document.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};

/// Bytes of base64 text produced per raw byte.
pub const BASE64_EXPANSION: f64 = 4.0 / 3.0;

/// Size ceiling and effort limits for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    /// Maximum base64-encoded length in bytes.
    pub max_encoded_bytes: usize,
    /// Maximum number of downscale attempts.
    pub max_attempts: u32,
    /// Quality used when re-encoding JPEG sources.
    pub jpeg_quality: u8,
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self {
            max_encoded_bytes: 5 * 1024 * 1024,
            max_attempts: 10,
            jpeg_quality: 95,
        }
    }
}

impl SizeBudget {
    /// Largest raw payload that can still fit once base64-encoded.
    pub fn max_raw_bytes(&self) -> usize {
        (self.max_encoded_bytes as f64 / BASE64_EXPANSION) as usize
    }
}

/// An image ready to be embedded in a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Standard base64 of the encoded image.
    pub data: String,
    /// `image/png` or `image/jpeg`.
    pub media_type: &'static str,
    /// Downscale attempts it took; 0 when the original already fit.
    pub attempts: u32,
}

impl EncodedImage {
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

/// Length of the standard (padded) base64 encoding of `raw_len` bytes.
pub fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Scale factor for the next attempt.
pub fn next_scale_factor(budget: usize, current: usize) -> f64 {
    let ratio = budget as f64 / current as f64;
    ratio.sqrt() * ratio
}

/// Fit an encoded image (PNG or JPEG bytes) into `budget`.
///
/// `image_num` is 1-based and only used for logs and errors.
pub fn fit_to_budget(
    bytes: &[u8],
    image_num: usize,
    budget: &SizeBudget,
) -> Result<EncodedImage, ExtractError> {
    let codec_err = |detail: String| ExtractError::ImageCodec {
        image: image_num,
        detail,
    };

    let format = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => ImageFormat::Jpeg,
        Ok(ImageFormat::Png) => ImageFormat::Png,
        Ok(other) => return Err(codec_err(format!("unsupported image format {other:?}"))),
        Err(e) => return Err(codec_err(e.to_string())),
    };
    let media_type = media_type(format);

    let mut size = base64_len(bytes.len());
    debug!(
        "Image {}: {} bytes raw, {} encoded (budget {} encoded / {} raw)",
        image_num,
        bytes.len(),
        size,
        budget.max_encoded_bytes,
        budget.max_raw_bytes()
    );

    if size <= budget.max_encoded_bytes {
        info!("Appending image {} with size {} bytes", image_num, size);
        return Ok(EncodedImage {
            data: STANDARD.encode(bytes),
            media_type,
            attempts: 0,
        });
    }

    let mut img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| codec_err(e.to_string()))?;
    let mut raw = Vec::new();
    let mut attempts = 0;

    while size > budget.max_encoded_bytes && attempts < budget.max_attempts {
        let scale = next_scale_factor(budget.max_encoded_bytes, size);
        let width = ((img.width() as f64 * scale) as u32).max(1);
        let height = ((img.height() as f64 * scale) as u32).max(1);

        img = img.resize_exact(width, height, FilterType::Lanczos3);
        raw = encode(&img, format, budget.jpeg_quality).map_err(|e| codec_err(e.to_string()))?;
        size = base64_len(raw.len());
        attempts += 1;

        info!(
            "Optimized image {}: attempt {}, {}x{} px, size {} bytes",
            image_num, attempts, width, height, size
        );
    }

    if size > budget.max_encoded_bytes {
        return Err(ExtractError::SizeBudgetExhausted {
            image: image_num,
            attempts,
            size,
            budget: budget.max_encoded_bytes,
        });
    }

    info!("Appending image {} with size {} bytes", image_num, size);
    Ok(EncodedImage {
        data: STANDARD.encode(&raw),
        media_type,
        attempts,
    })
}

/// Encode `img` as PNG (maximum compression) or JPEG (`quality`).
pub fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            // JPEG carries no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        _ => {
            img.write_with_encoder(PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))?;
        }
    }
    Ok(buf)
}

fn media_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Incompressible RGB noise from a fixed xorshift seed.
    fn noise(width: u32, height: u32) -> DynamicImage {
        let mut state: u32 = 0x9E37_79B9;
        let img = RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        encode(img, ImageFormat::Png, 100).unwrap()
    }

    #[test]
    fn base64_len_matches_engine() {
        for n in [0usize, 1, 2, 3, 4, 1000, 1001] {
            assert_eq!(base64_len(n), STANDARD.encode(vec![0u8; n]).len());
        }
    }

    #[test]
    fn scale_factor_is_super_linear() {
        assert!((next_scale_factor(1, 4) - 0.125).abs() < 1e-9);
        // Slightly over budget → slightly smaller.
        let s = next_scale_factor(100, 110);
        assert!(s < 100.0 / 110.0 && s > 0.8, "got {s}");
    }

    #[test]
    fn max_raw_bytes_uses_base64_ratio() {
        let budget = SizeBudget {
            max_encoded_bytes: 4000,
            ..Default::default()
        };
        assert_eq!(budget.max_raw_bytes(), 3000);
    }

    #[test]
    fn image_under_budget_passes_through() {
        let bytes = png_bytes(&noise(8, 8));
        let out = fit_to_budget(&bytes, 1, &SizeBudget::default()).unwrap();
        assert_eq!(out.attempts, 0);
        assert_eq!(out.media_type, "image/png");
        assert_eq!(STANDARD.decode(&out.data).unwrap(), bytes);
    }

    #[test]
    fn oversized_png_converges_under_budget() {
        let bytes = png_bytes(&noise(256, 256));
        let budget = SizeBudget {
            max_encoded_bytes: 40_000,
            ..Default::default()
        };
        assert!(base64_len(bytes.len()) > budget.max_encoded_bytes);

        let out = fit_to_budget(&bytes, 1, &budget).unwrap();
        assert!(out.attempts >= 1 && out.attempts <= 10);
        assert!(out.encoded_len() <= budget.max_encoded_bytes);

        let decoded = STANDARD.decode(&out.data).unwrap();
        assert_eq!(image::guess_format(&decoded).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn jpeg_source_stays_jpeg() {
        let bytes = encode(&noise(256, 256), ImageFormat::Jpeg, 100).unwrap();
        let budget = SizeBudget {
            max_encoded_bytes: 20_000,
            ..Default::default()
        };
        let out = fit_to_budget(&bytes, 2, &budget).unwrap();
        assert_eq!(out.media_type, "image/jpeg");
        assert!(out.encoded_len() <= budget.max_encoded_bytes);
    }

    #[test]
    fn unreachable_budget_is_exhausted_not_looped() {
        let bytes = png_bytes(&noise(64, 64));
        let budget = SizeBudget {
            max_encoded_bytes: 8,
            max_attempts: 10,
            jpeg_quality: 95,
        };
        match fit_to_budget(&bytes, 4, &budget) {
            Err(ExtractError::SizeBudgetExhausted {
                image, attempts, ..
            }) => {
                assert_eq!(image, 4);
                assert_eq!(attempts, 10);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn garbage_bytes_are_a_codec_error() {
        let err = fit_to_budget(b"definitely not an image", 1, &SizeBudget::default());
        assert!(matches!(err, Err(ExtractError::ImageCodec { .. })));
    }
}
