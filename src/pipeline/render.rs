//! PDF rasterisation: render pages via pdfium and stack them into composite
//! images.
//!
//! Every composite becomes one image block in the model request, and the
//! request size is what is bounded, so pages are grouped: each run of
//! `pages_per_image` consecutive pages is rendered and stacked vertically
//! (left-aligned, white background) into a single PNG. At most `max_images`
//! composites are produced; pages past `max_images * pages_per_image` are not
//! rendered.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state internally and is not safe to drive from an
//! async context. The whole render runs on tokio's blocking pool.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, info};

/// How pages are grouped into composites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeLayout {
    pub pages_per_image: usize,
    pub max_images: usize,
    pub dpi: u32,
    pub max_rendered_pixels: u32,
}

impl CompositeLayout {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            pages_per_image: config.pages_per_image,
            max_images: config.max_images,
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }

    /// 0-based page ranges, one per composite, for a document of `total_pages`.
    pub fn batches(&self, total_pages: usize) -> Vec<std::ops::Range<usize>> {
        let per = self.pages_per_image.max(1);
        let limit = total_pages.min(self.max_images.saturating_mul(per));
        (0..limit)
            .step_by(per)
            .map(|start| start..(start + per).min(limit))
            .collect()
    }
}

/// Render a PDF held in memory into PNG-encoded composite images.
pub async fn render_composites(
    pdf: Vec<u8>,
    location: String,
    layout: CompositeLayout,
) -> Result<Vec<Vec<u8>>, ExtractError> {
    tokio::task::spawn_blocking(move || render_composites_blocking(&pdf, &location, &layout))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` if set, otherwise the system library.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_composites_blocking(
    pdf: &[u8],
    location: &str,
    layout: &CompositeLayout,
) -> Result<Vec<Vec<u8>>, ExtractError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ExtractError::CorruptPdf {
            location: location.to_string(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let batches = layout.batches(total_pages);
    info!(
        "Total pages in PDF: {}, rendering {} into {} composite images",
        total_pages,
        batches.last().map(|b| b.end).unwrap_or(0),
        batches.len()
    );

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(layout.dpi as f32 / 72.0)
        .set_maximum_width(layout.max_rendered_pixels as i32)
        .set_maximum_height(layout.max_rendered_pixels as i32);

    let mut composites = Vec::with_capacity(batches.len());
    let mut total_size = 0usize;

    for batch in batches {
        let mut rendered = Vec::with_capacity(batch.len());
        for idx in batch {
            let raster_err = |e: PdfiumError| ExtractError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            };
            let page = pages.get(idx as u16).map_err(raster_err)?;
            let bitmap = page.render_with_config(&render_config).map_err(raster_err)?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            rendered.push(image);
        }

        let png = encode_png(&stack_vertically(&rendered)).map_err(|e| {
            ExtractError::ImageCodec {
                image: composites.len() + 1,
                detail: e.to_string(),
            }
        })?;
        info!("Created image of size {} bytes", png.len());
        total_size += png.len();
        composites.push(png);
    }

    info!(
        "Created {} combined images with total size {} bytes",
        composites.len(),
        total_size
    );
    Ok(composites)
}

/// Stack pages top to bottom on a white canvas as wide as the widest page.
pub fn stack_vertically(pages: &[DynamicImage]) -> RgbImage {
    let width = pages.iter().map(|p| p.width()).max().unwrap_or(1);
    let height: u32 = pages.iter().map(|p| p.height()).sum();
    let mut canvas = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([255, 255, 255]));

    let mut y = 0i64;
    for page in pages {
        imageops::overlay(&mut canvas, &page.to_rgb8(), 0, y);
        y += page.height() as i64;
    }
    canvas
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
