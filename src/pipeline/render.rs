//! pdfium access: bind the library, read text layers, rasterise pages.
//!
//! pdfium is a C++ library with thread-local state and no async story, so
//! every call here happens inside `tokio::task::spawn_blocking`. The async
//! wrappers move owned arguments onto the blocking pool and map a panicked
//! task to [`DocServeError::Internal`].
//!
//! Rasterisation follows `dpi` but caps both edges at `max_rendered_pixels`:
//! a poster-sized page at 150 DPI would otherwise produce an image far
//! larger than any provider accepts.

use crate::error::DocServeError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One page of a document: its text layer and, when requested, its bitmap.
pub struct RenderedPage {
    /// 0-based page index.
    pub index: usize,
    pub text: String,
    pub image: Option<DynamicImage>,
}

/// Bind pdfium from `lib_dir`, or the system library when `None`.
fn bind(lib_dir: Option<&Path>) -> Result<Pdfium, DocServeError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DocServeError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn load_error(path: &Path, err: PdfiumError) -> DocServeError {
    let detail = format!("{err:?}");
    if detail.to_lowercase().contains("password") {
        DocServeError::UnsupportedByBackend {
            backend: "pdfium",
            feature: format!("password-protected PDFs ('{}')", path.display()),
        }
    } else {
        DocServeError::Converter {
            backend: "pdfium".into(),
            detail: format!("cannot open '{}': {detail}", path.display()),
        }
    }
}

/// Read every page's text layer. With `raster = Some((dpi, max_px))` each
/// page is also rendered to a bitmap.
pub async fn load_pages(
    pdf_path: &Path,
    lib_dir: Option<PathBuf>,
    raster: Option<(u32, u32)>,
) -> Result<Vec<RenderedPage>, DocServeError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || load_pages_blocking(&path, lib_dir.as_deref(), raster))
        .await
        .map_err(|e| DocServeError::Internal(format!("pdfium task panicked: {e}")))?
}

fn load_pages_blocking(
    pdf_path: &Path,
    lib_dir: Option<&Path>,
    raster: Option<(u32, u32)>,
) -> Result<Vec<RenderedPage>, DocServeError> {
    let pdfium = bind(lib_dir)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| load_error(pdf_path, e))?;

    let pages = document.pages();
    info!("pdfium: {} has {} pages", pdf_path.display(), pages.len());

    let mut out = Vec::with_capacity(pages.len() as usize);
    for (index, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| DocServeError::Converter {
                backend: "pdfium".into(),
                detail: format!("text extraction failed on page {}: {e:?}", index + 1),
            })?;

        let image = match raster {
            Some((dpi, max_px)) => {
                let cfg = PdfRenderConfig::new()
                    .set_target_width(target_width(page.width().value, dpi, max_px))
                    .set_maximum_height(max_px as i32);
                let bitmap = page.render_with_config(&cfg).map_err(|e| DocServeError::Converter {
                    backend: "pdfium".into(),
                    detail: format!("rasterisation failed on page {}: {e:?}", index + 1),
                })?;
                let image = bitmap.as_image();
                debug!("Rendered page {} → {}x{} px", index + 1, image.width(), image.height());
                Some(image)
            }
            None => None,
        };

        out.push(RenderedPage { index, text, image });
    }

    Ok(out)
}

/// Pixel width for a page `width_pt` points wide at `dpi`, capped at `max_px`.
fn target_width(width_pt: f32, dpi: u32, max_px: u32) -> i32 {
    let px = (width_pt * dpi as f32 / 72.0).round() as u32;
    px.clamp(1, max_px) as i32
}
