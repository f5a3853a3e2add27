//! PDF reading via pdfium: page rasterisation and text extraction.
//!
//! Everything here is blocking. pdfium wraps a C++ library with
//! process-global state, so callers run these functions on tokio's blocking
//! pool (see [`crate::convert::ConversionPool`]).
//!
//! Rendered size is driven by DPI but capped by `max_rendered_pixels` on
//! either edge: an A0 poster at 300 DPI would otherwise need a ~10,000 ×
//! 14,000 px bitmap.

use crate::config::PageSelection;
use crate::error::ConvertError;
use crate::pipeline::reflow::{self, TextRun};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// A bound pdfium engine.
pub struct PdfEngine {
    pdfium: Pdfium,
}

impl PdfEngine {
    /// Bind to pdfium.
    ///
    /// `lib_path` may name the shared library itself or the directory that
    /// contains it. Without it the platform's system library is used.
    pub fn bind(lib_path: Option<&Path>) -> Result<Self, ConvertError> {
        let bindings = match lib_path {
            Some(p) if p.is_dir() => {
                Pdfium::bind_to_library(p.join(Pdfium::pdfium_platform_library_name()))
            }
            Some(p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ConvertError::PdfiumBindingFailed(e.to_string()))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// Rasterise the selected pages.
    ///
    /// # Returns
    /// A vector of `(page_index_0based, DynamicImage)` tuples in page order.
    pub fn render_pages(
        &self,
        pdf_path: &Path,
        password: Option<&str>,
        selection: &PageSelection,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<(usize, DynamicImage)>, ConvertError> {
        let document = self.load(pdf_path, password)?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let indices = selected_indices(selection, total_pages)?;
        info!("PDF loaded: {} pages, rendering {}", total_pages, indices.len());

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / PDF_POINTS_PER_INCH)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut results = Vec::with_capacity(indices.len());

        for idx in indices {
            let page = pages
                .get(idx as u16)
                .map_err(|e| ConvertError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ConvertError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            results.push((idx, image));
        }

        Ok(results)
    }

    /// Extract the text of the selected pages, rebuilt from the positioned
    /// text segments so paragraph breaks survive (see [`reflow::layout_text`]).
    pub fn extract_text(
        &self,
        pdf_path: &Path,
        password: Option<&str>,
        selection: &PageSelection,
    ) -> Result<Vec<(usize, String)>, ConvertError> {
        let document = self.load(pdf_path, password)?;
        let pages = document.pages();
        let indices = selected_indices(selection, pages.len() as usize)?;

        let mut results = Vec::with_capacity(indices.len());
        for idx in indices {
            let runs = pages
                .get(idx as u16)
                .and_then(|page| page.text().map(|t| page_runs(&t)))
                .map_err(|e| ConvertError::TextExtractionFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            let text = reflow::layout_text(&runs);
            if text.trim().is_empty() {
                warn!("Page {} has no extractable text", idx + 1);
            }
            debug!("Extracted {} chars from page {}", text.len(), idx + 1);
            results.push((idx, text));
        }

        Ok(results)
    }

    fn load<'a>(
        &'a self,
        pdf_path: &Path,
        password: Option<&'a str>,
    ) -> Result<PdfDocument<'a>, ConvertError> {
        check_pdf_signature(pdf_path)?;

        self.pdfium
            .load_pdf_from_file(pdf_path, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        ConvertError::WrongPassword {
                            path: pdf_path.to_path_buf(),
                        }
                    } else {
                        ConvertError::PasswordRequired {
                            path: pdf_path.to_path_buf(),
                        }
                    }
                } else {
                    ConvertError::CorruptPdf {
                        path: pdf_path.to_path_buf(),
                        detail: err_str,
                    }
                }
            })
    }
}

/// Resolve a selection against the page count; an empty result is an error.
fn selected_indices(selection: &PageSelection, total: usize) -> Result<Vec<usize>, ConvertError> {
    let indices = selection.to_indices(total);
    if indices.is_empty() {
        return Err(ConvertError::NoPagesSelected { total });
    }
    Ok(indices)
}

/// Positioned runs of a page. A run's size is the largest font size among
/// its characters, or its box height when pdfium reports none.
fn page_runs(text: &PdfPageText) -> Vec<TextRun> {
    text.segments()
        .iter()
        .map(|segment| {
            let bounds = segment.bounds();
            let (bottom, top) = (bounds.bottom().value, bounds.top().value);
            let size = segment
                .chars()
                .map(|chars| {
                    chars
                        .iter()
                        .map(|c| c.scaled_font_size().value)
                        .fold(0.0_f32, f32::max)
                })
                .unwrap_or(0.0);
            TextRun {
                text: segment.text(),
                left: bounds.left().value,
                right: bounds.right().value,
                bottom,
                top,
                size: if size > 0.0 { size } else { top - bottom },
            }
        })
        .collect()
}

/// Verify the `%PDF` magic bytes so a mislabelled upload gets a clear error
/// instead of a pdfium parse failure.
pub fn check_pdf_signature(path: &Path) -> Result<(), ConvertError> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvertError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConvertError::io(path, e)
        }
    })?;

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => Ok(()),
        Ok(()) => Err(ConvertError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        }),
        Err(_) => Err(ConvertError::CorruptPdf {
            path: path.to_path_buf(),
            detail: "file is shorter than a PDF header".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn signature_accepts_pdf_header() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a.pdf");
        std::fs::write(&p, b"%PDF-1.7\n%...").unwrap();
        assert!(check_pdf_signature(&p).is_ok());
    }

    #[test]
    fn signature_rejects_other_bytes() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a.pdf");
        std::fs::write(&p, b"PK\x03\x04rest").unwrap();
        match check_pdf_signature(&p) {
            Err(ConvertError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {:?}", other),
        }
    }

    #[test]
    fn signature_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("a.pdf");
        std::fs::write(&p, b"%P").unwrap();
        assert!(matches!(
            check_pdf_signature(&p),
            Err(ConvertError::CorruptPdf { .. })
        ));
    }

    #[test]
    fn signature_missing_file() {
        assert!(matches!(
            check_pdf_signature(Path::new("/nonexistent/x.pdf")),
            Err(ConvertError::FileNotFound { .. })
        ));
    }

    #[test]
    fn empty_selection_is_an_error() {
        assert!(matches!(
            selected_indices(&PageSelection::Single(9), 3),
            Err(ConvertError::NoPagesSelected { total: 3 })
        ));
        assert_eq!(selected_indices(&PageSelection::All, 2).unwrap(), vec![0, 1]);
    }
}
