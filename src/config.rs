//! Configuration types for the conversion service.
//!
//! Service-wide behaviour lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. Per-request knobs (page selection, PDF password,
//! render DPI) travel separately in [`ConvertOptions`] so one shared config
//! can serve every request.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use docconv::{ServiceConfig, StorageLayout};
///
/// let config = ServiceConfig::builder()
///     .upload_dir("/var/lib/docconv/uploads")
///     .converted_dir("/var/lib/docconv/converted")
///     .layout(StorageLayout::PerJob)
///     .max_concurrent_conversions(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding uploaded files. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Directory holding conversion output. Default: `converted`.
    pub converted_dir: PathBuf,

    /// How stored files are keyed. Default: [`StorageLayout::PerJob`].
    pub layout: StorageLayout,

    /// Default rasterisation DPI for PDF→Image. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Cap on either dimension of a rendered page, in pixels. Default: 6000.
    ///
    /// An A0 poster at 200 DPI is roughly 6600 × 9400 px; the cap keeps a
    /// single page from allocating hundreds of megabytes.
    pub max_rendered_pixels: u32,

    /// Maximum number of conversions running at once. Default: CPU count.
    pub max_concurrent_conversions: usize,

    /// Per-conversion time budget in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// Largest accepted request body in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Keep the intermediate markup file after Word→PDF and Excel→PDF.
    /// Default: false.
    pub keep_intermediate_markup: bool,

    /// Explicit path to libpdfium. If None, the system library is used.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            converted_dir: PathBuf::from("converted"),
            layout: StorageLayout::default(),
            dpi: 200,
            max_rendered_pixels: 6000,
            max_concurrent_conversions: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            conversion_timeout_secs: 120,
            max_upload_bytes: 50 * 1024 * 1024,
            keep_intermediate_markup: false,
            pdfium_lib_path: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn converted_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.converted_dir = dir.into();
        self
    }

    pub fn layout(mut self, layout: StorageLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n.max(1);
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn keep_intermediate_markup(mut self, v: bool) -> Self {
        self.config.keep_intermediate_markup = v;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.upload_dir == c.converted_dir {
            return Err(ConvertError::InvalidConfig(format!(
                "upload and converted directories must differ, both are '{}'",
                c.upload_dir.display()
            )));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-request options ──────────────────────────────────────────────────

/// Options a single conversion may override.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Pages of a PDF input to convert. Ignored for non-PDF inputs.
    pub pages: PageSelection,
    /// PDF user password for encrypted documents.
    pub password: Option<String>,
    /// Render DPI for PDF→Image; falls back to [`ServiceConfig::dpi`].
    pub dpi: Option<u32>,
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How files are keyed inside the upload and converted stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageLayout {
    /// Each request gets its own UUID-named sub-directory, so uploads that
    /// share a filename never collide. (default)
    #[default]
    PerJob,
    /// Files are keyed by filename only; a later upload with the same name
    /// overwrites the earlier upload and its converted artifact.
    Flat,
}

/// Specifies which pages of a PDF to convert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// A page-selection string that could not be parsed.
#[derive(Debug, Error)]
#[error("Invalid page selection '{input}': {reason}")]
pub struct PageSelectionError {
    pub input: String,
    pub reason: String,
}

impl FromStr for PageSelection {
    type Err = PageSelectionError;

    /// Parse `all`, `5`, `3-15` or `1,3,5,7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| PageSelectionError {
            input: s.to_string(),
            reason,
        };
        let parse_page = |p: &str| -> Result<usize, PageSelectionError> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| fail(format!("'{}' is not a page number", p.trim())))?;
            if n < 1 {
                return Err(fail("pages are 1-indexed, minimum is 1".into()));
            }
            Ok(n)
        };

        let norm = s.trim().to_lowercase();
        if norm.is_empty() || norm == "all" {
            return Ok(PageSelection::All);
        }

        if let Some((start, end)) = norm.split_once('-') {
            let start = parse_page(start)?;
            let end = parse_page(end)?;
            if start > end {
                return Err(fail(format!("start {start} is after end {end}")));
            }
            return Ok(PageSelection::Range(start, end));
        }

        if norm.contains(',') {
            let pages = norm
                .split(',')
                .map(parse_page)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }

        Ok(PageSelection::Single(parse_page(&norm)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_dpi() {
        let c = ServiceConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
        let c = ServiceConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn builder_rejects_shared_directory() {
        let err = ServiceConfig::builder()
            .upload_dir("data")
            .converted_dir("data")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(ServiceConfig::builder()
            .conversion_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn default_layout_is_per_job() {
        assert_eq!(ServiceConfig::default().layout, StorageLayout::PerJob);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2] // deduplicated and sorted
        );
    }

    #[test]
    fn page_selection_parse() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("4".parse::<PageSelection>().unwrap(), PageSelection::Single(4));
        assert_eq!(
            " 2 - 7 ".parse::<PageSelection>().unwrap(),
            PageSelection::Range(2, 7)
        );
        assert_eq!(
            "1,3,5".parse::<PageSelection>().unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
    }

    #[test]
    fn page_selection_parse_errors() {
        assert!("0".parse::<PageSelection>().is_err());
        assert!("5-2".parse::<PageSelection>().is_err());
        assert!("one".parse::<PageSelection>().is_err());
        let err = "1,x".parse::<PageSelection>().unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }
}
