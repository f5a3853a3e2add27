//! Conversion dispatch and the bounded conversion pool.
//!
//! [`ConversionKind`] names the five conversions and owns the naming rules
//! for their output. [`Converter`] runs one conversion synchronously;
//! [`ConversionPool`] runs it on tokio's blocking pool with a concurrency cap
//! and a time budget.
//!
//! ## Output naming
//!
//! Output names come from the input name by extension substitution:
//! `report.pdf` → `report.docx`, `photo.jpeg` → `photo.pdf`. PDF→Image
//! writes one PNG per page, `deck.pdf` → `deck_page_1.png`, `deck_page_2.png`,
//! numbered by page.

use crate::config::{ConvertOptions, ServiceConfig};
use crate::error::ConvertError;
use crate::pipeline::docx::{self, DocxBlock};
use crate::pipeline::markup::Markup;
use crate::pipeline::pdfium::PdfEngine;
use crate::pipeline::{pdf, persist, reflow, sheet};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

// ── Conversion kinds ─────────────────────────────────────────────────────

/// One of the supported conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionKind {
    PdfToWord,
    WordToPdf,
    ExcelToPdf,
    ImageToPdf,
    PdfToImage,
}

impl ConversionKind {
    pub const ALL: [ConversionKind; 5] = [
        ConversionKind::PdfToWord,
        ConversionKind::WordToPdf,
        ConversionKind::ExcelToPdf,
        ConversionKind::ImageToPdf,
        ConversionKind::PdfToImage,
    ];

    /// Route segment, e.g. `pdf-to-word`.
    pub fn route_name(&self) -> &'static str {
        match self {
            ConversionKind::PdfToWord => "pdf-to-word",
            ConversionKind::WordToPdf => "word-to-pdf",
            ConversionKind::ExcelToPdf => "excel-to-pdf",
            ConversionKind::ImageToPdf => "image-to-pdf",
            ConversionKind::PdfToImage => "pdf-to-image",
        }
    }

    /// Whether the input takes page selection and password options.
    pub fn reads_pdf(&self) -> bool {
        matches!(self, ConversionKind::PdfToWord | ConversionKind::PdfToImage)
    }

    /// Human-readable list of accepted input extensions.
    pub fn accepted_inputs(&self) -> String {
        match self {
            ConversionKind::PdfToWord | ConversionKind::PdfToImage => ".pdf".into(),
            ConversionKind::WordToPdf => ".docx".into(),
            ConversionKind::ExcelToPdf => sheet::SPREADSHEET_EXTENSIONS
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(" "),
            ConversionKind::ImageToPdf => "an image (png, jpeg, gif, bmp, tiff, webp, ico)".into(),
        }
    }

    /// Whether `file_name`'s extension is an input this conversion takes.
    /// Only the extension is checked, never the content.
    pub fn accepts(&self, file_name: &str) -> bool {
        let Some(ext) = extension(file_name) else {
            return false;
        };
        match self {
            ConversionKind::PdfToWord | ConversionKind::PdfToImage => ext == "pdf",
            ConversionKind::WordToPdf => ext == "docx",
            ConversionKind::ExcelToPdf => sheet::SPREADSHEET_EXTENSIONS.contains(&ext.as_str()),
            ConversionKind::ImageToPdf => {
                ImageFormat::from_extension(&ext).is_some_and(|f| f.reading_enabled())
            }
        }
    }

    /// Extension of the produced file(s), without the dot.
    pub fn output_extension(&self) -> &'static str {
        match self {
            ConversionKind::PdfToWord => "docx",
            ConversionKind::WordToPdf | ConversionKind::ExcelToPdf | ConversionKind::ImageToPdf => {
                "pdf"
            }
            ConversionKind::PdfToImage => "png",
        }
    }

    /// Output name for `input_name`. PDF→Image uses [`page_image_name`].
    pub fn output_name(&self, input_name: &str) -> String {
        format!("{}.{}", file_stem(input_name), self.output_extension())
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_name())
    }
}

impl FromStr for ConversionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionKind::ALL
            .into_iter()
            .find(|k| k.route_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<_> = ConversionKind::ALL.iter().map(|k| k.route_name()).collect();
                format!("unknown conversion '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Name of the PNG written for 1-indexed `page` of `input_name`.
pub fn page_image_name(input_name: &str, page: usize) -> String {
    format!("{}_page_{}.png", file_stem(input_name), page)
}

/// Everything before the last `.`, or the whole name when there is none.
fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// MIME type for a produced file, by extension.
pub fn content_type(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("png") => "image/png",
        Some("html") => "application/xhtml+xml",
        _ => "application/octet-stream",
    }
}

// ── Output ───────────────────────────────────────────────────────────────

/// Result of one conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub kind: ConversionKind,
    /// Produced files, in page order for PDF→Image.
    pub files: Vec<PathBuf>,
    /// Pages read (PDF inputs) or written (PDF outputs).
    pub pages: usize,
    pub duration_ms: u64,
}

// ── Converter ────────────────────────────────────────────────────────────

/// Runs conversions synchronously.
///
/// pdfium is bound by each conversion that reads a PDF, so a service started
/// without the library begins working as soon as it is installed.
pub struct Converter {
    config: Arc<ServiceConfig>,
}

impl Converter {
    pub fn new(config: Arc<ServiceConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn engine(&self) -> Result<PdfEngine, ConvertError> {
        PdfEngine::bind(self.config.pdfium_lib_path.as_deref())
    }

    /// Convert `input` into `out_dir`. Blocking.
    pub fn convert(
        &self,
        kind: ConversionKind,
        input: &Path,
        out_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<ConversionOutput, ConvertError> {
        let start = Instant::now();
        let input_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ConvertError::FileNotFound {
                path: input.to_path_buf(),
            })?;
        info!("Starting {} conversion: {}", kind, input.display());

        let (files, pages) = match kind {
            ConversionKind::PdfToWord => self.pdf_to_word(input, &input_name, out_dir, options)?,
            ConversionKind::WordToPdf => self.word_to_pdf(input, &input_name, out_dir)?,
            ConversionKind::ExcelToPdf => self.excel_to_pdf(input, &input_name, out_dir)?,
            ConversionKind::ImageToPdf => {
                let out = out_dir.join(kind.output_name(&input_name));
                pdf::image_to_pdf(input, &out)?;
                (vec![out], 1)
            }
            ConversionKind::PdfToImage => self.pdf_to_image(input, &input_name, out_dir, options)?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Finished {} conversion: {} file(s), {} page(s) in {}ms",
            kind,
            files.len(),
            pages,
            duration_ms
        );

        Ok(ConversionOutput {
            kind,
            files,
            pages,
            duration_ms,
        })
    }

    fn pdf_to_word(
        &self,
        input: &Path,
        input_name: &str,
        out_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<(Vec<PathBuf>, usize), ConvertError> {
        let pages =
            self.engine()?
                .extract_text(input, options.password.as_deref(), &options.pages)?;

        let mut blocks = Vec::new();
        for (i, (idx, text)) in pages.iter().enumerate() {
            if i > 0 {
                blocks.push(DocxBlock::PageBreak);
            }
            let paragraphs = reflow::paragraphs(text);
            debug!("Page {}: {} paragraphs", idx + 1, paragraphs.len());
            blocks.extend(paragraphs.into_iter().map(DocxBlock::Paragraph));
        }

        let out = out_dir.join(ConversionKind::PdfToWord.output_name(input_name));
        docx::write_docx(&out, file_stem(input_name), &blocks)?;
        Ok((vec![out], pages.len()))
    }

    fn word_to_pdf(
        &self,
        input: &Path,
        input_name: &str,
        out_dir: &Path,
    ) -> Result<(Vec<PathBuf>, usize), ConvertError> {
        let paragraphs = docx::read_paragraphs(input)?;
        let markup = Markup::from_paragraphs(file_stem(input_name), &paragraphs);
        let out = out_dir.join(ConversionKind::WordToPdf.output_name(input_name));
        let pages = self.render_via_markup(input, input_name, &markup, &out)?;
        Ok((vec![out], pages))
    }

    fn excel_to_pdf(
        &self,
        input: &Path,
        input_name: &str,
        out_dir: &Path,
    ) -> Result<(Vec<PathBuf>, usize), ConvertError> {
        let table = sheet::read_first_sheet(input)?;
        let markup = Markup::from_sheet(file_stem(input_name), &table);
        let out = out_dir.join(ConversionKind::ExcelToPdf.output_name(input_name));
        let pages = self.render_via_markup(input, input_name, &markup, &out)?;
        Ok((vec![out], pages))
    }

    /// Write `markup` to a uniquely named file next to `input`, lay the
    /// file out as PDF, then remove it unless configured to keep it.
    fn render_via_markup(
        &self,
        input: &Path,
        input_name: &str,
        markup: &Markup,
        out: &Path,
    ) -> Result<usize, ConvertError> {
        let dir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}.", file_stem(input_name)))
            .suffix(".html")
            .tempfile_in(dir)
            .map_err(|e| ConvertError::io(dir, e))?;
        let intermediate = Intermediate {
            path: Some(tmp.into_temp_path()),
            keep: self.config.keep_intermediate_markup,
        };

        markup.write(intermediate.path())?;
        let parsed = Markup::read(intermediate.path())?;
        pdf::render_markup(&parsed, out)
    }

    fn pdf_to_image(
        &self,
        input: &Path,
        input_name: &str,
        out_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<(Vec<PathBuf>, usize), ConvertError> {
        let dpi = options.dpi.unwrap_or(self.config.dpi).clamp(72, 400);
        let rendered = self.engine()?.render_pages(
            input,
            options.password.as_deref(),
            &options.pages,
            dpi,
            self.config.max_rendered_pixels,
        )?;

        let mut files = Vec::with_capacity(rendered.len());
        for (idx, image) in rendered {
            let out = out_dir.join(page_image_name(input_name, idx + 1));
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            persist(&out, |w| {
                rgb.write_to(w, ImageFormat::Png)
                    .map_err(|e| ConvertError::EncodeFailed {
                        format: "png",
                        detail: e.to_string(),
                    })
            })?;
            debug!("Wrote {}", out.display());
            files.push(out);
        }

        let pages = files.len();
        Ok((files, pages))
    }
}

/// Intermediate markup file, removed on drop unless `keep` is set. Drop also
/// runs when rendering fails, so a failed request leaves no markup behind.
/// Only the file this guard created is ever removed.
struct Intermediate {
    path: Option<TempPath>,
    keep: bool,
}

impl Intermediate {
    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for Intermediate {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if self.keep {
            match path.keep() {
                Ok(kept) => info!("Keeping intermediate markup {}", kept.display()),
                Err(e) => warn!(
                    "Could not keep intermediate markup {}: {}",
                    e.path.display(),
                    e.error
                ),
            }
            return;
        }
        let shown = path.to_path_buf();
        match path.close() {
            Ok(()) => debug!("Removed intermediate markup {}", shown.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove intermediate markup {}: {}",
                shown.display(),
                e
            ),
        }
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────

/// Runs conversions on tokio's blocking pool, at most
/// `max_concurrent_conversions` at a time and each within
/// `conversion_timeout_secs`.
///
/// Waiting for a free slot does not count against the time budget. A
/// conversion that times out keeps its slot until its thread finishes,
/// since blocking work cannot be cancelled.
#[derive(Clone)]
pub struct ConversionPool {
    converter: Arc<Converter>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ConversionPool {
    pub fn new(config: Arc<ServiceConfig>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        let timeout = Duration::from_secs(config.conversion_timeout_secs);
        Self {
            converter: Arc::new(Converter::new(config)),
            permits,
            timeout,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        self.converter.config()
    }

    /// Slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one conversion.
    pub async fn convert(
        &self,
        kind: ConversionKind,
        input: PathBuf,
        out_dir: PathBuf,
        options: ConvertOptions,
    ) -> Result<ConversionOutput, ConvertError> {
        let converter = Arc::clone(&self.converter);
        self.run(move || converter.convert(kind, &input, &out_dir, &options))
            .await
    }

    /// Run blocking `job` under the pool's concurrency cap and time budget.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ConvertError>
    where
        F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::Internal("conversion pool is closed".into()))?;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ConvertError::Internal(format!(
                "Conversion task panicked: {}",
                e
            ))),
            Err(_) => {
                warn!(
                    "Conversion exceeded {}s, abandoning it",
                    self.timeout.as_secs()
                );
                Err(ConvertError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn pool(max: usize, timeout_secs: u64) -> ConversionPool {
        let config = ServiceConfig::builder()
            .max_concurrent_conversions(max)
            .conversion_timeout_secs(timeout_secs)
            .build()
            .unwrap();
        ConversionPool::new(Arc::new(config))
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn output_names_substitute_extension() {
        assert_eq!(ConversionKind::PdfToWord.output_name("report.pdf"), "report.docx");
        assert_eq!(ConversionKind::ImageToPdf.output_name("photo.jpeg"), "photo.pdf");
        assert_eq!(ConversionKind::ExcelToPdf.output_name("q3.v2.xlsx"), "q3.v2.pdf");
        assert_eq!(ConversionKind::WordToPdf.output_name("README"), "README.pdf");
        assert_eq!(page_image_name("deck.pdf", 1), "deck_page_1.png");
        assert_eq!(page_image_name("deck.pdf", 12), "deck_page_12.png");
    }

    #[test]
    fn accepts_by_extension_only() {
        assert!(ConversionKind::PdfToWord.accepts("a.PDF"));
        assert!(!ConversionKind::PdfToWord.accepts("a.docx"));
        assert!(ConversionKind::WordToPdf.accepts("memo.docx"));
        assert!(!ConversionKind::WordToPdf.accepts("memo.doc"));
        for name in ["a.xlsx", "a.xls", "a.xlsm", "a.xlsb", "a.ods"] {
            assert!(ConversionKind::ExcelToPdf.accepts(name), "{name}");
        }
        for name in ["a.png", "a.jpg", "a.JPEG", "a.gif", "a.bmp", "a.tiff", "a.webp"] {
            assert!(ConversionKind::ImageToPdf.accepts(name), "{name}");
        }
        assert!(!ConversionKind::ImageToPdf.accepts("a.pdf"));
        assert!(!ConversionKind::ImageToPdf.accepts("noext"));
    }

    #[test]
    fn kind_parses_route_names() {
        for kind in ConversionKind::ALL {
            assert_eq!(kind.route_name().parse::<ConversionKind>().unwrap(), kind);
        }
        assert!("pdf-to-excel".parse::<ConversionKind>().is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("a.pdf"), "application/pdf");
        assert_eq!(content_type("a_page_1.png"), "image/png");
        assert!(content_type("a.docx").contains("wordprocessingml"));
        assert_eq!(content_type("a.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn timeout_yields_timeout_error() {
        let pool = pool(1, 1);
        let result: Result<(), _> = pool
            .run(|| {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ConvertError::Timeout { secs: 1 })));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let pool = pool(2, 5);
        let result: Result<(), _> = pool.run(|| panic!("converter bug")).await;
        assert!(matches!(result, Err(ConvertError::Internal(_))));
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let pool = pool(2, 10);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.run(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for job in jobs {
            job.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn word_to_pdf_removes_intermediate_markup() {
        let dir = tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let converted = dir.path().join("converted");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&converted).unwrap();

        let input = uploads.join("memo.docx");
        docx::write_docx(
            &input,
            "memo",
            &[
                DocxBlock::Paragraph("Alpha paragraph".into()),
                DocxBlock::Paragraph("Beta paragraph".into()),
            ],
        )
        .unwrap();

        let output = pool(1, 30)
            .convert(
                ConversionKind::WordToPdf,
                input.clone(),
                converted.clone(),
                ConvertOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(output.files, vec![converted.join("memo.pdf")]);
        assert_eq!(output.pages, 1);
        let pdf_bytes = std::fs::read(&output.files[0]).unwrap();
        assert!(pdf_bytes.starts_with(b"%PDF-"));
        assert_eq!(file_names(&uploads), vec!["memo.docx".to_string()]);
    }

    #[test]
    fn markup_never_touches_a_neighbouring_html_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("memo.docx");
        docx::write_docx(&input, "memo", &[DocxBlock::Paragraph("body".into())]).unwrap();
        let own = dir.path().join("memo.html");
        std::fs::write(&own, "my own notes").unwrap();

        Converter::new(Arc::new(ServiceConfig::default()))
            .convert(
                ConversionKind::WordToPdf,
                &input,
                dir.path(),
                &ConvertOptions::default(),
            )
            .unwrap();

        assert_eq!(std::fs::read_to_string(&own).unwrap(), "my own notes");
        assert_eq!(
            file_names(dir.path()),
            vec!["memo.docx".to_string(), "memo.html".to_string(), "memo.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn intermediate_markup_kept_when_configured() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("memo.docx");
        docx::write_docx(&input, "memo", &[DocxBlock::Paragraph("x".into())]).unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();

        let config = ServiceConfig::builder()
            .keep_intermediate_markup(true)
            .build()
            .unwrap();
        Converter::new(Arc::new(config))
            .convert(
                ConversionKind::WordToPdf,
                &input,
                &out_dir,
                &ConvertOptions::default(),
            )
            .unwrap();

        let kept: Vec<String> = file_names(dir.path())
            .into_iter()
            .filter(|n| n.starts_with("memo.") && n.ends_with(".html"))
            .collect();
        assert_eq!(kept.len(), 1);
        let markup = std::fs::read_to_string(dir.path().join(&kept[0])).unwrap();
        assert!(markup.contains("<p>x</p>"));
    }

    #[tokio::test]
    async fn failed_conversion_writes_no_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.docx");
        std::fs::File::create(&input)
            .unwrap()
            .write_all(b"not a zip")
            .unwrap();

        let err = pool(1, 30)
            .convert(
                ConversionKind::WordToPdf,
                input,
                dir.path().to_path_buf(),
                ConvertOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadInput);
        assert_eq!(file_names(dir.path()), vec!["broken.docx".to_string()]);
    }
}
