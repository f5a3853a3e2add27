//! Error types for the docconv library.
//!
//! Every converter returns `Result<_, ConvertError>`. Variants are grouped
//! into coarse [`ErrorKind`]s so that callers (the HTTP layer in particular)
//! can tell a document the engine refused apart from an engine that is not
//! working at all, or from a disk that is full:
//!
//! * [`ErrorKind::BadInput`]: the uploaded document is unreadable for the
//!   requested conversion (corrupt, encrypted, empty).
//! * [`ErrorKind::Engine`]: a conversion engine failed on a document it
//!   accepted (PDFium missing, render failure, PDF serialisation failure).
//! * [`ErrorKind::Storage`]: the filesystem failed.
//! * [`ErrorKind::Timeout`]: the conversion exceeded its time budget.
//! * [`ErrorKind::Internal`]: everything else.
//!
//! Messages name a file by its last path component only, since they reach
//! HTTP clients. The full path stays on the variant for logging.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse classification of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    Engine,
    Storage,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Stable identifier used in JSON error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::Engine => "engine",
            ErrorKind::Storage => "storage",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

/// All errors returned by docconv converters and stores.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{}'", file_label(.path))]
    FileNotFound { path: PathBuf },

    /// The file exists but does not start with the `%PDF` signature.
    #[error("File is not a valid PDF: '{}' (first bytes: {magic:?})", file_label(.path))]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{}' is corrupt: {detail}", file_label(.path))]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{}' is encrypted and requires a password", file_label(.path))]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{}'", file_label(.path))]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("No selected page exists (document has {total} pages)")]
    NoPagesSelected { total: usize },

    /// A Word or spreadsheet package could not be read.
    #[error("Document '{}' is unreadable: {detail}", file_label(.path))]
    CorruptDocument { path: PathBuf, detail: String },

    /// The workbook contains no worksheet with any cell.
    #[error("Workbook '{}' has no data", file_label(.path))]
    EmptyWorkbook { path: PathBuf },

    /// The image could not be decoded.
    #[error("Image '{}' could not be decoded: {detail}", file_label(.path))]
    UndecodableImage { path: PathBuf, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// Could not bind to a PDFium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set DOCCONV_PDFIUM_LIB (or --pdfium-lib) to the path of libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Text could not be extracted from a page.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    /// Building or serialising an output document failed.
    #[error("Failed to encode {format} output: {detail}")]
    EncodeFailed { format: &'static str, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A filesystem operation failed.
    #[error("I/O error on '{}': {source}", file_label(.path))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Scheduling errors ─────────────────────────────────────────────────
    /// The conversion exceeded its time budget.
    #[error("Conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::FileNotFound { .. }
            | ConvertError::NotAPdf { .. }
            | ConvertError::CorruptPdf { .. }
            | ConvertError::PasswordRequired { .. }
            | ConvertError::WrongPassword { .. }
            | ConvertError::NoPagesSelected { .. }
            | ConvertError::CorruptDocument { .. }
            | ConvertError::EmptyWorkbook { .. }
            | ConvertError::UndecodableImage { .. } => ErrorKind::BadInput,
            ConvertError::PdfiumBindingFailed(_)
            | ConvertError::RasterisationFailed { .. }
            | ConvertError::TextExtractionFailed { .. }
            | ConvertError::EncodeFailed { .. } => ErrorKind::Engine,
            ConvertError::Io { .. } => ErrorKind::Storage,
            ConvertError::Timeout { .. } => ErrorKind::Timeout,
            ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for wrapping an `io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}

fn file_label(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_required_is_bad_input() {
        let e = ConvertError::PasswordRequired {
            path: PathBuf::from("locked.pdf"),
        };
        assert_eq!(e.kind(), ErrorKind::BadInput);
        assert!(e.to_string().contains("locked.pdf"));
    }

    #[test]
    fn binding_failure_is_engine() {
        let e = ConvertError::PdfiumBindingFailed("no such file".into());
        assert_eq!(e.kind(), ErrorKind::Engine);
        assert!(e.to_string().contains("DOCCONV_PDFIUM_LIB"));
    }

    #[test]
    fn io_error_is_storage() {
        let e = ConvertError::io(
            "converted/out.pdf",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(e.kind(), ErrorKind::Storage);
        assert!(e.to_string().contains("'out.pdf'"));
    }

    #[test]
    fn messages_do_not_reveal_directories() {
        let dir = PathBuf::from("/srv/docconv/uploads/3f2a9c");
        let errors = [
            ConvertError::CorruptDocument {
                path: dir.join("memo.docx"),
                detail: "not a zip archive".into(),
            },
            ConvertError::UndecodableImage {
                path: dir.join("scan.png"),
                detail: "bad header".into(),
            },
            ConvertError::NotAPdf {
                path: dir.join("report.pdf"),
                magic: *b"PK\x03\x04",
            },
            ConvertError::io(
                dir.join("report.pdf"),
                std::io::Error::new(std::io::ErrorKind::Other, "no space"),
            ),
        ];
        for e in errors {
            let message = e.to_string();
            assert!(!message.contains("/srv/docconv"), "{message}");
        }
        let e = ConvertError::EmptyWorkbook {
            path: dir.join("sales.xlsx"),
        };
        assert_eq!(e.to_string(), "Workbook 'sales.xlsx' has no data");
        assert!(format!("{e:?}").contains("/srv/docconv/uploads"));
    }

    #[test]
    fn timeout_display() {
        let e = ConvertError::Timeout { secs: 30 };
        assert_eq!(e.kind().as_str(), "timeout");
        assert!(e.to_string().contains("30s"));
    }
}
