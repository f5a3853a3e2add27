//! Converter stages.
//!
//! Each submodule reads or writes one format; [`crate::convert`] chains
//! them into the five conversions the service offers.
//!
//! ## Data Flow
//!
//! ```text
//! PDF   ──▶ pdfium (text) ──▶ reflow ──▶ docx (write)         PDF→Word
//! DOCX  ──▶ docx (read) ──┐
//!                         ├─▶ markup ──▶ pdf (layout)        Word/Excel→PDF
//! XLSX  ──▶ sheet ────────┘
//! image ──▶ pdf (image page)                                 Image→PDF
//! PDF   ──▶ pdfium (render) ──▶ PNG per page                 PDF→Image
//! ```
//!
//! 1. [`pdfium`]: bind libpdfium, rasterise pages, extract page text
//! 2. [`reflow`]: rebuild paragraphs from hard-wrapped page text
//! 3. [`docx`]  : read paragraphs from, and write, Word packages
//! 4. [`sheet`] : read the first worksheet of a workbook
//! 5. [`markup`]: the intermediate XHTML written between reading and layout
//! 6. [`pdf`]   : lay out markup or a raster image as PDF pages
//!
//! All stages are blocking and run on tokio's blocking pool.

pub mod docx;
pub mod markup;
pub mod pdf;
pub mod pdfium;
pub mod reflow;
pub mod sheet;

use crate::error::ConvertError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a file atomically: `write` fills a temporary file in the target's
/// directory, which is renamed over `path` only once it is complete.
///
/// A failed or interrupted conversion therefore never leaves a truncated
/// artifact where a download could find it.
pub(crate) fn persist<F>(path: &Path, write: F) -> Result<(), ConvertError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), ConvertError>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConvertError::io(dir, e))?;
    let file = tmp.reopen().map_err(|e| ConvertError::io(tmp.path(), e))?;

    let mut out = BufWriter::new(file);
    write(&mut out)?;
    out.flush().map_err(|e| ConvertError::io(tmp.path(), e))?;

    tmp.persist(path)
        .map_err(|e| ConvertError::io(path, e.error))?;
    Ok(())
}

/// Drop characters XML 1.0 cannot carry. PDF text layers sometimes hold C0
/// control characters.
pub(crate) fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| c == '\t' || c == '\n' || c == '\r' || c >= ' ')
        .filter(|&c| c != '\u{FFFE}' && c != '\u{FFFF}')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persist_writes_complete_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");
        persist(&target, |w| {
            w.write_all(b"payload")
                .map_err(|e| ConvertError::io("out.bin", e))
        })
        .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn xml_safe_drops_control_characters() {
        assert_eq!(xml_safe("a\u{1}b\tc\u{FFFF}"), "ab\tc");
    }

    #[test]
    fn persist_leaves_nothing_on_failure() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let err = persist(&target, |_| Err(ConvertError::Internal("boom".into()))).unwrap_err();
        assert!(matches!(err, ConvertError::Internal(_)));
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
