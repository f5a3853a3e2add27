//! Spreadsheet reading via calamine.
//!
//! Only the first worksheet is read. Its first row becomes the table header
//! and every later row a body row; rows whose cells are all empty are
//! dropped. Every cell is rendered as text.

use crate::error::ConvertError;
use calamine::{open_workbook_auto, Data, ExcelDateTime, Reader};
use std::path::Path;
use tracing::debug;

/// Extensions calamine opens (matched case-insensitively).
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// The first worksheet of a workbook, as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTable {
    pub name: String,
    pub header: Vec<String>,
    /// Body rows, each padded to the header width.
    pub rows: Vec<Vec<String>>,
}

/// Read the first worksheet of the workbook at `path`.
pub fn read_first_sheet(path: &Path) -> Result<SheetTable, ConvertError> {
    let corrupt = |detail: String| ConvertError::CorruptDocument {
        path: path.to_path_buf(),
        detail,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| corrupt(e.to_string()))?;

    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ConvertError::EmptyWorkbook {
            path: path.to_path_buf(),
        })?;

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| corrupt(format!("sheet '{name}': {e}")))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|c| !c.is_empty()));

    let header = rows.next().ok_or_else(|| ConvertError::EmptyWorkbook {
        path: path.to_path_buf(),
    })?;
    let width = header.len();

    let rows: Vec<Vec<String>> = rows
        .map(|mut cells| {
            cells.resize(width, String::new());
            cells
        })
        .collect();

    debug!(
        "Read sheet '{}' from {}: {} columns, {} rows",
        name,
        path.display(),
        width,
        rows.len()
    );

    Ok(SheetTable { name, header, rows })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::DateTime(dt) => date_time_text(dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Date cells print as `YYYY-MM-DD`, with ` HH:MM:SS` when they carry a
/// time of day; pure times print as `HH:MM:SS` and durations as `H:MM:SS`.
fn date_time_text(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        let total = (dt.as_f64() * 86_400.0).round() as i64;
        let sign = if total < 0 { "-" } else { "" };
        let total = total.abs();
        return format!("{sign}{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60);
    }

    let (year, month, day, hour, min, sec, _) = dt.to_ymd_hms_milli();
    let has_time = (hour, min, sec) != (0, 0, 0);
    if dt.as_f64().trunc() == 0.0 && has_time {
        format!("{hour:02}:{min:02}:{sec:02}")
    } else if has_time {
        format!("{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02}")
    } else {
        format!("{year:04}-{month:02}-{day:02}")
    }
}
