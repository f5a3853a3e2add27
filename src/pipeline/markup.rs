//! Intermediate markup between document reading and PDF layout.
//!
//! Word→PDF and Excel→PDF do not lay out their input directly. The reader
//! output is first written as a small XHTML file next to the upload, and
//! the PDF writer lays out whatever that file holds. The file uses a fixed
//! subset: `title`, `h1`–`h3`, `p` and `table`/`tr`/`th`/`td`.

use crate::error::ConvertError;
use crate::pipeline::docx::DocxParagraph;
use crate::pipeline::sheet::SheetTable;
use crate::pipeline::{persist, xml_safe};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Table styling carried by the markup file and honoured by the PDF writer.
pub const TABLE_STYLE: &str = "table { border-collapse: collapse; width: 100%; }\n\
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }\n\
th { background-color: #f2f2f2; }";

/// A table with one header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One block-level element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Level 1–3.
    Heading { level: u8, text: String },
    Paragraph(String),
    Table(Table),
}

/// A whole intermediate document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markup {
    pub title: String,
    pub blocks: Vec<Block>,
}

impl Markup {
    /// One block per Word paragraph; heading paragraphs stay headings.
    pub fn from_paragraphs(title: &str, paragraphs: &[DocxParagraph]) -> Self {
        let blocks = paragraphs
            .iter()
            .map(|p| match p.heading {
                Some(level) => Block::Heading {
                    level: level.clamp(1, 3),
                    text: p.text.clone(),
                },
                None => Block::Paragraph(p.text.clone()),
            })
            .collect();
        Self {
            title: title.to_string(),
            blocks,
        }
    }

    /// A single table holding the worksheet.
    pub fn from_sheet(title: &str, sheet: &SheetTable) -> Self {
        Self {
            title: title.to_string(),
            blocks: vec![Block::Table(Table {
                header: sheet.header.clone(),
                rows: sheet.rows.clone(),
            })],
        }
    }

    /// Serialise as XHTML.
    pub fn to_xhtml(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str("<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n<head>\n");
        out.push_str("<meta charset=\"utf-8\"/>\n");
        out.push_str(&format!("<title>{}</title>\n", text(&self.title)));
        out.push_str(&format!("<style>\n{TABLE_STYLE}\n</style>\n"));
        out.push_str("</head>\n<body>\n");

        for block in &self.blocks {
            match block {
                Block::Heading { level, text: t } => {
                    out.push_str(&format!("<h{level}>{}</h{level}>\n", text(t)));
                }
                Block::Paragraph(t) => {
                    out.push_str(&format!("<p>{}</p>\n", text(t)));
                }
                Block::Table(table) => {
                    out.push_str("<table>\n<tr>");
                    for cell in &table.header {
                        out.push_str(&format!("<th>{}</th>", text(cell)));
                    }
                    out.push_str("</tr>\n");
                    for row in &table.rows {
                        out.push_str("<tr>");
                        for cell in row {
                            out.push_str(&format!("<td>{}</td>", text(cell)));
                        }
                        out.push_str("</tr>\n");
                    }
                    out.push_str("</table>\n");
                }
            }
        }

        out.push_str("</body>\n</html>\n");
        out
    }

    /// Write the markup file at `path`.
    pub fn write(&self, path: &Path) -> Result<(), ConvertError> {
        let xhtml = self.to_xhtml();
        persist(path, |out| {
            out.write_all(xhtml.as_bytes())
                .map_err(|e| ConvertError::io(path, e))
        })?;
        debug!("Wrote markup {} ({} blocks)", path.display(), self.blocks.len());
        Ok(())
    }

    /// Read a markup file written by [`Markup::write`].
    pub fn read(path: &Path) -> Result<Self, ConvertError> {
        let xhtml = std::fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Self::parse(&xhtml).map_err(|detail| ConvertError::CorruptDocument {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parse the XHTML subset. Unknown elements are skipped, their text
    /// included in whatever block encloses them.
    pub fn parse(xhtml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xhtml);

        let mut markup = Markup::default();
        let mut text_buf: Option<String> = None;
        let mut table: Option<Table> = None;
        let mut row: Vec<String> = Vec::new();
        let mut row_is_header = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"title" | b"h1" | b"h2" | b"h3" | b"p" | b"th" | b"td" => {
                        text_buf = Some(String::new())
                    }
                    b"table" => table = Some(Table::default()),
                    b"tr" => {
                        row.clear();
                        row_is_header = true;
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"p" => markup.blocks.push(Block::Paragraph(String::new())),
                    b"th" => row.push(String::new()),
                    b"td" => {
                        row.push(String::new());
                        row_is_header = false;
                    }
                    _ => {}
                },
                Ok(Event::Text(t)) => {
                    if let Some(buf) = text_buf.as_mut() {
                        buf.push_str(&t.unescape().map_err(|e| e.to_string())?);
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    match name {
                        b"title" => markup.title = take_text(&mut text_buf),
                        b"h1" | b"h2" | b"h3" => markup.blocks.push(Block::Heading {
                            level: name[1] - b'0',
                            text: take_text(&mut text_buf),
                        }),
                        b"p" => markup
                            .blocks
                            .push(Block::Paragraph(take_text(&mut text_buf))),
                        b"th" => row.push(take_text(&mut text_buf)),
                        b"td" => {
                            row.push(take_text(&mut text_buf));
                            row_is_header = false;
                        }
                        b"tr" => {
                            let t = table.get_or_insert_with(Table::default);
                            let cells = std::mem::take(&mut row);
                            if row_is_header && t.header.is_empty() && t.rows.is_empty() {
                                t.header = cells;
                            } else {
                                t.rows.push(cells);
                            }
                        }
                        b"table" => {
                            if let Some(t) = table.take() {
                                markup.blocks.push(Block::Table(t));
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "markup error at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
                _ => {}
            }
        }

        Ok(markup)
    }
}

fn text(s: &str) -> String {
    escape(&xml_safe(s)).into_owned()
}

fn take_text(buf: &mut Option<String>) -> String {
    buf.take().map(|s| s.trim().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Markup {
        Markup {
            title: "Q3 <draft>".into(),
            blocks: vec![
                Block::Heading {
                    level: 1,
                    text: "Summary".into(),
                },
                Block::Paragraph("Costs & revenue".into()),
                Block::Paragraph(String::new()),
                Block::Table(Table {
                    header: vec!["Region".into(), "Units".into()],
                    rows: vec![vec!["North".into(), "12".into()]],
                }),
            ],
        }
    }

    #[test]
    fn xhtml_carries_table_style_and_escapes_text() {
        let xhtml = sample().to_xhtml();
        assert!(xhtml.contains("border-collapse: collapse"));
        assert!(xhtml.contains("background-color: #f2f2f2"));
        assert!(xhtml.contains("<title>Q3 &lt;draft&gt;</title>"));
        assert!(xhtml.contains("<p>Costs &amp; revenue</p>"));
        assert!(xhtml.contains("<th>Region</th><th>Units</th>"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("q3.html");
        let original = sample();
        original.write(&p).unwrap();
        assert_eq!(Markup::read(&p).unwrap(), original);
    }

    #[test]
    fn parse_ignores_style_text() {
        let m = Markup::parse(
            "<html><head><style>p { color: red; }</style></head><body><p> hi </p></body></html>",
        )
        .unwrap();
        assert_eq!(m.blocks, vec![Block::Paragraph("hi".into())]);
    }

    #[test]
    fn from_paragraphs_keeps_headings() {
        let m = Markup::from_paragraphs(
            "memo",
            &[
                DocxParagraph {
                    text: "Title".into(),
                    heading: Some(1),
                },
                DocxParagraph {
                    text: "Body".into(),
                    heading: None,
                },
            ],
        );
        assert_eq!(m.title, "memo");
        assert!(matches!(&m.blocks[0], Block::Heading { level: 1, text } if text == "Title"));
        assert_eq!(m.blocks[1], Block::Paragraph("Body".into()));
    }

    #[test]
    fn parse_rejects_mismatched_tags() {
        assert!(Markup::parse("<html><body><p>open</h1></body></html>").is_err());
    }
}
