//! Word (`.docx`) packages: paragraph extraction and minimal writing.
//!
//! A `.docx` file is a zip archive whose body lives in `word/document.xml`.
//! Reading walks that part with quick-xml and keeps only what the PDF
//! renderer uses: paragraph text and whether the paragraph is a heading.
//! Writing produces the smallest package Word and LibreOffice open without
//! complaint: content types, package relationships, core properties and
//! the document body.

use crate::error::ConvertError;
use crate::pipeline::{persist, xml_safe};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// A paragraph read from a Word document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocxParagraph {
    pub text: String,
    /// Heading level (1 = `Title`/`Heading1`), `None` for body text.
    pub heading: Option<u8>,
}

/// A block written to a Word document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocxBlock {
    Paragraph(String),
    PageBreak,
}

// ── Reading ──────────────────────────────────────────────────────────────

/// Read every paragraph of `word/document.xml`, in document order.
pub fn read_paragraphs(path: &Path) -> Result<Vec<DocxParagraph>, ConvertError> {
    let corrupt = |detail: String| ConvertError::CorruptDocument {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| corrupt(format!("not a zip archive: {e}")))?;

    let xml = {
        let mut part = archive
            .by_name("word/document.xml")
            .map_err(|_| corrupt("missing word/document.xml".into()))?;
        let mut content = String::new();
        part.read_to_string(&mut content)
            .map_err(|e| corrupt(format!("word/document.xml: {e}")))?;
        content
    };

    let paragraphs = parse_document_xml(&xml).map_err(corrupt)?;
    debug!("Read {} paragraphs from {}", paragraphs.len(), path.display());
    Ok(paragraphs)
}

/// Paragraphs can nest (text boxes hold their own `w:p` inside a run of the
/// enclosing paragraph), so open paragraphs are kept on a stack and each is
/// emitted when it closes. `mc:Fallback` repeats the `mc:Choice` content
/// for older readers and is skipped.
fn parse_document_xml(xml: &str) -> Result<Vec<DocxParagraph>, String> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut open: Vec<DocxParagraph> = Vec::new();
    let mut in_text = false;
    let mut fallback_depth = 0usize;

    loop {
        let event = reader.read_event();
        if fallback_depth > 0 {
            match event {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"Fallback" => {
                    fallback_depth += 1
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"Fallback" => {
                    fallback_depth -= 1
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "word/document.xml at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
                _ => {}
            }
            continue;
        }

        match event {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(DocxParagraph {
                    text: String::new(),
                    heading: None,
                }),
                b"t" => in_text = true,
                b"pStyle" => apply_style(&e, open.last_mut()),
                b"Fallback" => fallback_depth = 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(DocxParagraph {
                    text: String::new(),
                    heading: None,
                }),
                b"pStyle" => apply_style(&e, open.last_mut()),
                b"tab" | b"br" | b"cr" => {
                    if let Some(p) = open.last_mut() {
                        p.text.push(' ');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                if let Some(p) = open.last_mut() {
                    p.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = open.pop() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "word/document.xml at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn apply_style(e: &BytesStart<'_>, paragraph: Option<&mut DocxParagraph>) {
    let Some(p) = paragraph else { return };
    let val = e
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"val")
        .map(|a| String::from_utf8_lossy(&a.value).to_string());
    p.heading = val.as_deref().and_then(heading_level);
}

/// `Title` → 1, `Heading2` → 2, … Levels beyond 3 render as level 3.
fn heading_level(style: &str) -> Option<u8> {
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    let lower = style.to_ascii_lowercase();
    let digits = lower.strip_prefix("heading")?.trim();
    digits.parse::<u8>().ok().filter(|&n| n >= 1).map(|n| n.min(3))
}

// ── Writing ──────────────────────────────────────────────────────────────

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const PACKAGE_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

/// US Letter with one-inch margins, in twentieths of a point.
const SECTION_PROPERTIES: &str = r#"<w:sectPr><w:pgSz w:w="12240" w:h="15840"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr>"#;

/// Write `blocks` as a Word document at `path`.
pub fn write_docx(path: &Path, title: &str, blocks: &[DocxBlock]) -> Result<(), ConvertError> {
    let encode_err = |e: &dyn std::fmt::Display| ConvertError::EncodeFailed {
        format: "docx",
        detail: e.to_string(),
    };

    let document_xml = document_xml(blocks);
    let core_xml = core_xml(title);

    persist(path, |out| {
        let mut zip = ZipWriter::new(out);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, body) in [
            ("[Content_Types].xml", CONTENT_TYPES_XML),
            ("_rels/.rels", PACKAGE_RELS_XML),
            ("docProps/core.xml", core_xml.as_str()),
            ("word/document.xml", document_xml.as_str()),
        ] {
            zip.start_file(name, options).map_err(|e| encode_err(&e))?;
            zip.write_all(body.as_bytes())
                .map_err(|e| ConvertError::io(path, e))?;
        }

        zip.finish().map_err(|e| encode_err(&e))?;
        Ok(())
    })?;

    debug!("Wrote {} blocks to {}", blocks.len(), path.display());
    Ok(())
}

fn document_xml(blocks: &[DocxBlock]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
    );

    for block in blocks {
        match block {
            DocxBlock::Paragraph(text) => {
                xml.push_str(r#"<w:p><w:r><w:t xml:space="preserve">"#);
                xml.push_str(&escape(&xml_safe(text)));
                xml.push_str("</w:t></w:r></w:p>");
            }
            DocxBlock::PageBreak => {
                xml.push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#);
            }
        }
    }

    xml.push_str(SECTION_PROPERTIES);
    xml.push_str("</w:body></w:document>");
    xml
}

fn core_xml(title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>{}</dc:title><dc:creator>docconv</dc:creator></cp:coreProperties>"#,
        escape(&xml_safe(title))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_package(path: &Path, document_xml: &str) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn parses_paragraphs_runs_and_headings() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Intro</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world &amp; co</w:t></w:r></w:p>
            <w:p/>
            <w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r></w:p>
        </w:body></w:document>"#;

        let paragraphs = parse_document_xml(xml).unwrap();
        assert_eq!(paragraphs.len(), 4);
        assert_eq!(paragraphs[0].text, "Intro");
        assert_eq!(paragraphs[0].heading, Some(1));
        assert_eq!(paragraphs[1].text, "Hello world & co");
        assert_eq!(paragraphs[1].heading, None);
        assert_eq!(paragraphs[2].text, "");
        assert_eq!(paragraphs[3].text, "a b");
    }

    #[test]
    fn heading_levels() {
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Heading2"), Some(2));
        assert_eq!(heading_level("heading 7"), Some(3));
        assert_eq!(heading_level("Normal"), None);
        assert_eq!(heading_level("Heading0"), None);
    }

    #[test]
    fn text_box_keeps_enclosing_paragraph() {
        let xml = r#"<w:document xmlns:w="w" xmlns:mc="mc" xmlns:wps="wps" xmlns:v="v"><w:body>
            <w:p>
              <w:r><w:t xml:space="preserve">Before box </w:t></w:r>
              <w:r><mc:AlternateContent>
                <mc:Choice Requires="wps"><w:drawing><wps:txbx><w:txbxContent>
                  <w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>In box</w:t></w:r></w:p>
                </w:txbxContent></wps:txbx></w:drawing></mc:Choice>
                <mc:Fallback><w:pict><v:textbox><w:txbxContent>
                  <w:p><w:r><w:t>In box</w:t></w:r></w:p>
                </w:txbxContent></v:textbox></w:pict></mc:Fallback>
              </mc:AlternateContent></w:r>
              <w:r><w:t>after box</w:t></w:r>
            </w:p>
            <w:p><w:r><w:t>Next</w:t></w:r></w:p>
        </w:body></w:document>"#;

        let paragraphs = parse_document_xml(xml).unwrap();
        let texts: Vec<&str> = paragraphs.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["In box", "Before box after box", "Next"]);
        assert_eq!(paragraphs[0].heading, Some(2));
        assert_eq!(paragraphs[1].heading, None);
    }

    #[test]
    fn read_rejects_non_zip() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("fake.docx");
        std::fs::write(&p, b"plain text, not a package").unwrap();
        let err = read_paragraphs(&p).unwrap_err();
        assert!(matches!(err, ConvertError::CorruptDocument { .. }));
    }

    #[test]
    fn read_rejects_zip_without_body() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("empty.docx");
        let mut zip = ZipWriter::new(File::create(&p).unwrap());
        zip.start_file("other.xml", SimpleFileOptions::default()).unwrap();
        zip.finish().unwrap();
        let err = read_paragraphs(&p).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn reads_packaged_document() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("memo.docx");
        write_package(
            &p,
            r#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>Memo</w:t></w:r></w:p></w:body></w:document>"#,
        );
        let paragraphs = read_paragraphs(&p).unwrap();
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].text, "Memo");
    }

    #[test]
    fn written_document_is_readable_by_our_reader() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("out.docx");
        write_docx(
            &p,
            "Report <draft>",
            &[
                DocxBlock::Paragraph("Tom & Jerry".into()),
                DocxBlock::PageBreak,
                DocxBlock::Paragraph("page two\u{1}".into()),
            ],
        )
        .unwrap();

        let texts: Vec<String> = read_paragraphs(&p)
            .unwrap()
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(texts, vec!["Tom & Jerry", " ", "page two"]);

        let mut archive = ZipArchive::new(File::open(&p).unwrap()).unwrap();
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        let mut core = String::new();
        archive
            .by_name("docProps/core.xml")
            .unwrap()
            .read_to_string(&mut core)
            .unwrap();
        assert!(core.contains("Report &lt;draft&gt;"));
    }
}
