//! PDF writing with lopdf.
//!
//! Two producers share one document assembler:
//!
//! * [`render_markup`] flows intermediate markup onto A4 pages using the
//!   base-14 Helvetica faces (no font embedding). Tables get a grid in
//!   `#ddd` and a `#f2f2f2` header row, repeated after a page break.
//! * [`image_to_pdf`] places one raster image on a page of exactly its
//!   pixel size at 72 dpi, stored as a DCT (JPEG) RGB image.
//!
//! Text is encoded as WinAnsi; characters outside it print as `?`.

use crate::error::ConvertError;
use crate::pipeline::markup::{Block, Markup, Table};
use crate::pipeline::persist;
use image::{ColorType, DynamicImage, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A4 portrait in points.
pub const A4: (f32, f32) = (595.0, 842.0);

const MARGIN: f32 = 50.0;
const BODY_SIZE: f32 = 11.0;
const TABLE_SIZE: f32 = 10.0;
const HEADING_SIZES: [f32; 3] = [20.0, 16.0, 13.0];
const LEADING: f32 = 1.35;
const BLOCK_GAP: f32 = 6.0;

// Table styling, CSS px at 0.75 pt/px.
const CELL_PADDING: f32 = 6.0;
const BORDER_WIDTH: f32 = 0.75;
const BORDER_GRAY: f32 = 221.0 / 255.0;
const HEADER_FILL_GRAY: f32 = 242.0 / 255.0;

const JPEG_QUALITY: u8 = 92;

fn encode_err(e: impl std::fmt::Display) -> ConvertError {
    ConvertError::EncodeFailed {
        format: "pdf",
        detail: e.to_string(),
    }
}

// ── Fonts and metrics ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Helvetica advance widths for U+0020..=U+007E, in 1/1000 em.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// Helvetica-Bold runs wider than regular; measured against regular widths.
const BOLD_WIDTH_FACTOR: f32 = 1.07;

fn glyph_width(c: char) -> u32 {
    match c {
        ' '..='~' => u32::from(HELVETICA_WIDTHS[c as usize - 0x20]),
        _ => 556,
    }
}

fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let units: u32 = text.chars().map(glyph_width).sum();
    let width = units as f32 * size / 1000.0;
    match font {
        Font::Regular => width,
        Font::Bold => width * BOLD_WIDTH_FACTOR,
    }
}

/// Greedy word wrap. Words wider than the line are broken between characters.
fn wrap(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if text_width(&candidate, font, size) <= max_width {
            line = candidate;
            continue;
        }

        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        for c in word.chars() {
            line.push(c);
            if line.chars().count() > 1 && text_width(&line, font, size) > max_width {
                if let Some(last) = line.pop() {
                    lines.push(std::mem::take(&mut line));
                    line.push(last);
                }
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Encode text for a WinAnsi simple font.
fn to_win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c {
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            '\t' => b' ',
            c if (0x20..=0x7E).contains(&(c as u32)) || (0xA0..=0xFF).contains(&(c as u32)) => {
                c as u8
            }
            _ => b'?',
        })
        .collect()
}

// ── Document assembly ────────────────────────────────────────────────────

struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfWriter {
    fn new(title: &str) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::String(to_win_ansi(title), StringFormat::Literal),
            "Producer" => Object::string_literal("docconv"),
        });
        doc.trailer.set("Info", info_id);
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    /// Shared resource dictionary exposing both Helvetica faces.
    fn add_font_resources(&mut self) -> ObjectId {
        let mut fonts = Dictionary::new();
        for (font, base) in [(Font::Regular, "Helvetica"), (Font::Bold, "Helvetica-Bold")] {
            let id = self.doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => base,
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource_name(), id);
        }
        self.doc.add_object(dictionary! { "Font" => fonts })
    }

    fn add_page(
        &mut self,
        (width, height): (f32, f32),
        operations: Vec<Operation>,
        resources: impl Into<Object>,
    ) -> Result<(), ConvertError> {
        let resources: Object = resources.into();
        let content = Content { operations }.encode().map_err(encode_err)?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    /// Write the document to `path`; returns the page count.
    fn save(mut self, path: &Path) -> Result<usize, ConvertError> {
        let count = self.page_ids.len();
        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::from(*id)).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count as i64,
            }),
        );
        let catalog_id = self
            .doc
            .add_object(dictionary! { "Type" => "Catalog", "Pages" => self.pages_id });
        self.doc.trailer.set("Root", catalog_id);

        persist(path, |out| self.doc.save_to(out).map(|_| ()).map_err(encode_err))?;
        Ok(count)
    }
}

// ── Markup layout ────────────────────────────────────────────────────────

/// Lay out `markup` on A4 pages and write the PDF to `path`.
///
/// Returns the number of pages written. An empty document still gets one
/// blank page.
pub fn render_markup(markup: &Markup, path: &Path) -> Result<usize, ConvertError> {
    let mut writer = PdfWriter::new(&markup.title);
    let resources_id = writer.add_font_resources();

    let mut flow = Flow::new(&mut writer, resources_id);
    for block in &markup.blocks {
        match block {
            Block::Heading { level, text } => flow.heading(*level, text)?,
            Block::Paragraph(text) => flow.paragraph(text)?,
            Block::Table(table) => flow.table(table)?,
        }
    }
    flow.finish()?;

    let pages = writer.save(path)?;
    debug!(
        "Rendered {} blocks onto {} pages → {}",
        markup.blocks.len(),
        pages,
        path.display()
    );
    Ok(pages)
}

/// Top-to-bottom cursor over the page being filled.
struct Flow<'a> {
    writer: &'a mut PdfWriter,
    resources_id: ObjectId,
    ops: Vec<Operation>,
    y: f32,
    fresh_page: bool,
}

impl<'a> Flow<'a> {
    const TOP: f32 = A4.1 - MARGIN;
    const BOTTOM: f32 = MARGIN;
    const WIDTH: f32 = A4.0 - 2.0 * MARGIN;

    fn new(writer: &'a mut PdfWriter, resources_id: ObjectId) -> Self {
        Self {
            writer,
            resources_id,
            ops: Vec::new(),
            y: Self::TOP,
            fresh_page: true,
        }
    }

    fn break_page(&mut self) -> Result<(), ConvertError> {
        let ops = std::mem::take(&mut self.ops);
        self.writer.add_page(A4, ops, self.resources_id)?;
        self.y = Self::TOP;
        self.fresh_page = true;
        Ok(())
    }

    /// Start a new page unless `height` fits below the cursor.
    fn ensure(&mut self, height: f32) -> Result<bool, ConvertError> {
        if self.y - height < Self::BOTTOM && !self.fresh_page {
            self.break_page()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn finish(mut self) -> Result<(), ConvertError> {
        if !self.ops.is_empty() || self.writer.page_ids.is_empty() {
            self.break_page()?;
        }
        Ok(())
    }

    fn text(&mut self, font: Font, size: f32, x: f32, baseline: f32, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![Object::Name(font.resource_name().as_bytes().to_vec()), size.into()],
        ));
        self.ops.push(Operation::new("Td", vec![x.into(), baseline.into()]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(to_win_ansi(text), StringFormat::Literal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn lines(&mut self, text: &str, font: Font, size: f32) -> Result<(), ConvertError> {
        let line_height = size * LEADING;
        let lines = wrap(text, font, size, Self::WIDTH);
        if lines.is_empty() {
            self.ensure(line_height)?;
            self.y -= line_height;
        }
        for line in lines {
            self.ensure(line_height)?;
            self.text(font, size, MARGIN, self.y - size, &line);
            self.y -= line_height;
            self.fresh_page = false;
        }
        Ok(())
    }

    fn heading(&mut self, level: u8, text: &str) -> Result<(), ConvertError> {
        let size = HEADING_SIZES[usize::from(level.clamp(1, 3)) - 1];
        if !self.fresh_page {
            self.y -= size * 0.5;
        }
        // Keep a heading together with the first line that follows it.
        self.ensure(size * LEADING + BODY_SIZE * LEADING)?;
        self.lines(text, Font::Bold, size)?;
        self.y -= BLOCK_GAP * 0.5;
        Ok(())
    }

    fn paragraph(&mut self, text: &str) -> Result<(), ConvertError> {
        self.lines(text, Font::Regular, BODY_SIZE)?;
        self.y -= BLOCK_GAP;
        Ok(())
    }

    fn table(&mut self, table: &Table) -> Result<(), ConvertError> {
        let columns = table
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(table.header.len()))
            .max()
            .unwrap_or(0);
        if columns == 0 {
            return Ok(());
        }

        let grid = Grid {
            column_width: Self::WIDTH / columns as f32,
            columns,
        };

        let has_header = !table.header.is_empty();
        if has_header {
            self.table_row(&grid, &table.header, true)?;
        }
        let line_height = TABLE_SIZE * LEADING;
        for row in &table.rows {
            let mut cells = grid.wrap_row(row, Font::Regular);
            let whole = grid.height_of(&cells);
            // Keep a row on one page when it can fit on one; otherwise start
            // it wherever a line still fits and let it continue overleaf.
            let needed = if whole <= Self::TOP - Self::BOTTOM {
                whole
            } else {
                line_height + 2.0 * CELL_PADDING
            };
            if self.ensure(needed)? && has_header {
                self.table_row(&grid, &table.header, true)?;
            }
            loop {
                let room = (self.y - Self::BOTTOM - 2.0 * CELL_PADDING) / line_height;
                let fit = (room + 1e-3).floor().max(1.0) as usize;
                self.draw_row(&grid, &mut cells, fit, false);
                if cells.iter().all(Vec::is_empty) {
                    break;
                }
                self.break_page()?;
                if has_header {
                    self.table_row(&grid, &table.header, true)?;
                }
            }
        }

        self.y -= BLOCK_GAP;
        Ok(())
    }

    /// Draw a whole row, moving to a new page first if it does not fit.
    fn table_row(&mut self, grid: &Grid, cells: &[String], header: bool) -> Result<(), ConvertError> {
        let font = if header { Font::Bold } else { Font::Regular };
        let mut lines = grid.wrap_row(cells, font);
        self.ensure(grid.height_of(&lines))?;
        self.draw_row(grid, &mut lines, usize::MAX, header);
        Ok(())
    }

    /// Draw up to `max_lines` lines of every cell as one band of the row,
    /// removing the drawn lines from `cells`.
    fn draw_row(&mut self, grid: &Grid, cells: &mut [Vec<String>], max_lines: usize, header: bool) {
        let font = if header { Font::Bold } else { Font::Regular };
        let lines = cells.iter().map(Vec::len).max().unwrap_or(0).clamp(1, max_lines.max(1));
        let line_height = TABLE_SIZE * LEADING;
        let height = lines as f32 * line_height + 2.0 * CELL_PADDING;

        let top = self.y;
        let bottom = top - height;
        let row_width = grid.column_width * grid.columns as f32;

        if header {
            self.ops.push(Operation::new("q", vec![]));
            self.ops.push(Operation::new("g", vec![HEADER_FILL_GRAY.into()]));
            self.ops.push(Operation::new(
                "re",
                vec![MARGIN.into(), bottom.into(), row_width.into(), height.into()],
            ));
            self.ops.push(Operation::new("f", vec![]));
            self.ops.push(Operation::new("Q", vec![]));
        }

        for (col, cell) in cells.iter_mut().enumerate() {
            let x = MARGIN + col as f32 * grid.column_width;
            let take = lines.min(cell.len());
            for (i, line) in cell.drain(..take).enumerate() {
                let baseline = top - CELL_PADDING - i as f32 * line_height - TABLE_SIZE;
                self.text(font, TABLE_SIZE, x + CELL_PADDING, baseline, &line);
            }

            self.ops.push(Operation::new("q", vec![]));
            self.ops.push(Operation::new("w", vec![BORDER_WIDTH.into()]));
            self.ops.push(Operation::new("G", vec![BORDER_GRAY.into()]));
            self.ops.push(Operation::new(
                "re",
                vec![x.into(), bottom.into(), grid.column_width.into(), height.into()],
            ));
            self.ops.push(Operation::new("S", vec![]));
            self.ops.push(Operation::new("Q", vec![]));
        }

        self.y = bottom;
        self.fresh_page = false;
    }
}

/// Equal-width table columns spanning the text area.
struct Grid {
    column_width: f32,
    columns: usize,
}

impl Grid {
    fn wrap_cell(&self, text: &str, font: Font) -> Vec<String> {
        let inner = (self.column_width - 2.0 * CELL_PADDING).max(TABLE_SIZE);
        wrap(text, font, TABLE_SIZE, inner)
    }

    /// Wrapped lines of each cell, one entry per column.
    fn wrap_row(&self, cells: &[String], font: Font) -> Vec<Vec<String>> {
        (0..self.columns)
            .map(|col| self.wrap_cell(cells.get(col).map(String::as_str).unwrap_or(""), font))
            .collect()
    }

    fn height_of(&self, cells: &[Vec<String>]) -> f32 {
        let lines = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
        lines as f32 * TABLE_SIZE * LEADING + 2.0 * CELL_PADDING
    }
}

// ── Images ───────────────────────────────────────────────────────────────

/// Pixel size of an image placed by [`image_to_pdf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePage {
    pub width: u32,
    pub height: u32,
}

/// Write the image at `image_path` as a one-page PDF at `pdf_path`.
///
/// The page measures the image's pixel size in points (72 dpi). Three-channel
/// JPEG input is embedded as-is; anything else, CMYK JPEG included, is
/// converted to 8-bit RGB and JPEG-encoded.
pub fn image_to_pdf(image_path: &Path, pdf_path: &Path) -> Result<ImagePage, ConvertError> {
    let bytes = std::fs::read(image_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvertError::FileNotFound {
                path: image_path.to_path_buf(),
            }
        } else {
            ConvertError::io(image_path, e)
        }
    })?;

    let undecodable = |detail: String| ConvertError::UndecodableImage {
        path: image_path.to_path_buf(),
        detail,
    };

    let reader = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| undecodable(e.to_string()))?;
    let format = reader.format();
    let image = reader.decode().map_err(|e| undecodable(e.to_string()))?;

    let page = ImagePage {
        width: image.width(),
        height: image.height(),
    };
    if page.width == 0 || page.height == 0 {
        return Err(undecodable("image has no pixels".into()));
    }

    let passthrough = format == Some(ImageFormat::Jpeg)
        && image.color() == ColorType::Rgb8
        && jpeg_components(&bytes) == Some(3);
    let jpeg = if passthrough {
        bytes
    } else {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut buf = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        rgb.write_with_encoder(encoder).map_err(|e| ConvertError::EncodeFailed {
            format: "jpeg",
            detail: e.to_string(),
        })?;
        buf
    };

    let mut writer = PdfWriter::new(
        &image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    let image_id = writer.doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(page.width),
            "Height" => i64::from(page.height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));

    let (w, h) = (page.width as f32, page.height as f32);
    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
        ),
        Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
        Operation::new("Q", vec![]),
    ];
    let resources = dictionary! { "XObject" => dictionary! { "Im1" => image_id } };
    writer.add_page((w, h), operations, resources)?;
    writer.save(pdf_path)?;

    debug!(
        "Placed {}x{} image {} → {}",
        page.width,
        page.height,
        image_path.display(),
        pdf_path.display()
    );
    Ok(page)
}

/// Number of colour components declared by a JPEG's start-of-frame header,
/// or `None` if `bytes` is not a well-formed JPEG up to that header.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut i = 2;
    loop {
        if *bytes.get(i)? != 0xFF {
            return None;
        }
        let marker = *bytes.get(i + 1)?;
        match marker {
            // Fill byte before a marker.
            0xFF => i += 1,
            0x01 | 0xD0..=0xD7 => i += 2,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => return bytes.get(i + 9).copied(),
            _ => {
                let len = u16::from_be_bytes([*bytes.get(i + 2)?, *bytes.get(i + 3)?]);
                i += 2 + usize::from(len);
            }
        }
    }
}
