//! Reflow: turn raw page text into editable paragraphs.
//!
//! pdfium reports page text as the lines it laid out, hard-wrapped at the
//! column edge. A Word document wants paragraphs that wrap on their own, so
//! the lines of each block are re-joined and words hyphenated across a line
//! break are stitched back together.
//!
//! pdfium's plain page text separates lines with a single line break and
//! carries no paragraph boundaries, so [`layout_text`] first rebuilds the
//! lines from positioned text runs and marks paragraph breaks from the page
//! geometry (extra vertical space, a first-line indent, a sentence ending
//! short of the right margin, or a change of font size).
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything looks at `\n`; invisible
//! characters are removed before hyphenation repair so a soft hyphen does not
//! hide a real one; blank-line detection runs on trimmed lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Split one page of extracted text into paragraphs.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim whitespace per line
/// 4. Re-join words hyphenated across a line break
/// 5. Split on blank lines; join the lines of each block with single spaces
/// 6. Collapse runs of inner whitespace
pub fn paragraphs(page_text: &str) -> Vec<String> {
    let s = normalise_line_endings(page_text);
    let s = remove_invisible_chars(&s);
    let s = trim_lines(&s);
    let s = join_hyphenated(&s);
    split_blocks(&s)
        .into_iter()
        .map(|block| collapse_whitespace(&block))
        .filter(|p| !p.is_empty())
        .collect()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim each line ──────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Repair line-break hyphenation ───────────────────────────────────

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{Ll})-\n(\p{Ll})").unwrap());

fn join_hyphenated(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 5: Split into blocks ───────────────────────────────────────────────

fn split_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in input.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join(" "));
    }

    blocks
}

// ── Rule 6: Collapse inner whitespace ───────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}]{2,}").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_SPACES.replace_all(input.trim(), " ").to_string()
}

// ── Layout: lines and paragraph breaks from positioned runs ─────────────────

/// A run of text, its bounding box in PDF user space (origin at the bottom
/// left, y growing upwards) and its font size in points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub size: f32,
}

#[derive(Debug)]
struct Line {
    text: String,
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    size: f32,
}

/// Line pitch, relative to the usual pitch, that starts a paragraph.
const GAP_FACTOR: f32 = 1.3;
/// Usual pitch as a multiple of the font size, when a page has too few
/// lines to measure it.
const DEFAULT_LEADING: f32 = 1.3;
/// Indent, in font sizes, that marks a paragraph's first line.
const INDENT_FACTOR: f32 = 1.0;
/// Distance from the right margin, in font sizes, at which a line ending a
/// sentence is taken to end its paragraph.
const SHORT_LINE_FACTOR: f32 = 4.0;
/// Relative font size change that separates a heading from body text.
const SIZE_CHANGE: f32 = 0.15;

/// Rebuild the text of one page from its runs in reading order.
///
/// Lines are separated by `\n` and paragraphs by a blank line, ready for
/// [`paragraphs`].
pub fn layout_text(runs: &[TextRun]) -> String {
    let lines = group_lines(runs);
    if lines.is_empty() {
        return String::new();
    }

    let size = median(lines.iter().map(|l| l.size).filter(|s| *s > 0.0)).unwrap_or(10.0);
    let pitches: Vec<f32> = lines
        .windows(2)
        .map(|w| w[0].top - w[1].top)
        .filter(|p| *p > 0.0)
        .collect();
    let pitch = if pitches.len() >= 3 {
        median(pitches.into_iter()).unwrap_or(size * DEFAULT_LEADING)
    } else {
        size * DEFAULT_LEADING
    };
    let body_left = lines.iter().map(|l| l.left).fold(f32::INFINITY, f32::min);
    let body_right = lines.iter().map(|l| l.right).fold(f32::NEG_INFINITY, f32::max);

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            let prev = &lines[i - 1];
            let step = prev.top - line.top;
            let larger = prev.size.max(line.size).max(f32::EPSILON);
            let starts_paragraph = step <= 0.0
                || step > pitch * GAP_FACTOR
                || (line.left - body_left > size * INDENT_FACTOR
                    && prev.left - body_left <= size * 0.5)
                || (ends_sentence(&prev.text) && body_right - prev.right > size * SHORT_LINE_FACTOR)
                || (prev.size - line.size).abs() > larger * SIZE_CHANGE;
            out.push_str(if starts_paragraph { "\n\n" } else { "\n" });
        }
        out.push_str(&line.text);
    }
    out
}

fn group_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    for run in runs {
        if run.text.trim().is_empty() {
            continue;
        }
        let middle = (run.bottom + run.top) / 2.0;
        match lines.last_mut() {
            Some(line) if middle >= line.bottom && middle <= line.top && run.left >= line.left => {
                let gap = run.left - line.right;
                let touching = line.text.ends_with(char::is_whitespace)
                    || run.text.starts_with(char::is_whitespace);
                if !touching && gap > run.size * 0.15 {
                    line.text.push(' ');
                }
                line.text.push_str(&run.text);
                line.right = line.right.max(run.right);
                line.bottom = line.bottom.min(run.bottom);
                line.top = line.top.max(run.top);
                line.size = line.size.max(run.size);
            }
            _ => lines.push(Line {
                text: run.text.clone(),
                left: run.left,
                right: run.right,
                bottom: run.bottom,
                top: run.top,
                size: run.size,
            }),
        }
    }
    lines
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(['.', '!', '?', ':'])
}

fn median(values: impl Iterator<Item = f32>) -> Option<f32> {
    let mut v: Vec<f32> = values.collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    Some(v[v.len() / 2])
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_join_hyphenated() {
        assert_eq!(join_hyphenated("conver-\nsion"), "conversion");
        // Capitalised continuation is a real compound, keep the hyphen
        assert_eq!(join_hyphenated("Anglo-\nSaxon"), "Anglo-\nSaxon");
    }

    #[test]
    fn test_split_blocks() {
        let blocks = split_blocks("first line\nsecond line\n\n\nnext para");
        assert_eq!(blocks, vec!["first line second line", "next para"]);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a    b\t\tc "), "a b c");
    }

    #[test]
    fn test_paragraphs_full_pipeline() {
        let input = "Quarterly Report\r\n\r\nRevenue grew in every re-\r\ngion   this\r\nquarter.\r\n\r\n\r\n";
        assert_eq!(
            paragraphs(input),
            vec![
                "Quarterly Report".to_string(),
                "Revenue grew in every region this quarter.".to_string(),
            ]
        );
    }

    fn run(text: &str, left: f32, bottom: f32, size: f32) -> TextRun {
        TextRun {
            text: text.into(),
            left,
            right: left + text.len() as f32 * size * 0.5,
            bottom,
            top: bottom + size,
            size,
        }
    }

    #[test]
    fn test_layout_vertical_gap_starts_paragraph() {
        // 12pt pitch inside a paragraph, 24pt before the next one.
        let runs = vec![
            run("Line one of the first paragraph that runs", 72.0, 700.0, 10.0),
            run("across the page and ends here", 72.0, 688.0, 10.0),
            run("Next paragraph starts after a gap and goes", 72.0, 664.0, 10.0),
            run("on for a second line", 72.0, 652.0, 10.0),
        ];
        assert_eq!(
            paragraphs(&layout_text(&runs)),
            vec![
                "Line one of the first paragraph that runs across the page and ends here",
                "Next paragraph starts after a gap and goes on for a second line",
            ]
        );
    }

    #[test]
    fn test_layout_single_line_breaks_are_not_paragraphs() {
        // Evenly spaced lines with no other cue stay one paragraph, as
        // pdfium's plain text would have given one line per row.
        let runs = vec![
            run("The quick brown fox jumps over the lazy dog and", 72.0, 700.0, 10.0),
            run("keeps running through the field toward the", 72.0, 688.0, 10.0),
            run("river beyond the old stone wall near the farm", 72.0, 676.0, 10.0),
        ];
        assert_eq!(paragraphs(&layout_text(&runs)).len(), 1);
    }

    #[test]
    fn test_layout_heading_and_indent() {
        let runs = vec![
            run("Title", 72.0, 740.0, 18.0),
            run("Line one of para is a long body line of text", 72.0, 716.0, 10.0),
            run("line two", 72.0, 704.0, 10.0),
            run("Next para starts with an indent and continues", 96.0, 692.0, 10.0),
            run("on the following line of the page body text", 72.0, 680.0, 10.0),
        ];
        assert_eq!(
            paragraphs(&layout_text(&runs)),
            vec![
                "Title",
                "Line one of para is a long body line of text line two",
                "Next para starts with an indent and continues on the following line of the page body text",
            ]
        );
    }

    #[test]
    fn test_layout_short_sentence_line_ends_paragraph() {
        let runs = vec![
            run("A paragraph whose last line stops early and has", 72.0, 700.0, 10.0),
            run("ended.", 72.0, 688.0, 10.0),
            run("Another paragraph begins flush left with no gap", 72.0, 676.0, 10.0),
        ];
        assert_eq!(paragraphs(&layout_text(&runs)).len(), 2);
    }

    #[test]
    fn test_layout_joins_runs_on_one_line() {
        let runs = vec![
            run("Bold", 72.0, 700.0, 10.0),
            // Starts right where "Bold" ends: same word, no space.
            run("face", 92.0, 700.0, 10.0),
            // Clear gap: a new word.
            run("text", 130.0, 700.5, 10.0),
        ];
        assert_eq!(layout_text(&runs), "Boldface text");
    }

    #[test]
    fn test_layout_empty_page() {
        assert_eq!(layout_text(&[]), "");
        assert_eq!(layout_text(&[run("   ", 72.0, 700.0, 10.0)]), "");
    }

    #[test]
    fn test_paragraphs_blank_page() {
        assert!(paragraphs(" \r\n \r\n").is_empty());
    }
}
