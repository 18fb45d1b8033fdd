//! PDF analysis report.
//!
//! Lists the detected key, chords per bar and melody notes of a job on A4
//! pages. The document is rendered in memory and then written next to the
//! stems, so it ships inside the archive as well.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use tracing::debug;

use super::traits::{ReportContent, ReportWriter, StageResult};
use crate::error::StageError;

/// File name of the rendered report.
pub const REPORT_FILE: &str = "analysis.pdf";

const TITLE: &str = "Chord & Melody Analysis";

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_MM: f32 = 20.0;
const LINE_HEIGHT_MM: f32 = 7.0;

const TITLE_SIZE: f32 = 18.0;
const HEADING_SIZE: f32 = 13.0;
const BODY_SIZE: f32 = 11.0;

const CHORDS_PER_LINE: usize = 4;
const NOTES_PER_LINE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Title,
    Heading,
    Body,
}

/// One laid-out line of the report. An empty text is a blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    style: Style,
    text: String,
}

impl Line {
    fn new(style: Style, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(Style::Body, "")
    }
}

/// Renders reports with the PDF base fonts, so no font files are needed.
#[derive(Debug, Clone, Default)]
pub struct PdfReportWriter;

impl PdfReportWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReportWriter for PdfReportWriter {
    async fn write_report(
        &self,
        content: ReportContent<'_>,
        dest_dir: &Path,
    ) -> StageResult<PathBuf> {
        let bytes = render(&report_lines(&content))?;
        let output = dest_dir.join(REPORT_FILE);

        tokio::fs::write(&output, &bytes).await.map_err(|e| {
            StageError::Io(format!("failed to write {}: {}", output.display(), e))
        })?;

        debug!(path = %output.display(), size = bytes.len(), "Analysis report written");
        Ok(output)
    }
}

fn report_lines(content: &ReportContent<'_>) -> Vec<Line> {
    let mut lines = vec![
        Line::new(Style::Title, TITLE),
        Line::blank(),
        Line::new(Style::Body, format!("Key: {}", content.key)),
        Line::blank(),
        Line::new(Style::Heading, "Chords"),
    ];

    match content.chords {
        Some(chords) if !chords.is_empty() => {
            lines.extend(chords.chunks(CHORDS_PER_LINE).map(|row| {
                let cells: Vec<String> = row
                    .iter()
                    .map(|entry| format!("Bar {}: {}", entry.bar, entry.chord))
                    .collect();
                Line::new(Style::Body, cells.join("    "))
            }));
        }
        _ => lines.push(Line::new(Style::Body, "Not available")),
    }

    lines.push(Line::blank());
    lines.push(Line::new(Style::Heading, "Melody"));

    match content.melody {
        Some(notes) if !notes.is_empty() => {
            lines.extend(
                notes
                    .chunks(NOTES_PER_LINE)
                    .map(|row| Line::new(Style::Body, row.join(" "))),
            );
        }
        _ => lines.push(Line::new(Style::Body, "Not available")),
    }

    lines
}

fn render(lines: &[Line]) -> StageResult<Vec<u8>> {
    let mut pages = Pages::new()?;
    for line in lines {
        pages.write_line(line);
    }
    pages.finish()
}

/// Cursor over the pages of a document being rendered.
struct Pages {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
}

impl Pages {
    fn new() -> StageResult<Self> {
        let (doc, page, layer) = PdfDocument::new(TITLE, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(pdf_error)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(pdf_error)?;
        let layer = doc.get_page(page).get_layer(layer);

        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_HEIGHT.0 - MARGIN_MM,
        })
    }

    fn write_line(&mut self, line: &Line) {
        if self.y < MARGIN_MM {
            let (page, layer) = self.doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT.0 - MARGIN_MM;
        }

        if !line.text.is_empty() {
            let (font, size) = match line.style {
                Style::Title => (&self.bold, TITLE_SIZE),
                Style::Heading => (&self.bold, HEADING_SIZE),
                Style::Body => (&self.regular, BODY_SIZE),
            };
            self.layer
                .use_text(line.text.as_str(), size, Mm(MARGIN_MM), Mm(self.y), font);
        }

        self.y -= match line.style {
            Style::Title => LINE_HEIGHT_MM * 1.5,
            _ => LINE_HEIGHT_MM,
        };
    }

    fn finish(self) -> StageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        {
            let mut writer = BufWriter::new(&mut bytes);
            self.doc.save(&mut writer).map_err(pdf_error)?;
            writer
                .flush()
                .map_err(|e| StageError::Io(format!("failed to render report: {}", e)))?;
        }
        Ok(bytes)
    }
}

fn pdf_error(err: impl std::fmt::Debug) -> StageError {
    StageError::Io(format!("failed to render report: {:?}", err))
}
