//! Text extraction for uploaded documents (PDF, CSV).
//!
//! Extraction is the first pipeline stage: callers supply bytes plus the
//! original file name; this module returns plain UTF-8 text fragments with
//! provenance. Nothing is persisted here.

use std::fmt;
use std::path::Path;

use crate::error::AssistantError;
use crate::models::{Chunk, ChunkMetadata};

/// Document kinds accepted for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Csv,
}

impl FileType {
    /// Classify by extension (case-insensitive).
    pub fn from_filename(name: &str) -> Result<Self, AssistantError> {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Ok(FileType::Pdf),
            Some("csv") => Ok(FileType::Csv),
            _ => Err(AssistantError::UnsupportedFormat(name.to_string())),
        }
    }

    /// Dotted suffix reported back to upload callers.
    pub fn suffix(&self) -> &'static str {
        match self {
            FileType::Pdf => ".pdf",
            FileType::Csv => ".csv",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Text of one PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// Zero-based page index.
    pub page: i64,
    pub text: String,
}

/// Extract text page by page. Pages without text are kept so page
/// indices stay aligned with the document.
pub fn load_pdf(bytes: &[u8]) -> Result<Vec<PageText>, AssistantError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| AssistantError::Extraction(format!("PDF: {}", e)))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page: i as i64,
            text,
        })
        .collect())
}

/// One chunk per CSV data row, never split.
///
/// Each row is rendered as `header: value` lines in column order so the
/// column names travel with the values into the embedding.
pub fn load_csv(bytes: &[u8], source: &str) -> Result<Vec<Chunk>, AssistantError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AssistantError::Extraction(format!("CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut chunks = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| AssistantError::Extraction(format!("CSV row {}: {}", row, e)))?;

        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h, v.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        chunks.push(Chunk::new(
            text,
            ChunkMetadata {
                source: source.to_string(),
                page: None,
                row: Some(row as i64),
            },
        ));
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_by_extension() {
        assert_eq!(FileType::from_filename("manual.pdf").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_filename("MANUAL.PDF").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_filename("history.csv").unwrap(), FileType::Csv);
        assert_eq!(FileType::Csv.to_string(), ".csv");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        for name in ["notes.docx", "README", "archive.pdf.zip", "csv"] {
            let err = FileType::from_filename(name).unwrap_err();
            assert!(matches!(err, AssistantError::UnsupportedFormat(_)), "{}", name);
        }
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = load_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, AssistantError::Extraction(_)));
    }

    #[test]
    fn csv_one_chunk_per_row() {
        let data = b"equipment_id,temperature,vibration\nHVAC-01,72,0.21\nCHILLER-02,45,0.15\n";
        let chunks = load_csv(data, "readings.csv").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].text,
            "equipment_id: HVAC-01\ntemperature: 72\nvibration: 0.21"
        );
        assert_eq!(chunks[1].metadata.row, Some(1));
        assert_eq!(chunks[1].metadata.page, None);
        assert_eq!(chunks[1].metadata.source, "readings.csv");
    }

    #[test]
    fn csv_long_row_is_not_split() {
        let long = "y".repeat(5000);
        let data = format!("note\n{}\n", long);
        let chunks = load_csv(data.as_bytes(), "notes.csv").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), "note: ".len() + 5000);
    }

    #[test]
    fn csv_header_only_yields_nothing() {
        let chunks = load_csv(b"a,b,c\n", "empty.csv").unwrap();
        assert!(chunks.is_empty());
    }
}
