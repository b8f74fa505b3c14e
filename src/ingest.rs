//! Bulk ingestion from the command line.
//!
//! Files are ingested as given; directories are walked recursively in
//! sorted order. Files that are neither PDF nor CSV are reported and
//! skipped, and a file that fails to ingest does not stop the run.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::FileType;
use crate::rag::DocumentAssistant;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestSummary {
    pub files: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
}

/// Expand `paths` into the list of files to consider.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

pub async fn run_ingest(assistant: &DocumentAssistant, paths: &[PathBuf]) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for file in collect_files(paths)? {
        if FileType::from_filename(&file.to_string_lossy()).is_err() {
            println!("[skip] {}: not a PDF or CSV", file.display());
            summary.skipped += 1;
            continue;
        }
        match ingest_one(assistant, &file).await {
            Ok(n) => {
                println!("[ok] {}: {} chunks", file.display(), n);
                summary.files += 1;
                summary.chunks += n;
            }
            Err(e) => {
                eprintln!("[error] {}: {:#}", file.display(), e);
                summary.failed += 1;
            }
        }
    }

    println!("---");
    println!("Total chunks ingested: {}", summary.chunks);
    if summary.failed > 0 {
        println!("Files failed: {}", summary.failed);
    }
    Ok(summary)
}

async fn ingest_one(assistant: &DocumentAssistant, file: &Path) -> Result<usize> {
    Ok(assistant.ingest_path(file).await?.chunks)
}
