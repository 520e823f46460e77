//! CLI output formatting for thumbnail batches.
//!
//! # Information-First Display
//!
//! Each input leads with its positional index and file name; what was done
//! to it follows as indented context lines. Formatting functions return
//! lines instead of printing so they can be tested directly.
//!
//! # Output Format
//!
//! ```text
//! 001 IMG_0042.JPG → photos/tn_IMG_0042.jpg
//!     jpegload 4000x3000 → 800x600
//!     Shrink: load 4, block 1, residual 0.8
//!     Rotated: 90°
//! 002 notes.txt
//!     Failed at probe (unsupported format): ...
//!
//! 1 thumbnail written, 1 failed
//! ```
//!
//! `--json` replaces all of the above with one [`BatchReport`] document.

use crate::thumbnail::{ErrorKind, PipelineError, ThumbnailOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lines for one successful thumbnail.
pub fn format_outcome(index: usize, outcome: &ThumbnailOutcome) -> Vec<String> {
    let (sw, sh) = outcome.source_dimensions;
    let (ow, oh) = outcome.output_dimensions;
    let mut lines = vec![
        format!(
            "{} {} → {}",
            format_index(index),
            file_name(&outcome.source),
            outcome.destination.display()
        ),
        format!("{}{} {sw}x{sh} → {ow}x{oh}", indent(1), outcome.loader),
        format!(
            "{}Shrink: load {}, block {}, residual {}",
            indent(1),
            outcome.decode_shrink,
            outcome.integer_shrink,
            format_scale(outcome.residual_scale)
        ),
    ];
    if outcome.rotation != 0 {
        lines.push(format!("{}Rotated: {}°", indent(1), outcome.rotation));
    }
    lines
}

/// Lines for one failed input.
pub fn format_failure(index: usize, error: &PipelineError) -> Vec<String> {
    vec![
        format!("{} {}", format_index(index), file_name(&error.path)),
        format!(
            "{}Failed at {} ({}): {}",
            indent(1),
            error.stage,
            error.kind,
            error.source
        ),
    ]
}

/// Residual scales print with at most four decimals and no trailing zeros.
fn format_scale(scale: f64) -> String {
    let text = format!("{scale:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn format_summary(written: usize, failed: usize) -> String {
    let noun = if written == 1 { "thumbnail" } else { "thumbnails" };
    if failed == 0 {
        format!("{written} {noun} written")
    } else {
        format!("{written} {noun} written, {failed} failed")
    }
}

/// Every line of a batch, in input order, followed by the summary.
pub fn format_batch(results: &[Result<ThumbnailOutcome, PipelineError>]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(outcome) => lines.extend(format_outcome(i + 1, outcome)),
            Err(error) => lines.extend(format_failure(i + 1, error)),
        }
    }
    let failed = results.iter().filter(|r| r.is_err()).count();
    lines.push(String::new());
    lines.push(format_summary(results.len() - failed, failed));
    lines
}

pub fn print_batch(results: &[Result<ThumbnailOutcome, PipelineError>]) {
    for line in format_batch(results) {
        println!("{}", line);
    }
}

#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub source: PathBuf,
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

/// Machine-readable batch result for `--json`.
#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub thumbnails: Vec<&'a ThumbnailOutcome>,
    pub failures: Vec<FailureReport>,
}

impl<'a> BatchReport<'a> {
    pub fn new(results: &'a [Result<ThumbnailOutcome, PipelineError>]) -> Self {
        let mut thumbnails = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(outcome) => thumbnails.push(outcome),
                Err(error) => failures.push(FailureReport {
                    source: error.path.clone(),
                    kind: error.kind,
                    stage: error.stage.to_string(),
                    message: error.source.to_string(),
                }),
            }
        }
        Self {
            thumbnails,
            failures,
        }
    }
}
