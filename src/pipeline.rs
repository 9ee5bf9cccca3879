use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::document::Document;
use crate::error::ParseError;
use crate::merge::merge;
use crate::parser::{ParseOutput, Parser};
use crate::schema::CanonicalRecord;

const CHUNK_SIZE: usize = 500;

/// Coarse cancellation flag, checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Parsed(ParseOutput),
    Failed { source_id: String, error: ParseError },
    /// Not started before cancellation; retry the whole document.
    Cancelled { source_id: String },
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// `existing` with every parsed record merged in, ordered by key.
    pub records: Vec<CanonicalRecord>,
    pub parsed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub extracted: usize,
    pub diagnostics: usize,
}

pub fn parse_one(parser: &Parser, doc: &Document, cancel: &CancelToken) -> DocumentOutcome {
    if cancel.is_cancelled() {
        return DocumentOutcome::Cancelled {
            source_id: doc.source_id.clone(),
        };
    }
    match parser.parse_document(doc) {
        Ok(out) => DocumentOutcome::Parsed(out),
        Err(error) => DocumentOutcome::Failed {
            source_id: doc.source_id.clone(),
            error,
        },
    }
}

/// Parse documents on a pool of `workers` threads and merge the results into
/// `existing`.
///
/// Documents are independent; results come back in input order and are merged
/// on the calling thread only, one chunk at a time.
pub fn parse_batch(
    parser: &Parser,
    docs: &[Document],
    existing: &[CanonicalRecord],
    workers: usize,
    cancel: &CancelToken,
) -> Result<BatchReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("Failed to build parser thread pool")?;

    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut report = BatchReport {
        records: existing.to_vec(),
        ..Default::default()
    };

    for chunk in docs.chunks(CHUNK_SIZE) {
        let outcomes: Vec<DocumentOutcome> =
            pool.install(|| chunk.par_iter().map(|d| parse_one(parser, d, cancel)).collect());

        let mut batch = Vec::new();
        for outcome in outcomes {
            match outcome {
                DocumentOutcome::Parsed(out) => {
                    report.parsed += 1;
                    report.diagnostics += out.diagnostics.len();
                    report.extracted += out.records.len();
                    batch.extend(out.records.into_iter().map(|r| r.record));
                }
                DocumentOutcome::Failed { source_id, error } => {
                    report.failed += 1;
                    warn!(source = %source_id, "Document failed: {}", error);
                }
                DocumentOutcome::Cancelled { .. } => report.cancelled += 1,
            }
        }

        report.records = merge(&report.records, &batch);
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    info!(
        "Parsed {} documents ({} failed, {} cancelled), {} records extracted",
        report.parsed, report.failed, report.cancelled, report.extracted
    );
    Ok(report)
}
