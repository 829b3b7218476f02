//! Batch loading of billing exports and of the CO2 reference table.
//!
//! Responsibilities:
//! - Decode each file with encoding fallback
//! - Resolve its column layout (raw export or canonical)
//! - Canonicalize article keys and parse numeric fields
//! - Drop unusable rows with full provenance, never the whole batch
//! - Report every included and excluded file
//!
//! A failure in one file only excludes that file. The batch fails only when
//! no file contributed a single usable row.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::article::normalize_article_key;
use crate::error::{LoadError, PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::model::{
    BillingRecord, BillingTable, Co2FactorEntry, Passthrough, ReferenceTable, RejectReason,
    RowRejection,
};
use crate::numeric::parse_number;
use crate::reader::{EncodingReader, RawRow, RawTable};
use crate::schema::{resolve_billing, resolve_reference};

/// A file that could not contribute rows, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedFile {
    pub file: String,
    pub kind: String,
    pub reason: String,
}

/// Per-file statistics for an included file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file: String,
    pub encoding: String,
    pub shape: String,
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_rejected: usize,
}

/// Outcome of one batch load. Built once, never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub included_files: Vec<String>,
    pub excluded_files: Vec<ExcludedFile>,
    pub included_count: usize,
    pub excluded_count: usize,
    pub files: Vec<FileSummary>,
    pub rejected_rows: Vec<RowRejection>,
}

impl LoadReport {
    pub fn total_files(&self) -> usize {
        self.included_count + self.excluded_count
    }

    pub fn rows_kept(&self) -> usize {
        self.files.iter().map(|f| f.rows_kept).sum()
    }
}

/// Result of loading the reference table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLoad {
    pub table: ReferenceTable,
    pub rejected_rows: Vec<RowRejection>,
}

/// Rows of a single billing file that survived cleaning.
struct FileLoad {
    table: BillingTable,
    summary: FileSummary,
    rejected_rows: Vec<RowRejection>,
}

#[derive(Debug, Clone)]
pub struct BatchLoader {
    reader: EncodingReader,
    parallel: bool,
}

impl Default for BatchLoader {
    fn default() -> Self {
        Self {
            reader: EncodingReader::default(),
            parallel: true,
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn reject(file: &str, row: &RawRow, raw: &RawTable, idx: usize, reason: RejectReason) -> RowRejection {
    RowRejection {
        file: file.to_string(),
        line: row.line,
        column: raw.headers[idx].clone(),
        raw_value: row.fields[idx].clone(),
        reason,
    }
}

fn passthrough(row: &RawRow, columns: &[(usize, String)]) -> Passthrough {
    columns
        .iter()
        .map(|(idx, name)| (name.clone(), row.fields[*idx].clone()))
        .collect()
}

impl BatchLoader {
    pub fn new(reader: EncodingReader) -> Self {
        Self {
            reader,
            parallel: true,
        }
    }

    /// Load files one after another instead of on the rayon pool.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Load every billing file into one combined table.
    ///
    /// Files are reported and concatenated in the order given, whether or
    /// not they were processed in parallel.
    pub fn load<P>(
        &self,
        paths: &[P],
        events: &mut dyn EventSink,
    ) -> Result<(BillingTable, LoadReport)>
    where
        P: AsRef<Path> + Sync,
    {
        if paths.is_empty() {
            return Err(PipelineError::NoValidData {
                reason: "no billing files supplied".to_string(),
            });
        }

        let outcomes: Vec<(std::result::Result<FileLoad, LoadError>, Vec<PipelineEvent>)> =
            if self.parallel {
                paths.par_iter().map(|p| self.load_file(p.as_ref())).collect()
            } else {
                paths.iter().map(|p| self.load_file(p.as_ref())).collect()
            };

        let mut combined = BillingTable::default();
        let mut report = LoadReport::default();

        for (path, (outcome, file_events)) in paths.iter().zip(outcomes) {
            for event in file_events {
                events.record(event);
            }
            let file = display(path.as_ref());
            match outcome {
                Ok(load) => {
                    events.record(PipelineEvent::FileIncluded {
                        file: file.clone(),
                        rows_kept: load.summary.rows_kept,
                        rows_rejected: load.summary.rows_rejected,
                    });
                    combined.append(load.table);
                    report.included_files.push(file);
                    report.files.push(load.summary);
                    report.rejected_rows.extend(load.rejected_rows);
                }
                Err(err) => {
                    let excluded = ExcludedFile {
                        file,
                        kind: err.kind().to_string(),
                        reason: err.to_string(),
                    };
                    events.record(PipelineEvent::FileExcluded {
                        file: excluded.file.clone(),
                        kind: excluded.kind.clone(),
                        reason: excluded.reason.clone(),
                    });
                    report.excluded_files.push(excluded);
                }
            }
        }

        report.included_count = report.included_files.len();
        report.excluded_count = report.excluded_files.len();

        if report.included_files.is_empty() {
            let reasons: Vec<String> = report
                .excluded_files
                .iter()
                .map(|e| e.reason.clone())
                .collect();
            return Err(PipelineError::NoValidData {
                reason: format!(
                    "all {} billing files were excluded: {}",
                    report.excluded_count,
                    reasons.join("; ")
                ),
            });
        }

        Ok((combined, report))
    }

    /// Read, map and clean a single billing file.
    fn load_file(
        &self,
        path: &Path,
    ) -> (std::result::Result<FileLoad, LoadError>, Vec<PipelineEvent>) {
        let mut events: Vec<PipelineEvent> = Vec::new();
        let outcome = self.try_load_file(path, &mut events);
        (outcome, events)
    }

    fn try_load_file(
        &self,
        path: &Path,
        events: &mut Vec<PipelineEvent>,
    ) -> std::result::Result<FileLoad, LoadError> {
        let file = display(path);
        let raw = self.reader.read(path)?;
        self.note_encoding(&raw, events);

        let layout = resolve_billing(&raw.headers).map_err(|source| LoadError::Schema {
            path: path.to_path_buf(),
            source,
        })?;
        events.push(PipelineEvent::SchemaResolved {
            file: file.clone(),
            mapping: layout.shape.as_str().to_string(),
        });

        let mut records = Vec::with_capacity(raw.rows.len());
        let mut rejected_rows = Vec::new();
        let mut rows_rejected = 0usize;

        for row in &raw.rows {
            let mut row_rejections = Vec::new();

            let article_key = normalize_article_key(&row.fields[layout.article_key]);
            if article_key.is_empty() {
                row_rejections.push(reject(&file, row, &raw, layout.article_key, RejectReason::MissingKey));
            }
            let quantity = parse_number(&row.fields[layout.quantity]);
            if quantity.is_none() {
                row_rejections.push(reject(&file, row, &raw, layout.quantity, RejectReason::Unparsable));
            }
            let unit_price = parse_number(&row.fields[layout.unit_price]);
            if unit_price.is_none() {
                row_rejections.push(reject(&file, row, &raw, layout.unit_price, RejectReason::Unparsable));
            }

            match (quantity, unit_price) {
                (Some(quantity), Some(unit_price)) if row_rejections.is_empty() => {
                    records.push(BillingRecord {
                        article_key,
                        quantity,
                        unit_price,
                        source_file: file.clone(),
                        extra: passthrough(row, &layout.passthrough),
                    });
                }
                _ => {
                    rows_rejected += 1;
                    for rejection in row_rejections {
                        events.push(PipelineEvent::RowRejected(rejection.clone()));
                        rejected_rows.push(rejection);
                    }
                }
            }
        }

        if records.is_empty() {
            return Err(LoadError::NoUsableRows {
                path: path.to_path_buf(),
                rows_read: raw.rows.len(),
                rows_rejected,
            });
        }

        let summary = FileSummary {
            file,
            encoding: raw.encoding.to_string(),
            shape: layout.shape.as_str().to_string(),
            rows_read: raw.rows.len(),
            rows_kept: records.len(),
            rows_rejected,
        };
        let extra_columns = layout.passthrough.into_iter().map(|(_, name)| name).collect();

        Ok(FileLoad {
            table: BillingTable::new(extra_columns, records),
            summary,
            rejected_rows,
        })
    }

    fn note_encoding(&self, raw: &RawTable, events: &mut Vec<PipelineEvent>) {
        if self.reader.primary_encoding() != Some(raw.encoding) {
            events.push(PipelineEvent::EncodingFallback {
                file: display(&raw.path),
                encoding: raw.encoding.to_string(),
            });
        }
    }

    /// Load the CO2 emission-factor reference table.
    ///
    /// Rows missing a key or a parsable factor are dropped and reported.
    /// Negative factors are kept but flagged.
    pub fn load_reference(
        &self,
        path: &Path,
        events: &mut dyn EventSink,
    ) -> Result<ReferenceLoad> {
        let file = display(path);
        let mut file_events = Vec::new();
        let raw = self.reader.read(path)?;
        self.note_encoding(&raw, &mut file_events);

        let layout = resolve_reference(&raw.headers).map_err(|source| LoadError::Schema {
            path: path.to_path_buf(),
            source,
        })?;
        file_events.push(PipelineEvent::SchemaResolved {
            file: file.clone(),
            mapping: layout.mapping.clone(),
        });

        let mut entries = Vec::with_capacity(raw.rows.len());
        let mut rejected_rows = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut duplicate_keys = 0usize;
        let mut negative_factors = 0usize;

        for row in &raw.rows {
            let article_key = normalize_article_key(&row.fields[layout.article_key]);
            if article_key.is_empty() {
                rejected_rows.push(reject(&file, row, &raw, layout.article_key, RejectReason::MissingKey));
                continue;
            }
            let Some(emission_factor) = parse_number(&row.fields[layout.emission_factor]) else {
                rejected_rows.push(reject(&file, row, &raw, layout.emission_factor, RejectReason::Unparsable));
                continue;
            };

            if emission_factor < 0.0 {
                negative_factors += 1;
            }
            if !seen_keys.insert(article_key.clone()) {
                duplicate_keys += 1;
            }
            entries.push(Co2FactorEntry {
                article_key,
                emission_factor: Some(emission_factor),
                extra: passthrough(row, &layout.passthrough),
            });
        }

        for rejection in &rejected_rows {
            file_events.push(PipelineEvent::RowRejected(rejection.clone()));
        }
        for event in file_events {
            events.record(event);
        }

        if entries.is_empty() {
            return Err(PipelineError::NoValidData {
                reason: format!("no valid CO2 reference entries in {file}"),
            });
        }

        events.record(PipelineEvent::ReferenceLoaded {
            file,
            entries: entries.len(),
            rows_rejected: rejected_rows.len(),
            duplicate_keys,
            negative_factors,
        });

        let extra_columns = layout.passthrough.into_iter().map(|(_, name)| name).collect();
        Ok(ReferenceLoad {
            table: ReferenceTable {
                has_factor_column: true,
                extra_columns,
                entries,
            },
            rejected_rows,
        })
    }
}
