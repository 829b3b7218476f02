//! Error taxonomy for the ingestion pipeline.
//!
//! File-level problems ([`LoadError`]) are absorbed by the batch loader and
//! end up in the load report. Only [`PipelineError`] reaches the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Required columns could not be resolved for a table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Neither the canonical columns nor the source mapping are fully present
    #[error("missing required columns {missing:?}; found columns {found:?}")]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// No candidate reference mapping matched the header
    #[error("no column mapping matched; attempted {attempted:?}; found columns {found:?}")]
    NoMatchingMapping {
        attempted: Vec<String>,
        found: Vec<String>,
    },
}

/// A single file could not contribute rows. Recoverable at batch level.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every candidate encoding failed
    #[error("could not decode {path} with any of the encodings {attempted:?}")]
    Decode {
        path: PathBuf,
        attempted: Vec<&'static str>,
    },

    #[error("malformed delimited text in {path} near line {line}: {source}")]
    Csv {
        path: PathBuf,
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("schema error in {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("no usable rows in {path}: {rows_read} read, {rows_rejected} rejected")]
    NoUsableRows {
        path: PathBuf,
        rows_read: usize,
        rows_rejected: usize,
    },
}

impl LoadError {
    /// Short machine-readable kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "io",
            LoadError::Decode { .. } => "decode",
            LoadError::Csv { .. } => "csv",
            LoadError::Schema { .. } => "schema",
            LoadError::NoUsableRows { .. } => "no_usable_rows",
        }
    }
}

/// Fatal conditions. The caller must stop and surface these.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no valid data: {reason}")]
    NoValidData { reason: String },

    /// A joined emission factor is not a finite number
    #[error(
        "reference integrity violated at result row {row} (article '{article_key}'): \
         emission_factor '{value}' is not numeric; row content: {content}"
    )]
    ReferenceIntegrity {
        row: usize,
        article_key: String,
        value: String,
        content: String,
    },

    #[error("reference table could not be loaded: {0}")]
    Reference(#[from] LoadError),
}

/// Invalid configuration values supplied by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid ISO-8601 date for '{key}': '{value}'")]
    InvalidDate { key: String, value: String },

    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: String, end: String },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
