//! CO2 Billing Calculator - Turns invoice exports into signed CO2 emissions
//!
//! Responsibilities:
//! - Decode semicolon-delimited billing exports (UTF-8 or legacy encoding)
//! - Map raw export columns to the canonical schema
//! - Parse locale-formatted numbers and canonicalize article keys
//! - Split records by invoice date against a configured window
//! - Join records to the CO2 factor reference and compute signed emissions
//!
//! Stages report their outcomes through an [`events::EventSink`] and take
//! their configuration as plain parameters.

pub mod article;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod loader;
pub mod model;
pub mod numeric;
pub mod processor;
pub mod reader;
pub mod schema;

pub use article::normalize_article_key;
pub use config::{FilterConfig, RunConfig};
pub use dates::{partition, DateRange, Partition};
pub use error::{ConfigError, LoadError, PipelineError, SchemaError};
pub use events::{EventSink, PipelineEvent, TracingSink};
pub use loader::{BatchLoader, LoadReport, ReferenceLoad};
pub use model::{BillingRecord, BillingTable, Co2FactorEntry, EmissionTable, JoinedRecord, ReferenceTable};
pub use numeric::parse_number;
pub use processor::{process, JoinStats, ProcessOutcome};
pub use reader::EncodingReader;
