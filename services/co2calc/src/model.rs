//! Canonical record types shared by every pipeline stage.
//!
//! Each record carries a fixed set of core fields plus an ordered bag of
//! passthrough columns that are preserved verbatim from the source file.

use chrono::NaiveDate;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::borrow::Cow;

use crate::dates::parse_date;

pub const ARTICLE_KEY: &str = "article_key";
pub const QUANTITY: &str = "quantity";
pub const UNIT_PRICE: &str = "unit_price";
pub const EMISSION_FACTOR: &str = "emission_factor";
pub const EMISSION_CO2: &str = "emission_co2";
pub const SOURCE_FILE: &str = "source_file";

/// Invoice date column of the raw export format.
pub const DATE_INVOICE: &str = "DATE_INVOICE";

/// Ordered, verbatim passthrough columns.
pub type Passthrough = IndexMap<String, String>;

fn format_number(value: f64) -> String {
    value.to_string()
}

// =============================================================================
// Billing side
// =============================================================================

/// One invoice line after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingRecord {
    pub article_key: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub source_file: String,
    pub extra: Passthrough,
}

impl BillingRecord {
    pub fn new(article_key: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        Self {
            article_key: article_key.into(),
            quantity,
            unit_price,
            source_file: String::new(),
            extra: Passthrough::new(),
        }
    }

    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(column.into(), value.into());
        self
    }

    pub fn with_source(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = source_file.into();
        self
    }

    /// Text value of any column, core or passthrough.
    pub fn field(&self, column: &str) -> Option<Cow<'_, str>> {
        match column {
            ARTICLE_KEY => Some(Cow::Borrowed(self.article_key.as_str())),
            QUANTITY => Some(Cow::Owned(format_number(self.quantity))),
            UNIT_PRICE => Some(Cow::Owned(format_number(self.unit_price))),
            SOURCE_FILE => Some(Cow::Borrowed(self.source_file.as_str())),
            other => self.extra.get(other).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    /// Invoice date parsed day-first from the `DATE_INVOICE` column, if any.
    pub fn invoice_date(&self) -> Option<NaiveDate> {
        self.extra.get(DATE_INVOICE).and_then(|raw| parse_date(raw))
    }

    /// -1 for a return (negative unit price), +1 otherwise.
    pub fn price_sign(&self) -> f64 {
        if self.unit_price < 0.0 {
            -1.0
        } else {
            1.0
        }
    }
}

/// Collect passthrough column names in first-seen order.
fn union_columns<'a, I>(bags: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Passthrough>,
{
    let mut seen: IndexSet<String> = IndexSet::new();
    for bag in bags {
        for key in bag.keys() {
            if !seen.contains(key) {
                seen.insert(key.clone());
            }
        }
    }
    seen.into_iter().collect()
}

/// A set of billing records with a known passthrough column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BillingTable {
    pub extra_columns: Vec<String>,
    pub records: Vec<BillingRecord>,
}

impl BillingTable {
    pub fn new(extra_columns: Vec<String>, records: Vec<BillingRecord>) -> Self {
        Self {
            extra_columns,
            records,
        }
    }

    /// Build a table whose passthrough columns are the union of the records' bags.
    pub fn from_records(records: Vec<BillingRecord>) -> Self {
        let extra_columns = union_columns(records.iter().map(|r| &r.extra));
        Self {
            extra_columns,
            records,
        }
    }

    /// Empty table sharing this table's column layout.
    pub fn empty_like(&self) -> Self {
        Self {
            extra_columns: self.extra_columns.clone(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        matches!(column, ARTICLE_KEY | QUANTITY | UNIT_PRICE | SOURCE_FILE)
            || self.extra_columns.iter().any(|c| c == column)
    }

    /// Full column order used for export.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            ARTICLE_KEY.to_string(),
            QUANTITY.to_string(),
            UNIT_PRICE.to_string(),
        ];
        columns.extend(self.extra_columns.iter().cloned());
        columns.push(SOURCE_FILE.to_string());
        columns
    }

    /// Append another table, merging column layouts.
    pub fn append(&mut self, other: BillingTable) {
        for column in other.extra_columns {
            if !self.extra_columns.contains(&column) {
                self.extra_columns.push(column);
            }
        }
        self.records.extend(other.records);
    }

    /// Rows as text, aligned with [`BillingTable::columns`].
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let columns = self.columns();
        self.records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.field(c).map(Cow::into_owned).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

// =============================================================================
// Reference side
// =============================================================================

/// One row of the CO2 emission-factor reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Co2FactorEntry {
    pub article_key: String,
    /// `None` only for tables built outside the reference loader.
    pub emission_factor: Option<f64>,
    pub extra: Passthrough,
}

impl Co2FactorEntry {
    pub fn new(article_key: impl Into<String>, emission_factor: f64) -> Self {
        Self {
            article_key: article_key.into(),
            emission_factor: Some(emission_factor),
            extra: Passthrough::new(),
        }
    }

    pub fn with_extra(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(column.into(), value.into());
        self
    }
}

/// The reference table handed to the emission processor. Never mutated by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceTable {
    pub has_factor_column: bool,
    pub extra_columns: Vec<String>,
    pub entries: Vec<Co2FactorEntry>,
}

impl ReferenceTable {
    pub fn new(entries: Vec<Co2FactorEntry>) -> Self {
        Self {
            has_factor_column: true,
            extra_columns: union_columns(entries.iter().map(|e| &e.extra)),
            entries,
        }
    }

    /// A reference that carries keys and passthrough columns but no factors.
    pub fn without_factor_column(mut entries: Vec<Co2FactorEntry>) -> Self {
        for entry in &mut entries {
            entry.emission_factor = None;
        }
        Self {
            has_factor_column: false,
            extra_columns: union_columns(entries.iter().map(|e| &e.extra)),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Joined output
// =============================================================================

/// A billing record enriched with its emission factor and signed emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRecord {
    pub billing: BillingRecord,
    pub reference_extra: Passthrough,
    pub emission_factor: f64,
    pub emission_co2: f64,
}

impl JoinedRecord {
    pub fn field(&self, column: &str) -> Option<Cow<'_, str>> {
        match column {
            EMISSION_FACTOR => Some(Cow::Owned(format_number(self.emission_factor))),
            EMISSION_CO2 => Some(Cow::Owned(format_number(self.emission_co2))),
            other => self
                .reference_extra
                .get(other)
                .map(|v| Cow::Borrowed(v.as_str()))
                .or_else(|| self.billing.field(other)),
        }
    }

    /// The record as it reads back after an export/import round trip:
    /// reference and computed columns become passthrough columns.
    pub fn to_billing_record(&self) -> BillingRecord {
        let mut record = self.billing.clone();
        for (column, value) in &self.reference_extra {
            record.extra.insert(column.clone(), value.clone());
        }
        record
            .extra
            .insert(EMISSION_FACTOR.to_string(), format_number(self.emission_factor));
        record
            .extra
            .insert(EMISSION_CO2.to_string(), format_number(self.emission_co2));
        record
    }
}

/// Output of the emission processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmissionTable {
    pub billing_columns: Vec<String>,
    pub reference_columns: Vec<String>,
    pub records: Vec<JoinedRecord>,
}

impl EmissionTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            ARTICLE_KEY.to_string(),
            QUANTITY.to_string(),
            UNIT_PRICE.to_string(),
        ];
        columns.extend(
            self.billing_columns
                .iter()
                .filter(|c| !self.reference_columns.contains(c))
                .cloned(),
        );
        columns.push(SOURCE_FILE.to_string());
        columns.extend(self.reference_columns.iter().cloned());
        columns.push(EMISSION_FACTOR.to_string());
        columns.push(EMISSION_CO2.to_string());
        columns
    }

    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let columns = self.columns();
        self.records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.field(c).map(Cow::into_owned).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Flatten back into a billing table, as if exported and re-imported.
    pub fn to_billing_table(&self) -> BillingTable {
        let mut extra_columns: Vec<String> = self
            .billing_columns
            .iter()
            .filter(|c| !self.reference_columns.contains(c))
            .cloned()
            .collect();
        extra_columns.extend(self.reference_columns.iter().cloned());
        extra_columns.push(EMISSION_FACTOR.to_string());
        extra_columns.push(EMISSION_CO2.to_string());
        BillingTable::new(
            extra_columns,
            self.records.iter().map(JoinedRecord::to_billing_record).collect(),
        )
    }

    pub fn total_emission_co2(&self) -> f64 {
        self.records.iter().map(|r| r.emission_co2).sum()
    }
}

// =============================================================================
// Row-level provenance
// =============================================================================

/// Why a single row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Numeric field could not be parsed
    Unparsable,
    /// Key field empty
    MissingKey,
}

/// A dropped row with enough context to explain the exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRejection {
    pub file: String,
    /// 1-based line in the source file, header on line 1
    pub line: usize,
    pub column: String,
    pub raw_value: String,
    pub reason: RejectReason,
}
