//! Emission processor: left join of billing records against the CO2
//! reference, then signed emission computation.
//!
//! `emission_co2 = quantity * emission_factor * sign(unit_price)`. A negative
//! unit price marks a return, so its contribution is inverted. The sign of
//! the quantity is carried through as is.

use serde::Serialize;
use std::collections::HashMap;

use crate::article::normalize_article_key;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::model::{
    BillingRecord, BillingTable, Co2FactorEntry, EmissionTable, JoinedRecord, Passthrough,
    ReferenceTable, EMISSION_CO2, EMISSION_FACTOR,
};

/// Counters describing one join.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinStats {
    pub billing_rows: usize,
    pub reference_entries: usize,
    pub factor_column_present: bool,
    /// Billing rows with at least one reference entry carrying a factor
    pub matched_rows: usize,
    pub unmatched_rows: usize,
    /// Unmatched rows removed because `filter_missing` was set
    pub dropped_rows: usize,
    pub output_rows: usize,
    pub total_emission_co2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub table: EmissionTable,
    pub stats: JoinStats,
}

/// Appended to a reference column whose name is already used by a billing
/// passthrough column, so both values survive the join.
pub const REFERENCE_SUFFIX: &str = "_ref";

/// Output name of every reference passthrough column, plus the billing
/// columns left over from an earlier run that must not be stacked.
struct ColumnPlan {
    /// (reference column, output column)
    reference: Vec<(String, String)>,
    stale: Vec<String>,
}

impl ColumnPlan {
    /// A billing table carrying `emission_factor` is the output of a previous
    /// run: its computed columns and the reference columns it received are
    /// dropped before joining again. Otherwise every billing column is kept
    /// and colliding reference columns get [`REFERENCE_SUFFIX`].
    fn new(billing: &BillingTable, reference: &ReferenceTable) -> Self {
        let reprocessing = billing.has_column(EMISSION_FACTOR);
        let mut stale = Vec::new();
        if reprocessing {
            stale.push(EMISSION_FACTOR.to_string());
            stale.push(EMISSION_CO2.to_string());
        }

        let has_extra = |column: &str| billing.extra_columns.iter().any(|c| c == column);
        let plan = reference
            .extra_columns
            .iter()
            .map(|column| {
                let suffixed = format!("{column}{REFERENCE_SUFFIX}");
                let output = if reprocessing && has_extra(&suffixed) {
                    stale.push(suffixed.clone());
                    suffixed
                } else if reprocessing && has_extra(column) {
                    stale.push(column.clone());
                    column.clone()
                } else if billing.has_column(column) {
                    suffixed
                } else {
                    column.clone()
                };
                (column.clone(), output)
            })
            .collect();

        Self {
            reference: plan,
            stale,
        }
    }

    fn is_stale(&self, column: &str) -> bool {
        self.stale.iter().any(|c| c == column)
    }

    fn output_columns(&self) -> Vec<String> {
        self.reference.iter().map(|(_, output)| output.clone()).collect()
    }

    fn rename(&self, extra: &Passthrough) -> Passthrough {
        extra
            .iter()
            .map(|(column, value)| {
                let output = self
                    .reference
                    .iter()
                    .find(|(source, _)| source == column)
                    .map_or_else(|| column.clone(), |(_, output)| output.clone());
                (output, value.clone())
            })
            .collect()
    }

    /// Billing columns and records with stale columns removed.
    fn clean_billing(&self, billing: &BillingTable) -> (Vec<String>, Vec<BillingRecord>) {
        let columns = billing
            .extra_columns
            .iter()
            .filter(|c| !self.is_stale(c.as_str()))
            .cloned()
            .collect();
        let records = billing
            .records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                record.extra.retain(|column, _| !self.is_stale(column.as_str()));
                record.article_key = normalize_article_key(&record.article_key);
                record
            })
            .collect();
        (columns, records)
    }
}

fn index_reference(reference: &ReferenceTable) -> HashMap<String, Vec<&Co2FactorEntry>> {
    let mut index: HashMap<String, Vec<&Co2FactorEntry>> = HashMap::new();
    for entry in &reference.entries {
        index
            .entry(normalize_article_key(&entry.article_key))
            .or_default()
            .push(entry);
    }
    index
}

fn describe_row(billing: &BillingRecord, reference_extra: &Passthrough, factor: f64) -> String {
    let mut parts = vec![
        format!("article_key={}", billing.article_key),
        format!("quantity={}", billing.quantity),
        format!("unit_price={}", billing.unit_price),
    ];
    parts.extend(billing.extra.iter().map(|(k, v)| format!("{k}={v}")));
    parts.push(format!("source_file={}", billing.source_file));
    parts.extend(reference_extra.iter().map(|(k, v)| format!("{k}={v}")));
    parts.push(format!("{EMISSION_FACTOR}={factor}"));
    format!("{{{}}}", parts.join(", "))
}

/// Join `billing` against `reference` and compute signed emissions.
///
/// Neither input is mutated. When the reference has no factor column every
/// row gets factor 0 and nothing is dropped. Otherwise unmatched rows are
/// dropped if `filter_missing` is set, or kept with factor 0.
pub fn process(
    billing: &BillingTable,
    reference: &ReferenceTable,
    filter_missing: bool,
    events: &mut dyn EventSink,
) -> Result<ProcessOutcome> {
    let plan = ColumnPlan::new(billing, reference);
    let (billing_columns, records) = plan.clean_billing(billing);
    let index = index_reference(reference);

    let mut stats = JoinStats {
        billing_rows: records.len(),
        reference_entries: reference.len(),
        factor_column_present: reference.has_factor_column,
        ..JoinStats::default()
    };
    let mut joined = Vec::with_capacity(records.len());

    for record in records {
        let matches: Vec<&Co2FactorEntry> = index
            .get(&record.article_key)
            .map(|entries| {
                entries
                    .iter()
                    .copied()
                    .filter(|e| !reference.has_factor_column || e.emission_factor.is_some())
                    .collect()
            })
            .unwrap_or_default();

        if matches.is_empty() {
            stats.unmatched_rows += 1;
            if reference.has_factor_column && filter_missing {
                stats.dropped_rows += 1;
                continue;
            }
            joined.push((record, Passthrough::new(), 0.0));
            continue;
        }

        stats.matched_rows += 1;
        for entry in matches {
            let factor = if reference.has_factor_column {
                entry.emission_factor.unwrap_or(0.0)
            } else {
                0.0
            };
            joined.push((record.clone(), plan.rename(&entry.extra), factor));
        }
    }

    let mut output = Vec::with_capacity(joined.len());
    for (row, (billing, reference_extra, factor)) in joined.into_iter().enumerate() {
        if !factor.is_finite() {
            return Err(PipelineError::ReferenceIntegrity {
                row: row + 1,
                article_key: billing.article_key.clone(),
                value: factor.to_string(),
                content: describe_row(&billing, &reference_extra, factor),
            });
        }
        let emission_co2 = billing.quantity * factor * billing.price_sign();
        output.push(JoinedRecord {
            billing,
            reference_extra,
            emission_factor: factor,
            emission_co2,
        });
    }

    let table = EmissionTable {
        billing_columns,
        reference_columns: plan.output_columns(),
        records: output,
    };
    stats.output_rows = table.len();
    stats.total_emission_co2 = table.total_emission_co2();

    events.record(PipelineEvent::JoinCompleted(stats.clone()));
    Ok(ProcessOutcome { table, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ARTICLE_KEY;

    fn scenario_billing() -> BillingTable {
        BillingTable::from_records(vec![
            BillingRecord::new("0123", 4.0, 100.0).with_source("a.csv"),
            BillingRecord::new("999", 2.0, 50.0).with_source("a.csv"),
        ])
    }

    fn scenario_reference() -> ReferenceTable {
        ReferenceTable::new(vec![Co2FactorEntry::new("123", 1.5)])
    }

    // -------------------------------------------------------------------------
    // JOIN SCENARIOS
    // -------------------------------------------------------------------------

    #[test]
    fn test_filter_missing_drops_unmatched() {
        let mut events: Vec<PipelineEvent> = Vec::new();
        let out = process(&scenario_billing(), &scenario_reference(), true, &mut events).unwrap();

        assert_eq!(out.table.len(), 1);
        let row = &out.table.records[0];
        assert_eq!(row.billing.article_key, "123");
        assert_eq!(row.emission_co2, 6.0);
        assert_eq!(out.stats.dropped_rows, 1);
        assert_eq!(out.stats.matched_rows, 1);
        assert!(matches!(events[0], PipelineEvent::JoinCompleted(_)));
    }

    #[test]
    fn test_keep_unmatched_defaults_to_zero() {
        let out = process(&scenario_billing(), &scenario_reference(), false, &mut Vec::<PipelineEvent>::new()).unwrap();

        assert_eq!(out.table.len(), 2);
        let second = &out.table.records[1];
        assert_eq!(second.billing.article_key, "999");
        assert_eq!(second.emission_factor, 0.0);
        assert_eq!(second.emission_co2, 0.0);
        assert_eq!(out.stats.unmatched_rows, 1);
        assert_eq!(out.stats.dropped_rows, 0);
        assert_eq!(out.stats.total_emission_co2, 6.0);
    }

    #[test]
    fn test_negative_price_inverts_sign() {
        let billing = BillingTable::from_records(vec![BillingRecord::new("1", 10.0, -50.0)]);
        let reference = ReferenceTable::new(vec![Co2FactorEntry::new("1", 2.0)]);
        let out = process(&billing, &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(out.table.records[0].emission_co2, -20.0);
    }

    #[test]
    fn test_negative_quantity_positive_price_keeps_quantity_sign() {
        let billing = BillingTable::from_records(vec![BillingRecord::new("1", -10.0, 50.0)]);
        let reference = ReferenceTable::new(vec![Co2FactorEntry::new("1", 2.0)]);
        let out = process(&billing, &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(out.table.records[0].emission_co2, -20.0);
    }

    #[test]
    fn test_order_and_return_cancel() {
        let billing = BillingTable::from_records(vec![
            BillingRecord::new("1", 3.0, 10.0),
            BillingRecord::new("1", 3.0, -10.0),
        ]);
        let reference = ReferenceTable::new(vec![Co2FactorEntry::new("1", 2.5)]);
        let out = process(&billing, &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(out.stats.total_emission_co2, 0.0);
    }

    #[test]
    fn test_reference_without_factor_column_keeps_everything() {
        let reference = ReferenceTable::without_factor_column(vec![Co2FactorEntry::new("123", 9.0)]);
        let out = process(&scenario_billing(), &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(out.table.len(), 2);
        assert!(out.table.records.iter().all(|r| r.emission_factor == 0.0));
        assert!(!out.stats.factor_column_present);
        assert_eq!(out.stats.dropped_rows, 0);
    }

    #[test]
    fn test_duplicate_reference_keys_fan_out() {
        let reference = ReferenceTable::new(vec![
            Co2FactorEntry::new("123", 1.0).with_extra("CM", "kg"),
            Co2FactorEntry::new("0123", 2.0).with_extra("CM", "t"),
        ]);
        let out = process(&scenario_billing(), &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(out.table.len(), 2);
        assert_eq!(out.stats.matched_rows, 1);
        let co2: Vec<f64> = out.table.records.iter().map(|r| r.emission_co2).collect();
        assert_eq!(co2, vec![4.0, 8.0]);
    }

    #[test]
    fn test_entry_without_factor_counts_as_unmatched() {
        let mut entry = Co2FactorEntry::new("123", 1.5);
        entry.emission_factor = None;
        let reference = ReferenceTable::new(vec![entry]);
        let out = process(&scenario_billing(), &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert!(out.table.is_empty());
        assert_eq!(out.stats.dropped_rows, 2);
    }

    #[test]
    fn test_inputs_not_mutated() {
        let billing = scenario_billing();
        let reference = scenario_reference();
        let (billing_before, reference_before) = (billing.clone(), reference.clone());
        process(&billing, &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        assert_eq!(billing, billing_before);
        assert_eq!(reference, reference_before);
    }

    // -------------------------------------------------------------------------
    // IDEMPOTENCE AND PASSTHROUGH
    // -------------------------------------------------------------------------

    #[test]
    fn test_reprocessing_is_idempotent() {
        let billing = BillingTable::from_records(vec![
            BillingRecord::new("123", 4.0, 100.0).with_extra("CLIENT", "ACME"),
            BillingRecord::new("456", 1.0, -20.0).with_extra("CLIENT", "Globex"),
            BillingRecord::new("999", 2.0, 5.0).with_extra("CLIENT", "Initech"),
        ]);
        let reference = ReferenceTable::new(vec![
            Co2FactorEntry::new("123", 1.5).with_extra("Nom_Cat", "Acier"),
            Co2FactorEntry::new("456", 3.0).with_extra("Nom_Cat", "Bois"),
        ]);

        for filter_missing in [true, false] {
            let once = process(&billing, &reference, filter_missing, &mut Vec::<PipelineEvent>::new()).unwrap();
            let again = process(
                &once.table.to_billing_table(),
                &reference,
                filter_missing,
                &mut Vec::<PipelineEvent>::new(),
            )
            .unwrap();

            let first: Vec<f64> = once.table.records.iter().map(|r| r.emission_co2).collect();
            let second: Vec<f64> = again.table.records.iter().map(|r| r.emission_co2).collect();
            assert_eq!(first, second);
            assert_eq!(once.table.columns(), again.table.columns());
        }
    }

    #[test]
    fn test_passthrough_from_both_sides() {
        let billing = BillingTable::from_records(vec![
            BillingRecord::new("123", 1.0, 1.0).with_extra("CLIENT", "ACME"),
        ]);
        let reference = ReferenceTable::new(vec![
            Co2FactorEntry::new("123", 1.5).with_extra("Nom_Cat", "Acier"),
        ]);
        let out = process(&billing, &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap();
        let columns = out.table.columns();
        assert_eq!(columns[0], ARTICLE_KEY);
        assert!(columns.contains(&"CLIENT".to_string()));
        assert!(columns.contains(&"Nom_Cat".to_string()));
        assert_eq!(columns.last().map(String::as_str), Some(EMISSION_CO2));
        let record = &out.table.records[0];
        assert_eq!(record.field("Nom_Cat").as_deref(), Some("Acier"));
        assert_eq!(record.field("CLIENT").as_deref(), Some("ACME"));
    }

    fn colliding_tables() -> (BillingTable, ReferenceTable) {
        let billing = BillingTable::from_records(vec![
            BillingRecord::new("1", 1.0, 1.0).with_extra("CATEGORY", "office"),
            BillingRecord::new("2", 1.0, 1.0).with_extra("CATEGORY", "travel"),
        ]);
        let reference = ReferenceTable::new(vec![
            Co2FactorEntry::new("1", 2.0).with_extra("CATEGORY", "steel"),
        ]);
        (billing, reference)
    }

    #[test]
    fn test_colliding_columns_keep_both_values() {
        let (billing, reference) = colliding_tables();
        let out = process(&billing, &reference, false, &mut Vec::<PipelineEvent>::new()).unwrap();

        let columns = out.table.columns();
        assert!(columns.contains(&"CATEGORY".to_string()));
        assert!(columns.contains(&"CATEGORY_ref".to_string()));

        let matched = &out.table.records[0];
        assert_eq!(matched.field("CATEGORY").as_deref(), Some("office"));
        assert_eq!(matched.field("CATEGORY_ref").as_deref(), Some("steel"));
        assert_eq!(matched.emission_co2, 2.0);

        let unmatched = &out.table.records[1];
        assert_eq!(unmatched.field("CATEGORY").as_deref(), Some("travel"));
        assert_eq!(unmatched.field("CATEGORY_ref"), None);
        assert!(out.table.to_rows()[1].contains(&"travel".to_string()));
    }

    #[test]
    fn test_reprocessing_with_colliding_columns() {
        let (billing, reference) = colliding_tables();
        let once = process(&billing, &reference, false, &mut Vec::<PipelineEvent>::new()).unwrap();
        let again = process(
            &once.table.to_billing_table(),
            &reference,
            false,
            &mut Vec::<PipelineEvent>::new(),
        )
        .unwrap();

        assert_eq!(once.table.columns(), again.table.columns());
        assert_eq!(once.table.to_rows(), again.table.to_rows());
        assert_eq!(again.table.records[1].field("CATEGORY").as_deref(), Some("travel"));
    }

    // -------------------------------------------------------------------------
    // INTEGRITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_non_numeric_factor_is_fatal() {
        let reference = ReferenceTable::new(vec![
            Co2FactorEntry::new("123", f64::NAN).with_extra("Nom_Cat", "Acier"),
        ]);
        let err = process(&scenario_billing(), &reference, true, &mut Vec::<PipelineEvent>::new()).unwrap_err();
        match err {
            PipelineError::ReferenceIntegrity {
                row,
                article_key,
                content,
                ..
            } => {
                assert_eq!(row, 1);
                assert_eq!(article_key, "123");
                assert!(content.contains("quantity=4"));
                assert!(content.contains("Nom_Cat=Acier"));
                assert!(content.contains("source_file=a.csv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
