//! Writers for the result tables and the run report.
//!
//! Tables go out as UTF-8, semicolon-delimited text with a header row in
//! canonical column order, or as a single-sheet workbook when the target
//! ends in `.xlsx`. The report is pretty-printed JSON.

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use co2calc::loader::LoadReport;
use co2calc::model::{
    BillingTable, EmissionTable, EMISSION_CO2, EMISSION_FACTOR, QUANTITY, UNIT_PRICE,
};
use co2calc::processor::JoinStats;
use co2calc::reader::DEFAULT_DELIMITER;

/// Everything worth keeping about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub load: &'a LoadReport,
    pub join: &'a JoinStats,
    pub reference_rows_rejected: usize,
    /// `None` when date filtering was disabled
    pub out_of_range_rows: Option<usize>,
}

fn write_rows<W: Write>(writer: W, columns: &[String], rows: Vec<Vec<String>>) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .delimiter(DEFAULT_DELIMITER)
        .from_writer(writer);
    csv.write_record(columns)?;
    for row in rows {
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_emission_table<W: Write>(writer: W, table: &EmissionTable) -> Result<()> {
    write_rows(writer, &table.columns(), table.to_rows())
}

pub fn write_billing_table<W: Write>(writer: W, table: &BillingTable) -> Result<()> {
    write_rows(writer, &table.columns(), table.to_rows())
}

/// Columns written as numbers in a workbook; everything else stays text.
const NUMERIC_COLUMNS: &[&str] = &[QUANTITY, UNIT_PRICE, EMISSION_FACTOR, EMISSION_CO2];

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx"))
}

fn save_workbook(path: &Path, columns: &[String], rows: Vec<Vec<String>>) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        let col = u16::try_from(col).context("Too many columns for a worksheet")?;
        worksheet.write_string(0, col, name.as_str())?;
    }
    for (idx, row) in rows.iter().enumerate() {
        let row_num = u32::try_from(idx + 1).context("Too many rows for a worksheet")?;
        for (col, value) in row.iter().enumerate() {
            let numeric = NUMERIC_COLUMNS.contains(&columns[col].as_str());
            let col = u16::try_from(col).context("Too many columns for a worksheet")?;
            match value.parse::<f64>() {
                Ok(number) if numeric => worksheet.write_number(row_num, col, number)?,
                _ => worksheet.write_string(row_num, col, value.as_str())?,
            };
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn save_csv(path: &Path, columns: &[String], rows: Vec<Vec<String>>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_rows(file, columns, rows).with_context(|| format!("Failed to write {}", path.display()))
}

fn save_table(path: &Path, columns: &[String], rows: Vec<Vec<String>>) -> Result<()> {
    if is_workbook(path) {
        save_workbook(path, columns, rows)
    } else {
        save_csv(path, columns, rows)
    }
}

pub fn save_emission_table(path: &Path, table: &EmissionTable) -> Result<()> {
    save_table(path, &table.columns(), table.to_rows())
}

pub fn save_billing_table(path: &Path, table: &BillingTable) -> Result<()> {
    save_table(path, &table.columns(), table.to_rows())
}

pub fn save_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
