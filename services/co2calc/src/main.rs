//! CO2 Billing Calculator CLI
//!
//! Loads a batch of billing exports, keeps the invoices inside the configured
//! date window, joins them to the CO2 factor reference and writes the signed
//! emissions. Configuration comes from `CO2_*` environment variables (or a
//! `.env` file), overridden by flags.

mod export;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use co2calc::model::DATE_INVOICE;
use co2calc::{partition, process, BatchLoader, DateRange, RunConfig, TracingSink};

use crate::export::RunReport;

#[derive(Parser, Debug)]
#[command(name = "co2calc", about = "Computes CO2 emissions from billing exports")]
struct Args {
    /// Billing export(s), semicolon-delimited
    #[arg(long, required = true, num_args = 1..)]
    billing: Vec<PathBuf>,

    /// CO2 emission-factor reference table
    #[arg(long)]
    reference: PathBuf,

    /// Result table (.csv, or .xlsx for a workbook)
    #[arg(long, default_value = "emissions_co2.csv")]
    output: PathBuf,

    /// Records excluded by the date window (.csv or .xlsx)
    #[arg(long)]
    out_of_range: Option<PathBuf>,

    /// JSON run report
    #[arg(long)]
    report: Option<PathBuf>,

    /// First invoice date kept (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last invoice date kept (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,

    /// Keep a whole calendar year, overrides --start/--end
    #[arg(long, conflicts_with_all = ["start", "end"])]
    year: Option<i32>,

    /// Disable date filtering
    #[arg(long, default_value = "false")]
    no_filter: bool,

    /// Keep rows without a reference match (factor 0)
    #[arg(long, default_value = "false")]
    keep_unmatched: bool,

    /// Log every rejected row
    #[arg(long, default_value = "false")]
    detailed: bool,

    /// Load billing files one at a time
    #[arg(long, default_value = "false")]
    sequential: bool,
}

fn build_config(args: &Args) -> RunConfig {
    let mut config = RunConfig::from_env();
    if args.no_filter {
        config.filter.enabled = false;
    }
    if let Some(start) = &args.start {
        config.filter.start_date = start.clone();
    }
    if let Some(end) = &args.end {
        config.filter.end_date = end.clone();
    }
    if args.keep_unmatched {
        config.filter_missing = false;
    }
    if args.detailed {
        config.detailed_diagnostics = true;
    }
    config
}

fn init_tracing(detailed: bool) {
    let default_level = if detailed { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = build_config(&args);
    init_tracing(config.detailed_diagnostics);

    let range = match args.year {
        Some(year) if config.filter.enabled => {
            DateRange::year(year).with_context(|| format!("Invalid year {}", year))?
        }
        _ => config.filter.date_range().context("Invalid date filter")?,
    };

    println!("=== CO2 Billing Calculator ===");
    println!("Billing files: {}", args.billing.len());
    println!("Reference: {}", args.reference.display());
    println!(
        "Date window: {}",
        if range.is_unbounded() {
            "disabled".to_string()
        } else {
            format!(
                "{} .. {}",
                range.start.map(|d| d.to_string()).unwrap_or_else(|| "*".into()),
                range.end.map(|d| d.to_string()).unwrap_or_else(|| "*".into())
            )
        }
    );
    println!(
        "Unmatched rows: {}",
        if config.filter_missing { "dropped" } else { "kept" }
    );

    let mut sink = TracingSink::new(config.detailed_diagnostics);
    let mut loader = BatchLoader::default();
    if args.sequential {
        loader = loader.sequential();
    }

    let (billing, load_report) = loader
        .load(args.billing.as_slice(), &mut sink)
        .context("Failed to load billing files")?;
    println!(
        "\nLoaded {} rows from {}/{} files",
        billing.len(),
        load_report.included_count,
        load_report.total_files()
    );
    for excluded in &load_report.excluded_files {
        println!("  excluded {}: {}", excluded.file, excluded.reason);
    }
    if !load_report.rejected_rows.is_empty() {
        println!("  {} rejected row fields", load_report.rejected_rows.len());
    }

    let split = partition(billing, DATE_INVOICE, &range, &mut sink);
    let reference = loader
        .load_reference(&args.reference, &mut sink)
        .context("Failed to load CO2 reference")?;
    println!("Reference entries: {}", reference.table.len());

    let outcome = process(&split.in_range, &reference.table, config.filter_missing, &mut sink)
        .context("Failed to compute emissions")?;

    export::save_emission_table(&args.output, &outcome.table)?;
    println!("\nWrote {} rows to {}", outcome.table.len(), args.output.display());

    if let (Some(path), Some(out_of_range)) = (&args.out_of_range, &split.out_of_range) {
        export::save_billing_table(path, out_of_range)?;
        println!("Wrote {} out-of-range rows to {}", out_of_range.len(), path.display());
    }

    if let Some(path) = &args.report {
        let report = RunReport {
            load: &load_report,
            join: &outcome.stats,
            reference_rows_rejected: reference.rejected_rows.len(),
            out_of_range_rows: split.out_of_range.as_ref().map(|t| t.len()),
        };
        export::save_report(path, &report)?;
        println!("Wrote report to {}", path.display());
    }

    println!("\n=== Summary ===");
    println!("In range: {}", split.in_range.len());
    if !split.filtering_disabled() {
        println!("Out of range: {}", split.out_of_range_len());
    }
    println!("Matched: {}", outcome.stats.matched_rows);
    println!("Unmatched: {}", outcome.stats.unmatched_rows);
    println!("Dropped: {}", outcome.stats.dropped_rows);
    println!("Total emission CO2: {:.3}", outcome.stats.total_emission_co2);

    Ok(())
}
