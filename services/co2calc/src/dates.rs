//! Tolerant date parsing and date-range partitioning.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::ConfigError;
use crate::events::{EventSink, PipelineEvent};
use crate::model::BillingTable;

/// Date-only formats, day-first. Two-digit years come before four-digit
/// ones because `%Y` also accepts short years.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", // ISO 8601: 2024-01-15
    "%Y/%m/%d", // 2024/01/15
    "%d/%m/%y", // 15/01/24
    "%d-%m-%y", // 15-01-24
    "%d.%m.%y", // 15.01.24
    "%d/%m/%Y", // 15/01/2024
    "%d-%m-%Y", // 15-01-2024
    "%d.%m.%Y", // 15.01.2024
    "%Y%m%d",   // 20240115
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];

/// `%Y` also reads one to three digits; such years are not invoice dates.
const MIN_YEAR: i32 = 1000;

/// Parse a date, day-first for ambiguous numeric forms.
///
/// Accepts `2024-01-15`, `2024/01/15`, `15/01/2024`, `15-01-2024`,
/// `15.01.2024`, `15/01/24` and `20240115`, and the common datetime forms
/// (`2024-01-15 10:30:00`, `2024-01-15T10:30`) whose time part is dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }

    let plausible = |date: &NaiveDate| date.year() >= MIN_YEAR;

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok().filter(plausible))
        .or_else(|| {
            DATETIME_FORMATS.iter().find_map(|fmt| {
                NaiveDateTime::parse_from_str(cleaned, fmt)
                    .ok()
                    .map(|dt| dt.date())
                    .filter(plausible)
            })
        })
}

/// Inclusive date window. A missing bound is open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// No bounds: filtering disabled.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The whole calendar year.
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1),
            end: Some(NaiveDate::from_ymd_opt(year, 12, 31)?),
        })
    }

    /// Build from ISO-8601 text; empty strings mean "unset".
    pub fn from_iso(start: &str, end: &str) -> Result<Self, ConfigError> {
        let parse = |key: &str, value: &str| -> Result<Option<NaiveDate>, ConfigError> {
            let value = value.trim();
            if value.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| ConfigError::InvalidDate {
                    key: key.to_string(),
                    value: value.to_string(),
                })
        };
        let range = Self::new(parse("start_date", start)?, parse("end_date", end)?);
        if let (Some(s), Some(e)) = (range.start, range.end) {
            if s > e {
                return Err(ConfigError::InvertedRange {
                    start: s.to_string(),
                    end: e.to_string(),
                });
            }
        }
        Ok(range)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Result of splitting a table against a [`DateRange`].
///
/// `out_of_range` is `None` when filtering was disabled, and `Some` (possibly
/// empty) whenever filtering ran.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub in_range: BillingTable,
    pub out_of_range: Option<BillingTable>,
}

impl Partition {
    pub fn filtering_disabled(&self) -> bool {
        self.out_of_range.is_none()
    }

    pub fn out_of_range_len(&self) -> usize {
        self.out_of_range.as_ref().map_or(0, BillingTable::len)
    }
}

/// Split records into in-range and out-of-range sets.
///
/// Rows whose date does not parse land in `out_of_range`. If `date_column`
/// is not part of the table, everything is in range and the out-of-range set
/// is empty.
pub fn partition(
    table: BillingTable,
    date_column: &str,
    range: &DateRange,
    events: &mut dyn EventSink,
) -> Partition {
    if range.is_unbounded() {
        let total = table.len();
        events.record(PipelineEvent::DatePartitioned {
            column: date_column.to_string(),
            filtering_enabled: false,
            in_range: total,
            out_of_range: 0,
            unparsable: 0,
        });
        return Partition {
            in_range: table,
            out_of_range: None,
        };
    }

    if !table.has_column(date_column) {
        tracing::info!(column = date_column, "date column absent, partitioning skipped");
        events.record(PipelineEvent::DatePartitioned {
            column: date_column.to_string(),
            filtering_enabled: true,
            in_range: table.len(),
            out_of_range: 0,
            unparsable: 0,
        });
        let out_of_range = table.empty_like();
        return Partition {
            in_range: table,
            out_of_range: Some(out_of_range),
        };
    }

    let mut in_range = table.empty_like();
    let mut out_of_range = table.empty_like();
    let mut unparsable = 0usize;

    for record in table.records {
        let date = record.field(date_column).and_then(|raw| parse_date(&raw));
        match date {
            Some(d) if range.contains(d) => in_range.records.push(record),
            Some(_) => out_of_range.records.push(record),
            None => {
                unparsable += 1;
                out_of_range.records.push(record);
            }
        }
    }

    events.record(PipelineEvent::DatePartitioned {
        column: date_column.to_string(),
        filtering_enabled: true,
        in_range: in_range.len(),
        out_of_range: out_of_range.len(),
        unparsable,
    });

    Partition {
        in_range,
        out_of_range: Some(out_of_range),
    }
}
