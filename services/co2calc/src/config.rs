//! Run configuration, built once by the caller and passed down by value.
//!
//! The core never reads the environment. Only the binary calls
//! [`RunConfig::from_env`], then applies its command-line overrides.

use serde::Serialize;

use crate::dates::DateRange;
use crate::error::ConfigError;

pub const ENV_FILTER_ENABLED: &str = "CO2_FILTER_ENABLED";
pub const ENV_START_DATE: &str = "CO2_START_DATE";
pub const ENV_END_DATE: &str = "CO2_END_DATE";
pub const ENV_DETAILED_DIAGNOSTICS: &str = "CO2_DETAILED_DIAGNOSTICS";
pub const ENV_FILTER_MISSING: &str = "CO2_FILTER_MISSING";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterConfig {
    pub enabled: bool,
    /// ISO-8601 (`YYYY-MM-DD`), empty when unset
    pub start_date: String,
    pub end_date: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_date: String::new(),
            end_date: String::new(),
        }
    }
}

impl FilterConfig {
    /// Validated date window. Disabled filtering yields an unbounded range.
    pub fn date_range(&self) -> Result<DateRange, ConfigError> {
        if !self.enabled {
            return Ok(DateRange::unbounded());
        }
        DateRange::from_iso(&self.start_date, &self.end_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub filter: FilterConfig,
    pub detailed_diagnostics: bool,
    /// Drop billing rows without a reference match instead of zeroing them
    pub filter_missing: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            detailed_diagnostics: false,
            filter_missing: true,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RunConfig {
    /// Defaults overridden by `CO2_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| {
                    let parsed = parse_flag(&v);
                    if parsed.is_none() {
                        tracing::warn!(key, value = %v, default, "ignoring unrecognized boolean");
                    }
                    parsed
                })
                .unwrap_or(default)
        };

        Self {
            filter: FilterConfig {
                enabled: flag(ENV_FILTER_ENABLED, defaults.filter.enabled),
                start_date: lookup(ENV_START_DATE).unwrap_or_default(),
                end_date: lookup(ENV_END_DATE).unwrap_or_default(),
            },
            detailed_diagnostics: flag(ENV_DETAILED_DIAGNOSTICS, defaults.detailed_diagnostics),
            filter_missing: flag(ENV_FILTER_MISSING, defaults.filter_missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = RunConfig::from_lookup(lookup(&[]));
        assert_eq!(config, RunConfig::default());
        assert!(config.filter.date_range().unwrap().is_unbounded());
    }

    #[test]
    fn test_env_overrides() {
        let config = RunConfig::from_lookup(lookup(&[
            (ENV_START_DATE, "2024-01-01"),
            (ENV_END_DATE, "2024-06-30"),
            (ENV_DETAILED_DIAGNOSTICS, "yes"),
            (ENV_FILTER_MISSING, "0"),
        ]));
        assert!(config.detailed_diagnostics);
        assert!(!config.filter_missing);

        let range = config.filter.date_range().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 6, 30));
    }

    #[test]
    fn test_unrecognized_flag_keeps_default() {
        let config = RunConfig::from_lookup(lookup(&[(ENV_FILTER_MISSING, "maybe")]));
        assert!(config.filter_missing);
    }

    #[test]
    fn test_disabled_filter_ignores_dates() {
        let filter = FilterConfig {
            enabled: false,
            start_date: "not a date".into(),
            end_date: "2024-01-01".into(),
        };
        assert!(filter.date_range().unwrap().is_unbounded());
    }

    #[test]
    fn test_invalid_dates_rejected() {
        let filter = FilterConfig {
            enabled: true,
            start_date: "15/01/2024".into(),
            end_date: String::new(),
        };
        assert!(matches!(
            filter.date_range(),
            Err(ConfigError::InvalidDate { .. })
        ));

        let inverted = FilterConfig {
            enabled: true,
            start_date: "2024-12-31".into(),
            end_date: "2024-01-01".into(),
        };
        assert!(matches!(
            inverted.date_range(),
            Err(ConfigError::InvertedRange { .. })
        ));
    }
}
