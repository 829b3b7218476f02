//! Column mapping from source headers to the canonical schema.
//!
//! Known mappings only, never inferred. A billing file is either already in
//! canonical form or a raw export using the fixed source names; the shape is
//! decided here once and carried as [`BillingShape`].

use serde::Serialize;

use crate::error::SchemaError;
use crate::model::{ARTICLE_KEY, EMISSION_FACTOR, QUANTITY, SOURCE_FILE, UNIT_PRICE};

/// Source column → canonical column, for raw billing exports.
pub const BILLING_SOURCE_MAPPING: &[(&str, &str)] = &[
    ("ID_MATERIAL", ARTICLE_KEY),
    ("QUANTITY", QUANTITY),
    ("AMOUNT_NET", UNIT_PRICE),
];

pub const CANONICAL_BILLING_COLUMNS: &[&str] = &[ARTICLE_KEY, QUANTITY, UNIT_PRICE];

/// Candidate reference mappings, tried in order; first full match wins.
pub const REFERENCE_MAPPINGS: &[&[(&str, &str)]] = &[
    &[("Num_art", ARTICLE_KEY), ("FE", EMISSION_FACTOR)],
    &[(ARTICLE_KEY, ARTICLE_KEY), (EMISSION_FACTOR, EMISSION_FACTOR)],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingShape {
    /// Canonical columns already present, no renaming
    Canonical,
    /// Raw export, renamed through [`BILLING_SOURCE_MAPPING`]
    Raw,
}

impl BillingShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingShape::Canonical => "canonical",
            BillingShape::Raw => "raw",
        }
    }
}

/// Column positions of a billing file once its shape is known.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingLayout {
    pub shape: BillingShape,
    pub article_key: usize,
    pub quantity: usize,
    pub unit_price: usize,
    /// (position, name) of every column carried verbatim
    pub passthrough: Vec<(usize, String)>,
}

/// Column positions of a reference file under the mapping that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLayout {
    pub mapping: String,
    pub article_key: usize,
    pub emission_factor: usize,
    pub passthrough: Vec<(usize, String)>,
}

fn position(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Render a mapping as `{A -> a, B -> b}`.
pub fn describe_mapping(mapping: &[(&str, &str)]) -> String {
    let pairs: Vec<String> = mapping
        .iter()
        .map(|(source, target)| format!("{source} -> {target}"))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn passthrough_columns(headers: &[String], consumed: &[usize], reserved: &[&str]) -> Vec<(usize, String)> {
    headers
        .iter()
        .enumerate()
        .filter(|(idx, name)| !consumed.contains(idx) && !reserved.contains(&name.as_str()))
        .map(|(idx, name)| (idx, name.clone()))
        .collect()
}

/// Decide the shape of a billing file and locate its core columns.
pub fn resolve_billing(headers: &[String]) -> Result<BillingLayout, SchemaError> {
    let reserved = [ARTICLE_KEY, QUANTITY, UNIT_PRICE, SOURCE_FILE];

    let canonical: Vec<Option<usize>> = CANONICAL_BILLING_COLUMNS
        .iter()
        .map(|c| position(headers, c))
        .collect();
    if let [Some(article_key), Some(quantity), Some(unit_price)] = canonical[..] {
        return Ok(BillingLayout {
            shape: BillingShape::Canonical,
            article_key,
            quantity,
            unit_price,
            passthrough: passthrough_columns(headers, &[article_key, quantity, unit_price], &reserved),
        });
    }

    let mapped: Vec<Option<usize>> = BILLING_SOURCE_MAPPING
        .iter()
        .map(|(source, _)| position(headers, source))
        .collect();
    if let [Some(article_key), Some(quantity), Some(unit_price)] = mapped[..] {
        return Ok(BillingLayout {
            shape: BillingShape::Raw,
            article_key,
            quantity,
            unit_price,
            passthrough: passthrough_columns(headers, &[article_key, quantity, unit_price], &reserved),
        });
    }

    let missing = BILLING_SOURCE_MAPPING
        .iter()
        .zip(mapped.iter())
        .filter(|(_, found)| found.is_none())
        .map(|((source, _), _)| source.to_string())
        .collect();
    Err(SchemaError::MissingColumns {
        missing,
        found: headers.to_vec(),
    })
}

/// Apply the first reference mapping whose source columns are all present.
pub fn resolve_reference(headers: &[String]) -> Result<ReferenceLayout, SchemaError> {
    for mapping in REFERENCE_MAPPINGS {
        let positions: Option<Vec<usize>> = mapping
            .iter()
            .map(|(source, _)| position(headers, source))
            .collect();
        let Some(positions) = positions else {
            continue;
        };

        let target_position = |target: &str| {
            mapping
                .iter()
                .zip(positions.iter())
                .find(|((_, t), _)| *t == target)
                .map(|(_, idx)| *idx)
        };
        let (Some(article_key), Some(emission_factor)) =
            (target_position(ARTICLE_KEY), target_position(EMISSION_FACTOR))
        else {
            continue;
        };

        return Ok(ReferenceLayout {
            mapping: describe_mapping(mapping),
            article_key,
            emission_factor,
            passthrough: passthrough_columns(
                headers,
                &positions,
                &[ARTICLE_KEY, EMISSION_FACTOR],
            ),
        });
    }

    Err(SchemaError::NoMatchingMapping {
        attempted: REFERENCE_MAPPINGS.iter().map(|m| describe_mapping(m)).collect(),
        found: headers.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // -------------------------------------------------------------------------
    // BILLING
    // -------------------------------------------------------------------------

    #[test]
    fn test_raw_billing_mapping() {
        let layout = resolve_billing(&headers(&[
            "DATE_INVOICE",
            "ID_MATERIAL",
            "CLIENT",
            "QUANTITY",
            "AMOUNT_NET",
        ]))
        .unwrap();
        assert_eq!(layout.shape, BillingShape::Raw);
        assert_eq!((layout.article_key, layout.quantity, layout.unit_price), (1, 3, 4));
        assert_eq!(
            layout.passthrough,
            vec![(0, "DATE_INVOICE".to_string()), (2, "CLIENT".to_string())]
        );
    }

    #[test]
    fn test_canonical_billing_skips_mapping() {
        let layout = resolve_billing(&headers(&[
            "article_key",
            "quantity",
            "unit_price",
            "emission_factor",
            "source_file",
        ]))
        .unwrap();
        assert_eq!(layout.shape, BillingShape::Canonical);
        // source_file is reassigned on load, not carried
        assert_eq!(layout.passthrough, vec![(3, "emission_factor".to_string())]);
    }

    #[test]
    fn test_canonical_wins_when_both_shapes_present() {
        let layout = resolve_billing(&headers(&[
            "ID_MATERIAL",
            "QUANTITY",
            "AMOUNT_NET",
            "article_key",
            "quantity",
            "unit_price",
        ]))
        .unwrap();
        assert_eq!(layout.shape, BillingShape::Canonical);
        assert_eq!(layout.article_key, 3);
    }

    #[test]
    fn test_billing_missing_columns_named() {
        let err = resolve_billing(&headers(&["ID_MATERIAL", "AMOUNT_NET"])).unwrap_err();
        match err {
            SchemaError::MissingColumns { missing, found } => {
                assert_eq!(missing, vec!["QUANTITY"]);
                assert_eq!(found, vec!["ID_MATERIAL", "AMOUNT_NET"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // -------------------------------------------------------------------------
    // REFERENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_reference_first_mapping() {
        let layout = resolve_reference(&headers(&["Nom_Cat", "Num_art", "FE", "CM"])).unwrap();
        assert_eq!(layout.article_key, 1);
        assert_eq!(layout.emission_factor, 2);
        assert_eq!(layout.mapping, "{Num_art -> article_key, FE -> emission_factor}");
        assert_eq!(
            layout.passthrough,
            vec![(0, "Nom_Cat".to_string()), (3, "CM".to_string())]
        );
    }

    #[test]
    fn test_reference_canonical_mapping() {
        let layout = resolve_reference(&headers(&["article_key", "emission_factor"])).unwrap();
        assert_eq!((layout.article_key, layout.emission_factor), (0, 1));
        assert!(layout.passthrough.is_empty());
    }

    #[test]
    fn test_reference_priority_order() {
        let layout =
            resolve_reference(&headers(&["article_key", "emission_factor", "Num_art", "FE"])).unwrap();
        assert_eq!((layout.article_key, layout.emission_factor), (2, 3));
        // the canonical-named columns of the losing candidate are not duplicated
        assert!(layout.passthrough.is_empty());
    }

    #[test]
    fn test_reference_without_factor_names_candidates_and_columns() {
        let err = resolve_reference(&headers(&["Num_art", "Nom_Cat"])).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("{Num_art -> article_key, FE -> emission_factor}"));
        assert!(text.contains("{article_key -> article_key, emission_factor -> emission_factor}"));
        assert!(text.contains("Nom_Cat"));
        match err {
            SchemaError::NoMatchingMapping { attempted, found } => {
                assert_eq!(attempted.len(), 2);
                assert_eq!(found, vec!["Num_art", "Nom_Cat"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
