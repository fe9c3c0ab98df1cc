//! Pattern discovery engine: variable classification, descriptive
//! statistics, correlation structure, and key-variable heuristics.
//!
//! ## Responsibilities
//!
//! - Survey-oriented variable classification (binary, binary numeric,
//!   ordinal, categorical, continuous, text, datetime)
//! - Descriptive statistics per numeric column (sample std, adjusted
//!   skewness and excess kurtosis)
//! - Pearson correlation matrix over pairwise-complete observations
//!   with a reported list of strong pairs
//! - Co-occurring missingness counts per column pair
//! - Key-variable identification from completeness and correlation

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::dataset::{Column, ColumnKind, Dataset};
use crate::numeric::{self, round_to};

const BINARY_DISTINCT: usize = 2;
const ORDINAL_MAX_DISTINCT: usize = 10;
const ORDINAL_MAX_RATIO: f64 = 0.05;
const CATEGORICAL_MAX_DISTINCT: usize = 10;
const STRONG_PAIR_THRESHOLD: f64 = 0.5;
const VERY_STRONG_THRESHOLD: f64 = 0.7;
const KEY_COMPLETENESS_PERCENT: f64 = 95.0;
const KEY_CORRELATION_THRESHOLD: f64 = 0.7;

/// Survey-oriented variable role derived from a column's kind and its
/// distinct-value structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Binary,
    BinaryNumeric,
    Ordinal,
    Categorical,
    Continuous,
    Text,
    #[serde(rename = "datetime")]
    DateTime,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VariableType::Binary => "binary",
            VariableType::BinaryNumeric => "binary_numeric",
            VariableType::Ordinal => "ordinal",
            VariableType::Categorical => "categorical",
            VariableType::Continuous => "continuous",
            VariableType::Text => "text",
            VariableType::DateTime => "datetime",
        };
        write!(f, "{label}")
    }
}

/// Classification of one variable with type-specific detail.
#[derive(Debug, Clone, Serialize)]
pub struct VariableClassification {
    pub variable_type: VariableType,
    pub distinct: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_counts: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
}

/// Descriptive statistics for one numeric column, all rounded to four
/// places. Skewness needs three observations and kurtosis four; below
/// that the fields are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skewness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kurtosis: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationPair {
    pub variable_1: String,
    pub variable_2: String,
    pub correlation: f64,
    pub strength: String,
}

/// Pearson matrix plus the pairs worth reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub matrix: BTreeMap<String, BTreeMap<String, f64>>,
    pub strong_pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoOccurrence {
    pub columns: [String; 2],
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyVariable {
    pub variable: String,
    pub reason: String,
}

/// Combined stage-three payload.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub classifications: BTreeMap<String, VariableClassification>,
    pub descriptive: BTreeMap<String, DescriptiveStats>,
    pub correlations: CorrelationReport,
    pub missing_co_occurrence: Vec<CoOccurrence>,
    pub key_variables: Vec<KeyVariable>,
}

fn distinct_displays(column: &Column) -> Vec<String> {
    let mut distinct: Vec<String> = column
        .display_values()
        .into_iter()
        .flatten()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    distinct.sort();
    distinct
}

fn classify_column(column: &Column) -> VariableClassification {
    match column.kind() {
        ColumnKind::Boolean => {
            let values = distinct_displays(column);
            VariableClassification {
                variable_type: VariableType::Binary,
                distinct: values.len(),
                values: Some(values),
                value_counts: None,
                range: None,
            }
        }
        ColumnKind::DateTime => {
            let values = distinct_displays(column);
            let bounds = match (values.first(), values.last()) {
                (Some(min), Some(max)) => Some(vec![min.clone(), max.clone()]),
                _ => None,
            };
            VariableClassification {
                variable_type: VariableType::DateTime,
                distinct: values.len(),
                values: bounds,
                value_counts: None,
                range: None,
            }
        }
        ColumnKind::Numeric => {
            let present = column.present_numeric();
            let mut sorted = present.clone();
            sorted.sort_by(f64::total_cmp);
            sorted.dedup();
            let distinct = sorted.len();
            if distinct == BINARY_DISTINCT {
                VariableClassification {
                    variable_type: VariableType::BinaryNumeric,
                    distinct,
                    values: Some(sorted.iter().map(|v| crate::dataset::format_numeric(*v)).collect()),
                    value_counts: None,
                    range: None,
                }
            } else if distinct < ORDINAL_MAX_DISTINCT
                && !present.is_empty()
                && (distinct as f64 / present.len() as f64) < ORDINAL_MAX_RATIO
            {
                VariableClassification {
                    variable_type: VariableType::Ordinal,
                    distinct,
                    values: Some(sorted.iter().map(|v| crate::dataset::format_numeric(*v)).collect()),
                    value_counts: None,
                    range: None,
                }
            } else {
                let range = match (sorted.first(), sorted.last()) {
                    (Some(min), Some(max)) => Some([*min, *max]),
                    _ => None,
                };
                VariableClassification {
                    variable_type: VariableType::Continuous,
                    distinct,
                    values: None,
                    value_counts: None,
                    range,
                }
            }
        }
        ColumnKind::Categorical => {
            let displays: Vec<String> = column.display_values().into_iter().flatten().collect();
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for value in &displays {
                *counts.entry(value.clone()).or_default() += 1;
            }
            let distinct = counts.len();
            if distinct == BINARY_DISTINCT {
                VariableClassification {
                    variable_type: VariableType::Binary,
                    distinct,
                    values: Some(counts.keys().cloned().collect()),
                    value_counts: None,
                    range: None,
                }
            } else if distinct < CATEGORICAL_MAX_DISTINCT {
                VariableClassification {
                    variable_type: VariableType::Categorical,
                    distinct,
                    values: None,
                    value_counts: Some(counts),
                    range: None,
                }
            } else {
                VariableClassification {
                    variable_type: VariableType::Text,
                    distinct,
                    values: None,
                    value_counts: None,
                    range: None,
                }
            }
        }
    }
}

/// Classifies every column in the dataset.
pub fn classify_variables(dataset: &Dataset) -> BTreeMap<String, VariableClassification> {
    dataset
        .columns()
        .iter()
        .map(|c| (c.name.clone(), classify_column(c)))
        .collect()
}

/// Descriptive statistics for every numeric column with at least one
/// value.
pub fn descriptive_stats(dataset: &Dataset) -> BTreeMap<String, DescriptiveStats> {
    let mut stats = BTreeMap::new();
    for column in dataset.columns() {
        if column.kind() != ColumnKind::Numeric {
            continue;
        }
        let present = column.present_numeric();
        let (Some(mean), Some(min), Some(q1), Some(median), Some(q3), Some(max)) = (
            numeric::mean(&present),
            numeric::percentile(&present, 0.0),
            numeric::percentile(&present, 0.25),
            numeric::median(&present),
            numeric::percentile(&present, 0.75),
            numeric::percentile(&present, 1.0),
        ) else {
            continue;
        };
        let std = numeric::sample_std(&present).unwrap_or(0.0);
        stats.insert(
            column.name.clone(),
            DescriptiveStats {
                count: present.len(),
                mean: round_to(mean, 4),
                std: round_to(std, 4),
                min: round_to(min, 4),
                q1: round_to(q1, 4),
                median: round_to(median, 4),
                q3: round_to(q3, 4),
                max: round_to(max, 4),
                skewness: numeric::skewness(&present).map(|v| round_to(v, 4)),
                kurtosis: numeric::excess_kurtosis(&present).map(|v| round_to(v, 4)),
            },
        );
    }
    stats
}

/// Pearson correlations over pairwise-complete observations. Fewer
/// than two numeric columns yields an empty report.
pub fn find_correlations(dataset: &Dataset) -> CorrelationReport {
    let numeric_columns: Vec<&Column> = dataset
        .columns()
        .iter()
        .filter(|c| c.kind() == ColumnKind::Numeric)
        .collect();
    if numeric_columns.len() < 2 {
        return CorrelationReport {
            matrix: BTreeMap::new(),
            strong_pairs: Vec::new(),
        };
    }

    let mut matrix: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for column in &numeric_columns {
        matrix
            .entry(column.name.clone())
            .or_default()
            .insert(column.name.clone(), 1.0);
    }
    let mut strong_pairs = Vec::new();
    for (a, b) in numeric_columns.iter().tuple_combinations() {
        let (Some(cells_a), Some(cells_b)) = (a.as_numeric(), b.as_numeric()) else {
            continue;
        };
        let pairs: Vec<(f64, f64)> = cells_a
            .iter()
            .zip(cells_b)
            .filter_map(|(x, y)| x.zip(*y))
            .collect();
        let Some(r) = numeric::pearson_r(&pairs) else {
            continue;
        };
        let rounded = round_to(r, 3);
        matrix
            .entry(a.name.clone())
            .or_default()
            .insert(b.name.clone(), rounded);
        matrix
            .entry(b.name.clone())
            .or_default()
            .insert(a.name.clone(), rounded);
        if r.abs() >= STRONG_PAIR_THRESHOLD {
            let strength = if r.abs() >= VERY_STRONG_THRESHOLD {
                "strong"
            } else {
                "moderate"
            };
            strong_pairs.push(CorrelationPair {
                variable_1: a.name.clone(),
                variable_2: b.name.clone(),
                correlation: rounded,
                strength: strength.to_string(),
            });
        }
    }
    CorrelationReport {
        matrix,
        strong_pairs,
    }
}

/// Counts rows where both columns of a pair are missing together; only
/// pairs with at least one such row are reported.
pub fn detect_missing_co_occurrence(dataset: &Dataset) -> Vec<CoOccurrence> {
    let total = dataset.row_count();
    if total == 0 {
        return Vec::new();
    }
    let missing_masks: Vec<(String, Vec<bool>)> = dataset
        .columns()
        .iter()
        .map(|c| {
            let mask = (0..c.len()).map(|row| c.values.is_missing_at(row)).collect();
            (c.name.clone(), mask)
        })
        .collect();
    let mut out = Vec::new();
    for (a, b) in missing_masks.iter().tuple_combinations() {
        let count = a.1.iter().zip(&b.1).filter(|(x, y)| **x && **y).count();
        if count == 0 {
            continue;
        }
        out.push(CoOccurrence {
            columns: [a.0.clone(), b.0.clone()],
            count,
            percentage: round_to(count as f64 * 100.0 / total as f64, 2),
        });
    }
    out
}

/// Flags analysis-worthy variables: first by completeness (at least
/// 95% present), then by membership in a strong correlation pair. The
/// first reason found for a variable wins.
pub fn identify_key_variables(
    dataset: &Dataset,
    correlations: &CorrelationReport,
) -> Vec<KeyVariable> {
    let total = dataset.row_count();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    if total > 0 {
        for column in dataset.columns() {
            let completeness =
                round_to(column.present_count() as f64 * 100.0 / total as f64, 2);
            if completeness >= KEY_COMPLETENESS_PERCENT && seen.insert(column.name.clone()) {
                out.push(KeyVariable {
                    variable: column.name.clone(),
                    reason: format!("completeness {completeness}%"),
                });
            }
        }
    }
    for pair in &correlations.strong_pairs {
        if pair.correlation.abs() < KEY_CORRELATION_THRESHOLD {
            continue;
        }
        if seen.insert(pair.variable_1.clone()) {
            out.push(KeyVariable {
                variable: pair.variable_1.clone(),
                reason: format!(
                    "correlation {} with {}",
                    pair.correlation, pair.variable_2
                ),
            });
        }
        if seen.insert(pair.variable_2.clone()) {
            out.push(KeyVariable {
                variable: pair.variable_2.clone(),
                reason: format!(
                    "correlation {} with {}",
                    pair.correlation, pair.variable_1
                ),
            });
        }
    }
    out
}

/// Runs the full stage-three analysis.
pub fn discover(dataset: &Dataset) -> DiscoveryReport {
    let correlations = find_correlations(dataset);
    let key_variables = identify_key_variables(dataset, &correlations);
    DiscoveryReport {
        classifications: classify_variables(dataset),
        descriptive: descriptive_stats(dataset),
        correlations,
        missing_co_occurrence: detect_missing_co_occurrence(dataset),
        key_variables,
    }
}

/// Renders the descriptive statistics as the key-statistics CSV
/// artifact.
pub fn key_statistics_csv(stats: &BTreeMap<String, DescriptiveStats>) -> Vec<u8> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = [
        "variable", "count", "mean", "std", "min", "q1", "median", "q3", "max", "skewness",
        "kurtosis",
    ];
    // writes to an in-memory buffer, so the record calls cannot fail
    let _ = writer.write_record(header);
    for (name, s) in stats {
        let record = [
            name.clone(),
            s.count.to_string(),
            s.mean.to_string(),
            s.std.to_string(),
            s.min.to_string(),
            s.q1.to_string(),
            s.median.to_string(),
            s.q3.to_string(),
            s.max.to_string(),
            s.skewness.map(|v| v.to_string()).unwrap_or_default(),
            s.kurtosis.map(|v| v.to_string()).unwrap_or_default(),
        ];
        let _ = writer.write_record(&record);
    }
    writer.into_inner().unwrap_or_default()
}
