//! Quality and cleansing engine: missingness analysis, outlier
//! detection and treatment, imputation, and rule validation.
//!
//! ## Responsibilities
//!
//! - Missingness report with heuristic mechanism labels (MCAR below 5%,
//!   MAR below 20%, MNAR above) and strategy suggestions
//! - Tukey IQR outlier detection (1.5 fences) over numeric columns
//! - Imputation strategies: mean, median, mode, forward/backward fill,
//!   KNN over nan-Euclidean distance, and typed literals
//! - Outlier treatments: remove, cap to IQR fences, winsorize to the
//!   5th/95th percentiles, z-score removal (|z| >= 3, ddof = 0)
//! - Validation rules: range, required, unique, allowed values
//!
//! Multi-column operations never abort on one bad column: failures are
//! collected per column and the rest proceed. All outputs are fresh
//! datasets; inputs are never mutated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dataset::{Column, ColumnKind, ColumnValues, Dataset};
use crate::error::{ColumnFailure, PipelineError, Result};
use crate::numeric::{self, round_to};

const IQR_FENCE_FACTOR: f64 = 1.5;
const ZSCORE_CUTOFF: f64 = 3.0;
const WINSOR_LOWER: f64 = 0.05;
const WINSOR_UPPER: f64 = 0.95;
const MCAR_BELOW_PERCENT: f64 = 5.0;
const MAR_BELOW_PERCENT: f64 = 20.0;
const MEAN_SUGGESTION_BELOW_PERCENT: f64 = 10.0;
const REPORTED_OUTLIER_VALUES: usize = 10;

/// Heuristic label for the likely missing-data mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingMechanism {
    #[serde(rename = "MCAR")]
    Mcar,
    #[serde(rename = "MAR")]
    Mar,
    #[serde(rename = "MNAR")]
    Mnar,
}

impl std::fmt::Display for MissingMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MissingMechanism::Mcar => "MCAR",
            MissingMechanism::Mar => "MAR",
            MissingMechanism::Mnar => "MNAR",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingnessEntry {
    pub count: usize,
    pub percentage: f64,
    pub mechanism: MissingMechanism,
}

/// Per-column missingness with imputation suggestions for affected
/// columns.
#[derive(Debug, Clone, Serialize)]
pub struct MissingnessReport {
    pub total_rows: usize,
    pub columns: BTreeMap<String, MissingnessEntry>,
    pub suggestions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierEntry {
    pub count: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub values: Vec<f64>,
}

/// IQR outliers per numeric column; only columns with at least one
/// outlier appear.
#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub columns: BTreeMap<String, OutlierEntry>,
}

/// Combined stage-two diagnostic payload.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub total_columns: usize,
    pub column_kinds: BTreeMap<String, ColumnKind>,
    pub missingness: MissingnessReport,
    pub outliers: OutlierReport,
}

fn default_knn_k() -> usize {
    5
}

/// How to fill missing values in one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    Median,
    Mode,
    ForwardFill,
    BackwardFill,
    Knn {
        #[serde(default = "default_knn_k")]
        k: usize,
    },
    Literal {
        value: String,
    },
}

impl ImputeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ImputeStrategy::Mean => "mean",
            ImputeStrategy::Median => "median",
            ImputeStrategy::Mode => "mode",
            ImputeStrategy::ForwardFill => "forward_fill",
            ImputeStrategy::BackwardFill => "backward_fill",
            ImputeStrategy::Knn { .. } => "knn",
            ImputeStrategy::Literal { .. } => "literal",
        }
    }
}

/// Analyst-facing imputation configuration (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputeConfig {
    pub columns: BTreeMap<String, ImputeStrategy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImputedColumn {
    pub strategy: String,
    pub filled: usize,
    pub remaining_missing: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImputationOutcome {
    pub columns: BTreeMap<String, ImputedColumn>,
    pub errors: Vec<ColumnFailure>,
}

/// How to treat detected outliers in one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Remove,
    Cap,
    Winsorize,
    #[serde(rename = "zscore")]
    ZScore,
}

impl OutlierMethod {
    pub fn name(&self) -> &'static str {
        match self {
            OutlierMethod::Remove => "remove",
            OutlierMethod::Cap => "cap",
            OutlierMethod::Winsorize => "winsorize",
            OutlierMethod::ZScore => "zscore",
        }
    }
}

/// Analyst-facing outlier-treatment configuration (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierConfig {
    pub columns: BTreeMap<String, OutlierMethod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreatedColumn {
    pub method: String,
    pub affected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
    pub rows_after: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierTreatmentOutcome {
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns: BTreeMap<String, TreatedColumn>,
    pub errors: Vec<ColumnFailure>,
}

/// One validation rule loaded from the analyst's rule set (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Required {
        column: String,
    },
    Unique {
        column: String,
    },
    AllowedValues {
        column: String,
        values: Vec<String>,
    },
}

impl ValidationRule {
    fn column(&self) -> &str {
        match self {
            ValidationRule::Range { column, .. }
            | ValidationRule::Required { column }
            | ValidationRule::Unique { column }
            | ValidationRule::AllowedValues { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub rules: Vec<ValidationRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub passed: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<ColumnFailure>,
}

#[derive(Debug, Clone, Copy)]
struct IqrFences {
    lower: f64,
    upper: f64,
}

fn iqr_fences(values: &[f64]) -> Option<IqrFences> {
    let q1 = numeric::percentile(values, 0.25)?;
    let q3 = numeric::percentile(values, 0.75)?;
    let iqr = q3 - q1;
    Some(IqrFences {
        lower: q1 - IQR_FENCE_FACTOR * iqr,
        upper: q3 + IQR_FENCE_FACTOR * iqr,
    })
}

fn mechanism_for(percentage: f64) -> MissingMechanism {
    if percentage < MCAR_BELOW_PERCENT {
        MissingMechanism::Mcar
    } else if percentage < MAR_BELOW_PERCENT {
        MissingMechanism::Mar
    } else {
        MissingMechanism::Mnar
    }
}

/// Missingness per column with mechanism labels and strategy
/// suggestions for every column that has at least one missing value.
pub fn analyze_missingness(dataset: &Dataset) -> MissingnessReport {
    let total_rows = dataset.row_count();
    let mut columns = BTreeMap::new();
    let mut suggestions = BTreeMap::new();
    for column in dataset.columns() {
        let count = column.missing_count();
        let percentage = if total_rows == 0 {
            0.0
        } else {
            round_to(count as f64 * 100.0 / total_rows as f64, 2)
        };
        columns.insert(
            column.name.clone(),
            MissingnessEntry {
                count,
                percentage,
                mechanism: mechanism_for(percentage),
            },
        );
        if count > 0 {
            let suggestion = match column.kind() {
                ColumnKind::Numeric => {
                    if percentage < MEAN_SUGGESTION_BELOW_PERCENT {
                        "mean"
                    } else {
                        "median"
                    }
                }
                _ => "mode",
            };
            suggestions.insert(column.name.clone(), suggestion.to_string());
        }
    }
    MissingnessReport {
        total_rows,
        columns,
        suggestions,
    }
}

/// Tukey IQR outlier detection over every numeric column.
pub fn detect_outliers(dataset: &Dataset) -> OutlierReport {
    let mut columns = BTreeMap::new();
    for column in dataset.columns() {
        if column.kind() != ColumnKind::Numeric {
            continue;
        }
        let present = column.present_numeric();
        let Some(fences) = iqr_fences(&present) else {
            continue;
        };
        let offenders: Vec<f64> = present
            .iter()
            .copied()
            .filter(|v| *v < fences.lower || *v > fences.upper)
            .collect();
        if offenders.is_empty() {
            continue;
        }
        columns.insert(
            column.name.clone(),
            OutlierEntry {
                count: offenders.len(),
                lower_bound: round_to(fences.lower, 2),
                upper_bound: round_to(fences.upper, 2),
                values: offenders
                    .into_iter()
                    .take(REPORTED_OUTLIER_VALUES)
                    .collect(),
            },
        );
    }
    OutlierReport { columns }
}

/// Combined quality report: shape, kinds, missingness, and outliers.
pub fn quality_report(dataset: &Dataset) -> QualityReport {
    let column_kinds = dataset
        .columns()
        .iter()
        .map(|c| (c.name.clone(), c.kind()))
        .collect();
    QualityReport {
        total_rows: dataset.row_count(),
        total_columns: dataset.column_count(),
        column_kinds,
        missingness: analyze_missingness(dataset),
        outliers: detect_outliers(dataset),
    }
}

/// Applies per-column imputation strategies, collecting per-column
/// failures without aborting the rest.
pub fn impute(dataset: &Dataset, config: &ImputeConfig) -> (Dataset, ImputationOutcome) {
    let mut current = dataset.clone();
    let mut columns = BTreeMap::new();
    let mut errors = Vec::new();
    for (name, strategy) in &config.columns {
        let before = match current.column(name) {
            Ok(c) => c.missing_count(),
            Err(err) => {
                errors.push(ColumnFailure::new(name.clone(), &err));
                continue;
            }
        };
        match impute_column(&current, name, strategy) {
            Ok(values) => {
                let after = values.missing_count();
                match current.replace_column(name, values) {
                    Ok(updated) => {
                        current = updated;
                        columns.insert(
                            name.clone(),
                            ImputedColumn {
                                strategy: strategy.name().to_string(),
                                filled: before.saturating_sub(after),
                                remaining_missing: after,
                            },
                        );
                    }
                    Err(err) => errors.push(ColumnFailure::new(name.clone(), &err)),
                }
            }
            Err(err) => errors.push(ColumnFailure::new(name.clone(), &err)),
        }
    }
    (current, ImputationOutcome { columns, errors })
}

fn impute_column(dataset: &Dataset, name: &str, strategy: &ImputeStrategy) -> Result<ColumnValues> {
    let column = dataset.column(name)?;
    match strategy {
        ImputeStrategy::Mean => {
            let cells = numeric_cells(column)?;
            let fill = numeric::mean(&column.present_numeric());
            Ok(ColumnValues::Numeric(fill_with(cells, fill)))
        }
        ImputeStrategy::Median => {
            let cells = numeric_cells(column)?;
            let fill = numeric::median(&column.present_numeric());
            Ok(ColumnValues::Numeric(fill_with(cells, fill)))
        }
        ImputeStrategy::Mode => Ok(mode_fill(&column.values)),
        ImputeStrategy::ForwardFill => Ok(fill_directional(&column.values, false)),
        ImputeStrategy::BackwardFill => Ok(fill_directional(&column.values, true)),
        ImputeStrategy::Knn { k } => {
            numeric_cells(column)?;
            Ok(ColumnValues::Numeric(knn_impute(dataset, name, *k)?))
        }
        ImputeStrategy::Literal { value } => literal_fill(column, value),
    }
}

fn numeric_cells(column: &Column) -> Result<&[Option<f64>]> {
    column
        .as_numeric()
        .ok_or_else(|| PipelineError::invalid_column_type(&column.name, "numeric"))
}

fn fill_with(cells: &[Option<f64>], fill: Option<f64>) -> Vec<Option<f64>> {
    match fill {
        Some(fill) => cells.iter().map(|c| c.or(Some(fill))).collect(),
        None => cells.to_vec(),
    }
}

fn fill_directional(values: &ColumnValues, backward: bool) -> ColumnValues {
    fn run<T: Clone>(cells: &[Option<T>], backward: bool) -> Vec<Option<T>> {
        let mut filled: Vec<Option<T>> = vec![None; cells.len()];
        let mut last: Option<T> = None;
        let indices: Vec<usize> = if backward {
            (0..cells.len()).rev().collect()
        } else {
            (0..cells.len()).collect()
        };
        for idx in indices {
            if let Some(v) = &cells[idx] {
                last = Some(v.clone());
            }
            filled[idx] = cells[idx].clone().or_else(|| last.clone());
        }
        filled
    }
    match values {
        ColumnValues::Numeric(v) => ColumnValues::Numeric(run(v, backward)),
        ColumnValues::Categorical(v) => ColumnValues::Categorical(run(v, backward)),
        ColumnValues::Boolean(v) => ColumnValues::Boolean(run(v, backward)),
        ColumnValues::DateTime(v) => ColumnValues::DateTime(run(v, backward)),
    }
}

fn mode_fill(values: &ColumnValues) -> ColumnValues {
    fn mode_of<T: Clone>(cells: &[Option<T>], cmp: fn(&T, &T) -> std::cmp::Ordering) -> Option<T> {
        let mut present: Vec<T> = cells.iter().flatten().cloned().collect();
        if present.is_empty() {
            return None;
        }
        present.sort_by(cmp);
        let mut best = present[0].clone();
        let mut best_count = 0usize;
        let mut idx = 0;
        while idx < present.len() {
            let mut end = idx + 1;
            while end < present.len() && cmp(&present[end], &present[idx]).is_eq() {
                end += 1;
            }
            // strictly greater keeps the smallest value on ties
            if end - idx > best_count {
                best_count = end - idx;
                best = present[idx].clone();
            }
            idx = end;
        }
        Some(best)
    }
    fn fill<T: Clone>(cells: &[Option<T>], fill: Option<T>) -> Vec<Option<T>> {
        match fill {
            Some(fill) => cells
                .iter()
                .map(|c| c.clone().or_else(|| Some(fill.clone())))
                .collect(),
            None => cells.to_vec(),
        }
    }
    match values {
        ColumnValues::Numeric(v) => {
            let m = mode_of(v, f64::total_cmp);
            ColumnValues::Numeric(fill(v, m))
        }
        ColumnValues::Categorical(v) => {
            let m = mode_of(v, Ord::cmp);
            ColumnValues::Categorical(fill(v, m))
        }
        ColumnValues::Boolean(v) => {
            let m = mode_of(v, Ord::cmp);
            ColumnValues::Boolean(fill(v, m))
        }
        ColumnValues::DateTime(v) => {
            let m = mode_of(v, Ord::cmp);
            ColumnValues::DateTime(fill(v, m))
        }
    }
}

fn literal_fill(column: &Column, value: &str) -> Result<ColumnValues> {
    let parse_err = || {
        PipelineError::Parse(format!(
            "literal '{}' does not parse as {} for column '{}'",
            value,
            column.kind(),
            column.name
        ))
    };
    match &column.values {
        ColumnValues::Numeric(cells) => {
            let fill: f64 = value.trim().parse().map_err(|_| parse_err())?;
            Ok(ColumnValues::Numeric(fill_with(cells, Some(fill))))
        }
        ColumnValues::Categorical(cells) => Ok(ColumnValues::Categorical(
            cells
                .iter()
                .map(|c| c.clone().or_else(|| Some(value.to_string())))
                .collect(),
        )),
        ColumnValues::Boolean(cells) => {
            let fill = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => true,
                "false" | "no" => false,
                _ => return Err(parse_err()),
            };
            Ok(ColumnValues::Boolean(
                cells.iter().map(|c| c.or(Some(fill))).collect(),
            ))
        }
        ColumnValues::DateTime(cells) => {
            let trimmed = value.trim();
            let fill = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .ok()
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .ok_or_else(parse_err)?;
            Ok(ColumnValues::DateTime(
                cells.iter().map(|c| c.or(Some(fill))).collect(),
            ))
        }
    }
}

/// KNN imputation over nan-Euclidean distance across the numeric
/// columns, averaging the k nearest donors that have the target
/// present. Falls back to the column mean when no donor shares a
/// present coordinate with the row being filled.
fn knn_impute(dataset: &Dataset, target: &str, k: usize) -> Result<Vec<Option<f64>>> {
    let target_cells = dataset.numeric_column(target)?;
    let features: Vec<&[Option<f64>]> = dataset
        .columns()
        .iter()
        .filter_map(Column::as_numeric)
        .collect();
    let n_features = features.len();
    let rows = dataset.row_count();
    let fallback = numeric::mean(
        &target_cells
            .iter()
            .copied()
            .flatten()
            .collect::<Vec<f64>>(),
    );
    let donors: Vec<(usize, f64)> = target_cells
        .iter()
        .enumerate()
        .filter_map(|(row, cell)| cell.map(|v| (row, v)))
        .collect();

    let mut result = target_cells.to_vec();
    let k = k.max(1);
    for row in 0..rows {
        if target_cells[row].is_some() {
            continue;
        }
        let mut scored: Vec<(f64, usize, f64)> = Vec::new();
        for (donor, value) in &donors {
            if let Some(distance) = nan_euclidean(&features, row, *donor, n_features) {
                scored.push((distance, *donor, *value));
            }
        }
        if scored.is_empty() {
            result[row] = fallback;
            continue;
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let neighbours: Vec<f64> = scored.iter().take(k).map(|(_, _, v)| *v).collect();
        result[row] = numeric::mean(&neighbours);
    }
    Ok(result)
}

/// Distance over coordinates present in both rows, scaled up by the
/// share of absent coordinates; `None` when no coordinate overlaps.
fn nan_euclidean(
    features: &[&[Option<f64>]],
    a: usize,
    b: usize,
    n_features: usize,
) -> Option<f64> {
    let mut present = 0usize;
    let mut sum_sq = 0.0;
    for column in features {
        if let (Some(x), Some(y)) = (column[a], column[b]) {
            present += 1;
            sum_sq += (x - y) * (x - y);
        }
    }
    if present == 0 {
        None
    } else {
        Some((sum_sq * n_features as f64 / present as f64).sqrt())
    }
}

/// Applies per-column outlier treatments in configuration order.
/// Row-dropping methods shrink the dataset for every later column.
pub fn handle_outliers(dataset: &Dataset, config: &OutlierConfig) -> (Dataset, OutlierTreatmentOutcome) {
    let rows_before = dataset.row_count();
    let mut current = dataset.clone();
    let mut columns = BTreeMap::new();
    let mut errors = Vec::new();
    for (name, method) in &config.columns {
        match treat_column(&current, name, *method) {
            Ok((updated, treated)) => {
                current = updated;
                columns.insert(name.clone(), treated);
            }
            Err(err) => errors.push(ColumnFailure::new(name.clone(), &err)),
        }
    }
    let outcome = OutlierTreatmentOutcome {
        rows_before,
        rows_after: current.row_count(),
        columns,
        errors,
    };
    (current, outcome)
}

fn treat_column(dataset: &Dataset, name: &str, method: OutlierMethod) -> Result<(Dataset, TreatedColumn)> {
    let cells = dataset.numeric_column(name)?;
    let present: Vec<f64> = cells.iter().copied().flatten().collect();
    match method {
        OutlierMethod::Remove => {
            let Some(fences) = iqr_fences(&present) else {
                return Ok((dataset.clone(), untouched(method, None, None, dataset.row_count())));
            };
            // rows with a missing value are never dropped
            let keep: Vec<bool> = cells
                .iter()
                .map(|c| c.map_or(true, |v| v >= fences.lower && v <= fences.upper))
                .collect();
            let affected = keep.iter().filter(|k| !**k).count();
            let updated = dataset.retain_rows(&keep);
            let rows_after = updated.row_count();
            Ok((
                updated,
                TreatedColumn {
                    method: method.name().to_string(),
                    affected,
                    lower_bound: Some(round_to(fences.lower, 2)),
                    upper_bound: Some(round_to(fences.upper, 2)),
                    rows_after,
                },
            ))
        }
        OutlierMethod::ZScore => {
            let (Some(mean), Some(std)) = (numeric::mean(&present), numeric::population_std(&present))
            else {
                return Ok((dataset.clone(), untouched(method, None, None, dataset.row_count())));
            };
            if std == 0.0 {
                return Ok((dataset.clone(), untouched(method, None, None, dataset.row_count())));
            }
            let keep: Vec<bool> = cells
                .iter()
                .map(|c| c.map_or(true, |v| ((v - mean) / std).abs() < ZSCORE_CUTOFF))
                .collect();
            let affected = keep.iter().filter(|k| !**k).count();
            let updated = dataset.retain_rows(&keep);
            let rows_after = updated.row_count();
            Ok((
                updated,
                TreatedColumn {
                    method: method.name().to_string(),
                    affected,
                    lower_bound: Some(round_to(mean - ZSCORE_CUTOFF * std, 2)),
                    upper_bound: Some(round_to(mean + ZSCORE_CUTOFF * std, 2)),
                    rows_after,
                },
            ))
        }
        OutlierMethod::Cap => {
            let Some(fences) = iqr_fences(&present) else {
                return Ok((dataset.clone(), untouched(method, None, None, dataset.row_count())));
            };
            clip_column(dataset, name, cells, method, fences.lower, fences.upper)
        }
        OutlierMethod::Winsorize => {
            let (Some(lower), Some(upper)) = (
                numeric::percentile(&present, WINSOR_LOWER),
                numeric::percentile(&present, WINSOR_UPPER),
            ) else {
                return Ok((dataset.clone(), untouched(method, None, None, dataset.row_count())));
            };
            clip_column(dataset, name, cells, method, lower, upper)
        }
    }
}

fn untouched(
    method: OutlierMethod,
    lower: Option<f64>,
    upper: Option<f64>,
    rows_after: usize,
) -> TreatedColumn {
    TreatedColumn {
        method: method.name().to_string(),
        affected: 0,
        lower_bound: lower,
        upper_bound: upper,
        rows_after,
    }
}

fn clip_column(
    dataset: &Dataset,
    name: &str,
    cells: &[Option<f64>],
    method: OutlierMethod,
    lower: f64,
    upper: f64,
) -> Result<(Dataset, TreatedColumn)> {
    let mut affected = 0usize;
    let clipped: Vec<Option<f64>> = cells
        .iter()
        .map(|c| {
            c.map(|v| {
                if v < lower {
                    affected += 1;
                    lower
                } else if v > upper {
                    affected += 1;
                    upper
                } else {
                    v
                }
            })
        })
        .collect();
    let updated = dataset.replace_column(name, ColumnValues::Numeric(clipped))?;
    let rows_after = updated.row_count();
    Ok((
        updated,
        TreatedColumn {
            method: method.name().to_string(),
            affected,
            lower_bound: Some(round_to(lower, 2)),
            upper_bound: Some(round_to(upper, 2)),
            rows_after,
        },
    ))
}

/// Evaluates validation rules. Unknown columns and kind mismatches are
/// collected as errors; violated rules count as failed with a warning
/// describing the violation.
pub fn validate(dataset: &Dataset, config: &ValidationConfig) -> ValidationOutcome {
    let mut outcome = ValidationOutcome {
        passed: 0,
        failed: 0,
        warnings: Vec::new(),
        errors: Vec::new(),
    };
    for rule in &config.rules {
        let name = rule.column().to_string();
        let column = match dataset.column(&name) {
            Ok(column) => column,
            Err(err) => {
                outcome.errors.push(ColumnFailure::new(name, &err));
                continue;
            }
        };
        match rule {
            ValidationRule::Range { min, max, .. } => {
                let cells = match column.as_numeric() {
                    Some(cells) => cells,
                    None => {
                        let err = PipelineError::invalid_column_type(&name, "numeric");
                        outcome.errors.push(ColumnFailure::new(name, &err));
                        continue;
                    }
                };
                let violations = cells
                    .iter()
                    .copied()
                    .flatten()
                    .filter(|v| min.is_some_and(|m| *v < m) || max.is_some_and(|m| *v > m))
                    .count();
                record(&mut outcome, violations, || {
                    format!(
                        "column '{}': {} value(s) outside range [{}, {}]",
                        name,
                        violations,
                        min.map(|m| m.to_string()).unwrap_or_else(|| "-inf".into()),
                        max.map(|m| m.to_string()).unwrap_or_else(|| "inf".into()),
                    )
                });
            }
            ValidationRule::Required { .. } => {
                let missing = column.missing_count();
                record(&mut outcome, missing, || {
                    format!("column '{name}': {missing} missing value(s)")
                });
            }
            ValidationRule::Unique { .. } => {
                let values = column.display_values();
                let present: Vec<&String> = values.iter().flatten().collect();
                let distinct: BTreeSet<&String> = present.iter().copied().collect();
                let duplicates = present.len() - distinct.len();
                record(&mut outcome, duplicates, || {
                    format!("column '{name}': {duplicates} duplicate value(s)")
                });
            }
            ValidationRule::AllowedValues { values, .. } => {
                let allowed: BTreeSet<&str> = values.iter().map(String::as_str).collect();
                let violations = column
                    .display_values()
                    .iter()
                    .flatten()
                    .filter(|v| !allowed.contains(v.as_str()))
                    .count();
                record(&mut outcome, violations, || {
                    format!("column '{name}': {violations} value(s) outside the allowed set")
                });
            }
        }
    }
    outcome
}

fn record(outcome: &mut ValidationOutcome, violations: usize, message: impl FnOnce() -> String) {
    if violations == 0 {
        outcome.passed += 1;
    } else {
        outcome.failed += 1;
        outcome.warnings.push(message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_dataset(name: &str, values: Vec<Option<f64>>) -> Dataset {
        Dataset::new(vec![Column::numeric(name, values)]).unwrap()
    }

    #[test]
    fn fences_match_worked_example() {
        let values = [10.0, 12.0, 11.0, 13.0, 1000.0];
        let fences = iqr_fences(&values).unwrap();
        assert_eq!(fences.lower, 8.0);
        assert_eq!(fences.upper, 16.0);
    }

    #[test]
    fn mechanism_buckets_use_documented_bounds() {
        assert_eq!(mechanism_for(0.0), MissingMechanism::Mcar);
        assert_eq!(mechanism_for(4.99), MissingMechanism::Mcar);
        assert_eq!(mechanism_for(5.0), MissingMechanism::Mar);
        assert_eq!(mechanism_for(19.99), MissingMechanism::Mar);
        assert_eq!(mechanism_for(20.0), MissingMechanism::Mnar);
    }

    #[test]
    fn mode_tie_breaks_toward_smaller_value() {
        let values = ColumnValues::Numeric(vec![Some(2.0), Some(1.0), Some(2.0), Some(1.0), None]);
        let filled = mode_fill(&values);
        match filled {
            ColumnValues::Numeric(v) => assert_eq!(v[4], Some(1.0)),
            other => panic!("expected numeric column, got {other:?}"),
        }
    }

    #[test]
    fn forward_fill_leaves_leading_missing() {
        let values = ColumnValues::Numeric(vec![None, Some(1.0), None, Some(3.0), None]);
        match fill_directional(&values, false) {
            ColumnValues::Numeric(v) => {
                assert_eq!(v, vec![None, Some(1.0), Some(1.0), Some(3.0), Some(3.0)]);
            }
            other => panic!("expected numeric column, got {other:?}"),
        }
        match fill_directional(&values, true) {
            ColumnValues::Numeric(v) => {
                assert_eq!(v, vec![Some(1.0), Some(1.0), Some(3.0), Some(3.0), None]);
            }
            other => panic!("expected numeric column, got {other:?}"),
        }
    }

    #[test]
    fn fully_missing_column_is_left_as_is() {
        let ds = numeric_dataset("v", vec![None, None, None]);
        let config = ImputeConfig {
            columns: BTreeMap::from([("v".to_string(), ImputeStrategy::Mean)]),
        };
        let (imputed, outcome) = impute(&ds, &config);
        assert_eq!(imputed.column("v").unwrap().missing_count(), 3);
        let entry = &outcome.columns["v"];
        assert_eq!(entry.filled, 0);
        assert_eq!(entry.remaining_missing, 3);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn nan_euclidean_scales_by_absent_share() {
        // two of three coordinates shared: d = sqrt((9 + 16) * 3 / 2)
        let features: Vec<&[Option<f64>]> = vec![
            &[Some(0.0), Some(3.0)],
            &[Some(0.0), Some(4.0)],
            &[None, Some(9.0)],
        ];
        let d = nan_euclidean(&features, 0, 1, 3).unwrap();
        assert!((d - (25.0_f64 * 3.0 / 2.0).sqrt()).abs() < 1e-12);

        let disjoint: Vec<&[Option<f64>]> = vec![&[Some(1.0), None], &[None, Some(2.0)]];
        assert!(nan_euclidean(&disjoint, 0, 1, 2).is_none());
    }
}
