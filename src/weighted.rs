//! Weighted statistics engine: design-weighted estimation with Kish
//! effective sample sizes, crosstabs, population projection, subgroup
//! breakdowns, and hypothesis tests.
//!
//! ## Responsibilities
//!
//! - Weighted mean / standard error / 95% CI with
//!   `n_eff = (sum w)^2 / sum w^2`
//! - Weighted category proportions with CI clipped to `[0, 1]`
//! - Weighted crosstab cells with a chi-squared independence test run
//!   on the unweighted contingency table (the weighting adjusts the
//!   reported shares, not the test)
//! - Population totals via `population_size / sum(weights)` scaling
//! - Subgroup estimates with per-group failures collected
//! - Hypothesis tests with auto-selection: correlation for two numeric
//!   variables, pooled t-test for numeric against two groups, one-way
//!   ANOVA above two groups, chi-squared otherwise
//!
//! Rows missing the analysis value or the weight are dropped pair-wise;
//! unit weights apply when no weight column is nominated. A nominated
//! weight column that is absent or non-numeric is an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{ColumnKind, Dataset};
use crate::error::{ColumnFailure, PipelineError, Result};
use crate::numeric::{self, Z_95, round_to};

const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// A point estimate with its design-adjusted uncertainty.
#[derive(Debug, Clone, Serialize)]
pub struct PointEstimate {
    pub n: usize,
    pub n_effective: f64,
    pub mean: f64,
    pub se: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// A weighted category share with its clipped confidence interval.
#[derive(Debug, Clone, Serialize)]
pub struct ProportionEstimate {
    pub variable: String,
    pub category: String,
    pub n: usize,
    pub n_effective: f64,
    pub proportion: f64,
    pub percentage: f64,
    pub se: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub dof: usize,
    pub p_value: f64,
    pub significant: bool,
    pub yates_correction: bool,
}

/// Weighted crosstab of two variables. The chi-squared test, when the
/// table is at least 2x2, runs on the unweighted counts.
#[derive(Debug, Clone, Serialize)]
pub struct CrosstabResult {
    pub row_variable: String,
    pub col_variable: String,
    pub n: usize,
    pub table: BTreeMap<String, BTreeMap<String, f64>>,
    pub proportions: BTreeMap<String, BTreeMap<String, f64>>,
    pub percentages: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chi_square: Option<ChiSquareResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryEstimate {
    pub proportion: f64,
    pub percentage: f64,
    pub estimated_count: f64,
}

/// Per-variable population projection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableEstimate {
    Continuous {
        n: usize,
        n_effective: f64,
        mean: f64,
        se: f64,
        ci_lower: f64,
        ci_upper: f64,
        estimated_total: f64,
        total_ci_lower: f64,
        total_ci_upper: f64,
    },
    Categorical {
        n: usize,
        categories: BTreeMap<String, CategoryEstimate>,
    },
}

/// Projection of sample estimates onto a known population size.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationReport {
    pub population_size: f64,
    pub weight_variable: String,
    pub sum_of_weights: f64,
    pub scaling_factor: f64,
    pub variables: BTreeMap<String, VariableEstimate>,
    pub errors: Vec<ColumnFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub error: String,
}

/// Weighted estimates of a target variable split by a grouping
/// variable.
#[derive(Debug, Clone, Serialize)]
pub struct SubgroupReport {
    pub target: String,
    pub group_by: String,
    pub groups: BTreeMap<String, PointEstimate>,
    pub failures: Vec<GroupFailure>,
}

/// Statistical test families the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Correlation,
    #[serde(rename = "ttest")]
    TTest,
    Anova,
    ChiSquare,
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TestKind::Correlation => "correlation",
            TestKind::TTest => "ttest",
            TestKind::Anova => "anova",
            TestKind::ChiSquare => "chi_square",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMean {
    pub group: String,
    pub n: usize,
    pub mean: f64,
}

/// Outcome of one hypothesis test. `statistic` is omitted when the
/// test degenerates (for example a perfect correlation), in which case
/// the p-value carries the conclusion.
#[derive(Debug, Clone, Serialize)]
pub struct HypothesisTestResult {
    pub variable_1: String,
    pub variable_2: String,
    pub test: TestKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistic: Option<f64>,
    pub p_value: f64,
    pub significant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dof: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dof_between: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dof_within: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupMean>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProportionSpec {
    pub variable: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosstabSpec {
    pub row: String,
    pub col: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupSpec {
    pub target: String,
    pub group_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSpec {
    pub size: f64,
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub variable_1: String,
    pub variable_2: String,
    #[serde(default)]
    pub test: Option<TestKind>,
}

/// Analyst-facing estimation configuration (YAML). An empty variable
/// list means every numeric column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateConfig {
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub proportions: Vec<ProportionSpec>,
    #[serde(default)]
    pub crosstabs: Vec<CrosstabSpec>,
    #[serde(default)]
    pub subgroups: Vec<SubgroupSpec>,
    #[serde(default)]
    pub population: Option<PopulationSpec>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// Combined stage-four payload.
#[derive(Debug, Clone, Serialize)]
pub struct WeightedStatisticsReport {
    pub weight_variable: Option<String>,
    pub means: BTreeMap<String, PointEstimate>,
    pub proportions: Vec<ProportionEstimate>,
    pub crosstabs: Vec<CrosstabResult>,
    pub subgroups: Vec<SubgroupReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<PopulationReport>,
    pub tests: Vec<HypothesisTestResult>,
    pub errors: Vec<ColumnFailure>,
}

/// Resolves the weight cells for pair-wise joins: unit weights when no
/// column is nominated, typed errors when the nominated column is
/// absent or not numeric.
fn weight_cells(dataset: &Dataset, weight: Option<&str>) -> Result<Vec<Option<f64>>> {
    match weight {
        Some(name) => Ok(dataset.numeric_column(name)?.to_vec()),
        None => Ok(vec![Some(1.0); dataset.row_count()]),
    }
}

fn kish_estimate(pairs: &[(f64, f64)]) -> Result<PointEstimate> {
    if pairs.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no rows with both a value and a weight".to_string(),
        ));
    }
    let sum_w: f64 = pairs.iter().map(|(_, w)| w).sum();
    if sum_w <= 0.0 {
        return Err(PipelineError::InsufficientData(
            "weights sum to zero".to_string(),
        ));
    }
    let sum_w_sq: f64 = pairs.iter().map(|(_, w)| w * w).sum();
    let n_effective = sum_w * sum_w / sum_w_sq;
    let mean = pairs.iter().map(|(x, w)| x * w).sum::<f64>() / sum_w;
    let variance = pairs.iter().map(|(x, w)| w * (x - mean).powi(2)).sum::<f64>() / sum_w;
    let se = (variance / n_effective).sqrt();
    Ok(PointEstimate {
        n: pairs.len(),
        n_effective: round_to(n_effective, 2),
        mean: round_to(mean, 4),
        se: round_to(se, 4),
        ci_lower: round_to(mean - Z_95 * se, 4),
        ci_upper: round_to(mean + Z_95 * se, 4),
    })
}

/// Design-weighted mean of a numeric variable.
pub fn weighted_mean(dataset: &Dataset, variable: &str, weight: Option<&str>) -> Result<PointEstimate> {
    let values = dataset.numeric_column(variable)?;
    let weights = weight_cells(dataset, weight)?;
    let pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(&weights)
        .filter_map(|(v, w)| v.zip(*w))
        .collect();
    kish_estimate(&pairs)
}

/// Design-weighted share of rows equal to `category`, matched on the
/// value's display string.
pub fn weighted_proportion(
    dataset: &Dataset,
    variable: &str,
    category: &str,
    weight: Option<&str>,
) -> Result<ProportionEstimate> {
    let column = dataset.column(variable)?;
    let weights = weight_cells(dataset, weight)?;
    let pairs: Vec<(bool, f64)> = (0..dataset.row_count())
        .filter_map(|row| {
            let value = column.values.display_at(row)?;
            let w = weights[row]?;
            Some((value == category, w))
        })
        .collect();
    if pairs.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "no rows with both '{variable}' and a weight"
        )));
    }
    let sum_w: f64 = pairs.iter().map(|(_, w)| w).sum();
    if sum_w <= 0.0 {
        return Err(PipelineError::InsufficientData(
            "weights sum to zero".to_string(),
        ));
    }
    let sum_w_sq: f64 = pairs.iter().map(|(_, w)| w * w).sum();
    let n_effective = sum_w * sum_w / sum_w_sq;
    let p = pairs
        .iter()
        .filter(|(is_match, _)| *is_match)
        .map(|(_, w)| w)
        .sum::<f64>()
        / sum_w;
    let se = (p * (1.0 - p) / n_effective).sqrt();
    Ok(ProportionEstimate {
        variable: variable.to_string(),
        category: category.to_string(),
        n: pairs.len(),
        n_effective: round_to(n_effective, 2),
        proportion: round_to(p, 4),
        percentage: round_to(p * 100.0, 2),
        se: round_to(se, 4),
        ci_lower: round_to((p - Z_95 * se).max(0.0), 4),
        ci_upper: round_to((p + Z_95 * se).min(1.0), 4),
    })
}

fn chi_square_from_counts(
    observed: &BTreeMap<String, BTreeMap<String, f64>>,
) -> Result<ChiSquareResult> {
    let row_keys: Vec<&String> = observed.keys().collect();
    let col_keys: Vec<&String> = observed
        .values()
        .flat_map(|cols| cols.keys())
        .collect::<std::collections::BTreeSet<&String>>()
        .into_iter()
        .collect();
    let rows = row_keys.len();
    let cols = col_keys.len();
    if rows < 2 || cols < 2 {
        return Err(PipelineError::InsufficientData(
            "contingency table needs at least two rows and two columns".to_string(),
        ));
    }
    let mut row_totals = vec![0.0; rows];
    let mut col_totals = vec![0.0; cols];
    let mut total = 0.0;
    let mut table = vec![vec![0.0; cols]; rows];
    for (i, row_key) in row_keys.iter().enumerate() {
        for (j, col_key) in col_keys.iter().enumerate() {
            let count = observed
                .get(*row_key)
                .and_then(|cols| cols.get(*col_key))
                .copied()
                .unwrap_or(0.0);
            table[i][j] = count;
            row_totals[i] += count;
            col_totals[j] += count;
            total += count;
        }
    }
    if total <= 0.0 {
        return Err(PipelineError::InsufficientData(
            "contingency table is empty".to_string(),
        ));
    }
    let dof = (rows - 1) * (cols - 1);
    let yates = dof == 1;
    let mut statistic = 0.0;
    for i in 0..rows {
        for j in 0..cols {
            let expected = row_totals[i] * col_totals[j] / total;
            if expected == 0.0 {
                continue;
            }
            let mut diff = (table[i][j] - expected).abs();
            if yates {
                diff = (diff - 0.5).max(0.0);
            }
            statistic += diff * diff / expected;
        }
    }
    let p_value = numeric::chi_squared_pvalue(statistic, dof as f64)?;
    Ok(ChiSquareResult {
        statistic: round_to(statistic, 4),
        dof,
        p_value: round_to(p_value, 4),
        significant: p_value < SIGNIFICANCE_LEVEL,
        yates_correction: yates,
    })
}

/// Weighted crosstab of two variables with a chi-squared independence
/// test on the unweighted counts.
pub fn crosstab(
    dataset: &Dataset,
    row_variable: &str,
    col_variable: &str,
    weight: Option<&str>,
) -> Result<CrosstabResult> {
    let row_column = dataset.column(row_variable)?;
    let col_column = dataset.column(col_variable)?;
    let weights = weight_cells(dataset, weight)?;

    let mut weighted: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut unweighted: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut n = 0usize;
    let mut total_weight = 0.0;
    for row in 0..dataset.row_count() {
        let (Some(rv), Some(cv), Some(w)) = (
            row_column.values.display_at(row),
            col_column.values.display_at(row),
            weights[row],
        ) else {
            continue;
        };
        n += 1;
        total_weight += w;
        *weighted
            .entry(rv.clone())
            .or_default()
            .entry(cv.clone())
            .or_default() += w;
        *unweighted.entry(rv).or_default().entry(cv).or_default() += 1.0;
    }
    if n == 0 {
        return Err(PipelineError::InsufficientData(format!(
            "no rows with '{row_variable}', '{col_variable}', and a weight"
        )));
    }

    let mut table = BTreeMap::new();
    let mut proportions = BTreeMap::new();
    let mut percentages = BTreeMap::new();
    for (rv, cols) in &weighted {
        let mut t_row = BTreeMap::new();
        let mut p_row = BTreeMap::new();
        let mut pct_row = BTreeMap::new();
        for (cv, w) in cols {
            let share = if total_weight > 0.0 { w / total_weight } else { 0.0 };
            t_row.insert(cv.clone(), round_to(*w, 2));
            p_row.insert(cv.clone(), round_to(share, 4));
            pct_row.insert(cv.clone(), round_to(share * 100.0, 2));
        }
        table.insert(rv.clone(), t_row);
        proportions.insert(rv.clone(), p_row);
        percentages.insert(rv.clone(), pct_row);
    }

    let chi_square = chi_square_from_counts(&unweighted).ok();
    Ok(CrosstabResult {
        row_variable: row_variable.to_string(),
        col_variable: col_variable.to_string(),
        n,
        table,
        proportions,
        percentages,
        chi_square,
    })
}

/// Projects weighted estimates onto a known population size. The
/// weight column is required; unknown analysis variables are collected
/// per variable.
pub fn population_estimate(
    dataset: &Dataset,
    variables: &[String],
    population_size: f64,
    weight: &str,
) -> Result<PopulationReport> {
    let weights = dataset.numeric_column(weight)?;
    let sum_of_weights: f64 = weights.iter().flatten().sum();
    if sum_of_weights <= 0.0 {
        return Err(PipelineError::InsufficientData(
            "weights sum to zero".to_string(),
        ));
    }
    let scaling_factor = population_size / sum_of_weights;

    let mut out = BTreeMap::new();
    let mut errors = Vec::new();
    for variable in variables {
        let column = match dataset.column(variable) {
            Ok(column) => column,
            Err(err) => {
                errors.push(ColumnFailure::new(variable.clone(), &err));
                continue;
            }
        };
        if column.kind() == ColumnKind::Numeric {
            match weighted_mean(dataset, variable, Some(weight)) {
                Ok(est) => {
                    out.insert(
                        variable.clone(),
                        VariableEstimate::Continuous {
                            n: est.n,
                            n_effective: est.n_effective,
                            mean: est.mean,
                            se: est.se,
                            ci_lower: est.ci_lower,
                            ci_upper: est.ci_upper,
                            estimated_total: round_to(est.mean * population_size, 2),
                            total_ci_lower: round_to(est.ci_lower * population_size, 2),
                            total_ci_upper: round_to(est.ci_upper * population_size, 2),
                        },
                    );
                }
                Err(err) => errors.push(ColumnFailure::new(variable.clone(), &err)),
            }
        } else {
            let mut shares: BTreeMap<String, f64> = BTreeMap::new();
            let mut n = 0usize;
            let mut sum_w = 0.0;
            for row in 0..dataset.row_count() {
                let (Some(value), Some(w)) = (column.values.display_at(row), weights[row]) else {
                    continue;
                };
                n += 1;
                sum_w += w;
                *shares.entry(value).or_default() += w;
            }
            if n == 0 || sum_w <= 0.0 {
                let err = PipelineError::InsufficientData(format!(
                    "no rows with both '{variable}' and a weight"
                ));
                errors.push(ColumnFailure::new(variable.clone(), &err));
                continue;
            }
            let categories = shares
                .into_iter()
                .map(|(category, w)| {
                    let p = w / sum_w;
                    (
                        category,
                        CategoryEstimate {
                            proportion: round_to(p, 4),
                            percentage: round_to(p * 100.0, 2),
                            estimated_count: round_to(p * population_size, 0),
                        },
                    )
                })
                .collect();
            out.insert(variable.clone(), VariableEstimate::Categorical { n, categories });
        }
    }

    Ok(PopulationReport {
        population_size,
        weight_variable: weight.to_string(),
        sum_of_weights: round_to(sum_of_weights, 2),
        scaling_factor: round_to(scaling_factor, 4),
        variables: out,
        errors,
    })
}

/// Weighted estimates of `target` within each level of `group_by`.
/// Groups that end up with no usable rows are reported as failures,
/// not errors.
pub fn subgroup_statistics(
    dataset: &Dataset,
    target: &str,
    group_by: &str,
    weight: Option<&str>,
) -> Result<SubgroupReport> {
    let values = dataset.numeric_column(target)?;
    let group_column = dataset.column(group_by)?;
    let weights = weight_cells(dataset, weight)?;

    let mut grouped: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
    for row in 0..dataset.row_count() {
        let Some(group) = group_column.values.display_at(row) else {
            continue;
        };
        let entry = grouped.entry(group).or_default();
        if let (Some(v), Some(w)) = (values[row], weights[row]) {
            entry.push((v, w));
        }
    }
    if grouped.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "no rows with a '{group_by}' value"
        )));
    }

    let mut groups = BTreeMap::new();
    let mut failures = Vec::new();
    for (group, pairs) in grouped {
        match kish_estimate(&pairs) {
            Ok(est) => {
                groups.insert(group, est);
            }
            Err(err) => failures.push(GroupFailure {
                group,
                error: err.to_string(),
            }),
        }
    }
    Ok(SubgroupReport {
        target: target.to_string(),
        group_by: group_by.to_string(),
        groups,
        failures,
    })
}

fn group_values(dataset: &Dataset, numeric_var: &str, group_var: &str) -> Result<Vec<(String, Vec<f64>)>> {
    let values = dataset.numeric_column(numeric_var)?;
    let group_column = dataset.column(group_var)?;
    // first-appearance order
    let mut order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in 0..dataset.row_count() {
        let (Some(group), Some(value)) = (group_column.values.display_at(row), values[row]) else {
            continue;
        };
        if !grouped.contains_key(&group) {
            order.push(group.clone());
        }
        grouped.entry(group).or_default().push(value);
    }
    Ok(order
        .into_iter()
        .map(|g| {
            let values = grouped.remove(&g).unwrap_or_default();
            (g, values)
        })
        .collect())
}

fn distinct_group_count(dataset: &Dataset, variable: &str) -> Result<usize> {
    let column = dataset.column(variable)?;
    let distinct: std::collections::BTreeSet<String> =
        column.display_values().into_iter().flatten().collect();
    Ok(distinct.len())
}

fn select_test(dataset: &Dataset, variable_1: &str, variable_2: &str) -> Result<(TestKind, String, String)> {
    let kind_1 = dataset.column(variable_1)?.kind();
    let kind_2 = dataset.column(variable_2)?.kind();
    let numeric_1 = kind_1 == ColumnKind::Numeric;
    let numeric_2 = kind_2 == ColumnKind::Numeric;
    if numeric_1 && numeric_2 {
        return Ok((
            TestKind::Correlation,
            variable_1.to_string(),
            variable_2.to_string(),
        ));
    }
    // put the numeric variable first for the grouped tests
    let (numeric_var, group_var) = if numeric_1 {
        (variable_1, variable_2)
    } else if numeric_2 {
        (variable_2, variable_1)
    } else {
        return Ok((
            TestKind::ChiSquare,
            variable_1.to_string(),
            variable_2.to_string(),
        ));
    };
    let groups = distinct_group_count(dataset, group_var)?;
    let kind = if groups == 2 {
        TestKind::TTest
    } else {
        TestKind::Anova
    };
    Ok((kind, numeric_var.to_string(), group_var.to_string()))
}

/// Runs a hypothesis test over two variables, auto-selecting the test
/// family unless one is requested explicitly.
pub fn hypothesis_test(
    dataset: &Dataset,
    variable_1: &str,
    variable_2: &str,
    requested: Option<TestKind>,
) -> Result<HypothesisTestResult> {
    let (test, first, second) = match requested {
        Some(test) => {
            // honour the caller's variable order; grouped tests still
            // need the numeric variable first
            match test {
                TestKind::TTest | TestKind::Anova => {
                    let numeric_1 = dataset.column(variable_1)?.kind() == ColumnKind::Numeric;
                    if numeric_1 {
                        (test, variable_1.to_string(), variable_2.to_string())
                    } else {
                        (test, variable_2.to_string(), variable_1.to_string())
                    }
                }
                _ => (test, variable_1.to_string(), variable_2.to_string()),
            }
        }
        None => select_test(dataset, variable_1, variable_2)?,
    };
    match test {
        TestKind::Correlation => correlation_test(dataset, &first, &second),
        TestKind::TTest => t_test(dataset, &first, &second),
        TestKind::Anova => anova_test(dataset, &first, &second),
        TestKind::ChiSquare => chi_square_test(dataset, &first, &second),
    }
}

fn correlation_test(dataset: &Dataset, variable_1: &str, variable_2: &str) -> Result<HypothesisTestResult> {
    let a = dataset.numeric_column(variable_1)?;
    let b = dataset.numeric_column(variable_2)?;
    let pairs: Vec<(f64, f64)> = a.iter().zip(b).filter_map(|(x, y)| x.zip(*y)).collect();
    if pairs.len() < 3 {
        return Err(PipelineError::InsufficientData(format!(
            "correlation of '{variable_1}' and '{variable_2}' needs at least 3 paired rows"
        )));
    }
    let r = numeric::pearson_r(&pairs).ok_or_else(|| {
        PipelineError::InsufficientData(format!(
            "'{variable_1}' or '{variable_2}' has zero variance"
        ))
    })?;
    let dof = (pairs.len() - 2) as f64;
    let denom = 1.0 - r * r;
    let (statistic, p_value) = if denom <= f64::EPSILON {
        // perfectly collinear
        (None, 0.0)
    } else {
        let t = r * (dof / denom).sqrt();
        (Some(round_to(t, 4)), numeric::t_pvalue_two_sided(t, dof)?)
    };
    Ok(HypothesisTestResult {
        variable_1: variable_1.to_string(),
        variable_2: variable_2.to_string(),
        test: TestKind::Correlation,
        statistic,
        p_value: round_to(p_value, 4),
        significant: p_value < SIGNIFICANCE_LEVEL,
        correlation: Some(round_to(r, 3)),
        dof: Some(dof),
        dof_between: None,
        dof_within: None,
        groups: None,
    })
}

fn t_test(dataset: &Dataset, numeric_var: &str, group_var: &str) -> Result<HypothesisTestResult> {
    let groups = group_values(dataset, numeric_var, group_var)?;
    if groups.len() != 2 {
        return Err(PipelineError::InsufficientData(format!(
            "t-test on '{group_var}' needs exactly 2 groups, found {}",
            groups.len()
        )));
    }
    let (name_1, sample_1) = &groups[0];
    let (name_2, sample_2) = &groups[1];
    let n1 = sample_1.len();
    let n2 = sample_2.len();
    if n1 < 2 || n2 < 2 {
        return Err(PipelineError::InsufficientData(
            "each group needs at least 2 observations".to_string(),
        ));
    }
    let (Some(m1), Some(m2), Some(v1), Some(v2)) = (
        numeric::mean(sample_1),
        numeric::mean(sample_2),
        numeric::sample_variance(sample_1),
        numeric::sample_variance(sample_2),
    ) else {
        return Err(PipelineError::InsufficientData(
            "each group needs at least 2 observations".to_string(),
        ));
    };
    let dof = (n1 + n2 - 2) as f64;
    let pooled = ((n1 - 1) as f64 * v1 + (n2 - 1) as f64 * v2) / dof;
    let denom = (pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    let (statistic, p_value) = if denom <= f64::EPSILON {
        if (m1 - m2).abs() <= f64::EPSILON {
            (Some(0.0), 1.0)
        } else {
            (None, 0.0)
        }
    } else {
        let t = (m1 - m2) / denom;
        (Some(round_to(t, 4)), numeric::t_pvalue_two_sided(t, dof)?)
    };
    Ok(HypothesisTestResult {
        variable_1: numeric_var.to_string(),
        variable_2: group_var.to_string(),
        test: TestKind::TTest,
        statistic,
        p_value: round_to(p_value, 4),
        significant: p_value < SIGNIFICANCE_LEVEL,
        correlation: None,
        dof: Some(dof),
        dof_between: None,
        dof_within: None,
        groups: Some(vec![
            GroupMean {
                group: name_1.clone(),
                n: n1,
                mean: round_to(m1, 4),
            },
            GroupMean {
                group: name_2.clone(),
                n: n2,
                mean: round_to(m2, 4),
            },
        ]),
    })
}

fn anova_test(dataset: &Dataset, numeric_var: &str, group_var: &str) -> Result<HypothesisTestResult> {
    let groups = group_values(dataset, numeric_var, group_var)?;
    let k = groups.len();
    if k < 2 {
        return Err(PipelineError::InsufficientData(format!(
            "ANOVA on '{group_var}' needs at least 2 groups, found {k}"
        )));
    }
    let total_n: usize = groups.iter().map(|(_, v)| v.len()).sum();
    if total_n <= k {
        return Err(PipelineError::InsufficientData(
            "ANOVA needs more observations than groups".to_string(),
        ));
    }
    let all: Vec<f64> = groups.iter().flat_map(|(_, v)| v.iter().copied()).collect();
    let grand_mean = numeric::mean(&all).unwrap_or(0.0);
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    let mut group_means = Vec::with_capacity(k);
    for (name, values) in &groups {
        let Some(m) = numeric::mean(values) else {
            return Err(PipelineError::InsufficientData(format!(
                "group '{name}' has no observations"
            )));
        };
        ss_between += values.len() as f64 * (m - grand_mean).powi(2);
        ss_within += values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
        group_means.push(GroupMean {
            group: name.clone(),
            n: values.len(),
            mean: round_to(m, 4),
        });
    }
    let dof_between = (k - 1) as f64;
    let dof_within = (total_n - k) as f64;
    let ms_between = ss_between / dof_between;
    let ms_within = ss_within / dof_within;
    let (statistic, p_value) = if ms_within <= f64::EPSILON {
        if ms_between <= f64::EPSILON {
            (Some(0.0), 1.0)
        } else {
            (None, 0.0)
        }
    } else {
        let f = ms_between / ms_within;
        (
            Some(round_to(f, 4)),
            numeric::f_pvalue(f, dof_between, dof_within)?,
        )
    };
    Ok(HypothesisTestResult {
        variable_1: numeric_var.to_string(),
        variable_2: group_var.to_string(),
        test: TestKind::Anova,
        statistic,
        p_value: round_to(p_value, 4),
        significant: p_value < SIGNIFICANCE_LEVEL,
        correlation: None,
        dof: None,
        dof_between: Some(dof_between),
        dof_within: Some(dof_within),
        groups: Some(group_means),
    })
}

fn chi_square_test(dataset: &Dataset, variable_1: &str, variable_2: &str) -> Result<HypothesisTestResult> {
    let a = dataset.column(variable_1)?;
    let b = dataset.column(variable_2)?;
    let mut observed: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for row in 0..dataset.row_count() {
        let (Some(va), Some(vb)) = (a.values.display_at(row), b.values.display_at(row)) else {
            continue;
        };
        *observed.entry(va).or_default().entry(vb).or_default() += 1.0;
    }
    let result = chi_square_from_counts(&observed)?;
    Ok(HypothesisTestResult {
        variable_1: variable_1.to_string(),
        variable_2: variable_2.to_string(),
        test: TestKind::ChiSquare,
        statistic: Some(result.statistic),
        p_value: result.p_value,
        significant: result.significant,
        correlation: None,
        dof: Some(result.dof as f64),
        dof_between: None,
        dof_within: None,
        groups: None,
    })
}

/// Runs every estimate in the configuration, collecting per-item
/// failures. The nominated weight column itself must be valid.
pub fn run_estimates(dataset: &Dataset, config: &EstimateConfig) -> Result<WeightedStatisticsReport> {
    let weight = config.weight.as_deref();
    // validate the weight column up front so every item fails the same way
    weight_cells(dataset, weight)?;

    let mut errors = Vec::new();
    let mut means = BTreeMap::new();
    let variables: Vec<String> = if config.variables.is_empty() {
        dataset
            .columns()
            .iter()
            .filter(|c| c.kind() == ColumnKind::Numeric && Some(c.name.as_str()) != weight)
            .map(|c| c.name.clone())
            .collect()
    } else {
        config.variables.clone()
    };
    for variable in &variables {
        match weighted_mean(dataset, variable, weight) {
            Ok(est) => {
                means.insert(variable.clone(), est);
            }
            Err(err) => errors.push(ColumnFailure::new(variable.clone(), &err)),
        }
    }

    let mut proportions = Vec::new();
    for spec in &config.proportions {
        match weighted_proportion(dataset, &spec.variable, &spec.category, weight) {
            Ok(est) => proportions.push(est),
            Err(err) => errors.push(ColumnFailure::new(spec.variable.clone(), &err)),
        }
    }

    let mut crosstabs = Vec::new();
    for spec in &config.crosstabs {
        match crosstab(dataset, &spec.row, &spec.col, weight) {
            Ok(result) => crosstabs.push(result),
            Err(err) => errors.push(ColumnFailure::new(spec.row.clone(), &err)),
        }
    }

    let mut subgroups = Vec::new();
    for spec in &config.subgroups {
        match subgroup_statistics(dataset, &spec.target, &spec.group_by, weight) {
            Ok(report) => subgroups.push(report),
            Err(err) => errors.push(ColumnFailure::new(spec.target.clone(), &err)),
        }
    }

    let population = match (&config.population, weight) {
        (Some(spec), Some(weight_name)) => {
            let vars = if spec.variables.is_empty() {
                variables.clone()
            } else {
                spec.variables.clone()
            };
            match population_estimate(dataset, &vars, spec.size, weight_name) {
                Ok(report) => Some(report),
                Err(err) => {
                    errors.push(ColumnFailure::new(weight_name.to_string(), &err));
                    None
                }
            }
        }
        (Some(_), None) => {
            let err = PipelineError::Precondition(
                "population estimates need a weight column".to_string(),
            );
            errors.push(ColumnFailure::new("population".to_string(), &err));
            None
        }
        (None, _) => None,
    };

    let mut tests = Vec::new();
    for spec in &config.tests {
        match hypothesis_test(dataset, &spec.variable_1, &spec.variable_2, spec.test) {
            Ok(result) => tests.push(result),
            Err(err) => errors.push(ColumnFailure::new(spec.variable_1.clone(), &err)),
        }
    }

    Ok(WeightedStatisticsReport {
        weight_variable: config.weight.clone(),
        means,
        proportions,
        crosstabs,
        subgroups,
        population,
        tests,
        errors,
    })
}

/// Renders the weighted means as the summary CSV artifact.
pub fn statistics_summary_csv(report: &WeightedStatisticsReport) -> Vec<u8> {
    // writes to an in-memory buffer, so the record calls cannot fail
    let mut writer = csv::Writer::from_writer(Vec::new());
    let _ = writer.write_record([
        "variable",
        "n",
        "n_effective",
        "mean",
        "se",
        "ci_lower",
        "ci_upper",
    ]);
    for (variable, est) in &report.means {
        let _ = writer.write_record([
            variable.clone(),
            est.n.to_string(),
            est.n_effective.to_string(),
            est.mean.to_string(),
            est.se.to_string(),
            est.ci_lower.to_string(),
            est.ci_upper.to_string(),
        ]);
    }
    writer.into_inner().unwrap_or_default()
}
