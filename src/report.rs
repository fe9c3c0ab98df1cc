//! Report stages: template proposals (stage five), selection
//! validation (stage six), and the final summary payload (stage
//! seven).
//!
//! ## Responsibilities
//!
//! - Propose report templates from the survey type and variable names;
//!   the standard survey report is always recommended, the health
//!   survey report joins it when health-related variables are present,
//!   and the executive summary is always offered without a
//!   recommendation
//! - Validate the analyst's template selection against the catalogue
//! - Assemble the machine-readable `summary.json` payload for the
//!   final stage: dataset shape, per-column missingness, basic
//!   statistics, key findings, and the stage outputs keyed by stage

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::dataset::{ColumnKind, Dataset};
use crate::error::{PipelineError, Result};
use crate::numeric::{self, round_to};

pub const DEFAULT_TEMPLATE: &str = "standard_survey";

const HEALTH_KEYWORDS: [&str; 7] = [
    "health", "disease", "medical", "hospital", "vaccine", "bmi", "blood",
];

/// One proposed report template.
#[derive(Debug, Clone, Serialize)]
pub struct ReportProposal {
    pub template: String,
    pub name: String,
    pub description: String,
    pub sections: Vec<String>,
    pub recommended: bool,
}

/// The stage-five proposal payload.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalSet {
    pub proposals: Vec<ReportProposal>,
    pub default_template: String,
    pub customization_available: bool,
}

fn proposal(
    template: &str,
    name: &str,
    description: &str,
    sections: &[&str],
    recommended: bool,
) -> ReportProposal {
    ReportProposal {
        template: template.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        sections: sections.iter().map(|s| s.to_string()).collect(),
        recommended,
    }
}

fn has_health_variables(variables: &[String]) -> bool {
    variables.iter().any(|name| {
        let lower = name.to_lowercase();
        HEALTH_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
    })
}

/// Proposes report templates for the dataset's variables. A
/// `survey_type` of `health_survey` forces the health template even
/// without matching variable names.
pub fn propose_reports(variables: &[String], survey_type: Option<&str>) -> ProposalSet {
    let mut proposals = vec![proposal(
        "standard_survey",
        "Standard Survey Report",
        "Comprehensive report with all statistics and key indicators",
        &["summary", "demographics", "key_indicators", "statistics", "appendix"],
        true,
    )];
    if survey_type == Some("health_survey") || has_health_variables(variables) {
        proposals.push(proposal(
            "health_survey",
            "Health Survey Report",
            "Specialized report for health and demographic surveys",
            &["summary", "demographics", "health_indicators", "risk_factors", "coverage", "appendix"],
            true,
        ));
    }
    proposals.push(proposal(
        "executive_summary",
        "Executive Summary",
        "Concise summary of key findings",
        &["key_findings", "recommendations"],
        false,
    ));
    ProposalSet {
        proposals,
        default_template: DEFAULT_TEMPLATE.to_string(),
        customization_available: true,
    }
}

const TEMPLATE_IDS: [&str; 3] = ["standard_survey", "health_survey", "executive_summary"];

/// The analyst's confirmed template selection (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSelection {
    pub templates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ReportSelection {
    /// At least one template, all drawn from the catalogue.
    pub fn validate(&self) -> Result<()> {
        if self.templates.is_empty() {
            return Err(PipelineError::Precondition(
                "at least one report template must be selected".to_string(),
            ));
        }
        for template in &self.templates {
            if !TEMPLATE_IDS.contains(&template.as_str()) {
                return Err(PipelineError::Precondition(format!(
                    "unknown report template '{template}'"
                )));
            }
        }
        Ok(())
    }
}

/// Identity fields stamped into the final summary.
#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub workflow_id: Uuid,
    pub document_id: Uuid,
    pub filename: &'a str,
}

fn column_names_of_kind(dataset: &Dataset, kind: ColumnKind) -> Vec<String> {
    dataset
        .columns()
        .iter()
        .filter(|c| c.kind() == kind)
        .map(|c| c.name.clone())
        .collect()
}

fn key_findings(dataset: &Dataset) -> Vec<String> {
    let mut findings = Vec::new();
    let rows = dataset.row_count();
    let cols = dataset.column_count();
    if rows == 0 || cols == 0 {
        return findings;
    }

    let missing_total: usize = dataset.columns().iter().map(|c| c.missing_count()).sum();
    let missing_pct = missing_total as f64 * 100.0 / (rows * cols) as f64;
    findings.push(format!(
        "Overall data completeness: {:.1}%",
        100.0 - missing_pct
    ));

    let complete: Vec<&str> = dataset
        .columns()
        .iter()
        .filter(|c| c.missing_count() == 0)
        .take(5)
        .map(|c| c.name.as_str())
        .collect();
    if !complete.is_empty() {
        findings.push(format!(
            "Completely filled variables: {}",
            complete.join(", ")
        ));
    }

    if let Some(column) = dataset
        .columns()
        .iter()
        .find(|c| c.kind() == ColumnKind::Numeric && c.present_count() > 0)
    {
        let values = column.present_numeric();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = numeric::mean(&values).unwrap_or(0.0);
        findings.push(format!(
            "{} ranges from {min:.2} to {max:.2} with mean {mean:.2}",
            column.name
        ));
    }

    if let Some(column) = dataset
        .columns()
        .iter()
        .find(|c| c.kind() == ColumnKind::Categorical && c.present_count() > 0)
    {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for value in column.display_values().into_iter().flatten() {
            *counts.entry(value).or_default() += 1;
        }
        // BTreeMap order breaks count ties toward the smaller value
        if let Some((mode, _)) = counts.iter().max_by_key(|(_, n)| *n) {
            findings.push(format!("Most common value in {}: {mode}", column.name));
        }
    }

    findings
}

/// Builds the `summary.json` payload: dataset shape and quality plus
/// the recorded stage outputs keyed by stage number.
pub fn final_summary(
    dataset: &Dataset,
    ctx: SummaryContext<'_>,
    stage_outputs: &BTreeMap<u8, Value>,
    generated_at: DateTime<Utc>,
) -> Value {
    let rows = dataset.row_count();

    let mut missing_data = serde_json::Map::new();
    for column in dataset.columns() {
        let count = column.missing_count();
        let percentage = if rows == 0 {
            0.0
        } else {
            round_to(count as f64 * 100.0 / rows as f64, 2)
        };
        missing_data.insert(
            column.name.clone(),
            json!({"count": count, "percentage": percentage}),
        );
    }

    let mut basic_statistics = serde_json::Map::new();
    for column in dataset.columns() {
        if column.kind() != ColumnKind::Numeric {
            continue;
        }
        let values = column.present_numeric();
        let Some(mean) = numeric::mean(&values) else {
            continue;
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std = numeric::sample_std(&values).unwrap_or(0.0);
        basic_statistics.insert(
            column.name.clone(),
            json!({
                "mean": round_to(mean, 2),
                "std": round_to(std, 2),
                "min": round_to(min, 2),
                "max": round_to(max, 2),
            }),
        );
    }

    let stages: BTreeMap<String, &Value> = stage_outputs
        .iter()
        .map(|(n, v)| (n.to_string(), v))
        .collect();

    json!({
        "metadata": {
            "generated_at": generated_at.to_rfc3339(),
            "workflow_id": ctx.workflow_id,
            "document_id": ctx.document_id,
            "filename": ctx.filename,
            "total_records": rows,
            "total_columns": dataset.column_count(),
        },
        "data_types": {
            "numeric": column_names_of_kind(dataset, ColumnKind::Numeric),
            "categorical": column_names_of_kind(dataset, ColumnKind::Categorical),
            "boolean": column_names_of_kind(dataset, ColumnKind::Boolean),
            "datetime": column_names_of_kind(dataset, ColumnKind::DateTime),
        },
        "missing_data": missing_data,
        "basic_statistics": basic_statistics,
        "key_findings": key_findings(dataset),
        "stages": stages,
    })
}
