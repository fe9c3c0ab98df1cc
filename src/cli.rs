use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(author, version, about = "Stage-gated pipeline for weighted survey data", long_about = None)]
pub struct Cli {
    /// Root directory holding workflow records and stage artifacts
    #[arg(long = "data-dir", global = true, default_value = "data")]
    pub data_dir: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload a survey CSV, creating a workflow with stage 1 completed
    Ingest(IngestArgs),
    /// Produce a data quality report (missingness and outliers) for stage 2
    Quality(WorkflowArgs),
    /// Fill missing values using a per-column strategy configuration
    Impute(ConfigArgs),
    /// Detect and treat outliers using a per-column method configuration
    Outliers(ConfigArgs),
    /// Evaluate validation rules against the current dataset
    Validate(ConfigArgs),
    /// Classify variables and surface correlations and key variables (stage 3)
    Discover(WorkflowArgs),
    /// Compute weighted estimates and hypothesis tests (stage 4)
    Estimate(ConfigArgs),
    /// Propose report templates for the dataset (stage 5)
    Propose(ProposeArgs),
    /// Confirm the report template selection, completing stage 6
    Confirm(ConfirmArgs),
    /// Generate the final dataset and summary report, completing the workflow
    Report(WorkflowArgs),
    /// Show workflow progress and the per-stage status table
    Status(StatusArgs),
    /// Complete a stage and move the workflow to the next one
    Advance(StageArgs),
    /// Mark a stage as reviewed without completing it
    Review(StageArgs),
    /// Inspect a current or completed stage read-only
    Navigate(NavigateArgs),
    /// Preview the first rows of the current dataset
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Survey CSV file to upload
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8 with windows-1252 fallback)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// YAML configuration file driving the operation
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct ProposeArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// Survey type hint, e.g. `health_survey`
    #[arg(long = "survey-type")]
    pub survey_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfirmArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// YAML file listing the confirmed report templates
    #[arg(short = 's', long = "selection")]
    pub selection: PathBuf,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Workflow to show (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// Also print the audit trail
    #[arg(long)]
    pub audit: bool,
}

#[derive(Debug, Args)]
pub struct StageArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// Stage number 1-7 (defaults to the current stage)
    #[arg(short = 's', long = "stage")]
    pub stage: Option<u8>,
}

#[derive(Debug, Args)]
pub struct NavigateArgs {
    /// Workflow to operate on (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// Stage number 1-7 to inspect
    #[arg(short = 's', long = "stage")]
    pub stage: u8,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Workflow to preview (defaults to the most recent)
    #[arg(short = 'w', long = "workflow")]
    pub workflow: Option<Uuid>,
    /// Number of rows to display
    #[arg(short, long, default_value_t = 10)]
    pub rows: usize,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
