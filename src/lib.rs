pub mod artifacts;
pub mod cli;
pub mod dataset;
pub mod discover;
pub mod error;
pub mod ingest;
pub mod numeric;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod store;
pub mod table;
pub mod weighted;
pub mod workflow;

use std::path::Path;
use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};
use serde::de::DeserializeOwned;

use crate::cli::{Cli, Commands};
use crate::error::ColumnFailure;
use crate::pipeline::{IngestOptions, Pipeline};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("survey_pipeline", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let pipeline = Pipeline::open(&cli.data_dir)
        .with_context(|| format!("Opening data directory {:?}", cli.data_dir))?;
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&pipeline, &args),
        Commands::Quality(args) => handle_quality(&pipeline, &args),
        Commands::Impute(args) => handle_impute(&pipeline, &args),
        Commands::Outliers(args) => handle_outliers(&pipeline, &args),
        Commands::Validate(args) => handle_validate(&pipeline, &args),
        Commands::Discover(args) => handle_discover(&pipeline, &args),
        Commands::Estimate(args) => handle_estimate(&pipeline, &args),
        Commands::Propose(args) => handle_propose(&pipeline, &args),
        Commands::Confirm(args) => handle_confirm(&pipeline, &args),
        Commands::Report(args) => handle_report(&pipeline, &args),
        Commands::Status(args) => handle_status(&pipeline, &args),
        Commands::Advance(args) => handle_advance(&pipeline, &args),
        Commands::Review(args) => handle_review(&pipeline, &args),
        Commands::Navigate(args) => handle_navigate(&pipeline, &args),
        Commands::Preview(args) => handle_preview(&pipeline, &args),
    }
}

fn handle_ingest(pipeline: &Pipeline, args: &cli::IngestArgs) -> Result<()> {
    let options = IngestOptions {
        delimiter: args.delimiter.unwrap_or(b','),
        encoding: args.input_encoding.as_deref(),
    };
    info!(
        "Uploading '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(options.delimiter)
    );
    let outcome = pipeline
        .ingest(&args.input, options)
        .with_context(|| format!("Uploading {:?}", args.input))?;
    println!("workflow: {}", outcome.workflow_id);
    println!("document: {}", outcome.document_id);
    let rows = outcome
        .profile
        .columns
        .iter()
        .map(|column| {
            vec![
                column.name.clone(),
                column.kind.to_string(),
                column.missing.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers(&["column", "type", "missing"]), &rows);
    Ok(())
}

fn handle_quality(pipeline: &Pipeline, args: &cli::WorkflowArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let report = pipeline.quality(workflow_id)?;
    println!(
        "rows: {}  columns: {}",
        report.total_rows, report.total_columns
    );
    let missing_rows = report
        .missingness
        .columns
        .iter()
        .map(|(name, entry)| {
            vec![
                name.clone(),
                entry.count.to_string(),
                format!("{:.2}", entry.percentage),
                entry.mechanism.to_string(),
                report
                    .missingness
                    .suggestions
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect::<Vec<_>>();
    if missing_rows.is_empty() {
        println!("no missing values detected");
    } else {
        table::print_table(
            &headers(&["column", "missing", "pct", "mechanism", "suggestion"]),
            &missing_rows,
        );
    }
    let outlier_rows = report
        .outliers
        .columns
        .iter()
        .map(|(name, entry)| {
            vec![
                name.clone(),
                entry.count.to_string(),
                entry.lower_bound.to_string(),
                entry.upper_bound.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    if !outlier_rows.is_empty() {
        table::print_table(
            &headers(&["column", "outliers", "lower", "upper"]),
            &outlier_rows,
        );
    }
    Ok(())
}

fn handle_impute(pipeline: &Pipeline, args: &cli::ConfigArgs) -> Result<()> {
    let config: quality::ImputeConfig = load_config(&args.config)?;
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let outcome = pipeline.impute(workflow_id, &config)?;
    let rows = outcome
        .columns
        .iter()
        .map(|(name, column)| {
            vec![
                name.clone(),
                column.strategy.clone(),
                column.filled.to_string(),
                column.remaining_missing.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers(&["column", "strategy", "filled", "remaining"]), &rows);
    warn_failures(&outcome.errors);
    Ok(())
}

fn handle_outliers(pipeline: &Pipeline, args: &cli::ConfigArgs) -> Result<()> {
    let config: quality::OutlierConfig = load_config(&args.config)?;
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let outcome = pipeline.outliers(workflow_id, &config)?;
    println!("rows: {} -> {}", outcome.rows_before, outcome.rows_after);
    let rows = outcome
        .columns
        .iter()
        .map(|(name, column)| {
            vec![
                name.clone(),
                column.method.clone(),
                column.affected.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers(&["column", "method", "affected"]), &rows);
    warn_failures(&outcome.errors);
    Ok(())
}

fn handle_validate(pipeline: &Pipeline, args: &cli::ConfigArgs) -> Result<()> {
    let config: quality::ValidationConfig = load_config(&args.config)?;
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let outcome = pipeline.validate(workflow_id, &config)?;
    println!("passed: {}  failed: {}", outcome.passed, outcome.failed);
    for warning in &outcome.warnings {
        warn!("{warning}");
    }
    warn_failures(&outcome.errors);
    Ok(())
}

fn handle_discover(pipeline: &Pipeline, args: &cli::WorkflowArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let discovery = pipeline.discover(workflow_id)?;
    let classification_rows = discovery
        .classifications
        .iter()
        .map(|(name, classification)| {
            vec![
                name.clone(),
                classification.variable_type.to_string(),
                classification.distinct.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(
        &headers(&["variable", "type", "distinct"]),
        &classification_rows,
    );
    if !discovery.correlations.strong_pairs.is_empty() {
        let pair_rows = discovery
            .correlations
            .strong_pairs
            .iter()
            .map(|pair| {
                vec![
                    pair.variable_1.clone(),
                    pair.variable_2.clone(),
                    pair.correlation.to_string(),
                    pair.strength.clone(),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers(&["variable", "with", "r", "strength"]), &pair_rows);
    }
    for key in &discovery.key_variables {
        println!("key variable {}: {}", key.variable, key.reason);
    }
    Ok(())
}

fn handle_estimate(pipeline: &Pipeline, args: &cli::ConfigArgs) -> Result<()> {
    let config: weighted::EstimateConfig = load_config(&args.config)?;
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let statistics = pipeline.estimate(workflow_id, &config)?;
    let mean_rows = statistics
        .means
        .iter()
        .map(|(name, estimate)| {
            vec![
                name.clone(),
                estimate.n.to_string(),
                estimate.n_effective.to_string(),
                estimate.mean.to_string(),
                estimate.se.to_string(),
                format!("[{}, {}]", estimate.ci_lower, estimate.ci_upper),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(
        &headers(&["variable", "n", "n_eff", "mean", "se", "ci95"]),
        &mean_rows,
    );
    if !statistics.tests.is_empty() {
        let test_rows = statistics
            .tests
            .iter()
            .map(|test| {
                vec![
                    format!("{} x {}", test.variable_1, test.variable_2),
                    test.test.to_string(),
                    test.statistic
                        .map_or_else(|| "-".to_string(), |s| s.to_string()),
                    test.p_value.to_string(),
                    if test.significant { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(
            &headers(&["variables", "test", "statistic", "p", "significant"]),
            &test_rows,
        );
    }
    warn_failures(&statistics.errors);
    Ok(())
}

fn handle_propose(pipeline: &Pipeline, args: &cli::ProposeArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let proposals = pipeline.propose(workflow_id, args.survey_type.as_deref())?;
    let rows = proposals
        .proposals
        .iter()
        .map(|proposal| {
            vec![
                proposal.template.clone(),
                proposal.name.clone(),
                if proposal.recommended { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers(&["template", "name", "recommended"]), &rows);
    println!("default template: {}", proposals.default_template);
    Ok(())
}

fn handle_confirm(pipeline: &Pipeline, args: &cli::ConfirmArgs) -> Result<()> {
    let selection: report::ReportSelection = load_config(&args.selection)?;
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    pipeline.confirm(workflow_id, &selection)?;
    println!("confirmed: {}", selection.templates.join(", "));
    Ok(())
}

fn handle_report(pipeline: &Pipeline, args: &cli::WorkflowArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let summary = pipeline.report(workflow_id)?;
    println!("final reports written for workflow {workflow_id}");
    if let Some(findings) = summary.get("key_findings").and_then(|v| v.as_array()) {
        for finding in findings {
            if let Some(text) = finding.as_str() {
                println!("- {text}");
            }
        }
    }
    Ok(())
}

fn handle_status(pipeline: &Pipeline, args: &cli::StatusArgs) -> Result<()> {
    let view = pipeline.status(args.workflow)?;
    println!(
        "workflow {} ({}) status: {} current stage: {} progress: {:.2}%",
        view.workflow.id,
        view.document.filename,
        view.workflow.status,
        view.workflow.current_stage,
        view.progress
    );
    table::print_table(
        &headers(&["stage", "name", "status", "started", "completed"]),
        &table::stage_rows(&view.stages),
    );
    if args.audit {
        let entries = pipeline.audit_trail(view.workflow.id)?;
        let rows = entries
            .iter()
            .map(|entry| {
                vec![
                    entry.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    entry.action.clone(),
                    entry
                        .stage
                        .map_or_else(|| "-".to_string(), |s| s.to_string()),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers(&["time", "action", "stage"]), &rows);
    }
    Ok(())
}

fn handle_advance(pipeline: &Pipeline, args: &cli::StageArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let record = pipeline.advance(workflow_id, args.stage)?;
    println!("stage {} is now {}", record.stage_number, record.status);
    Ok(())
}

fn handle_review(pipeline: &Pipeline, args: &cli::StageArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let record = pipeline.review(workflow_id, args.stage)?;
    println!("stage {} is now {}", record.stage_number, record.status);
    Ok(())
}

fn handle_navigate(pipeline: &Pipeline, args: &cli::NavigateArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let view = pipeline.navigate(workflow_id, args.stage)?;
    println!(
        "stage {} ({}) is {}; current stage: {}; editable: {}",
        view.stage_number, view.stage_name, view.status, view.current_stage, view.editable
    );
    Ok(())
}

fn handle_preview(pipeline: &Pipeline, args: &cli::PreviewArgs) -> Result<()> {
    let workflow_id = pipeline.resolve_workflow(args.workflow)?;
    let (columns, rows) = pipeline.preview(workflow_id, args.rows)?;
    table::print_table(&columns, &rows);
    Ok(())
}

fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Reading configuration from {path:?}"))?;
    serde_yaml::from_str(&text).with_context(|| format!("Parsing configuration {path:?}"))
}

fn warn_failures(failures: &[ColumnFailure]) {
    for failure in failures {
        warn!("{}: {}", failure.column, failure.error);
    }
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
