//! Pipeline orchestrator: one method per analyst operation, composing
//! the engines with the record and artifact stores.
//!
//! ## Responsibilities
//!
//! - Stage-gate checks before any engine work (a dry-run of the start
//!   transition surfaces `Precondition` errors first)
//! - Engine calls on the current dataset snapshot; a failed engine
//!   call persists nothing
//! - Artifact writes, stage metadata, record updates, and audit
//!   entries after an engine call succeeds
//! - Snapshot resolution: the cleansed dataset when stage two has
//!   written one, otherwise the parsed upload
//!
//! Stage one runs to completion inside `ingest`; stages two to five
//! are completed explicitly with `advance`; `confirm` completes stage
//! six and `report` completes stage seven, which also completes the
//! workflow.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::artifacts::{ArtifactLocator, ArtifactStore, FsArtifactStore, names};
use crate::dataset::Dataset;
use crate::discover::{self, DiscoveryReport};
use crate::error::{PipelineError, Result};
use crate::ingest::{self, UploadProfile};
use crate::quality::{
    self, ImputationOutcome, ImputeConfig, OutlierConfig, OutlierTreatmentOutcome, QualityReport,
    ValidationConfig, ValidationOutcome,
};
use crate::report::{self, ProposalSet, ReportSelection, SummaryContext};
use crate::store::{DocumentRecord, JsonRecordStore, RecordStore};
use crate::weighted::{self, EstimateConfig, WeightedStatisticsReport};
use crate::workflow::{
    self, AuditEntry, NavigationView, StageRecord, StageStatus, WorkflowRecord, WorkflowStatus,
    actions, stage_info,
};

pub struct Pipeline {
    records: Box<dyn RecordStore>,
    artifacts: Box<dyn ArtifactStore>,
}

/// Upload parsing options.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions<'a> {
    pub delimiter: u8,
    pub encoding: Option<&'a str>,
}

impl Default for IngestOptions<'_> {
    fn default() -> Self {
        IngestOptions {
            delimiter: b',',
            encoding: None,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: Uuid,
    pub workflow_id: Uuid,
    pub profile: UploadProfile,
    pub artifacts: Vec<ArtifactLocator>,
}

/// Workflow snapshot for display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub workflow: WorkflowRecord,
    pub document: DocumentRecord,
    pub stages: Vec<StageRecord>,
    pub progress: f64,
}

impl Pipeline {
    pub fn new(records: Box<dyn RecordStore>, artifacts: Box<dyn ArtifactStore>) -> Self {
        Pipeline { records, artifacts }
    }

    /// Opens the default stores under one data directory:
    /// `<root>/records` for state, `<root>/instances` for artifacts.
    pub fn open(data_root: &Path) -> Result<Self> {
        Ok(Pipeline::new(
            Box::new(JsonRecordStore::open(data_root.join("records"))?),
            Box::new(FsArtifactStore::open(data_root.join("instances"))?),
        ))
    }

    /// Stage 1: registers the upload, creates the workflow and its
    /// instance folders, parses the file, and completes stage one.
    pub fn ingest(&self, path: &Path, options: IngestOptions<'_>) -> Result<IngestOutcome> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PipelineError::Precondition(format!(
                    "input path {} has no file name",
                    path.display()
                ))
            })?
            .to_string();
        let encoding = options.encoding.map(ingest::resolve_encoding).transpose()?;
        let (dataset, profile) = ingest::ingest_bytes(&bytes, options.delimiter, encoding)?;

        let now = Utc::now();
        let document = DocumentRecord::new(&filename, bytes.len() as u64, now);
        let mut workflow = WorkflowRecord::new(document.id, now);
        self.records.create_document(&document)?;
        self.records.create_workflow(&workflow)?;
        self.audit(
            workflow.id,
            actions::WORKFLOW_CREATED,
            None,
            Some(json!({"document_id": document.id, "filename": &filename})),
            now,
        )?;

        self.artifacts.create_instance(
            workflow.id,
            &json!({
                "instance_id": workflow.id,
                "document_id": document.id,
                "filename": &filename,
                "created_at": now.to_rfc3339(),
                "status": "initialized",
            }),
        )?;

        let stage = stage_info(1)?;
        let original = self.artifacts.write_artifact(
            workflow.id,
            stage,
            &names::original_upload(&filename),
            &bytes,
        )?;
        let data =
            self.artifacts
                .write_artifact(workflow.id, stage, names::DATA_CSV, &dataset.to_csv_bytes()?)?;
        let artifacts = vec![original, data];

        // the upload runs stage one to completion
        let mut stage_records = self.records.get_stage_records(workflow.id)?;
        workflow::start_stage(&mut stage_records, 1, now)?;
        let mut record = self.records.update_stage_record(&stage_records[0])?;
        self.audit(workflow.id, actions::STAGE_STARTED, Some(1), None, now)?;

        workflow::complete_stage(
            &mut record,
            Some(json!({"profile": &profile, "artifacts": &artifacts})),
            now,
        )?;
        self.records.update_stage_record(&record)?;
        workflow::advance_after_completion(&mut workflow, 1, now);
        self.records.update_workflow(&workflow)?;
        self.audit(workflow.id, actions::STAGE_COMPLETED, Some(1), None, now)?;

        self.artifacts.write_stage_metadata(
            workflow.id,
            stage,
            json!({"profile": &profile, "artifacts": &artifacts}),
        )?;

        info!(
            "ingested {} rows x {} columns from {filename} ({})",
            profile.row_count, profile.column_count, profile.encoding
        );
        Ok(IngestOutcome {
            document_id: document.id,
            workflow_id: workflow.id,
            profile,
            artifacts,
        })
    }

    /// Stage 2: missingness and outlier diagnostics for the current
    /// snapshot.
    pub fn quality(&self, workflow_id: Uuid) -> Result<QualityReport> {
        self.check_stage_ready(workflow_id, 2)?;
        let dataset = self.snapshot(workflow_id)?;
        let quality_report = quality::quality_report(&dataset);

        let mut record = self.start_if_pending(workflow_id, 2)?;
        let stage = stage_info(2)?;
        let locator = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::QUALITY_REPORT,
            &serde_json::to_vec_pretty(&quality_report)?,
        )?;
        self.artifacts
            .write_stage_metadata(workflow_id, stage, json!({"quality_report": &locator}))?;
        merge_output(&mut record, "quality", serde_json::to_value(&quality_report)?);
        self.records.update_stage_record(&record)?;

        info!(
            "quality report: {} columns, {} with missing values, {} with outliers",
            quality_report.total_columns,
            quality_report.missingness.columns.len(),
            quality_report.outliers.columns.len()
        );
        Ok(quality_report)
    }

    /// Stage 2: applies the imputation strategy map and writes the
    /// cleansed snapshot.
    pub fn impute(&self, workflow_id: Uuid, config: &ImputeConfig) -> Result<ImputationOutcome> {
        self.check_stage_ready(workflow_id, 2)?;
        let dataset = self.snapshot(workflow_id)?;
        let (imputed, outcome) = quality::impute(&dataset, config);

        let mut record = self.start_if_pending(workflow_id, 2)?;
        let stage = stage_info(2)?;
        let cleaned = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::CLEANED_DATA,
            &imputed.to_csv_bytes()?,
        )?;
        let results = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::IMPUTATION_RESULTS,
            &serde_json::to_vec_pretty(&outcome)?,
        )?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"cleaned_data": &cleaned, "imputation_results": &results}),
        )?;
        merge_output(&mut record, "imputation", serde_json::to_value(&outcome)?);
        self.records.update_stage_record(&record)?;

        info!(
            "imputed {} column(s), {} error(s)",
            outcome.columns.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Stage 2: applies the outlier treatment map and writes the
    /// treated snapshot.
    pub fn outliers(
        &self,
        workflow_id: Uuid,
        config: &OutlierConfig,
    ) -> Result<OutlierTreatmentOutcome> {
        self.check_stage_ready(workflow_id, 2)?;
        let dataset = self.snapshot(workflow_id)?;
        let (treated, outcome) = quality::handle_outliers(&dataset, config);

        let mut record = self.start_if_pending(workflow_id, 2)?;
        let stage = stage_info(2)?;
        let cleaned = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::CLEANED_DATA,
            &treated.to_csv_bytes()?,
        )?;
        let results = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::OUTLIER_RESULTS,
            &serde_json::to_vec_pretty(&outcome)?,
        )?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"cleaned_data": &cleaned, "outlier_results": &results}),
        )?;
        merge_output(&mut record, "outliers", serde_json::to_value(&outcome)?);
        self.records.update_stage_record(&record)?;

        info!(
            "treated outliers in {} column(s), rows {} -> {}",
            outcome.columns.len(),
            outcome.rows_before,
            outcome.rows_after
        );
        Ok(outcome)
    }

    /// Stage 2: evaluates validation rules against the current
    /// snapshot. The dataset itself is not modified.
    pub fn validate(
        &self,
        workflow_id: Uuid,
        config: &ValidationConfig,
    ) -> Result<ValidationOutcome> {
        self.check_stage_ready(workflow_id, 2)?;
        let dataset = self.snapshot(workflow_id)?;
        let outcome = quality::validate(&dataset, config);

        let mut record = self.start_if_pending(workflow_id, 2)?;
        let stage = stage_info(2)?;
        let results = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::VALIDATION_RESULTS,
            &serde_json::to_vec_pretty(&outcome)?,
        )?;
        self.artifacts
            .write_stage_metadata(workflow_id, stage, json!({"validation_results": &results}))?;
        merge_output(&mut record, "validation", serde_json::to_value(&outcome)?);
        self.records.update_stage_record(&record)?;

        info!(
            "validation: {} passed, {} failed, {} error(s)",
            outcome.passed,
            outcome.failed,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Stage 3: classification, descriptive statistics, correlations,
    /// co-occurring missingness, and key variables.
    pub fn discover(&self, workflow_id: Uuid) -> Result<DiscoveryReport> {
        self.check_stage_ready(workflow_id, 3)?;
        let dataset = self.snapshot(workflow_id)?;
        let discovery = discover::discover(&dataset);

        let mut record = self.start_if_pending(workflow_id, 3)?;
        let stage = stage_info(3)?;
        let analysis = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::ANALYSIS_RESULTS,
            &serde_json::to_vec_pretty(&discovery)?,
        )?;
        let key_stats = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::KEY_STATISTICS,
            &discover::key_statistics_csv(&discovery.descriptive),
        )?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"analysis_results": &analysis, "key_statistics": &key_stats}),
        )?;
        merge_output(&mut record, "analysis", serde_json::to_value(&discovery)?);
        self.records.update_stage_record(&record)?;

        info!(
            "discovery: {} variables classified, {} strong pair(s), {} key variable(s)",
            discovery.classifications.len(),
            discovery.correlations.strong_pairs.len(),
            discovery.key_variables.len()
        );
        Ok(discovery)
    }

    /// Stage 4: the configured weighted estimates.
    pub fn estimate(
        &self,
        workflow_id: Uuid,
        config: &EstimateConfig,
    ) -> Result<WeightedStatisticsReport> {
        self.check_stage_ready(workflow_id, 4)?;
        let dataset = self.snapshot(workflow_id)?;
        let statistics = weighted::run_estimates(&dataset, config)?;

        let mut record = self.start_if_pending(workflow_id, 4)?;
        let stage = stage_info(4)?;
        let weighted_json = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::WEIGHTED_STATISTICS,
            &serde_json::to_vec_pretty(&statistics)?,
        )?;
        let summary_csv = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::STATISTICS_SUMMARY,
            &weighted::statistics_summary_csv(&statistics),
        )?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"weighted_statistics": &weighted_json, "statistics_summary": &summary_csv}),
        )?;
        merge_output(&mut record, "statistics", serde_json::to_value(&statistics)?);
        self.records.update_stage_record(&record)?;

        info!(
            "estimated {} mean(s), {} test(s), {} error(s)",
            statistics.means.len(),
            statistics.tests.len(),
            statistics.errors.len()
        );
        Ok(statistics)
    }

    /// Stage 5: proposes report templates for the snapshot's
    /// variables.
    pub fn propose(&self, workflow_id: Uuid, survey_type: Option<&str>) -> Result<ProposalSet> {
        self.check_stage_ready(workflow_id, 5)?;
        let dataset = self.snapshot(workflow_id)?;
        let proposals = report::propose_reports(&dataset.column_names(), survey_type);

        let mut record = self.start_if_pending(workflow_id, 5)?;
        let stage = stage_info(5)?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"proposals": &proposals, "survey_type": survey_type}),
        )?;
        merge_output(&mut record, "proposals", serde_json::to_value(&proposals)?);
        self.records.update_stage_record(&record)?;

        info!("proposed {} report template(s)", proposals.proposals.len());
        Ok(proposals)
    }

    /// Stage 6: persists the analyst's template selection and
    /// completes the stage.
    pub fn confirm(&self, workflow_id: Uuid, selection: &ReportSelection) -> Result<StageRecord> {
        selection.validate()?;
        self.check_stage_ready(workflow_id, 6)?;

        let mut workflow = self.records.get_workflow(workflow_id)?;
        let mut record = self.start_if_pending(workflow_id, 6)?;
        let now = Utc::now();
        workflow::record_user_action(
            &mut record,
            "confirm_reports",
            Some(serde_json::to_value(selection)?),
            now,
        );
        workflow::complete_stage(&mut record, Some(json!({"selected_reports": selection})), now)?;
        let persisted = self.records.update_stage_record(&record)?;
        workflow::advance_after_completion(&mut workflow, 6, now);
        self.records.update_workflow(&workflow)?;

        let stage = stage_info(6)?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({"selected_reports": selection, "confirmed_at": now.to_rfc3339()}),
        )?;
        self.audit(
            workflow_id,
            actions::USER_ACTION,
            Some(6),
            Some(json!({"selection": selection})),
            now,
        )?;
        self.audit(workflow_id, actions::STAGE_COMPLETED, Some(6), None, now)?;

        info!("confirmed {} report template(s)", selection.templates.len());
        Ok(persisted)
    }

    /// Stage 7: writes the final snapshot and summary, completes the
    /// stage, and thereby completes the workflow.
    pub fn report(&self, workflow_id: Uuid) -> Result<Value> {
        self.check_stage_ready(workflow_id, 7)?;
        let mut workflow = self.records.get_workflow(workflow_id)?;
        let document = self.records.get_document(workflow.document_id)?;
        let dataset = self.snapshot(workflow_id)?;

        let all_records = self.records.get_stage_records(workflow_id)?;
        let mut stage_outputs = BTreeMap::new();
        let mut selected_reports = None;
        for r in &all_records {
            let Some(output) = &r.output_data else {
                continue;
            };
            if (2..=4).contains(&r.stage_number) {
                stage_outputs.insert(r.stage_number, output.clone());
            } else if r.stage_number == 6 {
                selected_reports = output.get("selected_reports").cloned();
            }
        }

        let now = Utc::now();
        let ctx = SummaryContext {
            workflow_id,
            document_id: document.id,
            filename: &document.filename,
        };
        let mut summary = report::final_summary(&dataset, ctx, &stage_outputs, now);
        if let (Value::Object(map), Some(selection)) = (&mut summary, selected_reports) {
            map.insert("selected_reports".to_string(), selection);
        }

        let mut record = self.start_if_pending(workflow_id, 7)?;
        let stage = stage_info(7)?;
        let final_data = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::FINAL_DATA,
            &dataset.to_csv_bytes()?,
        )?;
        let summary_json = self.artifacts.write_artifact(
            workflow_id,
            stage,
            names::SUMMARY_JSON,
            &serde_json::to_vec_pretty(&summary)?,
        )?;
        self.artifacts.write_stage_metadata(
            workflow_id,
            stage,
            json!({
                "generated_reports": [&final_data, &summary_json],
                "generation_time": now.to_rfc3339(),
            }),
        )?;

        workflow::complete_stage(
            &mut record,
            Some(json!({"reports": [&final_data, &summary_json]})),
            now,
        )?;
        self.records.update_stage_record(&record)?;
        workflow::advance_after_completion(&mut workflow, 7, now);
        self.records.update_workflow(&workflow)?;
        self.audit(workflow_id, actions::STAGE_COMPLETED, Some(7), None, now)?;
        self.audit(workflow_id, actions::WORKFLOW_COMPLETED, None, None, now)?;

        info!("workflow {workflow_id} completed");
        Ok(summary)
    }

    /// Workflow, document, stage table, and progress. With no id the
    /// most recently created workflow is shown.
    pub fn status(&self, workflow_id: Option<Uuid>) -> Result<StatusView> {
        let workflow = match workflow_id {
            Some(id) => self.records.get_workflow(id)?,
            None => self
                .records
                .latest_workflow()?
                .ok_or_else(|| PipelineError::NotFound("workflow".to_string()))?,
        };
        let document = self.records.get_document(workflow.document_id)?;
        let stages = self.records.get_stage_records(workflow.id)?;
        let progress = workflow::progress(&stages);
        Ok(StatusView {
            workflow,
            document,
            stages,
            progress,
        })
    }

    /// Resolves an explicit workflow id, or falls back to the most
    /// recently created workflow.
    pub fn resolve_workflow(&self, workflow_id: Option<Uuid>) -> Result<Uuid> {
        match workflow_id {
            Some(id) => Ok(self.records.get_workflow(id)?.id),
            None => Ok(self
                .records
                .latest_workflow()?
                .ok_or_else(|| PipelineError::NotFound("workflow".to_string()))?
                .id),
        }
    }

    /// Completes a stage explicitly (default: the current stage) and
    /// advances the workflow pointer.
    pub fn advance(&self, workflow_id: Uuid, stage_number: Option<u8>) -> Result<StageRecord> {
        let mut workflow = self.records.get_workflow(workflow_id)?;
        let stage_number = stage_number.unwrap_or(workflow.current_stage);
        let mut record = self.records.get_stage_record(workflow_id, stage_number)?;
        let now = Utc::now();
        workflow::complete_stage(&mut record, None, now)?;
        let persisted = self.records.update_stage_record(&record)?;
        workflow::advance_after_completion(&mut workflow, stage_number, now);
        self.records.update_workflow(&workflow)?;
        self.audit(workflow_id, actions::STAGE_COMPLETED, Some(stage_number), None, now)?;
        if workflow.status == WorkflowStatus::Completed {
            self.audit(workflow_id, actions::WORKFLOW_COMPLETED, None, None, now)?;
            info!("workflow {workflow_id} completed");
        } else {
            info!(
                "stage {stage_number} completed, current stage is now {}",
                workflow.current_stage
            );
        }
        Ok(persisted)
    }

    /// Marks a stage (default: the current stage) as reviewed.
    pub fn review(&self, workflow_id: Uuid, stage_number: Option<u8>) -> Result<StageRecord> {
        let workflow = self.records.get_workflow(workflow_id)?;
        let stage_number = stage_number.unwrap_or(workflow.current_stage);
        let mut record = self.records.get_stage_record(workflow_id, stage_number)?;
        let now = Utc::now();
        workflow::review_stage(&mut record, now)?;
        let persisted = self.records.update_stage_record(&record)?;
        self.audit(workflow_id, actions::STAGE_REVIEWED, Some(stage_number), None, now)?;
        Ok(persisted)
    }

    /// Read-only navigation to a past or current stage.
    pub fn navigate(&self, workflow_id: Uuid, stage_number: u8) -> Result<NavigationView> {
        let workflow = self.records.get_workflow(workflow_id)?;
        let records = self.records.get_stage_records(workflow_id)?;
        let view = workflow::navigate(&workflow, &records, stage_number)?;
        self.audit(
            workflow_id,
            actions::STAGE_NAVIGATED,
            Some(stage_number),
            Some(json!({"editable": view.editable})),
            Utc::now(),
        )?;
        Ok(view)
    }

    /// Header and first rows of the current snapshot.
    pub fn preview(&self, workflow_id: Uuid, rows: usize) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let dataset = self.snapshot(workflow_id)?;
        Ok((dataset.column_names(), dataset.head(rows)))
    }

    /// The audit trail of one workflow, oldest first.
    pub fn audit_trail(&self, workflow_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.records.audit_trail(workflow_id)
    }

    /// The dataset every engine operates on: `cleaned_data.csv` once
    /// stage two has produced it, else the parsed upload.
    pub fn snapshot(&self, workflow_id: Uuid) -> Result<Dataset> {
        let cleansing = stage_info(2)?;
        if let Some(bytes) =
            self.artifacts
                .try_read_artifact(workflow_id, cleansing, names::CLEANED_DATA)?
        {
            return ingest::parse_snapshot(&bytes);
        }
        let upload = stage_info(1)?;
        let bytes = self
            .artifacts
            .read_artifact(workflow_id, upload, names::DATA_CSV)?;
        ingest::parse_snapshot(&bytes)
    }

    /// Dry-runs the start transition so gate violations surface before
    /// any engine work or persistence.
    fn check_stage_ready(&self, workflow_id: Uuid, stage_number: u8) -> Result<()> {
        let mut scratch = self.records.get_stage_records(workflow_id)?;
        workflow::start_stage(&mut scratch, stage_number, Utc::now())
    }

    /// Starts the stage if it is still pending; otherwise returns the
    /// stored record untouched.
    fn start_if_pending(&self, workflow_id: Uuid, stage_number: u8) -> Result<StageRecord> {
        let mut records = self.records.get_stage_records(workflow_id)?;
        let idx = records
            .iter()
            .position(|r| r.stage_number == stage_number)
            .ok_or_else(|| {
                PipelineError::NotFound(format!("stage {stage_number} of workflow {workflow_id}"))
            })?;
        if records[idx].status != StageStatus::Pending {
            return Ok(records[idx].clone());
        }
        let now = Utc::now();
        workflow::start_stage(&mut records, stage_number, now)?;
        let persisted = self.records.update_stage_record(&records[idx])?;
        self.audit(workflow_id, actions::STAGE_STARTED, Some(stage_number), None, now)?;
        Ok(persisted)
    }

    fn audit(
        &self,
        workflow_id: Uuid,
        action: &str,
        stage: Option<u8>,
        details: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.records
            .append_audit(&AuditEntry::new(workflow_id, action, stage, details, now))
    }
}

/// Folds an operation's payload into the stage record's output data
/// under its own key, preserving payloads from earlier operations on
/// the same stage.
fn merge_output(record: &mut StageRecord, key: &str, value: Value) {
    let mut map = match record.output_data.take() {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    map.insert(key.to_string(), value);
    record.output_data = Some(Value::Object(map));
}
