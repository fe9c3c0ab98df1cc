//! Workflow state machine: the fixed seven-stage catalogue, workflow
//! and stage records, transition rules, and audit entries.
//!
//! ## Responsibilities
//!
//! - Stage catalogue with display names and artifact folder names
//! - Stage lifecycle `pending -> in_progress -> (reviewed) -> completed`
//! - Sequential gating: a stage can start only when its predecessor is
//!   completed; completing a completed stage is rejected so the
//!   workflow can never advance twice off one stage
//! - Navigation checks: visiting a past stage is read-only, visiting a
//!   future stage is forbidden
//! - Progress as the completed share of all seven stages
//!
//! Transitions mutate records in memory and return typed errors; the
//! record store persists the outcome under a revision check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::numeric::round_to;

pub const STAGE_COUNT: u8 = 7;

/// One entry of the stage catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInfo {
    pub number: u8,
    pub name: &'static str,
    pub folder: &'static str,
}

pub const STAGES: [StageInfo; STAGE_COUNT as usize] = [
    StageInfo {
        number: 1,
        name: "Raw Data Upload",
        folder: "01_upload",
    },
    StageInfo {
        number: 2,
        name: "Data Cleansing",
        folder: "02_cleansing",
    },
    StageInfo {
        number: 3,
        name: "Analysis & Discovery",
        folder: "03_analysis",
    },
    StageInfo {
        number: 4,
        name: "Statistics & Weights",
        folder: "04_statistics",
    },
    StageInfo {
        number: 5,
        name: "Propose Reports",
        folder: "05_reports_proposed",
    },
    StageInfo {
        number: 6,
        name: "User Confirmation",
        folder: "06_confirmation",
    },
    StageInfo {
        number: 7,
        name: "Final Report Generation",
        folder: "07_final_reports",
    },
];

/// Looks up a stage by its 1-based number.
pub fn stage_info(stage_number: u8) -> Result<&'static StageInfo> {
    stage_number
        .checked_sub(1)
        .and_then(|i| STAGES.get(i as usize))
        .ok_or_else(|| {
            PipelineError::Precondition(format!(
                "stage number {stage_number} is out of range 1..={STAGE_COUNT}"
            ))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Reviewed,
    Completed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Reviewed => "reviewed",
            StageStatus::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Completed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// One processing run over one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub current_stage: u8,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    pub fn new(document_id: Uuid, now: DateTime<Utc>) -> Self {
        WorkflowRecord {
            id: Uuid::new_v4(),
            document_id,
            current_stage: 1,
            status: WorkflowStatus::InProgress,
            created_at: now,
            completed_at: None,
        }
    }
}

/// An analyst action recorded on a stage, such as a confirmation
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAction {
    pub action: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Lifecycle record of one stage within one workflow. `revision`
/// increments on every persisted update and guards concurrent writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub workflow_id: Uuid,
    pub stage_number: u8,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_actions: Vec<UserAction>,
    pub revision: u64,
}

impl StageRecord {
    pub fn new(workflow_id: Uuid, stage_number: u8) -> Self {
        StageRecord {
            workflow_id,
            stage_number,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            output_data: None,
            user_actions: Vec::new(),
            revision: 0,
        }
    }
}

/// The full pending record set for a fresh workflow.
pub fn seed_stage_records(workflow_id: Uuid) -> Vec<StageRecord> {
    (1..=STAGE_COUNT)
        .map(|n| StageRecord::new(workflow_id, n))
        .collect()
}

/// Starts a stage: its predecessor must be completed and the stage
/// itself must not be. Restarting an in-progress or reviewed stage
/// re-stamps `started_at`.
pub fn start_stage(records: &mut [StageRecord], stage_number: u8, now: DateTime<Utc>) -> Result<()> {
    stage_info(stage_number)?;
    if stage_number > 1 {
        let previous = record_for(records, stage_number - 1)?;
        if previous.status != StageStatus::Completed {
            return Err(PipelineError::Precondition(format!(
                "stage {} must be completed before stage {stage_number} can start",
                stage_number - 1
            )));
        }
    }
    let record = record_for_mut(records, stage_number)?;
    if record.status == StageStatus::Completed {
        return Err(PipelineError::Precondition(format!(
            "stage {stage_number} is already completed"
        )));
    }
    record.status = StageStatus::InProgress;
    record.started_at = Some(now);
    Ok(())
}

/// Completes an in-progress or reviewed stage, attaching its output
/// payload. A second completion is rejected.
pub fn complete_stage(record: &mut StageRecord, output: Option<Value>, now: DateTime<Utc>) -> Result<()> {
    match record.status {
        StageStatus::InProgress | StageStatus::Reviewed => {
            record.status = StageStatus::Completed;
            record.completed_at = Some(now);
            if output.is_some() {
                record.output_data = output;
            }
            Ok(())
        }
        StageStatus::Pending => Err(PipelineError::Precondition(format!(
            "stage {} has not been started",
            record.stage_number
        ))),
        StageStatus::Completed => Err(PipelineError::Precondition(format!(
            "stage {} is already completed",
            record.stage_number
        ))),
    }
}

/// Marks an in-progress stage as reviewed.
pub fn review_stage(record: &mut StageRecord, now: DateTime<Utc>) -> Result<()> {
    if record.status != StageStatus::InProgress {
        return Err(PipelineError::Precondition(format!(
            "stage {} must be in progress to be reviewed, found {}",
            record.stage_number, record.status
        )));
    }
    record.status = StageStatus::Reviewed;
    record.user_actions.push(UserAction {
        action: "reviewed".to_string(),
        at: now,
        details: None,
    });
    Ok(())
}

/// Appends an analyst action to a stage record.
pub fn record_user_action(
    record: &mut StageRecord,
    action: &str,
    details: Option<Value>,
    now: DateTime<Utc>,
) {
    record.user_actions.push(UserAction {
        action: action.to_string(),
        at: now,
        details,
    });
}

/// Moves the workflow pointer after a stage completed: forward below
/// stage seven, terminal at stage seven.
pub fn advance_after_completion(
    workflow: &mut WorkflowRecord,
    stage_number: u8,
    now: DateTime<Utc>,
) {
    if stage_number < STAGE_COUNT {
        workflow.current_stage = stage_number + 1;
    } else {
        workflow.status = WorkflowStatus::Completed;
        workflow.completed_at = Some(now);
    }
}

/// Read-only view returned by navigation.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationView {
    pub stage_number: u8,
    pub stage_name: String,
    pub status: StageStatus,
    pub current_stage: u8,
    pub editable: bool,
}

/// Validates a navigation request: past and current stages are
/// visible, only the current stage is editable, future stages are
/// forbidden.
pub fn navigate(
    workflow: &WorkflowRecord,
    records: &[StageRecord],
    stage_number: u8,
) -> Result<NavigationView> {
    let info = stage_info(stage_number)?;
    if stage_number > workflow.current_stage {
        return Err(PipelineError::Forbidden(format!(
            "stage {stage_number} is ahead of the current stage {}",
            workflow.current_stage
        )));
    }
    let record = record_for(records, stage_number)?;
    Ok(NavigationView {
        stage_number,
        stage_name: info.name.to_string(),
        status: record.status,
        current_stage: workflow.current_stage,
        editable: stage_number == workflow.current_stage,
    })
}

/// Percentage of the seven stages completed, to two decimal places.
pub fn progress(records: &[StageRecord]) -> f64 {
    let completed = records
        .iter()
        .filter(|r| r.status == StageStatus::Completed)
        .count();
    round_to(completed as f64 * 100.0 / f64::from(STAGE_COUNT), 2)
}

fn record_for(records: &[StageRecord], stage_number: u8) -> Result<&StageRecord> {
    records
        .iter()
        .find(|r| r.stage_number == stage_number)
        .ok_or_else(|| {
            PipelineError::Precondition(format!("no record for stage {stage_number}"))
        })
}

fn record_for_mut(records: &mut [StageRecord], stage_number: u8) -> Result<&mut StageRecord> {
    records
        .iter_mut()
        .find(|r| r.stage_number == stage_number)
        .ok_or_else(|| {
            PipelineError::Precondition(format!("no record for stage {stage_number}"))
        })
}

pub mod actions {
    //! Audit action names shared by the orchestrator and the stores.

    pub const WORKFLOW_CREATED: &str = "workflow_created";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const STAGE_STARTED: &str = "stage_started";
    pub const STAGE_COMPLETED: &str = "stage_completed";
    pub const STAGE_REVIEWED: &str = "stage_reviewed";
    pub const STAGE_NAVIGATED: &str = "stage_navigated";
    pub const USER_ACTION: &str = "user_action";
}

/// One line of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        workflow_id: Uuid,
        action: &str,
        stage: Option<u8>,
        details: Option<Value>,
        now: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            workflow_id,
            action: action.to_string(),
            stage,
            details,
            at: now,
        }
    }
}
