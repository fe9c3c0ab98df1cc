//! Record persistence: documents, workflows, stage records, and the
//! audit trail.
//!
//! ## Responsibilities
//!
//! - [`RecordStore`] as the seam between the orchestrator and the
//!   backing storage
//! - [`JsonRecordStore`], a file-per-collection JSON store suited to
//!   single-host runs
//! - Revision checks on stage record updates so a writer holding a
//!   stale copy gets a [`PipelineError::ConcurrencyConflict`] instead
//!   of silently clobbering a newer state
//!
//! Creating a workflow seeds all seven stage records as pending in the
//! same operation, so the state machine never observes a partially
//! seeded workflow.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::workflow::{AuditEntry, StageRecord, WorkflowRecord, seed_stage_records};

const DOCUMENTS_FILE: &str = "documents.json";
const WORKFLOWS_FILE: &str = "workflows.json";
const STAGES_FILE: &str = "stages.json";
const AUDIT_FILE: &str = "audit.json";

/// An uploaded source file registered with the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(filename: &str, size_bytes: u64, now: DateTime<Utc>) -> Self {
        DocumentRecord {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            content_type: "text/csv".to_string(),
            size_bytes,
            uploaded_at: now,
        }
    }
}

/// Storage seam for workflow state.
pub trait RecordStore {
    fn create_document(&self, document: &DocumentRecord) -> Result<()>;
    fn get_document(&self, id: Uuid) -> Result<DocumentRecord>;

    /// Persists the workflow and seeds its seven pending stage records.
    fn create_workflow(&self, workflow: &WorkflowRecord) -> Result<()>;
    fn get_workflow(&self, id: Uuid) -> Result<WorkflowRecord>;
    fn latest_workflow(&self) -> Result<Option<WorkflowRecord>>;
    fn update_workflow(&self, workflow: &WorkflowRecord) -> Result<()>;

    fn get_stage_records(&self, workflow_id: Uuid) -> Result<Vec<StageRecord>>;
    fn get_stage_record(&self, workflow_id: Uuid, stage_number: u8) -> Result<StageRecord>;

    /// Compare-and-swap update: `record.revision` must match the stored
    /// revision. Returns the stored copy with the revision bumped.
    fn update_stage_record(&self, record: &StageRecord) -> Result<StageRecord>;

    fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    fn audit_trail(&self, workflow_id: Uuid) -> Result<Vec<AuditEntry>>;
}

/// JSON-file record store: one file per collection under a records
/// directory, guarded by a process-wide mutex.
pub struct JsonRecordStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonRecordStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(JsonRecordStore {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.collection_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<()> {
        let file = File::create(self.collection_path(name))?;
        serde_json::to_writer_pretty(file, rows)?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // a poisoned lock only means another writer panicked mid-update;
        // the underlying files are rewritten whole, so continue
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for JsonRecordStore {
    fn create_document(&self, document: &DocumentRecord) -> Result<()> {
        let _guard = self.guard();
        let mut rows: Vec<DocumentRecord> = self.load(DOCUMENTS_FILE)?;
        rows.push(document.clone());
        self.save(DOCUMENTS_FILE, &rows)
    }

    fn get_document(&self, id: Uuid) -> Result<DocumentRecord> {
        let _guard = self.guard();
        let rows: Vec<DocumentRecord> = self.load(DOCUMENTS_FILE)?;
        rows.into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| PipelineError::NotFound(format!("document {id}")))
    }

    fn create_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        let _guard = self.guard();
        let mut workflows: Vec<WorkflowRecord> = self.load(WORKFLOWS_FILE)?;
        workflows.push(workflow.clone());
        self.save(WORKFLOWS_FILE, &workflows)?;

        let mut stages: Vec<StageRecord> = self.load(STAGES_FILE)?;
        stages.extend(seed_stage_records(workflow.id));
        self.save(STAGES_FILE, &stages)
    }

    fn get_workflow(&self, id: Uuid) -> Result<WorkflowRecord> {
        let _guard = self.guard();
        let rows: Vec<WorkflowRecord> = self.load(WORKFLOWS_FILE)?;
        rows.into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| PipelineError::NotFound(format!("workflow {id}")))
    }

    fn latest_workflow(&self) -> Result<Option<WorkflowRecord>> {
        let _guard = self.guard();
        let rows: Vec<WorkflowRecord> = self.load(WORKFLOWS_FILE)?;
        Ok(rows.into_iter().max_by_key(|w| w.created_at))
    }

    fn update_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        let _guard = self.guard();
        let mut rows: Vec<WorkflowRecord> = self.load(WORKFLOWS_FILE)?;
        let slot = rows
            .iter_mut()
            .find(|w| w.id == workflow.id)
            .ok_or_else(|| PipelineError::NotFound(format!("workflow {}", workflow.id)))?;
        *slot = workflow.clone();
        self.save(WORKFLOWS_FILE, &rows)
    }

    fn get_stage_records(&self, workflow_id: Uuid) -> Result<Vec<StageRecord>> {
        let _guard = self.guard();
        let rows: Vec<StageRecord> = self.load(STAGES_FILE)?;
        let mut records: Vec<StageRecord> = rows
            .into_iter()
            .filter(|r| r.workflow_id == workflow_id)
            .collect();
        if records.is_empty() {
            return Err(PipelineError::NotFound(format!("workflow {workflow_id}")));
        }
        records.sort_by_key(|r| r.stage_number);
        Ok(records)
    }

    fn get_stage_record(&self, workflow_id: Uuid, stage_number: u8) -> Result<StageRecord> {
        let _guard = self.guard();
        let rows: Vec<StageRecord> = self.load(STAGES_FILE)?;
        rows.into_iter()
            .find(|r| r.workflow_id == workflow_id && r.stage_number == stage_number)
            .ok_or_else(|| {
                PipelineError::NotFound(format!("stage {stage_number} of workflow {workflow_id}"))
            })
    }

    fn update_stage_record(&self, record: &StageRecord) -> Result<StageRecord> {
        let _guard = self.guard();
        let mut rows: Vec<StageRecord> = self.load(STAGES_FILE)?;
        let slot = rows
            .iter_mut()
            .find(|r| r.workflow_id == record.workflow_id && r.stage_number == record.stage_number)
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "stage {} of workflow {}",
                    record.stage_number, record.workflow_id
                ))
            })?;
        if slot.revision != record.revision {
            return Err(PipelineError::ConcurrencyConflict {
                record: format!(
                    "stage {} of workflow {}",
                    record.stage_number, record.workflow_id
                ),
                expected: record.revision,
                found: slot.revision,
            });
        }
        let mut updated = record.clone();
        updated.revision += 1;
        *slot = updated.clone();
        self.save(STAGES_FILE, &rows)?;
        Ok(updated)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.guard();
        let mut rows: Vec<AuditEntry> = self.load(AUDIT_FILE)?;
        rows.push(entry.clone());
        self.save(AUDIT_FILE, &rows)
    }

    fn audit_trail(&self, workflow_id: Uuid) -> Result<Vec<AuditEntry>> {
        let _guard = self.guard();
        let rows: Vec<AuditEntry> = self.load(AUDIT_FILE)?;
        Ok(rows
            .into_iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StageStatus, actions};
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> JsonRecordStore {
        JsonRecordStore::open(dir.join("records")).unwrap()
    }

    #[test]
    fn creating_a_workflow_seeds_seven_pending_stages() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let workflow = WorkflowRecord::new(Uuid::new_v4(), Utc::now());
        store.create_workflow(&workflow).unwrap();

        let records = store.get_stage_records(workflow.id).unwrap();
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.status == StageStatus::Pending));
        assert_eq!(records[0].stage_number, 1);
        assert_eq!(records[6].stage_number, 7);
    }

    #[test]
    fn stale_revision_updates_are_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let workflow = WorkflowRecord::new(Uuid::new_v4(), Utc::now());
        store.create_workflow(&workflow).unwrap();

        let mut fresh = store.get_stage_record(workflow.id, 1).unwrap();
        let stale = fresh.clone();
        fresh.status = StageStatus::InProgress;
        let updated = store.update_stage_record(&fresh).unwrap();
        assert_eq!(updated.revision, 1);

        let err = store.update_stage_record(&stale).unwrap_err();
        match err {
            PipelineError::ConcurrencyConflict { expected, found, .. } => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("expected a concurrency conflict, got {other}"),
        }
    }

    #[test]
    fn documents_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let document = DocumentRecord::new("survey.csv", 1234, Utc::now());
        store.create_document(&document).unwrap();

        let loaded = store.get_document(document.id).unwrap();
        assert_eq!(loaded.filename, "survey.csv");
        assert_eq!(loaded.size_bytes, 1234);
        assert_eq!(loaded.content_type, "text/csv");
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_workflow(id).unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            store.get_document(id).unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }

    #[test]
    fn audit_trail_is_scoped_to_the_workflow() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let now = Utc::now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .append_audit(&AuditEntry::new(a, actions::WORKFLOW_CREATED, None, None, now))
            .unwrap();
        store
            .append_audit(&AuditEntry::new(a, actions::STAGE_STARTED, Some(1), None, now))
            .unwrap();
        store
            .append_audit(&AuditEntry::new(b, actions::WORKFLOW_CREATED, None, None, now))
            .unwrap();

        let trail = store.audit_trail(a).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].action, actions::STAGE_STARTED);
        assert_eq!(trail[1].stage, Some(1));
    }

    #[test]
    fn latest_workflow_prefers_the_newest() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.latest_workflow().unwrap().is_none());

        let older = WorkflowRecord::new(Uuid::new_v4(), Utc::now() - chrono::Duration::hours(1));
        let newer = WorkflowRecord::new(Uuid::new_v4(), Utc::now());
        store.create_workflow(&older).unwrap();
        store.create_workflow(&newer).unwrap();

        let latest = store.latest_workflow().unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }
}
