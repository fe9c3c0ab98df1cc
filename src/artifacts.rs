//! Stage artifact storage: the per-instance folder tree holding every
//! file a workflow produces.
//!
//! ## Responsibilities
//!
//! - [`ArtifactStore`] as the seam between the orchestrator and the
//!   artifact tree
//! - [`FsArtifactStore`], one directory per workflow instance with the
//!   seven stage folders created up front
//! - An [`ArtifactLocator`] per written file carrying its relative
//!   path, size, and SHA-256 digest, so downstream payloads reference
//!   artifacts by content as well as by name
//! - Per-stage `stage_metadata.json`, stamped with the stage number,
//!   stage name, and update time

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::workflow::{STAGES, StageInfo};

pub const STAGE_METADATA_FILE: &str = "stage_metadata.json";
pub const INSTANCE_METADATA_FILE: &str = "metadata.json";

/// Well-known artifact names produced by the pipeline stages.
pub mod names {
    pub const DATA_CSV: &str = "data.csv";
    pub const QUALITY_REPORT: &str = "quality_report.json";
    pub const CLEANED_DATA: &str = "cleaned_data.csv";
    pub const IMPUTATION_RESULTS: &str = "imputation_results.json";
    pub const OUTLIER_RESULTS: &str = "outlier_results.json";
    pub const VALIDATION_RESULTS: &str = "validation_results.json";
    pub const ANALYSIS_RESULTS: &str = "analysis_results.json";
    pub const KEY_STATISTICS: &str = "key_statistics.csv";
    pub const WEIGHTED_STATISTICS: &str = "weighted_statistics.json";
    pub const STATISTICS_SUMMARY: &str = "statistics_summary.csv";
    pub const FINAL_DATA: &str = "final_data.csv";
    pub const SUMMARY_JSON: &str = "summary.json";

    /// The untouched upload is kept beside the parsed `data.csv`.
    pub fn original_upload(filename: &str) -> String {
        format!("original_{filename}")
    }
}

/// Identity of one written artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLocator {
    pub name: String,
    pub relative_path: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Storage seam for stage artifacts.
pub trait ArtifactStore {
    /// Creates the instance directory with all seven stage folders and
    /// the instance-level metadata file.
    fn create_instance(&self, workflow_id: Uuid, metadata: &Value) -> Result<()>;

    fn write_artifact(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactLocator>;

    fn read_artifact(&self, workflow_id: Uuid, stage: &StageInfo, name: &str) -> Result<Vec<u8>>;

    /// Like [`ArtifactStore::read_artifact`] but absence is not an
    /// error; snapshot resolution probes for optional artifacts.
    fn try_read_artifact(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        name: &str,
    ) -> Result<Option<Vec<u8>>>;

    fn list_artifacts(&self, workflow_id: Uuid, stage: &StageInfo) -> Result<Vec<String>>;

    /// Writes the stage's `stage_metadata.json`. The payload must be a
    /// JSON object; `stage_number`, `stage_name`, and `updated_at` are
    /// stamped into it.
    fn write_stage_metadata(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        payload: Value,
    ) -> Result<()>;

    fn read_stage_metadata(&self, workflow_id: Uuid, stage: &StageInfo) -> Result<Option<Value>>;
}

/// Filesystem artifact store rooted at a data directory:
/// `<root>/<workflow_id>/<stage_folder>/<artifact>`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_path(&self, workflow_id: Uuid) -> PathBuf {
        self.root.join(workflow_id.to_string())
    }

    fn stage_path(&self, workflow_id: Uuid, stage: &StageInfo) -> PathBuf {
        self.instance_path(workflow_id).join(stage.folder)
    }

    fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn create_instance(&self, workflow_id: Uuid, metadata: &Value) -> Result<()> {
        for stage in &STAGES {
            std::fs::create_dir_all(self.stage_path(workflow_id, stage))?;
        }
        let file = File::create(self.instance_path(workflow_id).join(INSTANCE_METADATA_FILE))?;
        serde_json::to_writer_pretty(file, metadata)?;
        Ok(())
    }

    fn write_artifact(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactLocator> {
        let dir = self.stage_path(workflow_id, stage);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), bytes)?;
        Ok(ArtifactLocator {
            name: name.to_string(),
            relative_path: format!("{workflow_id}/{}/{name}", stage.folder),
            bytes: bytes.len() as u64,
            sha256: Self::digest(bytes),
        })
    }

    fn read_artifact(&self, workflow_id: Uuid, stage: &StageInfo, name: &str) -> Result<Vec<u8>> {
        self.try_read_artifact(workflow_id, stage, name)?
            .ok_or_else(|| {
                PipelineError::NotFound(format!("artifact {}/{name}", stage.folder))
            })
    }

    fn try_read_artifact(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.stage_path(workflow_id, stage).join(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn list_artifacts(&self, workflow_id: Uuid, stage: &StageInfo) -> Result<Vec<String>> {
        let dir = self.stage_path(workflow_id, stage);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_stage_metadata(
        &self,
        workflow_id: Uuid,
        stage: &StageInfo,
        payload: Value,
    ) -> Result<()> {
        let Value::Object(mut map) = payload else {
            return Err(PipelineError::Precondition(
                "stage metadata must be a JSON object".to_string(),
            ));
        };
        map.insert("stage_number".to_string(), Value::from(stage.number));
        map.insert("stage_name".to_string(), Value::from(stage.name));
        map.insert(
            "updated_at".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        let dir = self.stage_path(workflow_id, stage);
        std::fs::create_dir_all(&dir)?;
        let file = File::create(dir.join(STAGE_METADATA_FILE))?;
        serde_json::to_writer_pretty(file, &Value::Object(map))?;
        Ok(())
    }

    fn read_stage_metadata(&self, workflow_id: Uuid, stage: &StageInfo) -> Result<Option<Value>> {
        let path = self.stage_path(workflow_id, stage).join(STAGE_METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::stage_info;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn instance_creation_lays_out_all_stage_folders() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("data")).unwrap();
        let id = Uuid::new_v4();
        store.create_instance(id, &json!({"filename": "survey.csv"})).unwrap();

        for stage in &STAGES {
            assert!(dir.path().join("data").join(id.to_string()).join(stage.folder).is_dir());
        }
        assert!(
            dir.path()
                .join("data")
                .join(id.to_string())
                .join(INSTANCE_METADATA_FILE)
                .is_file()
        );
    }

    #[test]
    fn locators_carry_size_and_digest() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("data")).unwrap();
        let id = Uuid::new_v4();
        let stage = stage_info(1).unwrap();

        let locator = store
            .write_artifact(id, stage, names::DATA_CSV, b"hello world")
            .unwrap();
        assert_eq!(locator.bytes, 11);
        assert_eq!(
            locator.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(locator.relative_path, format!("{id}/01_upload/data.csv"));

        let bytes = store.read_artifact(id, stage, names::DATA_CSV).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn absent_artifacts_probe_as_none_but_read_as_not_found() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("data")).unwrap();
        let id = Uuid::new_v4();
        let stage = stage_info(2).unwrap();

        assert!(store.try_read_artifact(id, stage, names::CLEANED_DATA).unwrap().is_none());
        assert!(matches!(
            store.read_artifact(id, stage, names::CLEANED_DATA).unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }

    #[test]
    fn stage_metadata_is_stamped() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("data")).unwrap();
        let id = Uuid::new_v4();
        let stage = stage_info(5).unwrap();

        store
            .write_stage_metadata(id, stage, json!({"proposals": ["standard_survey"]}))
            .unwrap();
        let metadata = store.read_stage_metadata(id, stage).unwrap().unwrap();
        assert_eq!(metadata["stage_number"], 5);
        assert_eq!(metadata["stage_name"], "Propose Reports");
        assert_eq!(metadata["proposals"][0], "standard_survey");
        assert!(metadata["updated_at"].is_string());

        let err = store.write_stage_metadata(id, stage, json!(["not", "an", "object"]));
        assert!(err.is_err());
    }

    #[test]
    fn listing_returns_sorted_file_names() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("data")).unwrap();
        let id = Uuid::new_v4();
        let stage = stage_info(4).unwrap();

        store.write_artifact(id, stage, "b.json", b"{}").unwrap();
        store.write_artifact(id, stage, "a.csv", b"x\n1\n").unwrap();
        assert_eq!(store.list_artifacts(id, stage).unwrap(), vec!["a.csv", "b.json"]);
    }
}
