#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns a path for the pipeline's data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Ten-respondent household survey with design weights, one missing
/// age, one missing income, and one extreme income.
pub fn survey_csv() -> String {
    concat!(
        "respondent_id,age,income,weight,region,satisfaction,owns_home,joined\n",
        "1,34,52000,1.2,north,4,yes,2024-01-15\n",
        "2,41,61000,0.8,south,5,no,2024-01-16\n",
        "3,29,48000,1.1,east,3,yes,2024-01-17\n",
        "4,55,,1.4,north,4,no,2024-01-18\n",
        "5,38,57000,0.9,west,2,yes,2024-01-19\n",
        "6,,50000,1.0,south,3,no,2024-01-20\n",
        "7,47,250000,1.3,north,5,yes,2024-01-21\n",
        "8,33,46000,0.7,east,1,no,2024-01-22\n",
        "9,52,63000,1.2,south,4,yes,2024-01-23\n",
        "10,26,44000,1.1,west,3,no,2024-01-24\n",
    )
    .to_string()
}

/// Imputation configuration covering the fixture's two gappy columns.
pub fn impute_yaml() -> &'static str {
    concat!(
        "columns:\n",
        "  age:\n",
        "    strategy: median\n",
        "  income:\n",
        "    strategy: mean\n",
    )
}

/// Outlier configuration capping the fixture's extreme income.
pub fn outliers_yaml() -> &'static str {
    "columns:\n  income: cap\n"
}

pub fn validate_yaml() -> &'static str {
    concat!(
        "rules:\n",
        "  - rule: range\n",
        "    column: age\n",
        "    min: 18\n",
        "    max: 99\n",
        "  - rule: unique\n",
        "    column: respondent_id\n",
        "  - rule: allowed_values\n",
        "    column: region\n",
        "    values: [north, south, east, west]\n",
    )
}

pub fn estimate_yaml() -> &'static str {
    concat!(
        "weight: weight\n",
        "variables: [age, income]\n",
        "proportions:\n",
        "  - variable: region\n",
        "    category: north\n",
        "tests:\n",
        "  - variable_1: age\n",
        "    variable_2: income\n",
    )
}

pub fn selection_yaml() -> &'static str {
    "templates: [standard_survey, executive_summary]\nnotes: quarterly run\n"
}
