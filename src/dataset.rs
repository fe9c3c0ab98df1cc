//! Columnar dataset model: typed columns, uniform missing markers, and
//! CSV round-tripping.
//!
//! ## Responsibilities
//!
//! - [`Dataset`] construction with equal-length and unique-name checks
//! - Four column kinds (numeric, categorical, boolean, datetime) with
//!   `Option<T>` as the single missing-value representation
//! - Copy-on-write helpers (`replace_column`, `retain_rows`) so engines
//!   never mutate their input
//! - Display-string conversion and CSV serialization of any snapshot

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const DATETIME_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The four column kinds a survey dataset distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Boolean,
    DateTime,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Boolean => "boolean",
            ColumnKind::DateTime => "datetime",
        };
        write!(f, "{name}")
    }
}

/// Typed cell storage for one column; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
    DateTime(Vec<Option<NaiveDateTime>>),
}

impl ColumnValues {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValues::Numeric(_) => ColumnKind::Numeric,
            ColumnValues::Categorical(_) => ColumnKind::Categorical,
            ColumnValues::Boolean(_) => ColumnKind::Boolean,
            ColumnValues::DateTime(_) => ColumnKind::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Categorical(v) => v.len(),
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::DateTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missing_count(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnValues::Categorical(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnValues::Boolean(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnValues::DateTime(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    pub fn is_missing_at(&self, row: usize) -> bool {
        match self {
            ColumnValues::Numeric(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnValues::Categorical(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnValues::Boolean(v) => v.get(row).is_none_or(|c| c.is_none()),
            ColumnValues::DateTime(v) => v.get(row).is_none_or(|c| c.is_none()),
        }
    }

    /// Display string for one cell; `None` when the cell is missing.
    pub fn display_at(&self, row: usize) -> Option<String> {
        match self {
            ColumnValues::Numeric(v) => v.get(row).copied().flatten().map(format_numeric),
            ColumnValues::Categorical(v) => v.get(row).cloned().flatten(),
            ColumnValues::Boolean(v) => v.get(row).copied().flatten().map(|b| b.to_string()),
            ColumnValues::DateTime(v) => v
                .get(row)
                .copied()
                .flatten()
                .map(|dt| dt.format(DATETIME_DISPLAY_FORMAT).to_string()),
        }
    }

    fn retain_rows(&self, keep: &[bool]) -> ColumnValues {
        fn filter<T: Clone>(values: &[Option<T>], keep: &[bool]) -> Vec<Option<T>> {
            values
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            ColumnValues::Numeric(v) => ColumnValues::Numeric(filter(v, keep)),
            ColumnValues::Categorical(v) => ColumnValues::Categorical(filter(v, keep)),
            ColumnValues::Boolean(v) => ColumnValues::Boolean(filter(v, keep)),
            ColumnValues::DateTime(v) => ColumnValues::DateTime(filter(v, keep)),
        }
    }
}

/// Formats a numeric cell the way it is written to CSV: integral values
/// drop the fractional part so codes like `42` survive a round trip.
pub fn format_numeric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnValues::Numeric(values))
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnValues::Categorical(values))
    }

    pub fn kind(&self) -> ColumnKind {
        self.values.kind()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.values.missing_count()
    }

    pub fn present_count(&self) -> usize {
        self.len() - self.missing_count()
    }

    /// Aligned numeric cells, or `None` for non-numeric columns.
    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.values {
            ColumnValues::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Non-missing numeric values in row order.
    pub fn present_numeric(&self) -> Vec<f64> {
        self.as_numeric()
            .map(|v| v.iter().copied().flatten().collect())
            .unwrap_or_default()
    }

    /// Aligned display strings for every row (missing stays `None`).
    pub fn display_values(&self) -> Vec<Option<String>> {
        (0..self.len()).map(|row| self.values.display_at(row)).collect()
    }
}

/// An immutable table of equally long, uniquely named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    /// Builds a dataset, rejecting unequal column lengths and duplicate
    /// names.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let expected = first.len();
            for column in &columns {
                if column.len() != expected {
                    return Err(PipelineError::Precondition(format!(
                        "column '{}' has {} row(s), expected {}",
                        column.name,
                        column.len(),
                        expected
                    )));
                }
            }
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::Precondition(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::column_not_found(name))
    }

    /// Aligned numeric cells of a named column; typed errors for a
    /// missing column or a non-numeric one.
    pub fn numeric_column(&self, name: &str) -> Result<&[Option<f64>]> {
        let column = self.column(name)?;
        column
            .as_numeric()
            .ok_or_else(|| PipelineError::invalid_column_type(name, "numeric"))
    }

    /// Returns a copy with one column's cells replaced.
    pub fn replace_column(&self, name: &str, values: ColumnValues) -> Result<Dataset> {
        if values.len() != self.row_count() {
            return Err(PipelineError::Precondition(format!(
                "replacement for '{}' has {} row(s), expected {}",
                name,
                values.len(),
                self.row_count()
            )));
        }
        let mut columns = self.columns.clone();
        let slot = columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| PipelineError::column_not_found(name))?;
        slot.values = values;
        Ok(Dataset { columns })
    }

    /// Returns a copy keeping only rows flagged `true` in `keep`.
    pub fn retain_rows(&self, keep: &[bool]) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.values.retain_rows(keep)))
            .collect();
        Dataset { columns }
    }

    /// First `n` rows as display strings (missing cells become empty).
    pub fn head(&self, n: usize) -> Vec<Vec<String>> {
        let rows = self.row_count().min(n);
        (0..rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| c.values.display_at(row).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Serializes the dataset as CSV with a header row.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(self.columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| PipelineError::Parse(e.to_string()))?;
        for row in 0..self.row_count() {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|c| c.values.display_at(row).unwrap_or_default())
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| PipelineError::Parse(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::Parse(e.to_string()))
    }

    /// Writes the dataset as a CSV file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let bytes = self.to_csv_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
