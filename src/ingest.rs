//! Upload ingestion: byte decoding, column-kind inference, dataset
//! construction, and the stage-one profile.
//!
//! ## Responsibilities
//!
//! - Encoding resolution (explicit label or UTF-8 with Windows-1252
//!   fallback)
//! - CSV parsing with a required header row; ragged rows are fatal
//! - Column-kind inference via candidate elimination
//!   (boolean -> numeric -> datetime -> categorical)
//! - Placeholder handling (`NA`, `N/A`, `null`, `NaN`, `none`, `-`)
//! - The upload profile recorded as stage-one metadata

use chrono::{NaiveDate, NaiveDateTime};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::debug;
use serde::Serialize;

use crate::dataset::{Column, ColumnKind, ColumnValues, Dataset};
use crate::error::{PipelineError, Result};

const MISSING_PLACEHOLDERS: &[&str] = &["na", "n/a", "null", "nan", "none", "-"];
const PROFILE_SAMPLE_ROWS: usize = 5;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Per-column summary recorded alongside the parsed upload.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub missing: usize,
}

/// Stage-one metadata payload describing the parsed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadProfile {
    pub row_count: usize,
    pub column_count: usize,
    pub encoding: String,
    pub columns: Vec<ColumnProfile>,
    pub sample_rows: Vec<Vec<String>>,
}

/// Resolves an encoding label (`utf-8`, `windows-1252`, `latin1`, ...).
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| PipelineError::Parse(format!("unknown encoding label '{label}'")))
}

/// Decodes upload bytes. With an explicit encoding any malformed
/// sequence is fatal; otherwise UTF-8 is tried first and Windows-1252
/// used as the fallback.
pub fn decode_upload(bytes: &[u8], encoding: Option<&'static Encoding>) -> Result<(String, String)> {
    if let Some(encoding) = encoding {
        let (text, used, had_errors) = encoding.decode(bytes);
        if had_errors {
            return Err(PipelineError::Parse(format!(
                "input is not valid {}",
                used.name()
            )));
        }
        return Ok((text.into_owned(), used.name().to_string()));
    }
    let (text, used, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return Ok((text.into_owned(), used.name().to_string()));
    }
    debug!("UTF-8 decode failed, falling back to Windows-1252");
    let (text, used, _) = WINDOWS_1252.decode(bytes);
    Ok((text.into_owned(), used.name().to_string()))
}

fn is_missing_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || MISSING_PLACEHOLDERS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Candidate elimination over one column's non-missing values.
#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_boolean: bool,
    possible_numeric: bool,
    possible_datetime: bool,
    observed: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_boolean: true,
            possible_numeric: true,
            possible_datetime: true,
            observed: false,
        }
    }

    fn update(&mut self, raw: &str) {
        if is_missing_placeholder(raw) {
            return;
        }
        self.observed = true;
        if self.possible_boolean && parse_boolean(raw).is_none() {
            self.possible_boolean = false;
        }
        if self.possible_numeric && parse_numeric(raw).is_none() {
            self.possible_numeric = false;
        }
        if self.possible_datetime && parse_datetime(raw).is_none() {
            self.possible_datetime = false;
        }
    }

    fn decide(&self) -> ColumnKind {
        // An all-missing column reads as numeric, matching how an empty
        // column loads in the common dataframe tools.
        if !self.observed {
            return ColumnKind::Numeric;
        }
        if self.possible_boolean {
            ColumnKind::Boolean
        } else if self.possible_numeric {
            ColumnKind::Numeric
        } else if self.possible_datetime {
            ColumnKind::DateTime
        } else {
            ColumnKind::Categorical
        }
    }
}

/// Parses decoded CSV text into a typed dataset.
pub fn parse_dataset(text: &str, delimiter: u8) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::Parse(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        return Err(PipelineError::Parse("input has no header row".to_string()));
    }

    let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    let mut candidates: Vec<TypeCandidate> = vec![TypeCandidate::new(); headers.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PipelineError::Parse(e.to_string()))?;
        if record.len() != headers.len() {
            return Err(PipelineError::Parse(format!(
                "row {} has {} field(s), expected {}",
                line + 2,
                record.len(),
                headers.len()
            )));
        }
        for (idx, field) in record.iter().enumerate() {
            candidates[idx].update(field);
            raw_columns[idx].push(field.to_string());
        }
    }

    let mut columns = Vec::with_capacity(headers.len());
    for ((name, raw), candidate) in headers.iter().zip(raw_columns).zip(&candidates) {
        let kind = candidate.decide();
        debug!("column '{name}' inferred as {kind}");
        columns.push(Column::new(name.clone(), build_values(&raw, kind)?));
    }
    Dataset::new(columns)
}

fn build_values(raw: &[String], kind: ColumnKind) -> Result<ColumnValues> {
    let values = match kind {
        ColumnKind::Numeric => ColumnValues::Numeric(
            raw.iter()
                .map(|v| convert(v, parse_numeric, "number"))
                .collect::<Result<_>>()?,
        ),
        ColumnKind::Boolean => ColumnValues::Boolean(
            raw.iter()
                .map(|v| convert(v, parse_boolean, "boolean"))
                .collect::<Result<_>>()?,
        ),
        ColumnKind::DateTime => ColumnValues::DateTime(
            raw.iter()
                .map(|v| convert(v, parse_datetime, "datetime"))
                .collect::<Result<_>>()?,
        ),
        ColumnKind::Categorical => ColumnValues::Categorical(
            raw.iter()
                .map(|v| {
                    if is_missing_placeholder(v) {
                        None
                    } else {
                        Some(v.trim().to_string())
                    }
                })
                .collect(),
        ),
    };
    Ok(values)
}

fn convert<T>(raw: &str, parse: fn(&str) -> Option<T>, what: &str) -> Result<Option<T>> {
    if is_missing_placeholder(raw) {
        return Ok(None);
    }
    parse(raw)
        .map(Some)
        .ok_or_else(|| PipelineError::Parse(format!("failed to parse '{raw}' as {what}")))
}

/// Decodes and parses an upload in one step.
pub fn ingest_bytes(
    bytes: &[u8],
    delimiter: u8,
    encoding: Option<&'static Encoding>,
) -> Result<(Dataset, UploadProfile)> {
    let (text, used) = decode_upload(bytes, encoding)?;
    let dataset = parse_dataset(&text, delimiter)?;
    let profile = profile_dataset(&dataset, &used);
    Ok((dataset, profile))
}

/// Parses a pipeline-written snapshot (always UTF-8, comma-delimited).
pub fn parse_snapshot(bytes: &[u8]) -> Result<Dataset> {
    let (text, _) = decode_upload(bytes, Some(UTF_8))?;
    parse_dataset(&text, b',')
}

/// Builds the stage-one profile for a parsed dataset.
pub fn profile_dataset(dataset: &Dataset, encoding: &str) -> UploadProfile {
    let columns = dataset
        .columns()
        .iter()
        .map(|c| ColumnProfile {
            name: c.name.clone(),
            kind: c.kind(),
            missing: c.missing_count(),
        })
        .collect();
    UploadProfile {
        row_count: dataset.row_count(),
        column_count: dataset.column_count(),
        encoding: encoding.to_string(),
        columns,
        sample_rows: dataset.head(PROFILE_SAMPLE_ROWS),
    }
}
