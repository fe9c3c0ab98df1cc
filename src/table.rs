//! Plain-text table rendering for the status and preview commands.

use std::borrow::Cow;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::workflow::{STAGES, StageRecord};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| cell_width(h)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", format_row(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(out, "{}", format_row(row, &widths));
    }
    out
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Rows for the seven-stage status table: number, name, status, and
/// the lifecycle timestamps.
pub fn stage_rows(records: &[StageRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|record| {
            let name = STAGES
                .iter()
                .find(|s| s.number == record.stage_number)
                .map_or("?", |s| s.name);
            vec![
                record.stage_number.to_string(),
                name.to_string(),
                record.status.to_string(),
                record.started_at.map_or_else(|| "-".to_string(), format_stamp),
                record.completed_at.map_or_else(|| "-".to_string(), format_stamp),
            ]
        })
        .collect()
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let mut padded = Vec::with_capacity(cells.len());
    for (idx, cell) in cells.iter().enumerate().take(widths.len()) {
        let sanitized = sanitize_cell(cell);
        let pad = widths[idx].saturating_sub(cell_width(&sanitized));
        let mut out = sanitized.into_owned();
        out.push_str(&" ".repeat(pad));
        padded.push(out);
    }
    let mut line = padded.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn cell_width(cell: &str) -> usize {
    sanitize_cell(cell).chars().count()
}

fn sanitize_cell(cell: &str) -> Cow<'_, str> {
    if cell.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            cell.chars()
                .map(|ch| match ch {
                    '\n' | '\r' | '\t' => ' ',
                    other => other,
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::seed_stage_records;
    use uuid::Uuid;

    #[test]
    fn columns_align_and_trailing_spaces_are_trimmed() {
        let headers = vec!["name".to_string(), "n".to_string()];
        let rows = vec![
            vec!["age".to_string(), "120".to_string()],
            vec!["household_income".to_string(), "98".to_string()],
        ];
        let rendered = render_table(&headers, &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "name              n");
        assert_eq!(lines[1], "----------------  ---");
        assert_eq!(lines[2], "age               120");
        assert_eq!(lines[3], "household_income  98");
    }

    #[test]
    fn stage_rows_cover_the_whole_catalogue() {
        let records = seed_stage_records(Uuid::new_v4());
        let rows = stage_rows(&records);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0], vec!["1", "Raw Data Upload", "pending", "-", "-"]);
        assert_eq!(rows[6][1], "Final Report Generation");
    }

    #[test]
    fn control_characters_become_spaces() {
        let rendered = render_table(
            &vec!["v".to_string()],
            &[vec!["a\tb".to_string()]],
        );
        assert!(rendered.contains("a b"));
    }
}
