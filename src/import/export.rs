use anyhow::Context;
use std::path::Path;

use super::csv::csv_quote;
use super::ImportRun;

/// Error report for a run: `row,message` followed by the file's own
/// columns, one line per failed row in source order.
pub fn errors_csv(run: &ImportRun) -> String {
    let mut out = String::new();
    let mut header = vec!["row".to_string(), "message".to_string()];
    header.extend(run.headers.iter().filter(|h| !h.is_empty()).cloned());
    out.push_str(
        &header
            .iter()
            .map(|h| csv_quote(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for outcome in &run.outcomes {
        let mut fields = vec![
            outcome.row.to_string(),
            csv_quote(outcome.message.as_deref().unwrap_or("")),
        ];
        for column in run.headers.iter().filter(|h| !h.is_empty()) {
            let value = outcome
                .data
                .as_ref()
                .and_then(|d| d.get(column))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            fields.push(csv_quote(&value));
        }
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn write_errors_csv(run: &ImportRun, out_path: &Path) -> anyhow::Result<usize> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, errors_csv(run))
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(run.outcomes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::csv::parse_rows;
    use crate::import::{fingerprint, ImportEntity, ImportReport, RowStatus};

    #[test]
    fn failed_rows_are_listed_by_source_line() {
        let text = "student_no,last_name,first_name\n10,Diaz,Ana\n11,,Luis\n12,\"Paz, de\",\n";
        let mut report = ImportReport::new(ImportEntity::Students, true);
        report.record(RowStatus::Created);
        report.record_failure(4, "missing first_name", None);
        report.record_failure(3, "missing last_name", None);
        let run = ImportRun::new(
            ImportEntity::Students,
            "s.csv".into(),
            fingerprint(text.as_bytes()),
            parse_rows(text),
            report,
        );
        let csv = errors_csv(&run);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "row,message,student_no,last_name,first_name");
        assert_eq!(lines[1], "3,missing last_name,11,,Luis");
        assert_eq!(lines[2], "4,missing first_name,12,\"Paz, de\",");
    }
}
