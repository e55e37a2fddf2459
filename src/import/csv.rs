use std::collections::BTreeMap;
use tracing::warn;

use super::ImportRow;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub rows: Vec<ImportRow>,
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Parses an uploaded CSV. Header names are trimmed and lowercased. Each row
/// keeps the physical line it starts on (the header is line 1) so operators
/// can find it in a spreadsheet. Blank lines are skipped but still counted,
/// and quoted cells may span lines.
pub fn parse_rows(text: &str) -> ParsedFile {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(Ok(record)) => record.iter().map(|h| h.trim().to_ascii_lowercase()).collect(),
        Some(Err(e)) => {
            warn!(error = %e, "unreadable csv header");
            return ParsedFile::default();
        }
        None => return ParsedFile::default(),
    };

    let mut rows = Vec::new();
    for result in records {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, rows = rows.len(), "csv reading stopped early");
                break;
            }
        };
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let mut values = BTreeMap::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = record.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
            values.insert(header.clone(), value);
        }
        rows.push(ImportRow { row: line, values });
    }
    ParsedFile { headers, rows }
}
