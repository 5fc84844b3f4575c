//! Minimal reader for the comma-separated files the simulator and metering
//! exports produce: one header row, double-quoted fields, no embedded
//! newlines.

use std::path::Path;

use super::error::{ExtractError, ExtractResult};

/// Parsed file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// File did not end with a newline, so the last row may be partial.
    pub truncated: bool,
}

/// Split one record, honouring double quotes and `""` escapes.
pub fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Read a whole file. Blank lines are skipped; a UTF-8 BOM is dropped.
pub fn read_table(path: &Path) -> ExtractResult<CsvTable> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim_start_matches('\u{feff}');

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Err(ExtractError::Malformed {
            path: path.to_path_buf(),
            reason: "empty file, expected a header row".to_string(),
        });
    };

    Ok(CsvTable {
        headers: split_record(header)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect(),
        rows: lines.map(split_record).collect(),
        truncated: !text.is_empty() && !text.ends_with('\n'),
    })
}
