use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// One worksheet row keyed by the header row. Cells the sheet leaves blank
/// are absent from the map, not empty strings; the ingestion pipeline relies
/// on that distinction.
pub type UploadRow = Map<String, Value>;

#[derive(Debug, Error)]
#[error("unreadable workbook: {0}")]
pub struct ParseError(#[from] calamine::XlsxError);

/// Decodes the first sheet of an uploaded workbook into rows keyed by the
/// header row, preserving sheet row order. A workbook with no sheets, or a
/// sheet with only a header, yields an empty vector.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<UploadRow>, ParseError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;
    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(header_name).collect();

    let mut parsed = Vec::new();
    for row in rows {
        let mut record = Map::new();
        for (idx, cell) in row.iter().enumerate() {
            let Some(header) = headers.get(idx).filter(|h| !h.is_empty()) else {
                continue;
            };
            if let Some(value) = cell_to_value(cell) {
                record.insert(header.clone(), value);
            }
        }
        // xlsx ranges routinely over-report trailing blank rows
        if !record.is_empty() {
            parsed.push(record);
        }
    }
    Ok(parsed)
}

fn header_name(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Maps a cell to JSON; `None` means the field is absent from the row.
fn cell_to_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Int(i) => Some(json!(*i)),
        Data::Float(f) => {
            // Excel stores every number as a float; keep whole values integral.
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Some(json!(*f as i64))
            } else {
                Some(json!(*f))
            }
        }
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => Some(Value::String(format!("{}", dt))),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::String(s.clone())),
        Data::Error(_) => None,
    }
}
