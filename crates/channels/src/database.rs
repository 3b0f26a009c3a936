//! Recipient database: a CSV file with a header row, one recipient per record.

use mailmerge_core::{MailmergeError, MailmergeResult};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub type Row = HashMap<String, String>;

/// Read every record of the CSV file at `path` as `column -> value`.
pub fn read_database(path: &Path) -> MailmergeResult<Vec<Row>> {
    let file = std::fs::File::open(path).map_err(|e| {
        MailmergeError::Database(format!("cannot open {}: {e}", path.display()))
    })?;
    let rows = read_rows(file)?;
    debug!(path = %path.display(), rows = rows.len(), "Database loaded");
    Ok(rows)
}

pub fn read_rows<R: Read>(reader: R) -> MailmergeResult<Vec<Row>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv
        .headers()
        .map_err(|e| MailmergeError::Database(e.to_string()))?
        .clone();

    csv.records()
        .enumerate()
        .map(|(idx, record)| -> MailmergeResult<Row> {
            let record = record
                .map_err(|e| MailmergeError::Database(format!("record {}: {e}", idx + 1)))?;
            Ok(headers
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect())
        })
        .collect()
}
