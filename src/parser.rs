// 🏗️ Table Parser Framework
// One reader per input format: delimited text for the primary export,
// spreadsheets for the GIS layer and the template

use crate::config::CsvOptions;
use crate::error::ReconError;
use anyhow::Result;
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Which input a table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Primary,
    Secondary,
    Template,
}

impl SourceKind {
    pub fn name(&self) -> &str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::Secondary => "secondary",
            SourceKind::Template => "template",
        }
    }
}

/// A single cell, before or after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Absent,
    Number(f64),
    Text(String),
    Bool(bool),
}

static ABSENT: Value = Value::Absent;

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Text(s.to_string())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Key form of a value: file links are text, but a numeric column
    /// still yields usable keys. Blank text counts as no key.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Absent => None,
            Value::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            Value::Number(n) => Some(format!("{}", n)),
            Value::Bool(b) => Some(b.to_string()),
        }
    }
}

/// Render a float the way the upstream tooling prints it: integral values
/// keep a trailing `.0`
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => Ok(()),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
        }
    }
}

/// One data row of a source table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub fields: HashMap<String, Value>,
    /// 1-based line (CSV) or sheet row (spreadsheet) the record came from
    pub line_number: usize,
}

impl SourceRecord {
    pub fn new(line_number: usize) -> Self {
        SourceRecord {
            fields: HashMap::new(),
            line_number,
        }
    }

    /// Builder pattern: add a field
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    /// Missing columns read as absent
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&ABSENT)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }
}

/// A fully loaded input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub kind: SourceKind,
    pub path: PathBuf,
    /// Header names, whitespace-stripped, in file order
    pub headers: Vec<String>,
    pub records: Vec<SourceRecord>,
    /// SHA-256 of the file bytes, hex
    pub fingerprint: String,
}

impl SourceTable {
    pub fn in_memory(kind: SourceKind, headers: &[&str], records: Vec<SourceRecord>) -> Self {
        SourceTable {
            kind,
            path: PathBuf::new(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            records,
            fingerprint: String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, field: &str) -> bool {
        self.headers.iter().any(|h| h == field)
    }
}

// ============================================================================
// READER TRAIT + FACTORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    Csv,
    Spreadsheet,
}

/// TableReader - one implementation per input format
pub trait TableReader: Send + Sync {
    /// Load the whole table into memory
    fn read(&self, path: &Path, kind: SourceKind) -> Result<SourceTable>;

    fn format(&self) -> TableFormat;
}

/// Pick a format from the file extension
///
/// # Examples:
/// ```
/// use quality_check::parser::{detect_format, TableFormat};
/// use std::path::Path;
///
/// assert_eq!(detect_format(Path::new("complot.csv")).unwrap(), TableFormat::Csv);
/// assert_eq!(detect_format(Path::new("layer.xlsx")).unwrap(), TableFormat::Spreadsheet);
/// ```
pub fn detect_format(path: &Path) -> Result<TableFormat> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" | "txt" | "tsv" => Ok(TableFormat::Csv),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(TableFormat::Spreadsheet),
        _ => Err(ReconError::input(
            path,
            format!("unsupported table format '.{}'", extension),
        )
        .into()),
    }
}

/// Factory: Box<dyn TableReader> for a format
pub fn get_reader(format: TableFormat, csv_options: &CsvOptions) -> Box<dyn TableReader> {
    match format {
        TableFormat::Csv => Box::new(CsvTableReader::new(csv_options.clone())),
        TableFormat::Spreadsheet => Box::new(SpreadsheetReader::new()),
    }
}

/// Detect the format and read in one step
pub fn read_table(path: &Path, kind: SourceKind, csv_options: &CsvOptions) -> Result<SourceTable> {
    let reader = get_reader(detect_format(path)?, csv_options);
    reader.read(path, kind)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| ReconError::input(path, e.to_string()))?;
    Ok(bytes)
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// CSV READER
// ============================================================================

pub struct CsvTableReader {
    options: CsvOptions,
}

impl CsvTableReader {
    pub fn new(options: CsvOptions) -> Self {
        CsvTableReader { options }
    }

    /// Parse already-decoded CSV text
    pub fn parse_str(&self, content: &str, path: &Path, kind: SourceKind) -> Result<SourceTable> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter as u8)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ReconError::input(path, format!("Failed to read CSV header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        // Cells first, types after: a column is numeric only if every
        // present cell in it parses
        let mut rows: Vec<(usize, Vec<Option<String>>)> = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                ReconError::input(path, format!("Failed to parse CSV line {}: {e}", index + 2))
            })?;

            // Whitespace-only lines are blank; `,,` rows stay as empty records
            if record.len() <= 1 && record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let cells = (0..headers.len())
                .map(|col| {
                    record
                        .get(col)
                        .filter(|cell| !self.is_null_token(cell))
                        .map(str::to_string)
                })
                .collect();

            // Fallback +2 because: 1-indexed + header row
            let line_number = record
                .position()
                .map(|pos| pos.line() as usize)
                .unwrap_or(index + 2);
            rows.push((line_number, cells));
        }

        let numeric_columns: Vec<bool> = (0..headers.len())
            .map(|col| {
                let mut present = rows.iter().filter_map(|(_, cells)| cells[col].as_deref()).peekable();
                present.peek().is_some() && present.all(|cell| cell.parse::<f64>().is_ok())
            })
            .collect();

        let records = rows
            .into_iter()
            .map(|(line_number, cells)| {
                let mut record = SourceRecord::new(line_number);
                for (col, cell) in cells.into_iter().enumerate() {
                    let value = match cell {
                        None => Value::Absent,
                        Some(s) if numeric_columns[col] => {
                            s.parse::<f64>().map(Value::Number).unwrap_or(Value::Text(s))
                        }
                        Some(s) => Value::Text(s),
                    };
                    // Repeated header: the leftmost column wins
                    record.fields.entry(headers[col].clone()).or_insert(value);
                }
                record
            })
            .collect();

        Ok(SourceTable {
            kind,
            path: path.to_path_buf(),
            headers,
            records,
            fingerprint: String::new(),
        })
    }

    fn is_null_token(&self, cell: &str) -> bool {
        self.options.null_tokens.iter().any(|token| token == cell)
    }
}

impl TableReader for CsvTableReader {
    fn read(&self, path: &Path, kind: SourceKind) -> Result<SourceTable> {
        let bytes = read_bytes(path)?;
        let content = decode_text(&bytes, &self.options.fallback_encoding);
        let mut table = self.parse_str(&content, path, kind)?;
        table.fingerprint = fingerprint(&bytes);

        debug!(
            source = kind.name(),
            path = %path.display(),
            columns = table.headers.len(),
            records = table.len(),
            "parsed CSV table"
        );

        Ok(table)
    }

    fn format(&self) -> TableFormat {
        TableFormat::Csv
    }
}

/// UTF-8 (BOM stripped) first, then the configured single-byte fallback.
/// Unknown labels fall back to windows-1255, the usual Hebrew Excel export.
pub fn decode_text(bytes: &[u8], fallback_label: &str) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let encoding = encoding_rs::Encoding::for_label(fallback_label.as_bytes())
                .unwrap_or(encoding_rs::WINDOWS_1255);
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
    }
}

// ============================================================================
// SPREADSHEET READER
// ============================================================================

/// First sheet, first row as header
pub struct SpreadsheetReader;

impl SpreadsheetReader {
    pub fn new() -> Self {
        SpreadsheetReader
    }
}

impl Default for SpreadsheetReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for SpreadsheetReader {
    fn read(&self, path: &Path, kind: SourceKind) -> Result<SourceTable> {
        let bytes = read_bytes(path)?;

        let mut workbook = open_workbook_auto(path)
            .map_err(|e| ReconError::input(path, format!("Failed to open workbook: {e}")))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReconError::input(path, "workbook contains no sheets"))?;

        let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
            ReconError::input(path, format!("Failed to read sheet '{sheet_name}': {e}"))
        })?;

        // Range may not begin at A1
        let (start_row, _) = range.start().unwrap_or((0, 0));
        let mut rows = range.rows();

        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .enumerate()
                .map(|(col, cell)| header_name(cell, col))
                .collect(),
            None => Vec::new(),
        };

        let mut records = Vec::new();
        for (index, row) in rows.enumerate() {
            // Blank rows inside the used range stay as empty records
            if row.len() <= 1 && row.iter().all(|cell| matches!(cell, Data::Empty)) {
                continue;
            }

            let mut record = SourceRecord::new(start_row as usize + index + 2);
            for (col, header) in headers.iter().enumerate() {
                let value = row.get(col).map(cell_value).unwrap_or(Value::Absent);
                record.fields.entry(header.clone()).or_insert(value);
            }
            records.push(record);
        }

        debug!(
            source = kind.name(),
            path = %path.display(),
            sheet = %sheet_name,
            columns = headers.len(),
            records = records.len(),
            "parsed spreadsheet table"
        );

        Ok(SourceTable {
            kind,
            path: path.to_path_buf(),
            headers,
            records,
            fingerprint: fingerprint(&bytes),
        })
    }

    fn format(&self) -> TableFormat {
        TableFormat::Spreadsheet
    }
}

fn header_name(cell: &Data, col: usize) -> String {
    let name = match cell_value(cell) {
        Value::Absent => String::new(),
        Value::Number(n) => Value::Number(n).as_key().unwrap_or_default(),
        other => other.to_string(),
    };
    let name = name.trim();
    if name.is_empty() {
        format!("Unnamed: {col}")
    } else {
        name.to_string()
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Absent,
        Data::String(s) if s.is_empty() => Value::Absent,
        Data::String(s) => Value::Text(s.clone()),
        Data::Float(n) => Value::Number(*n),
        Data::Int(n) => Value::Number(*n as f64),
        Data::Bool(b) => Value::Bool(*b),
        // Dates stay as Excel serials; none of the compared fields are dates
        Data::DateTime(dt) => Value::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) => Value::Absent,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_reader() -> CsvTableReader {
        CsvTableReader::new(CsvOptions::default())
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.csv")).unwrap(), TableFormat::Csv);
        assert_eq!(detect_format(Path::new("a.CSV")).unwrap(), TableFormat::Csv);
        assert_eq!(detect_format(Path::new("b.xlsx")).unwrap(), TableFormat::Spreadsheet);
        assert_eq!(detect_format(Path::new("b.xls")).unwrap(), TableFormat::Spreadsheet);
    }

    #[test]
    fn test_detect_format_unknown() {
        let err = detect_format(Path::new("notes.pdf")).unwrap_err();
        let root = err.downcast_ref::<ReconError>().unwrap();
        assert!(root.is_input());
    }

    #[test]
    fn test_get_reader() {
        let options = CsvOptions::default();
        assert_eq!(get_reader(TableFormat::Csv, &options).format(), TableFormat::Csv);
        assert_eq!(
            get_reader(TableFormat::Spreadsheet, &options).format(),
            TableFormat::Spreadsheet
        );
    }

    #[test]
    fn test_parse_csv_strips_headers() {
        let content = " key ,block\nA1,12\nA2,13\n";
        let table = csv_reader()
            .parse_str(content, Path::new("x.csv"), SourceKind::Primary)
            .unwrap();

        assert_eq!(table.headers, vec!["key", "block"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].get("key"), &Value::text("A1"));
        assert_eq!(table.records[0].line_number, 2);
        assert_eq!(table.records[1].line_number, 3);
    }

    #[test]
    fn test_parse_csv_column_types() {
        let content = "key,block,code\nA1,12,007\nA2,,X9\nA3,14.5,010\n";
        let table = csv_reader()
            .parse_str(content, Path::new("x.csv"), SourceKind::Primary)
            .unwrap();

        // All present cells numeric -> numbers
        assert_eq!(table.records[0].get("block"), &Value::Number(12.0));
        assert_eq!(table.records[1].get("block"), &Value::Absent);
        assert_eq!(table.records[2].get("block"), &Value::Number(14.5));

        // Mixed column stays text, leading zeros preserved
        assert_eq!(table.records[0].get("code"), &Value::text("007"));
        assert_eq!(table.records[1].get("code"), &Value::text("X9"));
    }

    #[test]
    fn test_parse_csv_null_tokens() {
        let content = "key,address\nA1,NA\nA2,n/a\nA3,<Null>\n";
        let table = csv_reader()
            .parse_str(content, Path::new("x.csv"), SourceKind::Primary)
            .unwrap();

        assert_eq!(table.records[0].get("address"), &Value::Absent);
        assert_eq!(table.records[1].get("address"), &Value::Absent);
        // The GIS placeholder is the normalizer's job, not the reader's
        assert_eq!(table.records[2].get("address"), &Value::text("<Null>"));
    }

    #[test]
    fn test_parse_csv_skips_blank_lines_and_short_rows() {
        let content = "key,block,plot\nA1,12\n\n   \nA2,13,4\n";
        let table = csv_reader()
            .parse_str(content, Path::new("x.csv"), SourceKind::Primary)
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].get("plot"), &Value::Absent);
        assert_eq!(table.records[1].line_number, 5);
    }

    #[test]
    fn test_parse_csv_keeps_delimiter_only_rows() {
        let content = "key,block,plot\nA1,12,3\n,,\nA2,13,4\n";
        let table = csv_reader()
            .parse_str(content, Path::new("x.csv"), SourceKind::Primary)
            .unwrap();

        assert_eq!(table.len(), 3);
        let empty = &table.records[1];
        assert_eq!(empty.line_number, 3);
        assert!(empty.get("key").is_absent());
        assert!(empty.get("block").is_absent());
        // Numeric inference ignores the empty row
        assert_eq!(table.records[2].get("block"), &Value::Number(13.0));
    }

    #[test]
    fn test_missing_column_reads_absent() {
        let record = SourceRecord::new(2).with("key", Value::text("A1"));
        assert_eq!(record.get("nope"), &Value::Absent);
    }

    #[test]
    fn test_decode_text_utf8_with_bom() {
        let bytes = b"\xEF\xBB\xBFkey,block\n";
        assert_eq!(decode_text(bytes, "windows-1255"), "key,block\n");
    }

    #[test]
    fn test_decode_text_windows_1255_fallback() {
        // "גוש" in windows-1255
        let bytes = [0xE2, 0xE5, 0xF9];
        assert_eq!(decode_text(&bytes, "windows-1255"), "גוש");
    }

    #[test]
    fn test_value_as_key() {
        assert_eq!(Value::text("  /files/a.pdf ").as_key(), Some("/files/a.pdf".to_string()));
        assert_eq!(Value::text("   ").as_key(), None);
        assert_eq!(Value::Absent.as_key(), None);
        assert_eq!(Value::Number(123.0).as_key(), Some("123".to_string()));
        assert_eq!(Value::Number(1.5).as_key(), Some("1.5".to_string()));
        assert_eq!(Value::Number(f64::NAN).as_key(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(5.0).to_string(), "5.0");
        assert_eq!(Value::Number(12.25).to_string(), "12.25");
        assert_eq!(Value::text(" x ").to_string(), " x ");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Absent.to_string(), "");
    }

    #[test]
    fn test_csv_reader_reads_file_and_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complot.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all("קישור לקובץ,גוש\nA1,12\n".as_bytes()).unwrap();
        drop(file);

        let table = csv_reader().read(&path, SourceKind::Primary).unwrap();
        assert_eq!(table.headers, vec!["קישור לקובץ", "גוש"]);
        assert_eq!(table.fingerprint.len(), 64);
        assert_eq!(table.path, path);
    }

    #[test]
    fn test_missing_file_is_input_error() {
        let err = csv_reader()
            .read(Path::new("/definitely/not/here.csv"), SourceKind::Primary)
            .unwrap_err();
        assert!(err.downcast_ref::<ReconError>().unwrap().is_input());
    }

    #[test]
    fn test_spreadsheet_reader_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.xlsx");

        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, " key ").unwrap();
        sheet.write_string(0, 1, "block").unwrap();
        sheet.write_string(1, 0, "A1").unwrap();
        sheet.write_number(1, 1, 12.0).unwrap();
        sheet.write_string(3, 0, "A2").unwrap();
        sheet.write_string(3, 1, "<Null>").unwrap();
        let second = workbook.add_worksheet();
        second.write_string(0, 0, "ignored").unwrap();
        workbook.save(&path).unwrap();

        let table = SpreadsheetReader::new().read(&path, SourceKind::Secondary).unwrap();

        assert_eq!(table.headers, vec!["key", "block"]);
        // Blank row 3 is kept as a record without a key
        assert_eq!(table.len(), 3);
        assert_eq!(table.records[0].get("block"), &Value::Number(12.0));
        assert!(table.records[1].get("key").is_absent());
        assert_eq!(table.records[1].line_number, 3);
        assert_eq!(table.records[2].get("block"), &Value::text("<Null>"));
        assert_eq!(table.records[2].line_number, 4);
    }
}
