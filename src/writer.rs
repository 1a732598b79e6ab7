// 💾 Result Writer - merged table (xlsx) + text report
//
// Both artifacts are staged as `<name>.tmp` siblings and renamed into place
// only once both staged files exist. A failed run leaves neither a new table
// nor a table without its report.

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::parser::Value;
use crate::reconciliation::Reconciliation;
use crate::report::RunReport;
use anyhow::Result;
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Workbook};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SHEET_NAME: &str = "Sheet1";
const COLUMN_WIDTH: f64 = 20.0;

/// Where the two artifacts of a run ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenOutputs {
    pub table_path: PathBuf,
    pub report_path: PathBuf,
}

/// `<dir>/<stem><suffix>.txt` next to the merged table
///
/// ```
/// use quality_check::writer::report_path_for;
/// use std::path::Path;
///
/// let path = report_path_for(Path::new("/out/filled.xlsx"), "_report");
/// assert_eq!(path, Path::new("/out/filled_report.txt"));
/// ```
pub fn report_path_for(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}{suffix}.txt"))
}

/// Serialize the merged table to xlsx bytes
pub fn render_workbook(result: &Reconciliation, config: &ReconConfig) -> Result<Vec<u8>, String> {
    let mut workbook = Workbook::new();

    // Fixed creation date: reruns produce identical bytes
    let created = ExcelDateTime::from_ymd(2000, 1, 1)
        .map_err(|e| format!("Failed to set document properties: {e}"))?;
    workbook.set_properties(&DocProperties::new().set_creation_datetime(&created));

    let header_format = Format::new().set_bold().set_text_wrap();

    let worksheet = workbook
        .add_worksheet()
        .set_name(SHEET_NAME)
        .map_err(|e| format!("Failed to create sheet: {e}"))?;

    for (col, header) in config.output_headers().into_iter().enumerate() {
        let col = col as u16;
        worksheet
            .write_string_with_format(0, col, header, &header_format)
            .map_err(|e| format!("Failed to write header: {e}"))?;
        worksheet
            .set_column_width(col, COLUMN_WIDTH)
            .map_err(|e| format!("Failed to set column width: {e}"))?;
    }
    worksheet
        .set_freeze_panes(1, 0)
        .map_err(|e| format!("Failed to freeze header row: {e}"))?;

    for (index, record) in result.records.iter().enumerate() {
        let row = index as u32 + 1;
        for (col, cell) in record.cells(config).iter().enumerate() {
            let col = col as u16;
            let written = match cell {
                // Absent cells stay blank
                Value::Absent => continue,
                Value::Number(n) if !n.is_finite() => continue,
                Value::Number(n) => worksheet.write_number(row, col, *n).map(|_| ()),
                Value::Text(s) => worksheet.write_string(row, col, s).map(|_| ()),
                Value::Bool(b) => worksheet.write_boolean(row, col, *b).map(|_| ()),
            };
            written.map_err(|e| format!("Failed to write row {} ({}): {e}", row + 1, record.key))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| format!("Failed to serialize workbook: {e}"))
}

/// Temp sibling an artifact is written to before the rename
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` next to `path`, returning the staged file
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let staged = staging_path(path);
    if let Err(e) = std::fs::write(&staged, bytes) {
        discard(&staged);
        return Err(ReconError::write(path, e.to_string()).into());
    }
    Ok(staged)
}

fn commit(staged: &Path, path: &Path) -> Result<()> {
    std::fs::rename(staged, path).map_err(|e| {
        discard(staged);
        anyhow::Error::from(ReconError::write(path, e.to_string()))
    })
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove partial output");
        }
    }
}

/// Write both artifacts or neither
pub fn write_results(
    result: &Reconciliation,
    report: &RunReport,
    config: &ReconConfig,
    output: &Path,
) -> Result<WrittenOutputs> {
    let report_path = report_path_for(output, &config.report_suffix);

    let bytes = render_workbook(result, config).map_err(|message| ReconError::write(output, message))?;
    let staged_table = stage(output, &bytes)?;
    let staged_report = match stage(&report_path, report.render().as_bytes()) {
        Ok(staged) => staged,
        Err(e) => {
            discard(&staged_table);
            return Err(e);
        }
    };

    if let Err(e) = commit(&staged_table, output) {
        discard(&staged_report);
        return Err(e);
    }
    if let Err(e) = commit(&staged_report, &report_path) {
        // The new table must not outlive a missing report
        discard(output);
        return Err(e);
    }

    info!(path = %output.display(), rows = result.records.len(), "merged table written");
    info!(path = %report_path.display(), "report written");

    Ok(WrittenOutputs {
        table_path: output.to_path_buf(),
        report_path,
    })
}

// ============================================================================
// TESTS
// ============================================================================
