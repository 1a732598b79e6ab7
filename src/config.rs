// ⚙️ Run Configuration - every domain constant in one place
//
// Defaults reproduce the municipal quality-check layout: Complot CSV export
// (primary) vs. GIS layer workbook (secondary), keyed by the file link column.
// A TOML file may override any of it.

use crate::error::ReconError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// FIELD NAMES (source headers after whitespace stripping)
// ============================================================================

pub const FIELD_FILE_LINK: &str = "קישור לקובץ";
pub const FIELD_BLOCK: &str = "גוש";
pub const FIELD_PARCEL: &str = "חלקה";
pub const FIELD_PLOT: &str = "מגרש";
pub const FIELD_ADDRESS: &str = "כתובת";

/// Cell values pandas treats as missing when reading CSV
pub const PANDAS_NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND",
    "1.#QNAN", "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

// ============================================================================
// CONFIG TYPES
// ============================================================================

/// One output column projected from a source record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source header to read
    pub field: String,
    /// Header written to the merged table
    pub header: String,
}

impl ColumnMapping {
    pub fn new(field: &str, header: &str) -> Self {
        ColumnMapping {
            field: field.to_string(),
            header: header.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name used in report lines and CLI output
    pub label: String,
    pub columns: Vec<ColumnMapping>,
}

/// An attribute field compared between the two sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonField {
    pub field: String,
    pub header: String,
    /// Echo both conflicting values in the mismatch note
    #[serde(default = "default_true")]
    pub echo_values: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteTexts {
    pub header: String,
    pub full_match: String,
    pub primary_only: String,
    pub secondary_only: String,
    pub mismatch_prefix: String,
}

impl Default for NoteTexts {
    fn default() -> Self {
        NoteTexts {
            header: "הערות".to_string(),
            full_match: "התאמה מלאה".to_string(),
            primary_only: "נמצא בקומפלוט בלבד".to_string(),
            secondary_only: "נמצא בשכבה בלבד".to_string(),
            mismatch_prefix: "אי התאמה: ".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: char,
    /// Cell contents read as absent
    pub null_tokens: Vec<String>,
    /// Encoding label tried when the file is not valid UTF-8
    pub fallback_encoding: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            null_tokens: PANDAS_NA_TOKENS.iter().map(|s| s.to_string()).collect(),
            fallback_encoding: "windows-1255".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Key shared by both sources
    pub key_field: String,

    /// Placeholder the GIS export writes for missing values
    pub null_marker: String,

    /// Fields coerced to numbers before comparison
    pub numeric_fields: Vec<String>,

    /// Fields trimmed before comparison
    pub text_fields: Vec<String>,

    pub primary: SourceConfig,
    pub secondary: SourceConfig,

    /// Report label for the template workbook
    pub template_label: String,

    /// Header of the key-equality flag column
    pub key_comparison_header: String,

    pub comparisons: Vec<ComparisonField>,
    pub notes: NoteTexts,
    pub csv: CsvOptions,

    /// Appended to the table's file stem to name the report
    pub report_suffix: String,
}

impl Default for ReconConfig {
    fn default() -> Self {
        let from_primary = |field: &str| ColumnMapping::new(field, &format!("מהקומפלוט - \n{field}"));
        let from_layer = |field: &str| {
            ColumnMapping::new(field, &format!("מהשכבה - \n{field}\nלפי בדיקה גאוגרפית"))
        };
        let compare = |field: &str, echo_values: bool| ComparisonField {
            field: field.to_string(),
            header: format!("השוואה - \n{field}"),
            echo_values,
        };

        ReconConfig {
            key_field: FIELD_FILE_LINK.to_string(),
            null_marker: "<Null>".to_string(),
            numeric_fields: vec![
                FIELD_PARCEL.to_string(),
                FIELD_PLOT.to_string(),
                FIELD_BLOCK.to_string(),
            ],
            text_fields: vec![FIELD_ADDRESS.to_string(), FIELD_FILE_LINK.to_string()],
            primary: SourceConfig {
                label: "Complot".to_string(),
                columns: vec![
                    from_primary(FIELD_FILE_LINK),
                    from_primary("דיסק"),
                    from_primary("משלוח"),
                    from_primary("ארגז"),
                    from_primary("תיק בניין"),
                    from_primary("מספר בקשה"),
                    from_primary(FIELD_BLOCK),
                    from_primary(FIELD_PARCEL),
                    from_primary(FIELD_PLOT),
                    from_primary(FIELD_ADDRESS),
                ],
            },
            secondary: SourceConfig {
                label: "Layer".to_string(),
                columns: vec![
                    ColumnMapping::new(FIELD_FILE_LINK, &format!("מהשכבה - \n{FIELD_FILE_LINK}")),
                    from_layer(FIELD_BLOCK),
                    from_layer(FIELD_PARCEL),
                    from_layer(FIELD_PLOT),
                    from_layer(FIELD_ADDRESS),
                ],
            },
            template_label: "Recommendations".to_string(),
            key_comparison_header: format!(
                "השוואה - \n{FIELD_FILE_LINK}\n(הערך החד ערכי\nהתוצאה חייבת\nלהיות TRUE)"
            ),
            comparisons: vec![
                compare(FIELD_BLOCK, true),
                compare(FIELD_PARCEL, true),
                compare(FIELD_PLOT, true),
                // Addresses are long free text; the note only names the field
                compare(FIELD_ADDRESS, false),
            ],
            notes: NoteTexts::default(),
            csv: CsvOptions::default(),
            report_suffix: "_report".to_string(),
        }
    }
}

impl ReconConfig {
    /// Parse and validate a TOML document; missing keys keep their defaults
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.key_field.trim().is_empty() {
            return Err(ReconError::Config("key_field must not be empty".into()));
        }

        if self.comparisons.is_empty() {
            return Err(ReconError::Config(
                "at least one comparison field is required".into(),
            ));
        }

        if self.report_suffix.is_empty() {
            return Err(ReconError::Config("report_suffix must not be empty".into()));
        }

        if !self.csv.delimiter.is_ascii() {
            return Err(ReconError::Config(format!(
                "csv.delimiter must be a single ASCII character, got '{}'",
                self.csv.delimiter
            )));
        }

        if encoding_rs::Encoding::for_label(self.csv.fallback_encoding.as_bytes()).is_none() {
            return Err(ReconError::Config(format!(
                "unknown csv.fallback_encoding '{}'",
                self.csv.fallback_encoding
            )));
        }

        // Output headers become worksheet columns; a repeat would silently shadow one
        let mut seen = HashSet::new();
        for header in self.output_headers() {
            if !seen.insert(header) {
                return Err(ReconError::Config(format!(
                    "duplicate output column header '{}'",
                    header.replace('\n', " ")
                )));
            }
        }

        Ok(())
    }

    /// Merged-table column order: primary, secondary, flags, note
    pub fn output_headers(&self) -> Vec<&str> {
        let mut headers: Vec<&str> = Vec::new();
        headers.extend(self.primary.columns.iter().map(|c| c.header.as_str()));
        headers.extend(self.secondary.columns.iter().map(|c| c.header.as_str()));
        headers.push(self.key_comparison_header.as_str());
        headers.extend(self.comparisons.iter().map(|c| c.header.as_str()));
        headers.push(self.notes.header.as_str());
        headers
    }
}

// ============================================================================
// TESTS
// ============================================================================
