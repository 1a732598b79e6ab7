// Quality Check - Core Library
// Exposes all modules for use in the CLI, the terminal front end, and tests

pub mod config;
pub mod error;
pub mod parser;
pub mod normalize;      // Field Normalizer
pub mod compare;        // Value Comparator
pub mod reconciliation; // Reconciliation Engine
pub mod report;         // Report Builder
pub mod writer;         // Result Writer
pub mod pipeline;

// Re-export commonly used types
pub use config::{ColumnMapping, ComparisonField, CsvOptions, NoteTexts, ReconConfig, SourceConfig};
pub use error::ReconError;
pub use parser::{
    SourceKind, SourceRecord, SourceTable, TableFormat, TableReader, Value,
    detect_format, get_reader, read_table,
    CsvTableReader, SpreadsheetReader,
};
pub use normalize::{normalize_numeric, normalize_text, NormalizationStats, Normalizer};
pub use compare::values_equal;
pub use reconciliation::{
    Classification, DuplicateKeyPolicy, FieldComparison, KeyStats, MergedRecord,
    Reconciliation, ReconciliationEngine,
};
pub use report::{ReportBuilder, RunCounts, RunMetadata, RunReport};
pub use writer::{report_path_for, write_results, WrittenOutputs};
pub use pipeline::{run, spawn, RunHandle, RunOutcome, RunRequest, RunSummary, Stage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
