// 📝 Run Report - append-only text report built alongside the pipeline
//
// The builder is handed from stage to stage (load → normalize → reconcile)
// and turned into an immutable RunReport at the end.

use crate::config::ReconConfig;
use crate::normalize::NormalizationStats;
use crate::parser::{SourceKind, SourceTable};
use crate::reconciliation::{KeyStats, Reconciliation};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REPORT_TITLE: &str = "Automatic Table Filling Report";
const RULE_WIDTH: usize = 50;

// ============================================================================
// METADATA + COUNTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    pub label: String,
    pub path: PathBuf,
    /// SHA-256 of the file bytes, hex
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub inputs: Vec<InputFile>,
    pub output: PathBuf,
    pub generated_at: NaiveDateTime,
}

impl RunMetadata {
    /// Metadata stamped with the current local time
    pub fn now(output: &Path) -> Self {
        Self::at(output, Local::now().naive_local())
    }

    pub fn at(output: &Path, generated_at: NaiveDateTime) -> Self {
        RunMetadata {
            inputs: Vec::new(),
            output: output.to_path_buf(),
            generated_at,
        }
    }

    pub fn with_input(mut self, label: &str, table: &SourceTable) -> Self {
        self.inputs.push(InputFile {
            label: label.to_string(),
            path: table.path.clone(),
            fingerprint: table.fingerprint.clone(),
        });
        self
    }
}

/// Aggregate counts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total_keys: usize,
    pub perfect_matches: usize,
    pub partial_matches: usize,
    pub primary_only: usize,
    pub secondary_only: usize,
    /// Rows written to the merged table
    pub total_rows: usize,
}

impl RunCounts {
    pub fn from_reconciliation(result: &Reconciliation) -> Self {
        RunCounts {
            total_keys: result.total_keys(),
            perfect_matches: result.perfect_matches,
            partial_matches: result.partial_matches,
            primary_only: result.primary_only,
            secondary_only: result.secondary_only,
            total_rows: result.records.len(),
        }
    }
}

// ============================================================================
// REPORT BUILDER
// ============================================================================

pub struct ReportBuilder<'a> {
    config: &'a ReconConfig,
    metadata: RunMetadata,
    lines: Vec<String>,
    counts: RunCounts,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(config: &'a ReconConfig, metadata: RunMetadata) -> Self {
        ReportBuilder {
            config,
            metadata,
            lines: Vec::new(),
            counts: RunCounts::default(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn section(&mut self, title: &str) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.lines.push(format!("{title}:"));
    }

    pub fn data_loading(&mut self, primary: &SourceTable, secondary: &SourceTable, template_rows: usize) {
        let primary_label = self.config.primary.label.clone();
        let secondary_label = self.config.secondary.label.clone();
        let template_label = self.config.template_label.clone();

        self.section("Data Loading Summary");
        self.push(format!("- {primary_label} records: {}", primary.len()));
        self.push(format!("- {secondary_label} records: {}", secondary.len()));
        self.push(format!("- {template_label} template rows: {template_rows}"));

        for table in [primary, secondary] {
            if !table.has_column(&self.config.key_field) {
                let label = self.label_for(table);
                self.push(format!(
                    "- WARNING: {label} has no '{}' column",
                    self.config.key_field
                ));
            }
        }
    }

    pub fn normalization(&mut self, primary: &NormalizationStats, secondary: &NormalizationStats) {
        let labels = [
            (self.config.primary.label.clone(), primary),
            (self.config.secondary.label.clone(), secondary),
        ];

        self.section("Normalization");
        for (label, stats) in labels {
            self.push(format!(
                "- {label}: {} placeholders cleared, {} identifiers kept as text, {} values trimmed",
                stats.nulls_unified, stats.kept_as_text, stats.trimmed
            ));
        }
    }

    pub fn key_analysis(&mut self, result: &Reconciliation) {
        let primary_label = self.config.primary.label.clone();
        let secondary_label = self.config.secondary.label.clone();

        self.section("File Link Analysis");
        self.push(format!("- Total unique links: {}", result.total_keys()));
        self.push(format!("- {primary_label} only: {}", result.primary_only));
        self.push(format!("- {secondary_label} only: {}", result.secondary_only));
        self.push(format!("- In both sources: {}", result.in_both()));

        self.key_stats(&primary_label, &result.primary_keys);
        self.key_stats(&secondary_label, &result.secondary_keys);
    }

    fn key_stats(&mut self, label: &str, stats: &KeyStats) {
        if stats.duplicates_ignored > 0 {
            self.push(format!(
                "- {label} duplicate links ignored: {} ({} with conflicting values)",
                stats.duplicates_ignored, stats.conflicting_duplicates
            ));
        }
        if stats.missing_key > 0 {
            self.push(format!("- {label} records without a link: {}", stats.missing_key));
        }
    }

    pub fn match_results(&mut self, result: &Reconciliation) {
        self.counts = RunCounts::from_reconciliation(result);
        let primary_label = self.config.primary.label.clone();
        let secondary_label = self.config.secondary.label.clone();

        self.section("Match Results");
        self.push(format!("- Perfect matches: {}", self.counts.perfect_matches));
        self.push(format!("- Partial matches: {}", self.counts.partial_matches));
        self.push(format!("- {primary_label} only rows: {}", self.counts.primary_only));
        self.push(format!("- {secondary_label} only rows: {}", self.counts.secondary_only));
        self.push(format!("- Total rows: {}", self.counts.total_rows));
    }

    pub fn finish(self) -> RunReport {
        RunReport {
            metadata: self.metadata,
            lines: self.lines,
            counts: self.counts,
        }
    }

    fn label_for(&self, table: &SourceTable) -> String {
        match table.kind {
            SourceKind::Primary => self.config.primary.label.clone(),
            SourceKind::Secondary => self.config.secondary.label.clone(),
            SourceKind::Template => self.config.template_label.clone(),
        }
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub lines: Vec<String>,
    pub counts: RunCounts,
}

impl RunReport {
    /// Full report text: banner, metadata block, then the section lines
    pub fn render(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = Vec::new();

        out.push(REPORT_TITLE.to_string());
        out.push(rule.clone());
        out.push(format!(
            "Generated: {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push(rule);
        out.push(String::new());

        for input in &self.metadata.inputs {
            out.push(format!("{} file: {}", input.label, input.path.display()));
        }
        out.push(format!("Output file: {}", self.metadata.output.display()));

        if self.metadata.inputs.iter().any(|i| !i.fingerprint.is_empty()) {
            out.push(String::new());
            out.push("Input fingerprints (SHA-256):".to_string());
            for input in &self.metadata.inputs {
                out.push(format!("- {}: {}", input.label, input.fingerprint));
            }
        }

        if !self.lines.is_empty() {
            out.push(String::new());
            out.extend(self.lines.iter().cloned());
        }

        let mut text = out.join("\n");
        text.push('\n');
        text
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FIELD_BLOCK, FIELD_FILE_LINK, FIELD_PARCEL};
    use crate::parser::{SourceRecord, Value};
    use crate::reconciliation::ReconciliationEngine;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn create_test_table(kind: SourceKind, rows: &[(&str, f64, f64)]) -> SourceTable {
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (key, block, parcel))| {
                SourceRecord::new(i + 2)
                    .with(FIELD_FILE_LINK, Value::text(key))
                    .with(FIELD_BLOCK, Value::Number(*block))
                    .with(FIELD_PARCEL, Value::Number(*parcel))
            })
            .collect();
        let mut table =
            SourceTable::in_memory(kind, &[FIELD_FILE_LINK, FIELD_BLOCK, FIELD_PARCEL], records);
        table.path = PathBuf::from(format!("/data/{}.src", kind.name()));
        table.fingerprint = "ab".repeat(32);
        table
    }

    fn build_report(config: &ReconConfig) -> RunReport {
        let primary = create_test_table(
            SourceKind::Primary,
            &[("A1", 12.0, 5.0), ("A2", 1.0, 1.0), ("A2", 1.0, 2.0)],
        );
        let secondary = create_test_table(SourceKind::Secondary, &[("A1", 12.0, 6.0), ("B2", 3.0, 3.0)]);
        let template = create_test_table(SourceKind::Template, &[]);

        let metadata = RunMetadata::at(Path::new("/out/filled.xlsx"), fixed_time())
            .with_input(&config.primary.label, &primary)
            .with_input(&config.secondary.label, &secondary)
            .with_input(&config.template_label, &template);

        let mut builder = ReportBuilder::new(config, metadata);
        builder.data_loading(&primary, &secondary, 7);
        builder.normalization(&NormalizationStats::default(), &NormalizationStats::default());

        let result = ReconciliationEngine::new(config).reconcile(&primary.records, &secondary.records);
        builder.key_analysis(&result);
        builder.match_results(&result);
        builder.finish()
    }

    #[test]
    fn test_report_banner_and_metadata() {
        let config = ReconConfig::default();
        let text = build_report(&config).render();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Automatic Table Filling Report");
        assert_eq!(lines[1], "=".repeat(50));
        assert_eq!(lines[2], "Generated: 2024-03-01 09:30:00");
        assert_eq!(lines[3], "=".repeat(50));
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "Complot file: /data/primary.src");
        assert_eq!(lines[6], "Layer file: /data/secondary.src");
        assert_eq!(lines[7], "Recommendations file: /data/template.src");
        assert_eq!(lines[8], "Output file: /out/filled.xlsx");
        assert!(text.contains(&format!("- Complot: {}", "ab".repeat(32))));
    }

    #[test]
    fn test_report_sections() {
        let config = ReconConfig::default();
        let report = build_report(&config);
        let text = report.render();

        assert!(text.contains("Data Loading Summary:\n- Complot records: 3\n- Layer records: 2\n- Recommendations template rows: 7"));
        assert!(text.contains("File Link Analysis:\n- Total unique links: 3\n- Complot only: 1\n- Layer only: 1\n- In both sources: 1"));
        assert!(text.contains("- Complot duplicate links ignored: 1 (1 with conflicting values)"));
        assert!(text.contains("Match Results:\n- Perfect matches: 0\n- Partial matches: 1"));
        assert!(text.contains("- Total rows: 3"));
        assert!(text.ends_with('\n'));

        assert_eq!(report.counts.total_keys, 3);
        assert_eq!(report.counts.partial_matches, 1);
        assert_eq!(report.counts.primary_only, 1);
        assert_eq!(report.counts.secondary_only, 1);
    }

    #[test]
    fn test_sections_separated_by_blank_line() {
        let config = ReconConfig::default();
        let report = build_report(&config);

        let blank_before: Vec<&String> = report
            .lines
            .windows(2)
            .filter(|w| w[0].is_empty())
            .map(|w| &w[1])
            .collect();
        assert_eq!(
            blank_before,
            vec!["Normalization:", "File Link Analysis:", "Match Results:"]
        );
        assert_eq!(report.lines[0], "Data Loading Summary:");
    }

    #[test]
    fn test_missing_key_column_warning() {
        let config = ReconConfig::default();
        let primary = SourceTable::in_memory(SourceKind::Primary, &["other"], Vec::new());
        let secondary = create_test_table(SourceKind::Secondary, &[]);

        let mut builder = ReportBuilder::new(&config, RunMetadata::at(Path::new("o.xlsx"), fixed_time()));
        builder.data_loading(&primary, &secondary, 0);

        assert!(builder
            .lines()
            .iter()
            .any(|l| l == "- WARNING: Complot has no 'קישור לקובץ' column"));
        assert_eq!(builder.lines().len(), 5);
    }

    #[test]
    fn test_render_is_stable() {
        let config = ReconConfig::default();
        assert_eq!(build_report(&config).render(), build_report(&config).render());
    }

    #[test]
    fn test_no_fingerprint_block_for_in_memory_tables() {
        let config = ReconConfig::default();
        let table = SourceTable::in_memory(SourceKind::Primary, &[], Vec::new());
        let metadata = RunMetadata::at(Path::new("o.xlsx"), fixed_time()).with_input("Complot", &table);
        let text = ReportBuilder::new(&config, metadata).finish().render();

        assert!(!text.contains("fingerprints"));
        assert!(text.ends_with("Output file: o.xlsx\n"));
    }
}
