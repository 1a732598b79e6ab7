// 🔗 Reconciliation Engine - match two sources record by record
//
// Every file link found in either source gets exactly one merged record:
//   both sources, all attributes equal    → BothMatch
//   both sources, any attribute different → BothMismatch
//   one source only                        → PrimaryOnly / SecondaryOnly
//
// Keys are visited in sorted order so unchanged inputs always produce the
// same table.

use crate::compare::values_equal;
use crate::config::{ColumnMapping, ReconConfig};
use crate::parser::{SourceRecord, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Present in both sources, every compared attribute equal
    BothMatch,

    /// Present in both sources, at least one attribute differs
    BothMismatch,

    PrimaryOnly,
    SecondaryOnly,
}

impl Classification {
    pub fn name(&self) -> &str {
        match self {
            Classification::BothMatch => "both-match",
            Classification::BothMismatch => "both-mismatch",
            Classification::PrimaryOnly => "primary-only",
            Classification::SecondaryOnly => "secondary-only",
        }
    }

    pub fn in_both(&self) -> bool {
        matches!(self, Classification::BothMatch | Classification::BothMismatch)
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Classification::BothMatch)
    }
}

// ============================================================================
// DUPLICATE KEY POLICY
// ============================================================================

/// How repeated keys inside one source are resolved
///
/// Only the first record per key is reconciled. Later records with the
/// same key are counted, and counted separately when their compared
/// attributes disagree with the first one, but never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicateKeyPolicy {
    #[default]
    FirstSeenWins,
}

/// Key statistics for one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyStats {
    pub records: usize,
    pub unique_keys: usize,
    /// Records dropped because their key was already taken
    pub duplicates_ignored: usize,
    /// Dropped duplicates whose compared attributes differ from the kept record
    pub conflicting_duplicates: usize,
    /// Records without a usable key
    pub missing_key: usize,
}

struct KeyIndex<'r> {
    records: HashMap<String, &'r SourceRecord>,
    stats: KeyStats,
}

impl<'r> KeyIndex<'r> {
    fn get(&self, key: &str) -> Option<&'r SourceRecord> {
        self.records.get(key).copied()
    }
}

// ============================================================================
// MERGED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldComparison {
    pub field: String,
    pub matches: bool,
}

/// One row of the merged table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub key: String,

    /// Primary projection, aligned with `config.primary.columns`
    pub primary: Option<Vec<Value>>,

    /// Secondary projection, aligned with `config.secondary.columns`
    pub secondary: Option<Vec<Value>>,

    /// Always true when set: both records were found under the same key
    pub key_matches: Option<bool>,

    /// One entry per compared attribute; empty unless the key is in both
    pub comparisons: Vec<FieldComparison>,

    pub classification: Classification,
    pub note: String,
}

impl MergedRecord {
    pub fn comparison(&self, field: &str) -> Option<bool> {
        self.comparisons
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.matches)
    }

    pub fn mismatched_fields(&self) -> Vec<&str> {
        self.comparisons
            .iter()
            .filter(|c| !c.matches)
            .map(|c| c.field.as_str())
            .collect()
    }

    /// Cells in merged-table column order (see `ReconConfig::output_headers`)
    pub fn cells(&self, config: &ReconConfig) -> Vec<Value> {
        let mut cells = Vec::with_capacity(config.output_headers().len());

        match &self.primary {
            Some(values) => cells.extend(values.iter().cloned()),
            None => cells.extend(config.primary.columns.iter().map(|_| Value::Absent)),
        }
        match &self.secondary {
            Some(values) => cells.extend(values.iter().cloned()),
            None => cells.extend(config.secondary.columns.iter().map(|_| Value::Absent)),
        }

        cells.push(self.key_matches.map(Value::Bool).unwrap_or(Value::Absent));
        for field in &config.comparisons {
            cells.push(
                self.comparison(&field.field)
                    .map(Value::Bool)
                    .unwrap_or(Value::Absent),
            );
        }

        cells.push(Value::Text(self.note.clone()));
        cells
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Sorted by key
    pub records: Vec<MergedRecord>,
    pub perfect_matches: usize,
    pub partial_matches: usize,
    pub primary_only: usize,
    pub secondary_only: usize,
    pub primary_keys: KeyStats,
    pub secondary_keys: KeyStats,
}

impl Reconciliation {
    pub fn total_keys(&self) -> usize {
        self.records.len()
    }

    pub fn in_both(&self) -> usize {
        self.perfect_matches + self.partial_matches
    }

    /// Duplicate-key records dropped across both sources
    pub fn duplicates_ignored(&self) -> usize {
        self.primary_keys.duplicates_ignored + self.secondary_keys.duplicates_ignored
    }

    pub fn find(&self, key: &str) -> Option<&MergedRecord> {
        self.records
            .binary_search_by(|r| r.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn summary(&self) -> String {
        format!(
            "{} keys: {} perfect, {} partial, {} primary-only, {} secondary-only",
            self.total_keys(),
            self.perfect_matches,
            self.partial_matches,
            self.primary_only,
            self.secondary_only
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'a> {
    config: &'a ReconConfig,
    pub duplicate_policy: DuplicateKeyPolicy,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(config: &'a ReconConfig) -> Self {
        ReconciliationEngine {
            config,
            duplicate_policy: DuplicateKeyPolicy::default(),
        }
    }

    /// Reconcile normalized primary records against normalized secondary records
    ///
    /// Example:
    /// ```
    /// use quality_check::config::{ReconConfig, FIELD_FILE_LINK, FIELD_PARCEL};
    /// use quality_check::parser::{SourceRecord, Value};
    /// use quality_check::reconciliation::{Classification, ReconciliationEngine};
    ///
    /// let config = ReconConfig::default();
    /// let primary = vec![SourceRecord::new(2)
    ///     .with(FIELD_FILE_LINK, Value::text("A1"))
    ///     .with(FIELD_PARCEL, Value::Number(5.0))];
    /// let secondary = vec![SourceRecord::new(2)
    ///     .with(FIELD_FILE_LINK, Value::text("A1"))
    ///     .with(FIELD_PARCEL, Value::Number(6.0))];
    ///
    /// let result = ReconciliationEngine::new(&config).reconcile(&primary, &secondary);
    /// assert_eq!(result.records[0].classification, Classification::BothMismatch);
    /// assert_eq!(result.partial_matches, 1);
    /// ```
    pub fn reconcile(
        &self,
        primary: &[SourceRecord],
        secondary: &[SourceRecord],
    ) -> Reconciliation {
        let primary_index = self.index_by_key(primary, "primary");
        let secondary_index = self.index_by_key(secondary, "secondary");

        let all_keys: BTreeSet<&String> =
            primary_index.records.keys().chain(secondary_index.records.keys()).collect();

        debug!(
            total = all_keys.len(),
            primary = primary_index.stats.unique_keys,
            secondary = secondary_index.stats.unique_keys,
            "collected file links"
        );

        let mut records = Vec::with_capacity(all_keys.len());
        let mut perfect_matches = 0;
        let mut partial_matches = 0;
        let mut primary_only = 0;
        let mut secondary_only = 0;

        for key in all_keys {
            let merged = match (primary_index.get(key), secondary_index.get(key)) {
                (Some(p), Some(s)) => {
                    let merged = self.merge_both(key, p, s);
                    if merged.classification.is_match() {
                        perfect_matches += 1;
                    } else {
                        partial_matches += 1;
                    }
                    merged
                }
                (Some(p), None) => {
                    primary_only += 1;
                    MergedRecord {
                        key: key.clone(),
                        primary: Some(project(p, &self.config.primary.columns)),
                        secondary: None,
                        key_matches: None,
                        comparisons: Vec::new(),
                        classification: Classification::PrimaryOnly,
                        note: self.config.notes.primary_only.clone(),
                    }
                }
                (None, Some(s)) => {
                    secondary_only += 1;
                    MergedRecord {
                        key: key.clone(),
                        primary: None,
                        secondary: Some(project(s, &self.config.secondary.columns)),
                        key_matches: None,
                        comparisons: Vec::new(),
                        classification: Classification::SecondaryOnly,
                        note: self.config.notes.secondary_only.clone(),
                    }
                }
                // Keys come from one of the two indexes
                (None, None) => continue,
            };
            debug!(key = %merged.key, classification = merged.classification.name(), "merged");
            records.push(merged);
        }

        let result = Reconciliation {
            records,
            perfect_matches,
            partial_matches,
            primary_only,
            secondary_only,
            primary_keys: primary_index.stats,
            secondary_keys: secondary_index.stats,
        };

        info!("reconciled {}", result.summary());
        result
    }

    fn merge_both(&self, key: &str, p: &SourceRecord, s: &SourceRecord) -> MergedRecord {
        let mut comparisons = Vec::with_capacity(self.config.comparisons.len());
        let mut discrepancies = Vec::new();

        for field in &self.config.comparisons {
            let primary_value = p.get(&field.field);
            let secondary_value = s.get(&field.field);
            let matches = values_equal(primary_value, secondary_value);

            if !matches {
                if field.echo_values {
                    discrepancies.push(format!(
                        "{} ({} ≠ {})",
                        field.field,
                        self.render(primary_value),
                        self.render(secondary_value)
                    ));
                } else {
                    discrepancies.push(field.field.clone());
                }
            }

            comparisons.push(FieldComparison {
                field: field.field.clone(),
                matches,
            });
        }

        let (classification, note) = if discrepancies.is_empty() {
            (Classification::BothMatch, self.config.notes.full_match.clone())
        } else {
            (
                Classification::BothMismatch,
                format!("{}{}", self.config.notes.mismatch_prefix, discrepancies.join(", ")),
            )
        };

        MergedRecord {
            key: key.to_string(),
            primary: Some(project(p, &self.config.primary.columns)),
            secondary: Some(project(s, &self.config.secondary.columns)),
            key_matches: Some(true),
            comparisons,
            classification,
            note,
        }
    }

    /// Absent values show as the null placeholder inside notes
    fn render(&self, value: &Value) -> String {
        match value {
            Value::Absent => self.config.null_marker.clone(),
            other => other.to_string(),
        }
    }

    fn index_by_key<'r>(&self, records: &'r [SourceRecord], source: &str) -> KeyIndex<'r> {
        let mut index: HashMap<String, &'r SourceRecord> = HashMap::new();
        let mut stats = KeyStats {
            records: records.len(),
            ..KeyStats::default()
        };

        for record in records {
            let Some(key) = record.get(&self.config.key_field).as_key() else {
                stats.missing_key += 1;
                continue;
            };

            match (self.duplicate_policy, index.get(&key).copied()) {
                (DuplicateKeyPolicy::FirstSeenWins, Some(kept)) => {
                    stats.duplicates_ignored += 1;
                    if self.attributes_conflict(kept, record) {
                        stats.conflicting_duplicates += 1;
                        debug!(
                            source,
                            key = %key,
                            kept_line = kept.line_number,
                            ignored_line = record.line_number,
                            "duplicate key with different attributes ignored"
                        );
                    }
                }
                (DuplicateKeyPolicy::FirstSeenWins, None) => {
                    index.insert(key, record);
                }
            }
        }

        stats.unique_keys = index.len();

        if stats.records > 0 && stats.unique_keys == 0 {
            warn!(
                source,
                key_field = %self.config.key_field,
                "no record carries a usable key; every key will be single-source"
            );
        }
        if stats.duplicates_ignored > 0 {
            warn!(
                source,
                duplicates = stats.duplicates_ignored,
                conflicting = stats.conflicting_duplicates,
                "duplicate keys resolved first-seen-wins"
            );
        }

        KeyIndex {
            records: index,
            stats,
        }
    }

    fn attributes_conflict(&self, kept: &SourceRecord, other: &SourceRecord) -> bool {
        self.config
            .comparisons
            .iter()
            .any(|f| !values_equal(kept.get(&f.field), other.get(&f.field)))
    }
}

fn project(record: &SourceRecord, columns: &[ColumnMapping]) -> Vec<Value> {
    columns
        .iter()
        .map(|column| record.get(&column.field).clone())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FIELD_ADDRESS, FIELD_BLOCK, FIELD_FILE_LINK, FIELD_PARCEL, FIELD_PLOT};

    fn create_test_record(line: usize, key: &str, block: f64, parcel: f64) -> SourceRecord {
        SourceRecord::new(line)
            .with(FIELD_FILE_LINK, Value::text(key))
            .with(FIELD_BLOCK, Value::Number(block))
            .with(FIELD_PARCEL, Value::Number(parcel))
    }

    #[test]
    fn test_parcel_mismatch_example() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "A1", 12.0, 5.0)];
        let secondary = vec![create_test_record(2, "A1", 12.0, 6.0)];

        let result = engine.reconcile(&primary, &secondary);
        let record = result.find("A1").unwrap();

        assert_eq!(record.classification, Classification::BothMismatch);
        assert_eq!(record.key_matches, Some(true));
        assert_eq!(record.comparison(FIELD_BLOCK), Some(true));
        assert_eq!(record.comparison(FIELD_PARCEL), Some(false));
        // Plot and address absent on both sides count as consistent
        assert_eq!(record.comparison(FIELD_PLOT), Some(true));
        assert_eq!(record.comparison(FIELD_ADDRESS), Some(true));
        assert_eq!(record.note, "אי התאמה: חלקה (5.0 ≠ 6.0)");
        assert_eq!(result.partial_matches, 1);
        assert_eq!(result.perfect_matches, 0);

        println!("✅ Test passed: {}", result.summary());
    }

    #[test]
    fn test_secondary_only_example() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let secondary = vec![create_test_record(2, "B2", 1.0, 1.0)];
        let result = engine.reconcile(&[], &secondary);
        let record = result.find("B2").unwrap();

        assert_eq!(record.classification, Classification::SecondaryOnly);
        assert_eq!(record.note, config.notes.secondary_only);
        assert!(record.primary.is_none());
        assert!(record.key_matches.is_none());
        assert!(record.comparisons.is_empty());
        assert_eq!(result.secondary_only, 1);
    }

    #[test]
    fn test_full_match_case_and_whitespace() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "C3", 7.0, 8.0)
            .with(FIELD_PLOT, Value::text("12A"))
            .with(FIELD_ADDRESS, Value::text("Herzl St 5"))];
        let secondary = vec![create_test_record(9, "C3", 7.0, 8.0)
            .with(FIELD_PLOT, Value::text("12a "))
            .with(FIELD_ADDRESS, Value::text(" HERZL ST 5"))];

        let result = engine.reconcile(&primary, &secondary);
        let record = &result.records[0];

        assert_eq!(record.classification, Classification::BothMatch);
        assert_eq!(record.note, config.notes.full_match);
        assert!(record.mismatched_fields().is_empty());
        assert_eq!(result.perfect_matches, 1);
    }

    #[test]
    fn test_address_named_but_not_echoed() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "D4", 1.0, 2.0)
            .with(FIELD_ADDRESS, Value::text("Herzl 5"))];
        let secondary = vec![create_test_record(2, "D4", 3.0, 2.0)
            .with(FIELD_ADDRESS, Value::text("Weizmann 10"))];

        let result = engine.reconcile(&primary, &secondary);
        let note = &result.records[0].note;

        assert_eq!(note, "אי התאמה: גוש (1.0 ≠ 3.0), כתובת");
        assert!(!note.contains("Herzl"));
        assert_eq!(
            result.records[0].mismatched_fields(),
            vec![FIELD_BLOCK, FIELD_ADDRESS]
        );
    }

    #[test]
    fn test_one_side_absent_is_mismatch() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![SourceRecord::new(2)
            .with(FIELD_FILE_LINK, Value::text("E5"))
            .with(FIELD_BLOCK, Value::Number(30.0))];
        let secondary = vec![SourceRecord::new(2).with(FIELD_FILE_LINK, Value::text("E5"))];

        let result = engine.reconcile(&primary, &secondary);
        let record = &result.records[0];

        assert_eq!(record.comparison(FIELD_BLOCK), Some(false));
        assert_eq!(record.note, "אי התאמה: גוש (30.0 ≠ <Null>)");
    }

    #[test]
    fn test_single_source_has_no_flags() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "P1", 1.0, 1.0)];
        let secondary = vec![create_test_record(2, "S1", 1.0, 1.0)];

        let result = engine.reconcile(&primary, &secondary);

        for record in &result.records {
            assert!(!record.classification.in_both());
            assert!(record.key_matches.is_none());
            assert!(record.comparisons.is_empty());
        }
        assert_eq!(result.find("P1").unwrap().note, config.notes.primary_only);
        assert!(result.find("P1").unwrap().secondary.is_none());
        assert_eq!(result.primary_only, 1);
        assert_eq!(result.secondary_only, 1);
    }

    #[test]
    fn test_union_of_keys_sorted() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![
            create_test_record(2, "k3", 1.0, 1.0),
            create_test_record(3, "k1", 1.0, 1.0),
            SourceRecord::new(4).with(FIELD_BLOCK, Value::Number(9.0)), // no key
        ];
        let secondary = vec![
            create_test_record(2, "k2", 1.0, 1.0),
            create_test_record(3, "k1", 1.0, 1.0),
            SourceRecord::new(4).with(FIELD_FILE_LINK, Value::text("   ")),
        ];

        let result = engine.reconcile(&primary, &secondary);
        let keys: Vec<&str> = result.records.iter().map(|r| r.key.as_str()).collect();

        // |{k1,k3} ∪ {k1,k2}| = 3, keyless records excluded
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
        assert_eq!(result.total_keys(), 3);
        assert_eq!(result.in_both(), 1);
        assert_eq!(result.primary_keys.missing_key, 1);
        assert_eq!(result.secondary_keys.missing_key, 1);
    }

    #[test]
    fn test_duplicate_keys_first_seen_wins() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![
            create_test_record(2, "A1", 12.0, 5.0),
            create_test_record(3, "A1", 99.0, 5.0), // conflicting duplicate
            create_test_record(4, "A1", 12.0, 5.0), // identical duplicate
        ];
        let secondary = vec![create_test_record(2, "A1", 12.0, 5.0)];

        let result = engine.reconcile(&primary, &secondary);

        assert_eq!(result.total_keys(), 1);
        assert_eq!(result.records[0].classification, Classification::BothMatch);
        assert_eq!(result.primary_keys.duplicates_ignored, 2);
        assert_eq!(result.primary_keys.conflicting_duplicates, 1);
        assert_eq!(result.primary_keys.unique_keys, 1);
        assert_eq!(result.duplicates_ignored(), 2);
        assert_eq!(engine.duplicate_policy, DuplicateKeyPolicy::FirstSeenWins);
    }

    #[test]
    fn test_missing_key_column_in_one_source() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "A1", 1.0, 1.0), create_test_record(3, "A2", 1.0, 1.0)];
        let secondary = vec![
            SourceRecord::new(2).with("link", Value::text("A1")),
            SourceRecord::new(3).with("link", Value::text("A2")),
        ];

        let result = engine.reconcile(&primary, &secondary);

        assert_eq!(result.total_keys(), 2);
        assert_eq!(result.primary_only, 2);
        assert_eq!(result.secondary_keys.unique_keys, 0);
        assert_eq!(result.secondary_keys.missing_key, 2);
    }

    #[test]
    fn test_counts_are_exhaustive() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![
            create_test_record(2, "a", 1.0, 1.0),
            create_test_record(3, "b", 1.0, 1.0),
            create_test_record(4, "c", 1.0, 1.0),
        ];
        let secondary = vec![
            create_test_record(2, "a", 1.0, 1.0),
            create_test_record(3, "b", 2.0, 1.0),
            create_test_record(4, "d", 1.0, 1.0),
        ];

        let result = engine.reconcile(&primary, &secondary);

        assert_eq!(result.perfect_matches, 1);
        assert_eq!(result.partial_matches, 1);
        assert_eq!(result.primary_only, 1);
        assert_eq!(result.secondary_only, 1);
        assert_eq!(
            result.perfect_matches + result.partial_matches + result.primary_only + result.secondary_only,
            result.total_keys()
        );
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary: Vec<SourceRecord> = (0..50)
            .map(|i| create_test_record(i + 2, &format!("key-{}", (i * 37) % 50), i as f64, 1.0))
            .collect();
        let secondary: Vec<SourceRecord> = (0..50)
            .map(|i| create_test_record(i + 2, &format!("key-{}", (i * 11) % 60), i as f64, 1.0))
            .collect();

        let first = engine.reconcile(&primary, &secondary);
        let second = engine.reconcile(&primary, &secondary);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cells_follow_output_headers() {
        let config = ReconConfig::default();
        let engine = ReconciliationEngine::new(&config);

        let primary = vec![create_test_record(2, "A1", 12.0, 5.0).with("דיסק", Value::text("D-7"))];
        let result = engine.reconcile(&primary, &[]);
        let cells = result.records[0].cells(&config);

        assert_eq!(cells.len(), config.output_headers().len());
        assert_eq!(cells[0], Value::text("A1"));
        assert_eq!(cells[1], Value::text("D-7"));
        assert_eq!(cells[6], Value::Number(12.0));
        // Secondary block + flags empty for primary-only keys
        assert!(cells[10..20].iter().all(Value::is_absent));
        assert_eq!(cells[20], Value::text(&config.notes.primary_only));
    }
}
