// 🧹 Field Normalizer - canonical cell values before comparison
//
// Only the configured identifier and free-text fields are touched; every
// other column passes through exactly as loaded.

use crate::config::ReconConfig;
use crate::parser::{SourceTable, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Literal the upstream serializer writes for a missing float
pub const NAN_TEXT: &str = "nan";

/// Coerce an identifier cell to a number, unifying every spelling of
/// "missing" to `Absent`. Unparseable text is kept as-is.
pub fn normalize_numeric(raw: &Value, null_marker: &str) -> Value {
    match raw {
        Value::Absent => Value::Absent,
        Value::Number(n) if n.is_nan() => Value::Absent,
        Value::Number(n) => Value::Number(*n),
        Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => {
            if s.is_empty() || s == NAN_TEXT || s == null_marker {
                return Value::Absent;
            }
            match s.trim().parse::<f64>() {
                Ok(n) if n.is_nan() => Value::Absent,
                Ok(n) => Value::Number(n),
                Err(_) => Value::Text(s.clone()),
            }
        }
    }
}

/// Trim surrounding whitespace from text; anything else is untouched
pub fn normalize_text(raw: &Value) -> Value {
    match raw {
        Value::Text(s) => Value::Text(s.trim().to_string()),
        other => other.clone(),
    }
}

/// What normalization did to one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    /// Numeric-field cells that became absent (placeholders, "nan", empty)
    pub nulls_unified: usize,
    /// Numeric-field cells that did not parse and stayed text
    pub kept_as_text: usize,
    /// Text-field cells whose surrounding whitespace was removed
    pub trimmed: usize,
}

pub struct Normalizer<'a> {
    config: &'a ReconConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a ReconConfig) -> Self {
        Normalizer { config }
    }

    /// Normalize the configured fields of every record in place
    pub fn normalize_table(&self, table: &mut SourceTable) -> NormalizationStats {
        let mut stats = NormalizationStats::default();

        for record in &mut table.records {
            let line = record.line_number;
            for field in &self.config.numeric_fields {
                let Some(value) = record.get_mut(field) else {
                    continue;
                };
                let normalized = normalize_numeric(value, &self.config.null_marker);
                if !value.is_absent() && normalized.is_absent() {
                    stats.nulls_unified += 1;
                }
                if matches!(normalized, Value::Text(_)) {
                    stats.kept_as_text += 1;
                    debug!(
                        source = table.kind.name(),
                        line,
                        field = %field,
                        value = %normalized,
                        "non-numeric identifier kept as text"
                    );
                }
                *value = normalized;
            }

            for field in &self.config.text_fields {
                let Some(value) = record.get_mut(field) else {
                    continue;
                };
                let normalized = normalize_text(value);
                if normalized != *value {
                    stats.trimmed += 1;
                }
                *value = normalized;
            }
        }

        if stats.kept_as_text > 0 {
            warn!(
                source = table.kind.name(),
                count = stats.kept_as_text,
                "identifier values could not be read as numbers"
            );
        }

        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================
