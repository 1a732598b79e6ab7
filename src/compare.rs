// ⚖️ Value Comparator - null-aware equality
//
// Final test is always on strings: numbers compare through their normalized
// rendering, so text "5" and number 5.0 ("5.0") are different values.

use crate::parser::Value;

/// Both absent → equal, one absent → different, otherwise case-insensitive
/// comparison of the trimmed string forms
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.is_absent(), b.is_absent()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => comparable(a) == comparable(b),
    }
}

fn comparable(value: &Value) -> String {
    value.to_string().trim().to_lowercase()
}
