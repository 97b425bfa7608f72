//! Function marker: the sentinel string that stands in for a live function
//! once a module's exports cross the process boundary.
//!
//! A marker is exactly `[[<FUNCTION_KEY>]]`, matched case-insensitively and
//! anchored at both ends. Substrings, repeated markers and surrounding
//! whitespace never match.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::Value;

/// Fixed key embedded between the marker brackets.
pub const FUNCTION_KEY: &str = "modbridge:exported-function";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\[\[{}\]\]$", regex::escape(FUNCTION_KEY)))
        .expect("function marker pattern is valid")
});

/// Renders the canonical marker string.
#[must_use]
pub fn function_marker() -> String {
    format!("[[{FUNCTION_KEY}]]")
}

/// Whether `s` is a function marker.
#[must_use]
pub fn is_marker(s: &str) -> bool {
    MARKER_RE.is_match(s)
}

/// Whether `entity` is a string holding a function marker.
#[must_use]
pub fn is_function_placeholder(entity: &Value) -> bool {
    entity.as_str().is_some_and(is_marker)
}
