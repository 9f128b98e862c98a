//! Post-hoc invariant checks that don't belong to any one component.
//!
//! `academic_year` strings produced by the Classifier (`classify_score`)
//! are built with `format!("{y}/{y}")`, so they're trivially well-formed.
//! The one place a year string reaches the pipeline without going through
//! the Classifier is the Student record, whose `academic_year` is passed
//! through verbatim from the source CRM's own enrollment-year field
//! (spec.md §3 invariant 1, `models::source::fields::student::ACADEMIC_YEAR`)
//! — that's the value this checks before it reaches the Loader.

use once_cell::sync::Lazy;
use regex::Regex;

static ACADEMIC_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}/\d{4}$").expect("static regex is valid"));

/// `YYYY/YYYY` — both the UK-style "year/year+1" shape and the
/// calendar-locale "year/year" shape match; this only checks the textual
/// format, not which year-pairing rule produced it.
pub fn is_well_formed_academic_year(s: &str) -> bool {
    ACADEMIC_YEAR_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uk_and_calendar_shapes() {
        assert!(is_well_formed_academic_year("2024/2025"));
        assert!(is_well_formed_academic_year("2025/2025"));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(!is_well_formed_academic_year("2024-2025"));
        assert!(!is_well_formed_academic_year("2024/25"));
        assert!(!is_well_formed_academic_year(""));
        assert!(!is_well_formed_academic_year("2024/2025 "));
    }
}
