//! Source-CRM record shapes (spec.md §6.1, §9).
//!
//! Each record type exposes the small fixed set of fields the pipeline
//! actually consumes, plus a `raw` catch-all map holding everything else
//! passed through unchanged for diagnostics — the source object genuinely
//! carries ~100 keys per record and modeling all of them would just be
//! noise the pipeline never reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-name constants, one table per entity, mirroring the source
/// system's own naming so a diagnostic log line can be grepped back to the
/// field that produced it.
pub mod fields {
    pub mod establishment {
        pub const NAME: &str = "field_44";
        pub const TRUST: &str = "field_3109";
        pub const IS_AUSTRALIAN: &str = "field_3410";
        pub const USE_STANDARD_YEAR: &str = "field_3501";
    }

    pub mod student {
        pub const EMAIL: &str = "field_91";
        pub const NAME: &str = "field_90";
        pub const ESTABLISHMENT_CONNECTION: &str = "field_86";
        pub const YEAR_GROUP: &str = "field_144";
        pub const COURSE: &str = "field_2299";
        pub const FACULTY: &str = "field_782";
        pub const STUDENT_GROUP: &str = "field_1395";
        /// Set by the source CRM itself when a student's enrollment record
        /// is created for a given year (one record per student per year);
        /// the pipeline trusts this verbatim rather than re-deriving it —
        /// Students are extracted in orchestration step 4, before any
        /// VespaScore exists to classify from (spec.md §4.7).
        pub const ACADEMIC_YEAR: &str = "field_3434";
    }

    pub mod vespa_score {
        pub const EMAIL: &str = "field_197";
        pub const ESTABLISHMENT_CONNECTION: &str = "field_133";
        pub const COMPLETION_DATE: &str = "field_855";
        pub const CREATED_DATE: &str = "field_856";

        /// Per-cycle component field ids: `(vision, effort, systems, practice, attitude, overall)`.
        pub const CYCLE_1: [&str; 6] =
            ["field_147", "field_148", "field_149", "field_150", "field_151", "field_152"];
        pub const CYCLE_2: [&str; 6] =
            ["field_163", "field_164", "field_165", "field_166", "field_167", "field_168"];
        pub const CYCLE_3: [&str; 6] =
            ["field_179", "field_180", "field_181", "field_182", "field_183", "field_184"];
    }

    pub mod question_response {
        pub const EMAIL: &str = "field_2732";
        pub const SCORE_CONNECTION: &str = "field_792";
        pub const CYCLE: &str = "field_863";
    }

    /// The single write-back target (spec.md §4.5 step 5, §6.1): one record
    /// per academic year holding the six element means per cycle.
    pub mod national_averages {
        pub const OBJECT: &str = "object_41";
        pub const ACADEMIC_YEAR: &str = "field_3600";

        /// Per-cycle element mean field ids, same `(vision, effort, systems,
        /// practice, attitude, overall)` order as `vespa_score::CYCLE_*`.
        pub const CYCLE_1: [&str; 6] =
            ["field_3601", "field_3602", "field_3603", "field_3604", "field_3605", "field_3606"];
        pub const CYCLE_2: [&str; 6] =
            ["field_3607", "field_3608", "field_3609", "field_3610", "field_3611", "field_3612"];
        pub const CYCLE_3: [&str; 6] =
            ["field_3613", "field_3614", "field_3615", "field_3616", "field_3617", "field_3618"];

        pub fn fields_for_cycle(cycle: i16) -> Option<[&'static str; 6]> {
            match cycle {
                1 => Some(CYCLE_1),
                2 => Some(CYCLE_2),
                3 => Some(CYCLE_3),
                _ => None,
            }
        }
    }
}

/// Raw Establishment record from the source CRM.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstablishmentRecord {
    pub id: String,
    pub name: String,
    pub trust: Option<String>,
    pub is_australian: bool,
    /// Unparsed; the Classifier turns this into `UseStandardYear`.
    pub use_standard_year: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

/// Raw Student record. `academic_year` is passed through verbatim from the
/// source CRM's own enrollment-year field — see `fields::student::ACADEMIC_YEAR`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StudentRecord {
    pub id: String,
    pub email: Option<String>,
    pub name: String,
    pub establishment_connection: Option<String>,
    pub academic_year: String,
    pub year_group: Option<String>,
    pub course: Option<String>,
    pub faculty: Option<String>,
    pub student_group: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

/// Raw VespaScore record. `cycle` and the six component fields are
/// resolved from the cycle-specific field ids in `fields::vespa_score`
/// before this struct is built (see `services::extractor`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VespaScoreRecord {
    pub id: String,
    pub email: Option<String>,
    pub establishment_connection: Option<String>,
    pub cycle: i16,
    pub vision: i16,
    pub effort: i16,
    pub systems: i16,
    pub practice: i16,
    pub attitude: i16,
    pub overall: f64,
    pub completion_date: Option<String>,
    pub created_date: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

/// Raw QuestionResponse record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionResponseRecord {
    pub id: String,
    pub email: Option<String>,
    /// Source-system record id of the paired VespaScore, used only when
    /// `email` is absent (spec.md §9's documented connection-field quirk).
    pub score_connection: Option<String>,
    pub cycle: i16,
    pub question_id: String,
    pub response_value: i16,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

fn get_str(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn get_bool(raw: &Map<String, Value>, key: &str) -> bool {
    match raw.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1"),
        _ => false,
    }
}

fn get_i16(raw: &Map<String, Value>, key: &str) -> Option<i16> {
    match raw.get(key) {
        Some(Value::Number(n)) => n.as_i64().map(|v| v as i16),
        Some(Value::String(s)) => s.trim().parse::<i16>().ok(),
        _ => None,
    }
}

fn get_f64(raw: &Map<String, Value>, key: &str) -> Option<f64> {
    match raw.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl EstablishmentRecord {
    /// Build a typed record from one raw page entry (spec.md §9's "explicit
    /// source record struct plus catch-all map").
    pub fn from_raw(raw: Map<String, Value>) -> Option<Self> {
        let id = get_str(&raw, "id")?;
        let name = get_str(&raw, fields::establishment::NAME)?;
        Some(Self {
            id,
            name,
            trust: get_str(&raw, fields::establishment::TRUST),
            is_australian: get_bool(&raw, fields::establishment::IS_AUSTRALIAN),
            use_standard_year: get_str(&raw, fields::establishment::USE_STANDARD_YEAR),
            raw,
        })
    }
}

impl StudentRecord {
    pub fn from_raw(raw: Map<String, Value>) -> Option<Self> {
        let id = get_str(&raw, "id")?;
        let name = get_str(&raw, fields::student::NAME).unwrap_or_default();
        let academic_year = get_str(&raw, fields::student::ACADEMIC_YEAR)?;
        Some(Self {
            id,
            email: get_str(&raw, fields::student::EMAIL),
            name,
            establishment_connection: get_str(&raw, fields::student::ESTABLISHMENT_CONNECTION),
            academic_year,
            year_group: get_str(&raw, fields::student::YEAR_GROUP),
            course: get_str(&raw, fields::student::COURSE),
            faculty: get_str(&raw, fields::student::FACULTY),
            student_group: get_str(&raw, fields::student::STUDENT_GROUP),
            raw,
        })
    }
}

impl VespaScoreRecord {
    /// One source row carries all three cycles' scores as distinct field
    /// groups (spec.md §6.1: "18 score fields total across cycles"); this
    /// yields zero to three `VespaScoreRecord`s, one per cycle that has all
    /// six component fields populated.
    pub fn from_raw(raw: &Map<String, Value>) -> Vec<Self> {
        let Some(id) = get_str(raw, "id") else { return Vec::new() };
        let email = get_str(raw, fields::vespa_score::EMAIL);
        let establishment_connection = get_str(raw, fields::vespa_score::ESTABLISHMENT_CONNECTION);
        let completion_date = get_str(raw, fields::vespa_score::COMPLETION_DATE);
        let created_date = get_str(raw, fields::vespa_score::CREATED_DATE);

        [(1i16, fields::vespa_score::CYCLE_1), (2, fields::vespa_score::CYCLE_2), (3, fields::vespa_score::CYCLE_3)]
            .into_iter()
            .filter_map(|(cycle, field_ids)| {
                let vision = get_i16(raw, field_ids[0])?;
                let effort = get_i16(raw, field_ids[1])?;
                let systems = get_i16(raw, field_ids[2])?;
                let practice = get_i16(raw, field_ids[3])?;
                let attitude = get_i16(raw, field_ids[4])?;
                let overall = get_f64(raw, field_ids[5])?;
                Some(Self {
                    id: id.clone(),
                    email: email.clone(),
                    establishment_connection: establishment_connection.clone(),
                    cycle,
                    vision,
                    effort,
                    systems,
                    practice,
                    attitude,
                    overall,
                    completion_date: completion_date.clone(),
                    created_date: created_date.clone(),
                    raw: raw.clone(),
                })
            })
            .collect()
    }
}

impl QuestionResponseRecord {
    /// One source row is one question/cycle answer, already scoped to a
    /// single `question_id` by the caller (spec.md §6.1: "~32 questions x 3
    /// cycles = 96 fields" — one call site per question field).
    pub fn from_raw(raw: &Map<String, Value>, question_id: &str, response_field: &str, cycle: i16) -> Option<Self> {
        let id = get_str(raw, "id")?;
        let response_value = get_i16(raw, response_field)?;
        Some(Self {
            id,
            email: get_str(raw, fields::question_response::EMAIL),
            score_connection: get_str(raw, fields::question_response::SCORE_CONNECTION),
            cycle,
            question_id: question_id.to_string(),
            response_value,
            raw: raw.clone(),
        })
    }
}

/// Cycle indicator carried on every QuestionResponse source row, read once
/// per raw record before resolving each catalog question's per-cycle field.
pub fn question_response_cycle(raw: &Map<String, Value>) -> Option<i16> {
    get_i16(raw, fields::question_response::CYCLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn establishment_from_raw_reads_named_fields() {
        let r = raw(&[
            ("id", Value::String("e1".into())),
            (fields::establishment::NAME, Value::String("Test School".into())),
            (fields::establishment::IS_AUSTRALIAN, Value::Bool(true)),
        ]);
        let rec = EstablishmentRecord::from_raw(r).unwrap();
        assert_eq!(rec.name, "Test School");
        assert!(rec.is_australian);
    }

    #[test]
    fn vespa_score_from_raw_yields_one_record_per_populated_cycle() {
        let mut pairs = vec![("id", Value::String("v1".into()))];
        for (i, f) in fields::vespa_score::CYCLE_1.iter().enumerate() {
            pairs.push((f, Value::Number((i as i64 + 1).into())));
        }
        let r = raw(&pairs);
        let recs = VespaScoreRecord::from_raw(&r);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].cycle, 1);
        assert_eq!(recs[0].vision, 1);
    }

    #[test]
    fn vespa_score_from_raw_skips_cycles_missing_any_component() {
        let mut pairs = vec![("id", Value::String("v1".into()))];
        for f in &fields::vespa_score::CYCLE_1[..5] {
            pairs.push((*f, Value::Number(5.into())));
        }
        let r = raw(&pairs);
        assert!(VespaScoreRecord::from_raw(&r).is_empty());
    }
}
