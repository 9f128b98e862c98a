//! Shared fixture builders for the warehouse-backed integration tests.

use sqlx::PgPool;

use crate::models::{Establishment, Student, UseStandardYear, VespaScore};
use crate::services::Loader;

/// Insert an establishment and return its generated id.
pub async fn seed_establishment(pool: &PgPool, external_id: &str, use_standard_year: UseStandardYear) -> i64 {
    let loader = Loader::new(pool.clone());
    loader
        .upsert_establishments(
            vec![Establishment {
                id: 0,
                external_id: external_id.to_string(),
                name: format!("Test school {external_id}"),
                trust: None,
                is_australian: false,
                use_standard_year,
            }],
            10,
        )
        .await
        .expect("seed establishment");

    sqlx::query_scalar("SELECT id FROM establishments WHERE external_id = $1")
        .bind(external_id)
        .fetch_one(pool)
        .await
        .expect("fetch seeded establishment id")
}

/// Insert a student and return its generated id.
pub async fn seed_student(pool: &PgPool, establishment_id: i64, external_id: &str, email: &str, academic_year: &str) -> i64 {
    let loader = Loader::new(pool.clone());
    loader
        .upsert_students(
            vec![Student {
                id: 0,
                external_id: external_id.to_string(),
                email: email.to_string(),
                academic_year: academic_year.to_string(),
                name: "Test Student".to_string(),
                establishment_id,
                year_group: None,
                course: None,
                faculty: None,
                student_group: None,
            }],
            10,
        )
        .await
        .expect("seed student");

    sqlx::query_scalar("SELECT id FROM students WHERE email = $1 AND academic_year = $2")
        .bind(email)
        .bind(academic_year)
        .fetch_one(pool)
        .await
        .expect("fetch seeded student id")
}

/// Insert one VESPA score row for `student_id`, with every element set to
/// the same value so per-element means stay easy to compute by hand.
pub async fn seed_uniform_score(pool: &PgPool, student_id: i64, cycle: i16, academic_year: &str, value: i16) {
    let loader = Loader::new(pool.clone());
    loader
        .upsert_vespa_scores(
            vec![VespaScore {
                id: 0,
                student_id,
                cycle,
                vision: value,
                effort: value,
                systems: value,
                practice: value,
                attitude: value,
                overall: value as f64,
                completion_date: None,
                created_date: None,
                academic_year: academic_year.to_string(),
            }],
            10,
        )
        .await
        .expect("seed vespa score");
}
