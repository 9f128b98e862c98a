//! Scenario F (refresh isolation), spec.md §8: a refresh scoped to one
//! establishment must never resolve against another establishment's
//! students, even when both share an email and academic year.
//!
//! `SyncOrchestrator::run_refresh` builds this exact roster from the
//! warehouse before touching the shared Linker cache (see
//! `services::sync_orchestrator`); this test exercises that roster query
//! directly rather than the whole refresh (which also calls out to the
//! source CRM over HTTP).

use sqlx::PgPool;
use std::collections::HashMap;

use crate::models::UseStandardYear;
use crate::tests::common::{seed_establishment, seed_student};

#[sqlx::test]
async fn roster_scoped_to_one_establishment_excludes_the_other(pool: PgPool) {
    let establishment_a = seed_establishment(&pool, "refresh-est-a", UseStandardYear::Yes).await;
    let establishment_b = seed_establishment(&pool, "refresh-est-b", UseStandardYear::Yes).await;

    let student_a =
        seed_student(&pool, establishment_a, "stu-a", "shared@example.com", "2024/2025").await;
    let student_b =
        seed_student(&pool, establishment_b, "stu-b", "shared@example.com", "2024/2025").await;
    assert_ne!(student_a, student_b, "fixture sanity check");

    let roster: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT email, academic_year, id FROM students WHERE establishment_id = $1")
            .bind(establishment_a)
            .fetch_all(&pool)
            .await
            .expect("fetch roster");

    let mut by_email_year: HashMap<(String, String), i64> = HashMap::new();
    for (email, year, id) in roster {
        by_email_year.insert((email, year), id);
    }

    assert_eq!(by_email_year.len(), 1, "establishment A's roster must only contain its own student");
    let resolved = by_email_year.get(&("shared@example.com".to_string(), "2024/2025".to_string()));
    assert_eq!(resolved, Some(&student_a), "same email/year in another establishment must never resolve here");
}
