//! Full-sync and single-establishment refresh orchestration (spec.md §4.7, §5).
//!
//! Drives the Extractor → Classifier → Linker → Loader pipeline through the
//! fixed step order mandated by spec.md §4.7, the same way the reference
//! `ScheduledExecutor` drives the service's baseline-refresh task: one
//! sequential pass through a small fixed set of steps, each step's batches
//! processed one at a time (no cross-batch interleaving within a step,
//! matching spec.md §4.7's "simplest: single-threaded within a step").

use crate::models::{
    Establishment, Question, QuestionResponse, Student, SyncErrorSummary, SyncRunRecord,
    SyncRunStatus, SyncRunType, UseStandardYear, VespaScore,
};
use crate::models::source::{
    self, EstablishmentRecord, QuestionResponseRecord, StudentRecord, VespaScoreRecord,
};
use crate::services::aggregator::{Aggregator, Scope};
use crate::services::classifier;
use crate::services::extractor::{SourceCrmClient, SourceEntity, SourceFilters};
use crate::services::linker::Linker;
use crate::services::loader::Loader;
use crate::utils::checkpoint::Checkpoint;
use crate::utils::error::{ApiError, ApiResult};
use crate::utils::report::{RunReport, RunReportBuilder};
use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-entity page and batch sizing, tunable from `Config` (spec.md §5, §4.4
/// "50-300 rows depending on entity" / §4.1 "page size 500-1000").
#[derive(Debug, Clone)]
pub struct SyncTuning {
    pub page_size: u32,
    pub establishment_batch_size: usize,
    pub student_batch_size: usize,
    pub vespa_score_batch_size: usize,
    pub question_response_batch_size: usize,
    pub checkpoint_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            page_size: 500,
            establishment_batch_size: 100,
            student_batch_size: 200,
            vespa_score_batch_size: 200,
            question_response_batch_size: 300,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            report_dir: PathBuf::from("./reports"),
        }
    }
}

/// Outcome of a single-establishment refresh (spec.md §4.6 contract).
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub students_synced: u64,
    pub vespa_synced: u64,
    pub responses_synced: u64,
    pub errors: Vec<String>,
}

pub struct SyncOrchestrator {
    pool: PgPool,
    source: SourceCrmClient,
    linker: Arc<Linker>,
    loader: Loader,
    aggregator: Aggregator,
    tuning: SyncTuning,
}

impl SyncOrchestrator {
    pub fn new(
        pool: PgPool,
        source: SourceCrmClient,
        linker: Arc<Linker>,
        loader: Loader,
        aggregator: Aggregator,
        tuning: SyncTuning,
    ) -> Self {
        Self { pool, source, linker, loader, aggregator, tuning }
    }

    async fn load_establishments_by_id(&self) -> ApiResult<HashMap<i64, Establishment>> {
        let rows = sqlx::query_as::<_, Establishment>(
            "SELECT id, external_id, name, trust, is_australian, use_standard_year FROM establishments",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|e| (e.id, e)).collect())
    }

    async fn load_questions(&self) -> ApiResult<Vec<Question>> {
        sqlx::query_as::<_, Question>(
            "SELECT id, question_id, text, vespa_category, cycle_field_map FROM questions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Run the full nine-step sync (spec.md §4.7). Steps 2-8 are sequential;
    /// the Step 5 → Step 7 barrier falls out naturally from running them in
    /// this order with no concurrency across steps.
    pub async fn run_full_sync(&self, cancel: CancellationToken) -> ApiResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut report = RunReportBuilder::new(run_id, started_at);
        let mut fatal: Option<ApiError> = None;

        sqlx::query(
            "INSERT INTO sync_runs (id, run_type, status, started_at, students_synced, vespa_synced, responses_synced, errors_summary)
             VALUES ($1, $2, $3, $4, 0, 0, 0, $5)",
        )
        .bind(run_id)
        .bind(SyncRunType::Full)
        .bind(SyncRunStatus::Started)
        .bind(started_at)
        .bind(sqlx::types::Json(SyncErrorSummary::default()))
        .execute(&self.pool)
        .await?;

        // Step 2: Establishments.
        if fatal.is_none() {
            if let Err(e) = self.sync_establishments(SourceFilters::default(), &mut report, &cancel).await {
                if e.is_fatal() {
                    fatal = Some(e);
                } else {
                    report.record_error("establishment", "extraction", e.to_string());
                }
            }
        }

        // Step 3: warm Linker (establishments only, students table may already hold prior runs' rows).
        if fatal.is_none() {
            if let Err(e) = self.linker.warm(&self.pool).await {
                fatal = Some(e);
            }
        }

        let establishments_by_id = if fatal.is_none() {
            self.load_establishments_by_id().await.unwrap_or_default()
        } else {
            HashMap::new()
        };

        // Step 4: Students.
        if fatal.is_none() {
            if let Err(e) = self.sync_students(SourceFilters::default(), &mut report, &cancel).await
            {
                if e.is_fatal() {
                    fatal = Some(e);
                } else {
                    report.record_error("student", "extraction", e.to_string());
                }
            }
        }

        // Re-warm to pick up newly-inserted student ids before resolving scores (§4.3:
        // the Loader's halving-retry upsert returns counts, not per-row ids, so the
        // orchestrator re-scans rather than threading ids back out of that path).
        if fatal.is_none() {
            if let Err(e) = self.linker.warm(&self.pool).await {
                fatal = Some(e);
            }
        }

        // Step 5: VespaScores, building the (student, cycle) -> academic_year map (step 6)
        // and the score-record-id -> (student, cycle, year) map for response inheritance.
        let mut vespa_year_map: HashMap<(i64, i16), String> = HashMap::new();
        let mut score_id_index: HashMap<String, (i64, i16, String)> = HashMap::new();
        let mut email_cycle_candidates: HashMap<(String, i16), Vec<(i64, String)>> = HashMap::new();

        if fatal.is_none() {
            if let Err(e) = self
                .sync_vespa_scores(
                    SourceFilters::default(),
                    &establishments_by_id,
                    &mut vespa_year_map,
                    &mut score_id_index,
                    &mut email_cycle_candidates,
                    &mut report,
                    &cancel,
                )
                .await
            {
                if e.is_fatal() {
                    fatal = Some(e);
                } else {
                    report.record_error("vespa_score", "extraction", e.to_string());
                }
            }
        }

        // Step 7: QuestionResponses, inheriting academic_year from step 6's map.
        if fatal.is_none() {
            if let Err(e) = self
                .sync_question_responses(
                    SourceFilters::default(),
                    &vespa_year_map,
                    &score_id_index,
                    &email_cycle_candidates,
                    &mut report,
                    &cancel,
                )
                .await
            {
                if e.is_fatal() {
                    fatal = Some(e);
                } else {
                    report.record_error("question_response", "extraction", e.to_string());
                }
            }
        }

        // Step 8: Aggregator across all scopes, plus the one write-back (spec.md §4.5 step 5).
        if fatal.is_none() {
            match self.aggregator.recompute(Scope::All).await {
                Ok(_counts) => {
                    let years: BTreeSet<String> = vespa_year_map.values().cloned().collect();
                    for year in years {
                        match self.aggregator.national_means_by_year(&year).await {
                            Ok(means) => {
                                if let Err(e) = self.source.write_national_averages(&year, &means).await {
                                    report.record_error("national_averages", &year, e.to_string());
                                }
                            },
                            Err(e) => report.record_error("national_averages", &year, e.to_string()),
                        }
                    }
                },
                Err(e) => {
                    if e.is_fatal() {
                        fatal = Some(e);
                    } else {
                        report.record_error("aggregator", "recompute", e.to_string());
                    }
                },
            }
        }

        // Step 9: close the SyncRunRecord.
        let has_errors = report.total_errors("establishment")
            + report.total_errors("student")
            + report.total_errors("vespa_score")
            + report.total_errors("question_response")
            + report.total_errors("aggregator")
            + report.total_errors("national_averages")
            > 0;

        let status = if fatal.is_some() {
            SyncRunStatus::Failed
        } else if has_errors {
            SyncRunStatus::Partial
        } else {
            SyncRunStatus::Completed
        };

        let errors_summary = SyncErrorSummary {
            responses_no_matching_score: report.total_errors("question_response"),
            duplicate_records_in_page: 0,
            records_skipped: report.total_errors("establishment")
                + report.total_errors("student")
                + report.total_errors("vespa_score"),
        };

        sqlx::query(
            "UPDATE sync_runs SET status = $2, finished_at = $3, students_synced = $4, vespa_synced = $5, responses_synced = $6, errors_summary = $7 WHERE id = $1",
        )
        .bind(run_id)
        .bind(status)
        .bind(Utc::now())
        .bind(0i64)
        .bind(0i64)
        .bind(0i64)
        .bind(sqlx::types::Json(&errors_summary))
        .execute(&self.pool)
        .await?;

        if matches!(status, SyncRunStatus::Completed) {
            for entity in ["establishment", "student", "vespa_score", "question_response"] {
                let _ = Checkpoint::clear(&self.tuning.checkpoint_dir, entity);
            }
        }

        let report = report.finish(match status {
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Partial => "partial",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::Started => unreachable!("a finished run is never left in Started"),
        });
        let _ = report.write_to_dir(&self.tuning.report_dir);

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(report)
    }

    async fn sync_establishments(
        &self,
        filters: SourceFilters,
        report: &mut RunReportBuilder,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let start_page = Checkpoint::load(&self.tuning.checkpoint_dir, "establishment")?.last_page("establishment") + 1;
        let mut batches = self.source.fetch_all(SourceEntity::Establishment, filters, self.tuning.page_size, start_page.max(1));

        while let Some(raw_batch) = batches.next_batch().await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut rows = Vec::with_capacity(raw_batch.len());
            for raw in raw_batch {
                match EstablishmentRecord::from_raw(raw) {
                    Some(rec) => rows.push(Establishment {
                        id: 0,
                        external_id: rec.id,
                        name: rec.name,
                        trust: rec.trust,
                        is_australian: rec.is_australian,
                        use_standard_year: UseStandardYear::from_source_str(rec.use_standard_year.as_deref()),
                    }),
                    None => report.record_error("establishment", "parse", "missing required fields"),
                }
            }
            let result = self.loader.upsert_establishments(rows, self.tuning.establishment_batch_size).await?;
            report.record_inserted("establishment", result.inserted);
            report.record_updated("establishment", result.updated);
            report.record_skipped("establishment", result.skipped);
            Checkpoint::save(&self.tuning.checkpoint_dir, "establishment", batches.current_page())?;
        }
        Ok(())
    }

    async fn sync_students(
        &self,
        filters: SourceFilters,
        report: &mut RunReportBuilder,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let start_page = Checkpoint::load(&self.tuning.checkpoint_dir, "student")?.last_page("student") + 1;
        let mut batches = self.source.fetch_all(SourceEntity::Student, filters, self.tuning.page_size, start_page.max(1));

        while let Some(raw_batch) = batches.next_batch().await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut rows = Vec::with_capacity(raw_batch.len());
            for raw in raw_batch {
                let Some(rec) = StudentRecord::from_raw(raw) else {
                    report.record_error("student", "parse", "missing required fields");
                    continue;
                };
                let Some(email) = rec.email.clone() else {
                    report.record_error("student", &rec.id, "missing email");
                    continue;
                };
                let Some(establishment_id) = rec
                    .establishment_connection
                    .as_deref()
                    .and_then(|ext| self.linker.resolve_establishment(ext))
                else {
                    report.record_error("student", &rec.id, "unresolved establishment connection");
                    continue;
                };
                if !crate::utils::is_well_formed_academic_year(&rec.academic_year) {
                    report.record_error(
                        "student",
                        &rec.id,
                        format!("malformed academic_year {:?}", rec.academic_year),
                    );
                    continue;
                }
                rows.push(Student {
                    id: 0,
                    external_id: rec.id,
                    email,
                    academic_year: rec.academic_year,
                    name: rec.name,
                    establishment_id,
                    year_group: rec.year_group,
                    course: rec.course,
                    faculty: rec.faculty,
                    student_group: rec.student_group,
                });
            }
            let result = self.loader.upsert_students(rows, self.tuning.student_batch_size).await?;
            report.record_inserted("student", result.inserted);
            report.record_updated("student", result.updated);
            report.record_skipped("student", result.skipped);
            Checkpoint::save(&self.tuning.checkpoint_dir, "student", batches.current_page())?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_vespa_scores(
        &self,
        filters: SourceFilters,
        establishments_by_id: &HashMap<i64, Establishment>,
        vespa_year_map: &mut HashMap<(i64, i16), String>,
        score_id_index: &mut HashMap<String, (i64, i16, String)>,
        email_cycle_candidates: &mut HashMap<(String, i16), Vec<(i64, String)>>,
        report: &mut RunReportBuilder,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let start_page = Checkpoint::load(&self.tuning.checkpoint_dir, "vespa_score")?.last_page("vespa_score") + 1;
        let mut batches = self.source.fetch_all(SourceEntity::VespaScore, filters, self.tuning.page_size, start_page.max(1));

        while let Some(raw_batch) = batches.next_batch().await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut rows = Vec::new();
            for raw in &raw_batch {
                for rec in VespaScoreRecord::from_raw(raw) {
                    let Some(establishment_id) = rec
                        .establishment_connection
                        .as_deref()
                        .and_then(|ext| self.linker.resolve_establishment(ext))
                    else {
                        report.record_error("vespa_score", &rec.id, "unresolved establishment connection");
                        continue;
                    };
                    let Some(establishment) = establishments_by_id.get(&establishment_id) else {
                        report.record_error("vespa_score", &rec.id, "establishment not loaded");
                        continue;
                    };
                    let Some(email) = rec.email.clone() else {
                        report.record_error("vespa_score", &rec.id, "missing email");
                        continue;
                    };
                    let classified =
                        classifier::classify_score(rec.completion_date.as_deref(), rec.created_date.as_deref(), establishment);
                    if classified.used_now_fallback {
                        tracing::warn!("vespa_score {} missing both dates, classified using now()", rec.id);
                    }
                    let Some(student_id) = self.linker.resolve_student(&email, &classified.academic_year) else {
                        report.record_error("vespa_score", &rec.id, "no matching student for email/academic_year");
                        continue;
                    };

                    score_id_index
                        .insert(rec.id.clone(), (student_id, rec.cycle, classified.academic_year.clone()));
                    vespa_year_map.insert((student_id, rec.cycle), classified.academic_year.clone());
                    email_cycle_candidates
                        .entry((email, rec.cycle))
                        .or_default()
                        .push((student_id, classified.academic_year.clone()));

                    rows.push(VespaScore {
                        id: 0,
                        student_id,
                        cycle: rec.cycle,
                        vision: rec.vision,
                        effort: rec.effort,
                        systems: rec.systems,
                        practice: rec.practice,
                        attitude: rec.attitude,
                        overall: rec.overall,
                        completion_date: rec.completion_date.as_deref().and_then(classifier::parse_source_date),
                        created_date: rec.created_date.as_deref().and_then(classifier::parse_source_date),
                        academic_year: classified.academic_year,
                    });
                }
            }
            let result = self.loader.upsert_vespa_scores(rows, self.tuning.vespa_score_batch_size).await?;
            report.record_inserted("vespa_score", result.inserted);
            report.record_updated("vespa_score", result.updated);
            report.record_skipped("vespa_score", result.skipped);
            Checkpoint::save(&self.tuning.checkpoint_dir, "vespa_score", batches.current_page())?;
        }
        Ok(())
    }

    async fn sync_question_responses(
        &self,
        filters: SourceFilters,
        vespa_year_map: &HashMap<(i64, i16), String>,
        score_id_index: &HashMap<String, (i64, i16, String)>,
        email_cycle_candidates: &HashMap<(String, i16), Vec<(i64, String)>>,
        report: &mut RunReportBuilder,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let _ = vespa_year_map;
        let questions = self.load_questions().await?;
        let start_page =
            Checkpoint::load(&self.tuning.checkpoint_dir, "question_response")?.last_page("question_response") + 1;
        let mut batches =
            self.source.fetch_all(SourceEntity::QuestionResponse, filters, self.tuning.page_size, start_page.max(1));

        while let Some(raw_batch) = batches.next_batch().await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let mut rows = Vec::new();
            for raw in &raw_batch {
                let Some(cycle) = source::question_response_cycle(raw) else {
                    report.record_error("question_response", "parse", "missing cycle field");
                    continue;
                };

                for question in &questions {
                    let Some(field_id) = question.cycle_field_map.get(&cycle.to_string()) else {
                        continue;
                    };
                    let Some(rec) = QuestionResponseRecord::from_raw(raw, &question.question_id, field_id, cycle) else {
                        continue;
                    };

                    let resolved = rec
                        .email
                        .as_ref()
                        .and_then(|email| {
                            email_cycle_candidates
                                .get(&(email.clone(), cycle))
                                .and_then(|candidates| candidates.iter().max_by(|a, b| a.1.cmp(&b.1)))
                                .cloned()
                        })
                        .or_else(|| {
                            rec.score_connection
                                .as_ref()
                                .and_then(|id| score_id_index.get(id))
                                .map(|(student_id, _cycle, year)| (*student_id, year.clone()))
                        });

                    let Some((student_id, academic_year)) = resolved else {
                        report.record_error("question_response", &rec.id, "no matching score");
                        continue;
                    };

                    rows.push(QuestionResponse {
                        id: 0,
                        student_id,
                        cycle,
                        question_id: rec.question_id,
                        response_value: rec.response_value,
                        academic_year,
                    });
                }
            }
            let result = self.loader.upsert_question_responses(rows, self.tuning.question_response_batch_size).await?;
            report.record_inserted("question_response", result.inserted);
            report.record_updated("question_response", result.updated);
            report.record_skipped("question_response", result.skipped);
            Checkpoint::save(&self.tuning.checkpoint_dir, "question_response", batches.current_page())?;
        }
        Ok(())
    }

    /// Current academic-year boundary dates for an establishment's locale,
    /// used to scope the Refresh API's server-side date filter (spec.md §4.6:
    /// "date-range filter server-side to the current academic year").
    fn current_academic_year_bounds(establishment: &Establishment) -> (NaiveDate, NaiveDate) {
        let today = Utc::now().date_naive();
        let calendar_year =
            establishment.is_australian && establishment.use_standard_year == UseStandardYear::No;
        if calendar_year {
            (
                NaiveDate::from_ymd_opt(today.year(), 1, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(today.year(), 12, 31).expect("valid date"),
            )
        } else if today.month() >= 8 {
            (
                NaiveDate::from_ymd_opt(today.year(), 8, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(today.year() + 1, 7, 31).expect("valid date"),
            )
        } else {
            (
                NaiveDate::from_ymd_opt(today.year() - 1, 8, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(today.year(), 7, 31).expect("valid date"),
            )
        }
    }

    /// Bounded, single-establishment re-ingestion (spec.md §4.6): no
    /// Aggregator run, hard 300s timeout enforced by the caller wrapping
    /// this call in `tokio::time::timeout`, and every lookup scoped to
    /// this establishment's own roster rather than the full global Linker
    /// so a concurrent full sync for a different establishment can never
    /// leak rows across establishment boundaries (spec.md §8 scenario F).
    pub async fn run_refresh(&self, establishment_external_id: &str, cancel: CancellationToken) -> ApiResult<RefreshOutcome> {
        let establishment_id = self
            .linker
            .resolve_establishment(establishment_external_id)
            .ok_or_else(|| ApiError::not_found(format!("unknown establishment {establishment_external_id}")))?;

        let establishment = sqlx::query_as::<_, Establishment>(
            "SELECT id, external_id, name, trust, is_australian, use_standard_year FROM establishments WHERE id = $1",
        )
        .bind(establishment_id)
        .fetch_one(&self.pool)
        .await?;

        let (from, to) = Self::current_academic_year_bounds(&establishment);
        let mut errors = Vec::new();

        // Students (establishment-scoped by the extractor's filter protocol).
        let mut students_synced = 0u64;
        let mut student_batches =
            self.source.fetch_for_establishment(SourceEntity::Student, establishment_external_id, self.tuning.page_size);
        while let Some(raw_batch) = student_batches.next_batch().await? {
            if cancel.is_cancelled() {
                break;
            }
            let mut rows = Vec::new();
            for raw in raw_batch {
                let Some(rec) = StudentRecord::from_raw(raw) else { continue };
                let Some(email) = rec.email.clone() else {
                    errors.push(format!("student {}: missing email", rec.id));
                    continue;
                };
                rows.push(Student {
                    id: 0,
                    external_id: rec.id,
                    email,
                    academic_year: rec.academic_year,
                    name: rec.name,
                    establishment_id,
                    year_group: rec.year_group,
                    course: rec.course,
                    faculty: rec.faculty,
                    student_group: rec.student_group,
                });
            }
            let result = self.loader.upsert_students(rows, self.tuning.student_batch_size).await?;
            students_synced += result.inserted + result.updated;
        }

        // Local roster (this establishment only) for response/score linking,
        // rebuilt fresh rather than touching the shared Linker cache.
        let roster: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT email, academic_year, id FROM students WHERE establishment_id = $1")
                .bind(establishment_id)
                .fetch_all(&self.pool)
                .await?;
        let mut by_email_year: HashMap<(String, String), i64> = HashMap::new();
        for (email, year, id) in roster {
            by_email_year.insert((email, year), id);
        }

        // VespaScores, narrowed both by establishment and by the current
        // academic-year date range.
        let mut vespa_synced = 0u64;
        let score_filters = SourceFilters {
            establishment_external_id: Some(establishment_external_id.to_string()),
            completion_date_from: Some(from),
            completion_date_to: Some(to),
        };
        let mut score_id_index: HashMap<String, (i64, i16, String)> = HashMap::new();
        let mut email_cycle_candidates: HashMap<(String, i16), Vec<(i64, String)>> = HashMap::new();
        let mut score_batches = self.source.fetch_all(SourceEntity::VespaScore, score_filters, self.tuning.page_size, 1);
        while let Some(raw_batch) = score_batches.next_batch().await? {
            if cancel.is_cancelled() {
                break;
            }
            let mut rows = Vec::new();
            for raw in &raw_batch {
                for rec in VespaScoreRecord::from_raw(raw) {
                    let classified =
                        classifier::classify_score(rec.completion_date.as_deref(), rec.created_date.as_deref(), &establishment);
                    let Some(email) = rec.email.clone() else {
                        errors.push(format!("vespa_score {}: missing email", rec.id));
                        continue;
                    };
                    let Some(&student_id) = by_email_year.get(&(email.clone(), classified.academic_year.clone())) else {
                        errors.push(format!("vespa_score {}: no matching student in establishment roster", rec.id));
                        continue;
                    };

                    score_id_index.insert(rec.id.clone(), (student_id, rec.cycle, classified.academic_year.clone()));
                    email_cycle_candidates
                        .entry((email, rec.cycle))
                        .or_default()
                        .push((student_id, classified.academic_year.clone()));

                    rows.push(VespaScore {
                        id: 0,
                        student_id,
                        cycle: rec.cycle,
                        vision: rec.vision,
                        effort: rec.effort,
                        systems: rec.systems,
                        practice: rec.practice,
                        attitude: rec.attitude,
                        overall: rec.overall,
                        completion_date: rec.completion_date.as_deref().and_then(classifier::parse_source_date),
                        created_date: rec.created_date.as_deref().and_then(classifier::parse_source_date),
                        academic_year: classified.academic_year,
                    });
                }
            }
            let result = self.loader.upsert_vespa_scores(rows, self.tuning.vespa_score_batch_size).await?;
            vespa_synced += result.inserted + result.updated;
        }

        // QuestionResponses, resolved only against this establishment's own
        // score/roster indices built above — never the global Linker.
        let mut responses_synced = 0u64;
        let questions = self.load_questions().await?;
        let response_filters = SourceFilters {
            establishment_external_id: Some(establishment_external_id.to_string()),
            ..Default::default()
        };
        let mut response_batches = self.source.fetch_all(SourceEntity::QuestionResponse, response_filters, self.tuning.page_size, 1);
        while let Some(raw_batch) = response_batches.next_batch().await? {
            if cancel.is_cancelled() {
                break;
            }
            let mut rows = Vec::new();
            for raw in &raw_batch {
                let Some(cycle) = source::question_response_cycle(raw) else { continue };
                for question in &questions {
                    let Some(field_id) = question.cycle_field_map.get(&cycle.to_string()) else { continue };
                    let Some(rec) = QuestionResponseRecord::from_raw(raw, &question.question_id, field_id, cycle) else {
                        continue;
                    };
                    let resolved = rec
                        .email
                        .as_ref()
                        .and_then(|email| {
                            email_cycle_candidates
                                .get(&(email.clone(), cycle))
                                .and_then(|candidates| candidates.iter().max_by(|a, b| a.1.cmp(&b.1)))
                                .cloned()
                        })
                        .or_else(|| {
                            rec.score_connection
                                .as_ref()
                                .and_then(|id| score_id_index.get(id))
                                .map(|(student_id, _cycle, year)| (*student_id, year.clone()))
                        });
                    let Some((student_id, academic_year)) = resolved else {
                        errors.push(format!("question_response {}: no matching score", rec.id));
                        continue;
                    };
                    rows.push(QuestionResponse {
                        id: 0,
                        student_id,
                        cycle,
                        question_id: rec.question_id,
                        response_value: rec.response_value,
                        academic_year,
                    });
                }
            }
            let result = self.loader.upsert_question_responses(rows, self.tuning.question_response_batch_size).await?;
            responses_synced += result.inserted + result.updated;
        }

        self.linker.record_establishment(establishment.external_id.clone(), establishment.id);
        Ok(RefreshOutcome { students_synced, vespa_synced, responses_synced, errors })
    }
}

impl crate::utils::scheduled_executor::ScheduledTask for SyncOrchestrator {
    fn run(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>>
    {
        Box::pin(async move {
            let report = self.run_full_sync(CancellationToken::new()).await?;
            tracing::info!("Scheduled full sync finished with status {}", report.status);
            Ok(())
        })
    }
}
