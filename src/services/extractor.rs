//! Paginated, rate-limited pulls from the source CRM (spec.md §4.1).
//!
//! Built the way the reference `StarRocksClient` wraps a single
//! `reqwest::Client` per run with credentials applied per-request; here the
//! two fixed application-id/API-key headers stand in for basic auth.
//! Pagination is a hand-rolled "lazy owned iterator" rather than
//! `async-stream`, matching the rest of this codebase's preference for an
//! explicit struct over a macro-generated generator (spec.md §9: "a lazy,
//! restartable sequence abstraction owned by the Extractor").

use crate::services::rate_limiter::RateLimiter;
use crate::utils::error::{ApiError, ApiResult};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// A batch element as the source CRM actually returns it: a raw field
/// map, untouched (spec.md §4.1 — "no deduplication at this layer").
/// Entity-specific typed records (`models::source::EstablishmentRecord`
/// and friends) are built from these by `from_raw` after the batch lands.
pub type RawRecord = Map<String, Value>;

/// Entity kinds the source CRM exposes (spec.md §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEntity {
    Establishment,
    Student,
    VespaScore,
    QuestionResponse,
}

impl SourceEntity {
    fn object_key(&self) -> &'static str {
        match self {
            Self::Establishment => "object_2",
            Self::Student => "object_3",
            Self::VespaScore => "object_10",
            Self::QuestionResponse => "object_29",
        }
    }
}

/// Server-side filters the extractor can push down (spec.md §4.1, §6.1).
#[derive(Debug, Clone, Default)]
pub struct SourceFilters {
    pub completion_date_from: Option<chrono::NaiveDate>,
    pub completion_date_to: Option<chrono::NaiveDate>,
    pub establishment_external_id: Option<String>,
}

impl SourceFilters {
    fn to_query_rules(&self) -> serde_json::Value {
        let mut rules = Vec::new();
        if let Some(id) = &self.establishment_external_id {
            rules.push(serde_json::json!({"field": "field_86", "operator": "is", "value": id}));
        }
        if let Some(from) = self.completion_date_from {
            rules.push(serde_json::json!({
                "field": "field_855", "operator": "is after", "value": from.format("%m/%d/%Y").to_string()
            }));
        }
        if let Some(to) = self.completion_date_to {
            rules.push(serde_json::json!({
                "field": "field_855", "operator": "is before", "value": to.format("%m/%d/%Y").to_string()
            }));
        }
        serde_json::json!({"match": "and", "rules": rules})
    }
}

pub struct SourceCrmClient {
    http: Client,
    base_url: String,
    app_id: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

impl SourceCrmClient {
    pub fn new(base_url: String, app_id: String, api_key: String, rate_limiter: Arc<RateLimiter>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_url, app_id, api_key, rate_limiter })
    }

    /// `FetchAll` (spec.md §4.1): a lazy sequence of batches in source
    /// insertion order, starting at page 1 or a resumed `start_page`.
    pub fn fetch_all(
        &self,
        entity: SourceEntity,
        filters: SourceFilters,
        page_size: u32,
        start_page: u32,
    ) -> ExtractBatches {
        ExtractBatches::new(self.clone_handle(), entity, filters, page_size, start_page)
    }

    /// `FetchForEstablishment` (spec.md §4.1): narrows the same stream
    /// server-side for the single-school refresh.
    pub fn fetch_for_establishment(
        &self,
        entity: SourceEntity,
        establishment_external_id: &str,
        page_size: u32,
    ) -> ExtractBatches {
        let filters = SourceFilters {
            establishment_external_id: Some(establishment_external_id.to_string()),
            ..Default::default()
        };
        ExtractBatches::new(self.clone_handle(), entity, filters, page_size, 1)
    }

    /// The one write-back path out of this pipeline (spec.md §4.5 step 5):
    /// upsert a single national-averages record for `academic_year` in the
    /// source CRM, keyed by `fields::national_averages::ACADEMIC_YEAR`. The
    /// source CRM's own find-or-create-by-field semantics are assumed
    /// (matches how the rest of this client treats Knack-style objects —
    /// find by filter, then create if absent, then update).
    pub async fn write_national_averages(
        &self,
        academic_year: &str,
        means: &[((i16, crate::models::vespa_score::VespaElement), f64)],
    ) -> ApiResult<()> {
        use crate::models::source::fields::national_averages;

        let mut body = serde_json::Map::new();
        body.insert(national_averages::ACADEMIC_YEAR.to_string(), serde_json::json!(academic_year));
        for ((cycle, element), mean) in means {
            if let Some(field_ids) = national_averages::fields_for_cycle(*cycle) {
                let idx = crate::models::vespa_score::VespaElement::ALL
                    .iter()
                    .position(|e| e == element)
                    .expect("VespaElement::ALL is exhaustive");
                body.insert(field_ids[idx].to_string(), serde_json::json!(mean));
            }
        }

        let existing_id = self.find_national_averages_record(academic_year).await?;
        let url = match &existing_id {
            Some(id) => format!("{}/v1/objects/{}/records/{id}", self.base_url, national_averages::OBJECT),
            None => format!("{}/v1/objects/{}/records", self.base_url, national_averages::OBJECT),
        };

        let request = if existing_id.is_some() {
            self.http.put(&url)
        } else {
            self.http.post(&url)
        };

        self.rate_limiter.acquire().await;
        let response = request
            .header("X-Knack-Application-Id", &self.app_id)
            .header("X-Knack-REST-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("national averages write-back failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::transient(format!(
                "national averages write-back returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn find_national_averages_record(&self, academic_year: &str) -> ApiResult<Option<String>> {
        use crate::models::source::fields::national_averages;

        let url = format!("{}/v1/objects/{}/records", self.base_url, national_averages::OBJECT);
        let filters = serde_json::json!({
            "match": "and",
            "rules": [{"field": national_averages::ACADEMIC_YEAR, "operator": "is", "value": academic_year}]
        });

        self.rate_limiter.acquire().await;
        let response = self
            .http
            .get(&url)
            .header("X-Knack-Application-Id", &self.app_id)
            .header("X-Knack-REST-API-Key", &self.api_key)
            .query(&[("filters", filters.to_string())])
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("national averages lookup failed: {e}")))?;

        let page: PagedResponse = response
            .json()
            .await
            .map_err(|e| ApiError::data_error(format!("malformed national averages lookup response: {e}")))?;
        Ok(page.records.into_iter().next().and_then(|r| r.get("id").and_then(Value::as_str).map(str::to_string)))
    }

    fn clone_handle(&self) -> SourceCrmClientHandle {
        SourceCrmClientHandle {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            app_id: self.app_id.clone(),
            api_key: self.api_key.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

#[derive(Clone)]
struct SourceCrmClientHandle {
    http: Client,
    base_url: String,
    app_id: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, serde::Deserialize)]
struct PagedResponse {
    records: Vec<RawRecord>,
    total_pages: u32,
}

impl SourceCrmClientHandle {
    /// Fetch one page with the retry/backoff policy from spec.md §4.1:
    /// 429 gets exponential backoff with jitter capped at 6 retries;
    /// 401/403 fail immediately; network timeouts retry up to 3 times
    /// with doubling backoff.
    async fn fetch_page(
        &self,
        entity: SourceEntity,
        filters: &SourceFilters,
        page: u32,
        page_size: u32,
    ) -> ApiResult<PagedResponse> {
        let url = format!("{}/v1/objects/{}/records", self.base_url, entity.object_key());
        let mut rate_limit_retries = 0u32;
        let mut timeout_retries = 0u32;

        loop {
            self.rate_limiter.acquire().await;

            let response = self
                .http
                .get(&url)
                .header("X-Knack-Application-Id", &self.app_id)
                .header("X-Knack-REST-API-Key", &self.api_key)
                .query(&[
                    ("page", page.to_string()),
                    ("rows_per_page", page_size.to_string()),
                    ("filters", filters.to_query_rules().to_string()),
                ])
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_timeout() && timeout_retries < 3 => {
                    timeout_retries += 1;
                    let backoff = Duration::from_secs(2u64.pow(timeout_retries));
                    tracing::warn!("timeout fetching {} page {page}, retry {timeout_retries}/3 in {backoff:?}", entity.object_key());
                    tokio::time::sleep(backoff).await;
                    continue;
                },
                Err(e) => return Err(ApiError::transient(format!("network error: {e}"))),
            };

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(ApiError::unauthorized(format!(
                        "source CRM rejected credentials (status {})",
                        response.status()
                    )));
                },
                StatusCode::TOO_MANY_REQUESTS if rate_limit_retries < 6 => {
                    rate_limit_retries += 1;
                    let base_ms = 250u64 * 2u64.pow(rate_limit_retries);
                    let jitter_ms = rand::thread_rng().gen_range(0..base_ms / 2 + 1);
                    let backoff = Duration::from_millis(base_ms + jitter_ms);
                    tracing::warn!(
                        "rate limited fetching {} page {page}, retry {rate_limit_retries}/6 in {backoff:?}",
                        entity.object_key()
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                },
                StatusCode::TOO_MANY_REQUESTS => {
                    return Err(ApiError::transient("rate limit retries exhausted"));
                },
                status if !status.is_success() => {
                    return Err(ApiError::data_error(format!(
                        "source CRM returned unexpected status {status} for {}",
                        entity.object_key()
                    )));
                },
                _ => {},
            }

            return response
                .json::<PagedResponse>()
                .await
                .map_err(|e| ApiError::data_error(format!("malformed response for {}: {e}", entity.object_key())));
        }
    }
}

/// A lazy, restartable sequence of record batches. Each call to
/// `next_batch` fetches exactly one page; the struct owns the paging
/// cursor so the orchestrator never loops over pages directly.
pub struct ExtractBatches {
    handle: SourceCrmClientHandle,
    entity: SourceEntity,
    filters: SourceFilters,
    page_size: u32,
    next_page: u32,
    total_pages: Option<u32>,
}

impl ExtractBatches {
    fn new(
        handle: SourceCrmClientHandle,
        entity: SourceEntity,
        filters: SourceFilters,
        page_size: u32,
        start_page: u32,
    ) -> Self {
        Self {
            handle,
            entity,
            filters,
            page_size,
            next_page: start_page.max(1),
            total_pages: None,
        }
    }

    /// The page number just fetched by the most recent `next_batch` call;
    /// the orchestrator persists this to the checkpoint file after each
    /// successful batch, and resumes at this value + 1.
    pub fn current_page(&self) -> u32 {
        self.next_page - 1
    }

    /// Fetch the next batch, or `None` once the source reports no more
    /// pages. Each batch contains the raw records untouched — no
    /// deduplication happens at this layer (spec.md §4.1).
    pub async fn next_batch(&mut self) -> ApiResult<Option<Vec<RawRecord>>> {
        if let Some(total) = self.total_pages {
            if self.next_page > total {
                return Ok(None);
            }
        }

        let page = self.next_page;
        let response = self.handle.fetch_page(self.entity, &self.filters, page, self.page_size).await?;
        self.total_pages = Some(response.total_pages);
        self.next_page += 1;

        if response.records.is_empty() {
            return Ok(None);
        }
        Ok(Some(response.records))
    }
}

