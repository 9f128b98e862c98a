//! Single-establishment refresh state machine (spec.md §4.6).
//!
//! Mirrors the shape of the reference `ClusterService`'s active-cluster
//! cache: a `DashMap` keyed by the natural id, holding the in-flight state
//! so a second request for the same establishment is rejected outright
//! rather than racing a concurrent run.

use crate::services::sync_orchestrator::{RefreshOutcome, SyncOrchestrator};
use crate::utils::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `Idle -> Running -> Complete | Failed` (spec.md §4.6). `Idle` is never
/// actually stored — absence from the map *is* idle; the enum only needs
/// to describe the two states a request can observe while one is running
/// or has just finished.
#[derive(Debug, Clone)]
pub enum RefreshState {
    Running { started_at: DateTime<Utc> },
    Complete { finished_at: DateTime<Utc>, outcome: RefreshOutcome },
    Failed { finished_at: DateTime<Utc>, error: String },
}

/// Hard timeout from spec.md §4.6: a refresh that hasn't finished within
/// this long is cancelled and reported as failed rather than left running
/// forever.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(300);

pub struct RefreshService {
    orchestrator: Arc<SyncOrchestrator>,
    states: DashMap<String, RefreshState>,
}

impl RefreshService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator, states: DashMap::new() }
    }

    /// Current state for an establishment, if a refresh has ever run for it
    /// in this process (spec.md §6.3: surfaced by the health endpoint).
    pub fn state_for(&self, establishment_external_id: &str) -> Option<RefreshState> {
        self.states.get(establishment_external_id).map(|r| r.clone())
    }

    /// Run a bounded single-establishment refresh. Returns
    /// `ApiError::Conflict` immediately if one is already running for this
    /// establishment — the orchestrator itself is never invoked twice
    /// concurrently for the same id (spec.md §4.6: "a second request
    /// returns AlreadyInProgress").
    pub async fn refresh(&self, establishment_external_id: &str) -> ApiResult<RefreshOutcome> {
        // `entry()` holds the shard lock across the check-and-insert, so two
        // near-simultaneous callers can't both observe "not running" before
        // either writes `Running` (spec.md §4.6 single-flight guarantee).
        match self.states.entry(establishment_external_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if matches!(entry.get(), RefreshState::Running { .. }) {
                    return Err(ApiError::conflict(format!(
                        "refresh already in progress for establishment {establishment_external_id}"
                    )));
                }
                entry.insert(RefreshState::Running { started_at: Utc::now() });
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(RefreshState::Running { started_at: Utc::now() });
            },
        }

        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let id = establishment_external_id.to_string();
        let run = tokio::time::timeout(REFRESH_TIMEOUT, async move {
            orchestrator.run_refresh(&id, cancel).await
        })
        .await;

        let result = match run {
            Ok(Ok(outcome)) => {
                self.states.insert(
                    establishment_external_id.to_string(),
                    RefreshState::Complete { finished_at: Utc::now(), outcome: outcome.clone() },
                );
                Ok(outcome)
            },
            Ok(Err(e)) => {
                self.states.insert(
                    establishment_external_id.to_string(),
                    RefreshState::Failed { finished_at: Utc::now(), error: e.to_string() },
                );
                Err(e)
            },
            Err(_elapsed) => {
                let error = format!(
                    "refresh for establishment {establishment_external_id} exceeded the {}s timeout",
                    REFRESH_TIMEOUT.as_secs()
                );
                self.states.insert(
                    establishment_external_id.to_string(),
                    RefreshState::Failed { finished_at: Utc::now(), error: error.clone() },
                );
                Err(ApiError::internal_error(error))
            },
        };

        // Invalidate any establishment-keyed cache downstream of this run
        // (spec.md §4.6: "Invalidates any caches keyed by establishment id");
        // the Linker's own cache is insert-only and self-heals on next warm,
        // so there is nothing further to evict here today.
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_state_blocks_state_for_idle_is_none() {
        let states: DashMap<String, RefreshState> = DashMap::new();
        assert!(states.get("unknown-school").is_none());
        states.insert("school-1".to_string(), RefreshState::Running { started_at: Utc::now() });
        assert!(matches!(*states.get("school-1").unwrap(), RefreshState::Running { .. }));
    }

    /// Mirrors the check-and-insert `entry()` does in `refresh()`: many
    /// concurrent claimants for the same id, at most one may observe
    /// itself as the one allowed to proceed.
    #[test]
    fn entry_based_claim_admits_exactly_one_concurrent_winner() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let states: Arc<DashMap<String, RefreshState>> = Arc::new(DashMap::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let states = Arc::clone(&states);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    let admitted = match states.entry("school-1".to_string()) {
                        dashmap::mapref::entry::Entry::Occupied(entry) => {
                            !matches!(entry.get(), RefreshState::Running { .. })
                        },
                        dashmap::mapref::entry::Entry::Vacant(entry) => {
                            entry.insert(RefreshState::Running { started_at: Utc::now() });
                            true
                        },
                    };
                    if admitted {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1, "exactly one thread may claim an idle establishment");
    }
}
