pub mod aggregator;
pub mod classifier;
pub mod extractor;
pub mod linker;
pub mod loader;
pub mod rate_limiter;
pub mod refresh;
pub mod sync_orchestrator;

pub use aggregator::{Aggregator, Scope as AggregateScope};
pub use extractor::{RawRecord, SourceCrmClient, SourceEntity, SourceFilters};
pub use linker::Linker;
pub use loader::Loader;
pub use rate_limiter::RateLimiter;
pub use refresh::{RefreshService, RefreshState};
pub use sync_orchestrator::SyncOrchestrator;
