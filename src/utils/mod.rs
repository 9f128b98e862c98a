pub mod checkpoint;
pub mod collection_ext;
pub mod error;
pub mod invariants;
pub mod report;
pub mod scheduled_executor;

pub use checkpoint::Checkpoint;
pub use collection_ext::vec_to_map;
pub use error::{ApiError, ApiResult};
pub use invariants::is_well_formed_academic_year;
pub use report::{RunReport, RunReportBuilder};
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask, ShutdownHandle};
