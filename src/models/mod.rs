pub mod establishment;
pub mod question;
pub mod question_response;
pub mod refresh;
pub mod source;
pub mod statistics;
pub mod student;
pub mod sync_run;
pub mod vespa_score;

pub use establishment::{Establishment, UseStandardYear};
pub use question::Question;
pub use question_response::QuestionResponse;
pub use refresh::{RefreshRequest, RefreshResponse};
pub use statistics::{
    Distribution, NationalQuestionStatistics, NationalStatistics, QuestionStatistics,
    SchoolStatistics,
};
pub use student::Student;
pub use sync_run::{SyncErrorSummary, SyncRunRecord, SyncRunStatus, SyncRunType};
pub use vespa_score::{VespaElement, VespaScore};
