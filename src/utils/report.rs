//! Structured per-run report (spec.md §6.5, §7): counts per entity plus a
//! capped list of per-record errors, rendered as plain text and written to
//! the report output directory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

const MAX_ERRORS_IN_REPORT: usize = 200;

#[derive(Debug, Default, Clone, Serialize)]
pub struct EntityCounts {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errored: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub entity: String,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub counts: BTreeMap<String, EntityCounts>,
    pub errors: Vec<RecordError>,
    pub errors_truncated: bool,
}

impl RunReport {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Sync run {}\n", self.run_id));
        out.push_str(&format!("Status:   {}\n", self.status));
        out.push_str(&format!("Started:  {}\n", self.started_at.to_rfc3339()));
        out.push_str(&format!("Finished: {}\n", self.finished_at.to_rfc3339()));
        out.push_str(&format!(
            "Duration: {:.1}s\n\n",
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        ));

        out.push_str("Entity            inserted   updated   skipped   errored\n");
        for (entity, counts) in &self.counts {
            out.push_str(&format!(
                "{:<18}{:>9}{:>10}{:>10}{:>10}\n",
                entity, counts.inserted, counts.updated, counts.skipped, counts.errored
            ));
        }

        if !self.errors.is_empty() {
            out.push_str(&format!("\nErrors ({}{}):\n", self.errors.len(), if self.errors_truncated { "+, truncated" } else { "" }));
            for err in &self.errors {
                out.push_str(&format!("  [{}] {}: {}\n", err.entity, err.context, err.message));
            }
        }

        out
    }

    /// Write the report to `<dir>/<run_id>.txt`, creating `dir` if needed.
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.txt", self.run_id));
        std::fs::write(path, self.to_text())
    }
}

/// Accumulates counts and errors during a sync run; produces an immutable
/// `RunReport` at the end. Errors beyond `MAX_ERRORS_IN_REPORT` are counted
/// but not retained verbatim, so a pathological run doesn't blow up memory
/// or the report file.
pub struct RunReportBuilder {
    run_id: uuid::Uuid,
    started_at: DateTime<Utc>,
    counts: BTreeMap<String, EntityCounts>,
    errors: Vec<RecordError>,
    errors_seen: usize,
}

impl RunReportBuilder {
    pub fn new(run_id: uuid::Uuid, started_at: DateTime<Utc>) -> Self {
        Self { run_id, started_at, counts: BTreeMap::new(), errors: Vec::new(), errors_seen: 0 }
    }

    fn entry(&mut self, entity: &str) -> &mut EntityCounts {
        self.counts.entry(entity.to_string()).or_default()
    }

    pub fn record_inserted(&mut self, entity: &str, n: u64) {
        self.entry(entity).inserted += n;
    }

    pub fn record_updated(&mut self, entity: &str, n: u64) {
        self.entry(entity).updated += n;
    }

    pub fn record_skipped(&mut self, entity: &str, n: u64) {
        self.entry(entity).skipped += n;
    }

    pub fn record_error(&mut self, entity: &str, context: impl Into<String>, message: impl Into<String>) {
        self.entry(entity).errored += 1;
        self.errors_seen += 1;
        if self.errors.len() < MAX_ERRORS_IN_REPORT {
            self.errors.push(RecordError { entity: entity.to_string(), context: context.into(), message: message.into() });
        }
    }

    pub fn total_errors(&self, entity: &str) -> u64 {
        self.counts.get(entity).map(|c| c.errored).unwrap_or(0)
    }

    pub fn finish(self, status: impl Into<String>) -> RunReport {
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            status: status.into(),
            errors_truncated: self.errors_seen > self.errors.len(),
            counts: self.counts,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_stored_errors_but_keeps_counting() {
        let mut builder = RunReportBuilder::new(uuid::Uuid::new_v4(), Utc::now());
        for i in 0..(MAX_ERRORS_IN_REPORT + 10) {
            builder.record_error("question_response", format!("row {i}"), "no matching score");
        }
        assert_eq!(builder.total_errors("question_response"), (MAX_ERRORS_IN_REPORT + 10) as u64);
        let report = builder.finish("partial");
        assert_eq!(report.errors.len(), MAX_ERRORS_IN_REPORT);
        assert!(report.errors_truncated);
    }
}
