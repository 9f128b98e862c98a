//! Crash-resume checkpoint file.
//!
//! Tracks the last successfully-processed page per entity kind so a sync
//! interrupted mid-extraction can resume without re-pulling pages already
//! landed in the warehouse. Deleted on a clean run completion (spec.md
//! §6.5): a leftover checkpoint file on the next run means the previous run
//! did not finish cleanly.

use crate::utils::error::ApiResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// entity kind -> last successfully-processed page number (1-based)
    pub last_page: HashMap<String, u32>,
}

impl Checkpoint {
    fn path_for(dir: &Path, entity: &str) -> PathBuf {
        dir.join(format!("{}.json", entity))
    }

    /// Load the checkpoint for one entity kind, or an empty one if absent.
    pub fn load(dir: &Path, entity: &str) -> ApiResult<Self> {
        let path = Self::path_for(dir, entity);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let checkpoint: Self = serde_json::from_str(&content)?;
        Ok(checkpoint)
    }

    pub fn last_page(&self, entity: &str) -> u32 {
        self.last_page.get(entity).copied().unwrap_or(0)
    }

    /// Persist progress for one entity kind. Writes to a temp file and
    /// renames over the target so a crash mid-write never leaves a
    /// truncated checkpoint behind.
    pub fn save(dir: &Path, entity: &str, page: u32) -> ApiResult<()> {
        std::fs::create_dir_all(dir)?;
        let mut checkpoint = Self::load(dir, entity)?;
        checkpoint.last_page.insert(entity.to_string(), page);

        let path = Self::path_for(dir, entity);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(&checkpoint)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Remove the checkpoint file for one entity kind after a clean finish.
    pub fn clear(dir: &Path, entity: &str) -> ApiResult<()> {
        let path = Self::path_for(dir, entity);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_last_page() {
        let dir = std::env::temp_dir().join(format!("vespa-sync-ckpt-test-{}", uuid::Uuid::new_v4()));
        Checkpoint::save(&dir, "vespa_score", 3).unwrap();
        let loaded = Checkpoint::load(&dir, "vespa_score").unwrap();
        assert_eq!(loaded.last_page("vespa_score"), 3);
        assert_eq!(loaded.last_page("student"), 0);

        Checkpoint::clear(&dir, "vespa_score").unwrap();
        let cleared = Checkpoint::load(&dir, "vespa_score").unwrap();
        assert_eq!(cleared.last_page("vespa_score"), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
