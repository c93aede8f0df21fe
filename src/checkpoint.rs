//! Durable schedule checkpoints.
//!
//! Records the last autoclaim period run per instance and the last poll
//! tick. The file is rewritten through a temp file + rename so a crash can
//! never leave a torn checkpoint — the previous complete state survives.
//! The autoclaim checkpoint is persisted *before* the claim job runs: a
//! crash mid-claim may skip one claim, it can never duplicate one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::logger::{self, LogTag};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Instance id -> last autoclaim period run ("YYYY-MM")
    #[serde(default)]
    pub autoclaim_periods: HashMap<String, String>,
    /// When the last poll cycle completed
    #[serde(default)]
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Process-durable schedule state
pub struct CheckpointStore {
    path: PathBuf,
    data: RwLock<CheckpointData>,
}

impl CheckpointStore {
    /// Load the store, starting empty when the file does not exist yet.
    /// A corrupt file is reported and replaced with empty state rather than
    /// taking the process down.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(e) => {
                    logger::error(
                        LogTag::Scheduler,
                        &format!("corrupt checkpoint file '{}': {}", path.display(), e),
                    );
                    CheckpointData::default()
                }
            },
            Err(_) => CheckpointData::default(),
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    /// Last autoclaim period run for an instance
    pub fn autoclaim_period(&self, instance_id: &str) -> Option<String> {
        self.data
            .read()
            .ok()?
            .autoclaim_periods
            .get(instance_id)
            .cloned()
    }

    /// Record an autoclaim run and persist immediately.
    ///
    /// The write must land on disk before the caller starts the claim job;
    /// an error here means the job must not run this tick.
    pub fn record_autoclaim(&self, instance_id: &str, period: &str) -> io::Result<()> {
        {
            let mut data = self.data.write().expect("checkpoint lock poisoned");
            data.autoclaim_periods
                .insert(instance_id.to_string(), period.to_string());
        }
        self.persist()
    }

    /// Record the completion of a poll cycle
    pub fn record_poll_tick(&self, at: DateTime<Utc>) {
        {
            let mut data = self.data.write().expect("checkpoint lock poisoned");
            data.last_poll_at = Some(at);
        }
        if let Err(e) = self.persist() {
            logger::warning(
                LogTag::Scheduler,
                &format!("failed to persist poll tick: {}", e),
            );
        }
    }

    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        self.data.read().ok()?.last_poll_at
    }

    fn persist(&self) -> io::Result<()> {
        let serialized = {
            let data = self.data.read().expect("checkpoint lock poisoned");
            serde_json::to_vec_pretty(&*data)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, &serialized)?;
        fs::rename(&tmp, &self.path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn autoclaim_record_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let store = CheckpointStore::load(&path);
        assert_eq!(store.autoclaim_period("trader-1"), None);
        store.record_autoclaim("trader-1", "2026-08").unwrap();

        // A fresh store over the same file sees the record
        let reloaded = CheckpointStore::load(&path);
        assert_eq!(
            reloaded.autoclaim_period("trader-1").as_deref(),
            Some("2026-08")
        );
        assert_eq!(reloaded.autoclaim_period("trader-2"), None);
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let store = CheckpointStore::load(&path);
        store.record_autoclaim("trader-1", "2026-08").unwrap();
        store.record_poll_tick(Utc::now());

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        fs::write(&path, b"{ not json").unwrap();

        let store = CheckpointStore::load(&path);
        assert_eq!(store.autoclaim_period("trader-1"), None);
        assert_eq!(store.last_poll_at(), None);
    }

    #[test]
    fn poll_tick_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let at = Utc::now();
        let store = CheckpointStore::load(&path);
        store.record_poll_tick(at);

        let reloaded = CheckpointStore::load(&path);
        assert_eq!(reloaded.last_poll_at(), Some(at));
    }
}
