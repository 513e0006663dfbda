//! File-backed engine state.
//!
//! One JSON snapshot holding agent records, per-agent books, and global
//! counters. Written atomically (temp file + rename) so a crash mid-write
//! never truncates the previous snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::{AgentBook, SystemStats};
use crate::registry::AgentConfig;

/// Everything the engine needs to resume after a restart.
///
/// Agent credentials are included here (they are required to resume real
/// connectors); status and list views go through redacted types instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub saved_at: Option<DateTime<Utc>>,
    pub agents: Vec<AgentConfig>,
    pub books: HashMap<String, AgentBook>,
    pub system: SystemStats,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(data_dir: P, snapshot_file: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(snapshot_file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last snapshot, or None on first run
    pub fn load(&self) -> Result<Option<EngineSnapshot>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no snapshot on disk");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let snapshot: EngineSnapshot = serde_json::from_str(&raw)?;
        info!(
            path = %self.path.display(),
            agents = snapshot.agents.len(),
            "restored engine snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Persist a snapshot atomically
    pub fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SystemStats;
    use rust_decimal_macros::dec;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("parlay-store-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let store = StateStore::new(temp_dir(), "state.json").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = temp_dir();
        let store = StateStore::new(&dir, "state.json").unwrap();

        let snapshot = EngineSnapshot {
            saved_at: Some(Utc::now()),
            agents: vec![],
            books: HashMap::new(),
            system: SystemStats {
                total_trades: 7,
                total_volume: dec!(700),
                total_fees_collected: dec!(7),
            },
        };
        store.save(&snapshot).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.system.total_trades, 7);
        assert_eq!(restored.system.total_fees_collected, dec!(7));

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = temp_dir();
        let store = StateStore::new(&dir, "state.json").unwrap();

        let mut snapshot = EngineSnapshot::default();
        store.save(&snapshot).unwrap();
        snapshot.system.total_trades = 3;
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap().unwrap().system.total_trades, 3);
        fs::remove_dir_all(dir).ok();
    }
}
