//! In-memory registry of live and recently finished runs.
//!
//! Each run gets its own broadcast channel for progress events. Finished
//! runs stay visible until [`RunStore::evict_expired`] drops them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use super::orchestrator::Run;
use super::state::{ProgressEvent, RunStatus};

/// Buffered events per run before slow subscribers start lagging.
pub const EVENT_BUFFER: usize = 256;

/// What the store knows about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub idea: String,
    pub status: RunStatus,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_step: Option<RunStatus>,
    pub error: Option<String>,
    /// Present once the run completed.
    pub result: Option<Run>,
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

struct Entry {
    record: RunRecord,
    events: broadcast::Sender<ProgressEvent>,
}

#[derive(Clone, Default)]
pub struct RunStore {
    runs: Arc<DashMap<String, Entry>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run. Returns the sender its orchestrator should
    /// publish events on. An existing run with the same id is replaced.
    pub fn create(&self, run_id: &str, idea: &str) -> broadcast::Sender<ProgressEvent> {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        let now = Utc::now();
        self.runs.insert(
            run_id.to_string(),
            Entry {
                record: RunRecord {
                    run_id: run_id.to_string(),
                    idea: idea.to_string(),
                    status: RunStatus::Pending,
                    detail: String::new(),
                    created_at: now,
                    updated_at: now,
                    finished_at: None,
                    failed_step: None,
                    error: None,
                    result: None,
                },
                events: tx.clone(),
            },
        );
        tx
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id).map(|e| e.record.clone())
    }

    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.runs.get(run_id).map(|e| e.events.subscribe())
    }

    /// Apply `f` to the run's record. Returns false if the run is unknown.
    pub fn update(&self, run_id: &str, f: impl FnOnce(&mut RunRecord)) -> bool {
        match self.runs.get_mut(run_id) {
            Some(mut entry) => {
                f(&mut entry.record);
                entry.record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, run_id: &str, status: RunStatus, detail: &str) -> bool {
        self.update(run_id, |r| {
            r.status = status;
            r.detail = detail.to_string();
        })
    }

    pub fn complete(&self, run_id: &str, run: Run) -> bool {
        self.update(run_id, |r| {
            r.status = run.status;
            r.finished_at = Some(Utc::now());
            r.result = Some(run);
        })
    }

    pub fn fail(&self, run_id: &str, failed_step: Option<RunStatus>, error: &str) -> bool {
        self.update(run_id, |r| {
            r.status = RunStatus::Failed;
            r.finished_at = Some(Utc::now());
            r.failed_step = failed_step;
            r.error = Some(error.to_string());
        })
    }

    pub fn delete(&self, run_id: &str) -> bool {
        self.runs.remove(run_id).is_some()
    }

    /// Drop finished runs older than `ttl`. Live runs are never evicted.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        // Counted inside the sweep: creates may land in shards already visited.
        let mut evicted = 0;
        self.runs.retain(|_, e| {
            let keep = e.record.finished_at.is_none_or(|done| done > cutoff);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Ids of runs that have not finished yet.
    pub fn active_ids(&self) -> Vec<String> {
        self.runs
            .iter()
            .filter(|e| !e.record.is_finished())
            .map(|e| e.key().clone())
            .collect()
    }
}
