//! Pipeline state machine: the fixed set of run states, the legal
//! transitions between them, and the single mutation point that notifies
//! observers.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    EnhancingIdea,
    GeneratingPrd,
    CreatingRepo,
    BreakingDownFeatures,
    Implementing,
    OrganizingArtifacts,
    Publishing,
    Completed,
    Failed,
    Retrying,
    /// Reserved; nothing in the pipeline enters it.
    Paused,
}

/// Forward order of the working steps.
pub const PIPELINE_ORDER: [RunStatus; 7] = [
    RunStatus::EnhancingIdea,
    RunStatus::GeneratingPrd,
    RunStatus::CreatingRepo,
    RunStatus::BreakingDownFeatures,
    RunStatus::Implementing,
    RunStatus::OrganizingArtifacts,
    RunStatus::Publishing,
];

/// Legal transitions. `Retrying` lists every step that may be retried; the
/// tracker narrows it to the step the retry came from.
pub const TRANSITIONS: &[(RunStatus, &[RunStatus])] = &[
    (
        RunStatus::Pending,
        &[RunStatus::EnhancingIdea, RunStatus::Failed],
    ),
    (
        RunStatus::EnhancingIdea,
        &[RunStatus::GeneratingPrd, RunStatus::Retrying, RunStatus::Failed],
    ),
    (
        RunStatus::GeneratingPrd,
        &[RunStatus::CreatingRepo, RunStatus::Retrying, RunStatus::Failed],
    ),
    (
        RunStatus::CreatingRepo,
        &[
            RunStatus::BreakingDownFeatures,
            RunStatus::Retrying,
            RunStatus::Failed,
        ],
    ),
    (
        RunStatus::BreakingDownFeatures,
        &[RunStatus::Implementing, RunStatus::Failed],
    ),
    (
        RunStatus::Implementing,
        &[
            RunStatus::OrganizingArtifacts,
            RunStatus::Retrying,
            RunStatus::Failed,
        ],
    ),
    (
        RunStatus::OrganizingArtifacts,
        &[RunStatus::Publishing, RunStatus::Failed],
    ),
    (
        RunStatus::Publishing,
        &[RunStatus::Completed, RunStatus::Retrying, RunStatus::Failed],
    ),
    (
        RunStatus::Retrying,
        &[
            RunStatus::EnhancingIdea,
            RunStatus::GeneratingPrd,
            RunStatus::CreatingRepo,
            RunStatus::Implementing,
            RunStatus::Publishing,
            RunStatus::Failed,
        ],
    ),
    (RunStatus::Completed, &[]),
    (RunStatus::Failed, &[RunStatus::Pending]),
    (RunStatus::Paused, &[]),
];

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::EnhancingIdea => "enhancing_idea",
            Self::GeneratingPrd => "generating_prd",
            Self::CreatingRepo => "creating_repo",
            Self::BreakingDownFeatures => "breaking_down_features",
            Self::Implementing => "implementing",
            Self::OrganizingArtifacts => "organizing_artifacts",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States reachable from `self` according to the transition table.
    pub fn allowed_transitions(&self) -> &'static [RunStatus] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "enhancing_idea" => Ok(Self::EnhancingIdea),
            "generating_prd" => Ok(Self::GeneratingPrd),
            "creating_repo" => Ok(Self::CreatingRepo),
            "breaking_down_features" => Ok(Self::BreakingDownFeatures),
            "implementing" => Ok(Self::Implementing),
            "organizing_artifacts" => Ok(Self::OrganizingArtifacts),
            "publishing" => Ok(Self::Publishing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

// ── Step records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Skipped,
    Failed,
    Retrying,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ── Progress events ───────────────────────────────────────────────────

/// Ephemeral notification for live observers. Dropped when nobody listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: String,
    pub step: String,
    pub status: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Called with every status transition. Errors and panics are logged and
/// swallowed.
pub type StatusObserver = Arc<dyn Fn(RunStatus, &str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of a tracker's mutable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerState {
    pub status: RunStatus,
    pub steps: BTreeMap<RunStatus, StepRecord>,
    pub transitions: Vec<Transition>,
    #[serde(skip)]
    retry_origin: Option<RunStatus>,
}

// ── Tracker ───────────────────────────────────────────────────────────

/// Owns the current status of one run and is the only place it changes.
pub struct StatusTracker {
    run_id: String,
    state: Mutex<TrackerState>,
    observer: Option<StatusObserver>,
    events: Option<broadcast::Sender<ProgressEvent>>,
}

impl StatusTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: Mutex::new(TrackerState {
                status: RunStatus::Pending,
                steps: BTreeMap::new(),
                transitions: Vec::new(),
                retry_origin: None,
            }),
            observer: None,
            events: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_events(mut self, events: Option<broadcast::Sender<ProgressEvent>>) -> Self {
        self.events = events;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> TrackerState {
        self.lock().clone()
    }

    /// The working step a retry is in progress for, if any.
    pub fn retry_origin(&self) -> Option<RunStatus> {
        self.lock().retry_origin
    }

    /// Move to `status`, record the transition, then notify the observer and
    /// event subscribers.
    pub fn update_status(&self, status: RunStatus, message: &str) -> Result<(), PipelineError> {
        let from = {
            let mut state = self.lock();
            let from = state.status;
            if !transition_allowed(from, status, state.retry_origin) {
                return Err(PipelineError::IllegalTransition { from, to: status });
            }

            state.retry_origin = match status {
                RunStatus::Retrying => Some(from),
                _ => None,
            };
            state.status = status;
            state.transitions.push(Transition {
                from,
                to: status,
                message: message.to_string(),
                at: Utc::now(),
            });

            if PIPELINE_ORDER.contains(&status) {
                let step_status = if from == RunStatus::Retrying {
                    StepStatus::Retrying
                } else {
                    StepStatus::Running
                };
                state.steps.insert(
                    status,
                    StepRecord {
                        status: step_status,
                        detail: message.to_string(),
                        data: None,
                    },
                );
            } else if status == RunStatus::Retrying
                && let Some(step) = state.steps.get_mut(&from)
            {
                step.status = StepStatus::Retrying;
                step.detail = message.to_string();
            }
            from
        };

        info!(run_id = %self.run_id, from = %from, to = %status, "{}", message);
        self.notify_observer(status, message);

        let event_status = match status {
            RunStatus::Completed => StepStatus::Completed.as_str(),
            RunStatus::Failed => StepStatus::Failed.as_str(),
            RunStatus::Retrying => StepStatus::Retrying.as_str(),
            _ => StepStatus::Running.as_str(),
        };
        self.emit(status.as_str(), event_status, message, None);
        Ok(())
    }

    /// Record the outcome of a step without changing the run status.
    pub fn mark_step(
        &self,
        step: RunStatus,
        status: StepStatus,
        detail: &str,
        data: Option<serde_json::Value>,
    ) {
        self.lock().steps.insert(
            step,
            StepRecord {
                status,
                detail: detail.to_string(),
                data: data.clone(),
            },
        );
        self.emit(step.as_str(), status.as_str(), detail, data);
    }

    /// Publish a progress event to subscribers, if any.
    pub fn emit(&self, step: &str, status: &str, detail: &str, data: Option<serde_json::Value>) {
        let Some(tx) = &self.events else {
            return;
        };
        // No receivers is fine; the event is simply lost.
        let _ = tx.send(ProgressEvent {
            run_id: self.run_id.clone(),
            step: step.to_string(),
            status: status.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
            data,
        });
    }

    fn notify_observer(&self, status: RunStatus, message: &str) {
        let Some(observer) = &self.observer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer(status, message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, status = %status, "Status observer failed: {:#}", e);
            }
            Err(_) => {
                warn!(run_id = %self.run_id, status = %status, "Status observer panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A poisoned lock only means an earlier holder panicked; the state
        // itself is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn transition_allowed(from: RunStatus, to: RunStatus, retry_origin: Option<RunStatus>) -> bool {
    if from == RunStatus::Retrying && to != RunStatus::Failed {
        return retry_origin == Some(to);
    }
    from.can_transition_to(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RunStatus::Pending,
            RunStatus::EnhancingIdea,
            RunStatus::BreakingDownFeatures,
            RunStatus::OrganizingArtifacts,
            RunStatus::Retrying,
            RunStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::GeneratingPrd).unwrap();
        assert_eq!(json, "\"generating_prd\"");
    }

    #[test]
    fn test_every_status_has_a_table_entry() {
        for status in PIPELINE_ORDER.iter().chain(&[
            RunStatus::Pending,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Retrying,
            RunStatus::Paused,
        ]) {
            assert!(TRANSITIONS.iter().any(|(from, _)| from == status));
        }
    }

    #[test]
    fn test_pipeline_order_is_chained_in_table() {
        for pair in PIPELINE_ORDER.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(RunStatus::Pending.can_transition_to(PIPELINE_ORDER[0]));
        assert!(RunStatus::Publishing.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_local_steps_cannot_retry() {
        assert!(!RunStatus::BreakingDownFeatures.can_transition_to(RunStatus::Retrying));
        assert!(!RunStatus::OrganizingArtifacts.can_transition_to(RunStatus::Retrying));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Completed.allowed_transitions().is_empty());
        assert_eq!(RunStatus::Failed.allowed_transitions(), &[RunStatus::Pending]);
    }

    #[test]
    fn test_tracker_walks_documented_sequence() {
        let tracker = StatusTracker::new("run_1");
        tracker.update_status(RunStatus::EnhancingIdea, "enhancing").unwrap();
        tracker.update_status(RunStatus::Retrying, "retry 1").unwrap();
        tracker.update_status(RunStatus::EnhancingIdea, "enhancing again").unwrap();
        for status in &PIPELINE_ORDER[1..] {
            tracker.update_status(*status, status.as_str()).unwrap();
        }
        tracker.update_status(RunStatus::Completed, "done").unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.transitions.len(), 10);
        assert_eq!(snap.steps[&RunStatus::EnhancingIdea].status, StepStatus::Retrying);
    }

    #[test]
    fn test_tracker_rejects_illegal_transition() {
        let tracker = StatusTracker::new("run_1");
        let err = tracker
            .update_status(RunStatus::Implementing, "skip ahead")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IllegalTransition {
                from: RunStatus::Pending,
                to: RunStatus::Implementing
            }
        ));
        assert_eq!(tracker.status(), RunStatus::Pending);
    }

    #[test]
    fn test_retrying_returns_only_to_origin() {
        let tracker = StatusTracker::new("run_1");
        tracker.update_status(RunStatus::EnhancingIdea, "").unwrap();
        tracker.update_status(RunStatus::GeneratingPrd, "").unwrap();
        tracker.update_status(RunStatus::Retrying, "").unwrap();
        assert_eq!(tracker.retry_origin(), Some(RunStatus::GeneratingPrd));

        assert!(tracker.update_status(RunStatus::CreatingRepo, "").is_err());
        assert!(tracker.update_status(RunStatus::EnhancingIdea, "").is_err());
        tracker.update_status(RunStatus::GeneratingPrd, "").unwrap();
        assert_eq!(tracker.retry_origin(), None);
    }

    #[test]
    fn test_retrying_can_fail() {
        let tracker = StatusTracker::new("run_1");
        tracker.update_status(RunStatus::EnhancingIdea, "").unwrap();
        tracker.update_status(RunStatus::Retrying, "").unwrap();
        tracker.update_status(RunStatus::Failed, "gave up").unwrap();
        tracker.update_status(RunStatus::Pending, "restart").unwrap();
        assert_eq!(tracker.status(), RunStatus::Pending);
    }

    #[test]
    fn test_observer_receives_every_transition() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let observer: StatusObserver = Arc::new(move |status, msg| {
            sink.lock().unwrap().push((status, msg.to_string()));
            Ok(())
        });
        let tracker = StatusTracker::new("run_1").with_observer(Some(observer));
        tracker.update_status(RunStatus::EnhancingIdea, "a").unwrap();
        tracker.update_status(RunStatus::Failed, "b").unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                (RunStatus::EnhancingIdea, "a".to_string()),
                (RunStatus::Failed, "b".to_string())
            ]
        );
    }

    #[test]
    fn test_failing_observer_does_not_abort() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let observer: StatusObserver = Arc::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("ui hook broke")
        });
        let tracker = StatusTracker::new("run_1").with_observer(Some(observer));
        tracker.update_status(RunStatus::EnhancingIdea, "a").unwrap();
        tracker.update_status(RunStatus::GeneratingPrd, "b").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.status(), RunStatus::GeneratingPrd);
    }

    #[test]
    fn test_panicking_observer_does_not_abort() {
        let observer: StatusObserver = Arc::new(|_, _| panic!("observer panic"));
        let tracker = StatusTracker::new("run_1").with_observer(Some(observer));
        tracker.update_status(RunStatus::EnhancingIdea, "a").unwrap();
        assert_eq!(tracker.status(), RunStatus::EnhancingIdea);
    }

    #[test]
    fn test_events_are_broadcast_in_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let tracker = StatusTracker::new("run_9").with_events(Some(tx));
        tracker.update_status(RunStatus::EnhancingIdea, "go").unwrap();
        tracker.mark_step(
            RunStatus::EnhancingIdea,
            StepStatus::Completed,
            "done",
            Some(serde_json::json!({"title": "TodoApp"})),
        );

        let first = rx.try_recv().unwrap();
        assert_eq!(first.run_id, "run_9");
        assert_eq!(first.step, "enhancing_idea");
        assert_eq!(first.status, "running");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.status, "completed");
        assert_eq!(second.data.unwrap()["title"], "TodoApp");
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let tracker = StatusTracker::new("run_1").with_events(Some(tx));
        tracker.update_status(RunStatus::EnhancingIdea, "nobody listening").unwrap();
    }
}
