//! In-memory workflow table.
//!
//! Every read and write of a record goes through the single mutex that guards
//! the identifier → entry map, so callers always see a complete snapshot and
//! concurrent cancel/finish events are serialized by [`StateMachine::apply`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::OasisError;
use crate::state_machine::{
    Event, StateMachine, Transition, WorkflowRecord, WorkflowStatus, new_workflow_id,
};

struct WorkflowEntry {
    record: WorkflowRecord,
    cancel: CancellationToken,
    // Flipped to true once the supervising task has reaped the process; logs freeze then.
    reaped: watch::Sender<bool>,
}

/// Handles given to the task that supervises a freshly created workflow.
#[derive(Debug, Clone)]
pub struct WorkflowTicket {
    pub id: String,
    pub cancel: CancellationToken,
}

/// Result of a cancel request.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The workflow moved to `Cancelled`; the receiver turns true once its process is reaped.
    Cancelled { reaped: watch::Receiver<bool> },
    /// The workflow had already finished; nothing changed.
    AlreadyTerminal(WorkflowStatus),
}

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    entries: Arc<Mutex<HashMap<String, WorkflowEntry>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkflowEntry>> {
        // Entries stay consistent even if a holder panicked: every mutation is a single assignment.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new `pending` record and return it with its ticket.
    pub fn create(&self, query: String, model: String) -> (WorkflowRecord, WorkflowTicket) {
        let mut entries = self.lock();
        let mut id = new_workflow_id();
        while entries.contains_key(&id) {
            id = new_workflow_id();
        }

        let record = WorkflowRecord::new(id.clone(), query, model);
        let cancel = CancellationToken::new();
        let (reaped, _) = watch::channel(false);
        entries.insert(
            id.clone(),
            WorkflowEntry {
                record: record.clone(),
                cancel: cancel.clone(),
                reaped,
            },
        );
        (record, WorkflowTicket { id, cancel })
    }

    pub fn get(&self, id: &str) -> Result<WorkflowRecord, OasisError> {
        self.lock()
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| OasisError::WorkflowNotFound(id.to_string()))
    }

    /// Records in `pending` or `running`, oldest first.
    pub fn list_active(&self) -> Vec<WorkflowRecord> {
        let mut active: Vec<WorkflowRecord> = self
            .lock()
            .values()
            .filter(|entry| entry.record.status.is_active())
            .map(|entry| entry.record.clone())
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        active
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop a terminal record. Active records cannot be removed.
    pub fn remove(&self, id: &str) -> Result<WorkflowRecord, OasisError> {
        let mut entries = self.lock();
        let entry = entries
            .get(id)
            .ok_or_else(|| OasisError::WorkflowNotFound(id.to_string()))?;
        if entry.record.status.is_active() {
            return Err(OasisError::WorkflowActive(id.to_string()));
        }
        let entry = entries
            .remove(id)
            .ok_or_else(|| OasisError::WorkflowNotFound(id.to_string()))?;
        Ok(entry.record)
    }

    /// Apply a lifecycle event. The first terminal event wins; later ones are `Ignored`.
    pub fn apply(&self, id: &str, event: Event) -> Result<Transition, OasisError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| OasisError::WorkflowNotFound(id.to_string()))?;
        let transition = StateMachine::apply(&mut entry.record, event);
        match &transition {
            Transition::Moved { from, to } => {
                info!(workflow_id = id, %from, %to, message = %entry.record.message, "workflow transitioned");
            }
            Transition::Ignored { current } | Transition::Rejected { current } => {
                debug!(workflow_id = id, %current, ?transition, "workflow event dropped");
            }
        }
        Ok(transition)
    }

    /// Append captured output. Returns `false` once logs are frozen.
    pub fn append_logs(&self, id: &str, text: &str) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(id) {
            Some(entry) if !*entry.reaped.borrow() => {
                entry.record.logs.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Move a non-terminal workflow to `Cancelled` and signal its supervising task.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, OasisError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| OasisError::WorkflowNotFound(id.to_string()))?;

        match StateMachine::apply(&mut entry.record, Event::CancelRequested) {
            Transition::Moved { from, to } => {
                info!(workflow_id = id, %from, %to, "workflow cancelled");
                entry.cancel.cancel();
                Ok(CancelOutcome::Cancelled {
                    reaped: entry.reaped.subscribe(),
                })
            }
            Transition::Ignored { current } | Transition::Rejected { current } => {
                Ok(CancelOutcome::AlreadyTerminal(current))
            }
        }
    }

    /// Called by the supervising task after the process is gone. Freezes the logs.
    pub fn mark_reaped(&self, id: &str) {
        if let Some(entry) = self.lock().get(id) {
            entry.reaped.send_replace(true);
        }
    }

    /// Evict reaped terminal records completed more than `retention` ago.
    pub fn sweep(&self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let expired: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, entry)| {
                let old = match (entry.record.completed_at, cutoff) {
                    (Some(done), Some(cutoff)) => done <= cutoff,
                    _ => false,
                };
                old && entry.record.is_terminal() && *entry.reaped.borrow()
            })
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .iter()
            .filter(|id| match self.remove(id) {
                Ok(_) => true,
                Err(e) => {
                    debug!(workflow_id = %id, error = %e, "workflow not evicted");
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
impl WorkflowRegistry {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_reaped(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map(|entry| *entry.reaped.borrow())
            .unwrap_or(false)
    }
}

/// Spawn a periodic retention sweep. Returns its handle for shutdown.
pub fn spawn_retention_sweeper(
    registry: WorkflowRegistry,
    interval: Duration,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        loop {
            ticker.tick().await;
            let evicted = registry.sweep(retention);
            if evicted > 0 {
                info!(evicted, remaining = registry.len(), "evicted finished workflows");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::state_machine::FailureReason;

    fn create(registry: &WorkflowRegistry, query: &str) -> String {
        registry.create(query.into(), "gpt-4o".into()).0.id
    }

    #[test]
    fn create_and_get() {
        let registry = WorkflowRegistry::new();
        let (record, ticket) = registry.create("open calculator".into(), "gpt-4o".into());
        assert_eq!(record.id, ticket.id);
        assert_eq!(record.status, WorkflowStatus::Pending);

        let fetched = registry.get(&record.id).unwrap();
        assert_eq!(fetched.query, "open calculator");
        assert_eq!(fetched.model, "gpt-4o");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = WorkflowRegistry::new();
        assert!(matches!(
            registry.get("workflow_missing"),
            Err(OasisError::WorkflowNotFound(_))
        ));
        assert!(registry.apply("workflow_missing", Event::Succeeded).is_err());
        assert!(registry.cancel("workflow_missing").is_err());
        assert!(!registry.append_logs("workflow_missing", "x"));
    }

    #[test]
    fn identical_queries_get_distinct_ids() {
        let registry = WorkflowRegistry::new();
        let a = create(&registry, "open calculator");
        let b = create(&registry, "open calculator");
        assert_ne!(a, b);
        assert!(registry.get(&a).is_ok());
        assert!(registry.get(&b).is_ok());
    }

    #[test]
    fn list_active_tracks_status() {
        let registry = WorkflowRegistry::new();
        let ids: Vec<String> = (0..5).map(|i| create(&registry, &format!("task {i}"))).collect();

        registry
            .apply(&ids[0], Event::Started { pid: Some(1) })
            .unwrap();
        registry
            .apply(&ids[1], Event::Failed(FailureReason::Spawn("x".into())))
            .unwrap();
        registry.cancel(&ids[2]).unwrap();

        let active: HashSet<String> = registry.list_active().into_iter().map(|r| r.id).collect();
        let expected: HashSet<String> = [ids[0].clone(), ids[3].clone(), ids[4].clone()].into();
        assert_eq!(active, expected);
    }

    #[test]
    fn concurrent_creates_are_all_listed() {
        let registry = WorkflowRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| create(&registry, &format!("thread {t} task {i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 200);
        let active: HashSet<String> = registry.list_active().into_iter().map(|r| r.id).collect();
        assert_eq!(active, ids);
    }

    #[test]
    fn cancel_signals_token_once() {
        let registry = WorkflowRegistry::new();
        let (record, ticket) = registry.create("q".into(), "m".into());

        let outcome = registry.cancel(&record.id).unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled { .. }));
        assert!(ticket.cancel.is_cancelled());
        assert_eq!(registry.get(&record.id).unwrap().status, WorkflowStatus::Cancelled);

        let again = registry.cancel(&record.id).unwrap();
        assert!(matches!(
            again,
            CancelOutcome::AlreadyTerminal(WorkflowStatus::Cancelled)
        ));
    }

    #[test]
    fn cancel_after_completion_is_noop() {
        let registry = WorkflowRegistry::new();
        let (record, ticket) = registry.create("q".into(), "m".into());
        registry.apply(&record.id, Event::Started { pid: Some(3) }).unwrap();
        registry.apply(&record.id, Event::Succeeded).unwrap();

        let outcome = registry.cancel(&record.id).unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::AlreadyTerminal(WorkflowStatus::Completed)
        ));
        assert!(!ticket.cancel.is_cancelled());
        assert_eq!(registry.get(&record.id).unwrap().status, WorkflowStatus::Completed);
    }

    #[test]
    fn late_output_after_cancel_is_kept_until_reaped() {
        let registry = WorkflowRegistry::new();
        let id = create(&registry, "q");
        assert!(registry.append_logs(&id, "first "));
        registry.cancel(&id).unwrap();
        assert!(registry.append_logs(&id, "late"));
        let t = registry.apply(&id, Event::Succeeded).unwrap();
        assert!(!t.applied());

        registry.mark_reaped(&id);
        assert!(registry.is_reaped(&id));
        assert!(!registry.append_logs(&id, "frozen"));

        let record = registry.get(&id).unwrap();
        assert_eq!(record.logs, "first late");
        assert_eq!(record.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn reaped_receiver_sees_mark() {
        let registry = WorkflowRegistry::new();
        let id = create(&registry, "q");
        let CancelOutcome::Cancelled { mut reaped } = registry.cancel(&id).unwrap() else {
            panic!("expected Cancelled");
        };
        assert!(!*reaped.borrow());
        registry.mark_reaped(&id);
        reaped.wait_for(|r| *r).await.unwrap();
    }

    #[test]
    fn remove_only_terminal() {
        let registry = WorkflowRegistry::new();
        let id = create(&registry, "q");
        assert!(matches!(
            registry.remove(&id),
            Err(OasisError::WorkflowActive(_))
        ));

        registry.cancel(&id).unwrap();
        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.status, WorkflowStatus::Cancelled);
        assert!(registry.get(&id).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_evicts_only_old_reaped_terminal_records() {
        let registry = WorkflowRegistry::new();
        let active = create(&registry, "still running");
        let unreaped = create(&registry, "cancelled, process not reaped yet");
        let done = create(&registry, "finished");

        registry.cancel(&unreaped).unwrap();
        registry.cancel(&done).unwrap();
        registry.mark_reaped(&done);

        assert_eq!(registry.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(registry.sweep(Duration::ZERO), 1);
        assert!(registry.get(&done).is_err());
        assert!(registry.get(&active).is_ok());
        assert!(registry.get(&unreaped).is_ok());
    }

    #[tokio::test]
    async fn sweeper_task_evicts_in_background() {
        let registry = WorkflowRegistry::new();
        let id = create(&registry, "q");
        registry.cancel(&id).unwrap();
        registry.mark_reaped(&id);

        let handle = spawn_retention_sweeper(
            registry.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
        assert!(registry.get(&id).is_err());
    }
}
