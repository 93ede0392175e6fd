//! Async task tracker: lifecycle of background work started by mutations.
//!
//! Each task moves through `PENDING -> RUNNING -> {FINISHED, FAILED,
//! CANCELLED}`. Terminal states are absorbing and every transition is
//! validated under the task's own lock, so no observer ever sees a task
//! regress. Tasks are scoped to the session that started them: lookups with
//! any other session fail with [`TrackerError::NotFound`].

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dsgate_core::{SessionId, TaskId, Value};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::operation::HandlerError;
use crate::session::{now_millis, Session};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an async task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Running | TaskStatus::Cancelled),
            TaskStatus::Running => next.is_terminal(),
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// TrackerError / TaskInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("task not found: {id}")]
    NotFound { id: TaskId },
}

/// Error payload of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

impl From<HandlerError> for TaskError {
    fn from(err: HandlerError) -> Self {
        Self {
            code: err.code,
            message: err.message,
        }
    }
}

/// Snapshot of a task returned by status and info calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub running: bool,
    /// Present only when `FINISHED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present only when `FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub create_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<u64>,
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Handle given to a task body for observing cancellation requests.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    token: CancellationToken,
}

impl TaskContext {
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Checkpoint: whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns `Err(HandlerError::cancelled())` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Fails exactly when the task has been asked to stop.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::cancelled())
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// TaskEntry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<TaskError>,
    started_at: Option<u64>,
    finished_at: Option<u64>,
}

#[derive(Debug)]
struct TaskEntry {
    id: TaskId,
    owner: SessionId,
    name: String,
    created_at: u64,
    state: Mutex<TaskState>,
    status_tx: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
}

/// Terminal result of one task body run.
enum Outcome {
    Finished(Value),
    Failed(TaskError),
    Cancelled,
}

impl TaskEntry {
    /// Applies a transition if legal. Returns whether it was applied.
    fn advance(&self, next: TaskStatus) -> bool {
        self.advance_with(next, |_| {})
    }

    fn advance_with(&self, next: TaskStatus, fill: impl FnOnce(&mut TaskState)) -> bool {
        let mut state = self.state.lock();
        self.apply(&mut state, next, fill)
    }

    /// Applies a transition to state the caller has already locked.
    fn apply(
        &self,
        state: &mut TaskState,
        next: TaskStatus,
        fill: impl FnOnce(&mut TaskState),
    ) -> bool {
        if !state.status.can_advance_to(next) {
            return false;
        }
        state.status = next;
        let now = now_millis();
        if next == TaskStatus::Running {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.finished_at = Some(now);
        }
        fill(state);
        // Published under the lock so watchers see transitions in order.
        self.status_tx.send_replace(next);
        true
    }

    fn finish(&self, outcome: Outcome) {
        let (status, applied) = match outcome {
            Outcome::Finished(value) => (
                TaskStatus::Finished,
                self.advance_with(TaskStatus::Finished, |s| s.result = Some(value)),
            ),
            Outcome::Failed(err) => (
                TaskStatus::Failed,
                self.advance_with(TaskStatus::Failed, |s| s.error = Some(err)),
            ),
            Outcome::Cancelled => (TaskStatus::Cancelled, self.advance(TaskStatus::Cancelled)),
        };
        if applied {
            metrics::counter!("dsgate_tasks_finished_total", "status" => status.as_str()).increment(1);
            debug!(task_id = %self.id, task = %self.name, status = status.as_str(), "task finished");
        }
    }

    fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    fn info(&self) -> TaskInfo {
        let state = self.state.lock();
        TaskInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status: state.status,
            running: matches!(state.status, TaskStatus::Pending | TaskStatus::Running),
            result: state.result.clone(),
            error: state.error.clone(),
            create_time: self.created_at,
            start_time: state.started_at,
            finish_time: state.finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskTracker
// ---------------------------------------------------------------------------

/// Owns every background task, keyed by opaque id.
///
/// The table is a `DashMap`; each task guards its own state, so polling one
/// task never blocks progress of another.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: DashMap<TaskId, Arc<TaskEntry>>,
}

impl TaskTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task in `PENDING` and runs `work` on a tokio worker task.
    ///
    /// Returns immediately. The body receives a [`TaskContext`] and must
    /// observe cancellation at its own checkpoints. Must be called from
    /// within a tokio runtime.
    pub fn start<F, Fut>(&self, session: &Session, name: impl Into<String>, work: F) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let id = TaskId::new(Uuid::new_v4().to_string());
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        let entry = Arc::new(TaskEntry {
            id: id.clone(),
            owner: session.id().clone(),
            name: name.into(),
            created_at: now_millis(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                result: None,
                error: None,
                started_at: None,
                finished_at: None,
            }),
            status_tx,
            cancel: CancellationToken::new(),
        });
        self.tasks.insert(id.clone(), Arc::clone(&entry));
        session.attach_task(id.clone());
        metrics::counter!("dsgate_tasks_started_total").increment(1);
        debug!(task_id = %id, task = %entry.name, session_id = %entry.owner, "task registered");

        tokio::spawn(Self::drive(entry, work));
        id
    }

    async fn drive<F, Fut>(entry: Arc<TaskEntry>, work: F)
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        // Cancelled while still pending: the body never runs.
        if !entry.advance(TaskStatus::Running) {
            return;
        }
        let ctx = TaskContext {
            id: entry.id.clone(),
            token: entry.cancel.clone(),
        };

        // Run the body on its own task so a panic is contained as a join error.
        let outcome = match tokio::spawn(work(ctx)).await {
            Ok(_) if entry.cancel.is_cancelled() => Outcome::Cancelled,
            Ok(Ok(value)) => Outcome::Finished(value),
            Ok(Err(err)) if err.is_cancelled() => Outcome::Cancelled,
            Ok(Err(err)) => Outcome::Failed(err.into()),
            Err(join_err) => {
                warn!(task_id = %entry.id, error = %join_err, "task body panicked");
                Outcome::Failed(TaskError {
                    code: "internal".to_string(),
                    message: "task terminated unexpectedly".to_string(),
                })
            }
        };
        entry.finish(outcome);
    }

    /// Finds a task owned by `session`.
    fn owned(&self, session: &Session, id: &TaskId) -> Result<Arc<TaskEntry>, TrackerError> {
        self.tasks
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .filter(|entry| &entry.owner == session.id())
            .ok_or_else(|| TrackerError::NotFound { id: id.clone() })
    }

    /// Current status, without side effects.
    ///
    /// # Errors
    ///
    /// `TrackerError::NotFound` when the id is unknown to this session.
    pub fn status(&self, session: &Session, id: &TaskId) -> Result<TaskStatus, TrackerError> {
        self.owned(session, id).map(|entry| entry.status())
    }

    /// Full snapshot including the result or error of a terminal task.
    ///
    /// With `remove_on_finish`, a terminal task is deleted after this call;
    /// a pending or running task is retained.
    ///
    /// # Errors
    ///
    /// `TrackerError::NotFound` when the id is unknown to this session.
    pub fn info(
        &self,
        session: &Session,
        id: &TaskId,
        remove_on_finish: bool,
    ) -> Result<TaskInfo, TrackerError> {
        let entry = self.owned(session, id)?;
        if !remove_on_finish || !entry.status().is_terminal() {
            return Ok(entry.info());
        }
        // Only the caller that actually removes the entry gets the payload.
        let owner = session.id();
        let (_, removed) = self
            .tasks
            .remove_if(id, |_, e| &e.owner == owner && e.status().is_terminal())
            .ok_or_else(|| TrackerError::NotFound { id: id.clone() })?;
        session.detach_task(id);
        debug!(task_id = %id, "task removed after retrieval");
        Ok(removed.info())
    }

    /// Cancels a task and signals its body to stop.
    ///
    /// Returns `false` for a task that is already terminal. Otherwise the task
    /// is `CANCELLED` when this returns and a body still running loses its
    /// result. Whichever of cancel and completion takes the task lock first
    /// decides the outcome, so `true` always means the task ended cancelled.
    ///
    /// # Errors
    ///
    /// `TrackerError::NotFound` when the id is unknown to this session.
    pub fn cancel(&self, session: &Session, id: &TaskId) -> Result<bool, TrackerError> {
        let entry = self.owned(session, id)?;
        {
            let mut state = entry.state.lock();
            if state.status.is_terminal() {
                return Ok(false);
            }
            entry.cancel.cancel();
            entry.apply(&mut state, TaskStatus::Cancelled, |_| {});
        }
        metrics::counter!("dsgate_tasks_finished_total", "status" => TaskStatus::Cancelled.as_str())
            .increment(1);
        debug!(task_id = %id, "task cancelled");
        Ok(true)
    }

    /// Subscribes to status changes of a task.
    ///
    /// # Errors
    ///
    /// `TrackerError::NotFound` when the id is unknown to this session.
    pub fn watch(
        &self,
        session: &Session,
        id: &TaskId,
    ) -> Result<watch::Receiver<TaskStatus>, TrackerError> {
        self.owned(session, id).map(|entry| entry.status_tx.subscribe())
    }

    /// Cancels and removes every task owned by a destroyed session.
    /// Returns how many tasks were removed.
    pub fn drop_session(&self, session_id: &SessionId) -> usize {
        let mut dropped = 0;
        self.tasks.retain(|_, entry| {
            if &entry.owner == session_id {
                entry.cancel.cancel();
                dropped += 1;
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Number of tracked tasks across all sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
