//! Periodic task scheduling
//!
//! The [`Scheduler`] owns a registry of named tasks, each with a parsed
//! [`cadence::Cadence`] and an async handler. Every task gets its own timer
//! loop; a firing that finds the previous run still in progress is skipped
//! and logged, never queued. Runs are bounded by a fixed ceiling and a
//! timed-out run counts as an error.

pub mod cadence;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::cadence::{Cadence, CadenceError};

/// Hard ceiling on a single task run.
const DEFAULT_RUN_CEILING: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0:?} is already registered")]
    DuplicateTask(String),

    #[error("no task registered with id {0:?}")]
    UnknownTask(String),

    #[error(transparent)]
    InvalidSchedule(#[from] CadenceError),

    #[error("task {0:?} is already running")]
    AlreadyRunning(String),

    #[error("no tasks registered")]
    NoTasks,

    #[error("task {id:?} has failed every run ({runs})")]
    TaskFailing { id: String, runs: u64 },
}

/// Handler invoked on every firing of a task.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Point-in-time snapshot of one task. Counters are read under the task's
/// lock, so a snapshot is never torn.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub id: String,
    pub name: String,
    pub cadence: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
}

struct TaskInner {
    cadence: Cadence,
    cadence_expr: String,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    run_count: u64,
    error_count: u64,
    is_running: bool,
}

struct TaskState {
    id: String,
    name: String,
    handler: TaskHandler,
    inner: Mutex<TaskInner>,
}

impl TaskState {
    async fn stats(&self) -> TaskStats {
        let inner = self.inner.lock().await;
        TaskStats {
            id: self.id.clone(),
            name: self.name.clone(),
            cadence: inner.cadence_expr.clone(),
            last_run: inner.last_run,
            next_run: inner.next_run,
            run_count: inner.run_count,
            error_count: inner.error_count,
            is_running: inner.is_running,
        }
    }
}

struct TaskEntry {
    state: Arc<TaskState>,
    loop_handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    run_ceiling: Duration,
    shutdown_tx: broadcast::Sender<()>,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_run_ceiling(DEFAULT_RUN_CEILING)
    }

    pub fn with_run_ceiling(run_ceiling: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: RwLock::new(HashMap::new()),
            run_ceiling,
            shutdown_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Register a task. The cadence expression is validated here; an invalid
    /// one leaves the registry untouched. If the scheduler is already
    /// started, the task's timer loop begins immediately.
    pub async fn add_task(
        &self,
        id: &str,
        name: &str,
        cadence_expr: &str,
        handler: TaskHandler,
    ) -> Result<(), SchedulerError> {
        let cadence: Cadence = cadence_expr.parse()?;

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(id) {
            return Err(SchedulerError::DuplicateTask(id.to_string()));
        }

        let next_run = cadence.next_after(Utc::now());
        let state = Arc::new(TaskState {
            id: id.to_string(),
            name: name.to_string(),
            handler,
            inner: Mutex::new(TaskInner {
                cadence,
                cadence_expr: cadence_expr.to_string(),
                last_run: None,
                next_run,
                run_count: 0,
                error_count: 0,
                is_running: false,
            }),
        });

        let loop_handle = self
            .started
            .load(Ordering::SeqCst)
            .then(|| self.spawn_loop(state.clone()));
        tasks.insert(id.to_string(), TaskEntry { state, loop_handle });

        info!(task_id = id, cadence = cadence_expr, "task registered");
        Ok(())
    }

    /// Deregister a task and stop its timer loop. A run already in flight is
    /// left to finish on its own.
    pub async fn remove_task(&self, id: &str) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))?;
        if let Some(handle) = entry.loop_handle {
            handle.abort();
        }
        info!(task_id = id, "task removed");
        Ok(())
    }

    /// Run a task now, outside its schedule, and wait for it to finish.
    /// Counters and timestamps update exactly as for a scheduled firing. If
    /// the task is already running nothing is started and nothing changes.
    pub async fn run_task(&self, id: &str) -> Result<(), SchedulerError> {
        let state = {
            let tasks = self.tasks.read().await;
            tasks
                .get(id)
                .map(|entry| entry.state.clone())
                .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))?
        };

        if !execute_run(state, self.run_ceiling).await {
            return Err(SchedulerError::AlreadyRunning(id.to_string()));
        }
        Ok(())
    }

    /// Replace a task's cadence. The new expression is validated before the
    /// old timer loop is touched, so a bad expression changes nothing; the
    /// swap aborts the old loop before the new one is spawned, so a firing
    /// is neither lost nor duplicated.
    pub async fn update_task_schedule(
        &self,
        id: &str,
        cadence_expr: &str,
    ) -> Result<(), SchedulerError> {
        let cadence: Cadence = cadence_expr.parse()?;

        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))?;

        if let Some(handle) = entry.loop_handle.take() {
            handle.abort();
        }
        {
            let mut inner = entry.state.inner.lock().await;
            inner.next_run = cadence.next_after(Utc::now());
            inner.cadence = cadence;
            inner.cadence_expr = cadence_expr.to_string();
        }
        if self.started.load(Ordering::SeqCst) {
            entry.loop_handle = Some(self.spawn_loop(entry.state.clone()));
        }

        info!(task_id = id, cadence = cadence_expr, "task schedule updated");
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<TaskStats, SchedulerError> {
        let state = {
            let tasks = self.tasks.read().await;
            tasks
                .get(id)
                .map(|entry| entry.state.clone())
                .ok_or_else(|| SchedulerError::UnknownTask(id.to_string()))?
        };
        Ok(state.stats().await)
    }

    pub async fn list_tasks(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        let mut ids: Vec<String> = tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn task_stats(&self) -> Vec<TaskStats> {
        let states: Vec<Arc<TaskState>> = {
            let tasks = self.tasks.read().await;
            tasks.values().map(|entry| entry.state.clone()).collect()
        };
        let mut stats = Vec::with_capacity(states.len());
        for state in states {
            stats.push(state.stats().await);
        }
        stats.sort_by(|a, b| a.id.cmp(&b.id));
        stats
    }

    /// Healthy when at least one task exists and no task has failed every
    /// run it attempted.
    pub async fn health(&self) -> Result<(), SchedulerError> {
        let tasks = self.tasks.read().await;
        if tasks.is_empty() {
            return Err(SchedulerError::NoTasks);
        }
        for (id, entry) in tasks.iter() {
            let inner = entry.state.inner.lock().await;
            if inner.run_count > 0 && inner.error_count == inner.run_count {
                return Err(SchedulerError::TaskFailing {
                    id: id.clone(),
                    runs: inner.run_count,
                });
            }
        }
        Ok(())
    }

    /// Start timer loops for every registered task. Tasks added afterwards
    /// start their loops at registration.
    pub async fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.write().await;
        for entry in tasks.values_mut() {
            if entry.loop_handle.is_none() {
                entry.loop_handle = Some(self.spawn_loop(entry.state.clone()));
            }
        }
        info!(tasks = tasks.len(), "scheduler started");
    }

    /// Stop all timer loops. Runs already in flight finish on their own,
    /// bounded by the run ceiling.
    pub async fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        let mut tasks = self.tasks.write().await;
        for entry in tasks.values_mut() {
            if let Some(handle) = entry.loop_handle.take() {
                handle.abort();
            }
        }
        info!("scheduler stopped");
    }

    fn spawn_loop(&self, state: Arc<TaskState>) -> JoinHandle<()> {
        let shutdown = self.shutdown_tx.subscribe();
        let ceiling = self.run_ceiling;
        tokio::spawn(timer_loop(state, shutdown, ceiling))
    }
}

async fn timer_loop(
    state: Arc<TaskState>,
    mut shutdown: broadcast::Receiver<()>,
    ceiling: Duration,
) {
    loop {
        let due = {
            let inner = state.inner.lock().await;
            inner.next_run
        };
        let Some(due) = due else {
            warn!(task_id = %state.id, "cadence yields no further fire time; loop exiting");
            return;
        };

        let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        // Advance from the scheduled fire time, not from when the run ends,
        // so a slow run never drifts the schedule.
        {
            let mut inner = state.inner.lock().await;
            inner.next_run = inner.cadence.next_after(due);
        }

        tokio::spawn(execute_run(state.clone(), ceiling));
    }
}

/// Run the task's handler once, bounded by `ceiling`. Returns `false`
/// without touching any counter when the previous run is still in progress.
async fn execute_run(state: Arc<TaskState>, ceiling: Duration) -> bool {
    {
        let mut inner = state.inner.lock().await;
        if inner.is_running {
            warn!(task_id = %state.id, "previous run still in progress, skipping this firing");
            return false;
        }
        inner.is_running = true;
        inner.last_run = Some(Utc::now());
    }

    debug!(task_id = %state.id, "task run started");
    let outcome = tokio::time::timeout(ceiling, (state.handler)()).await;

    let mut inner = state.inner.lock().await;
    inner.is_running = false;
    inner.run_count += 1;
    match outcome {
        Ok(Ok(())) => {
            debug!(task_id = %state.id, runs = inner.run_count, "task run finished");
        }
        Ok(Err(err)) => {
            inner.error_count += 1;
            warn!(task_id = %state.id, error = %err, "task run failed");
        }
        Err(_) => {
            inner.error_count += 1;
            warn!(
                task_id = %state.id,
                ceiling_secs = ceiling.as_secs(),
                "task run exceeded its ceiling"
            );
        }
    }
    true
}
