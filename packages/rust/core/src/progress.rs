//! Progress Tracker: pollable snapshot of a running task.
//!
//! Each running task has its own state behind an async mutex. Every change
//! recomputes the snapshot and writes it to the store while that mutex is
//! still held, so concurrent URL pipelines of one task can never persist
//! snapshots out of order. `current` only moves forward.
//!
//! Progress is observability only. Task status is driven by the orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use pagelens_shared::{Progress, ProgressStage, TaskId};
use pagelens_storage::{Storage, TaskUpdate};

struct RunState {
    started: Instant,
    urls_completed: usize,
    snapshot: Progress,
}

/// Tracks per-task progress and mirrors it into the task store.
pub struct ProgressTracker {
    store: Arc<Storage>,
    runs: StdMutex<HashMap<TaskId, Arc<Mutex<RunState>>>>,
}

impl ProgressTracker {
    pub fn new(store: Arc<Storage>) -> Self {
        Self {
            store,
            runs: StdMutex::new(HashMap::new()),
        }
    }

    fn run_state(&self, task_id: &TaskId, total: usize, stage: ProgressStage) -> Arc<Mutex<RunState>> {
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        runs.entry(task_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RunState {
                    started: Instant::now(),
                    urls_completed: 0,
                    snapshot: Progress {
                        current: 0,
                        total,
                        stage,
                        message: String::new(),
                        current_url: None,
                        estimated_seconds_remaining: None,
                    },
                }))
            })
            .clone()
    }

    fn existing(&self, task_id: &TaskId) -> Option<Arc<Mutex<RunState>>> {
        self.runs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(task_id)
            .cloned()
    }

    /// Record that `url` (1-based `index` of `total`) entered `stage`.
    pub async fn advance(
        &self,
        task_id: &TaskId,
        stage: ProgressStage,
        url: Option<&str>,
        index: usize,
        total: usize,
    ) -> Progress {
        let state = self.run_state(task_id, total, stage);
        let mut state = state.lock().await;

        let snapshot = &mut state.snapshot;
        snapshot.current = snapshot.current.max(index.min(total));
        snapshot.total = total;
        snapshot.stage = stage;
        snapshot.current_url = url.map(str::to_string);
        snapshot.message = stage_message(stage, url, total);
        refresh_eta(&mut state);

        let snapshot = state.snapshot.clone();
        self.persist(task_id, &snapshot).await;
        snapshot
    }

    /// Record that one URL pipeline reached a terminal result.
    pub async fn url_finished(&self, task_id: &TaskId) -> Option<Progress> {
        let state = self.existing(task_id)?;
        let mut state = state.lock().await;

        state.urls_completed = (state.urls_completed + 1).min(state.snapshot.total);
        refresh_eta(&mut state);

        let snapshot = state.snapshot.clone();
        self.persist(task_id, &snapshot).await;
        Some(snapshot)
    }

    /// Latest snapshot. Falls back to the stored column when this process is
    /// not running the task.
    pub async fn read(&self, task_id: &TaskId) -> Option<Progress> {
        if let Some(state) = self.existing(task_id) {
            return Some(state.lock().await.snapshot.clone());
        }
        match self.store.get_task(task_id).await {
            Ok(task) => task.and_then(|t| t.progress),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "progress read failed");
                None
            }
        }
    }

    /// Drop in-memory state once the task is terminal. The orchestrator
    /// clears the stored column in the same write as the final status.
    pub fn finish(&self, task_id: &TaskId) {
        self.runs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(task_id);
    }

    async fn persist(&self, task_id: &TaskId, snapshot: &Progress) {
        if let Err(e) = self
            .store
            .update_task(task_id, TaskUpdate::progress(Some(snapshot.clone())))
            .await
        {
            warn!(task_id = %task_id, error = %e, "progress write failed");
        } else {
            debug!(
                task_id = %task_id,
                current = snapshot.current,
                total = snapshot.total,
                stage = snapshot.stage.as_str(),
                "progress"
            );
        }
    }
}

fn refresh_eta(state: &mut RunState) {
    state.snapshot.estimated_seconds_remaining = estimate_remaining(
        state.started.elapsed(),
        state.urls_completed,
        state.snapshot.total,
    );
}

/// `elapsed / completed * remaining`, undefined until one URL has completed.
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<u64> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed);
    let per_url = elapsed.as_secs_f64() / completed as f64;
    Some((per_url * remaining as f64).round() as u64)
}

fn stage_message(stage: ProgressStage, url: Option<&str>, total: usize) -> String {
    let url = url.unwrap_or("page");
    match stage {
        ProgressStage::Fetching => format!("Fetching {url}..."),
        ProgressStage::Cleaning => format!("Cleaning content from {url}..."),
        ProgressStage::Extracting => format!("Extracting data from {url}..."),
        ProgressStage::Analyzing => format!("Analyzing {url}..."),
        ProgressStage::Comparing => format!("Comparing {total} websites..."),
    }
}
