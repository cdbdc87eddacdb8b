use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notify::{NotificationEvent, NotificationKind, Notifier};
use crate::types::{
    clip_preview, PlanState, PlanStep, StatusUpdate, StepStatus, Task, TaskStatus, TaskType,
};

/// Default capacity of the archive of finished tasks.
pub const DEFAULT_ARCHIVE_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskStoreError>;

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

struct Inner {
    active: HashMap<Uuid, Task>,
    archive: VecDeque<Task>,
}

/// Durable map of task id → task record, plus a bounded FIFO archive.
///
/// The store is the single writer for task state: all mutations go through
/// [`TaskStore::add_task`] and [`TaskStore::update_status`], both of which
/// persist the full active set before returning. Updates for a single task id
/// are serialized by the store lock.
pub struct TaskStore {
    path: PathBuf,
    archive_limit: usize,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<Inner>,
}

impl TaskStore {
    /// Open a store backed by `path`, loading any previously persisted active
    /// set. A missing, empty, or corrupt file yields an empty active set.
    pub fn open(path: impl Into<PathBuf>, archive_limit: usize, notifier: Arc<dyn Notifier>) -> Self {
        let path = path.into();
        let active = load_active_tasks(&path);
        Self {
            path,
            archive_limit,
            notifier,
            inner: Mutex::new(Inner {
                active,
                archive: VecDeque::new(),
            }),
        }
    }

    /// Number of active (non-terminal) tasks.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create a new task in `Initializing`.
    ///
    /// For hierarchical project execution the plan state is synthesized from
    /// `details["goal"]` and `details["plan"]` (a list of `{id, description}`
    /// objects). Malformed plan details log a data-integrity warning and the
    /// task is still created with an empty plan.
    pub fn add_task(
        &self,
        description: impl Into<String>,
        task_type: TaskType,
        related_item_id: Option<String>,
        details: Option<serde_json::Value>,
    ) -> Result<Task> {
        let mut task = Task::new(description, task_type);
        task.related_item_id = related_item_id;
        if let Some(details) = details {
            task.details = details;
        }

        if task_type == TaskType::HierarchicalProjectExecution {
            task.plan = Some(synthesize_plan(&task.details, &task.description));
        }

        let snapshot = task.clone();
        {
            let mut inner = self.lock();
            inner.active.insert(task.id, task);
            self.persist(&inner)?;
        }
        info!(
            task_id = %snapshot.id,
            task_type = %snapshot.task_type,
            "task added: {}",
            truncate(&snapshot.description, 50)
        );
        Ok(snapshot)
    }

    /// Apply a status transition to an active task.
    ///
    /// Returns [`TaskStoreError::NotFound`] (with no side effects) when the
    /// id is unknown — including tasks that have already been archived.
    pub fn update_status(
        &self,
        task_id: Uuid,
        new_status: TaskStatus,
        update: StatusUpdate,
    ) -> Result<Task> {
        let (snapshot, event) = {
            let mut inner = self.lock();
            let task = inner
                .active
                .get_mut(&task_id)
                .ok_or(TaskStoreError::NotFound(task_id))?;
            let old_status = task.status;

            let mut computed_progress = update.progress;
            let mut derived_step_desc: Option<String> = None;

            if task.task_type == TaskType::HierarchicalProjectExecution {
                if let Some(step_update) = &update.plan_step {
                    if let Some(plan) = task.plan.as_mut() {
                        match apply_plan_step_update(plan, step_update) {
                            Some(progress) => {
                                computed_progress = Some(progress);
                                derived_step_desc = plan
                                    .current_step()
                                    .map(|s| format!("Executing plan: {}", s.description));
                                if plan.current_step_index >= plan.steps.len() {
                                    derived_step_desc =
                                        Some("All plan steps processed.".to_string());
                                }
                            }
                            None => {
                                warn!(
                                    task_id = %task_id,
                                    step_id = %step_update.step_id,
                                    "plan step not found in task details"
                                );
                            }
                        }
                    }
                }
            }

            task.status = new_status;
            if let Some(reason) = update.reason {
                task.status_reason = Some(reason);
            }
            if let Some(desc) = update.step_description.or(derived_step_desc) {
                task.current_step = Some(desc);
            }
            if let Some(sub) = update.sub_step {
                task.current_sub_step = Some(sub);
            }
            if let Some(progress) = computed_progress {
                task.progress_pct = Some(progress.min(100));
            }
            if let Some(preview) = update.output_preview {
                task.output_preview = Some(clip_preview(&preview));
            }
            if let Some(resume) = update.resume_data {
                task.resume_data = Some(resume);
            }
            if update.increment_error {
                task.error_count += 1;
            }
            task.last_updated_at = Utc::now();

            debug!(
                task_id = %task_id,
                from = %old_status,
                to = %new_status,
                "task status updated"
            );

            let snapshot = task.clone();
            let event = if new_status.is_terminal() {
                let task = inner
                    .active
                    .remove(&task_id)
                    .expect("task present under lock");
                inner.archive.push_back(task);
                while inner.archive.len() > self.archive_limit {
                    inner.archive.pop_front();
                }
                Some(terminal_event(&snapshot))
            } else {
                None
            };
            self.persist(&inner)?;
            (snapshot, event)
        };

        if let Some(event) = event {
            info!(task_id = %task_id, status = %new_status, "task reached terminal status, archived");
            self.notifier.notify(event);
        }
        Ok(snapshot)
    }

    /// Mark every active task as `FailedInterrupted`, archiving and notifying
    /// as usual. Intended to run once at startup, after load, so work that was
    /// in flight when the process died is not silently resumed.
    pub fn fail_interrupted(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = self.lock().active.keys().copied().collect();
        for id in &ids {
            self.update_status(
                *id,
                TaskStatus::FailedInterrupted,
                StatusUpdate::with_reason("agent restarted while task was in flight"),
            )?;
        }
        if !ids.is_empty() {
            warn!(count = ids.len(), "interrupted tasks archived at startup");
        }
        Ok(ids)
    }

    /// Remove all tasks. Reset helper for tests and operator tooling.
    pub fn clear_all(&self, clear_archive: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.active.clear();
        if clear_archive {
            inner.archive.clear();
        }
        self.persist(&inner)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.lock().active.get(&task_id).cloned()
    }

    /// Active tasks, newest-created first, optionally filtered.
    pub fn list_active_tasks(
        &self,
        type_filter: Option<TaskType>,
        status_filter: Option<TaskStatus>,
    ) -> Vec<Task> {
        let inner = self.lock();
        let mut tasks: Vec<Task> = inner
            .active
            .values()
            .filter(|t| type_filter.map_or(true, |ty| t.task_type == ty))
            .filter(|t| status_filter.map_or(true, |st| t.status == st))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Archived tasks, most-recently-updated first, capped at `limit`.
    pub fn list_archived_tasks(&self, limit: usize) -> Vec<Task> {
        let inner = self.lock();
        let mut tasks: Vec<Task> = inner.archive.iter().cloned().collect();
        tasks.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        tasks.truncate(limit);
        tasks
    }

    pub fn archived_count(&self) -> usize {
        self.lock().archive.len()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist(&self, inner: &Inner) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tasks: Vec<&Task> = inner.active.values().collect();
        let json = serde_json::to_string_pretty(&tasks)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("task store lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Apply a plan-step update in place. Returns the recomputed progress when the
/// step was found, `None` otherwise. The plan index advances only when the
/// updated step is the one at the current index and it succeeded.
fn apply_plan_step_update(
    plan: &mut PlanState,
    update: &crate::types::PlanStepUpdate,
) -> Option<u8> {
    let record = plan
        .records
        .iter_mut()
        .find(|r| r.step_id == update.step_id)?;
    record.status = update.status;
    record.error_message = update.error_message.clone();
    record.output_preview = update.output_preview.as_deref().map(clip_preview);

    if update.status == StepStatus::Success {
        let at_current = plan
            .current_step()
            .map(|s| s.id == update.step_id)
            .unwrap_or(false);
        if at_current && plan.current_step_index < plan.steps.len() {
            plan.current_step_index += 1;
        }
    }
    Some(plan.progress_pct())
}

/// Build the plan state for a hierarchical task from its details payload.
fn synthesize_plan(details: &serde_json::Value, description: &str) -> PlanState {
    let goal = details.get("goal").and_then(|g| g.as_str());
    let plan = details.get("plan").and_then(|p| p.as_array());
    let (goal, raw_steps) = match (goal, plan) {
        (Some(goal), Some(steps)) => (goal, steps),
        _ => {
            warn!(
                "hierarchical task '{}' created without a valid goal/plan in details",
                truncate(description, 50)
            );
            return PlanState::empty();
        }
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (i, raw) in raw_steps.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            warn!(index = i, "skipping non-object plan step");
            continue;
        };
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("step_{}", i + 1));
        let step_description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("No step description provided.")
            .to_owned();
        steps.push(PlanStep {
            id,
            description: step_description,
        });
    }
    PlanState::new(goal, steps)
}

fn terminal_event(task: &Task) -> NotificationEvent {
    let mut summary = format!(
        "Task '{}' {}.",
        truncate(&task.description, 50),
        task.status
    );
    if let Some(reason) = &task.status_reason {
        summary.push_str(&format!(" Reason: {}", reason));
    }
    NotificationEvent {
        kind: NotificationKind::for_terminal_status(task.status),
        summary,
        related_item_id: Some(task.id.to_string()),
        related_item_kind: Some("task".to_string()),
        payload: Some(serde_json::json!({
            "task_type": task.task_type,
            "description": task.description,
        })),
    }
}

/// Load the active set from disk, tolerating missing, empty, and corrupt
/// files. Individual undecodable records are skipped with a warning.
fn load_active_tasks(path: &std::path::Path) -> HashMap<Uuid, Task> {
    let mut active = HashMap::new();
    if !path.exists() {
        return active;
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read task store file, starting empty");
            return active;
        }
    };
    if raw.trim().is_empty() {
        return active;
    }
    let records: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "task store file is corrupt, starting empty");
            return active;
        }
    };
    let total = records.len();
    for record in records {
        match serde_json::from_value::<Task>(record) {
            Ok(task) => {
                active.insert(task.id, task);
            }
            Err(e) => warn!(error = %e, "skipping undecodable task record"),
        }
    }
    if active.is_empty() && total > 0 {
        warn!(path = %path.display(), "task store file yielded zero valid records");
    }
    active
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max).collect();
        format!("{}...", clipped)
    }
}
