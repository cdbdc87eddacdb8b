use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use af_core::notify::{NotificationEvent, NotificationKind, Notifier};
use af_core::types::{Task, TaskStatus, TaskType};

/// Detects long-running tasks and emits proactive check-in notifications.
///
/// A task qualifies when its type/status combination is monitored, its age
/// exceeds the threshold, and it has not been checked in within the cool-down
/// window. Check-in times are tracked in memory; a restart simply restarts
/// the cool-down clock.
pub struct CheckinMonitor {
    threshold: Duration,
    cooldown: Duration,
    monitored_types: Vec<TaskType>,
    monitored_statuses: Vec<TaskStatus>,
    last_checkin: Mutex<HashMap<Uuid, Instant>>,
}

impl CheckinMonitor {
    pub fn new(threshold: Duration, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            monitored_types: vec![
                TaskType::HierarchicalProjectExecution,
                TaskType::ToolCreation,
            ],
            monitored_statuses: vec![
                TaskStatus::Initializing,
                TaskStatus::Planning,
                TaskStatus::GeneratingCode,
                TaskStatus::AwaitingReview,
                TaskStatus::PostModificationTesting,
                TaskStatus::ApplyingChanges,
                TaskStatus::ExecutingProjectPlan,
            ],
            last_checkin: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_monitored(
        mut self,
        types: Vec<TaskType>,
        statuses: Vec<TaskStatus>,
    ) -> Self {
        self.monitored_types = types;
        self.monitored_statuses = statuses;
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Sweep the given active tasks, emitting one check-in notification per
    /// qualifying task. Returns the number of notifications emitted.
    pub fn sweep(&self, tasks: &[Task], notifier: &dyn Notifier) -> usize {
        let now = Utc::now();
        let mut emitted = 0;

        for task in tasks {
            if !self.monitored_types.contains(&task.task_type)
                || !self.monitored_statuses.contains(&task.status)
            {
                continue;
            }

            let age = task.age(now).to_std().unwrap_or(Duration::ZERO);
            if age <= self.threshold {
                continue;
            }

            {
                let last = self.last_checkin.lock().expect("check-in lock poisoned");
                if let Some(at) = last.get(&task.id) {
                    if at.elapsed() <= self.cooldown {
                        debug!(task_id = %task.id, "long-running task in check-in cool-down");
                        continue;
                    }
                }
            }

            let minutes = age.as_secs() / 60;
            let summary = format!(
                "Still working on '{}' (task {}). It's been about {} minutes.",
                truncate(&task.description, 70),
                task.id,
                minutes
            );
            notifier.notify(NotificationEvent {
                kind: NotificationKind::TaskCheckIn,
                summary,
                related_item_id: Some(task.id.to_string()),
                related_item_kind: Some("task_checkin".to_string()),
                payload: Some(serde_json::json!({
                    "task_id": task.id,
                    "elapsed_minutes": minutes,
                    "current_step": task.current_step,
                })),
            });
            self.last_checkin
                .lock()
                .expect("check-in lock poisoned")
                .insert(task.id, Instant::now());
            emitted += 1;
            info!(task_id = %task.id, elapsed_minutes = minutes, "proactive check-in emitted");
        }

        emitted
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max).collect();
        format!("{}...", clipped)
    }
}
