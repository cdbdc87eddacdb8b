use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::types::TaskStatus;

// ---------------------------------------------------------------------------
// Notification events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskCheckIn,
    GeneralInfo,
}

impl NotificationKind {
    /// Map a terminal task status to the notification kind emitted on archive.
    pub fn for_terminal_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::CompletedSuccessfully => NotificationKind::TaskCompleted,
            TaskStatus::UserCancelled => NotificationKind::TaskCancelled,
            TaskStatus::FailedPreReview
            | TaskStatus::FailedDuringApply
            | TaskStatus::FailedCodeGeneration
            | TaskStatus::FailedUnknown
            | TaskStatus::FailedInterrupted => NotificationKind::TaskFailed,
            _ => NotificationKind::GeneralInfo,
        }
    }
}

/// A single outbound notification. The core only emits these; it never reads
/// them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub summary: String,
    pub related_item_id: Option<String>,
    pub related_item_kind: Option<String>,
    pub payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Sink for outbound notifications (terminal task transitions, proactive
/// check-ins). Implementations must be cheap; emission is fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Default sink: structured log lines only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: NotificationEvent) {
        tracing::info!(
            kind = ?event.kind,
            related_item_id = event.related_item_id.as_deref().unwrap_or("-"),
            "notification: {}",
            event.summary
        );
    }
}

/// In-memory sink; useful for embedding and for asserting emissions in tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("notifier lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("notifier lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: NotificationEvent) {
        self.events.lock().expect("notifier lock poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_mapping() {
        assert_eq!(
            NotificationKind::for_terminal_status(TaskStatus::CompletedSuccessfully),
            NotificationKind::TaskCompleted
        );
        assert_eq!(
            NotificationKind::for_terminal_status(TaskStatus::FailedDuringApply),
            NotificationKind::TaskFailed
        );
        assert_eq!(
            NotificationKind::for_terminal_status(TaskStatus::UserCancelled),
            NotificationKind::TaskCancelled
        );
    }

    #[test]
    fn memory_notifier_records() {
        let sink = MemoryNotifier::new();
        sink.notify(NotificationEvent {
            kind: NotificationKind::GeneralInfo,
            summary: "hello".into(),
            related_item_id: None,
            related_item_kind: None,
            payload: None,
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].summary, "hello");
    }
}
