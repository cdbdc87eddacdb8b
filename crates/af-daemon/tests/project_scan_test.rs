use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use af_core::notify::{MemoryNotifier, NotificationKind};
use af_core::store::TaskStore;
use af_core::types::{PlanStep, StepStatus, Task, TaskStatus, TaskType};
use af_daemon::units::{run_project_scan_unit, PlanStepRunner, StepResult};

struct SucceedingRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl PlanStepRunner for SucceedingRunner {
    async fn run_step(&self, _task: &Task, step: &PlanStep) -> Result<StepResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepResult {
            success: true,
            error_message: None,
            output_preview: Some(format!("finished {}", step.description)),
        })
    }
}

struct FailingRunner {
    calls: AtomicUsize,
}

#[async_trait]
impl PlanStepRunner for FailingRunner {
    async fn run_step(&self, _task: &Task, _step: &PlanStep) -> Result<StepResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepResult {
            success: false,
            error_message: Some("compiler rejected the step output".into()),
            output_preview: None,
        })
    }
}

fn setup() -> (Arc<TaskStore>, Arc<MemoryNotifier>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MemoryNotifier::new());
    let store = Arc::new(TaskStore::open(
        dir.path().join("tasks.json"),
        100,
        notifier.clone(),
    ));
    (store, notifier, dir)
}

fn add_project(store: &TaskStore) -> Task {
    store
        .add_task(
            "build the widget",
            TaskType::HierarchicalProjectExecution,
            None,
            Some(json!({
                "goal": "a working widget",
                "plan": [
                    {"id": "1", "description": "scaffold"},
                    {"id": "2", "description": "implement"},
                ],
            })),
        )
        .unwrap()
}

#[tokio::test]
async fn scan_advances_one_step_per_pass_and_completes_the_plan() {
    let (store, notifier, _dir) = setup();
    let task = add_project(&store);
    let runner = SucceedingRunner {
        calls: AtomicUsize::new(0),
    };

    run_project_scan_unit(&store, &runner).await;
    let after_first = store.get_task(task.id).expect("still active");
    assert_eq!(after_first.status, TaskStatus::ExecutingProjectPlan);
    let plan = after_first.plan.as_ref().unwrap();
    assert_eq!(plan.current_step_index, 1);
    assert_eq!(plan.records[0].status, StepStatus::Success);
    assert_eq!(after_first.progress_pct, Some(50));

    run_project_scan_unit(&store, &runner).await;
    assert!(store.get_task(task.id).is_none(), "completed task is archived");
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

    let archived = store.list_archived_tasks(10);
    assert_eq!(archived[0].status, TaskStatus::CompletedSuccessfully);
    assert_eq!(archived[0].progress_pct, Some(100));

    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, NotificationKind::TaskCompleted);
}

#[tokio::test]
async fn failed_step_parks_the_task_without_retrying() {
    let (store, notifier, _dir) = setup();
    let task = add_project(&store);
    let runner = FailingRunner {
        calls: AtomicUsize::new(0),
    };

    run_project_scan_unit(&store, &runner).await;
    let parked = store.get_task(task.id).expect("still active");
    assert_eq!(parked.status, TaskStatus::ProjectPlanFailedStep);
    let plan = parked.plan.as_ref().unwrap();
    assert_eq!(plan.current_step_index, 0, "index must not advance on failure");
    assert_eq!(plan.records[0].status, StepStatus::Failed);
    assert_eq!(
        plan.records[0].error_message.as_deref(),
        Some("compiler rejected the step output")
    );
    assert_eq!(parked.error_count, 1);

    // A second sweep must not retry the failed step.
    run_project_scan_unit(&store, &runner).await;
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

    // Non-terminal: no terminal notification was emitted.
    assert!(notifier.is_empty());
}

#[tokio::test]
async fn empty_plan_completes_immediately() {
    let (store, _, _dir) = setup();
    let task = store
        .add_task(
            "degenerate project",
            TaskType::HierarchicalProjectExecution,
            None,
            Some(json!({"goal": "nothing to do", "plan": []})),
        )
        .unwrap();
    let runner = SucceedingRunner {
        calls: AtomicUsize::new(0),
    };

    run_project_scan_unit(&store, &runner).await;
    assert!(store.get_task(task.id).is_none());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    let archived = store.list_archived_tasks(10);
    assert_eq!(archived[0].status, TaskStatus::CompletedSuccessfully);
}
