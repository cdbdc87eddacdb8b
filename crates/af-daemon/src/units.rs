use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use af_core::notify::Notifier;
use af_core::store::TaskStore;
use af_core::types::{
    PlanStep, PlanStepUpdate, StatusUpdate, StepStatus, Task, TaskStatus, TaskType,
};
use af_evolve::pipeline::ModificationApplier;
use af_evolve::registry::CapabilityRegistry;
use af_intelligence::selection::{select_for_autonomous_action, SelectionOutcome, SelectionPolicy};
use af_intelligence::suggestion::{ActionType, SuggestionSource};

use crate::checkin::CheckinMonitor;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// External collaborator that curates the agent's fact store. Returns `true`
/// when curation ran and changed something.
#[async_trait]
pub trait FactCurator: Send + Sync {
    async fn curate(&self) -> Result<bool>;
}

/// Outcome of executing one plan step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub output_preview: Option<String>,
}

/// External collaborator that executes a single plan step of a hierarchical
/// project task (code generation, file writes, …).
#[async_trait]
pub trait PlanStepRunner: Send + Sync {
    async fn run_step(&self, task: &Task, step: &PlanStep) -> Result<StepResult>;
}

// ---------------------------------------------------------------------------
// Unit: self-reflection
// ---------------------------------------------------------------------------

/// One self-reflection cycle: pull suggestions from the external source,
/// track the batch as a task, and run scoring/selection over them. A selected
/// description update is applied to the capability registry here; code
/// modifications go through the pipeline inside selection.
pub async fn run_reflection_unit(
    store: &TaskStore,
    source: &dyn SuggestionSource,
    applier: &dyn ModificationApplier,
    registry: &Mutex<CapabilityRegistry>,
    policy: &SelectionPolicy,
) {
    let suggestions = match source.gather().await {
        Ok(suggestions) => suggestions,
        Err(e) => {
            error!(error = %e, "reflection cycle failed to gather suggestions");
            return;
        }
    };
    if suggestions.is_empty() {
        debug!("reflection cycle produced no suggestions");
        return;
    }
    info!(count = suggestions.len(), "reflection cycle gathered suggestions");

    let task = match store.add_task(
        format!("Processing {} improvement suggestions", suggestions.len()),
        TaskType::SuggestionProcessing,
        None,
        None,
    ) {
        Ok(task) => task,
        Err(e) => {
            error!(error = %e, "failed to track suggestion-processing task");
            return;
        }
    };
    let _ = store.update_status(
        task.id,
        TaskStatus::Planning,
        StatusUpdate {
            step_description: Some("Scoring and selecting suggestions".into()),
            ..StatusUpdate::default()
        },
    );

    let outcome = select_for_autonomous_action(suggestions, policy, applier).await;
    let (status, update) = match outcome {
        SelectionOutcome::Selected(suggestion) => {
            let mut reason = format!(
                "selected suggestion {} ({})",
                suggestion.id, suggestion.action
            );
            if suggestion.action == ActionType::UpdateDescription {
                reason = apply_description_update(registry, &suggestion)
                    .unwrap_or_else(|msg| msg);
            }
            (
                TaskStatus::CompletedSuccessfully,
                StatusUpdate::with_reason(reason),
            )
        }
        SelectionOutcome::Actioned { suggestion, report } => {
            let preview = report
                .test
                .as_ref()
                .map(|t| t.stdout.clone())
                .filter(|s| !s.is_empty());
            let update = StatusUpdate {
                reason: Some(report.message.clone()),
                output_preview: preview,
                increment_error: !report.overall_status,
                ..StatusUpdate::default()
            };
            let status = if report.overall_status {
                TaskStatus::CompletedSuccessfully
            } else {
                TaskStatus::FailedDuringApply
            };
            info!(
                suggestion = %suggestion.id,
                overall_status = report.overall_status,
                "suggestion actioned through the modification pipeline"
            );
            (status, update)
        }
        SelectionOutcome::NoSelection => (
            TaskStatus::CompletedSuccessfully,
            StatusUpdate::with_reason("no actionable suggestion survived filtering"),
        ),
    };
    if let Err(e) = store.update_status(task.id, status, update) {
        error!(error = %e, "failed to close suggestion-processing task");
    }
}

fn apply_description_update(
    registry: &Mutex<CapabilityRegistry>,
    suggestion: &af_intelligence::suggestion::Suggestion,
) -> std::result::Result<String, String> {
    let tool_name = suggestion.details["tool_name"].as_str().unwrap_or_default();
    let new_description = suggestion.details["new_description"]
        .as_str()
        .unwrap_or_default();
    let updated = registry
        .lock()
        .expect("registry lock poisoned")
        .update_description(tool_name, new_description);
    if updated {
        Ok(format!("updated description of '{}'", tool_name))
    } else {
        warn!(tool = tool_name, "description update targeted an unknown capability");
        Err(format!("capability '{}' is not registered", tool_name))
    }
}

// ---------------------------------------------------------------------------
// Unit: fact curation
// ---------------------------------------------------------------------------

pub async fn run_curation_unit(curator: &dyn FactCurator) {
    match curator.curate().await {
        Ok(true) => info!("fact curation completed with changes"),
        Ok(false) => debug!("fact curation made no changes"),
        Err(e) => error!(error = %e, "fact curation failed"),
    }
}

// ---------------------------------------------------------------------------
// Unit: project-plan execution scan
// ---------------------------------------------------------------------------

/// Scan active hierarchical tasks and execute the next pending step of each.
/// Tasks whose last step failed stay parked in `ProjectPlanFailedStep` until
/// externally reset; they are not retried here.
pub async fn run_project_scan_unit(store: &TaskStore, runner: &dyn PlanStepRunner) {
    let mut candidates =
        store.list_active_tasks(Some(TaskType::HierarchicalProjectExecution), None);
    candidates.retain(|t| {
        matches!(
            t.status,
            TaskStatus::Initializing | TaskStatus::ExecutingProjectPlan
        )
    });
    if candidates.is_empty() {
        debug!("no hierarchical tasks with pending steps");
        return;
    }

    for task in candidates {
        let Some(plan) = task.plan.as_ref() else {
            warn!(task_id = %task.id, "hierarchical task without plan state");
            continue;
        };
        let Some(step) = plan.current_step() else {
            // Plan exhausted (or empty): close the task out.
            let _ = store.update_status(
                task.id,
                TaskStatus::CompletedSuccessfully,
                StatusUpdate::with_reason("project plan executed successfully"),
            );
            continue;
        };

        info!(task_id = %task.id, step_id = %step.id, "executing plan step: {}", step.description);
        let result = match runner.run_step(&task, step).await {
            Ok(result) => result,
            Err(e) => StepResult {
                success: false,
                error_message: Some(e.to_string()),
                output_preview: None,
            },
        };

        let is_last = plan.current_step_index + 1 >= plan.steps.len();
        let new_status = if result.success && is_last {
            TaskStatus::CompletedSuccessfully
        } else if result.success {
            TaskStatus::ExecutingProjectPlan
        } else {
            TaskStatus::ProjectPlanFailedStep
        };

        let mut update = StatusUpdate::with_plan_step(PlanStepUpdate {
            step_id: step.id.clone(),
            status: if result.success {
                StepStatus::Success
            } else {
                StepStatus::Failed
            },
            error_message: result.error_message.clone(),
            output_preview: result.output_preview.clone(),
        });
        update.increment_error = !result.success;
        if !result.success {
            update.reason = Some(format!(
                "plan step '{}' failed: {}",
                step.description,
                result.error_message.as_deref().unwrap_or("unknown error")
            ));
        } else if is_last {
            update.reason = Some("project plan executed successfully".into());
        }

        if let Err(e) = store.update_status(task.id, new_status, update) {
            error!(task_id = %task.id, error = %e, "failed to record plan step result");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit: long-running-task check-in
// ---------------------------------------------------------------------------

pub async fn run_checkin_unit(
    store: &TaskStore,
    monitor: &CheckinMonitor,
    notifier: &dyn Notifier,
) {
    let tasks = store.list_active_tasks(None, None);
    let emitted = monitor.sweep(&tasks, notifier);
    if emitted > 0 {
        info!(emitted, "long-running-task check-ins emitted");
    }
}

// ---------------------------------------------------------------------------
// Default collaborator implementations
// ---------------------------------------------------------------------------

/// Suggestion source that never produces anything; stands in until a real
/// pattern-analysis collaborator is wired up.
pub struct IdleSuggestionSource;

#[async_trait]
impl SuggestionSource for IdleSuggestionSource {
    async fn gather(&self) -> Result<Vec<af_intelligence::suggestion::Suggestion>> {
        Ok(Vec::new())
    }
}

/// Curator that does nothing and reports no changes.
pub struct IdleFactCurator;

#[async_trait]
impl FactCurator for IdleFactCurator {
    async fn curate(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Step runner used when no executor is configured: every step fails with an
/// explanatory message rather than silently succeeding.
pub struct NullStepRunner;

#[async_trait]
impl PlanStepRunner for NullStepRunner {
    async fn run_step(&self, _task: &Task, _step: &PlanStep) -> Result<StepResult> {
        Ok(StepResult {
            success: false,
            error_message: Some("no plan-step runner configured".into()),
            output_preview: None,
        })
    }
}
