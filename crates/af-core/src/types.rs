use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Output previews stored on a task are clipped to this many characters.
pub const OUTPUT_PREVIEW_MAX: usize = 250;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initializing,
    Planning,
    GeneratingCode,
    AwaitingReview,
    ReviewApproved,
    ReviewRejected,
    PostModificationTesting,
    TestPassed,
    TestFailed,
    ApplyingChanges,
    ExecutingProjectPlan,
    ProjectPlanFailedStep,
    CompletedSuccessfully,
    FailedPreReview,
    FailedDuringApply,
    FailedCodeGeneration,
    FailedUnknown,
    FailedInterrupted,
    UserCancelled,
}

impl TaskStatus {
    /// Terminal statuses trigger archival; no further transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::CompletedSuccessfully
                | TaskStatus::UserCancelled
                | TaskStatus::FailedPreReview
                | TaskStatus::FailedDuringApply
                | TaskStatus::FailedCodeGeneration
                | TaskStatus::FailedUnknown
                | TaskStatus::FailedInterrupted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Initializing => "initializing",
            TaskStatus::Planning => "planning",
            TaskStatus::GeneratingCode => "generating_code",
            TaskStatus::AwaitingReview => "awaiting_review",
            TaskStatus::ReviewApproved => "review_approved",
            TaskStatus::ReviewRejected => "review_rejected",
            TaskStatus::PostModificationTesting => "post_modification_testing",
            TaskStatus::TestPassed => "test_passed",
            TaskStatus::TestFailed => "test_failed",
            TaskStatus::ApplyingChanges => "applying_changes",
            TaskStatus::ExecutingProjectPlan => "executing_project_plan",
            TaskStatus::ProjectPlanFailedStep => "project_plan_failed_step",
            TaskStatus::CompletedSuccessfully => "completed_successfully",
            TaskStatus::FailedPreReview => "failed_pre_review",
            TaskStatus::FailedDuringApply => "failed_during_apply",
            TaskStatus::FailedCodeGeneration => "failed_code_generation",
            TaskStatus::FailedUnknown => "failed_unknown",
            TaskStatus::FailedInterrupted => "failed_interrupted",
            TaskStatus::UserCancelled => "user_cancelled",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ToolCreation,
    ToolModification,
    HierarchicalProjectExecution,
    FactLearning,
    ReflectionProcessing,
    SuggestionProcessing,
    MiscCodeGeneration,
    PlanningCodeStructure,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskType::ToolCreation => "tool_creation",
            TaskType::ToolModification => "tool_modification",
            TaskType::HierarchicalProjectExecution => "hierarchical_project_execution",
            TaskType::FactLearning => "fact_learning",
            TaskType::ReflectionProcessing => "reflection_processing",
            TaskType::SuggestionProcessing => "suggestion_processing",
            TaskType::MiscCodeGeneration => "misc_code_generation",
            TaskType::PlanningCodeStructure => "planning_code_structure",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Project plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
}

/// One ordered step of a hierarchical project plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
}

/// Per-step execution record. Every plan step has exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStepRecord {
    pub step_id: String,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub output_preview: Option<String>,
}

impl PlanStepRecord {
    fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            error_message: None,
            output_preview: None,
        }
    }
}

/// Plan state attached to a hierarchical-project-execution task.
///
/// Invariants: `current_step_index <= steps.len()`, and `records` holds one
/// entry per step, in step order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanState {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub current_step_index: usize,
    pub records: Vec<PlanStepRecord>,
}

impl PlanState {
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let records = steps
            .iter()
            .map(|s| PlanStepRecord::pending(s.id.clone()))
            .collect();
        Self {
            goal: goal.into(),
            steps,
            current_step_index: 0,
            records,
        }
    }

    /// An empty plan, used when the supplied details failed validation.
    pub fn empty() -> Self {
        Self::new("", Vec::new())
    }

    /// Number of steps whose record is `Success`.
    pub fn completed_steps(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == StepStatus::Success)
            .count()
    }

    /// The step at the current index, if the plan is not exhausted.
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index)
    }

    /// Overall progress as `round(100 * completed / total)`.
    pub fn progress_pct(&self) -> u8 {
        let total = self.steps.len();
        if total == 0 {
            return 0;
        }
        let pct = (self.completed_steps() as f64 / total as f64) * 100.0;
        pct.round() as u8
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of trackable autonomous work.
///
/// Tasks are mutated exclusively through the store's status-update operation
/// (`crate::store::TaskStore::update_status`); fields are public for
/// construction in tests and for read access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub description: String,
    pub status: TaskStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub related_item_id: Option<String>,
    /// Free-form, type-specific payload.
    #[serde(default)]
    pub details: serde_json::Value,
    /// Present only for hierarchical-project-execution tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanState>,
    pub current_step: Option<String>,
    pub current_sub_step: Option<String>,
    pub progress_pct: Option<u8>,
    #[serde(default)]
    pub error_count: u32,
    pub output_preview: Option<String>,
    /// Opaque continuation blob for resuming interrupted work.
    pub resume_data: Option<serde_json::Value>,
}

impl Task {
    pub fn new(description: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type,
            description: description.into(),
            status: TaskStatus::Initializing,
            status_reason: None,
            created_at: now,
            last_updated_at: now,
            related_item_id: None,
            details: serde_json::Value::Null,
            plan: None,
            current_step: None,
            current_sub_step: None,
            progress_pct: None,
            error_count: 0,
            output_preview: None,
            resume_data: None,
        }
    }

    /// Age of the task relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

/// Update for a single plan-step record of a hierarchical task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStepUpdate {
    pub step_id: String,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub output_preview: Option<String>,
}

/// Optional fields accompanying a status transition.
///
/// Fields that are `None` leave the corresponding task field untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub reason: Option<String>,
    pub step_description: Option<String>,
    pub sub_step: Option<String>,
    pub progress: Option<u8>,
    pub increment_error: bool,
    pub output_preview: Option<String>,
    pub resume_data: Option<serde_json::Value>,
    /// Applied only to hierarchical tasks; ignored otherwise.
    pub plan_step: Option<PlanStepUpdate>,
}

impl StatusUpdate {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_plan_step(update: PlanStepUpdate) -> Self {
        Self {
            plan_step: Some(update),
            ..Self::default()
        }
    }
}

/// Clip a preview string to [`OUTPUT_PREVIEW_MAX`] characters.
pub fn clip_preview(preview: &str) -> String {
    preview.chars().take(OUTPUT_PREVIEW_MAX).collect()
}
