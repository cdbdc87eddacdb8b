use std::cmp::Ordering;
use tracing::{debug, info, warn};

use af_evolve::pipeline::{ModificationApplier, ModificationReport, ModificationRequest};
use af_evolve::registry::CodeUnit;

use crate::suggestion::{ActionType, Suggestion};

/// Review verdicts below this confidence are not acted on.
pub const DEFAULT_MIN_REVIEW_CONFIDENCE: f64 = 0.6;

// ---------------------------------------------------------------------------
// Policy & outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    /// Action types the caller is prepared to act on.
    pub supported: Vec<ActionType>,
    pub min_review_confidence: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            supported: ActionType::default_supported(),
            min_review_confidence: DEFAULT_MIN_REVIEW_CONFIDENCE,
        }
    }
}

/// What the selection walk produced.
#[derive(Debug)]
pub enum SelectionOutcome {
    /// A suggestion was selected; the concrete mutation is performed by the
    /// caller (description updates, new-tool scaffolding).
    Selected(Suggestion),
    /// A modify-code suggestion was actioned through the pipeline. Returned
    /// regardless of the pipeline outcome, for auditing.
    Actioned {
        suggestion: Suggestion,
        report: ModificationReport,
    },
    /// Nothing survived filtering and validation. Not an error.
    NoSelection,
}

impl SelectionOutcome {
    pub fn is_no_selection(&self) -> bool {
        matches!(self, SelectionOutcome::NoSelection)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Filter, rank, and act on a batch of suggestions.
///
/// Strict filter-then-rank: unsupported action types, invalid or sentinel
/// scores, and missing/negative review verdicts are silently excluded; the
/// survivors are ranked by `impact − risk − 0.5·effort` (stable sort, input
/// order breaks ties) and walked until one passes structural validation of
/// its detail payload. Malformed input never causes an error.
pub async fn select_for_autonomous_action(
    suggestions: Vec<Suggestion>,
    policy: &SelectionPolicy,
    applier: &dyn ModificationApplier,
) -> SelectionOutcome {
    if suggestions.is_empty() {
        debug!("no suggestions to select from");
        return SelectionOutcome::NoSelection;
    }

    let mut candidates: Vec<Suggestion> = suggestions
        .into_iter()
        .filter(|s| {
            let keep = policy.supported.contains(&s.action);
            if !keep {
                debug!(suggestion = %s.id, action = %s.action, "filtered: unsupported action type");
            }
            keep
        })
        .filter(|s| {
            let keep = s.has_valid_scores();
            if !keep {
                debug!(
                    suggestion = %s.id,
                    impact = s.impact, risk = s.risk, effort = s.effort,
                    "filtered: missing or failed scores"
                );
            }
            keep
        })
        .filter(|s| {
            let keep = s
                .review
                .as_ref()
                .map(|r| r.looks_good && r.confidence >= policy.min_review_confidence)
                .unwrap_or(false);
            if !keep {
                debug!(suggestion = %s.id, "filtered: review verdict missing, negative, or low-confidence");
            }
            keep
        })
        .collect();

    if candidates.is_empty() {
        debug!("no suggestions remaining after filtering");
        return SelectionOutcome::NoSelection;
    }

    // Stable sort: ties keep their original input order.
    candidates.sort_by(|a, b| {
        b.priority()
            .partial_cmp(&a.priority())
            .unwrap_or(Ordering::Equal)
    });

    for suggestion in candidates {
        let priority = suggestion.priority();
        match suggestion.action {
            ActionType::UpdateDescription => {
                if validate_update_description(&suggestion.details) {
                    info!(suggestion = %suggestion.id, priority, "selected description update");
                    return SelectionOutcome::Selected(suggestion);
                }
            }
            ActionType::CreateNewTool => {
                if validate_create_new_tool(&suggestion.details) {
                    info!(suggestion = %suggestion.id, priority, "selected new-tool creation");
                    return SelectionOutcome::Selected(suggestion);
                }
            }
            ActionType::ModifyCode => {
                if let Some(request) = build_modification_request(&suggestion) {
                    info!(
                        suggestion = %suggestion.id,
                        unit = %request.unit,
                        priority,
                        "applying code modification for selected suggestion"
                    );
                    let report = applier.apply(&request).await;
                    info!(
                        suggestion = %suggestion.id,
                        overall_status = report.overall_status,
                        "modification pipeline finished: {}",
                        report.message
                    );
                    // Actioned regardless of the pipeline outcome.
                    return SelectionOutcome::Actioned { suggestion, report };
                }
            }
        }
        warn!(
            suggestion = %suggestion.id,
            action = %suggestion.action,
            "skipping suggestion with invalid action details"
        );
    }

    debug!("no suggestion passed action-detail validation");
    SelectionOutcome::NoSelection
}

// ---------------------------------------------------------------------------
// Structural validation of action details
// ---------------------------------------------------------------------------

fn non_empty_str<'a>(details: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    details
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn validate_update_description(details: &serde_json::Value) -> bool {
    non_empty_str(details, "tool_name").is_some()
        && details.get("new_description").and_then(|v| v.as_str()).is_some()
}

fn validate_create_new_tool(details: &serde_json::Value) -> bool {
    non_empty_str(details, "tool_description_prompt").is_some()
}

fn build_modification_request(suggestion: &Suggestion) -> Option<ModificationRequest> {
    let details = &suggestion.details;
    let module_path = non_empty_str(details, "module_path")?;
    let unit_name = non_empty_str(details, "function_name")?;
    let new_source = non_empty_str(details, "suggested_code_change")?;
    let rationale = non_empty_str(details, "suggested_change_description")
        .unwrap_or(&suggestion.text)
        .to_owned();
    Some(ModificationRequest {
        unit: CodeUnit::new(module_path, unit_name),
        new_source: new_source.to_owned(),
        suggestion_id: Some(suggestion.id.clone()),
        rationale: Some(rationale),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::Review;
    use af_evolve::pipeline::{EditOutcome, ModificationReport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records requests and returns a canned report.
    struct StubApplier {
        succeed: bool,
        requests: Mutex<Vec<ModificationRequest>>,
    }

    impl StubApplier {
        fn new(succeed: bool) -> Self {
            Self {
                succeed,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModificationApplier for StubApplier {
        async fn apply(&self, request: &ModificationRequest) -> ModificationReport {
            self.requests.lock().unwrap().push(request.clone());
            ModificationReport {
                overall_status: self.succeed,
                message: "stubbed".into(),
                edit: EditOutcome::default(),
                test: None,
                revert: None,
                commit: None,
            }
        }
    }

    fn approved() -> Option<Review> {
        Some(Review {
            looks_good: true,
            confidence: 0.9,
            remarks: None,
        })
    }

    fn modify_code(id: &str, impact: i32, risk: i32, effort: i32) -> Suggestion {
        Suggestion {
            id: id.into(),
            text: format!("suggestion {id}"),
            patterns: vec!["repeated failure".into()],
            action: ActionType::ModifyCode,
            details: json!({
                "module_path": "tools.text_utils",
                "function_name": "word_count",
                "suggested_code_change": "def word_count(text):\n    return 0\n",
            }),
            impact,
            risk,
            effort,
            review: approved(),
        }
    }

    #[tokio::test]
    async fn highest_priority_wins() {
        let applier = StubApplier::new(true);
        // 5-1-1 → 3.5 beats 4-1-1 → 2.5.
        let outcome = select_for_autonomous_action(
            vec![modify_code("low", 4, 1, 1), modify_code("high", 5, 1, 1)],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Actioned { suggestion, .. } => assert_eq!(suggestion.id, "high"),
            other => panic!("expected Actioned, got {other:?}"),
        }
        assert_eq!(applier.request_count(), 1);
    }

    #[tokio::test]
    async fn rejected_review_is_never_selected() {
        let applier = StubApplier::new(true);
        let mut rejected = modify_code("rejected", 5, 1, 1);
        rejected.review = Some(Review {
            looks_good: false,
            confidence: 0.95,
            remarks: Some("reviewer found issues".into()),
        });
        let approved_low = modify_code("modest", 3, 1, 1);

        let outcome = select_for_autonomous_action(
            vec![rejected, approved_low],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Actioned { suggestion, .. } => assert_eq!(suggestion.id, "modest"),
            other => panic!("expected Actioned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_confidence_review_is_filtered() {
        let applier = StubApplier::new(true);
        let mut unsure = modify_code("unsure", 5, 1, 1);
        unsure.review = Some(Review {
            looks_good: true,
            confidence: 0.5,
            remarks: None,
        });
        let outcome =
            select_for_autonomous_action(vec![unsure], &SelectionPolicy::default(), &applier).await;
        assert!(outcome.is_no_selection());
        assert_eq!(applier.request_count(), 0);
    }

    #[tokio::test]
    async fn sentinel_scores_are_filtered() {
        let applier = StubApplier::new(true);
        let outcome = select_for_autonomous_action(
            vec![modify_code("unscored", -1, -1, -1)],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        assert!(outcome.is_no_selection());
    }

    #[tokio::test]
    async fn unsupported_action_is_filtered() {
        let applier = StubApplier::new(true);
        let policy = SelectionPolicy {
            supported: vec![ActionType::UpdateDescription],
            ..SelectionPolicy::default()
        };
        let outcome =
            select_for_autonomous_action(vec![modify_code("mod", 5, 1, 1)], &policy, &applier)
                .await;
        assert!(outcome.is_no_selection());
    }

    #[tokio::test]
    async fn invalid_details_are_skipped_and_walk_continues() {
        let applier = StubApplier::new(true);
        let mut broken = modify_code("broken", 5, 1, 1);
        broken.details = json!({ "module_path": "tools.t" }); // missing fields
        let fallback = modify_code("fallback", 3, 1, 1);

        let outcome = select_for_autonomous_action(
            vec![broken, fallback],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Actioned { suggestion, .. } => assert_eq!(suggestion.id, "fallback"),
            other => panic!("expected Actioned, got {other:?}"),
        }
        assert_eq!(applier.request_count(), 1);
    }

    #[tokio::test]
    async fn actioned_even_when_pipeline_fails() {
        let applier = StubApplier::new(false);
        let outcome = select_for_autonomous_action(
            vec![modify_code("doomed", 5, 1, 1)],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Actioned { suggestion, report } => {
                assert_eq!(suggestion.id, "doomed");
                assert!(!report.overall_status);
            }
            other => panic!("expected Actioned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ties_keep_input_order() {
        let applier = StubApplier::new(true);
        let outcome = select_for_autonomous_action(
            vec![modify_code("first", 4, 1, 2), modify_code("second", 4, 1, 2)],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Actioned { suggestion, .. } => assert_eq!(suggestion.id, "first"),
            other => panic!("expected Actioned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_description_is_returned_to_caller() {
        let applier = StubApplier::new(true);
        let suggestion = Suggestion {
            id: "utd".into(),
            text: "clarify the word_count description".into(),
            patterns: vec![],
            action: ActionType::UpdateDescription,
            details: json!({
                "tool_name": "word_count",
                "new_description": "Counts whitespace-separated words.",
            }),
            impact: 3,
            risk: 1,
            effort: 1,
            review: approved(),
        };
        let outcome = select_for_autonomous_action(
            vec![suggestion],
            &SelectionPolicy::default(),
            &applier,
        )
        .await;
        match outcome {
            SelectionOutcome::Selected(s) => assert_eq!(s.id, "utd"),
            other => panic!("expected Selected, got {other:?}"),
        }
        // The caller performs the mutation; no pipeline invocation.
        assert_eq!(applier.request_count(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_no_selection() {
        let applier = StubApplier::new(true);
        let outcome =
            select_for_autonomous_action(vec![], &SelectionPolicy::default(), &applier).await;
        assert!(outcome.is_no_selection());
    }

    #[tokio::test]
    async fn modification_request_carries_suggestion_context() {
        let applier = StubApplier::new(true);
        let mut s = modify_code("ctx", 5, 1, 1);
        s.details["suggested_change_description"] = json!("Return zero for now.");
        select_for_autonomous_action(vec![s], &SelectionPolicy::default(), &applier).await;

        let requests = applier.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.unit.module_path, "tools.text_utils");
        assert_eq!(request.suggestion_id.as_deref(), Some("ctx"));
        assert_eq!(request.rationale.as_deref(), Some("Return zero for now."));
    }
}
