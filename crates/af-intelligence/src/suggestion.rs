use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel value marking a failed scoring attempt.
pub const SCORE_FAILED: i32 = -1;

/// Valid impact/risk/effort scores are integers in this range.
pub const SCORE_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    UpdateDescription,
    CreateNewTool,
    ModifyCode,
}

impl ActionType {
    /// The action types the selector considers by default.
    pub fn default_supported() -> Vec<ActionType> {
        vec![
            ActionType::UpdateDescription,
            ActionType::CreateNewTool,
            ActionType::ModifyCode,
        ]
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionType::UpdateDescription => "update_description",
            ActionType::CreateNewTool => "create_new_tool",
            ActionType::ModifyCode => "modify_code",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// Outcome of the review stage over one suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub looks_good: bool,
    /// Reviewer confidence in `[0, 1]`.
    pub confidence: f64,
    pub remarks: Option<String>,
}

// ---------------------------------------------------------------------------
// Suggestion
// ---------------------------------------------------------------------------

/// A candidate improvement produced by the external pattern-analysis
/// collaborator, already scored (and, once reviewed, carrying a verdict).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub text: String,
    /// The observed pattern(s) this suggestion addresses.
    #[serde(default)]
    pub patterns: Vec<String>,
    pub action: ActionType,
    /// Action-specific detail payload; validated structurally at selection
    /// time.
    #[serde(default)]
    pub details: serde_json::Value,
    pub impact: i32,
    pub risk: i32,
    pub effort: i32,
    pub review: Option<Review>,
}

impl Suggestion {
    /// True when all three scores are valid (in range, not the failure
    /// sentinel).
    pub fn has_valid_scores(&self) -> bool {
        [self.impact, self.risk, self.effort]
            .iter()
            .all(|s| SCORE_RANGE.contains(s))
    }

    /// Transient priority used only to rank at selection time:
    /// `impact − risk − 0.5·effort`.
    pub fn priority(&self) -> f64 {
        self.impact as f64 - self.risk as f64 - 0.5 * self.effort as f64
    }
}

// ---------------------------------------------------------------------------
// SuggestionSource
// ---------------------------------------------------------------------------

/// External collaborator producing materialized suggestion lists (log
/// analysis + scoring + review happen behind this seam; the core never builds
/// the list itself).
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    async fn gather(&self) -> anyhow::Result<Vec<Suggestion>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(impact: i32, risk: i32, effort: i32) -> Suggestion {
        Suggestion {
            id: "s1".into(),
            text: "improve a tool".into(),
            patterns: vec![],
            action: ActionType::ModifyCode,
            details: serde_json::Value::Null,
            impact,
            risk,
            effort,
            review: None,
        }
    }

    #[test]
    fn priority_formula() {
        let s = suggestion(5, 1, 1);
        assert!((s.priority() - 3.5).abs() < f64::EPSILON);
        let s = suggestion(4, 1, 2);
        assert!((s.priority() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sentinel_scores_are_invalid() {
        assert!(!suggestion(SCORE_FAILED, 2, 2).has_valid_scores());
        assert!(!suggestion(3, 0, 3).has_valid_scores());
        assert!(!suggestion(3, 2, 6).has_valid_scores());
        assert!(suggestion(5, 1, 1).has_valid_scores());
    }
}
