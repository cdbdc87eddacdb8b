//! Suggestion records and the scoring/selection stage that turns raw pattern
//! observations into a single actionable improvement.

pub mod selection;
pub mod suggestion;

pub use selection::{SelectionOutcome, SelectionPolicy};
pub use suggestion::{ActionType, Review, Suggestion, SuggestionSource};
