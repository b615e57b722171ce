//! Handlers for the two task types.

mod checklist_generation;
mod review;

pub use checklist_generation::ChecklistGenerationHandler;
pub use review::{merge_labels, ReviewHandler, ReviewSummary};
