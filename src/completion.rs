use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub completed: u32,
    pub total: u32,
    /// In `[0, 1]`; 0 for a course without subtopics.
    pub ratio: f64,
    pub is_complete: bool,
}

impl Completion {
    pub fn percent(&self) -> f64 {
        self.ratio * 100.0
    }
}

/// Derives progress-bar ratio and the completion flag for one course.
///
/// An empty completed set is never complete, so a course with
/// `subtopics_count == 0` cannot be completed vacuously.
pub fn evaluate(completed: &BTreeSet<u32>, subtopics_count: u32) -> Completion {
    let done = u32::try_from(completed.len()).unwrap_or(u32::MAX);
    let ratio = if subtopics_count == 0 {
        0.0
    } else {
        (f64::from(done) / f64::from(subtopics_count)).clamp(0.0, 1.0)
    };
    Completion {
        completed: done,
        total: subtopics_count,
        ratio,
        is_complete: done > 0 && done == subtopics_count,
    }
}
