//! Quiz submission and the per-course progress record.
//!
//! A passing attempt adds its subtopic index to the learner's completed set
//! through the store's atomic add-to-set, so concurrent passes from several
//! devices converge to the same set and re-passing is a no-op.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{self, Capability};
use crate::certificate::{self, CertificateEligibility};
use crate::completion::{self, Completion};
use crate::courses;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::models::{Course, CourseProgress, Quiz, QuizAttempt, SubmitAttemptReq};
use crate::scoring::{self, QuizVerdict};
use crate::store::{self, Collection, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Failing verdict; nothing written.
    Skipped,
    AlreadyRecorded,
    Recorded,
}

pub async fn load_progress(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
) -> CoreResult<CourseProgress> {
    let key = CourseProgress::key(learner, course_id);
    let mut record: CourseProgress = store::load(store, Collection::Progress, &key)
        .await?
        .unwrap_or_default();
    record.learner_id = learner.to_string();
    record.course_id = course_id.to_string();
    Ok(record)
}

/// Applies a scored verdict to the learner's progress on one course.
pub async fn apply_verdict(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
    subtopic: u32,
    passed: bool,
) -> CoreResult<MutationOutcome> {
    if !passed {
        return Ok(MutationOutcome::Skipped);
    }
    let course = courses::get_course(store, course_id).await?;
    record_pass(store, learner, &course, subtopic).await
}

async fn record_pass(
    store: &dyn DocumentStore,
    learner: &str,
    course: &Course,
    subtopic: u32,
) -> CoreResult<MutationOutcome> {
    if subtopic >= course.subtopics_count {
        return Err(CoreError::validation(format!(
            "subtopic {subtopic} is out of range for a course with {} subtopics",
            course.subtopics_count
        )));
    }
    let mut touch = Map::new();
    touch.insert("learnerId".into(), json!(learner));
    touch.insert("courseId".into(), json!(course.id));
    touch.insert("updatedAt".into(), json!(Utc::now()));

    let added = store
        .add_to_set(
            Collection::Progress,
            &CourseProgress::key(learner, &course.id),
            "completedSubtopics",
            json!(subtopic),
            touch,
        )
        .await?;
    if added {
        info!(learner = %learner, course = %course.id, subtopic, "subtopic completed");
        Ok(MutationOutcome::Recorded)
    } else {
        Ok(MutationOutcome::AlreadyRecorded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressWrite {
    Skipped,
    AlreadyRecorded,
    Recorded,
    Failed(WriteFailure),
}

/// A write that did not land, with enough structure for the client to
/// decide whether resubmitting can help.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteFailure {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub reason: String,
}

impl From<&CoreError> for WriteFailure {
    fn from(e: &CoreError) -> Self {
        Self {
            kind: e.kind(),
            retryable: e.is_retryable(),
            reason: e.to_string(),
        }
    }
}

impl From<MutationOutcome> for ProgressWrite {
    fn from(o: MutationOutcome) -> Self {
        match o {
            MutationOutcome::Skipped => ProgressWrite::Skipped,
            MutationOutcome::AlreadyRecorded => ProgressWrite::AlreadyRecorded,
            MutationOutcome::Recorded => ProgressWrite::Recorded,
        }
    }
}

/// The verdict is always present; the two writes that follow it may fail
/// independently and are reported rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    #[serde(flatten)]
    pub verdict: QuizVerdict,
    pub attempt_id: Option<String>,
    pub attempt_error: Option<WriteFailure>,
    pub progress: ProgressWrite,
    /// Set when a write failed with a transient error; resubmitting is safe
    /// because the progress mutation is idempotent.
    pub needs_retry: bool,
}

impl SubmissionOutcome {
    fn new(
        verdict: QuizVerdict,
        attempt_id: Option<String>,
        attempt_error: Option<WriteFailure>,
        progress: ProgressWrite,
    ) -> Self {
        let progress_retryable = matches!(&progress, ProgressWrite::Failed(f) if f.retryable);
        let needs_retry =
            attempt_error.as_ref().is_some_and(|f| f.retryable) || progress_retryable;
        Self {
            verdict,
            attempt_id,
            attempt_error,
            progress,
            needs_retry,
        }
    }
}

pub async fn submit_quiz(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
    subtopic: u32,
    req: SubmitAttemptReq,
) -> CoreResult<SubmissionOutcome> {
    let profile = access::require(store, learner, Capability::TakeCourses).await?;
    let course = courses::get_course(store, course_id).await?;
    if !profile.courses.contains(course_id) {
        return Err(CoreError::denied(format!(
            "enroll in {} before taking its quizzes",
            course.title
        )));
    }
    if subtopic >= course.subtopics_count {
        return Err(CoreError::validation(format!("course has no subtopic {subtopic}")));
    }
    let quiz_key = Quiz::key(course_id, subtopic, &req.language);
    let quiz: Quiz = store::load(store, Collection::Quizzes, &quiz_key)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(format!("quiz for subtopic {subtopic} in {}", req.language))
        })?;

    let answers = scoring::check_submission(&quiz.questions, &req.answers)?;
    let verdict = scoring::score(&quiz.questions, &answers)?;

    let attempt = QuizAttempt {
        id: Uuid::new_v4().to_string(),
        course_id: course_id.to_string(),
        subtopic_index: subtopic,
        learner_id: learner.to_string(),
        answers,
        score: verdict.score,
        passed: verdict.passed,
        completed_at: Utc::now(),
    };
    let (attempt_id, attempt_error) =
        match store::save(store, Collection::Attempts, &attempt.id, &attempt).await {
            Ok(()) => (Some(attempt.id.clone()), None),
            Err(e) => {
                warn!(
                    learner = %learner,
                    course = %course_id,
                    subtopic,
                    error = %e,
                    "attempt not logged"
                );
                (None, Some(WriteFailure::from(&e)))
            }
        };

    let progress = if verdict.passed {
        match record_pass(store, learner, &course, subtopic).await {
            Ok(o) => o.into(),
            Err(e) => {
                warn!(
                    learner = %learner,
                    course = %course_id,
                    subtopic,
                    error = %e,
                    "progress not saved"
                );
                ProgressWrite::Failed(WriteFailure::from(&e))
            }
        }
    } else {
        ProgressWrite::Skipped
    };

    info!(
        learner = %learner,
        course = %course_id,
        subtopic,
        score = verdict.score,
        passed = verdict.passed,
        "quiz submitted"
    );
    Ok(SubmissionOutcome::new(verdict, attempt_id, attempt_error, progress))
}

/// Best score per subtopic; retakes only ever raise what is shown.
pub fn best_scores(attempts: &[QuizAttempt]) -> BTreeMap<u32, f64> {
    let mut best = BTreeMap::new();
    for a in attempts {
        best.entry(a.subtopic_index)
            .and_modify(|s: &mut f64| *s = s.max(a.score))
            .or_insert(a.score);
    }
    best
}

pub async fn attempts_for(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
) -> CoreResult<Vec<QuizAttempt>> {
    let rows = store
        .find_by(Collection::Attempts, "learnerId", &json!(learner))
        .await?;
    let mut attempts = Vec::with_capacity(rows.len());
    for (key, body) in rows {
        let a: QuizAttempt = store::decode(Collection::Attempts, &key, body)?;
        if a.course_id == course_id {
            attempts.push(a);
        }
    }
    Ok(attempts)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressView {
    pub course_id: String,
    pub title: String,
    pub completion: Completion,
    pub best_scores: BTreeMap<u32, f64>,
    pub attempts: usize,
    pub certificate: CertificateEligibility,
    pub certificate_message: &'static str,
}

pub async fn course_progress(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
) -> CoreResult<CourseProgressView> {
    let course = courses::get_course(store, course_id).await?;
    let record = load_progress(store, learner, course_id).await?;
    let attempts = attempts_for(store, learner, course_id).await?;

    let done = completion::evaluate(&record.completed_subtopics, course.subtopics_count);
    let cert = certificate::gate(done.is_complete, course.certificate_template_id.as_deref());
    Ok(CourseProgressView {
        course_id: course.id,
        title: course.title,
        completion: done,
        best_scores: best_scores(&attempts),
        attempts: attempts.len(),
        certificate_message: cert.message(),
        certificate: cert,
    })
}
