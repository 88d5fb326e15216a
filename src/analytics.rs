//! Instructor-facing course statistics.
//!
//! [`aggregate`] is the pure computation. [`instructor_analytics`] feeds it
//! from a full scan of learner profiles, progress records and the attempt
//! log; it reads a snapshot that may trail concurrent submissions and never
//! writes. Reads that fail are listed in the report so "no activity" and
//! "could not read" stay distinguishable.

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

use crate::access::{self, Capability};
use crate::completion;
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::models::{Course, CourseId, CourseProgress, LearnerId, LearnerProfile, QuizAttempt};
use crate::store::{self, Collection, DocumentStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub course_id: CourseId,
    pub title: String,
    pub total_enrollments: u64,
    pub total_completions: u64,
    pub completion_rate: f64,
    pub average_score: f64,
    pub quiz_attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorAnalytics {
    pub total_courses_created: u64,
    pub total_enrollments: u64,
    pub total_completions: u64,
    /// Completions over enrollments across all courses, not a mean of rates.
    pub average_completion_rate: f64,
    /// Weighted by attempt count.
    pub average_quiz_score: f64,
    pub total_quiz_attempts: u64,
    /// Most enrolled first.
    pub courses: Vec<CourseStats>,
}

/// What the scan learned about one learner.
#[derive(Debug, Clone, Default)]
pub struct LearnerSnapshot {
    pub learner_id: LearnerId,
    pub enrolled: BTreeSet<CourseId>,
    /// Completed subtopics per enrolled course; absent means no record.
    pub progress: HashMap<CourseId, BTreeSet<u32>>,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn aggregate(
    courses: &[Course],
    learners: &[LearnerSnapshot],
    attempts: &[QuizAttempt],
) -> InstructorAnalytics {
    let mut score_sums: HashMap<&str, (f64, u64)> = HashMap::new();
    for a in attempts {
        let e = score_sums.entry(a.course_id.as_str()).or_default();
        e.0 += a.score;
        e.1 += 1;
    }

    let mut total_score = 0.0;
    let mut stats: Vec<CourseStats> = courses
        .iter()
        .map(|course| {
            let mut enrollments = 0;
            let mut completions = 0;
            for l in learners.iter().filter(|l| l.enrolled.contains(&course.id)) {
                enrollments += 1;
                let done = l
                    .progress
                    .get(&course.id)
                    .map(|set| completion::evaluate(set, course.subtopics_count).is_complete)
                    .unwrap_or(false);
                if done {
                    completions += 1;
                }
            }
            let (sum, count) = score_sums.get(course.id.as_str()).copied().unwrap_or((0.0, 0));
            total_score += sum;
            CourseStats {
                course_id: course.id.clone(),
                title: course.title.clone(),
                total_enrollments: enrollments,
                total_completions: completions,
                completion_rate: ratio(completions, enrollments),
                average_score: if count == 0 { 0.0 } else { sum / count as f64 },
                quiz_attempts: count,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.total_enrollments
            .cmp(&a.total_enrollments)
            .then_with(|| a.title.cmp(&b.title))
    });

    let total_enrollments = stats.iter().map(|s| s.total_enrollments).sum();
    let total_completions = stats.iter().map(|s| s.total_completions).sum();
    let total_quiz_attempts: u64 = stats.iter().map(|s| s.quiz_attempts).sum();

    InstructorAnalytics {
        total_courses_created: courses.len() as u64,
        total_enrollments,
        total_completions,
        average_completion_rate: ratio(total_completions, total_enrollments),
        average_quiz_score: if total_quiz_attempts == 0 {
            0.0
        } else {
            total_score / total_quiz_attempts as f64
        },
        total_quiz_attempts,
        courses: stats,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFailure {
    pub scope: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub status: ScanStatus,
    #[serde(flatten)]
    pub analytics: InstructorAnalytics,
    /// Learner profiles, progress records, attempt queries and attempt rows
    /// examined; each can contribute at most one failure.
    pub scanned: usize,
    pub failures: Vec<ScanFailure>,
}

impl AnalyticsReport {
    /// For callers that cannot show partial figures.
    pub fn into_complete(self) -> CoreResult<InstructorAnalytics> {
        if self.failures.is_empty() {
            Ok(self.analytics)
        } else {
            Err(CoreError::PartialAggregation {
                scanned: self.scanned,
                failed: self.failures.len(),
            })
        }
    }
}

pub async fn instructor_analytics(
    store: &dyn DocumentStore,
    instructor: &str,
) -> CoreResult<AnalyticsReport> {
    access::require(store, instructor, Capability::ViewAnalytics).await?;
    let courses = courses::courses_by_author(store, instructor).await?;
    let authored: HashSet<&str> = courses.iter().map(|c| c.id.as_str()).collect();

    let mut failures = Vec::new();
    let mut scanned = 0;

    // Without the learner list there is nothing to report on.
    let profiles = store.list(Collection::Learners).await?;
    let mut learners = Vec::with_capacity(profiles.len());
    for (key, body) in profiles {
        scanned += 1;
        let profile: LearnerProfile = match store::decode(Collection::Learners, &key, body) {
            Ok(p) => p,
            Err(e) => {
                failures.push(ScanFailure {
                    scope: format!("learner {key}"),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let mut snap = LearnerSnapshot {
            learner_id: profile.id.clone(),
            enrolled: profile.courses.clone(),
            progress: HashMap::new(),
        };
        for course_id in profile.courses.iter().filter(|c| authored.contains(c.as_str())) {
            scanned += 1;
            let key = CourseProgress::key(&profile.id, course_id);
            match store::load::<CourseProgress>(store, Collection::Progress, &key).await {
                Ok(Some(p)) => {
                    snap.progress.insert(course_id.clone(), p.completed_subtopics);
                }
                Ok(None) => {}
                Err(e) => failures.push(ScanFailure {
                    scope: format!("progress {key}"),
                    reason: e.to_string(),
                }),
            }
        }
        learners.push(snap);
    }

    let mut attempts = Vec::new();
    for course in &courses {
        match store
            .find_by(Collection::Attempts, "courseId", &json!(course.id))
            .await
        {
            Ok(rows) => {
                for (key, body) in rows {
                    scanned += 1;
                    match store::decode::<QuizAttempt>(Collection::Attempts, &key, body) {
                        Ok(a) => attempts.push(a),
                        Err(e) => failures.push(ScanFailure {
                            scope: format!("attempt {key}"),
                            reason: e.to_string(),
                        }),
                    }
                }
            }
            Err(e) => {
                scanned += 1;
                failures.push(ScanFailure {
                    scope: format!("attempts for course {}", course.id),
                    reason: e.to_string(),
                });
            }
        }
    }

    let analytics = aggregate(&courses, &learners, &attempts);
    let status = if failures.is_empty() {
        info!(instructor = %instructor, courses = courses.len(), scanned, "analytics computed");
        ScanStatus::Complete
    } else {
        warn!(instructor = %instructor, scanned, failed = failures.len(), "analytics partial");
        ScanStatus::Partial
    };
    Ok(AnalyticsReport {
        status,
        analytics,
        scanned,
        failures,
    })
}
