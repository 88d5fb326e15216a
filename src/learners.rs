//! Learner profiles and enrollment.
//!
//! Enrollment is membership of a course id in the profile's `courses` set;
//! joining and leaving are set operations and therefore idempotent.

use serde_json::{json, Map};
use tracing::{info, warn};

use crate::access::Role;
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::models::{LearnerProfile, NewLearnerReq};
use crate::notify::{Notification, Notifier, Severity};
use crate::store::{self, Collection, DocumentStore};

pub async fn register_learner(
    store: &dyn DocumentStore,
    req: NewLearnerReq,
) -> CoreResult<LearnerProfile> {
    let id = req.id.trim().to_string();
    if id.is_empty() {
        return Err(CoreError::validation("learner id is required"));
    }
    let profile = LearnerProfile {
        id: id.clone(),
        display_name: req.display_name,
        job_title: req.job_title,
        courses: Default::default(),
    };
    let (profile, created) = store::create(store, Collection::Learners, &id, profile).await?;
    if !created {
        return Err(CoreError::validation(format!("learner {id} is already registered")));
    }
    info!(learner = %id, role = %profile.job_title, "learner registered");
    Ok(profile)
}

pub async fn get_profile(store: &dyn DocumentStore, learner: &str) -> CoreResult<LearnerProfile> {
    store::load_required(store, Collection::Learners, learner).await
}

pub async fn switch_role(
    store: &dyn DocumentStore,
    learner: &str,
    role: Role,
) -> CoreResult<LearnerProfile> {
    let mut fields = Map::new();
    fields.insert("jobTitle".into(), json!(role));
    store.update(Collection::Learners, learner, fields).await?;
    info!(learner = %learner, role = %role, "role switched");
    get_profile(store, learner).await
}

/// Returns whether the learner was newly enrolled. A new enrollment tells
/// the course author; a failed notification does not fail the enrollment.
pub async fn enroll(
    store: &dyn DocumentStore,
    notifier: &dyn Notifier,
    learner: &str,
    course_id: &str,
) -> CoreResult<bool> {
    let profile = get_profile(store, learner).await?;
    let course = courses::get_course(store, course_id).await?;

    let added = store
        .add_to_set(
            Collection::Learners,
            learner,
            "courses",
            json!(course_id),
            Map::new(),
        )
        .await?;
    if !added {
        return Ok(false);
    }
    info!(learner = %learner, course = %course_id, "enrolled");

    let note = Notification {
        recipient_id: course.created_by.clone(),
        title: "New enrollment".into(),
        body: format!("{} joined {}", profile.display_name, course.title),
        severity: Severity::Info,
    };
    if let Err(e) = notifier.notify(&note).await {
        warn!(course = %course_id, error = %e, "enrollment notification failed");
    }
    Ok(true)
}

/// Returns whether the learner was enrolled before the call.
pub async fn leave(store: &dyn DocumentStore, learner: &str, course_id: &str) -> CoreResult<bool> {
    get_profile(store, learner).await?;
    let removed = store
        .remove_from_set(Collection::Learners, learner, "courses", json!(course_id))
        .await?;
    if removed {
        info!(learner = %learner, course = %course_id, "left course");
    }
    Ok(removed)
}
