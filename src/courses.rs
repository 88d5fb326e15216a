use chrono::Utc;
use serde_json::{json, Map};
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Capability};
use crate::error::{CoreError, CoreResult};
use crate::models::{CertificateTemplate, Course, NewCourseReq};
use crate::store::{self, Collection, DocumentStore};

/// Subtopic order and `subtopics_count` are fixed here: completion records
/// refer to subtopics by position, so no operation may reorder them later.
pub async fn create_course(
    store: &dyn DocumentStore,
    instructor: &str,
    req: NewCourseReq,
) -> CoreResult<Course> {
    access::require(store, instructor, Capability::CreateCourse).await?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("course title is required"));
    }
    if let Some(i) = req.subtopics.iter().position(|s| s.title.trim().is_empty()) {
        return Err(CoreError::validation(format!("subtopic {} has no title", i + 1)));
    }
    if let Some(template) = &req.certificate_template_id {
        template_exists(store, template).await?;
    }
    let subtopics_count = u32::try_from(req.subtopics.len())
        .map_err(|_| CoreError::validation("too many subtopics"))?;

    let course = Course {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        description: req.description,
        subtopics: req.subtopics,
        subtopics_count,
        certificate_template_id: req.certificate_template_id,
        created_by: instructor.to_string(),
        created_at: Utc::now(),
    };
    store::save(store, Collection::Courses, &course.id, &course).await?;
    info!(
        course = %course.id,
        instructor = %instructor,
        subtopics = subtopics_count,
        "course created"
    );
    Ok(course)
}

pub async fn get_course(store: &dyn DocumentStore, course_id: &str) -> CoreResult<Course> {
    store::load(store, Collection::Courses, course_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("course {course_id}")))
}

pub async fn courses_by_author(store: &dyn DocumentStore, author: &str) -> CoreResult<Vec<Course>> {
    store
        .find_by(Collection::Courses, "createdBy", &json!(author))
        .await?
        .into_iter()
        .map(|(key, body)| store::decode(Collection::Courses, &key, body))
        .collect()
}

/// Links (or with `None` unlinks) a certificate template. Only the course
/// author may do this.
pub async fn assign_template(
    store: &dyn DocumentStore,
    instructor: &str,
    course_id: &str,
    template_id: Option<String>,
) -> CoreResult<Course> {
    access::require(store, instructor, Capability::ManageTemplates).await?;
    let course = get_course(store, course_id).await?;
    if course.created_by != instructor {
        return Err(CoreError::denied("only the course author can change its certificate"));
    }
    if let Some(template) = &template_id {
        template_exists(store, template).await?;
    }

    let mut fields = Map::new();
    fields.insert("certificateTemplateId".into(), json!(template_id));
    store.update(Collection::Courses, course_id, fields).await?;
    info!(course = %course_id, template = ?template_id, "certificate template assigned");
    get_course(store, course_id).await
}

async fn template_exists(store: &dyn DocumentStore, template_id: &str) -> CoreResult<()> {
    store::load::<CertificateTemplate>(store, Collection::Templates, template_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| CoreError::not_found(format!("certificate template {template_id}")))
}
