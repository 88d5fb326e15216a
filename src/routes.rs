use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::access::{self, Tab, TabState};
use crate::analytics::{self, AnalyticsReport};
use crate::certificate;
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::learners;
use crate::models::*;
use crate::notify::Notifier;
use crate::progress::{self, CourseProgressView, SubmissionOutcome};
use crate::quiz::{self, QuizGenerator};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
    pub generator: Arc<dyn QuizGenerator>,
}

pub const LEARNER_HEADER: &str = "x-learner-id";

/// The calling learner, passed explicitly by the auth layer in front of us.
pub struct Caller(pub LearnerId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(LEARNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or_else(|| CoreError::denied(format!("missing {LEARNER_HEADER} header")))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // learners
        .route("/api/learners", post(register))
        .route("/api/me", get(me))
        .route("/api/me/role", put(switch_role))
        .route("/api/tabs/:tab", get(select_tab))
        // courses
        .route("/api/courses", get(my_courses).post(create_course))
        .route("/api/courses/:course_id", get(get_course))
        .route("/api/courses/:course_id/template", put(assign_template))
        .route(
            "/api/courses/:course_id/enrollment",
            post(enroll).delete(leave),
        )
        // quizzes + progress
        .route(
            "/api/courses/:course_id/subtopics/:index/quiz",
            post(generate_quiz),
        )
        .route(
            "/api/courses/:course_id/subtopics/:index/attempts",
            post(submit_attempt),
        )
        .route("/api/courses/:course_id/progress", get(course_progress))
        .route("/api/courses/:course_id/certificate", post(issue_certificate))
        // instructor tools
        .route("/api/templates", get(list_templates).post(create_template))
        .route(
            "/api/templates/:template_id",
            get(get_template).delete(delete_template),
        )
        .route("/api/analytics", get(instructor_analytics))
        .with_state(state)
}

async fn register(
    State(app): State<AppState>,
    Json(req): Json<NewLearnerReq>,
) -> CoreResult<(StatusCode, Json<LearnerProfile>)> {
    let profile = learners::register_learner(app.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Serialize)]
struct MeResp {
    profile: LearnerProfile,
    tabs: Vec<TabState>,
}

async fn me(State(app): State<AppState>, Caller(id): Caller) -> CoreResult<Json<MeResp>> {
    let profile = learners::get_profile(app.store.as_ref(), &id).await?;
    let tabs = access::tabs(profile.job_title);
    Ok(Json(MeResp { profile, tabs }))
}

async fn switch_role(
    State(app): State<AppState>,
    Caller(id): Caller,
    Json(req): Json<SwitchRoleReq>,
) -> CoreResult<Json<MeResp>> {
    let profile = learners::switch_role(app.store.as_ref(), &id, req.job_title).await?;
    let tabs = access::tabs(profile.job_title);
    Ok(Json(MeResp { profile, tabs }))
}

async fn select_tab(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(tab): Path<Tab>,
) -> CoreResult<Json<Tab>> {
    let profile = learners::get_profile(app.store.as_ref(), &id).await?;
    Ok(Json(access::select_tab(profile.job_title, tab)?))
}

async fn create_course(
    State(app): State<AppState>,
    Caller(id): Caller,
    Json(req): Json<NewCourseReq>,
) -> CoreResult<(StatusCode, Json<Course>)> {
    let course = courses::create_course(app.store.as_ref(), &id, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// Courses the caller has authored.
async fn my_courses(
    State(app): State<AppState>,
    Caller(id): Caller,
) -> CoreResult<Json<Vec<Course>>> {
    Ok(Json(courses::courses_by_author(app.store.as_ref(), &id).await?))
}

async fn get_course(
    State(app): State<AppState>,
    Path(course_id): Path<String>,
) -> CoreResult<Json<Course>> {
    Ok(Json(courses::get_course(app.store.as_ref(), &course_id).await?))
}

async fn assign_template(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(course_id): Path<String>,
    Json(req): Json<AssignTemplateReq>,
) -> CoreResult<Json<Course>> {
    let course =
        courses::assign_template(app.store.as_ref(), &id, &course_id, req.template_id).await?;
    Ok(Json(course))
}

#[derive(Serialize)]
struct EnrollmentResp {
    enrolled: bool,
    changed: bool,
}

async fn enroll(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(course_id): Path<String>,
) -> CoreResult<Json<EnrollmentResp>> {
    let changed =
        learners::enroll(app.store.as_ref(), app.notifier.as_ref(), &id, &course_id).await?;
    Ok(Json(EnrollmentResp {
        enrolled: true,
        changed,
    }))
}

async fn leave(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(course_id): Path<String>,
) -> CoreResult<Json<EnrollmentResp>> {
    let changed = learners::leave(app.store.as_ref(), &id, &course_id).await?;
    Ok(Json(EnrollmentResp {
        enrolled: false,
        changed,
    }))
}

async fn generate_quiz(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path((course_id, index)): Path<(String, u32)>,
    Json(req): Json<GenerateQuizReq>,
) -> CoreResult<Json<Quiz>> {
    let quiz = quiz::generate_quiz(
        app.store.as_ref(),
        app.generator.as_ref(),
        &id,
        &course_id,
        index,
        &req.language,
    )
    .await?;
    Ok(Json(quiz))
}

async fn submit_attempt(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path((course_id, index)): Path<(String, u32)>,
    Json(req): Json<SubmitAttemptReq>,
) -> CoreResult<Json<SubmissionOutcome>> {
    let outcome = progress::submit_quiz(app.store.as_ref(), &id, &course_id, index, req).await?;
    Ok(Json(outcome))
}

async fn course_progress(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(course_id): Path<String>,
) -> CoreResult<Json<CourseProgressView>> {
    Ok(Json(
        progress::course_progress(app.store.as_ref(), &id, &course_id).await?,
    ))
}

async fn issue_certificate(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(course_id): Path<String>,
) -> CoreResult<Json<IssuedCertificate>> {
    Ok(Json(
        certificate::issue_certificate(app.store.as_ref(), &id, &course_id).await?,
    ))
}

async fn list_templates(
    State(app): State<AppState>,
    Caller(id): Caller,
) -> CoreResult<Json<Vec<CertificateTemplate>>> {
    Ok(Json(certificate::list_templates(app.store.as_ref(), &id).await?))
}

async fn create_template(
    State(app): State<AppState>,
    Caller(id): Caller,
    Json(req): Json<NewTemplateReq>,
) -> CoreResult<(StatusCode, Json<CertificateTemplate>)> {
    let template = certificate::create_template(app.store.as_ref(), &id, req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn get_template(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(template_id): Path<String>,
) -> CoreResult<Json<CertificateTemplate>> {
    Ok(Json(
        certificate::get_template(app.store.as_ref(), &id, &template_id).await?,
    ))
}

async fn delete_template(
    State(app): State<AppState>,
    Caller(id): Caller,
    Path(template_id): Path<String>,
) -> CoreResult<StatusCode> {
    certificate::delete_template(app.store.as_ref(), &id, &template_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn instructor_analytics(
    State(app): State<AppState>,
    Caller(id): Caller,
) -> CoreResult<Json<AnalyticsReport>> {
    Ok(Json(
        analytics::instructor_analytics(app.store.as_ref(), &id).await?,
    ))
}
