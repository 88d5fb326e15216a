//! Certificate eligibility and delivery.
//!
//! Earning a certificate (completing the course) and configuring its
//! delivery (linking a template) are independent instructor/learner
//! actions, so the gate has three outcomes rather than two.

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Capability};
use crate::completion;
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::models::{CertificateTemplate, IssuedCertificate, NewTemplateReq};
use crate::progress;
use crate::store::{self, Collection, DocumentStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CertificateEligibility {
    Eligible {
        #[serde(rename = "templateId")]
        template_id: String,
    },
    CompleteNoTemplate,
    Incomplete,
}

impl CertificateEligibility {
    pub fn action_enabled(&self) -> bool {
        matches!(self, Self::Eligible { .. })
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Eligible { .. } => "Your certificate is ready.",
            Self::CompleteNoTemplate => concat!(
                "Course completed, but no certificate template has been assigned yet. ",
                "Please contact your instructor."
            ),
            Self::Incomplete => "Complete every subtopic to unlock your certificate.",
        }
    }
}

pub fn gate(is_complete: bool, template_id: Option<&str>) -> CertificateEligibility {
    match (is_complete, template_id) {
        (true, Some(t)) => CertificateEligibility::Eligible {
            template_id: t.to_string(),
        },
        (true, None) => CertificateEligibility::CompleteNoTemplate,
        (false, _) => CertificateEligibility::Incomplete,
    }
}

pub async fn create_template(
    store: &dyn DocumentStore,
    instructor: &str,
    req: NewTemplateReq,
) -> CoreResult<CertificateTemplate> {
    access::require(store, instructor, Capability::ManageTemplates).await?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("template name is required"));
    }
    if req.image_url.trim().is_empty() {
        return Err(CoreError::validation("template image is required"));
    }
    let template = CertificateTemplate {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        image_url: req.image_url,
        created_by: instructor.to_string(),
        created_at: Utc::now(),
    };
    store::save(store, Collection::Templates, &template.id, &template).await?;
    info!(template = %template.id, instructor = %instructor, "certificate template created");
    Ok(template)
}

pub async fn list_templates(
    store: &dyn DocumentStore,
    instructor: &str,
) -> CoreResult<Vec<CertificateTemplate>> {
    access::require(store, instructor, Capability::ManageTemplates).await?;
    store
        .list(Collection::Templates)
        .await?
        .into_iter()
        .map(|(key, body)| store::decode(Collection::Templates, &key, body))
        .collect()
}

pub async fn get_template(
    store: &dyn DocumentStore,
    instructor: &str,
    template_id: &str,
) -> CoreResult<CertificateTemplate> {
    access::require(store, instructor, Capability::ManageTemplates).await?;
    load_template(store, template_id).await
}

pub async fn delete_template(
    store: &dyn DocumentStore,
    instructor: &str,
    template_id: &str,
) -> CoreResult<()> {
    access::require(store, instructor, Capability::ManageTemplates).await?;
    let template = load_template(store, template_id).await?;
    if template.created_by != instructor {
        return Err(CoreError::denied("only the template author can delete it"));
    }
    store.delete(Collection::Templates, template_id).await?;
    info!(template = %template_id, "certificate template deleted");
    Ok(())
}

async fn load_template(
    store: &dyn DocumentStore,
    template_id: &str,
) -> CoreResult<CertificateTemplate> {
    store::load(store, Collection::Templates, template_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("certificate template {template_id}")))
}

/// Issues the learner's certificate for a course, or returns the one
/// already issued.
pub async fn issue_certificate(
    store: &dyn DocumentStore,
    learner: &str,
    course_id: &str,
) -> CoreResult<IssuedCertificate> {
    let course = courses::get_course(store, course_id).await?;
    let record = progress::load_progress(store, learner, course_id).await?;
    let done = completion::evaluate(&record.completed_subtopics, course.subtopics_count);

    let template_id = match gate(done.is_complete, course.certificate_template_id.as_deref()) {
        CertificateEligibility::Eligible { template_id } => template_id,
        other => return Err(CoreError::validation(other.message())),
    };
    // the link can outlive the template
    let template = load_template(store, &template_id).await?;

    let key = IssuedCertificate::key(learner, course_id);
    let existing = store::load::<IssuedCertificate>(store, Collection::Certificates, &key).await?;
    if let Some(existing) = existing {
        return Ok(existing);
    }
    let code = Uuid::new_v4().simple().to_string()[..12].to_uppercase();
    let cert = IssuedCertificate {
        id: Uuid::new_v4().to_string(),
        learner_id: learner.to_string(),
        course_id: course_id.to_string(),
        template_id: template.id,
        verification_code: code,
        issued_at: Utc::now(),
    };
    // a concurrent issue may have won since the read above
    let (cert, issued) = store::create(store, Collection::Certificates, &key, cert).await?;
    if issued {
        info!(
            learner = %learner,
            course = %course_id,
            certificate = %cert.id,
            "certificate issued"
        );
    }
    Ok(cert)
}
