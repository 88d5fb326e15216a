use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;

use crate::access::Role;

pub type LearnerId = String;
pub type CourseId = String;

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtopic {
    pub title: String,
    pub description: Option<String>,
    // language code -> material URL in the blob store
    #[serde(default)]
    pub materials: std::collections::BTreeMap<String, String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub subtopics: Vec<Subtopic>,
    /// Fixed at creation; completion math uses this, not `subtopics.len()`.
    pub subtopics_count: u32,
    pub certificate_template_id: Option<String>,
    pub created_by: LearnerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub id: LearnerId,
    pub display_name: String,
    pub job_title: Role,
    #[serde(default)]
    pub courses: BTreeSet<CourseId>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    #[serde(default)]
    pub learner_id: LearnerId,
    #[serde(default)]
    pub course_id: CourseId,
    #[serde(default)]
    pub completed_subtopics: BTreeSet<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CourseProgress {
    pub fn key(learner: &str, course: &str) -> String {
        format!("{learner}_{course}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub course_id: CourseId,
    pub subtopic_index: u32,
    pub language: String,
    pub questions: Vec<QuizQuestion>,
    pub generated_at: DateTime<Utc>,
}

impl Quiz {
    pub fn key(course: &str, subtopic: u32, language: &str) -> String {
        format!("{course}_{subtopic}_{language}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: String,
    pub course_id: CourseId,
    pub subtopic_index: u32,
    pub learner_id: LearnerId,
    pub answers: Vec<u8>,
    pub score: f64,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTemplate {
    pub id: String,
    pub name: String,
    pub image_url: String,
    pub created_by: LearnerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    pub id: String,
    pub learner_id: LearnerId,
    pub course_id: CourseId,
    pub template_id: String,
    pub verification_code: String,
    pub issued_at: DateTime<Utc>,
}

impl IssuedCertificate {
    pub fn key(learner: &str, course: &str) -> String {
        format!("{learner}_{course}")
    }
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewLearnerReq {
    pub id: LearnerId,
    pub display_name: String,
    pub job_title: Role,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRoleReq {
    pub job_title: Role,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewCourseReq {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub subtopics: Vec<Subtopic>,
    pub certificate_template_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssignTemplateReq {
    pub template_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplateReq {
    pub name: String,
    pub image_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizReq {
    pub language: String,
}

/// `None` entries are questions the learner has not answered yet.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptReq {
    pub language: String,
    pub answers: Vec<Option<u8>>,
}
