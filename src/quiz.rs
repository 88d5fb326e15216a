use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::access::{self, Capability};
use crate::courses;
use crate::error::{CoreError, CoreResult};
use crate::models::{Quiz, QuizQuestion};
use crate::scoring;
use crate::store::{self, Collection, DocumentStore};

pub const QUESTIONS_PER_QUIZ: usize = 10;

/// Turns study material into multiple-choice questions. Treated as a black
/// box; the output shape is checked before it is stored.
#[async_trait]
pub trait QuizGenerator: Send + Sync {
    async fn generate(
        &self,
        material_url: &str,
        language: &str,
        count: usize,
    ) -> CoreResult<Vec<QuizQuestion>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    material_url: &'a str,
    language: &'a str,
    count: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    questions: Vec<QuizQuestion>,
}

pub struct HttpQuizGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpQuizGenerator {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

fn upstream(e: reqwest::Error) -> CoreError {
    CoreError::Upstream(e.to_string())
}

#[async_trait]
impl QuizGenerator for HttpQuizGenerator {
    async fn generate(
        &self,
        material_url: &str,
        language: &str,
        count: usize,
    ) -> CoreResult<Vec<QuizQuestion>> {
        let resp = self
            .client
            .post(&self.url)
            .json(&GenerateBody {
                material_url,
                language,
                count,
            })
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?;
        let body: GenerateResponse = resp.json().await.map_err(upstream)?;
        Ok(body.questions)
    }
}

/// Stands in when no generator endpoint is configured.
pub struct UnconfiguredGenerator;

#[async_trait]
impl QuizGenerator for UnconfiguredGenerator {
    async fn generate(&self, _: &str, _: &str, _: usize) -> CoreResult<Vec<QuizQuestion>> {
        Err(CoreError::Upstream("no quiz generator configured".into()))
    }
}

/// Generates and stores the quiz for one subtopic in one language,
/// replacing any earlier version.
pub async fn generate_quiz(
    store: &dyn DocumentStore,
    generator: &dyn QuizGenerator,
    instructor: &str,
    course_id: &str,
    subtopic: u32,
    language: &str,
) -> CoreResult<Quiz> {
    access::require(store, instructor, Capability::GenerateQuiz).await?;
    let course = courses::get_course(store, course_id).await?;
    if course.created_by != instructor {
        return Err(CoreError::denied("only the course author can generate its quizzes"));
    }
    let material = course
        .subtopics
        .get(subtopic as usize)
        .ok_or_else(|| CoreError::validation(format!("course has no subtopic {subtopic}")))?
        .materials
        .get(language)
        .ok_or_else(|| {
            CoreError::not_found(format!("{language} material for subtopic {subtopic}"))
        })?;

    let questions = generator
        .generate(material, language, QUESTIONS_PER_QUIZ)
        .await?;
    scoring::validate_questions(&questions)?;

    let quiz = Quiz {
        course_id: course_id.to_string(),
        subtopic_index: subtopic,
        language: language.to_string(),
        questions,
        generated_at: Utc::now(),
    };
    store::save(
        store,
        Collection::Quizzes,
        &Quiz::key(course_id, subtopic, language),
        &quiz,
    )
    .await?;
    info!(
        course = %course_id,
        subtopic,
        language = %language,
        questions = quiz.questions.len(),
        "quiz stored"
    );
    Ok(quiz)
}

#[cfg(test)]
pub(crate) struct CannedGenerator(pub Vec<QuizQuestion>);

#[cfg(test)]
#[async_trait]
impl QuizGenerator for CannedGenerator {
    async fn generate(&self, _: &str, _: &str, _: usize) -> CoreResult<Vec<QuizQuestion>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::testing::{course, people, questions, KEY};

    #[tokio::test]
    async fn generated_quiz_is_stored_per_language() {
        let store = MemoryStore::new();
        people(&store, &[("boss", Role::Instructor)]).await;
        let c = course(&store, "boss", "Noise", 2).await;

        let quiz = generate_quiz(&store, &CannedGenerator(questions(&KEY)), "boss", &c.id, 1, "en")
            .await
            .unwrap();
        assert_eq!(quiz.questions.len(), QUESTIONS_PER_QUIZ);
        let stored = store
            .get(Collection::Quizzes, &Quiz::key(&c.id, 1, "en"))
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn malformed_generator_output_is_rejected() {
        let store = MemoryStore::new();
        people(&store, &[("boss", Role::Instructor)]).await;
        let c = course(&store, "boss", "Noise", 1).await;

        let err = generate_quiz(&store, &CannedGenerator(vec![]), "boss", &c.id, 0, "en")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store
            .get(Collection::Quizzes, &Quiz::key(&c.id, 0, "en"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_material_language_is_not_found() {
        let store = MemoryStore::new();
        people(&store, &[("boss", Role::Instructor)]).await;
        let c = course(&store, "boss", "Noise", 1).await;
        let err = generate_quiz(&store, &CannedGenerator(questions(&KEY)), "boss", &c.id, 0, "sw")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn employees_cannot_generate() {
        let store = MemoryStore::new();
        people(&store, &[("boss", Role::Instructor), ("u1", Role::Employee)]).await;
        let c = course(&store, "boss", "Noise", 1).await;
        let err = generate_quiz(&store, &CannedGenerator(questions(&KEY)), "u1", &c.id, 0, "en")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn other_instructors_cannot_regenerate_a_course_quiz() {
        let store = MemoryStore::new();
        people(&store, &[("boss", Role::Instructor), ("rival", Role::Instructor)]).await;
        let c = course(&store, "boss", "Noise", 1).await;
        let err = generate_quiz(&store, &CannedGenerator(questions(&KEY)), "rival", &c.id, 0, "en")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(store
            .get(Collection::Quizzes, &Quiz::key(&c.id, 0, "en"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unconfigured_generator_is_retryable_upstream_error() {
        let err = UnconfiguredGenerator.generate("u", "en", 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }
}
