//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use tokio::sync::broadcast;

use crate::access::Role;
use crate::courses::create_course;
use crate::learners::register_learner;
use crate::models::{Course, NewCourseReq, NewLearnerReq, Quiz, QuizQuestion, Subtopic};
use crate::store::{save, Collection, DocumentChange, DocumentStore, MemoryStore, StoreError};

pub fn questions(correct: &[u8]) -> Vec<QuizQuestion> {
    correct
        .iter()
        .enumerate()
        .map(|(i, c)| QuizQuestion {
            question: format!("Q{i}"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_index: *c,
        })
        .collect()
}

/// Answers for `key` with the first `n_correct` right and the rest wrong.
pub fn answers(key: &[u8], n_correct: usize) -> Vec<Option<u8>> {
    key.iter()
        .enumerate()
        .map(|(i, c)| Some(if i < n_correct { *c } else { (c + 1) % 4 }))
        .collect()
}

pub const KEY: [u8; 10] = [0, 1, 2, 3, 0, 1, 2, 3, 0, 1];

pub async fn people(store: &dyn DocumentStore, who: &[(&str, Role)]) {
    for (id, role) in who {
        register_learner(
            store,
            NewLearnerReq {
                id: id.to_string(),
                display_name: id.to_string(),
                job_title: *role,
            },
        )
        .await
        .unwrap();
    }
}

/// A course with `n` subtopics, each with English material, authored by
/// an already registered instructor.
pub async fn course(store: &dyn DocumentStore, author: &str, title: &str, n: usize) -> Course {
    let subtopics = (0..n)
        .map(|i| Subtopic {
            title: format!("{title} {}", i + 1),
            description: None,
            materials: BTreeMap::from([(
                "en".to_string(),
                format!("https://blobs/{title}/{i}.pdf"),
            )]),
        })
        .collect();
    create_course(
        store,
        author,
        NewCourseReq {
            title: title.into(),
            description: String::new(),
            subtopics,
            certificate_template_id: None,
        },
    )
    .await
    .unwrap()
}

pub async fn quiz(store: &dyn DocumentStore, course: &str, subtopic: u32, key: &[u8]) {
    let quiz = Quiz {
        course_id: course.into(),
        subtopic_index: subtopic,
        language: "en".into(),
        questions: questions(key),
        generated_at: Utc::now(),
    };
    save(
        store,
        Collection::Quizzes,
        &Quiz::key(course, subtopic, "en"),
        &quiz,
    )
    .await
    .unwrap();
}

/// Wraps a [`MemoryStore`] and fails selected operations with a backend
/// error. It can also yield on every read so that concurrent callers
/// interleave between their read and their write.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    yield_on_get: AtomicBool,
    sets: Mutex<HashSet<Collection>>,
    add_to_set: Mutex<HashSet<Collection>>,
    gets: Mutex<HashSet<(Collection, String)>>,
    finds: Mutex<Vec<(Collection, Value)>>,
}

impl FailingStore {
    pub fn interleaving() -> Self {
        let store = Self::default();
        store.yield_on_get.store(true, Ordering::SeqCst);
        store
    }

    pub fn fail_set(&self, collection: Collection) {
        self.sets.lock().unwrap().insert(collection);
    }

    pub fn fail_add_to_set(&self, collection: Collection) {
        self.add_to_set.lock().unwrap().insert(collection);
    }

    pub fn fail_get(&self, collection: Collection, key: &str) {
        self.gets.lock().unwrap().insert((collection, key.to_string()));
    }

    pub fn fail_find(&self, collection: Collection, value: Value) {
        self.finds.lock().unwrap().push((collection, value));
    }
}

fn injected() -> StoreError {
    StoreError::Backend("injected failure".into())
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        if self.gets.lock().unwrap().contains(&(collection, key.to_string())) {
            return Err(injected());
        }
        let found = self.inner.get(collection, key).await;
        if self.yield_on_get.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        found
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> Result<(), StoreError> {
        if self.sets.lock().unwrap().contains(&collection) {
            return Err(injected());
        }
        self.inner.set(collection, key, body).await
    }

    async fn create(
        &self,
        collection: Collection,
        key: &str,
        body: Value,
    ) -> Result<Option<Value>, StoreError> {
        self.inner.create(collection, key, body).await
    }

    async fn update(
        &self,
        collection: Collection,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, key, fields).await
    }

    async fn add_to_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
        touch: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        if self.add_to_set.lock().unwrap().contains(&collection) {
            return Err(injected());
        }
        self.inner.add_to_set(collection, key, field, value, touch).await
    }

    async fn remove_from_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        self.inner.remove_from_set(collection, key, field, value).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, key).await
    }

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.list(collection).await
    }

    async fn find_by(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let fail = self
            .finds
            .lock()
            .unwrap()
            .iter()
            .any(|(c, v)| *c == collection && v == value);
        if fail {
            return Err(injected());
        }
        self.inner.find_by(collection, field, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.inner.subscribe()
    }
}
