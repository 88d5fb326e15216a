//! Role-based gating of instructor surfaces.
//!
//! The guard never caches a role: [`require`] reads the profile on every
//! call, and [`RoleWatch`] follows profile writes for long-lived surfaces,
//! so a role switch takes effect on the next evaluation.

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::learners;
use crate::models::{LearnerId, LearnerProfile};
use crate::store::{Collection, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Role {
    Employee,
    Instructor,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unrecognized job title {0:?}")]
pub struct UnknownRole(pub String);

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Employee => "Employee",
            Role::Instructor => "Instructor",
        })
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    // Exact match only; anything else is a data problem, not an employee.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Employee" => Ok(Role::Employee),
            "Instructor" => Ok(Role::Instructor),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TakeCourses,
    CreateCourse,
    GenerateQuiz,
    ManageTemplates,
    ViewAnalytics,
}

impl Capability {
    fn describe(self) -> &'static str {
        match self {
            Capability::TakeCourses => "take courses",
            Capability::CreateCourse => "create courses",
            Capability::GenerateQuiz => "generate quizzes",
            Capability::ManageTemplates => "manage certificate templates",
            Capability::ViewAnalytics => "view course analytics",
        }
    }
}

impl Role {
    pub fn permits(self, cap: Capability) -> bool {
        match cap {
            Capability::TakeCourses => true,
            Capability::CreateCourse
            | Capability::GenerateQuiz
            | Capability::ManageTemplates
            | Capability::ViewAnalytics => self == Role::Instructor,
        }
    }
}

pub fn authorize(role: Role, cap: Capability) -> CoreResult<()> {
    if role.permits(cap) {
        Ok(())
    } else {
        Err(CoreError::denied(format!(
            "only instructors can {}",
            cap.describe()
        )))
    }
}

/// Loads the caller's current profile and checks `cap` against it.
pub async fn require(
    store: &dyn DocumentStore,
    learner: &str,
    cap: Capability,
) -> CoreResult<LearnerProfile> {
    let profile = learners::get_profile(store, learner).await?;
    if let Err(e) = authorize(profile.job_title, cap) {
        warn!(learner = %learner, role = %profile.job_title, capability = ?cap, "access denied");
        return Err(e);
    }
    Ok(profile)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    Home,
    Courses,
    Certificates,
    Templates,
    Analytics,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TabState {
    pub tab: Tab,
    pub visible: bool,
    pub enabled: bool,
}

const ALL_TABS: [Tab; 6] = [
    Tab::Home,
    Tab::Courses,
    Tab::Certificates,
    Tab::Templates,
    Tab::Analytics,
    Tab::Profile,
];

fn tab_capability(tab: Tab) -> Option<Capability> {
    match tab {
        Tab::Templates => Some(Capability::ManageTemplates),
        Tab::Analytics => Some(Capability::ViewAnalytics),
        _ => None,
    }
}

/// Employees still see the templates tab, greyed out; analytics is hidden.
pub fn tabs(role: Role) -> Vec<TabState> {
    ALL_TABS
        .iter()
        .map(|&tab| {
            let enabled = tab_capability(tab).map_or(true, |cap| role.permits(cap));
            let visible = enabled || tab == Tab::Templates;
            TabState {
                tab,
                visible,
                enabled,
            }
        })
        .collect()
}

pub fn select_tab(role: Role, tab: Tab) -> CoreResult<Tab> {
    match tab_capability(tab) {
        Some(cap) => authorize(role, cap).map(|_| tab),
        None => Ok(tab),
    }
}

/// Live view of one learner's role, refreshed from the store change feed.
pub struct RoleWatch {
    rx: watch::Receiver<Role>,
    task: JoinHandle<()>,
}

impl RoleWatch {
    pub async fn start(store: Arc<dyn DocumentStore>, learner: LearnerId) -> CoreResult<Self> {
        // subscribe before the first read so no write slips between them
        let mut changes = store.subscribe();
        let initial = learners::get_profile(store.as_ref(), &learner).await?.job_title;
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                let refresh = match changes.recv().await {
                    Ok(change) => {
                        change.collection == Collection::Learners && change.key == learner
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(learner = %learner, skipped, "role watch lagged, refreshing");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !refresh {
                    continue;
                }
                match learners::get_profile(store.as_ref(), &learner).await {
                    Ok(profile) => {
                        tx.send_if_modified(|role| {
                            let changed = *role != profile.job_title;
                            *role = profile.job_title;
                            changed
                        });
                    }
                    Err(e) => warn!(learner = %learner, error = %e, "role refresh failed"),
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(Self { rx, task })
    }

    pub fn role(&self) -> Role {
        *self.rx.borrow()
    }

    pub fn permits(&self, cap: Capability) -> bool {
        self.role().permits(cap)
    }

    /// Waits for the next role change. `None` once the watch has stopped.
    pub async fn changed(&mut self) -> Option<Role> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

impl Drop for RoleWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::learners::{register_learner, switch_role};
    use crate::models::NewLearnerReq;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn employee(store: &dyn DocumentStore, id: &str) {
        register_learner(
            store,
            NewLearnerReq {
                id: id.into(),
                display_name: "Sam".into(),
                job_title: Role::Employee,
            },
        )
        .await
        .unwrap();
    }

    #[test]
    fn role_parsing_is_strict() {
        assert_eq!("Instructor".parse::<Role>(), Ok(Role::Instructor));
        assert_eq!("Employee".parse::<Role>(), Ok(Role::Employee));
        assert!("employee".parse::<Role>().is_err());
        assert!("Manager".parse::<Role>().is_err());
        assert!(serde_json::from_value::<Role>(json!("Contractor")).is_err());
        assert_eq!(serde_json::to_value(Role::Instructor).unwrap(), json!("Instructor"));
    }

    #[test]
    fn employees_cannot_reach_instructor_actions() {
        for cap in [
            Capability::CreateCourse,
            Capability::GenerateQuiz,
            Capability::ManageTemplates,
            Capability::ViewAnalytics,
        ] {
            let err = authorize(Role::Employee, cap).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessDenied);
            assert!(authorize(Role::Instructor, cap).is_ok());
        }
        assert!(authorize(Role::Employee, Capability::TakeCourses).is_ok());
    }

    #[test]
    fn disabled_tab_tap_is_rejected_with_a_message() {
        let err = select_tab(Role::Employee, Tab::Templates).unwrap_err();
        assert_eq!(err.to_string(), "only instructors can manage certificate templates");
        assert_eq!(select_tab(Role::Instructor, Tab::Templates).unwrap(), Tab::Templates);
        assert_eq!(select_tab(Role::Employee, Tab::Courses).unwrap(), Tab::Courses);
    }

    #[test]
    fn tab_visibility_per_role() {
        let emp = tabs(Role::Employee);
        let templates = emp.iter().find(|t| t.tab == Tab::Templates).unwrap();
        assert!(templates.visible && !templates.enabled);
        let analytics = emp.iter().find(|t| t.tab == Tab::Analytics).unwrap();
        assert!(!analytics.visible);
        assert!(tabs(Role::Instructor).iter().all(|t| t.visible && t.enabled));
    }

    #[tokio::test]
    async fn role_switch_unlocks_on_next_check() {
        let store = MemoryStore::new();
        employee(&store, "u1").await;

        let err = require(&store, "u1", Capability::ViewAnalytics).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        switch_role(&store, "u1", Role::Instructor).await.unwrap();
        let profile = require(&store, "u1", Capability::ViewAnalytics).await.unwrap();
        assert_eq!(profile.job_title, Role::Instructor);
    }

    #[tokio::test]
    async fn role_watch_follows_profile_writes() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        employee(store.as_ref(), "u1").await;
        employee(store.as_ref(), "u2").await;

        let mut watch = RoleWatch::start(store.clone(), "u1".into()).await.unwrap();
        assert!(!watch.permits(Capability::ManageTemplates));

        // someone else's switch is not ours
        switch_role(store.as_ref(), "u2", Role::Instructor).await.unwrap();
        switch_role(store.as_ref(), "u1", Role::Instructor).await.unwrap();

        assert_eq!(watch.changed().await, Some(Role::Instructor));
        assert!(watch.permits(Capability::ManageTemplates));
    }

    #[tokio::test]
    async fn unknown_stored_role_is_an_integrity_error() {
        let store = MemoryStore::new();
        store
            .set(
                Collection::Learners,
                "u9",
                json!({"id": "u9", "displayName": "X", "jobTitle": "Supervisor", "courses": []}),
            )
            .await
            .unwrap();
        let err = require(&store, "u9", Capability::TakeCourses).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
