//! Shared fixtures for the integration tests: a scripted classifier, a
//! seeded in-memory store, and builders for the orchestrator and router.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use civic_intake_engine::api::AppState;
use civic_intake_engine::circuit_breaker::CircuitBreaker;
use civic_intake_engine::classifier::{ClassificationBoundary, Task, TextClassifier};
use civic_intake_engine::error::{ClassifierError, StoreError};
use civic_intake_engine::intake::{IntakeOrchestrator, IntakeRequest};
use civic_intake_engine::metrics::IntakeMetrics;
use civic_intake_engine::models::{Authority, Category, Issue, IssueStatus, Notification, Vote};
use civic_intake_engine::store::{
    AuthorityLookup, MemoryStore, NotificationPage, NotificationQuery, Store, StoreTx,
};

pub const DOWNTOWN: &str = "Downtown";

/// Point A in the worked example.
pub const POINT_A: &str = "40.7128,-74.0060";
/// About 28 m north-east of A.
pub const POINT_B: &str = "40.7130,-74.0058";
/// Midtown, a little over 5 km from A.
pub const POINT_C: &str = "40.7580,-73.9855";

/// Answers each task from a table the test can rewrite between calls.
/// A task with no answer behaves like an unreachable model.
#[derive(Default)]
pub struct ScriptedClassifier {
    answers: Mutex<HashMap<Task, String>>,
}

impl ScriptedClassifier {
    pub fn answering(answers: &[(Task, &str)]) -> Arc<Self> {
        let c = Self::default();
        c.set(answers);
        Arc::new(c)
    }

    /// A pothole the model is confident about.
    pub fn roads() -> Arc<Self> {
        Self::answering(&[
            (Task::Spam, "OK"),
            (Task::Category, "Roads"),
            (Task::Priority, "2"),
            (Task::Radius, "500"),
        ])
    }

    pub fn set(&self, answers: &[(Task, &str)]) {
        let mut table = self.answers.lock();
        for (task, answer) in answers {
            table.insert(*task, answer.to_string());
        }
    }

    pub fn clear(&self) {
        self.answers.lock().clear();
    }
}

#[async_trait]
impl TextClassifier for ScriptedClassifier {
    async fn query(&self, task: Task, _text: &str) -> Result<String, ClassifierError> {
        self.answers
            .lock()
            .get(&task)
            .cloned()
            .ok_or(ClassifierError::EmptyCompletion)
    }
}

pub fn authority(category: Category, district: &str, name: &str) -> Authority {
    Authority {
        id: Uuid::new_v4(),
        name: name.to_string(),
        district: district.to_string(),
        contact_email: format!("{}@city.example", name.to_lowercase().replace(' ', ".")),
        contact_phone: None,
        category,
        user_id: Uuid::new_v4(),
    }
}

/// Everything a test needs to drive the pipeline and then look inside.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub classifier: Arc<ScriptedClassifier>,
    pub boundary: Arc<ClassificationBoundary>,
    pub metrics: Arc<IntakeMetrics>,
    pub roads_office: Authority,
    pub catch_all_office: Authority,
}

impl Harness {
    pub fn new(classifier: Arc<ScriptedClassifier>) -> Self {
        let roads_office = authority(Category::Roads, DOWNTOWN, "Downtown Roads");
        let catch_all_office = authority(Category::Other, DOWNTOWN, "Downtown Service Desk");
        let store = Arc::new(MemoryStore::with_authorities(vec![
            roads_office.clone(),
            catch_all_office.clone(),
        ]));

        let boundary = Arc::new(ClassificationBoundary::new(
            classifier.clone(),
            // Threshold high enough that scripted outages never trip it.
            CircuitBreaker::new("test-classifier", 1_000, Duration::from_secs(60), 1),
            Duration::from_secs(2),
            Category::Other,
        ));

        Self {
            store,
            classifier,
            boundary,
            metrics: Arc::new(IntakeMetrics::new()),
            roads_office,
            catch_all_office,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn orchestrator(&self) -> IntakeOrchestrator {
        IntakeOrchestrator::new(self.dyn_store(), self.boundary.clone(), self.metrics.clone(), 4)
    }

    pub fn app_state(&self) -> Arc<AppState> {
        self.app_state_over(self.dyn_store())
    }

    /// Same classifier and metrics, different backend.
    pub fn orchestrator_over(&self, store: Arc<dyn Store>) -> IntakeOrchestrator {
        IntakeOrchestrator::new(store, self.boundary.clone(), self.metrics.clone(), 4)
    }

    pub fn app_state_over(&self, store: Arc<dyn Store>) -> Arc<AppState> {
        Arc::new(AppState::new(store, self.boundary.clone(), self.metrics.clone(), 4))
    }

    /// The harness store, except every commit fails.
    pub fn failing_commits(&self) -> Arc<dyn Store> {
        Arc::new(CommitFails {
            inner: self.store.clone(),
        })
    }
}

pub fn report(title: &str, location: &str) -> IntakeRequest {
    IntakeRequest {
        title: title.to_string(),
        description: "Deep pothole in the right lane, cars swerving around it".to_string(),
        location: location.to_string(),
        district: DOWNTOWN.to_string(),
        radius: None,
    }
}

/// A store whose reads and staged writes behave normally but whose commits
/// always fail, like a connection dropped at the last moment. The staged
/// work is discarded along with the inner transaction.
pub struct CommitFails {
    inner: Arc<MemoryStore>,
}

fn lost_connection() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl Store for CommitFails {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(CommitFailsTx {
            inner: self.inner.begin().await?,
        }))
    }

    async fn find_authority(&self, category: Category, district: &str) -> AuthorityLookup {
        self.inner.find_authority(category, district).await
    }

    async fn insert_authority(&self, authority: &Authority) -> Result<(), StoreError> {
        self.inner.insert_authority(authority).await
    }

    async fn get_authority(&self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        self.inner.get_authority(id).await
    }

    async fn get_issue(&self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        self.inner.get_issue(id).await
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_issues().await
    }

    async fn vote_count(&self, issue_id: Uuid) -> Result<i64, StoreError> {
        self.inner.vote_count(issue_id).await
    }

    async fn user_vote(&self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        self.inner.user_vote(issue_id, user_id).await
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> Result<NotificationPage, StoreError> {
        self.inner.list_notifications(user_id, query).await
    }

    async fn mark_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Option<u64>, StoreError> {
        self.inner.mark_read(user_id, ids).await
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.mark_all_read(user_id).await
    }

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_notification(user_id, id).await
    }
}

struct CommitFailsTx {
    inner: Box<dyn StoreTx>,
}

#[async_trait]
impl StoreTx for CommitFailsTx {
    async fn lock_keys(&mut self, keys: &[String]) -> Result<(), StoreError> {
        self.inner.lock_keys(keys).await
    }

    async fn active_issues(&mut self, category: Category, district: &str) -> Result<Vec<Issue>, StoreError> {
        self.inner.active_issues(category, district).await
    }

    async fn issue_by_id(&mut self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        self.inner.issue_by_id(id).await
    }

    async fn authority_by_id(&mut self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        self.inner.authority_by_id(id).await
    }

    async fn find_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        self.inner.find_vote(issue_id, user_id).await
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<bool, StoreError> {
        self.inner.insert_vote(vote).await
    }

    async fn delete_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_vote(issue_id, user_id).await
    }

    async fn count_votes(&mut self, issue_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_votes(issue_id).await
    }

    async fn insert_issue(&mut self, issue: &Issue) -> Result<(), StoreError> {
        self.inner.insert_issue(issue).await
    }

    async fn set_status(&mut self, id: Uuid, status: IssueStatus, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.set_status(id, status, updated_at).await
    }

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        self.inner.insert_notification(notification).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the inner transaction rolls it back.
        Err(lost_connection())
    }
}
