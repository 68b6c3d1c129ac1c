//! In-memory storage implementation.
//!
//! Serves as catalog, enrollment directory and progress store at once. Each
//! open transaction holds a lock on its (student, content) row, so concurrent
//! updates of the same row are serialized while other rows proceed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use learnpath_core::{
    AssessmentAttempt, AuditEvent, ContentId, ContentKind, ContentNode, ContentRef, Enrollment,
    ProgressionOverride, StudentId, StudentProgress, Time, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use super::{
    ContentCatalog, EnrollmentDirectory, ProgressStore, ProgressTransaction, Result, StorageError,
};

type RowKey = (StudentId, ContentRef);
type RowLocks = Arc<StdMutex<HashMap<RowKey, Arc<Mutex<()>>>>>;

#[derive(Default)]
struct State {
    nodes: HashMap<ContentRef, ContentNode>,
    enrollments: HashMap<(StudentId, ContentId), Enrollment>,
    progress: HashMap<RowKey, StudentProgress>,
    attempts: HashMap<(StudentId, ContentId), Vec<AssessmentAttempt>>,
    overrides: Vec<ProgressionOverride>,
    events: Vec<AuditEvent>,
}

/// In-memory backend. Cloning shares the underlying data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    row_locks: RowLocks,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a catalog node.
    pub async fn put_node(&self, node: ContentNode) {
        self.state.write().await.nodes.insert(node.reference(), node);
    }

    /// Insert or replace many catalog nodes.
    pub async fn put_nodes(&self, nodes: impl IntoIterator<Item = ContentNode>) {
        let mut state = self.state.write().await;
        for node in nodes {
            state.nodes.insert(node.reference(), node);
        }
    }

    /// Record an enrollment.
    pub async fn enroll(&self, enrollment: Enrollment) {
        let key = (enrollment.student_id.clone(), enrollment.course_id.clone());
        self.state.write().await.enrollments.insert(key, enrollment);
    }

    /// Remove an enrollment.
    pub async fn unenroll(&self, student: &StudentId, course: &ContentId) {
        self.state
            .write()
            .await
            .enrollments
            .remove(&(student.clone(), course.clone()));
    }

    async fn row_lock(&self, key: &RowKey) -> RowGuard {
        let lock = {
            let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        RowGuard {
            key: key.clone(),
            locks: self.row_locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// A held row lock. The map entry goes away once no transaction holds or
/// waits for it.
struct RowGuard {
    key: RowKey,
    locks: RowLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.key);
        }
    }
}

#[async_trait]
impl ContentCatalog for MemoryStore {
    async fn get_node(&self, node: &ContentRef) -> Result<Option<ContentNode>> {
        Ok(self.state.read().await.nodes.get(node).cloned())
    }

    async fn list_course_content(&self, course_id: &ContentId) -> Result<Vec<ContentNode>> {
        let state = self.state.read().await;
        let mut nodes: Vec<ContentNode> = state
            .nodes
            .values()
            .filter(|n| &n.course_id == course_id)
            .cloned()
            .collect();
        sort_course_content(&mut nodes);
        Ok(nodes)
    }

    async fn list_courses(&self) -> Result<Vec<ContentId>> {
        let state = self.state.read().await;
        let mut courses: Vec<ContentId> = state
            .nodes
            .keys()
            .filter(|r| r.kind == ContentKind::Course)
            .map(|r| r.id.clone())
            .collect();
        courses.sort();
        Ok(courses)
    }
}

#[async_trait]
impl EnrollmentDirectory for MemoryStore {
    async fn is_enrolled(&self, student: &StudentId, course: &ContentId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .enrollments
            .contains_key(&(student.clone(), course.clone())))
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load_progress(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Option<StudentProgress>> {
        let key = (student.clone(), content.clone());
        Ok(self.state.read().await.progress.get(&key).cloned())
    }

    async fn list_progress(
        &self,
        student: &StudentId,
        course: &ContentId,
    ) -> Result<Vec<StudentProgress>> {
        let state = self.state.read().await;
        Ok(state
            .progress
            .values()
            .filter(|p| &p.student_id == student && &p.course_id == course)
            .cloned()
            .collect())
    }

    async fn list_attempts(
        &self,
        student: &StudentId,
        assessment: &ContentId,
    ) -> Result<Vec<AssessmentAttempt>> {
        let key = (student.clone(), assessment.clone());
        Ok(self
            .state
            .read()
            .await
            .attempts
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Vec<ProgressionOverride>> {
        let state = self.state.read().await;
        Ok(state
            .overrides
            .iter()
            .filter(|o| &o.student_id == student && &o.content == content)
            .cloned()
            .collect())
    }

    async fn append_override(&self, record: &ProgressionOverride) -> Result<()> {
        self.state.write().await.overrides.push(record.clone());
        Ok(())
    }

    async fn clear_overrides(
        &self,
        student: &StudentId,
        content: &ContentRef,
        cleared_by: &UserId,
        at: Time,
    ) -> Result<Vec<ProgressionOverride>> {
        let mut state = self.state.write().await;
        let mut cleared = Vec::new();
        for record in state.overrides.iter_mut() {
            if &record.student_id == student && &record.content == content && record.is_active() {
                record.cleared_at = Some(at);
                record.cleared_by = Some(cleared_by.clone());
                cleared.push(record.clone());
            }
        }
        Ok(cleared)
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        self.state.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, student: &StudentId) -> Result<Vec<AuditEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| &e.student_id == student)
            .cloned()
            .collect())
    }

    async fn begin(
        &self,
        student: &StudentId,
        content: &ContentRef,
    ) -> Result<Box<dyn ProgressTransaction>> {
        let key = (student.clone(), content.clone());
        let guard = self.row_lock(&key).await;

        let state = self.state.read().await;
        let original = state.progress.get(&key).cloned();
        let attempts = if content.kind == ContentKind::Assessment {
            state
                .attempts
                .get(&(student.clone(), content.id.clone()))
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        drop(state);

        debug!("Opened transaction on {} / {}", student, content);

        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            key,
            _guard: guard,
            original,
            attempts,
            staged_row: None,
            staged_attempts: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    key: RowKey,
    _guard: RowGuard,
    original: Option<StudentProgress>,
    attempts: Vec<AssessmentAttempt>,
    staged_row: Option<StudentProgress>,
    staged_attempts: Vec<AssessmentAttempt>,
}

#[async_trait]
impl ProgressTransaction for MemoryTransaction {
    fn progress(&self) -> Option<&StudentProgress> {
        self.original.as_ref()
    }

    fn attempts(&self) -> &[AssessmentAttempt] {
        &self.attempts
    }

    fn put_progress(&mut self, row: StudentProgress) {
        self.staged_row = Some(row);
    }

    fn append_attempt(&mut self, attempt: AssessmentAttempt) {
        self.staged_attempts.push(attempt);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.write().await;

        let expected = this.original.as_ref().map(|r| r.version).unwrap_or(0);
        let stored = state.progress.get(&this.key).map(|r| r.version).unwrap_or(0);
        if stored != expected {
            return Err(StorageError::Conflict(format!(
                "{} / {} moved from version {} to {}",
                this.key.0, this.key.1, expected, stored
            )));
        }

        if let Some(mut row) = this.staged_row {
            row.version = expected + 1;
            state.progress.insert(this.key.clone(), row);
        }
        if !this.staged_attempts.is_empty() {
            let attempt_key = (this.key.0.clone(), this.key.1.id.clone());
            state
                .attempts
                .entry(attempt_key)
                .or_default()
                .extend(this.staged_attempts);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Course node first, then by position, then by id.
pub(crate) fn sort_course_content(nodes: &mut [ContentNode]) {
    nodes.sort_by(|a, b| {
        (a.kind != ContentKind::Course, a.position, &a.id)
            .cmp(&(b.kind != ContentKind::Course, b.position, &b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::{AssessmentRequirement, OverrideAction, ProgressStatus};
    use std::time::Duration;

    fn student() -> StudentId {
        StudentId::new("s1")
    }

    #[tokio::test]
    async fn test_catalog_lists_course_content_in_order() {
        let store = MemoryStore::new();
        store
            .put_nodes(vec![
                ContentNode::lesson("l2", "c1", "Two").at(2),
                ContentNode::course("c1", "Course"),
                ContentNode::lesson("l1", "c1", "One").at(1),
                ContentNode::lesson("x1", "c2", "Other"),
            ])
            .await;

        let nodes = store.list_course_content(&ContentId::new("c1")).await.unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["c1", "l1", "l2"]);
        assert_eq!(store.list_courses().await.unwrap(), vec![ContentId::new("c1")]);
    }

    #[tokio::test]
    async fn test_commit_makes_row_and_attempts_visible() {
        let store = MemoryStore::new();
        let content = ContentRef::assessment("a1");
        let req = AssessmentRequirement::mandatory("a1", 70);

        let mut tx = store.begin(&student(), &content).await.unwrap();
        assert!(tx.progress().is_none());
        let mut row = StudentProgress::new(student(), ContentId::new("c1"), content.clone());
        row.attempts_count = 1;
        tx.put_progress(row);
        tx.append_attempt(AssessmentAttempt::scored(&req, student(), 1, 80, None, chrono::Utc::now()));

        assert!(store.load_progress(&student(), &content).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let row = store.load_progress(&student(), &content).await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.attempts_count, 1);
        let attempts = store.list_attempts(&student(), &ContentId::new("a1")).await.unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let content = ContentRef::lesson("l1");

        let mut tx = store.begin(&student(), &content).await.unwrap();
        let mut row = StudentProgress::new(student(), ContentId::new("c1"), content.clone());
        row.status = ProgressStatus::InProgress;
        tx.put_progress(row);
        tx.rollback().await.unwrap();

        assert!(store.load_progress(&student(), &content).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_row_lock_serializes_transactions() {
        let store = MemoryStore::new();
        let content = ContentRef::lesson("l1");

        let tx = store.begin(&student(), &content).await.unwrap();

        let second = {
            let store = store.clone();
            let content = content.clone();
            tokio::spawn(async move { store.begin(&student(), &content).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        tx.rollback().await.unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_row_locks_are_released() {
        let store = MemoryStore::new();
        let content = ContentRef::lesson("l1");

        let tx = store.begin(&student(), &content).await.unwrap();
        let waiter = {
            let store = store.clone();
            let content = content.clone();
            tokio::spawn(async move {
                let tx = store.begin(&student(), &content).await.unwrap();
                tx.rollback().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.row_locks.lock().unwrap().len(), 1);

        tx.commit().await.unwrap();
        // The waiter still holds the entry after the first transaction ends.
        waiter.await.unwrap();
        assert!(store.row_locks.lock().unwrap().is_empty());

        for id in ["l1", "l2", "l3"] {
            let tx = store.begin(&student(), &ContentRef::lesson(id)).await.unwrap();
            tx.rollback().await.unwrap();
        }
        assert!(store.row_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_overrides_soft_deletes() {
        let store = MemoryStore::new();
        let content = ContentRef::lesson("l1");
        let record = ProgressionOverride::new(
            student(),
            content.clone(),
            OverrideAction::Block,
            "late enrollment",
            UserId::new("teacher"),
        );
        store.append_override(&record).await.unwrap();

        let cleared = store
            .clear_overrides(&student(), &content, &UserId::new("teacher"), chrono::Utc::now())
            .await
            .unwrap();
        assert_eq!(cleared.len(), 1);

        let all = store.list_overrides(&student(), &content).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_active());
    }
}
